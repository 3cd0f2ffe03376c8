// Call invites travel as ordinary chat messages carrying a JSON envelope. Signaling itself
// (offer/answer/ICE) lives outside the messaging core; here we only recognise and build invites.

use serde::{Deserialize, Serialize};

use crate::state::now_millis;

const CALL_NS: &str = "kindred.call";
const CALL_PROTOCOL_VERSION: u8 = 1;
const CALL_INVITE_TYPE: &str = "call.invite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallInvite {
    pub call_id: String,
    pub is_video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CallEnvelope {
    v: u8,
    ns: String,
    #[serde(rename = "type")]
    message_type: String,
    call_id: String,
    ts_ms: i64,
    #[serde(default)]
    video: bool,
}

pub(crate) fn parse_call_invite(body: &str) -> Option<CallInvite> {
    // Cheap reject before attempting JSON for ordinary text.
    if !body.trim_start().starts_with('{') {
        return None;
    }
    let env: CallEnvelope = serde_json::from_str(body).ok()?;
    if env.v != CALL_PROTOCOL_VERSION || env.ns != CALL_NS || env.message_type != CALL_INVITE_TYPE {
        return None;
    }
    if env.call_id.trim().is_empty() {
        return None;
    }
    Some(CallInvite {
        call_id: env.call_id,
        is_video: env.video,
    })
}

pub(crate) fn is_call_invite(body: &str) -> bool {
    parse_call_invite(body).is_some()
}

pub(crate) fn build_call_invite_json(call_id: &str, is_video: bool) -> Result<String, serde_json::Error> {
    serde_json::to_string(&CallEnvelope {
        v: CALL_PROTOCOL_VERSION,
        ns: CALL_NS.to_string(),
        message_type: CALL_INVITE_TYPE.to_string(),
        call_id: call_id.to_string(),
        ts_ms: now_millis(),
        video: is_video,
    })
}
