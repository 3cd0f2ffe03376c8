use std::fmt;

use serde::{Deserialize, Serialize};

/// A confirmed, server-authoritative chat message.
///
/// Everything except the read state is immutable once the backend has assigned
/// `id` and `created_at`.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Unix milliseconds, assigned by the backend at insert time.
    pub created_at: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub appointment_ref: Option<String>,
    /// Idempotency key echoed back by backends that support it.
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<i64>,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.receiver_id)
    }

    pub fn is_unread_for(&self, self_id: &str) -> bool {
        self.receiver_id == self_id && self.sender_id != self_id && !self.is_read
    }
}

/// Unordered participant pair identifying a 1:1 thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            Self {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.low == participant || self.high == participant
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

#[derive(uniffi::Record, Clone, Debug, Serialize)]
pub struct AppState {
    pub rev: u64,
    pub self_id: String,
    pub conversation: Option<ConversationViewState>,
    pub unread: UnreadState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty(self_id: &str) -> Self {
        Self {
            rev: 0,
            self_id: self_id.to_string(),
            conversation: None,
            unread: UnreadState::empty(),
            toast: None,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, Serialize)]
pub struct ConversationViewState {
    pub peer_id: String,
    pub conversation_key: String,
    /// Ascending by time. Inverted-scroll layouts reverse this on the platform side.
    pub entries: Vec<ConversationEntry>,
    pub can_load_older: bool,
    pub loading_older: bool,
    pub history_error: Option<String>,
    pub is_focused: bool,
}

impl ConversationViewState {
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().filter_map(|e| match e {
            ConversationEntry::Message { message } => Some(message),
            ConversationEntry::Header { .. } => None,
        })
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEntry {
    Header { date: String },
    Message { message: ChatMessage },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Server id for confirmed messages, temp id while optimistic.
    pub id: String,
    pub temp_id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: i64,
    pub is_mine: bool,
    pub is_read: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Appointment { appointment_ref: String },
    CallInvite { call_id: String, is_video: bool },
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageDeliveryState {
    Sending,
    Sent,
    Failed { reason: String },
    /// Confirmed by the backend; no optimistic entry behind it.
    Delivered,
}

impl MessageDeliveryState {
    pub fn is_optimistic(&self) -> bool {
        !matches!(self, Self::Delivered)
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnreadState {
    pub total: u32,
    pub per_peer: Vec<PeerUnread>,
}

impl UnreadState {
    pub fn empty() -> Self {
        Self {
            total: 0,
            per_peer: vec![],
        }
    }

    pub fn count_for(&self, peer_id: &str) -> u32 {
        self.per_peer
            .iter()
            .find(|p| p.peer_id == peer_id)
            .map(|p| p.count)
            .unwrap_or(0)
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUnread {
    pub peer_id: String,
    pub count: u32,
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
