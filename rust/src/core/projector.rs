// Confirmed history + optimistic outbox -> one ascending, date-grouped entry list.

use std::collections::HashMap;

use chrono::TimeZone;

use super::call_invite::parse_call_invite;
use super::ledger::{OptimisticMessage, OutgoingStatus};
use crate::state::{ChatMessage, ConversationEntry, Message, MessageDeliveryState, MessageKind};

/// Local calendar date (`YYYY-MM-DD`) of a unix-millisecond timestamp.
pub(crate) fn day_key<Tz: TimeZone>(ts_ms: i64, tz: &Tz) -> String {
    tz.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn message_kind(body: &str, appointment_ref: Option<&str>) -> MessageKind {
    if let Some(appointment_ref) = appointment_ref.filter(|r| !r.is_empty()) {
        return MessageKind::Appointment {
            appointment_ref: appointment_ref.to_string(),
        };
    }
    match parse_call_invite(body) {
        Some(invite) => MessageKind::CallInvite {
            call_id: invite.call_id,
            is_video: invite.is_video,
        },
        None => MessageKind::Text,
    }
}

fn confirmed_entry(m: &Message, self_id: &str) -> ChatMessage {
    ChatMessage {
        id: m.id.clone(),
        temp_id: None,
        sender_id: m.sender_id.clone(),
        receiver_id: m.receiver_id.clone(),
        body: m.body.clone(),
        kind: message_kind(&m.body, m.appointment_ref.as_deref()),
        created_at: m.created_at,
        is_mine: m.sender_id == self_id,
        is_read: m.is_read,
        delivery: MessageDeliveryState::Delivered,
    }
}

fn optimistic_entry(o: &OptimisticMessage, self_id: &str, created_at: i64) -> ChatMessage {
    let delivery = if o.matched_id.is_some() {
        // The write landed even if our request timed out.
        MessageDeliveryState::Sent
    } else {
        match &o.status {
            OutgoingStatus::Sending => MessageDeliveryState::Sending,
            OutgoingStatus::Sent => MessageDeliveryState::Sent,
            OutgoingStatus::Failed { reason } => MessageDeliveryState::Failed {
                reason: reason.clone(),
            },
        }
    };
    ChatMessage {
        id: o.temp_id.clone(),
        temp_id: Some(o.temp_id.clone()),
        sender_id: o.sender_id.clone(),
        receiver_id: o.receiver_id.clone(),
        body: o.body.clone(),
        kind: message_kind(&o.body, o.appointment_ref.as_deref()),
        created_at,
        is_mine: o.sender_id == self_id,
        is_read: false,
        delivery,
    }
}

/// Project the session into display entries, always ascending.
///
/// - A matched optimistic entry stands in for its confirmed row (same position) until it is
///   evicted, so exactly one bubble exists per message at every instant.
/// - Unmatched optimistic entries trail all confirmed messages in creation order, with their
///   timestamp clamped so the stream never goes backwards.
/// - A header precedes the first entry of each local calendar date.
pub(crate) fn project<Tz: TimeZone>(
    confirmed: &[Message],
    optimistic: &[OptimisticMessage],
    self_id: &str,
    tz: &Tz,
) -> Vec<ConversationEntry> {
    let stand_ins: HashMap<&str, &OptimisticMessage> = optimistic
        .iter()
        .filter_map(|o| o.matched_id.as_deref().map(|id| (id, o)))
        .collect();

    let mut ordered: Vec<&Message> = confirmed.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut rows: Vec<ChatMessage> = Vec::with_capacity(confirmed.len() + optimistic.len());
    for m in ordered {
        match stand_ins.get(m.id.as_str()) {
            Some(o) => rows.push(optimistic_entry(o, self_id, m.created_at)),
            None => rows.push(confirmed_entry(m, self_id)),
        }
    }

    let mut floor = rows.last().map(|r| r.created_at).unwrap_or(i64::MIN);
    for o in optimistic.iter().filter(|o| o.matched_id.is_none()) {
        let ts = o.created_at.max(floor);
        floor = ts;
        rows.push(optimistic_entry(o, self_id, ts));
    }

    let mut entries = Vec::with_capacity(rows.len() + 4);
    let mut current_day: Option<String> = None;
    for row in rows {
        let day = day_key(row.created_at, tz);
        if current_day.as_deref() != Some(day.as_str()) {
            entries.push(ConversationEntry::Header { date: day.clone() });
            current_day = Some(day);
        }
        entries.push(ConversationEntry::Message { message: row });
    }
    entries
}
