// Optimistic outbox for one conversation session.
//
// Entries are matched to confirmed rows by `client_ref` when the backend echoes it, otherwise by
// (sender, body, created_at within the window). Two identical bodies sent inside the window can
// cross-match; the worst case is a swapped status on near-identical bubbles.

use std::collections::HashSet;

use crate::state::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutgoingStatus {
    Sending,
    Sent,
    Failed { reason: String },
}

impl OutgoingStatus {
    fn name(&self) -> &'static str {
        match self {
            OutgoingStatus::Sending => "sending",
            OutgoingStatus::Sent => "sent",
            OutgoingStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Draft {
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub appointment_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct OptimisticMessage {
    pub temp_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub appointment_ref: Option<String>,
    /// Client clock at creation (or at the latest retry).
    pub created_at: i64,
    pub status: OutgoingStatus,
    /// Confirmed message id once reconciled; the entry is evicted after the grace delay.
    pub matched_id: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum LedgerError {
    #[error("no optimistic message with temp id {0}")]
    UnknownTempId(String),
    #[error("cannot move {temp_id} from {from} to {to}")]
    InvalidTransition {
        temp_id: String,
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug)]
pub(crate) struct OptimisticLedger {
    // Creation order; retry moves an entry to the back.
    entries: Vec<OptimisticMessage>,
    window_ms: i64,
}

impl OptimisticLedger {
    pub(crate) fn new(window_ms: i64) -> Self {
        Self {
            entries: Vec::new(),
            window_ms,
        }
    }

    pub(crate) fn append(&mut self, draft: Draft, now_ms: i64) -> String {
        let temp_id = loop {
            let candidate = format!("tmp-{now_ms}-{:08x}", rand::random::<u32>());
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        self.entries.push(OptimisticMessage {
            temp_id: temp_id.clone(),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            body: draft.body,
            appointment_ref: draft.appointment_ref,
            created_at: now_ms,
            status: OutgoingStatus::Sending,
            matched_id: None,
            attempts: 1,
        });
        temp_id
    }

    pub(crate) fn get(&self, temp_id: &str) -> Option<&OptimisticMessage> {
        self.entries.iter().find(|e| e.temp_id == temp_id)
    }

    fn get_mut(&mut self, temp_id: &str) -> Result<&mut OptimisticMessage, LedgerError> {
        self.entries
            .iter_mut()
            .find(|e| e.temp_id == temp_id)
            .ok_or_else(|| LedgerError::UnknownTempId(temp_id.to_string()))
    }

    /// Forward transitions only: sending → sent | failed. Retry has its own entry point.
    pub(crate) fn advance(&mut self, temp_id: &str, status: OutgoingStatus) -> Result<(), LedgerError> {
        let entry = self.get_mut(temp_id)?;
        match (&entry.status, &status) {
            (OutgoingStatus::Sending, OutgoingStatus::Sent)
            | (OutgoingStatus::Sending, OutgoingStatus::Failed { .. }) => {
                entry.status = status;
                Ok(())
            }
            (from, to) => Err(LedgerError::InvalidTransition {
                temp_id: temp_id.to_string(),
                from: from.name(),
                to: to.name(),
            }),
        }
    }

    /// failed → sending, reusing the temp id. The local timestamp is refreshed so the
    /// reconciliation window tracks the new attempt.
    pub(crate) fn retry(&mut self, temp_id: &str, now_ms: i64) -> Result<OptimisticMessage, LedgerError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.temp_id == temp_id)
            .ok_or_else(|| LedgerError::UnknownTempId(temp_id.to_string()))?;
        let entry = &self.entries[idx];
        if !matches!(entry.status, OutgoingStatus::Failed { .. }) || entry.matched_id.is_some() {
            return Err(LedgerError::InvalidTransition {
                temp_id: temp_id.to_string(),
                from: entry.status.name(),
                to: OutgoingStatus::Sending.name(),
            });
        }
        let mut entry = self.entries.remove(idx);
        entry.status = OutgoingStatus::Sending;
        entry.created_at = now_ms;
        entry.attempts += 1;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Explicit user dismissal; only failed entries can be dismissed.
    pub(crate) fn dismiss(&mut self, temp_id: &str) -> Result<OptimisticMessage, LedgerError> {
        let entry = self.get_mut(temp_id)?;
        if !matches!(entry.status, OutgoingStatus::Failed { .. }) {
            return Err(LedgerError::InvalidTransition {
                temp_id: temp_id.to_string(),
                from: entry.status.name(),
                to: "dismissed",
            });
        }
        self.remove(temp_id)
            .ok_or_else(|| LedgerError::UnknownTempId(temp_id.to_string()))
    }

    pub(crate) fn remove(&mut self, temp_id: &str) -> Option<OptimisticMessage> {
        let idx = self.entries.iter().position(|e| e.temp_id == temp_id)?;
        Some(self.entries.remove(idx))
    }

    /// Match unreconciled entries against confirmed messages. Returns the newly matched
    /// `(temp_id, confirmed_id)` pairs; each confirmed message is claimed at most once.
    pub(crate) fn reconcile<'a>(
        &mut self,
        confirmed: impl IntoIterator<Item = &'a Message>,
    ) -> Vec<(String, String)> {
        let confirmed: Vec<&Message> = confirmed.into_iter().collect();
        let mut claimed: HashSet<String> = self
            .entries
            .iter()
            .filter_map(|e| e.matched_id.clone())
            .collect();
        let window = self.window_ms;
        let mut matched = Vec::new();

        for entry in self.entries.iter_mut().filter(|e| e.matched_id.is_none()) {
            let exact = confirmed.iter().find(|m| {
                m.client_ref.as_deref() == Some(entry.temp_id.as_str()) && !claimed.contains(&m.id)
            });
            let found = exact.or_else(|| {
                confirmed
                    .iter()
                    .filter(|m| {
                        !claimed.contains(&m.id)
                            && m.sender_id == entry.sender_id
                            && m.body == entry.body
                            && (m.created_at - entry.created_at).abs() <= window
                    })
                    .min_by_key(|m| ((m.created_at - entry.created_at).abs(), m.created_at))
            });
            if let Some(m) = found {
                claimed.insert(m.id.clone());
                entry.matched_id = Some(m.id.clone());
                matched.push((entry.temp_id.clone(), m.id.clone()));
            }
        }
        matched
    }

    /// Exact correlation from the create response. No-op if the entry is already matched or
    /// the confirmed id was claimed by another entry.
    pub(crate) fn confirm(&mut self, temp_id: &str, confirmed_id: &str) -> bool {
        if self
            .entries
            .iter()
            .any(|e| e.matched_id.as_deref() == Some(confirmed_id))
        {
            return false;
        }
        match self.entries.iter_mut().find(|e| e.temp_id == temp_id) {
            Some(entry) if entry.matched_id.is_none() => {
                entry.matched_id = Some(confirmed_id.to_string());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn entries(&self) -> &[OptimisticMessage] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
