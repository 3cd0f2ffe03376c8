// Confirmed-message cache for one conversation session, paginated backward in time.

use std::collections::HashSet;

use crate::state::Message;

#[derive(Debug, Default)]
pub(crate) struct MessageStore {
    // Ascending by (created_at, id).
    messages: Vec<Message>,
    ids: HashSet<String>,
    can_load_older: bool,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn can_load_older(&self) -> bool {
        self.can_load_older
    }

    pub(crate) fn oldest_created_at(&self) -> Option<i64> {
        self.messages.first().map(|m| m.created_at)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Insert messages, deduplicated by id. Returns the ones that were new.
    ///
    /// A repeated id only refreshes read state; every other field is immutable once confirmed.
    pub(crate) fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let mut added = Vec::new();
        for m in incoming {
            if self.ids.contains(&m.id) {
                if let Some(existing) = self.messages.iter_mut().find(|e| e.id == m.id) {
                    if m.is_read && !existing.is_read {
                        existing.is_read = true;
                        existing.read_at = m.read_at;
                    }
                }
                continue;
            }
            let pos = self
                .messages
                .partition_point(|e| (e.created_at, e.id.as_str()) <= (m.created_at, m.id.as_str()));
            self.ids.insert(m.id.clone());
            self.messages.insert(pos, m.clone());
            added.push(m);
        }
        added
    }

    /// Merge a history page. `can_load_older` follows whether the page came back full.
    pub(crate) fn apply_older_page(&mut self, page: Vec<Message>, requested: u32) -> Vec<Message> {
        self.can_load_older = page.len() as u32 >= requested && !page.is_empty();
        self.merge(page)
    }

    /// Local half of the read-through write: flag every unread message from `peer_id`.
    pub(crate) fn mark_read_from(&mut self, peer_id: &str, self_id: &str, at: i64) -> u32 {
        let mut changed = 0;
        for m in self
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == peer_id && m.is_unread_for(self_id))
        {
            m.is_read = true;
            m.read_at = Some(at);
            changed += 1;
        }
        changed
    }

    #[cfg(test)]
    pub(crate) fn unread_from(&self, peer_id: &str, self_id: &str) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.sender_id == peer_id && m.is_unread_for(self_id))
            .filter(|m| !super::call_invite::is_call_invite(&m.body))
            .count() as u32
    }
}
