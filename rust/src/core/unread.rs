// Unread counters: focus-driven read-through and the aggregate refresh.

use super::*;

impl AppCore {
    /// Zero the peer's counter locally and write the read state through to the backend.
    pub(super) fn mark_read(&mut self, peer_id: &str) {
        let now = now_millis();
        let self_id = self.self_id.clone();
        if let Some(sess) = self.session.as_mut().filter(|s| s.peer_id == peer_id) {
            sess.store.mark_read_from(peer_id, &self_id, now);
        }
        if !self.read_tracker.begin_mark_read(peer_id) {
            tracing::debug!(peer = %peer_id, "mark_read already in flight");
            return;
        }

        let peer = peer_id.to_string();
        let shared = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = match current_backend(&shared) {
                Ok(backend) => backend.mark_messages_read(&peer, &self_id).await,
                Err(e) => Err(e),
            };
            let _ = Self::send_internal(
                &tx,
                InternalEvent::MarkReadResult {
                    peer_id: peer,
                    result,
                },
            );
        });
    }

    pub(super) fn handle_mark_read_result(&mut self, peer_id: &str, result: Result<u32, BackendError>) {
        let ok = match &result {
            Ok(changed) => {
                tracing::debug!(peer = %peer_id, changed, "mark_read ok");
                true
            }
            Err(e) => {
                // Best effort: remembered and retried on the next focus or foreground.
                tracing::warn!(peer = %peer_id, error = %e, "mark_read failed");
                false
            }
        };
        if self.read_tracker.finish_mark_read(peer_id, ok) {
            self.mark_read(peer_id);
        }
        self.sync_state();
    }

    pub(super) fn refresh_unread(&mut self) {
        if self.unread_fetch_in_flight {
            return;
        }
        self.unread_fetch_in_flight = true;
        let requested_at = self.read_tracker.epoch();
        let self_id = self.self_id.clone();
        let shared = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = match current_backend(&shared) {
                Ok(backend) => backend.fetch_unread_counts(&self_id).await,
                Err(e) => Err(e),
            };
            let _ = Self::send_internal(
                &tx,
                InternalEvent::UnreadCountsFetched {
                    requested_at,
                    result,
                },
            );
        });
    }

    pub(super) fn handle_unread_counts(
        &mut self,
        requested_at: u64,
        result: Result<Vec<PeerUnread>, BackendError>,
    ) {
        self.unread_fetch_in_flight = false;
        match result {
            Ok(counts) => {
                let mut protected = HashSet::new();
                if let Some(sess) = self.session.as_ref().filter(|s| s.focused) {
                    protected.insert(sess.peer_id.clone());
                }
                self.read_tracker.apply_aggregate(counts, &protected, requested_at);
                self.sync_state();
            }
            Err(e) => tracing::debug!(error = %e, "unread refresh failed"),
        }
    }

    /// Optional aggregate polling for the lifetime of the core; stopped on drop.
    pub(super) fn start_unread_poll_loop(&mut self) {
        let Some(interval) = self.config.unread_poll_interval() else {
            return;
        };
        let alive = self.unread_poll_alive.clone();
        let shared = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                if current_backend(&shared).is_err() {
                    continue;
                }
                if !Self::send_internal(&tx, InternalEvent::UnreadPollTick) {
                    break;
                }
            }
        });
    }

    pub(super) fn handle_foregrounded(&mut self) {
        let focused_peer = self
            .session
            .as_ref()
            .filter(|s| s.focused)
            .map(|s| s.peer_id.clone());
        for peer_id in self.read_tracker.take_pending() {
            if focused_peer.as_deref() == Some(peer_id.as_str()) {
                continue;
            }
            tracing::info!(peer = %peer_id, "retrying mark_read");
            self.mark_read(&peer_id);
        }
        if let Some(peer_id) = focused_peer {
            self.mark_read(&peer_id);
        }
        // Catch up on anything pushed while suspended.
        if self.session.is_some() {
            self.spawn_page_fetch(PageRequest::Poll, None);
        }
        self.refresh_unread();
        self.sync_state();
    }
}
