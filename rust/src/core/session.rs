// Conversation session lifecycle: mount/unmount, history paging, push and poll delivery.

use super::*;

use crate::backend::MessageSink;

impl AppCore {
    pub(super) fn open_conversation(&mut self, peer_id: &str) {
        let peer_id = peer_id.trim();
        if peer_id.is_empty() {
            self.toast("Pick someone to message");
            return;
        }
        if self.session.as_ref().map(|s| s.peer_id.as_str()) == Some(peer_id) {
            tracing::debug!(peer = %peer_id, "conversation already open");
            self.sync_state();
            return;
        }

        // One conversation at a time; B always starts from a fresh store and ledger.
        self.close_conversation();

        self.session_seq += 1;
        let key = ConversationKey::new(&self.self_id, peer_id);
        tracing::info!(conversation = %key, session = self.session_seq, "open_conversation");
        self.session = Some(ConversationSession {
            id: self.session_seq,
            peer_id: peer_id.to_string(),
            key,
            store: MessageStore::new(),
            ledger: OptimisticLedger::new(self.config.reconcile_window_ms()),
            focused: false,
            // Initial page counts as a load so LoadOlderMessages coalesces with it.
            loading_older: true,
            history_error: None,
            subscribed: false,
            polling: false,
            alive: Arc::new(AtomicBool::new(true)),
        });

        self.resubscribe_current();
        self.spawn_page_fetch(PageRequest::Initial, None);
        self.sync_state();
    }

    /// Teardown: later results for this session are dropped by id, loops stop on their next
    /// tick, and the ledger goes with the session.
    pub(super) fn close_conversation(&mut self) {
        let Some(sess) = self.session.take() else {
            return;
        };
        sess.alive.store(false, Ordering::SeqCst);
        if sess.subscribed {
            if let Ok(backend) = current_backend(&self.backend) {
                backend.unsubscribe(&sess.key);
            }
        }
        if sess.ledger.len() > 0 {
            tracing::debug!(
                conversation = %sess.key,
                pending = sess.ledger.len(),
                "dropping optimistic entries on close"
            );
        }
        tracing::info!(conversation = %sess.key, session = sess.id, "close_conversation");
    }

    /// Subscribe the open conversation to push, falling back to polling.
    pub(super) fn resubscribe_current(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.subscribed {
            return;
        }
        let subscribed = match current_backend(&self.backend) {
            Ok(backend) => backend.subscribe(&sess.key, MessageSink::new(self.core_sender.clone())),
            Err(_) => false,
        };
        if subscribed {
            sess.subscribed = true;
            tracing::info!(conversation = %sess.key, "push subscription active");
            return;
        }
        if !sess.polling {
            sess.polling = true;
            self.start_poll_loop();
        }
    }

    fn start_poll_loop(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let interval = self.config.poll_interval();
        let limit = self.config.page_size();
        let session_id = sess.id;
        let key = sess.key.clone();
        let alive = sess.alive.clone();
        let shared = self.backend.clone();
        let tx = self.core_sender.clone();
        tracing::info!(conversation = %key, ?interval, "push unavailable, polling");
        self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(backend) = current_backend(&shared) else {
                    continue;
                };
                let result = backend.fetch_messages(&key, None, limit).await;
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                let event = InternalEvent::PageFetched {
                    session_id,
                    request: PageRequest::Poll,
                    requested: limit,
                    result,
                };
                if !Self::send_internal(&tx, event) {
                    break;
                }
            }
            tracing::debug!(conversation = %key, "poll loop stopped");
        });
    }

    pub(super) fn spawn_page_fetch(&mut self, request: PageRequest, before: Option<i64>) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let session_id = sess.id;
        let key = sess.key.clone();
        let limit = self.config.page_size();
        let shared = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = match current_backend(&shared) {
                Ok(backend) => backend.fetch_messages(&key, before, limit).await,
                Err(e) => Err(e),
            };
            let _ = Self::send_internal(
                &tx,
                InternalEvent::PageFetched {
                    session_id,
                    request,
                    requested: limit,
                    result,
                },
            );
        });
    }

    pub(super) fn load_older_messages(&mut self) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.loading_older {
            // Coalesce with the request already in flight.
            return;
        }
        // An empty store means the first page never landed; fetching "older" is then a retry.
        if sess.store.len() > 0 && !sess.store.can_load_older() {
            return;
        }
        sess.loading_older = true;
        let before = sess.store.oldest_created_at();
        self.spawn_page_fetch(PageRequest::Older, before);
        self.sync_state();
    }

    pub(super) fn handle_page_fetched(
        &mut self,
        session_id: u64,
        request: PageRequest,
        requested: u32,
        result: Result<Vec<Message>, BackendError>,
    ) {
        if !self.is_current_session(session_id) {
            tracing::debug!(session_id, ?request, "dropping page for closed conversation");
            return;
        }
        let Some(sess) = self.session.as_mut() else {
            return;
        };

        let added = match (request, result) {
            (PageRequest::Initial | PageRequest::Older, Ok(page)) => {
                sess.loading_older = false;
                sess.history_error = None;
                let n = page.len();
                let added = sess.store.apply_older_page(page, requested);
                tracing::debug!(conversation = %sess.key, ?request, fetched = n, "history page");
                // Rows in a history page can also be the echo of a send still in flight.
                self.reconcile_new(&added);
                self.sync_state();
                return;
            }
            (PageRequest::Initial | PageRequest::Older, Err(e)) => {
                sess.loading_older = false;
                tracing::warn!(conversation = %sess.key, ?request, error = %e, "history fetch failed");
                // Keep whatever is already loaded.
                sess.history_error = Some(e.to_string());
                self.toast(format!("Couldn't load messages: {}", e.user_visible_message()));
                return;
            }
            (PageRequest::Poll, Ok(page)) => {
                if sess.store.len() == 0 {
                    sess.history_error = None;
                    sess.store.apply_older_page(page, requested)
                } else {
                    sess.store.merge(page)
                }
            }
            (PageRequest::Poll, Err(e)) => {
                tracing::debug!(conversation = %sess.key, error = %e, "poll failed");
                return;
            }
        };

        if added.is_empty() {
            return;
        }
        self.handle_new_confirmed(added);
    }

    /// Realtime delivery, from a backend subscription or from the platform's push channel.
    pub(super) fn handle_pushed_message(&mut self, message: Message) {
        let in_open_conversation = self
            .session
            .as_ref()
            .is_some_and(|s| message.conversation_key() == s.key);

        if !in_open_conversation {
            if !message.conversation_key().contains(&self.self_id) {
                tracing::debug!(message_id = %message.id, "ignoring push for another user");
                return;
            }
            if !self.remember_seen(&message.id) {
                return;
            }
            if message.is_unread_for(&self.self_id) && !call_invite::is_call_invite(&message.body) {
                self.read_tracker.record_incoming(&message.sender_id);
                self.sync_state();
            }
            return;
        }

        let added = match self.session.as_mut() {
            Some(sess) => sess.store.merge([message]),
            None => return,
        };
        if added.is_empty() {
            return;
        }
        self.handle_new_confirmed(added);
    }

    /// Live (push or poll) rows that were new to the store: unread accounting, read-through
    /// while focused, reconciliation against the outbox.
    fn handle_new_confirmed(&mut self, added: Vec<Message>) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let peer_id = sess.peer_id.clone();
        let focused = sess.focused;

        let mut incoming = 0;
        for m in &added {
            let fresh = self.remember_seen(&m.id);
            if fresh
                && m.sender_id == peer_id
                && m.is_unread_for(&self.self_id)
                && !call_invite::is_call_invite(&m.body)
            {
                incoming += 1;
            }
        }

        self.reconcile_new(&added);

        if incoming > 0 {
            if focused && self.config.mark_read_on_incoming() {
                self.mark_read(&peer_id);
            } else {
                for _ in 0..incoming {
                    self.read_tracker.record_incoming(&peer_id);
                }
            }
        }
        self.sync_state();
    }

    pub(super) fn focus_conversation(&mut self, peer_id: &str) {
        if let Some(sess) = self.session.as_mut() {
            if sess.peer_id == peer_id {
                sess.focused = true;
            }
        }
        // Every focus re-triggers the read-through, including re-entering a mounted screen.
        self.mark_read(peer_id);
        self.sync_state();
    }
}
