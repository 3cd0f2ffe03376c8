// Outgoing path: optimistic append, remote create with a bounded timeout, retry/dismiss,
// and deferred eviction once a confirmed row matches.

use super::*;

use crate::backend::NewMessage;
use ledger::{Draft, OptimisticMessage, OutgoingStatus};

impl AppCore {
    pub(super) fn send_message(&mut self, body: &str, appointment_ref: Option<String>) {
        let body = body.trim();
        let appointment_ref = appointment_ref
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if body.is_empty() && appointment_ref.is_none() {
            return;
        }
        self.enqueue_send(body.to_string(), appointment_ref);
    }

    pub(super) fn send_call_invite(&mut self, call_id: &str, is_video: bool) {
        let call_id = call_id.trim();
        if call_id.is_empty() {
            return;
        }
        match call_invite::build_call_invite_json(call_id, is_video) {
            Ok(body) => self.enqueue_send(body, None),
            Err(e) => {
                tracing::error!(%e, "call invite encode failed");
                self.toast("Couldn't start the call");
            }
        }
    }

    fn enqueue_send(&mut self, body: String, appointment_ref: Option<String>) {
        if self.session.is_none() {
            self.toast("Open a conversation first");
            return;
        }
        let self_id = self.self_id.clone();
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let draft = Draft {
            sender_id: self_id,
            receiver_id: sess.peer_id.clone(),
            body,
            appointment_ref,
        };
        let temp_id = sess.ledger.append(draft, now_millis());
        tracing::info!(conversation = %sess.key, temp_id = %temp_id, "send queued");
        let session_id = sess.id;
        if let Some(entry) = sess.ledger.get(&temp_id).cloned() {
            self.spawn_create(session_id, &entry);
        }
        // The optimistic bubble renders before the write resolves.
        self.sync_state();
    }

    fn spawn_create(&mut self, session_id: u64, entry: &OptimisticMessage) {
        let message = NewMessage {
            sender_id: entry.sender_id.clone(),
            receiver_id: entry.receiver_id.clone(),
            body: entry.body.clone(),
            appointment_ref: entry.appointment_ref.clone(),
            client_ref: Some(entry.temp_id.clone()),
        };
        let temp_id = entry.temp_id.clone();
        let timeout = self.config.send_timeout();
        let shared = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = match current_backend(&shared) {
                Ok(backend) => tokio::time::timeout(timeout, backend.create_message(message))
                    .await
                    .unwrap_or(Err(BackendError::Timeout)),
                Err(e) => Err(e),
            };
            let _ = Self::send_internal(
                &tx,
                InternalEvent::CreateMessageResult {
                    session_id,
                    temp_id,
                    result,
                },
            );
        });
    }

    pub(super) fn handle_create_result(
        &mut self,
        session_id: u64,
        temp_id: &str,
        result: Result<Message, BackendError>,
    ) {
        if !self.is_current_session(session_id) {
            tracing::debug!(temp_id = %temp_id, "create result for closed conversation");
            return;
        }
        let Some(sess) = self.session.as_mut() else {
            return;
        };

        match result {
            Ok(confirmed) => {
                if let Err(e) = sess.ledger.advance(temp_id, OutgoingStatus::Sent) {
                    tracing::debug!(%e, "create ack for entry no longer sending");
                }
                let confirmed_id = confirmed.id.clone();
                let added = sess.store.merge([confirmed]);
                for m in &added {
                    self.remember_seen(&m.id);
                }
                self.reconcile_new(&added);
                // The response names the row this request created.
                let newly_confirmed = self
                    .session
                    .as_mut()
                    .is_some_and(|s| s.ledger.confirm(temp_id, &confirmed_id));
                if newly_confirmed {
                    self.schedule_eviction(session_id, temp_id.to_string());
                }
                tracing::info!(temp_id = %temp_id, id = %confirmed_id, "send confirmed");
            }
            Err(e) => {
                let matched = sess
                    .ledger
                    .get(temp_id)
                    .is_some_and(|entry| entry.matched_id.is_some());
                if matched {
                    // The row already arrived through push or poll; the write landed.
                    tracing::debug!(temp_id = %temp_id, error = %e, "late create error ignored");
                    return;
                }
                tracing::warn!(temp_id = %temp_id, error = %e, "send failed");
                let failed = OutgoingStatus::Failed {
                    reason: e.user_visible_message().to_string(),
                };
                if let Err(le) = sess.ledger.advance(temp_id, failed) {
                    tracing::debug!(error = %le, "create failure for entry no longer sending");
                }
            }
        }
        self.sync_state();
    }

    /// Match confirmed rows that just entered the store against the outbox and schedule
    /// eviction of every newly matched entry.
    pub(super) fn reconcile_new(&mut self, added: &[Message]) {
        if added.is_empty() {
            return;
        }
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if sess.ledger.len() == 0 {
            return;
        }
        let session_id = sess.id;
        let matched = sess.ledger.reconcile(added.iter());
        for (temp_id, confirmed_id) in matched {
            tracing::debug!(temp_id = %temp_id, id = %confirmed_id, "reconciled");
            self.schedule_eviction(session_id, temp_id);
        }
    }

    fn schedule_eviction(&mut self, session_id: u64, temp_id: String) {
        let delay = self.config.grace_delay();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = Self::send_internal(
                &tx,
                InternalEvent::ReconcileGraceElapsed {
                    session_id,
                    temp_id,
                },
            );
        });
    }

    pub(super) fn retry_message(&mut self, temp_id: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        match sess.ledger.retry(temp_id, now_millis()) {
            Ok(entry) => {
                tracing::info!(temp_id = %temp_id, attempt = entry.attempts, "retrying send");
                let session_id = sess.id;
                self.spawn_create(session_id, &entry);
                self.sync_state();
            }
            Err(e) => tracing::warn!(%e, "retry rejected"),
        }
    }

    pub(super) fn dismiss_message(&mut self, temp_id: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        match sess.ledger.dismiss(temp_id) {
            Ok(_) => {
                tracing::info!(temp_id = %temp_id, "failed send dismissed");
                self.sync_state();
            }
            Err(e) => tracing::warn!(%e, "dismiss rejected"),
        }
    }
}
