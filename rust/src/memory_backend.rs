//! In-process [`ChatBackend`] used by tests, the CLI, and offline demos.
//!
//! Behaves like the hosted backend: server-assigned ids, strictly increasing insert
//! timestamps, realtime push to subscribers. Failures and latency can be injected per
//! operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{BackendError, BoxedFuture, ChatBackend, MessageSink, NewMessage};
use crate::core::call_invite::is_call_invite;
use crate::state::{now_millis, ConversationKey, Message, PeerUnread};

#[derive(Debug)]
struct Inner {
    conversations: HashMap<ConversationKey, Vec<Message>>,
    subscribers: HashMap<ConversationKey, MessageSink>,
    next_id: u64,
    last_created_at: i64,
    push_enabled: bool,
    echo_client_ref: bool,
    create_failures: u32,
    fetch_failures: u32,
    mark_read_failures: u32,
    create_latency: Duration,
    create_calls: u32,
}

#[derive(Clone, Debug)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                conversations: HashMap::new(),
                subscribers: HashMap::new(),
                next_id: 1,
                last_created_at: 0,
                push_enabled: true,
                echo_client_ref: false,
                create_failures: 0,
                fetch_failures: 0,
                mark_read_failures: 0,
                create_latency: Duration::ZERO,
                create_calls: 0,
            })),
        }
    }

    /// With push disabled `subscribe` returns false and the core falls back to polling.
    pub fn set_push_enabled(&self, enabled: bool) {
        self.inner.lock().push_enabled = enabled;
    }

    pub fn set_echo_client_ref(&self, echo: bool) {
        self.inner.lock().echo_client_ref = echo;
    }

    pub fn set_create_latency(&self, latency: Duration) {
        self.inner.lock().create_latency = latency;
    }

    pub fn fail_next_creates(&self, n: u32) {
        self.inner.lock().create_failures = n;
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.inner.lock().fetch_failures = n;
    }

    pub fn fail_next_mark_reads(&self, n: u32) {
        self.inner.lock().mark_read_failures = n;
    }

    pub fn create_calls(&self) -> u32 {
        self.inner.lock().create_calls
    }

    /// Seed history at an explicit timestamp without pushing it.
    pub fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
        created_at: i64,
    ) -> Message {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let message = Message {
            id: id.to_string(),
            created_at,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body: body.to_string(),
            appointment_ref: None,
            client_ref: None,
            is_read: false,
            read_at: None,
        };
        inner.last_created_at = inner.last_created_at.max(created_at);
        let log = inner
            .conversations
            .entry(message.conversation_key())
            .or_default();
        log.push(message.clone());
        log.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        message
    }

    /// Simulate the other participant writing a message: insert now, then push.
    pub fn deliver_incoming(&self, sender_id: &str, receiver_id: &str, body: &str) -> Message {
        let draft = NewMessage {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body: body.to_string(),
            appointment_ref: None,
            client_ref: None,
        };
        let (message, sink) = {
            let mut inner = self.inner.lock();
            let message = Self::insert_now(&mut inner, draft);
            let sink = inner.subscribers.get(&message.conversation_key()).cloned();
            (message, sink)
        };
        self.push(sink, &message);
        message
    }

    pub fn messages(&self, conversation: &ConversationKey) -> Vec<Message> {
        self.inner
            .lock()
            .conversations
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, conversation: &ConversationKey) -> bool {
        self.inner.lock().subscribers.contains_key(conversation)
    }

    pub fn unread_from(&self, peer_id: &str, self_id: &str) -> u32 {
        let key = ConversationKey::new(peer_id, self_id);
        self.messages(&key)
            .iter()
            .filter(|m| m.sender_id == peer_id && m.is_unread_for(self_id))
            .count() as u32
    }

    fn insert_now(inner: &mut Inner, draft: NewMessage) -> Message {
        let id = inner.next_id;
        inner.next_id += 1;
        let created_at = now_millis().max(inner.last_created_at + 1);
        inner.last_created_at = created_at;
        let message = Message {
            id: id.to_string(),
            created_at,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            body: draft.body,
            appointment_ref: draft.appointment_ref,
            client_ref: if inner.echo_client_ref {
                draft.client_ref
            } else {
                None
            },
            is_read: false,
            read_at: None,
        };
        inner
            .conversations
            .entry(message.conversation_key())
            .or_default()
            .push(message.clone());
        message
    }

    fn push(&self, sink: Option<MessageSink>, message: &Message) {
        let Some(sink) = sink else {
            return;
        };
        if !sink.deliver(message.clone()) {
            tracing::debug!(conversation = %message.conversation_key(), "dropping closed subscriber");
            self.inner
                .lock()
                .subscribers
                .remove(&message.conversation_key());
        }
    }
}

impl ChatBackend for MemoryBackend {
    fn create_message(&self, message: NewMessage) -> BoxedFuture<'_, Result<Message, BackendError>> {
        Box::pin(async move {
            let latency = {
                let mut inner = self.inner.lock();
                inner.create_calls += 1;
                inner.create_latency
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let (created, sink) = {
                let mut inner = self.inner.lock();
                if inner.create_failures > 0 {
                    inner.create_failures -= 1;
                    return Err(BackendError::Network("connection reset".to_string()));
                }
                let created = Self::insert_now(&mut inner, message);
                let sink = inner.subscribers.get(&created.conversation_key()).cloned();
                (created, sink)
            };
            self.push(sink, &created);
            Ok(created)
        })
    }

    fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        before: Option<i64>,
        limit: u32,
    ) -> BoxedFuture<'_, Result<Vec<Message>, BackendError>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if inner.fetch_failures > 0 {
                inner.fetch_failures -= 1;
                return Err(BackendError::Network("fetch failed".to_string()));
            }
            let Some(log) = inner.conversations.get(&conversation) else {
                return Ok(vec![]);
            };
            let eligible: Vec<&Message> = log
                .iter()
                .filter(|m| before.map(|b| m.created_at < b).unwrap_or(true))
                .collect();
            let start = eligible.len().saturating_sub(limit as usize);
            Ok(eligible[start..].iter().map(|m| (*m).clone()).collect())
        })
    }

    fn mark_messages_read(
        &self,
        peer_id: &str,
        self_id: &str,
    ) -> BoxedFuture<'_, Result<u32, BackendError>> {
        let peer_id = peer_id.to_string();
        let self_id = self_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if inner.mark_read_failures > 0 {
                inner.mark_read_failures -= 1;
                return Err(BackendError::Network("mark read failed".to_string()));
            }
            let now = now_millis();
            let key = ConversationKey::new(&peer_id, &self_id);
            let mut changed = 0;
            if let Some(log) = inner.conversations.get_mut(&key) {
                for m in log
                    .iter_mut()
                    .filter(|m| m.sender_id == peer_id && m.is_unread_for(&self_id))
                {
                    m.is_read = true;
                    m.read_at = Some(now);
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn fetch_unread_counts(
        &self,
        self_id: &str,
    ) -> BoxedFuture<'_, Result<Vec<PeerUnread>, BackendError>> {
        let self_id = self_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock();
            let mut counts: HashMap<String, u32> = HashMap::new();
            for m in inner
                .conversations
                .values()
                .flatten()
                .filter(|m| m.is_unread_for(&self_id) && !is_call_invite(&m.body))
            {
                *counts.entry(m.sender_id.clone()).or_insert(0) += 1;
            }
            let mut out: Vec<PeerUnread> = counts
                .into_iter()
                .map(|(peer_id, count)| PeerUnread { peer_id, count })
                .collect();
            out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
            Ok(out)
        })
    }

    fn subscribe(&self, conversation: &ConversationKey, sink: MessageSink) -> bool {
        let mut inner = self.inner.lock();
        if !inner.push_enabled {
            return false;
        }
        inner.subscribers.insert(conversation.clone(), sink);
        true
    }

    fn unsubscribe(&self, conversation: &ConversationKey) {
        self.inner.lock().subscribers.remove(conversation);
    }
}
