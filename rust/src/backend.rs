use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::state::{ConversationKey, Message, PeerUnread};
use crate::updates::{CoreMsg, InternalEvent};

pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by backend: {0}")]
    Rejected(String),
    #[error("request timed out")]
    Timeout,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn user_visible_message(&self) -> &'static str {
        match self {
            BackendError::Network(_) => "Network error",
            BackendError::Rejected(_) => "Message rejected",
            BackendError::Timeout => "Request timed out",
            BackendError::Unavailable(_) => "Service unavailable",
            BackendError::InvalidResponse(_) => "Unexpected server response",
        }
    }
}

/// Payload for the remote create operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub appointment_ref: Option<String>,
    /// The optimistic temp id. Backends that echo it back enable exact reconciliation.
    pub client_ref: Option<String>,
}

/// Handle a backend uses to deliver realtime inserts into the app actor.
#[derive(Clone)]
pub struct MessageSink {
    core_tx: Sender<CoreMsg>,
}

impl MessageSink {
    pub(crate) fn new(core_tx: Sender<CoreMsg>) -> Self {
        Self { core_tx }
    }

    /// Returns false once the app actor is gone; callers should drop the sink.
    pub fn deliver(&self, message: Message) -> bool {
        self.core_tx
            .send(CoreMsg::Internal(Box::new(InternalEvent::MessagePushed {
                message,
            })))
            .is_ok()
    }
}

impl std::fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSink").finish_non_exhaustive()
    }
}

/// Remote operations the messaging core needs. Schema and transport live behind this seam.
pub trait ChatBackend: Send + Sync + 'static {
    fn create_message(&self, message: NewMessage) -> BoxedFuture<'_, Result<Message, BackendError>>;

    /// Messages strictly older than `before` (newest page when `None`), at most `limit`.
    /// Ordering is not required; the store sorts every page.
    ///
    /// The cursor is the oldest loaded `created_at`, so rows sharing that exact millisecond
    /// but cut off by the previous page's limit are never fetched. Backends that assign
    /// unique timestamps per conversation (as `MemoryBackend` does for live writes) avoid it.
    fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        before: Option<i64>,
        limit: u32,
    ) -> BoxedFuture<'_, Result<Vec<Message>, BackendError>>;

    /// Marks every unread message from `peer_id` to `self_id` as read. Returns how many changed.
    fn mark_messages_read(
        &self,
        peer_id: &str,
        self_id: &str,
    ) -> BoxedFuture<'_, Result<u32, BackendError>>;

    fn fetch_unread_counts(&self, self_id: &str)
        -> BoxedFuture<'_, Result<Vec<PeerUnread>, BackendError>>;

    /// Returns false when realtime push is unsupported; the core then polls.
    fn subscribe(&self, conversation: &ConversationKey, sink: MessageSink) -> bool;

    fn unsubscribe(&self, conversation: &ConversationKey);
}

pub type SharedBackend = Arc<RwLock<Option<Arc<dyn ChatBackend>>>>;

pub(crate) fn current_backend(shared: &SharedBackend) -> Result<Arc<dyn ChatBackend>, BackendError> {
    let slot = match shared.read() {
        Ok(g) => g.clone(),
        Err(poison) => poison.into_inner().clone(),
    };
    slot.ok_or_else(|| BackendError::Unavailable("no backend configured".to_string()))
}
