use std::sync::Arc;

use crate::backend::{BackendError, BoxedFuture, ChatBackend, MessageSink, NewMessage};
use crate::state::{ConversationKey, Message, PeerUnread};

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendErrorKind {
    Network,
    Rejected,
    Timeout,
    Unavailable,
    InvalidResponse,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct BridgeMessageResult {
    pub ok: bool,
    pub message: Option<Message>,
    pub error_kind: Option<BackendErrorKind>,
    pub error_message: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct BridgeMessagesResult {
    pub ok: bool,
    pub messages: Vec<Message>,
    pub error_kind: Option<BackendErrorKind>,
    pub error_message: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct BridgeCountResult {
    pub ok: bool,
    pub count: u32,
    pub error_kind: Option<BackendErrorKind>,
    pub error_message: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct BridgeUnreadResult {
    pub ok: bool,
    pub counts: Vec<PeerUnread>,
    pub error_kind: Option<BackendErrorKind>,
    pub error_message: Option<String>,
}

/// Platform-side backend (the BaaS client lives in Swift/Kotlin).
///
/// Calls are blocking from the platform's point of view; the core runs them on tokio's
/// blocking pool. Realtime inserts come back through `FfiApp::push_message`, so
/// `subscribe` only reports whether push is available for the conversation.
#[uniffi::export(callback_interface)]
pub trait BackendBridge: Send + Sync + 'static {
    fn create_message(
        &self,
        sender_id: String,
        receiver_id: String,
        body: String,
        appointment_ref: Option<String>,
        client_ref: Option<String>,
    ) -> BridgeMessageResult;
    fn fetch_messages(
        &self,
        conversation_key: String,
        before: Option<i64>,
        limit: u32,
    ) -> BridgeMessagesResult;
    fn mark_messages_read(&self, peer_id: String, self_id: String) -> BridgeCountResult;
    fn fetch_unread_counts(&self, self_id: String) -> BridgeUnreadResult;
    fn subscribe(&self, conversation_key: String) -> bool;
    fn unsubscribe(&self, conversation_key: String);
}

#[derive(Clone)]
pub struct BridgeBackend {
    bridge: Arc<dyn BackendBridge>,
}

impl std::fmt::Debug for BridgeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBackend").finish_non_exhaustive()
    }
}

impl BridgeBackend {
    pub fn new(bridge: Arc<dyn BackendBridge>) -> Self {
        Self { bridge }
    }

    fn into_error(kind: Option<BackendErrorKind>, message: Option<String>) -> BackendError {
        let msg = message
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "unknown error".to_string());
        match kind {
            Some(BackendErrorKind::Network) | None => BackendError::Network(msg),
            Some(BackendErrorKind::Rejected) => BackendError::Rejected(msg),
            Some(BackendErrorKind::Timeout) => BackendError::Timeout,
            Some(BackendErrorKind::Unavailable) => BackendError::Unavailable(msg),
            Some(BackendErrorKind::InvalidResponse) => BackendError::InvalidResponse(msg),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn BackendBridge>) -> Result<T, BackendError> + Send + 'static,
    {
        let bridge = self.bridge.clone();
        tokio::task::spawn_blocking(move || f(bridge))
            .await
            .map_err(|e| BackendError::Unavailable(format!("bridge call aborted: {e}")))?
    }
}

impl ChatBackend for BridgeBackend {
    fn create_message(&self, message: NewMessage) -> BoxedFuture<'_, Result<Message, BackendError>> {
        Box::pin(async move {
            self.blocking(move |bridge| {
                let result = bridge.create_message(
                    message.sender_id,
                    message.receiver_id,
                    message.body,
                    message.appointment_ref,
                    message.client_ref,
                );
                if !result.ok {
                    return Err(Self::into_error(result.error_kind, result.error_message));
                }
                result
                    .message
                    .ok_or_else(|| BackendError::InvalidResponse("missing message".to_string()))
            })
            .await
        })
    }

    fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        before: Option<i64>,
        limit: u32,
    ) -> BoxedFuture<'_, Result<Vec<Message>, BackendError>> {
        let key = conversation.to_string();
        Box::pin(async move {
            self.blocking(move |bridge| {
                let result = bridge.fetch_messages(key, before, limit);
                if !result.ok {
                    return Err(Self::into_error(result.error_kind, result.error_message));
                }
                Ok(result.messages)
            })
            .await
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
            self.blocking(move |bridge| {
                let result = bridge.mark_messages_read(peer_id, self_id);
                if !result.ok {
                    return Err(Self::into_error(result.error_kind, result.error_message));
                }
                Ok(result.count)
            })
            .await
        })
    }

    fn fetch_unread_counts(
        &self,
        self_id: &str,
    ) -> BoxedFuture<'_, Result<Vec<PeerUnread>, BackendError>> {
        let self_id = self_id.to_string();
        Box::pin(async move {
            self.blocking(move |bridge| {
                let result = bridge.fetch_unread_counts(self_id);
                if !result.ok {
                    return Err(Self::into_error(result.error_kind, result.error_message));
                }
                Ok(result.counts)
            })
            .await
        })
    }

    fn subscribe(&self, conversation: &ConversationKey, _sink: MessageSink) -> bool {
        self.bridge.subscribe(conversation.to_string())
    }

    fn unsubscribe(&self, conversation: &ConversationKey) {
        self.bridge.unsubscribe(conversation.to_string());
    }
}
