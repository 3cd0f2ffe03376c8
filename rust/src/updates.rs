use crate::backend::BackendError;
use crate::state::{AppState, Message, PeerUnread};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    /// Sent when the last `FfiApp` handle goes away; the actor loop exits and drops `AppCore`.
    Shutdown,
}

/// Which history request a fetch result answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    /// Newest page, fetched when the conversation is opened.
    Initial,
    /// Page strictly older than the oldest loaded message.
    Older,
    /// Newest page, fetched by the poll loop when push is unavailable.
    Poll,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Realtime receive path
    MessagePushed {
        message: Message,
    },

    // Async results. `session_id` lets the actor drop results for a torn-down conversation.
    PageFetched {
        session_id: u64,
        request: PageRequest,
        requested: u32,
        result: Result<Vec<Message>, BackendError>,
    },
    CreateMessageResult {
        session_id: u64,
        temp_id: String,
        result: Result<Message, BackendError>,
    },
    ReconcileGraceElapsed {
        session_id: u64,
        temp_id: String,
    },
    MarkReadResult {
        peer_id: String,
        result: Result<u32, BackendError>,
    },
    UnreadCountsFetched {
        requested_at: u64,
        result: Result<Vec<PeerUnread>, BackendError>,
    },
    UnreadPollTick,

    // A backend was installed after startup.
    BackendChanged,
}
