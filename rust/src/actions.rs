#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Conversation lifecycle
    OpenConversation {
        peer_id: String,
    },
    ConversationFocused {
        peer_id: String,
    },
    ConversationBlurred {
        peer_id: String,
    },
    CloseConversation {
        peer_id: String,
    },
    LoadOlderMessages,

    // Sending
    SendMessage {
        body: String,
        appointment_ref: Option<String>,
    },
    SendCallInvite {
        call_id: String,
        is_video: bool,
    },
    RetryMessage {
        temp_id: String,
    },
    DismissMessage {
        temp_id: String,
    },

    // Unread
    RefreshUnread,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Conversation lifecycle
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::ConversationFocused { .. } => "ConversationFocused",
            AppAction::ConversationBlurred { .. } => "ConversationBlurred",
            AppAction::CloseConversation { .. } => "CloseConversation",
            AppAction::LoadOlderMessages => "LoadOlderMessages",

            // Sending
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SendCallInvite { .. } => "SendCallInvite",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::DismissMessage { .. } => "DismissMessage",

            // Unread
            AppAction::RefreshUnread => "RefreshUnread",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
