pub(crate) mod call_invite;
mod config;
mod ledger;
mod projector;
mod read_tracker;
mod send;
mod session;
mod store;
mod unread;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::backend::{current_backend, BackendError, SharedBackend};
use crate::state::{
    now_millis, AppState, ConversationKey, ConversationViewState, Message, PeerUnread,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent, PageRequest};

use ledger::OptimisticLedger;
use read_tracker::ReadTracker;
use store::MessageStore;

// Push channels (and platform push) can redeliver the same row; keep a bounded id cache so
// unread counters are not bumped twice for conversations that are not open.
const SEEN_CAP: usize = 2048;

/// Everything scoped to the one open conversation. Dropped on close, so a later open of the
/// same pair starts with an empty ledger.
struct ConversationSession {
    id: u64,
    peer_id: String,
    key: ConversationKey,
    store: MessageStore,
    ledger: OptimisticLedger,
    focused: bool,
    loading_older: bool,
    history_error: Option<String>,
    subscribed: bool,
    polling: bool,
    // Flipped on teardown; background loops for this session exit on their next tick.
    alive: Arc<AtomicBool>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    self_id: String,
    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    backend: SharedBackend,

    session: Option<ConversationSession>,
    session_seq: u64,

    read_tracker: ReadTracker,
    unread_fetch_in_flight: bool,
    unread_poll_alive: Arc<AtomicBool>,

    seen: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        self_id: String,
        shared_state: Arc<RwLock<AppState>>,
        backend: SharedBackend,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = AppState::empty(&self_id);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let mut this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            self_id,
            config,
            runtime,
            backend,
            session: None,
            session_seq: 0,
            read_tracker: ReadTracker::new(),
            unread_fetch_in_flight: false,
            unread_poll_alive: Arc::new(AtomicBool::new(true)),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);

        this.start_unread_poll_loop();
        if current_backend(&this.backend).is_ok() {
            this.refresh_unread();
        }
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Re-project the open conversation and unread counters into `state`, then emit.
    fn sync_state(&mut self) {
        self.state.conversation = self.session.as_ref().map(|s| ConversationViewState {
            peer_id: s.peer_id.clone(),
            conversation_key: s.key.to_string(),
            entries: projector::project(
                s.store.messages(),
                s.ledger.entries(),
                &self.self_id,
                &chrono::Local,
            ),
            can_load_older: s.store.can_load_older(),
            loading_older: s.loading_older,
            history_error: s.history_error.clone(),
            is_focused: s.focused,
        });
        self.state.unread = self.read_tracker.snapshot();
        self.emit_state();
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it, so a resync from state() still shows it.
        self.state.toast = Some(msg.into());
        self.sync_state();
    }

    fn send_internal(tx: &Sender<CoreMsg>, event: InternalEvent) -> bool {
        tx.send(CoreMsg::Internal(Box::new(event))).is_ok()
    }

    /// Returns false if `id` was already seen.
    fn remember_seen(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.seen_order.push_back(id.to_string());
        if self.seen_order.len() > SEEN_CAP {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    fn is_current_session(&self, session_id: u64) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(session_id)
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it carries message bodies.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            // The actor loop stops on this before it reaches the core.
            CoreMsg::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::MessagePushed { message } => self.handle_pushed_message(message),
            InternalEvent::PageFetched {
                session_id,
                request,
                requested,
                result,
            } => self.handle_page_fetched(session_id, request, requested, result),
            InternalEvent::CreateMessageResult {
                session_id,
                temp_id,
                result,
            } => self.handle_create_result(session_id, &temp_id, result),
            InternalEvent::ReconcileGraceElapsed {
                session_id,
                temp_id,
            } => {
                if !self.is_current_session(session_id) {
                    return;
                }
                let evicted = self
                    .session
                    .as_mut()
                    .and_then(|s| s.ledger.remove(&temp_id));
                if evicted.is_some() {
                    tracing::debug!(temp_id = %temp_id, "optimistic entry evicted");
                    self.sync_state();
                }
            }
            InternalEvent::MarkReadResult { peer_id, result } => {
                self.handle_mark_read_result(&peer_id, result)
            }
            InternalEvent::UnreadCountsFetched {
                requested_at,
                result,
            } => self.handle_unread_counts(requested_at, result),
            InternalEvent::UnreadPollTick => self.refresh_unread(),
            InternalEvent::BackendChanged => {
                tracing::info!("backend installed");
                self.resubscribe_current();
                self.refresh_unread();
            }
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Conversation lifecycle
            AppAction::OpenConversation { peer_id } => self.open_conversation(&peer_id),
            AppAction::ConversationFocused { peer_id } => self.focus_conversation(&peer_id),
            AppAction::ConversationBlurred { peer_id } => {
                let Some(sess) = self.session.as_mut() else {
                    return;
                };
                if sess.peer_id != peer_id || !sess.focused {
                    return;
                }
                sess.focused = false;
                self.sync_state();
            }
            AppAction::CloseConversation { peer_id } => {
                // Unmount of A can arrive after mount of B; only tear down the matching session.
                if self.session.as_ref().map(|s| s.peer_id.as_str()) != Some(peer_id.as_str()) {
                    tracing::debug!(peer = %peer_id, "close for a conversation that is not open");
                    return;
                }
                self.close_conversation();
                self.sync_state();
            }
            AppAction::LoadOlderMessages => self.load_older_messages(),

            // Sending
            AppAction::SendMessage {
                body,
                appointment_ref,
            } => self.send_message(&body, appointment_ref),
            AppAction::SendCallInvite { call_id, is_video } => {
                self.send_call_invite(&call_id, is_video)
            }
            AppAction::RetryMessage { temp_id } => self.retry_message(&temp_id),
            AppAction::DismissMessage { temp_id } => self.dismiss_message(&temp_id),

            // Unread
            AppAction::RefreshUnread => self.refresh_unread(),

            // UI
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => self.handle_foregrounded(),
        }
    }
}

impl Drop for AppCore {
    fn drop(&mut self) {
        self.unread_poll_alive.store(false, Ordering::SeqCst);
        self.close_conversation();
    }
}
