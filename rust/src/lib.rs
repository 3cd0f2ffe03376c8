mod actions;
mod backend;
mod bridge;
mod core;
mod logging;
mod memory_backend;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use backend::{BackendError, BoxedFuture, ChatBackend, MessageSink, NewMessage, SharedBackend};
pub use bridge::*;
pub use memory_backend::MemoryBackend;
pub use state::*;
pub use updates::*;

/// Canonical `low:high` key for the conversation between two participants.
#[uniffi::export]
pub fn conversation_key(a: &str, b: &str) -> String {
    ConversationKey::new(a.trim(), b.trim()).to_string()
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    backend: SharedBackend,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String, self_id: String) -> Arc<Self> {
        Self::start(data_dir, self_id, None)
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// A message delivered by the platform's own push channel (e.g. a notification payload).
    pub fn push_message(&self, message: Message) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::MessagePushed { message },
        )));
    }

    pub fn set_backend_bridge(&self, bridge: Box<dyn BackendBridge>) {
        let bridge: Arc<dyn BackendBridge> = Arc::from(bridge);
        self.install_backend(Arc::new(BridgeBackend::new(bridge)));
    }
}

impl Drop for FfiApp {
    fn drop(&mut self) {
        // Push sinks and task results hold their own senders, so the channel never closes on
        // its own.
        let _ = self.core_tx.send(CoreMsg::Shutdown);
    }
}

impl FfiApp {
    /// Rust-side constructor with a backend already in place (tests, CLI).
    pub fn with_backend(data_dir: String, self_id: String, backend: Arc<dyn ChatBackend>) -> Arc<Self> {
        Self::start(data_dir, self_id, Some(backend))
    }

    fn start(data_dir: String, self_id: String, backend: Option<Arc<dyn ChatBackend>>) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, self_id = %self_id, "FfiApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty(&self_id)));
        let backend: SharedBackend = Arc::new(RwLock::new(backend));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let backend_for_core = backend.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                self_id,
                shared_for_core,
                backend_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                if matches!(msg, CoreMsg::Shutdown) {
                    break;
                }
                core.handle_message(msg);
            }
            // Sessions, push subscriptions and background loops are torn down with the core.
            drop(core);
            tracing::info!("app actor stopped");
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            backend,
        })
    }

    pub fn install_backend(&self, backend: Arc<dyn ChatBackend>) {
        match self.backend.write() {
            Ok(mut slot) => {
                *slot = Some(backend);
            }
            Err(poison) => {
                *poison.into_inner() = Some(backend);
            }
        }
        let _ = self
            .core_tx
            .send(CoreMsg::Internal(Box::new(InternalEvent::BackendChanged)));
    }
}
