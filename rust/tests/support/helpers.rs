#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kindred_core::{
    AppReconciler, AppState, AppUpdate, ChatBackend, ChatMessage, ConversationViewState, FfiApp,
    MemoryBackend,
};

pub const SELF_ID: &str = "patient-1";
pub const PEER_ID: &str = "therapist-7";

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(20), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Fast, deterministic defaults; `extra` keys override them.
pub fn write_config(data_dir: &str, extra: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("kindred_config.json");
    let mut v = serde_json::json!({
        "grace_delay_ms": 150,
        "send_timeout_ms": 2000,
        "poll_interval_ms": 100,
        "unread_poll_interval_ms": 0,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), extra.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

/// A running app wired to an in-memory backend, with its data dir kept alive.
pub struct TestApp {
    pub app: Arc<FfiApp>,
    pub backend: MemoryBackend,
    pub updates: Collector,
    _dir: tempfile::TempDir,
}

impl TestApp {
    pub fn start(backend: MemoryBackend, config: serde_json::Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        write_config(&data_dir, config);
        let app = FfiApp::with_backend(
            data_dir,
            SELF_ID.to_string(),
            Arc::new(backend.clone()) as Arc<dyn ChatBackend>,
        );
        let updates = Collector::new();
        app.listen_for_updates(Box::new(updates.clone()));
        // The startup unread refresh is the first emitted state; let it land before the test
        // starts producing messages.
        wait_until("startup refresh", Duration::from_secs(3), || app.state().rev >= 1);
        Self {
            app,
            backend,
            updates,
            _dir: dir,
        }
    }

    /// Drop the app handle, keeping the backend around to inspect what the core left behind.
    pub fn shutdown(self) -> MemoryBackend {
        let Self { app, backend, .. } = self;
        drop(app);
        backend
    }

    pub fn state(&self) -> AppState {
        self.app.state()
    }

    pub fn conversation(&self) -> Option<ConversationViewState> {
        self.app.state().conversation
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.conversation()
            .map(|c| c.messages().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread_for(&self, peer_id: &str) -> u32 {
        self.app.state().unread.count_for(peer_id)
    }

    pub fn wait_for_history(&self, peer_id: &str) {
        wait_until("history loaded", Duration::from_secs(3), || {
            self.conversation()
                .map(|c| c.peer_id == peer_id && !c.loading_older)
                .unwrap_or(false)
        });
    }
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn states(&self) -> Vec<AppState> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|u| match u {
                AppUpdate::FullState(s) => s.clone(),
            })
            .collect()
    }

    pub fn last_toast(&self) -> Option<String> {
        self.states().into_iter().rev().find_map(|s| s.toast)
    }
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}
