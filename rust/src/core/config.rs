use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const CONFIG_FILE_NAME: &str = "kindred_config.json";

const DEFAULT_PAGE_SIZE: u32 = 30;
const DEFAULT_RECONCILE_WINDOW_MS: u64 = 5_000;
const DEFAULT_GRACE_DELAY_MS: u64 = 400;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 12_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_UNREAD_POLL_INTERVAL_MS: u64 = 15_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) page_size: Option<u32>,
    pub(crate) reconcile_window_ms: Option<u64>,
    pub(crate) grace_delay_ms: Option<u64>,
    pub(crate) send_timeout_ms: Option<u64>,
    pub(crate) poll_interval_ms: Option<u64>,
    // 0 disables aggregate polling; counts then refresh only on RefreshUnread/Foregrounded.
    pub(crate) unread_poll_interval_ms: Option<u64>,
    pub(crate) mark_read_on_incoming: Option<bool>,
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "ignoring unreadable config");
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub(crate) fn page_size(&self) -> u32 {
        self.page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub(crate) fn reconcile_window_ms(&self) -> i64 {
        let ms = self
            .reconcile_window_ms
            .unwrap_or(DEFAULT_RECONCILE_WINDOW_MS);
        i64::try_from(ms).unwrap_or(i64::MAX)
    }

    pub(crate) fn grace_delay(&self) -> Duration {
        // Env override keeps integration tests fast without touching the config file.
        if let Some(ms) = std::env::var("KINDRED_GRACE_DELAY_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return Duration::from_millis(ms);
        }
        Duration::from_millis(self.grace_delay_ms.unwrap_or(DEFAULT_GRACE_DELAY_MS))
    }

    pub(crate) fn send_timeout(&self) -> Duration {
        Duration::from_millis(
            self.send_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_SEND_TIMEOUT_MS),
        )
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        )
    }

    pub(crate) fn unread_poll_interval(&self) -> Option<Duration> {
        match self
            .unread_poll_interval_ms
            .unwrap_or(DEFAULT_UNREAD_POLL_INTERVAL_MS)
        {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub(crate) fn mark_read_on_incoming(&self) -> bool {
        self.mark_read_on_incoming.unwrap_or(true)
    }
}
