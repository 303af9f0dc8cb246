use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages per history page. A short page means no older history.
    pub page_size: u32,
    /// Inactivity window after which a typing indicator clears itself.
    pub typing_idle: Duration,
    /// Pause before re-opening a dropped subscription or presence channel.
    pub resubscribe_delay: Duration,
    /// Resubscribe attempts per drop; 0 retries until the session moves on.
    pub max_resubscribe_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            typing_idle: Duration::from_secs(3),
            resubscribe_delay: Duration::from_secs(1),
            max_resubscribe_attempts: 0,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `MURMUR_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(size) = parse_var::<u32>(&lookup, "MURMUR_PAGE_SIZE") {
            if size == 0 {
                warn!("MURMUR_PAGE_SIZE must be positive, keeping {}", config.page_size);
            } else {
                config.page_size = size;
            }
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MURMUR_TYPING_IDLE_MS") {
            config.typing_idle = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MURMUR_RESUBSCRIBE_DELAY_MS") {
            config.resubscribe_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "MURMUR_RESUBSCRIBE_ATTEMPTS") {
            config.max_resubscribe_attempts = n;
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}
