//! Node configuration loaded from environment variables.
//!
//! Every setting has a default, so `paircall-node` with no environment runs
//! the in-process demo.

use std::path::PathBuf;
use std::time::Duration;

use paircall_client::MatchmakerConfig;

/// Node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Base URL of the realtime database.
    /// Env: `PAIRCALL_DIRECTORY_URL`
    /// Default: unset (two local participants on an in-process directory).
    pub directory_url: Option<String>,

    /// Auth token appended to every database request.
    /// Env: `PAIRCALL_DIRECTORY_AUTH`
    pub directory_auth: Option<String>,

    /// Directory holding the local SQLite store.
    /// Env: `PAIRCALL_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Env: `PAIRCALL_SEARCH_RETRY_MS`, `PAIRCALL_SEARCH_RETRY_MAX_MS`,
    /// `PAIRCALL_MATCH_TIMEOUT_MS`
    pub matchmaker: MatchmakerConfig,
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        config.directory_url = non_empty(lookup("PAIRCALL_DIRECTORY_URL"));
        config.directory_auth = non_empty(lookup("PAIRCALL_DIRECTORY_AUTH"));
        config.data_dir = non_empty(lookup("PAIRCALL_DATA_DIR")).map(PathBuf::from);

        let timing = &mut config.matchmaker;
        if let Some(d) = millis(&lookup, "PAIRCALL_SEARCH_RETRY_MS") {
            timing.search_retry = d;
        }
        if let Some(d) = millis(&lookup, "PAIRCALL_SEARCH_RETRY_MAX_MS") {
            timing.search_retry_max = d;
        }
        if let Some(d) = millis(&lookup, "PAIRCALL_MATCH_TIMEOUT_MS") {
            timing.match_timeout = d;
        }
        if timing.search_retry_max < timing.search_retry {
            tracing::warn!(
                retry = ?timing.search_retry,
                max = ?timing.search_retry_max,
                "search retry cap below initial delay, raising cap"
            );
            timing.search_retry_max = timing.search_retry;
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid duration, using default");
            None
        }
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}
