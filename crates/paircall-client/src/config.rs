use std::time::Duration;

use paircall_shared::constants::{
    DEFAULT_MATCH_TIMEOUT_MS, DEFAULT_SEARCH_RETRY_MAX_MS, DEFAULT_SEARCH_RETRY_MS,
};

/// Timing knobs for the matchmaker.
#[derive(Debug, Clone)]
pub struct MatchmakerConfig {
    /// Delay before the first repeat of a search that found nobody.
    pub search_retry: Duration,

    /// Cap for the doubling search backoff.
    pub search_retry_max: Duration,

    /// How long an offered or received match may stay unconnected before
    /// it is abandoned.
    pub match_timeout: Duration,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self {
            search_retry: Duration::from_millis(DEFAULT_SEARCH_RETRY_MS),
            search_retry_max: Duration::from_millis(DEFAULT_SEARCH_RETRY_MAX_MS),
            match_timeout: Duration::from_millis(DEFAULT_MATCH_TIMEOUT_MS),
        }
    }
}
