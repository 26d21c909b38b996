//! Sync configuration.

use crate::remote::{LiveRemote, Remote, RestRemote};
use std::time::Duration;

/// Which remote strategy the sync loop talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMode {
    /// No remote, purely local operation.
    Off,
    /// Plain HTTP polling against a JSON counter store.
    Rest { base_url: String },
    /// Persistent WebSocket session with server push.
    Live { url: String },
}

/// Settings for remote synchronization.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mode: RemoteMode,
    /// How often the REST strategy polls for changes.
    pub poll_interval: Duration,
    /// Per-request deadline for both strategies.
    pub request_timeout: Duration,
    /// Initial delay before a live reconnect attempt.
    pub reconnect_delay: Duration,
    /// Backoff ceiling for live reconnect attempts.
    pub max_reconnect_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: RemoteMode::Off,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Picks the strategy from the URL scheme: ws/wss selects the live
    /// session, anything else is treated as a REST base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.mode = if url.starts_with("ws://") || url.starts_with("wss://") {
            RemoteMode::Live { url }
        } else {
            RemoteMode::Rest { base_url: url }
        };
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Builds the remote strategy this configuration describes.
    pub fn build_remote(&self) -> Remote {
        match &self.mode {
            RemoteMode::Off => Remote::Disabled,
            RemoteMode::Rest { base_url } => Remote::Rest(RestRemote::new(
                base_url,
                self.poll_interval,
                self.request_timeout,
            )),
            RemoteMode::Live { url } => Remote::Live(LiveRemote::new(
                url,
                self.request_timeout,
                self.reconnect_delay,
                self.max_reconnect_delay,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.mode, RemoteMode::Off);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_pattern() {
        let config = SyncConfig::default()
            .with_url("https://example.com/db")
            .with_poll_interval(Duration::from_millis(500))
            .with_request_timeout(Duration::from_secs(3));

        assert_eq!(
            config.mode,
            RemoteMode::Rest {
                base_url: "https://example.com/db".to_string()
            }
        );
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_url_scheme_selects_strategy() {
        let rest = SyncConfig::default().with_url("http://host/db");
        assert!(matches!(rest.mode, RemoteMode::Rest { .. }));

        let live = SyncConfig::default().with_url("wss://host/live");
        assert!(matches!(live.mode, RemoteMode::Live { .. }));
    }
}
