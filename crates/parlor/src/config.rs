//! Typed client configuration.

use std::env;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::transport::AuthMode;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

/// Configuration for a [`crate::Client`].
///
/// `new` fills in defaults; the builder-style setters override them.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `https://chat.example.com`.
    pub host: String,
    /// API token (bearer JWT or server token, depending on `auth`).
    pub token: String,
    pub auth: AuthMode,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Connection-level failures are retried up to this many attempts.
    pub retry_attempts: u32,
    /// Outbound request cap per rolling 60-second window.
    pub rate_limit_per_minute: u32,
    /// Reconnect the event session after transient failures.
    pub auto_reconnect: bool,
    pub user_agent: String,
    /// Skip the initial `GET /servers` fetch. Operations that need a server
    /// id will fail with `NotFound(Server)` until one is known; intended
    /// for tests.
    pub skip_initialization: bool,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            token: token.into(),
            auth: AuthMode::default(),
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            auto_reconnect: true,
            user_agent: concat!("parlor-sdk/", env!("CARGO_PKG_VERSION")).to_string(),
            skip_initialization: false,
        }
    }

    /// Load configuration from the environment.
    ///
    /// `PARLOR_HOST` and `PARLOR_TOKEN` are required; the rest fall back to
    /// the same defaults as [`ClientConfig::new`]. Recognized overrides:
    /// `PARLOR_USE_SERVER_TOKEN`, `PARLOR_TIMEOUT_MS`,
    /// `PARLOR_RETRY_ATTEMPTS`, `PARLOR_RATE_LIMIT_PER_MINUTE`,
    /// `PARLOR_AUTO_RECONNECT`.
    pub fn from_env() -> Result<Self> {
        let host = env_str("PARLOR_HOST")
            .ok_or_else(|| Error::Config("PARLOR_HOST environment variable is required".into()))?;
        let token = env_str("PARLOR_TOKEN")
            .ok_or_else(|| Error::Config("PARLOR_TOKEN environment variable is required".into()))?;

        let mut cfg = Self::new(host, token);
        if env_bool("PARLOR_USE_SERVER_TOKEN").unwrap_or(false) {
            cfg.auth = AuthMode::ServerToken;
        }
        if let Some(ms) = env_u64("PARLOR_TIMEOUT_MS") {
            cfg.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u32("PARLOR_RETRY_ATTEMPTS") {
            cfg.retry_attempts = n;
        }
        if let Some(n) = env_u32("PARLOR_RATE_LIMIT_PER_MINUTE") {
            cfg.rate_limit_per_minute = n;
        }
        if let Some(b) = env_bool("PARLOR_AUTO_RECONNECT") {
            cfg.auto_reconnect = b;
        }
        Ok(cfg)
    }

    pub fn auth_mode(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit.max(1);
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn skip_initialization(mut self, skip: bool) -> Self {
        self.skip_initialization = skip;
        self
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}
