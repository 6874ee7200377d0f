use std::fmt;
use std::time::Duration;

/// Which kind of resource a lookup failed to find.
///
/// The backend signals every missing resource with a bare 404; the variant
/// is chosen by the calling operation, not by the wire payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Server,
    Channel,
    Message,
    User,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::Server => "server",
            Resource::Channel => "channel",
            Resource::Message => "message",
            Resource::User => "user",
        };
        f.write_str(s)
    }
}

/// Error type for all client operations.
///
/// Every public operation either returns a fully populated domain object or
/// fails with exactly one of these kinds. HTTP-status-derived variants are
/// surfaced immediately (no local retry); `Connection` is returned only
/// after the configured retry attempts are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("permission denied")]
    PermissionDenied,

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("api error: status {status}")]
    Api {
        status: u16,
        /// Parsed error body when the response was JSON, `Null` otherwise.
        body: serde_json::Value,
    },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
