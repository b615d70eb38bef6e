use std::time::Duration;

/// Core error type for the triage agent.
///
/// Adapter crates map their specific failures into this type so the loop and
/// the digest job can tell authentication problems apart from transient ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not authorized: {0}")]
    Auth(String),

    #[error("rate limited by remote (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("document error: {0}")]
    Document(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// The session is missing or was revoked; only an interactive login fixes it.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Failures worth retrying on the next scheduled pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::Transport(_) | Error::Io(_) | Error::External(_)
        )
    }

    /// Wait requested by the remote (e.g. `FLOOD_WAIT_30`), if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
