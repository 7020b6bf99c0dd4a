use std::time::Duration;
use thiserror::Error;

/// Errors reported by the Bot API transport, classified by how callers should react.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelegramError {
    /// The token was rejected; nothing will work until it is fixed.
    #[error("Invalid token")]
    InvalidToken,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Timed out")]
    TimedOut,

    #[error("{0}")]
    Network(String),

    #[error("Flood control exceeded. Retry in {:.1} seconds", .0.as_secs_f64())]
    RetryAfter(Duration),

    #[error("Group migrated to supergroup. New chat id: {0}")]
    ChatMigrated(i64),

    #[error("{0}")]
    Conflict(String),
}

impl TelegramError {
    pub fn unauthorized(message: impl AsRef<str>) -> Self {
        Self::Unauthorized(normalize_message(message.as_ref()))
    }

    pub fn bad_request(message: impl AsRef<str>) -> Self {
        Self::BadRequest(normalize_message(message.as_ref()))
    }

    pub fn network(message: impl AsRef<str>) -> Self {
        Self::Network(normalize_message(message.as_ref()))
    }

    pub fn conflict(message: impl AsRef<str>) -> Self {
        Self::Conflict(normalize_message(message.as_ref()))
    }

    /// Credential problems: invalid token or unauthorized.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::Unauthorized(_))
    }

    /// Errors that must terminate a running polling loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidToken)
    }

    /// Whether bootstrap may try again after this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_auth()
    }

    /// Server-requested backoff, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RetryAfter(d) => Some(*d),
            _ => None,
        }
    }
}

/// Strips the `Error: `, `[Error]: ` and `Bad Request: ` prefixes the server puts in front of
/// descriptions and capitalizes what is left. Messages without a prefix are kept as is.
pub fn normalize_message(message: &str) -> String {
    let mut stripped = message;
    for prefix in ["Error: ", "[Error]: ", "Bad Request: "] {
        stripped = stripped.strip_prefix(prefix).unwrap_or(stripped);
    }
    if stripped == message {
        return message.to_string();
    }
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum DbotError {
    #[error("Telegram error: {0}")]
    Telegram(#[from] TelegramError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Returned by a callback to stop the update from reaching any further handler group.
    #[error("Handler stopped dispatch")]
    StopPropagation,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DbotError {
    pub fn telegram(&self) -> Option<&TelegramError> {
        match self {
            Self::Telegram(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::StopPropagation)
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Callback failed: {0}")]
    Failed(String),

    #[error("Callback panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, DbotError>;

/// Result of a Bot API call.
pub type ApiResult<T> = std::result::Result<T, TelegramError>;
