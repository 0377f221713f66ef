use std::fmt;
use std::sync::Arc;

/// Errors raised while constructing or hosting the player core.
///
/// Conditions that the loaders absorb or surface through their event queues
/// are described by [`ErrorRecord`] instead.
#[derive(Debug, thiserror::Error, Clone)]
pub enum PlayerError {
    #[error("A non-empty playlist URL is required")]
    PlaylistUrlMissing,
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Playlist parse error: {0}")]
    Parse(String),
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Operation cancelled")]
    Cancelled,
}

// Manual implementations because of the Arc wrapping.
impl From<reqwest::Error> for PlayerError {
    fn from(err: reqwest::Error) -> Self {
        PlayerError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::Io {
            source: Arc::new(err),
        }
    }
}

impl PlayerError {
    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PlaylistUrlMissing => ErrorKind::PlaylistUrlMissing,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Cancelled => ErrorKind::Aborted,
            Self::InvalidUrl { .. } | Self::Network { .. } | Self::Io { .. } | Self::Config(_) => {
                ErrorKind::Network
            }
        }
    }
}

/// Classification of every failure the core can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport-level failure that is neither a timeout nor an abort.
    Network,
    /// Request timed out. Recoverable, never surfaced as an error.
    Timeout,
    /// Operator-initiated cancellation. Not an error.
    Aborted,
    /// Key response was not exactly 16 bytes.
    InvalidKey,
    /// Playlist text failed to parse.
    Parse,
    /// Loader constructed without a playlist URL.
    PlaylistUrlMissing,
}

impl ErrorKind {
    /// Whether this kind is absorbed locally instead of being surfaced.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Aborted)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Aborted => "aborted",
            ErrorKind::InvalidKey => "invalid-key",
            ErrorKind::Parse => "parse",
            ErrorKind::PlaylistUrlMissing => "playlist-url-missing",
        };
        f.write_str(name)
    }
}

/// Structured error carried by the loaders' error signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub status: Option<u16>,
    pub message: String,
    pub kind: ErrorKind,
    pub response_text: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
            response_text: None,
        }
    }

    pub fn with_response_text(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    /// `true` when the server answered with a 5xx status.
    pub fn is_server_error(&self) -> bool {
        self.status.is_some_and(|status| status >= 500)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{}] {} (HTTP {status})", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}
