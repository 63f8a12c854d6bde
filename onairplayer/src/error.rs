//! Error types for the radio player
//!
//! Two families live here:
//!
//! - [`Error`] for fallible library calls (HTTP, JSON, configuration). These
//!   are returned to the caller and logged, and never reach the player view.
//! - [`TransportError`] / [`ErrorKind`] for classified playback failures.
//!   These are state: they end up in `PlaybackState::last_error` so every
//!   surface can render them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the player library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The endpoint answered with a non-success status
    #[error("API error: {0}")]
    ApiError(String),

    /// A segmented-stream playlist could not be understood
    #[error("Playlist error: {0}")]
    Playlist(String),

    /// No tokio runtime is available to drive background work
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// Configuration error (from onairconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an API error
    pub fn api_error(msg: impl Into<String>) -> Self {
        Self::ApiError(msg.into())
    }

    /// Create a playlist error
    pub fn playlist(msg: impl Into<String>) -> Self {
        Self::Playlist(msg.into())
    }
}

// ============================================================================
// Playback error classification
// ============================================================================

/// Media error code: the fetch was aborted by the user agent
pub const MEDIA_ERR_ABORTED: u16 = 1;
/// Media error code: a network error interrupted the fetch
pub const MEDIA_ERR_NETWORK: u16 = 2;
/// Media error code: the resource could not be decoded
pub const MEDIA_ERR_DECODE: u16 = 3;
/// Media error code: the resource format is not supported
pub const MEDIA_ERR_SRC_NOT_SUPPORTED: u16 = 4;

/// Classified kind of a playback failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NetworkError,
    DecodeError,
    FormatUnsupported,
    Aborted,
    Unknown,
    /// Fatal error reported by the segmented-streaming engine
    SegmentedStreamFatal,
}

/// Code → kind table for the codes an audio resource can report.
const MEDIA_ERROR_TABLE: [(u16, ErrorKind, &str); 4] = [
    (
        MEDIA_ERR_ABORTED,
        ErrorKind::Aborted,
        "Playback was aborted",
    ),
    (
        MEDIA_ERR_NETWORK,
        ErrorKind::NetworkError,
        "Network error: the stream could not be reached",
    ),
    (
        MEDIA_ERR_DECODE,
        ErrorKind::DecodeError,
        "The stream could not be decoded",
    ),
    (
        MEDIA_ERR_SRC_NOT_SUPPORTED,
        ErrorKind::FormatUnsupported,
        "This stream format is not supported",
    ),
];

impl ErrorKind {
    /// Map a raw media error code to its kind. Unlisted codes are `Unknown`.
    pub fn from_media_code(code: u16) -> Self {
        MEDIA_ERROR_TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Short human-readable message for this kind
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "An unknown playback error occurred",
            ErrorKind::SegmentedStreamFatal => "The live stream failed to load",
            kind => MEDIA_ERROR_TABLE
                .iter()
                .find(|(_, k, _)| k == kind)
                .map(|(_, _, msg)| *msg)
                .unwrap_or("An unknown playback error occurred"),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NetworkError => "network error",
            ErrorKind::DecodeError => "decode error",
            ErrorKind::FormatUnsupported => "format unsupported",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Unknown => "unknown error",
            ErrorKind::SegmentedStreamFatal => "segmented stream fatal error",
        };
        f.write_str(name)
    }
}

/// A classified playback failure, as shown to the listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a raw media error code
    pub fn from_media_code(code: u16) -> Self {
        let kind = ErrorKind::from_media_code(code);
        let message = match kind {
            ErrorKind::Unknown => format!("{} (code {})", kind.default_message(), code),
            _ => kind.default_message().to_string(),
        };
        Self { kind, message }
    }

    /// Fatal failure of the segmented-streaming engine
    pub fn segmented_fatal(details: &str) -> Self {
        Self {
            kind: ErrorKind::SegmentedStreamFatal,
            message: format!(
                "{} ({})",
                ErrorKind::SegmentedStreamFatal.default_message(),
                details
            ),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
