//! Centralized error types for mailmirror.

use std::path::PathBuf;
use thiserror::Error;

use crate::remote::RemoteError;

/// All errors produced by the mailmirror library.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A JSON artifact could not be read or written.
    #[error("JSON error on '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The prebuilt index is missing. Run indexing first.
    #[error("Index not found: {0}")]
    IndexMissing(PathBuf),

    /// The prebuilt index exists but cannot be used.
    #[error("Invalid index '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// No hash-prefix length separates every id in a scope.
    #[error("Unable to build unique shortcodes for {count} id(s) in scope '{scope}'")]
    ShortcodeExhausted { scope: String, count: usize },

    /// Credentials for the remote API are missing or unreadable.
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    /// A remote call failed terminally.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An item attachment nests deeper than the configured limit.
    #[error("Item nesting exceeds depth {0}")]
    NestingTooDeep(usize),

    /// A nested message is already being exported further up the chain.
    #[error("Message '{0}' is already on the export chain")]
    ItemCycle(String),

    /// Nothing to store: no inline payload and no way to fetch one.
    #[error("Attachment '{0}' has no retrievable content")]
    MissingPayload(String),
}

/// Convenience alias for `Result<T, MirrorError>`.
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Json` variant from a path and a `serde_json::Error`.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run rather than a single
    /// message or attachment.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::IndexMissing(_)
            | Self::InvalidIndex { .. }
            | Self::ShortcodeExhausted { .. }
            | Self::Credentials(_) => true,
            Self::Remote(e) => e.is_fatal(),
            Self::Io { .. }
            | Self::Json { .. }
            | Self::NestingTooDeep(_)
            | Self::ItemCycle(_)
            | Self::MissingPayload(_) => false,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `MirrorError`
/// when no path context is available (rare, prefer `MirrorError::io`).
impl From<std::io::Error> for MirrorError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
