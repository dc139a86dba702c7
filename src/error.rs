//! Error types for the coordination engine.
//!
//! Load errors are fatal to the torrent that raised them; everything else is
//! local to a collaborator and resolves to an event or a reply callback.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the torrent engine
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Bencode decoding failed
    #[error("bencode error: {message}")]
    Bencode { message: String },

    /// The metainfo descriptor is structurally invalid
    #[error("invalid metainfo: {message}")]
    Metainfo { message: String },

    /// Filesystem errors raised by the file set
    #[error("storage error at {path:?}: {message}")]
    Storage {
        kind: StorageErrorKind,
        path: PathBuf,
        message: String,
    },

    /// Tracker announce failed
    #[error("tracker error: {message}")]
    Tracker { message: String },

    /// A peer violated the exchange contract
    #[error("peer error: {message}")]
    Peer { message: String },
}

/// Storage error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// File or directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// Path escapes the download directory
    PathTraversal,
    /// Read or write outside the payload range
    OutOfRange,
    /// Other I/O failure
    Io,
}

impl Error {
    /// Create a bencode error
    pub fn bencode(message: impl Into<String>) -> Self {
        Self::Bencode {
            message: message.into(),
        }
    }

    /// Create a metainfo error
    pub fn metainfo(message: impl Into<String>) -> Self {
        Self::Metainfo {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        kind: StorageErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a tracker error
    pub fn tracker(message: impl Into<String>) -> Self {
        Self::Tracker {
            message: message.into(),
        }
    }

    /// Create a peer error
    pub fn peer(message: impl Into<String>) -> Self {
        Self::Peer {
            message: message.into(),
        }
    }

    /// True for errors that abort the torrent load
    pub fn is_fatal_load_error(&self) -> bool {
        matches!(
            self,
            Self::Bencode { .. } | Self::Metainfo { .. } | Self::Storage { .. }
        )
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        Self::Storage {
            kind,
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Tracker {
            message: err.to_string(),
        }
    }
}
