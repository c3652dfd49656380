//! Error types for the broadcast core

use std::path::PathBuf;

/// Result type alias for broadcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Per-track failures
///
/// These never leave the pacer: a failing track is logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The playlist entry does not exist on disk
    #[error("Track not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The decoder rejected the file
    #[error("Cannot decode {}: {reason}", .path.display())]
    DecodeFailed { path: PathBuf, reason: String },

    /// Open or read failure other than a missing file
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Read attempted on a source that already ended, failed or was closed
    #[error("Track source is closed: {}", .0.display())]
    Closed(PathBuf),
}

impl TrackError {
    pub fn decode_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DecodeFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Maps an open/read error, keeping `NotFound` distinct
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

/// Playlist loading failures
#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    /// The playlist file cannot be read
    #[error("Cannot read playlist {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The playlist holds no playable entry
    #[error("Playlist {} is empty", .0.display())]
    Empty(PathBuf),
}

/// Errors that can stop the broadcast at startup
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Playlist missing, unreadable or empty
    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    /// Invalid option value
    #[error("Invalid configuration: {0}")]
    InvalidOption(String),

    /// Listening socket cannot be opened
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid_option(msg: impl Into<String>) -> Self {
        Self::InvalidOption(msg.into())
    }
}
