//! Unified error type for the daemon and its RPC surface.
//!
//! Mirrors the shape of a conventional FUSE-adjacent error enum (one
//! `thiserror` enum, one "render to wire form" method) but renders to the
//! string error tokens the RPC protocol uses instead of libc errno, since
//! clients here are local JSON-speaking processes, not the kernel.

use thiserror::Error;

/// Unified error type for torrentfs operations.
#[derive(Error, Debug, Clone)]
pub enum TorrentFsError {
    /// No `torrent` field was supplied where one is required.
    #[error("torrent field is required")]
    TorrentRequired,

    /// The `torrent` token did not resolve to any loaded torrent.
    #[error("torrent not found: {0}")]
    TorrentNotFound(String),

    /// The `torrent` token named more than one loaded torrent.
    #[error("torrent name is ambiguous: {0}")]
    TorrentNameAmbiguous(String),

    /// `read`'s `size` argument was zero or exceeded the maximum.
    #[error("read size invalid")]
    ReadSizeInvalid,

    /// The request named a command this daemon does not implement.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The request envelope was missing a required field or malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// `path` did not resolve to any entry.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// `path` resolved to a file where a directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// `path` resolved to a directory where a file was required.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// `path` contained `..`, was absolute, or otherwise escaped the torrent root.
    #[error("path is unsafe: {0}")]
    PathUnsafe(String),

    /// `async`/non-wait read mode had nothing available to return.
    #[error("would block")]
    WouldBlock,

    /// A `read` did not complete within its deadline.
    #[error("timed out")]
    Timeout,

    /// The outstanding read was cancelled (client disconnect, or explicit cancel).
    #[error("cancelled")]
    Cancelled,

    /// The underlying session reported a fatal error for this torrent.
    #[error("torrent error: {0}")]
    TorrentError(String),

    /// A filesystem operation on the cache root failed.
    #[error("io error: {0}")]
    IoError(String),
}

impl TorrentFsError {
    /// Render this error to the wire token used in RPC `error` fields (spec.md §7).
    pub fn to_token(&self) -> String {
        match self {
            TorrentFsError::TorrentRequired => "TorrentRequired".to_string(),
            TorrentFsError::TorrentNotFound(tok) => format!("TorrentNotFound:{tok}"),
            TorrentFsError::TorrentNameAmbiguous(name) => format!("TorrentNameAmbiguous:{name}"),
            TorrentFsError::ReadSizeInvalid => "ReadSizeInvalid".to_string(),
            TorrentFsError::UnknownCommand(_) => "UnknownCommand".to_string(),
            TorrentFsError::BadRequest(_) => "BadRequest".to_string(),
            TorrentFsError::FileNotFound(_) => "FileNotFound".to_string(),
            TorrentFsError::NotADirectory(_) => "NotADirectory".to_string(),
            TorrentFsError::IsADirectory(_) => "IsADirectory".to_string(),
            TorrentFsError::PathUnsafe(_) => "PathUnsafe".to_string(),
            TorrentFsError::WouldBlock => "WouldBlock".to_string(),
            TorrentFsError::Timeout => "Timeout".to_string(),
            TorrentFsError::Cancelled => "Cancelled".to_string(),
            TorrentFsError::TorrentError(msg) => format!("TorrentError:{msg}"),
            TorrentFsError::IoError(msg) => format!("IOError:{msg}"),
        }
    }
}

impl From<std::io::Error> for TorrentFsError {
    fn from(err: std::io::Error) -> Self {
        TorrentFsError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for TorrentFsError {
    fn from(err: serde_json::Error) -> Self {
        TorrentFsError::BadRequest(err.to_string())
    }
}

/// Result type alias for operations that can fail with [`TorrentFsError`].
pub type Result<T> = std::result::Result<T, TorrentFsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_simple_tokens() {
        assert_eq!(TorrentFsError::TorrentRequired.to_token(), "TorrentRequired");
        assert_eq!(TorrentFsError::ReadSizeInvalid.to_token(), "ReadSizeInvalid");
        assert_eq!(TorrentFsError::WouldBlock.to_token(), "WouldBlock");
    }

    #[test]
    fn renders_parameterized_tokens() {
        assert_eq!(
            TorrentFsError::TorrentNotFound("abc123".into()).to_token(),
            "TorrentNotFound:abc123"
        );
        assert_eq!(
            TorrentFsError::TorrentNameAmbiguous("movie".into()).to_token(),
            "TorrentNameAmbiguous:movie"
        );
        assert_eq!(
            TorrentFsError::TorrentError("disk full".into()).to_token(),
            "TorrentError:disk full"
        );
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: TorrentFsError = io_err.into();
        assert!(matches!(err, TorrentFsError::IoError(_)));
    }
}
