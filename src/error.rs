// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

//! The error type shared by the whole crate.

use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while preparing or running a ray-tracing
/// campaign. None of these are retried: the caller is expected to abort the
/// current worker.
#[derive(Debug,thiserror::Error)]
pub enum Error {
    /// Bad settings, identifiers, or API misuse (e.g. adding a lens after
    /// the sequence has been reordered).
    #[error("configuration error: {0}")]
    Config(String),

    /// A logic bug: some internal ordering guarantee did not hold.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A plane file, manifest or catalog exists but cannot be understood.
    #[error("malformed data in {path:?}: {reason}")]
    MalformedData {
        /// The offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// An I/O failure, tagged with the path being accessed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Another worker failed, so a synchronization point was abandoned.
    #[error("aborted because another worker failed")]
    Aborted,

    /// A settings file could not be parsed.
    #[error("failed to parse settings {path:?}: {source}")]
    Settings {
        /// The settings file.
        path: PathBuf,
        /// The TOML error.
        #[source]
        source: toml::de::Error,
    },
}

impl Error {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn invariant<S: Into<String>>(msg: S) -> Self {
        Error::Invariant(msg.into())
    }

    pub(crate) fn malformed<P: AsRef<Path>, S: Into<String>>(path: P, reason: S) -> Self {
        Error::MalformedData { path: path.as_ref().to_path_buf(), reason: reason.into() }
    }

    pub(crate) fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        Error::Io { path: path.as_ref().to_path_buf(), source: source }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_config() {
        let err = Error::config("too many '|' in a|b|c");
        assert_eq!(err.to_string(), "configuration error: too many '|' in a|b|c");
    }

    #[test]
    fn display_malformed_names_file() {
        let err = Error::malformed("planes/info.txt", "line 3: missing redshift");
        let msg = err.to_string();
        assert!(msg.contains("info.txt"));
        assert!(msg.contains("line 3"));
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as StdError;
        let err = Error::io("nope.fits", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
    }
}
