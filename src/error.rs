//! Crate error taxonomy
//!
//! Every failure in the cache core falls into one of four categories that
//! callers map to user-facing behavior:
//! - `NotRetrievable`: the origin file does not exist (missing local path,
//!   4xx from a remote). Mapped to a 404 by the web tier, never retried.
//! - `Transient`: network timeout, 5xx, disk I/O failure. Safe to retry;
//!   the job scheduler retries generation, interactive reads fail fast.
//! - `Corrupt`: a tile archive that cannot be extracted. Reads treat this
//!   like `NotRetrievable`; generation leaves the source untiled so a
//!   fresh attempt can be scheduled.
//! - `Config`: invalid configuration, reported at construction time.
//!
//! An eviction sweep that cannot meet the budget is *not* an error: the
//! budget is advisory and the sweep logs a capacity warning instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not retrievable: {0}")]
    NotRetrievable(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Corrupt archive: {0}")]
    Corrupt(String),
}

impl Error {
    /// Whether a retry of the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Whether the caller should answer with a not-found response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotRetrievable(_) | Error::Corrupt(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotRetrievable(err.to_string()),
            _ => Error::Transient(format!("I/O error: {}", err)),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.is_client_error() {
                return Error::NotRetrievable(format!("HTTP {}", status));
            }
        }
        // Timeouts, connection failures and 5xx are all retryable
        Error::Transient(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => io.into(),
            other => Error::Corrupt(other.to_string()),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            other => Error::Corrupt(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Transient(format!("Background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_implements_error_trait() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<Error>();
    }

    #[test]
    fn test_io_not_found_maps_to_not_retrievable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_other_io_errors_are_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_corrupt_archive_is_not_found_for_readers() {
        let err = Error::Corrupt("bad central directory".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_zip_error_maps_to_corrupt() {
        let err: Error = zip::result::ZipError::InvalidArchive("truncated").into();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_display_contains_category() {
        let err = Error::NotRetrievable("gone".to_string());
        assert!(format!("{}", err).contains("not retrievable"));
    }
}
