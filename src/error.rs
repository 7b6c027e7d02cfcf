// error.rs - Error kinds surfaced by readers and the directory

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Failures raised by [`crate::CacheDirectory`] and its readers.
///
/// `AlreadyClosed` doubles as the transient "cache handle was invalidated"
/// condition raised by the cache layer; the reader catches that shape
/// internally and recovers by reading around the cache, so callers only ever
/// observe it for operations on a reader they closed themselves.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("seeking to negative position [{position}]")]
    InvalidSeek { position: i64 },

    #[error("reading past end of file [position={position}, length={length}]")]
    EndOfFile { position: u64, length: u64 },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    AlreadyClosed(String),

    #[error("failed to read data from cache")]
    ReadFailure {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl CacheError {
    /// Wrap any lower-level failure as a fatal read failure, preserving the
    /// cause chain.
    pub fn read_failure(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        CacheError::ReadFailure {
            source: source.into(),
        }
    }

    /// Whether this failure means the cache handle was invalidated (evicted)
    /// while an operation was in flight, either directly or anywhere in the
    /// cause chain. Only this narrow signature may be recovered by falling
    /// back to a direct remote read; anything else is fatal.
    pub fn is_handle_invalidated(&self) -> bool {
        if matches!(self, CacheError::AlreadyClosed(_)) {
            return true;
        }
        let mut cause = self.source();
        while let Some(err) = cause {
            if matches!(
                err.downcast_ref::<CacheError>(),
                Some(CacheError::AlreadyClosed(_))
            ) {
                return true;
            }
            cause = err.source();
        }
        false
    }
}

impl From<CacheError> for io::Error {
    fn from(err: CacheError) -> Self {
        io::Error::new(io::ErrorKind::Other, err)
    }
}
