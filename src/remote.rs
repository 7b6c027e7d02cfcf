// remote.rs - Remote byte source abstraction

use std::io::{self, Read};

/// Sequential byte access to remotely stored blobs.
///
/// Implementations are expected to yield exactly `length` bytes from the
/// returned stream or fail; short streams surface as read failures in the
/// caller. This layer never caches or retries on its own.
pub trait RemoteSource: Send + Sync {
    /// Open a sequential stream over `[start, start + length)` of the blob
    /// named `physical_name`.
    fn open_stream(
        &self,
        physical_name: &str,
        start: u64,
        length: u64,
    ) -> io::Result<Box<dyn Read + Send>>;
}
