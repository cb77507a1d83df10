//! Ergonomic error context helpers.
//!
//! Provides extension traits for converting IO errors raised by name
//! lookups into `NetError` codes, logging the original error on the way.

use crate::base::neterror::NetError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Convert a failed lookup for `host` into a resolution error.
    ///
    /// # Example
    /// ```ignore
    /// use hostresolver::base::context::IoResultExt;
    ///
    /// let addrs = ("example.com", 0).to_socket_addrs()
    ///     .dns_context("example.com")?;
    /// ```
    fn dns_context(self, host: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn dns_context(self, host: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            let mapped = lookup_error(&e);
            tracing::debug!(host = %host, error = %e, code = mapped.as_i32(), "lookup failed");
            mapped
        })
    }
}

/// Map an IO error from a lookup to the closest resolution error.
pub fn lookup_error(error: &io::Error) -> NetError {
    match error.kind() {
        io::ErrorKind::TimedOut => NetError::DnsTimedOut,
        io::ErrorKind::InvalidInput => NetError::InvalidArgument,
        io::ErrorKind::Interrupted => NetError::Aborted,
        _ => NetError::NameNotResolved,
    }
}

/// Raw OS error code carried by `error`, or 0.
pub fn os_error_code(error: &io::Error) -> i32 {
    error.raw_os_error().unwrap_or(0)
}
