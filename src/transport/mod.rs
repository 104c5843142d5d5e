//! Transport layer for I/O abstraction
//!
//! The adaptor splits the serial line into an exclusive read side (line
//! reader) and an exclusive write side (writer serializer); `try_clone_box`
//! provides the second handle. Both handles reach the same underlying
//! device.

use crate::error::Result;
use std::time::Duration;

mod serial;
pub use serial::SerialTransport;

mod mock;
pub use mock::MockTransport;

/// Transport trait for HAT communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read.
    ///
    /// A read deadline expiring is not an error: implementations return
    /// `Ok(0)` so polling loops can retry.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes
    fn flush(&mut self) -> Result<()>;

    /// Set the read deadline (5 s during bootstrap, 1 s thereafter)
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Clone a second handle to the same device for the write side
    fn try_clone_box(&self) -> Result<Box<dyn Transport>>;
}

/// Write all of `data`, retrying partial writes.
pub(crate) fn write_all(transport: &mut dyn Transport, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = transport.write(data)?;
        data = &data[n..];
    }
    Ok(())
}
