//! Mock transport for testing
//!
//! Cloning shares the underlying buffers, which mirrors how the serial
//! transport hands out a second handle to the same device: tests keep one
//! clone to inject HAT replies and inspect written commands while the
//! adaptor's reader and writer threads own the others.

use super::Transport;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock transport for unit and integration testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    read_timeout: Duration,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                read_timeout: crate::config::BOOTSTRAP_READ_TIMEOUT,
            })),
        }
    }

    /// Inject data to be read (a reply from the simulated HAT)
    pub fn inject_read(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.read_buffer.extend(data);
    }

    /// Inject a full reply line, newline-terminated
    pub fn inject_line(&self, line: &str) {
        self.inject_read(line.as_bytes());
        self.inject_read(b"\n");
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        inner.write_buffer.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_buffer.clear();
    }

    /// The read timeout most recently configured by the driver
    pub fn read_timeout(&self) -> Duration {
        self.inner.lock().unwrap().read_timeout
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let available = inner.read_buffer.len().min(buffer.len());

        for item in buffer.iter_mut().take(available) {
            *item = inner.read_buffer.pop_front().unwrap();
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.write_buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.inner.lock().unwrap().read_timeout = timeout;
        Ok(())
    }

    fn try_clone_box(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
