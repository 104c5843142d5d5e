//! Writer serializer thread: the only writer on the serial line
//!
//! Drivers on any port enqueue ready-made command bytes; this loop emits
//! them in arrival order, uninterpreted. Channel FIFO gives per-port program
//! order, and the single consumer guarantees no two producers ever interleave
//! bytes on the wire.

use crate::transport::{write_all, Transport};
use crossbeam_channel::Receiver;
use log::{debug, error, trace};

/// A unit of work for the writer serializer.
pub(crate) enum WriteRequest {
    /// Raw command bytes, `\r` already included.
    Command(Vec<u8>),
    /// Drain whatever is already queued, then stop.
    Shutdown,
}

/// Writer loop - owns the write side of the serial line.
pub(crate) fn writer_loop(mut transport: Box<dyn Transport>, requests: Receiver<WriteRequest>) {
    for request in requests.iter() {
        match request {
            WriteRequest::Command(bytes) => {
                emit(&mut *transport, &bytes);
            }
            WriteRequest::Shutdown => {
                // Drain commands that beat the shutdown signal into the queue.
                while let Ok(WriteRequest::Command(bytes)) = requests.try_recv() {
                    emit(&mut *transport, &bytes);
                }
                break;
            }
        }
    }

    let _ = transport.flush();
    debug!("writer thread exiting");
}

fn emit(transport: &mut dyn Transport, bytes: &[u8]) {
    trace!("> {:?}", String::from_utf8_lossy(bytes));
    if let Err(e) = write_all(transport, bytes).and_then(|_| transport.flush()) {
        error!("serial write failed: {}", e);
    }
}
