//! Line reader thread: raw serial bytes to newline-delimited text

use crate::protocol::lines::LineBuffer;
use crate::transport::Transport;
use crossbeam_channel::Sender;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Reader loop - owns the read side of the serial line.
///
/// Splits the byte stream into trimmed, non-empty lines and forwards them to
/// the dispatcher. Read timeouts are routine (the transport returns 0 bytes)
/// and just mean another poll of the shutdown flag. Exits when the shutdown
/// flag is set, the dispatcher goes away, or the transport errors out
/// underneath us (port closed during finalize).
pub(crate) fn reader_loop(
    mut transport: Box<dyn Transport>,
    lines_tx: Sender<String>,
    shutdown: Arc<AtomicBool>,
) {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 256];

    while !shutdown.load(Ordering::Relaxed) {
        match transport.read(&mut chunk) {
            Ok(0) => {
                // Nothing within the read deadline; the serial transport has
                // already blocked for it, the mock returns immediately.
                thread::sleep(Duration::from_millis(2));
            }
            Ok(n) => {
                buffer.push(&chunk[..n]);
                while let Some(line) = buffer.next_line() {
                    if lines_tx.send(line).is_err() {
                        debug!("reader exiting: dispatcher gone");
                        return;
                    }
                }
            }
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                warn!("serial read error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    debug!("reader thread exiting");
}
