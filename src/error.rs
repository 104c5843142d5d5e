//! Error types for the Build HAT driver
//!
//! # Error Recovery Strategies
//!
//! Different error kinds call for different handling:
//!
//! ## Fatal (abort program start)
//!
//! - **`Bootstrap`**: the version handshake did not converge, the firmware
//!   upload did not see the expected bootloader prompt, or port init never
//!   completed. The HAT is in an unknown state; power-cycle and retry.
//! - **`Serial` / `Io` during bootstrap**: the serial line itself failed.
//!
//! ## Returned to the caller
//!
//! - **`Timeout`**: an awaited port event did not arrive before its deadline.
//!   The subscription has already been removed; the command may still take
//!   effect on the HAT.
//! - **`InvalidArgument`**: speed/angle/plimit/bias/pwm out of range.
//!   Raised before anything is written to the wire.
//!
//! ## Logged and skipped
//!
//! - **`Protocol`**: a line from the HAT did not match any known shape.
//!   The dispatcher logs and drops it; the stream stays usable.
//!
//! ## Shutdown races
//!
//! - **`ChannelClosed`**: a command or event channel was closed underneath an
//!   operation, which happens when the adaptor is finalized while drivers are
//!   still running. Treat as a request to stop.

use thiserror::Error;

/// Errors that can occur in the Build HAT driver
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
