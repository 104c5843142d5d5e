//! GPIO output seam for the HAT reset lines
//!
//! The driver needs exactly two write-only lines: "reset" and "bootzero".
//! How those pins are driven (rppal, sysfs, a remote GPIO expander) is the
//! host's business, so the driver only sees this trait.

use crate::error::Result;

/// A single write-only digital output line.
pub trait DigitalOutput: Send {
    /// Drive the line: `true` = high, `false` = low.
    fn write(&mut self, high: bool) -> Result<()>;
}
