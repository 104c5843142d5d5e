//! Light driver
//!
//! Lights are passive devices driven by raw power: full `plimit`, then a
//! negative `set` level (the polarity the hardware expects). Blinking runs
//! on its own thread so callers can keep working; the returned channel
//! fires once when the pattern completes.

use crate::drivers::{wait_for_connect, HALT_DRAIN};
use crate::error::{Error, Result};
use crate::hat::{BuildHat, PortHandle};
use crate::ports::{DeviceClass, DeviceType, PortId};
use crate::protocol::commands;
use crossbeam_channel::{bounded, Receiver};
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// Driver for a light on one port.
pub struct LightDriver {
    port: PortId,
    handle: Option<PortHandle>,
    level: f64,
}

impl LightDriver {
    /// Register a light on `port` at full power. Call before
    /// `BuildHat::connect`.
    pub fn new(hat: &BuildHat, port: PortId) -> Self {
        let handle = hat.register(port, DeviceClass::Light);
        LightDriver {
            port,
            handle: Some(handle),
            level: 1.0,
        }
    }

    /// Power level used by `turn_on` and `blink`, in [0, 1].
    pub fn set_level(&mut self, level: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(Error::InvalidArgument(format!(
                "level should be between 0 and 1 but was {:.2}",
                level
            )));
        }
        self.level = level;
        Ok(())
    }

    /// Wait for the light to report connected.
    pub fn start(&mut self) -> Result<()> {
        let handle = self.handle()?.clone();
        wait_for_connect(&handle, self.port)?;
        Ok(())
    }

    pub fn turn_on(&self) -> Result<()> {
        let handle = self.handle()?;
        handle.send(commands::light_on(self.port, self.level))
    }

    pub fn turn_off(&self) -> Result<()> {
        let handle = self.handle()?;
        handle.send(commands::light_off(self.port))
    }

    /// Blink for `duration`, toggling every half `interval`.
    ///
    /// Runs ceil(duration / interval) on/off cycles on a background thread.
    /// The returned channel receives one message when the pattern is done.
    pub fn blink(&self, interval: Duration, duration: Duration) -> Result<Receiver<()>> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument(
                "blink interval must be non-zero".to_string(),
            ));
        }

        let handle = self.handle()?.clone();
        let port = self.port;
        let level = self.level;

        let mut cycles = duration.as_nanos() / interval.as_nanos();
        if duration.as_nanos() % interval.as_nanos() > 0 {
            cycles += 1;
        }

        let (done_tx, done_rx) = bounded(1);
        thread::Builder::new()
            .name(format!("light-blink-{}", port))
            .spawn(move || {
                for _ in 0..cycles {
                    if let Err(e) = handle.send(commands::light_on(port, level)) {
                        warn!("blink stopped: {}", e);
                        return;
                    }
                    thread::sleep(interval / 2);
                    if let Err(e) = handle.send(commands::light_off(port)) {
                        warn!("blink stopped: {}", e);
                        return;
                    }
                    thread::sleep(interval / 2);
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::ChannelClosed(format!("failed to spawn blink thread: {}", e)))?;

        Ok(done_rx)
    }

    /// Device type code the HAT reported, once connected.
    pub fn device_type(&self) -> Option<DeviceType> {
        self.handle.as_ref().and_then(|h| h.device_type())
    }

    /// Turn the light off, release the port, and give the writer a moment
    /// to drain.
    pub fn halt(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            info!("Halting {} on port {}", handle.class(), self.port);
            handle.send(commands::light_off(self.port))?;
        }
        thread::sleep(HALT_DRAIN);
        Ok(())
    }

    fn handle(&self) -> Result<&PortHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::ChannelClosed("light driver halted".to_string()))
    }
}
