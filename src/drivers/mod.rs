//! Device drivers built on top of the adaptor
//!
//! Each driver owns one or more [`PortHandle`]s and follows the same
//! lifecycle: construct (registers the port), `start` (waits for the device
//! to report connected), operate, `halt` (sends its off command and drops
//! the handle).

pub mod light;
pub mod motor;
pub mod power;

pub use light::LightDriver;
pub use motor::{MotorDriver, MotorState, RotationMethod};
pub use power::{PowerEvent, PowerMonitor};

use crate::error::Result;
use crate::hat::PortHandle;
use crate::ports::PortId;
use crate::protocol::{commands, DeviceEvent, EventKind};
use log::info;
use std::time::Duration;

/// How long `start` waits for a device to report connected.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Drain time granted to the writer before a halted driver returns.
pub(crate) const HALT_DRAIN: Duration = Duration::from_millis(10);

/// Select the port, silence echo, and wait for the device to announce
/// itself in the `list` reply.
pub(crate) fn wait_for_connect(handle: &PortHandle, port: PortId) -> Result<DeviceEvent> {
    let waiter = handle.subscribe_once(EventKind::Connected);
    handle.send(commands::select_echo_off(port))?;
    handle.send(commands::list())?;

    info!("Waiting for {} to connect on port {}", handle.class(), port);
    let event = waiter.wait(CONNECT_TIMEOUT)?;
    info!("{} connected on port {}", handle.class(), port);
    Ok(event)
}
