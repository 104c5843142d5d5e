//! buildhat-io - host-side driver for the Raspberry Pi Build HAT
//!
//! The Build HAT bridges a Linux host to LEGO Powered-Up devices (motors,
//! lights, sensors) on four ports, A-D, over a single 115200-baud serial
//! line. This crate provides:
//!
//! - **Bootstrap**: detects a factory-fresh or stale HAT and flashes the
//!   embedded firmware image (checksum + signature framing) before anything
//!   else happens.
//! - **Multiplexing**: one reader, one dispatcher, and one writer thread
//!   turn the shared serial line into per-port command queues and
//!   per-`(port, kind)` event subscriptions.
//! - **Drivers**: motors (ramps, pulses, state readback), lights
//!   (on/off/blink), and a power monitor (`vin` polling, low-voltage and
//!   fault events).
//!
//! See [`BuildHat`] for the lifecycle. Everything here is plain threads and
//! channels; no async runtime.

pub mod config;
pub mod drivers;
pub mod error;
pub mod firmware;
pub mod gpio;
pub mod ports;
pub mod protocol;
pub mod transport;

mod bootstrap;
mod hat;

pub use bootstrap::HatState;
pub use config::HatConfig;
pub use drivers::{LightDriver, MotorDriver, MotorState, PowerEvent, PowerMonitor, RotationMethod};
pub use error::{Error, Result};
pub use gpio::DigitalOutput;
pub use hat::{BuildHat, EventWaiter, PersistentSubscription, PortHandle, Subscriptions};
pub use ports::{DeviceClass, DeviceType, PortId};
pub use protocol::{DeviceEvent, EventKind, EventPayload};
pub use transport::{MockTransport, SerialTransport, Transport};
