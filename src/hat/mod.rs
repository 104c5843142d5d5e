//! The Build HAT adaptor
//!
//! `BuildHat` owns the serial line and the three long-lived threads that
//! multiplex it:
//!
//! 1. **reader** - owns the read side, splits bytes into lines
//! 2. **dispatcher** - classifies lines, routes events to subscriptions
//! 3. **writer** - owns the write side, drains the shared command queue
//!
//! # Lifecycle
//!
//! ```no_run
//! use buildhat_io::{BuildHat, HatConfig, MotorDriver, PortId};
//! # use buildhat_io::{DigitalOutput, Result};
//! # fn pins() -> (Box<dyn DigitalOutput>, Box<dyn DigitalOutput>) { unimplemented!() }
//! # fn main() -> Result<()> {
//! let (reset, boot) = pins();
//! let mut hat = BuildHat::open(HatConfig::default(), reset, boot)?;
//! let mut motor = MotorDriver::new(&hat, PortId::A);
//! hat.connect()?;      // bootstrap happens here, exactly once
//! motor.start()?;      // waits for the motor to report connected
//! motor.run_for_rotations(2.0, Some(50))?;
//! motor.halt()?;
//! hat.finalize()?;
//! # Ok(())
//! # }
//! ```
//!
//! Drivers register their ports **before** `connect`; the registry is
//! read-only afterwards. Exactly one bootstrap completes before any driver
//! command reaches the wire, because the writer thread only starts once
//! bootstrap is done.

mod dispatcher;
mod handle;
mod reader;
mod writer;

pub use dispatcher::{EventWaiter, PersistentSubscription, Subscriptions};
pub use handle::PortHandle;

use crate::bootstrap::{self, HatState};
use crate::config::{HatConfig, RUNTIME_READ_TIMEOUT};
use crate::error::{Error, Result};
use crate::gpio::DigitalOutput;
use crate::ports::{DeviceClass, DeviceType, PortId};
use crate::protocol::commands;
use crate::transport::{SerialTransport, Transport};
use crossbeam_channel::{bounded, Sender};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use writer::WriteRequest;

/// Capacity of the line channel between reader and dispatcher.
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the shared command queue into the writer.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Connection to a Build HAT.
pub struct BuildHat {
    config: HatConfig,
    // Consumed by connect(): the transport splits into the reader and
    // writer halves, the pins are only needed for the firmware reset.
    transport: Option<Box<dyn Transport>>,
    reset_pin: Option<Box<dyn DigitalOutput>>,
    boot_pin: Option<Box<dyn DigitalOutput>>,
    commands_rx: Option<crossbeam_channel::Receiver<WriteRequest>>,

    commands_tx: Sender<WriteRequest>,
    subscriptions: Subscriptions,
    detected: Arc<RwLock<HashMap<PortId, DeviceType>>>,
    registry: Mutex<HashMap<Option<PortId>, DeviceClass>>,
    state: Option<HatState>,

    shutdown: Arc<AtomicBool>,
    reader_handle: Option<JoinHandle<()>>,
    dispatcher_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
}

impl BuildHat {
    /// Open the configured serial device.
    ///
    /// The reset and bootzero pins are only driven if the HAT needs a
    /// firmware flash.
    pub fn open(
        config: HatConfig,
        reset_pin: Box<dyn DigitalOutput>,
        boot_pin: Box<dyn DigitalOutput>,
    ) -> Result<Self> {
        let transport = SerialTransport::open(&config.serial.path, config.serial.baud_rate)?;
        Ok(Self::with_transport(
            config,
            Box::new(transport),
            reset_pin,
            boot_pin,
        ))
    }

    /// Build an adaptor over an arbitrary transport (tests use the mock).
    pub fn with_transport(
        config: HatConfig,
        transport: Box<dyn Transport>,
        reset_pin: Box<dyn DigitalOutput>,
        boot_pin: Box<dyn DigitalOutput>,
    ) -> Self {
        let (commands_tx, commands_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        Self {
            config,
            transport: Some(transport),
            reset_pin: Some(reset_pin),
            boot_pin: Some(boot_pin),
            commands_rx: Some(commands_rx),
            commands_tx,
            subscriptions: Subscriptions::new(),
            detected: Arc::new(RwLock::new(HashMap::new())),
            registry: Mutex::new(HashMap::new()),
            state: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            reader_handle: None,
            dispatcher_handle: None,
            writer_handle: None,
        }
    }

    pub fn config(&self) -> &HatConfig {
        &self.config
    }

    /// State the HAT was found in by `connect`, once connected.
    pub fn state(&self) -> Option<HatState> {
        self.state
    }

    /// Register a device on a port. Called by driver constructors, before
    /// `connect`.
    pub fn register(&self, port: PortId, class: DeviceClass) -> PortHandle {
        self.register_inner(Some(port), class)
    }

    /// Handle addressing the HAT itself (power and version queries).
    pub fn hat_handle(&self) -> PortHandle {
        self.register_inner(None, DeviceClass::Internal)
    }

    fn register_inner(&self, port: Option<PortId>, class: DeviceClass) -> PortHandle {
        let mut registry = self.registry.lock();
        if let Some(previous) = registry.insert(port, class) {
            if port.is_some() {
                warn!(
                    "port {:?} re-registered as {} (was {})",
                    port, class, previous
                );
            }
        }
        PortHandle::new(
            port,
            class,
            self.commands_tx.clone(),
            self.subscriptions.clone(),
            Arc::clone(&self.detected),
        )
    }

    /// Bootstrap the HAT and start the reader, dispatcher, and writer
    /// threads.
    ///
    /// Blocks through the firmware handshake (and upload, if the HAT needs
    /// one), then queues the `select ; echo 0` preamble and a `list` for
    /// every registered port. Calling `connect` twice is an error.
    pub fn connect(&mut self) -> Result<HatState> {
        let mut transport = self
            .transport
            .take()
            .ok_or_else(|| Error::Bootstrap("adaptor already connected".to_string()))?;
        let mut reset_pin = self.reset_pin.take().expect("reset pin present");
        let mut boot_pin = self.boot_pin.take().expect("boot pin present");

        let state = bootstrap::run(&mut *transport, &mut *reset_pin, &mut *boot_pin)?;
        transport.set_read_timeout(RUNTIME_READ_TIMEOUT)?;
        self.state = Some(state);

        let write_half = transport.try_clone_box()?;
        let (lines_tx, lines_rx) = bounded(LINE_CHANNEL_CAPACITY);

        let reader_shutdown = Arc::clone(&self.shutdown);
        self.reader_handle = Some(
            std::thread::Builder::new()
                .name("buildhat-reader".to_string())
                .spawn(move || reader::reader_loop(transport, lines_tx, reader_shutdown))
                .map_err(|e| Error::Bootstrap(format!("failed to spawn reader thread: {}", e)))?,
        );

        let dispatcher_subs = self.subscriptions.clone();
        let dispatcher_detected = Arc::clone(&self.detected);
        self.dispatcher_handle = Some(
            std::thread::Builder::new()
                .name("buildhat-dispatcher".to_string())
                .spawn(move || {
                    dispatcher::dispatcher_loop(lines_rx, dispatcher_subs, dispatcher_detected)
                })
                .map_err(|e| {
                    Error::Bootstrap(format!("failed to spawn dispatcher thread: {}", e))
                })?,
        );

        let commands_rx = self.commands_rx.take().expect("command queue present");
        self.writer_handle = Some(
            std::thread::Builder::new()
                .name("buildhat-writer".to_string())
                .spawn(move || writer::writer_loop(write_half, commands_rx))
                .map_err(|e| Error::Bootstrap(format!("failed to spawn writer thread: {}", e)))?,
        );

        // Prime every registered port: data stream selected, echo off, then
        // one device listing so connects get announced.
        let mut ports: Vec<PortId> = self
            .registry
            .lock()
            .keys()
            .filter_map(|port| *port)
            .collect();
        ports.sort();
        for port in ports {
            self.queue(commands::select_echo_off(port))?;
        }
        self.queue(commands::list())?;

        info!("Build HAT connected ({} state)", describe(state));
        Ok(state)
    }

    fn queue(&self, command: String) -> Result<()> {
        self.commands_tx
            .send(WriteRequest::Command(command.into_bytes()))
            .map_err(|_| Error::ChannelClosed("writer serializer stopped".to_string()))
    }

    /// Stop all threads and close the serial line.
    ///
    /// The writer drains its queue first so halt commands from drivers make
    /// it to the wire, then the reader and dispatcher wind down.
    pub fn finalize(&mut self) -> Result<()> {
        if self.writer_handle.is_none() {
            // Never connected; nothing is running.
            return Ok(());
        }

        debug!("finalizing adaptor");
        let _ = self.commands_tx.send(WriteRequest::Shutdown);
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }

        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.dispatcher_handle.take() {
            let _ = handle.join();
        }

        info!("Build HAT adaptor stopped");
        Ok(())
    }
}

impl Drop for BuildHat {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

fn describe(state: HatState) -> &'static str {
    match state {
        HatState::Firmware => "firmware current",
        HatState::NeedNewFirmware => "firmware replaced",
        HatState::Bootloader => "firmware flashed",
        HatState::Other => "unknown",
    }
}
