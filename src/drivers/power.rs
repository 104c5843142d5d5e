//! Power monitor
//!
//! Polls the HAT's input voltage on a fixed interval and republishes it as
//! host-facing events; a persistent subscription forwards hardware power
//! faults as they happen. Event names (`power_update`, `low_power`,
//! `power_fault`) are fixed - hosts key their handlers on them.

use crate::error::{Error, Result};
use crate::hat::{BuildHat, PortHandle};
use crate::protocol::{commands, EventKind, EventPayload};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Deadline for the `vin` reply.
const VIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Capacity of the published event channel.
const EVENT_CAPACITY: usize = 16;

/// Events published by the power monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerEvent {
    /// Periodic voltage reading, volts.
    Update(f64),
    /// Reading fell below the configured threshold, volts.
    Low(f64),
    /// The HAT reported a power fault.
    Fault,
}

impl PowerEvent {
    /// Stable event name hosts dispatch on.
    pub fn name(&self) -> &'static str {
        match self {
            PowerEvent::Update(_) => "power_update",
            PowerEvent::Low(_) => "low_power",
            PowerEvent::Fault => "power_fault",
        }
    }
}

/// Periodic `vin` poller and power-fault forwarder.
pub struct PowerMonitor {
    handle: PortHandle,
    interval: Duration,
    threshold: f64,
    events_tx: Sender<PowerEvent>,
    events_rx: Receiver<PowerEvent>,
    halt_txs: Vec<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl PowerMonitor {
    /// Create a monitor with the interval and threshold from the adaptor's
    /// config.
    pub fn new(hat: &BuildHat) -> Self {
        let power = &hat.config().power;
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        PowerMonitor {
            handle: hat.hat_handle(),
            interval: Duration::from_secs(power.notification_interval_secs),
            threshold: power.low_voltage_threshold,
            events_tx,
            events_rx,
            halt_txs: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Override the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the low-voltage threshold, volts.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Channel the monitor publishes on.
    pub fn events(&self) -> Receiver<PowerEvent> {
        self.events_rx.clone()
    }

    /// Start the poll loop and the fault watcher.
    pub fn start(&mut self) -> Result<()> {
        let (halt_tx, halt_rx) = bounded(1);
        self.halt_txs.push(halt_tx);
        let handle = self.handle.clone();
        let threshold = self.threshold;
        let interval = self.interval;
        let events = self.events_tx.clone();
        self.threads.push(
            thread::Builder::new()
                .name("power-poll".to_string())
                .spawn(move || poll_loop(handle, halt_rx, interval, threshold, events))
                .map_err(|e| Error::ChannelClosed(format!("failed to spawn poll thread: {}", e)))?,
        );

        let (halt_tx, halt_rx) = bounded(1);
        self.halt_txs.push(halt_tx);
        let faults = self.handle.subscribe_all(EventKind::PowerFault);
        let events = self.events_tx.clone();
        self.threads.push(
            thread::Builder::new()
                .name("power-faults".to_string())
                .spawn(move || fault_loop(faults, halt_rx, events))
                .map_err(|e| {
                    Error::ChannelClosed(format!("failed to spawn fault thread: {}", e))
                })?,
        );

        Ok(())
    }

    /// One immediate voltage poll, outside the periodic schedule.
    pub fn poll_now(&self) -> Result<f64> {
        poll_once(&self.handle, self.threshold, &self.events_tx)
    }

    /// Stop both loops.
    pub fn halt(&mut self) -> Result<()> {
        info!("Halting power monitor");
        for halt in self.halt_txs.drain(..) {
            let _ = halt.send(());
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for PowerMonitor {
    fn drop(&mut self) {
        let _ = self.halt();
    }
}

fn poll_loop(
    handle: PortHandle,
    halt: Receiver<()>,
    interval: Duration,
    threshold: f64,
    events: Sender<PowerEvent>,
) {
    loop {
        match halt.recv_timeout(interval) {
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("stopping power polling");
                return;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if let Err(e) = poll_once(&handle, threshold, &events) {
                    warn!("error polling for power voltage: {}", e);
                }
            }
        }
    }
}

/// Subscribe, ask for `vin`, parse the reply, publish.
fn poll_once(handle: &PortHandle, threshold: f64, events: &Sender<PowerEvent>) -> Result<f64> {
    let waiter = handle.subscribe_once(EventKind::PowerStatus);
    handle.send(commands::vin())?;

    let event = waiter.wait(VIN_TIMEOUT)?;
    let volts = match event.payload {
        EventPayload::PowerStatus(volts) => volts,
        other => {
            return Err(Error::Protocol(format!(
                "expected voltage reply, got {:?}",
                other
            )))
        }
    };

    publish(events, PowerEvent::Update(volts))?;
    if volts < threshold {
        info!("Input voltage {:.2} V below threshold {:.2} V", volts, threshold);
        publish(events, PowerEvent::Low(volts))?;
    }
    Ok(volts)
}

fn fault_loop(
    faults: crate::hat::PersistentSubscription,
    halt: Receiver<()>,
    events: Sender<PowerEvent>,
) {
    loop {
        crossbeam_channel::select! {
            recv(faults.receiver()) -> event => match event {
                Ok(_) => {
                    info!("Publishing power fault event");
                    if publish(&events, PowerEvent::Fault).is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
            recv(halt) -> _ => {
                debug!("stop watching for power faults");
                return;
            }
        }
    }
}

fn publish(events: &Sender<PowerEvent>, event: PowerEvent) -> Result<()> {
    events
        .try_send(event)
        .map_err(|_| Error::ChannelClosed("power event channel full or closed".to_string()))
}
