//! Classification of HAT output lines into typed events
//!
//! Port-scoped messages come in two shapes:
//!
//! - `P<d>C<mode>: <payload>` - a data message for the mode the port is
//!   currently selected on, payload is whitespace-separated numeric fields
//! - `P<d>: <status>` - a status message (connect, disconnect, ramp/pulse
//!   completion, data-phase timeout)
//!
//! Everything else is either a `vin` voltage reply (a line whose first token
//! parses as a float), a power-fault notice, or chatter the driver ignores
//! (prompts, echoes, `list` output).

use crate::error::{Error, Result};
use crate::ports::{DeviceType, PortId};

const CONNECTED_ACTIVE: &str = "connected to active ID";
const CONNECTED_PASSIVE: &str = "connected to passive ID";
const DISCONNECTED: &str = "disconnected";
const DATA_PHASE_TIMEOUT: &str = "timeout during data phase: disconnecting";
const NO_DEVICE: &str = "no device detected";
const PULSE_DONE: &str = "pulse done";
const RAMP_DONE: &str = "ramp done";
const POWER_FAULT: &str = "power fault";

/// Message kinds a subscription can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Timeout,
    PulseDone,
    RampDone,
    Data,
    PowerStatus,
    PowerFault,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Timeout => "timeout",
            EventKind::PulseDone => "pulse done",
            EventKind::RampDone => "ramp done",
            EventKind::Data => "data",
            EventKind::PowerStatus => "power status",
            EventKind::PowerFault => "power fault",
        };
        write!(f, "{}", name)
    }
}

/// Payload of a classified event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Device attached; active devices report their type code, passive ones
    /// do not.
    Connected(Option<DeviceType>),
    Disconnected,
    /// The HAT gave up on the device mid data phase.
    Timeout,
    PulseDone,
    RampDone,
    /// Mode data, fields left unparsed for the driver to interpret.
    Data { mode: u8, raw: String },
    /// `vin` reply, volts.
    PowerStatus(f64),
    PowerFault,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Connected(_) => EventKind::Connected,
            EventPayload::Disconnected => EventKind::Disconnected,
            EventPayload::Timeout => EventKind::Timeout,
            EventPayload::PulseDone => EventKind::PulseDone,
            EventPayload::RampDone => EventKind::RampDone,
            EventPayload::Data { .. } => EventKind::Data,
            EventPayload::PowerStatus(_) => EventKind::PowerStatus,
            EventPayload::PowerFault => EventKind::PowerFault,
        }
    }
}

/// A classified line: which port it concerns (`None` = the HAT itself) and
/// what it says.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub port: Option<PortId>,
    pub payload: EventPayload,
}

impl DeviceEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Classify one line from the HAT.
///
/// Returns `Ok(None)` for lines the driver has no interest in (prompts,
/// echoes, unknown statuses) and `Err(Protocol)` for lines that look
/// port-scoped but are malformed. Callers log and skip errors; they are
/// never fatal.
pub fn parse_line(line: &str) -> Result<Option<DeviceEvent>> {
    if let Some(rest) = line.strip_prefix('P') {
        return parse_port_line(line, rest);
    }

    if line.contains(POWER_FAULT) {
        return Ok(Some(DeviceEvent {
            port: None,
            payload: EventPayload::PowerFault,
        }));
    }

    // A bare leading float is the reply to `vin`.
    if let Some(token) = line.split_whitespace().next() {
        if let Ok(volts) = token.parse::<f64>() {
            return Ok(Some(DeviceEvent {
                port: None,
                payload: EventPayload::PowerStatus(volts),
            }));
        }
    }

    Ok(None)
}

fn parse_port_line(line: &str, rest: &str) -> Result<Option<DeviceEvent>> {
    let (head, body) = line.split_once(':').ok_or_else(|| {
        Error::Protocol(format!(
            "port-scoped line without ':' delimiter: {:?}",
            line
        ))
    })?;

    let digit = rest.chars().next().ok_or_else(|| {
        Error::Protocol(format!("port-scoped line without port digit: {:?}", line))
    })?;
    let index = digit
        .to_digit(10)
        .ok_or_else(|| Error::Protocol(format!("bad port digit in {:?}", line)))?;
    let port = PortId::from_index(index as u8)
        .ok_or_else(|| Error::Protocol(format!("port index out of range in {:?}", line)))?;

    // `P<d>C<mode>:` carries mode data, `P<d>:` carries a status.
    let after_digit = &head[2..];
    if let Some(raw_mode) = after_digit.strip_prefix('C') {
        let mode: u8 = raw_mode
            .parse()
            .map_err(|_| Error::Protocol(format!("bad mode suffix in {:?}", line)))?;
        return Ok(Some(DeviceEvent {
            port: Some(port),
            payload: EventPayload::Data {
                mode,
                raw: body.trim().to_string(),
            },
        }));
    }
    if !after_digit.is_empty() {
        return Err(Error::Protocol(format!(
            "unexpected text between port digit and ':' in {:?}",
            line
        )));
    }

    let status = body.trim_start();
    let payload = if let Some(raw_type) = status.strip_prefix(CONNECTED_ACTIVE) {
        let code = u8::from_str_radix(raw_type.trim(), 16)
            .map_err(|_| Error::Protocol(format!("bad device type in {:?}", line)))?;
        EventPayload::Connected(Some(DeviceType(code)))
    } else if status.starts_with(CONNECTED_PASSIVE) {
        EventPayload::Connected(None)
    } else if status.starts_with(DATA_PHASE_TIMEOUT) {
        EventPayload::Timeout
    } else if status.starts_with(DISCONNECTED) || status.starts_with(NO_DEVICE) {
        EventPayload::Disconnected
    } else if status.starts_with(PULSE_DONE) {
        EventPayload::PulseDone
    } else if status.starts_with(RAMP_DONE) {
        EventPayload::RampDone
    } else {
        return Ok(None);
    };

    Ok(Some(DeviceEvent {
        port: Some(port),
        payload,
    }))
}
