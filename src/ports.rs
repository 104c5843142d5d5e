//! Port and device identity
//!
//! The HAT has four LEGO connectors, A-D, indexed 0..3 on the wire. The HAT
//! itself (power and version commands) is addressed with `None` wherever an
//! `Option<PortId>` appears.

use std::fmt;

/// One of the four LEGO device connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortId {
    A,
    B,
    C,
    D,
}

impl PortId {
    pub const ALL: [PortId; 4] = [PortId::A, PortId::B, PortId::C, PortId::D];

    /// Numeric index used in wire commands (`port <n>`).
    pub fn index(self) -> u8 {
        match self {
            PortId::A => 0,
            PortId::B => 1,
            PortId::C => 2,
            PortId::D => 3,
        }
    }

    /// Parse the digit of a `P<n>` message prefix.
    pub fn from_index(index: u8) -> Option<PortId> {
        match index {
            0 => Some(PortId::A),
            1 => Some(PortId::B),
            2 => Some(PortId::C),
            3 => Some(PortId::D),
            _ => None,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortId::A => write!(f, "A"),
            PortId::B => write!(f, "B"),
            PortId::C => write!(f, "C"),
            PortId::D => write!(f, "D"),
        }
    }
}

/// Broad class of device a driver expects on its port.
///
/// Assigned at driver construction; the concrete [`DeviceType`] is only
/// known once the HAT announces the connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Unknown,
    Light,
    TiltSensor,
    MotionSensor,
    ColorDistanceSensor,
    ColorSensor,
    DistanceSensor,
    ForceSensor,
    Matrix,
    Motor,
    /// The HAT itself (power monitor, version queries).
    Internal,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Unknown => "unknown",
            DeviceClass::Light => "light",
            DeviceClass::TiltSensor => "tiltSensor",
            DeviceClass::MotionSensor => "motionSensor",
            DeviceClass::ColorDistanceSensor => "colorDistanceSensor",
            DeviceClass::ColorSensor => "colorSensor",
            DeviceClass::DistanceSensor => "distanceSensor",
            DeviceClass::ForceSensor => "forceSensor",
            DeviceClass::Matrix => "matrix",
            DeviceClass::Motor => "motor",
            DeviceClass::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Numeric device code reported in `connected to active ID <hex>` messages.
///
/// Only used for display; drivers act on the [`DeviceClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceType(pub u8);

impl DeviceType {
    /// Map the reported code onto a device class. All motor codes collapse
    /// onto [`DeviceClass::Motor`].
    pub fn class(self) -> DeviceClass {
        match self.0 {
            0x08 => DeviceClass::Light,
            0x22 => DeviceClass::TiltSensor,
            0x23 => DeviceClass::MotionSensor,
            0x25 => DeviceClass::ColorDistanceSensor,
            0x3D => DeviceClass::ColorSensor,
            0x3E => DeviceClass::DistanceSensor,
            0x3F => DeviceClass::ForceSensor,
            0x40 => DeviceClass::Matrix,
            0x26 | 0x2E..=0x31 | 0x41 | 0x4B | 0x4C => DeviceClass::Motor,
            _ => DeviceClass::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    // Display names match the vendor's catalogue; codes the catalogue does
    // not cover render as deviceType(<n>).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0x08 => "light",
            0x22 => "tiltSensor",
            0x23 => "motionSensor",
            0x25 => "colorDistance",
            0x26 => "mediumLinearMotor",
            0x2E => "technicLargeMotor",
            0x2F => "technicXLargeMotor",
            0x30 => "spikePrimeMediumMotor",
            0x31 => "spikePrimeLargeMotor",
            0x3D => "colorSensor",
            0x3E => "distanceSensor",
            0x3F => "forceSensor",
            0x40 => "matrix",
            0x41 => "spikeEssentialAngularMotor",
            0x4B => "mindstormMotor",
            0x4C => "motor",
            other => return write!(f, "deviceType({})", other),
        };
        write!(f, "{}", name)
    }
}
