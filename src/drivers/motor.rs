//! Motor driver
//!
//! Wraps one or more motor ports. Positional runs are planned host-side:
//! the driver reads the current position, converts the request into a ramp
//! (start turns, end turns, duration) and lets the HAT's position PID
//! execute it, waiting for the `ramp done` completion report. Timed runs
//! map onto the firmware's pulse primitive the same way.
//!
//! Positions are in encoder degrees ("ticks"); the wire talks in full
//! turns, hence the /360 conversions below.

use crate::drivers::{wait_for_connect, HALT_DRAIN};
use crate::error::{Error, Result};
use crate::hat::{BuildHat, PortHandle};
use crate::ports::{DeviceClass, DeviceType, PortId};
use crate::protocol::{commands, EventKind, EventPayload};
use log::{debug, info};
use std::fmt;
use std::thread;
use std::time::Duration;

const DEFAULT_SPEED: i32 = 20;
const DEFAULT_PLIMIT: f64 = 0.7;
const DEFAULT_BIAS: f64 = 0.3;

/// Conversion from the -100..100 speed scale to turns per second.
/// Inherited calibration from the vendor's reference driver, not derived.
const SPEED_TO_TURNS_PER_SEC: f64 = 0.05;

/// Deadline for a state readback reply.
const STATE_TIMEOUT: Duration = Duration::from_millis(500);

/// Settle time between a finished degree ramp and the coast command.
const RAMP_SETTLE: Duration = Duration::from_millis(200);

/// Snapshot of a motor's speed and position counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorState {
    pub speed: i64,
    /// Cumulative position in degrees since power-up.
    pub position: i64,
    /// Shaft angle, wrap-normalised to -180..180.
    pub absolute_position: i64,
}

impl fmt::Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "speed: {}, position: {}, absolutePosition: {}",
            self.speed, self.position, self.absolute_position
        )
    }
}

/// Direction strategy for [`MotorDriver::run_to_angle_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMethod {
    /// Signed shortest path (at most half a turn).
    Shortest,
    /// TODO: plan a strictly clockwise target (needs direction-constrained
    /// turn arithmetic on top of the shortest-path planner).
    Clockwise,
    /// TODO: same as `Clockwise`, mirrored.
    CounterClockwise,
}

struct MotorPort {
    port: PortId,
    handle: PortHandle,
    /// Mode the port's data stream is currently on; `selonce` readbacks
    /// reuse it.
    mode: u8,
}

/// Driver for one or more motor ports.
///
/// Multi-port drivers send every command to every port and block until every
/// port reports completion, which keeps paired drive motors in lockstep.
pub struct MotorDriver {
    devices: Vec<MotorPort>,
}

impl MotorDriver {
    /// Register a motor on `port`. Call before `BuildHat::connect`.
    pub fn new(hat: &BuildHat, port: PortId) -> Self {
        let mut driver = MotorDriver {
            devices: Vec::new(),
        };
        driver.add_motor(hat, port);
        driver
    }

    /// Register an additional motor driven in lockstep with the first.
    pub fn add_motor(&mut self, hat: &BuildHat, port: PortId) {
        let handle = hat.register(port, DeviceClass::Motor);
        self.devices.push(MotorPort {
            port,
            handle,
            mode: 0,
        });
    }

    /// Wait for every motor to report connected, then reset modes and apply
    /// the default power limit and bias.
    pub fn start(&mut self) -> Result<()> {
        for device in &self.devices {
            wait_for_connect(&device.handle, device.port)?;
        }

        self.reset_modes()?;
        self.set_plimit(DEFAULT_PLIMIT)?;
        self.set_bias(DEFAULT_BIAS)?;
        Ok(())
    }

    fn reset_modes(&self) -> Result<()> {
        for device in self.devices()? {
            for command in commands::combi_reset(device.port) {
                device.handle.send(command)?;
            }
        }
        Ok(())
    }

    /// Power limit in [0, 1].
    pub fn set_plimit(&self, limit: f64) -> Result<()> {
        check_unit_range("plimit", limit)?;
        for device in self.devices()? {
            device.handle.send(commands::plimit(device.port, limit))?;
        }
        Ok(())
    }

    /// Bias in [0, 1].
    pub fn set_bias(&self, bias: f64) -> Result<()> {
        check_unit_range("bias", bias)?;
        for device in self.devices()? {
            device.handle.send(commands::bias(device.port, bias))?;
        }
        Ok(())
    }

    /// Raw PWM in [0, 1].
    pub fn set_pwm(&self, pwm: f64) -> Result<()> {
        check_unit_range("pwm", pwm)?;
        for device in self.devices()? {
            device.handle.send(commands::pwm(device.port, pwm))?;
        }
        Ok(())
    }

    /// Continuous run at `speed` in -100..100 until told otherwise.
    pub fn turn_on(&mut self, speed: i32) -> Result<()> {
        check_speed(speed)?;
        for device in self.devices_mut()? {
            device
                .handle
                .send(commands::motor_set_speed(device.port, speed))?;
            device.mode = 0;
        }
        Ok(())
    }

    /// Let the motor coast to a stop.
    pub fn turn_off(&self) -> Result<()> {
        for device in self.devices()? {
            device.handle.send(commands::coast(device.port))?;
        }
        Ok(())
    }

    /// Run at `speed` for `duration`, blocking until the HAT reports the
    /// pulse finished (or `duration` + 1 s passes).
    pub fn run_for_duration(&mut self, duration: Duration, speed: Option<i32>) -> Result<()> {
        let speed = speed.unwrap_or(DEFAULT_SPEED);
        check_run_speed(speed)?;

        let seconds = duration.as_secs_f64();
        let deadline = duration + Duration::from_secs(1);

        let result = (|| {
            for device in self.devices_mut()? {
                let waiter = device.handle.subscribe_once(EventKind::PulseDone);
                device
                    .handle
                    .send(commands::motor_pulse(device.port, speed, seconds))?;
                waiter.wait(deadline)?;
                device.mode = 0;
            }
            Ok(())
        })();

        self.turn_off()?;
        result
    }

    /// Run `rotations` full turns. Negative speed reverses direction.
    pub fn run_for_rotations(&mut self, rotations: f64, speed: Option<i32>) -> Result<()> {
        if rotations == 0.0 {
            return Err(Error::InvalidArgument(
                "rotations must be non-zero".to_string(),
            ));
        }
        self.run_for_degrees(rotations * 360.0, speed)
    }

    /// Turn the shaft through `degrees`, blocking until the ramp completes.
    pub fn run_for_degrees(&mut self, degrees: f64, speed: Option<i32>) -> Result<()> {
        let speed = speed.unwrap_or(DEFAULT_SPEED);
        check_run_speed(speed)?;

        let state = self.get_state()?;
        let plan = plan_degrees(state.position, degrees, speed);
        debug!(
            "degree run: {:.2} degrees over {:.2} s",
            degrees, plan.seconds
        );

        let result = self.execute_ramp(&plan);

        // Give the PID a moment to hold position before cutting power.
        thread::sleep(RAMP_SETTLE);
        self.turn_off()?;
        result
    }

    /// Rotate the shaft to `angle` (-180..180) along the shortest path.
    pub fn run_to_angle(&mut self, angle: i32, speed: Option<i32>) -> Result<()> {
        self.run_to_angle_with(angle, speed, RotationMethod::Shortest)
    }

    /// Rotate to `angle` with an explicit direction strategy.
    ///
    /// Only [`RotationMethod::Shortest`] is implemented.
    pub fn run_to_angle_with(
        &mut self,
        angle: i32,
        speed: Option<i32>,
        method: RotationMethod,
    ) -> Result<()> {
        if !(-180..=180).contains(&angle) {
            return Err(Error::InvalidArgument(format!(
                "angle must be between -180 and 180 but was {}",
                angle
            )));
        }
        let speed = speed.unwrap_or(100);
        if !(1..=100).contains(&speed) {
            return Err(Error::InvalidArgument(format!(
                "speed must be between 1 and 100 but was {}",
                speed
            )));
        }
        if method != RotationMethod::Shortest {
            return Err(Error::InvalidArgument(format!(
                "{:?} rotation is not implemented; use Shortest",
                method
            )));
        }

        let state = self.get_state()?;
        debug!("current state is {}", state);
        let plan = plan_angle(&state, angle, speed);

        let result = self.execute_ramp(&plan);
        self.turn_off()?;
        result
    }

    /// Send the planned ramp to every port and wait for each completion.
    fn execute_ramp(&mut self, plan: &RampPlan) -> Result<()> {
        let deadline = plan.timeout();
        for device in self.devices_mut()? {
            let waiter = device.handle.subscribe_once(EventKind::RampDone);
            device.handle.send(commands::motor_ramp(
                device.port,
                plan.start_turns,
                plan.end_turns,
                plan.seconds,
            ))?;
            waiter.wait(deadline)?;
            device.mode = 0;
        }
        Ok(())
    }

    /// Read speed and position counters from the primary motor.
    pub fn get_state(&mut self) -> Result<MotorState> {
        let device = self
            .devices
            .first()
            .ok_or_else(|| Error::ChannelClosed("motor driver halted".to_string()))?;

        let waiter = device.handle.subscribe_once(EventKind::Data);
        device
            .handle
            .send(commands::motor_state_query(device.port, device.mode))?;

        let event = waiter.wait(STATE_TIMEOUT)?;
        match event.payload {
            EventPayload::Data { raw, .. } => parse_state(&raw),
            other => Err(Error::Protocol(format!(
                "expected data reply, got {:?}",
                other
            ))),
        }
    }

    /// Cumulative position of the primary motor, in degrees.
    pub fn position(&mut self) -> Result<i64> {
        Ok(self.get_state()?.position)
    }

    /// Shaft angle of the primary motor, -180..180.
    pub fn absolute_position(&mut self) -> Result<i64> {
        Ok(self.get_state()?.absolute_position)
    }

    /// Current speed of the primary motor.
    pub fn speed(&mut self) -> Result<i64> {
        Ok(self.get_state()?.speed)
    }

    /// Device type code of the primary motor, once connected.
    pub fn device_type(&self) -> Option<DeviceType> {
        self.devices.first().and_then(|d| d.handle.device_type())
    }

    /// Coast every motor, release the ports, and give the writer a moment
    /// to drain.
    pub fn halt(&mut self) -> Result<()> {
        for device in &self.devices {
            info!(
                "Halting {} on port {}",
                device.handle.class(),
                device.port
            );
            device.handle.send(commands::coast(device.port))?;
        }
        self.devices.clear();
        thread::sleep(HALT_DRAIN);
        Ok(())
    }

    fn devices(&self) -> Result<&[MotorPort]> {
        if self.devices.is_empty() {
            return Err(Error::ChannelClosed("motor driver halted".to_string()));
        }
        Ok(&self.devices)
    }

    fn devices_mut(&mut self) -> Result<&mut [MotorPort]> {
        if self.devices.is_empty() {
            return Err(Error::ChannelClosed("motor driver halted".to_string()));
        }
        Ok(&mut self.devices)
    }
}

/// A planned position ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RampPlan {
    start_turns: f64,
    end_turns: f64,
    seconds: f64,
}

impl RampPlan {
    /// Half a second of slack plus the scheduled duration, rounded up.
    fn timeout(&self) -> Duration {
        Duration::from_millis(500 + (self.seconds.ceil() as u64) * 1000)
    }
}

/// Plan a relative run of `degrees` from the current `position`.
fn plan_degrees(position: i64, degrees: f64, speed: i32) -> RampPlan {
    let direction = if speed >= 0 { 1.0 } else { -1.0 };
    let magnitude = f64::from(speed) * direction;

    let start_turns = position as f64 / 360.0;
    let end_turns = (position as f64 + degrees * direction) / 360.0;
    let rate = magnitude * SPEED_TO_TURNS_PER_SEC;
    let seconds = ((end_turns - start_turns) / rate).abs();

    RampPlan {
        start_turns,
        end_turns,
        seconds,
    }
}

/// Plan the shortest-path ramp that brings the shaft to `angle`.
fn plan_angle(state: &MotorState, angle: i32, speed: i32) -> RampPlan {
    // Signed shortest-path delta, always in -180..=180.
    let diff = (i64::from(angle) - state.absolute_position + 180).rem_euclid(360) - 180;

    let start_turns = state.position as f64 / 360.0;
    let end_turns = (state.position + diff) as f64 / 360.0;
    let rate = f64::from(speed) * SPEED_TO_TURNS_PER_SEC;
    let seconds = ((end_turns - start_turns) / rate).abs();

    RampPlan {
        start_turns,
        end_turns,
        seconds,
    }
}

/// Parse the `selonce` reply: `<speed> <position> <absolutePosition>`.
fn parse_state(raw: &str) -> Result<MotorState> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(Error::Protocol(format!(
            "expected 3 integer values but got {}: {}",
            fields.len(),
            raw
        )));
    }

    let parse = |name: &str, field: &str| -> Result<i64> {
        field
            .parse()
            .map_err(|_| Error::Protocol(format!("failed to parse {} from {:?}", name, raw)))
    };

    Ok(MotorState {
        speed: parse("speed", fields[0])?,
        position: parse("position", fields[1])?,
        absolute_position: parse("absolute position", fields[2])?,
    })
}

fn check_unit_range(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidArgument(format!(
            "{} should be between 0 and 1 but was {:.2}",
            name, value
        )));
    }
    Ok(())
}

fn check_speed(speed: i32) -> Result<()> {
    if !(-100..=100).contains(&speed) {
        return Err(Error::InvalidArgument(format!(
            "invalid speed, must be between -100 and 100 but was {}",
            speed
        )));
    }
    Ok(())
}

/// Speed check for runs that divide by the speed: zero never arrives.
fn check_run_speed(speed: i32) -> Result<()> {
    check_speed(speed)?;
    if speed == 0 {
        return Err(Error::InvalidArgument(
            "speed must be non-zero for a positional or timed run".to_string(),
        ));
    }
    Ok(())
}
