//! End-to-end sessions over a mock serial line
//!
//! Each test stands up the full adaptor (bootstrap, reader, dispatcher,
//! writer threads) on a `MockTransport` and scripts the HAT side: a helper
//! thread watches the written byte stream for triggers and injects the
//! reply lines a real HAT would produce.

use buildhat_io::{
    firmware, BuildHat, DeviceType, DigitalOutput, HatConfig, HatState, LightDriver, MockTransport,
    MotorDriver, MotorState, PortId, PowerEvent, PowerMonitor, Result,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Write-only pin that ignores everything; these sessions never reset the HAT.
struct NullPin;

impl DigitalOutput for NullPin {
    fn write(&mut self, _high: bool) -> Result<()> {
        Ok(())
    }
}

fn new_hat(mock: &MockTransport) -> BuildHat {
    BuildHat::with_transport(
        HatConfig::default(),
        Box::new(mock.clone()),
        Box::new(NullPin),
        Box::new(NullPin),
    )
}

fn firmware_ok_line() -> String {
    format!("Firmware version: {} 2024-06-01", firmware::expected_version())
}

/// Drive the HAT side of the conversation: for each `(trigger, reply)` step,
/// wait until `trigger` newly appears in the written stream, then inject
/// `reply` (if non-empty) as a line. Steps are consumed strictly in order,
/// so a repeated trigger matches its next occurrence.
fn script(mock: &MockTransport, steps: &[(&str, &str)]) -> JoinHandle<()> {
    let mock = mock.clone();
    let steps: Vec<(String, String)> = steps
        .iter()
        .map(|(t, r)| (t.to_string(), r.to_string()))
        .collect();

    thread::spawn(move || {
        let mut cursor = 0usize;
        for (trigger, reply) in steps {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let written = mock.get_written();
                let tail = String::from_utf8_lossy(&written[cursor.min(written.len())..])
                    .into_owned();
                if let Some(pos) = tail.find(&trigger) {
                    cursor += pos + trigger.len();
                    if !reply.is_empty() {
                        mock.inject_line(&reply);
                    }
                    break;
                }
                assert!(
                    Instant::now() < deadline,
                    "script stalled waiting for {:?}; written so far: {:?}",
                    trigger,
                    String::from_utf8_lossy(&mock.get_written())
                );
                thread::sleep(Duration::from_millis(2));
            }
        }
    })
}

fn written_string(mock: &MockTransport) -> String {
    String::from_utf8_lossy(&mock.get_written()).into_owned()
}

#[test]
fn connect_with_current_firmware_skips_upload() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let _motor = MotorDriver::new(&hat, PortId::A);

    let state = hat.connect().unwrap();
    assert_eq!(state, HatState::Firmware);
    assert_eq!(hat.state(), Some(HatState::Firmware));
    // Read deadline relaxes from the 5 s bootstrap value once connected.
    assert_eq!(mock.read_timeout(), Duration::from_secs(1));

    hat.finalize().unwrap();

    let written = written_string(&mock);
    assert!(written.starts_with("version\r"));
    assert!(written.contains("port 0 ; select ; echo 0\rlist\r"));
    assert!(!written.contains("clear\r"), "no upload expected: {:?}", written);
    assert!(!written.contains("load "), "no upload expected: {:?}", written);
}

#[test]
fn connect_flashes_firmware_from_bootloader() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line("BuildHAT bootloader version 1.2.0");
    mock.inject_read(b"BHBL> BHBL> BHBL> ");
    mock.inject_line("Done initialising ports");

    let mut hat = new_hat(&mock);
    let state = hat.connect().unwrap();
    assert_eq!(state, HatState::Bootloader);
    hat.finalize().unwrap();

    // Byte-for-byte check of the upload sequence.
    let mut expected = Vec::new();
    expected.extend_from_slice(b"version\rclear\r");
    expected.extend_from_slice(
        format!(
            "load {} {}\r",
            firmware::FIRMWARE.len(),
            firmware::checksum(firmware::FIRMWARE)
        )
        .as_bytes(),
    );
    expected.push(0x02);
    expected.extend_from_slice(firmware::FIRMWARE);
    expected.extend_from_slice(&[0x03, b'\r']);
    expected.extend_from_slice(format!("signature {}\r", firmware::SIGNATURE.len()).as_bytes());
    expected.push(0x02);
    expected.extend_from_slice(firmware::SIGNATURE);
    expected.extend_from_slice(&[0x03, b'\r']);
    expected.extend_from_slice(b"reboot\r");
    // No ports registered, so the post-connect preamble is just `list`.
    expected.extend_from_slice(b"list\r");

    assert_eq!(mock.get_written(), expected);
}

#[test]
fn motor_session_ramps_to_angle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let mut motor = MotorDriver::new(&hat, PortId::A);

    let hat_side = script(
        &mock,
        &[
            ("list\r", ""), // adaptor preamble, devices announce on the next list
            ("list\r", "P0: connected to active ID 30"),
            ("selonce 0\r", "P0C0: 0 0 -31"), // explicit get_state
            ("selonce 0\r", "P0C0: 0 0 -31"), // run_to_angle's readback
            ("set ramp", "P0: ramp done"),
        ],
    );

    hat.connect().unwrap();
    motor.start().unwrap();
    assert_eq!(motor.device_type(), Some(DeviceType(0x30)));

    let state = motor.get_state().unwrap();
    assert_eq!(
        state,
        MotorState {
            speed: 0,
            position: 0,
            absolute_position: -31
        }
    );

    motor.run_to_angle(-60, Some(100)).unwrap();

    hat_side.join().unwrap();
    motor.halt().unwrap();
    hat.finalize().unwrap();

    let written = written_string(&mock);
    assert!(
        written.contains(
            "port 0 ; combi 0 1 0 2 0 3 0 ; pid 0 0 1 s4 0.0027777778 0 5 0 .1 3 ; \
             set ramp 0.000000 -0.080556 0.016111 0\r"
        ),
        "ramp command missing or wrong: {:?}",
        written
    );
    // start() applied the default tuning after the mode reset.
    assert!(written.contains("port 0 ; combi 1\r"));
    assert!(written.contains("port 0 ; plimit 0.70\r"));
    assert!(written.contains("port 0 ; bias 0.30\r"));
    // The ramp ends with a coast.
    assert!(written.contains("port 0 ; coast\r"));
}

#[test]
fn motor_pulse_session_runs_for_duration() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let mut motor = MotorDriver::new(&hat, PortId::B);

    let hat_side = script(
        &mock,
        &[
            ("list\r", ""),
            ("list\r", "P1: connected to active ID 26"),
            ("set pulse", "P1: pulse done"),
        ],
    );

    hat.connect().unwrap();
    motor.start().unwrap();
    motor
        .run_for_duration(Duration::from_millis(3500), Some(50))
        .unwrap();

    hat_side.join().unwrap();
    hat.finalize().unwrap();

    let written = written_string(&mock);
    assert!(
        written.contains(
            "port 1 ; combi 0 1 0 2 0 3 0 ; pid 1 0 0 s1 1 0 0.003 0.01 0 100 ; \
             set pulse 50 0.0 3.50 0\r"
        ),
        "pulse command missing or wrong: {:?}",
        written
    );
}

#[test]
fn state_readback_times_out_without_reply() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let mut motor = MotorDriver::new(&hat, PortId::A);
    hat.connect().unwrap();

    // Nobody answers the selonce; the waiter's 500 ms deadline expires.
    let err = motor.get_state().unwrap_err();
    assert!(matches!(err, buildhat_io::Error::Timeout(_)), "{:?}", err);

    hat.finalize().unwrap();
}

#[test]
fn light_session_blinks_and_halts() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let mut light = LightDriver::new(&hat, PortId::C);

    let hat_side = script(
        &mock,
        &[
            ("list\r", ""),
            ("list\r", "P2: connected to passive ID 8"),
        ],
    );

    hat.connect().unwrap();
    light.start().unwrap();
    hat_side.join().unwrap();

    // 3 cycles: ceil(50ms / 20ms).
    let done = light
        .blink(Duration::from_millis(20), Duration::from_millis(50))
        .unwrap();
    done.recv_timeout(Duration::from_secs(2)).unwrap();

    light.halt().unwrap();
    hat.finalize().unwrap();

    let written = written_string(&mock);
    assert_eq!(written.matches("port 2 ; plimit 1 ; set -1.0000\r").count(), 3);
    // 3 blink-off cycles plus the halt's final off.
    assert_eq!(written.matches("port 2 ; plimit 1 ; set 0\r").count(), 4);
}

#[test]
fn power_monitor_publishes_low_voltage_and_faults() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let mut monitor = PowerMonitor::new(&hat)
        .with_threshold(7.2)
        .with_interval(Duration::from_secs(3600));

    hat.connect().unwrap();
    monitor.start().unwrap();
    let events = monitor.events();

    let hat_side = script(&mock, &[("vin\r", "7.10")]);
    let volts = monitor.poll_now().unwrap();
    hat_side.join().unwrap();
    assert_eq!(volts, 7.10);

    // power_update first, low_power second.
    let first = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first, PowerEvent::Update(7.10));
    assert_eq!(first.name(), "power_update");

    let second = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second, PowerEvent::Low(7.10));
    assert_eq!(second.name(), "low_power");

    // A fault line from the HAT surfaces through the persistent watcher.
    mock.inject_line("power fault on output");
    let third = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(third, PowerEvent::Fault);
    assert_eq!(third.name(), "power_fault");

    monitor.halt().unwrap();
    hat.finalize().unwrap();
}

#[test]
fn repeated_tuning_commands_are_not_deduplicated() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let motor = MotorDriver::new(&hat, PortId::D);
    hat.connect().unwrap();

    motor.set_plimit(0.5).unwrap();
    motor.set_plimit(0.5).unwrap();

    hat.finalize().unwrap();

    let written = written_string(&mock);
    assert_eq!(written.matches("port 3 ; plimit 0.50\r").count(), 2);
}

#[test]
fn out_of_range_arguments_fail_before_the_wire() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::new();
    mock.inject_line(&firmware_ok_line());

    let mut hat = new_hat(&mock);
    let mut motor = MotorDriver::new(&hat, PortId::A);
    hat.connect().unwrap();
    // Drain the preamble before watching the wire.
    hat.finalize().unwrap();
    mock.clear_written();

    assert!(motor.set_plimit(1.5).is_err());
    assert!(motor.set_bias(-0.1).is_err());
    assert!(motor.set_pwm(2.0).is_err());
    assert!(motor.turn_on(101).is_err());
    assert!(motor.run_to_angle(181, Some(50)).is_err());
    assert!(motor
        .run_to_angle_with(0, Some(50), buildhat_io::RotationMethod::Clockwise)
        .is_err());
    assert!(motor.run_for_rotations(0.0, Some(50)).is_err());

    assert!(mock.get_written().is_empty(), "nothing may reach the wire");
}
