//! Wire command builders
//!
//! Every command the driver sends is built here, so the exact grammar lives
//! in one place and is unit-tested byte for byte. All commands end in `\r`;
//! sub-commands chain with ` ; `.
//!
//! The `pid` coefficient blocks are the vendor's tuned controller settings
//! for LEGO motors: `s1` speed control for continuous/pulse runs, `s4`
//! position control for ramps. They are opaque calibration, not derived
//! here.

use crate::ports::PortId;

/// Speed PID block used by continuous and pulse runs.
const SPEED_PID: &str = "0 0 s1 1 0 0.003 0.01 0 100";

/// Position PID block used by ramps.
const POSITION_PID: &str = "0 1 s4 0.0027777778 0 5 0 .1 3";

/// Combined mode declaration preceding motor commands: report speed (mode 1),
/// position (2), and absolute position (3) alongside mode 0.
const COMBI_MODES: &str = "combi 0 1 0 2 0 3 0";

pub fn version() -> String {
    "version\r".to_string()
}

pub fn list() -> String {
    "list\r".to_string()
}

pub fn vin() -> String {
    "vin\r".to_string()
}

/// Select a port's data stream and suppress command echo.
pub fn select_echo_off(port: PortId) -> String {
    format!("port {} ; select ; echo 0\r", port.index())
}

pub fn plimit(port: PortId, limit: f64) -> String {
    format!("port {} ; plimit {:.2}\r", port.index(), limit)
}

pub fn bias(port: PortId, bias: f64) -> String {
    format!("port {} ; bias {:.2}\r", port.index(), bias)
}

pub fn pwm(port: PortId, pwm: f64) -> String {
    format!("port {} ; pwm ; set {:.2}\r", port.index(), pwm)
}

pub fn coast(port: PortId) -> String {
    format!("port {} ; coast\r", port.index())
}

/// The three mode-reset commands sent before first use of a motor port.
pub fn combi_reset(port: PortId) -> [String; 3] {
    [
        format!("port {} ; combi 1\r", port.index()),
        format!("port {} ; combi 2\r", port.index()),
        format!("port {} ; combi 3\r", port.index()),
    ]
}

/// Continuous velocity run.
pub fn motor_set_speed(port: PortId, speed: i32) -> String {
    format!(
        "port {p} ; {combi} ; pid {p} {pid} ; set {speed}\r",
        p = port.index(),
        combi = COMBI_MODES,
        pid = SPEED_PID,
        speed = speed,
    )
}

/// Timed constant-speed burst; the HAT reports `pulse done` when it ends.
pub fn motor_pulse(port: PortId, speed: i32, seconds: f64) -> String {
    format!(
        "port {p} ; {combi} ; pid {p} {pid} ; set pulse {speed} 0.0 {seconds:.2} 0\r",
        p = port.index(),
        combi = COMBI_MODES,
        pid = SPEED_PID,
        speed = speed,
        seconds = seconds,
    )
}

/// Position ramp from `start` to `end` turns over `seconds`; the HAT reports
/// `ramp done` when it ends.
pub fn motor_ramp(port: PortId, start: f64, end: f64, seconds: f64) -> String {
    format!(
        "port {p} ; {combi} ; pid {p} {pid} ; set ramp {start:.6} {end:.6} {seconds:.6} 0\r",
        p = port.index(),
        combi = COMBI_MODES,
        pid = POSITION_PID,
        start = start,
        end = end,
        seconds = seconds,
    )
}

/// One-shot readback of the port's current mode data.
pub fn motor_state_query(port: PortId, mode: u8) -> String {
    format!(
        "port {p} ; {combi} ; selonce {mode}\r",
        p = port.index(),
        combi = COMBI_MODES,
        mode = mode,
    )
}

/// Light on at `level` in [0, 1]. The negative sign is what the hardware
/// expects for lights.
pub fn light_on(port: PortId, level: f64) -> String {
    format!("port {} ; plimit 1 ; set -{:.4}\r", port.index(), level)
}

pub fn light_off(port: PortId) -> String {
    format!("port {} ; plimit 1 ; set 0\r", port.index())
}

// --- Bootloader commands ---

pub fn bootloader_clear() -> String {
    "clear\r".to_string()
}

pub fn bootloader_load(len: usize, checksum: u32) -> String {
    format!("load {} {}\r", len, checksum)
}

pub fn bootloader_signature(len: usize) -> String {
    format!("signature {}\r", len)
}

pub fn bootloader_reboot() -> String {
    "reboot\r".to_string()
}

/// STX/ETX framing wrapped around a firmware or signature blob.
pub fn frame_blob(blob: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(blob.len() + 3);
    framed.push(0x02);
    framed.extend_from_slice(blob);
    framed.push(0x03);
    framed.push(b'\r');
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_ends_in_cr() {
        let commands = [
            version(),
            list(),
            vin(),
            select_echo_off(PortId::A),
            plimit(PortId::B, 0.7),
            bias(PortId::B, 0.3),
            pwm(PortId::C, 0.5),
            coast(PortId::D),
            motor_set_speed(PortId::A, -100),
            motor_pulse(PortId::A, 50, 3.5),
            motor_ramp(PortId::B, 0.0, -0.080556, 0.016111),
            motor_state_query(PortId::A, 0),
            light_on(PortId::C, 0.8),
            light_off(PortId::C),
            bootloader_clear(),
            bootloader_load(1000, 42),
            bootloader_signature(64),
            bootloader_reboot(),
        ];
        for cmd in &commands {
            assert!(cmd.ends_with('\r'), "missing CR: {:?}", cmd);
        }
        for cmd in combi_reset(PortId::A) {
            assert!(cmd.ends_with('\r'), "missing CR: {:?}", cmd);
        }
    }

    #[test]
    fn test_tuning_commands() {
        assert_eq!(plimit(PortId::A, 0.7), "port 0 ; plimit 0.70\r");
        assert_eq!(bias(PortId::A, 0.3), "port 0 ; bias 0.30\r");
        assert_eq!(pwm(PortId::B, 1.0), "port 1 ; pwm ; set 1.00\r");
        assert_eq!(coast(PortId::D), "port 3 ; coast\r");
    }

    #[test]
    fn test_combi_reset_is_three_commands() {
        assert_eq!(
            combi_reset(PortId::C),
            [
                "port 2 ; combi 1\r",
                "port 2 ; combi 2\r",
                "port 2 ; combi 3\r",
            ]
        );
    }

    #[test]
    fn test_continuous_speed() {
        assert_eq!(
            motor_set_speed(PortId::A, 50),
            "port 0 ; combi 0 1 0 2 0 3 0 ; pid 0 0 0 s1 1 0 0.003 0.01 0 100 ; set 50\r"
        );
    }

    #[test]
    fn test_pulse() {
        assert_eq!(
            motor_pulse(PortId::B, 50, 3.5),
            "port 1 ; combi 0 1 0 2 0 3 0 ; pid 1 0 0 s1 1 0 0.003 0.01 0 100 ; set pulse 50 0.0 3.50 0\r"
        );
    }

    #[test]
    fn test_ramp() {
        assert_eq!(
            motor_ramp(PortId::B, 0.0, -0.0805555, 0.0161111),
            "port 1 ; combi 0 1 0 2 0 3 0 ; pid 1 0 1 s4 0.0027777778 0 5 0 .1 3 ; set ramp 0.000000 -0.080556 0.016111 0\r"
        );
    }

    #[test]
    fn test_state_query() {
        assert_eq!(
            motor_state_query(PortId::A, 0),
            "port 0 ; combi 0 1 0 2 0 3 0 ; selonce 0\r"
        );
    }

    #[test]
    fn test_light_commands() {
        assert_eq!(light_on(PortId::A, 1.0), "port 0 ; plimit 1 ; set -1.0000\r");
        assert_eq!(light_off(PortId::A), "port 0 ; plimit 1 ; set 0\r");
    }

    #[test]
    fn test_select_preamble() {
        assert_eq!(select_echo_off(PortId::B), "port 1 ; select ; echo 0\r");
    }

    #[test]
    fn test_blob_framing() {
        let framed = frame_blob(&[0xAA, 0xBB]);
        assert_eq!(framed, vec![0x02, 0xAA, 0xBB, 0x03, b'\r']);
    }

    #[test]
    fn test_repeated_commands_are_identical() {
        assert_eq!(plimit(PortId::A, 0.5), plimit(PortId::A, 0.5));
    }
}
