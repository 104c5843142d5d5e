//! Firmware bootstrap
//!
//! A factory-fresh HAT boots into a bootloader; a provisioned one comes up
//! running firmware, possibly an older build than the one this crate embeds.
//! `run` probes which of the two is talking, uploads the embedded image if
//! needed, and only returns once the firmware has initialised all four
//! ports. The adaptor will not write a single device command before this
//! completes.
//!
//! # Upload framing
//!
//! The bootloader expects `load <len> <checksum>`, a 100 ms breather, then
//! the image wrapped in STX/ETX (`0x02 … 0x03\r`); the signature follows the
//! same way. Each step is acknowledged with the `BHBL>` prompt.

use crate::config::BOOTSTRAP_READ_TIMEOUT;
use crate::error::{Error, Result};
use crate::firmware;
use crate::gpio::DigitalOutput;
use crate::protocol::commands;
use crate::protocol::lines::LineBuffer;
use crate::transport::{write_all, Transport};
use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

const FIRMWARE_LINE: &str = "Firmware version: ";
const BOOTLOADER_LINE: &str = "BuildHAT bootloader version";
const PORTS_READY_LINE: &str = "Done initialising ports";
const PROMPT: &[u8] = b"BHBL>";

/// Maximum reads while classifying the `version` reply.
const VERSION_RETRIES: usize = 5;

/// Deadline for the firmware to bring the ports up after `reboot`.
const PORTS_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// How long the HAT is held in reset, per edge.
const RESET_DWELL: Duration = Duration::from_millis(10);

/// Settling time after releasing reset.
const RESET_SETTLE: Duration = Duration::from_millis(500);

/// Pause between an upload command and its framed payload.
const UPLOAD_PAUSE: Duration = Duration::from_millis(100);

/// What the HAT turned out to be running when probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatState {
    /// Probe did not converge on anything recognisable.
    Other,
    /// Running the expected firmware version.
    Firmware,
    /// Running firmware, but not the version this crate embeds.
    NeedNewFirmware,
    /// Sitting in the bootloader.
    Bootloader,
}

/// Probe the HAT and, if necessary, flash the embedded firmware.
///
/// Returns the state the HAT was found in. On return the firmware is
/// running and ports are initialised, whatever the starting state was.
pub(crate) fn run(
    transport: &mut dyn Transport,
    reset_pin: &mut dyn DigitalOutput,
    boot_pin: &mut dyn DigitalOutput,
) -> Result<HatState> {
    transport.set_read_timeout(BOOTSTRAP_READ_TIMEOUT)?;

    let mut io = BootstrapIo::new(transport);
    let found = probe_state(&mut io)?;

    match found {
        HatState::Firmware => {
            info!("HAT firmware is current (version {})", firmware::expected_version());
        }
        HatState::NeedNewFirmware => {
            info!("HAT firmware is stale, resetting into bootloader");
            reset_hat(reset_pin, boot_pin)?;
            upload_firmware(&mut io)?;
        }
        HatState::Bootloader => {
            info!("HAT is in bootloader, uploading firmware");
            upload_firmware(&mut io)?;
        }
        HatState::Other => {
            return Err(Error::Bootstrap(format!(
                "could not identify HAT state after {} version reads",
                VERSION_RETRIES
            )));
        }
    }

    Ok(found)
}

/// Buffered, deadline-aware reads over the raw transport.
struct BootstrapIo<'a> {
    transport: &'a mut dyn Transport,
    lines: LineBuffer,
}

impl<'a> BootstrapIo<'a> {
    fn new(transport: &'a mut dyn Transport) -> Self {
        Self {
            transport,
            lines: LineBuffer::new(),
        }
    }

    fn send(&mut self, command: &str) -> Result<()> {
        debug!("bootstrap > {:?}", command);
        write_all(&mut *self.transport, command.as_bytes())
    }

    fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; 256];
        let n = self.transport.read(&mut chunk)?;
        if n > 0 {
            self.lines.push(&chunk[..n]);
        } else {
            // Transport returned without data (sub-deadline timeout on the
            // mock); back off briefly instead of spinning.
            thread::sleep(Duration::from_millis(5));
        }
        Ok(n)
    }

    /// Next complete line, or `None` once `deadline` has elapsed.
    fn next_line(&mut self, deadline: Duration) -> Result<Option<String>> {
        let start = Instant::now();
        loop {
            if let Some(line) = self.lines.next_line() {
                debug!("bootstrap < {:?}", line);
                return Ok(Some(line));
            }
            if start.elapsed() >= deadline {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    /// Wait for the bootloader prompt, which arrives without a newline.
    fn wait_prompt(&mut self, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.lines.take_marker(PROMPT) {
                debug!("bootstrap < prompt");
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(Error::Bootstrap(
                    "bootloader prompt did not arrive".to_string(),
                ));
            }
            self.fill()?;
        }
    }
}

fn probe_state(io: &mut BootstrapIo) -> Result<HatState> {
    let expected = firmware::expected_version();
    info!("Checking HAT version (expecting {})", expected);
    io.send(&commands::version())?;

    for _ in 0..VERSION_RETRIES {
        let line = match io.next_line(BOOTSTRAP_READ_TIMEOUT)? {
            Some(line) => line,
            None => {
                warn!("no reply to version command, retrying");
                continue;
            }
        };

        if let Some(raw_version) = line.strip_prefix(FIRMWARE_LINE) {
            let reported = raw_version.split_whitespace().next().unwrap_or("");
            if reported == expected {
                return Ok(HatState::Firmware);
            }
            info!("HAT reports firmware {}, expected {}", reported, expected);
            return Ok(HatState::NeedNewFirmware);
        }

        if line.starts_with(BOOTLOADER_LINE) {
            return Ok(HatState::Bootloader);
        }

        debug!("unrecognised version reply {:?}, resending", line);
        io.send(&commands::version())?;
    }

    Ok(HatState::Other)
}

/// Hold bootzero low and pulse reset so the HAT comes back up in its
/// bootloader. Bootzero stays low afterwards; the HAT only samples it
/// while coming out of reset.
fn reset_hat(reset_pin: &mut dyn DigitalOutput, boot_pin: &mut dyn DigitalOutput) -> Result<()> {
    boot_pin.write(false)?;
    reset_pin.write(false)?;
    thread::sleep(RESET_DWELL);
    reset_pin.write(true)?;
    thread::sleep(RESET_DWELL);
    thread::sleep(RESET_SETTLE);
    Ok(())
}

fn upload_firmware(io: &mut BootstrapIo) -> Result<()> {
    io.send(&commands::bootloader_clear())?;
    io.wait_prompt(BOOTSTRAP_READ_TIMEOUT)?;

    let image = firmware::FIRMWARE;
    let checksum = firmware::checksum(image);
    info!(
        "Uploading firmware: {} bytes, checksum {}",
        image.len(),
        checksum
    );
    io.send(&commands::bootloader_load(image.len(), checksum))?;
    thread::sleep(UPLOAD_PAUSE);
    write_all(&mut *io.transport, &commands::frame_blob(image))?;
    io.wait_prompt(BOOTSTRAP_READ_TIMEOUT)?;

    let signature = firmware::SIGNATURE;
    info!("Uploading signature: {} bytes", signature.len());
    io.send(&commands::bootloader_signature(signature.len()))?;
    thread::sleep(UPLOAD_PAUSE);
    write_all(&mut *io.transport, &commands::frame_blob(signature))?;
    io.wait_prompt(BOOTSTRAP_READ_TIMEOUT)?;

    io.send(&commands::bootloader_reboot())?;
    wait_for_ports(io)
}

fn wait_for_ports(io: &mut BootstrapIo) -> Result<()> {
    let start = Instant::now();
    loop {
        let remaining = PORTS_READY_TIMEOUT
            .checked_sub(start.elapsed())
            .ok_or_else(|| {
                Error::Bootstrap("firmware did not finish initialising ports".to_string())
            })?;

        if let Some(line) = io.next_line(remaining)? {
            if line.starts_with(PORTS_READY_LINE) {
                info!("HAT ports initialised");
                return Ok(());
            }
            debug!("waiting for port init, got {:?}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::testutil::RecordingPin;
    use crate::transport::MockTransport;

    fn version_line() -> String {
        format!("Firmware version: {} 2024-01-01", firmware::expected_version())
    }

    #[test]
    fn test_firmware_version_match_skips_upload() {
        let mock = MockTransport::new();
        mock.inject_line(&version_line());

        let mut transport = mock.clone();
        let mut reset = RecordingPin::new();
        let mut boot = RecordingPin::new();

        let state = run(&mut transport, &mut reset, &mut boot).unwrap();
        assert_eq!(state, HatState::Firmware);
        assert_eq!(mock.get_written(), b"version\r");
        assert!(reset.levels().is_empty());
        assert!(boot.levels().is_empty());
    }

    #[test]
    fn test_unrecognised_lines_resend_version() {
        let mock = MockTransport::new();
        mock.inject_line("spurious echo");
        mock.inject_line(&version_line());

        let mut transport = mock.clone();
        let mut reset = RecordingPin::new();
        let mut boot = RecordingPin::new();

        let state = run(&mut transport, &mut reset, &mut boot).unwrap();
        assert_eq!(state, HatState::Firmware);
        assert_eq!(mock.get_written(), b"version\rversion\r");
    }

    #[test]
    fn test_bootloader_uploads_firmware_and_signature() {
        let mock = MockTransport::new();
        mock.inject_line("BuildHAT bootloader version 1.0");
        mock.inject_read(b"BHBL> ");
        mock.inject_read(b"BHBL> ");
        mock.inject_read(b"BHBL> ");
        mock.inject_line("Done initialising ports");

        let mut transport = mock.clone();
        let mut reset = RecordingPin::new();
        let mut boot = RecordingPin::new();

        let state = run(&mut transport, &mut reset, &mut boot).unwrap();
        assert_eq!(state, HatState::Bootloader);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"version\rclear\r");
        expected.extend_from_slice(
            commands::bootloader_load(firmware::FIRMWARE.len(), firmware::checksum(firmware::FIRMWARE))
                .as_bytes(),
        );
        expected.extend_from_slice(&commands::frame_blob(firmware::FIRMWARE));
        expected
            .extend_from_slice(commands::bootloader_signature(firmware::SIGNATURE.len()).as_bytes());
        expected.extend_from_slice(&commands::frame_blob(firmware::SIGNATURE));
        expected.extend_from_slice(b"reboot\r");

        assert_eq!(mock.get_written(), expected);
        // No reset needed when the HAT is already in its bootloader.
        assert!(reset.levels().is_empty());
    }

    #[test]
    fn test_stale_firmware_resets_into_bootloader() {
        let mock = MockTransport::new();
        mock.inject_line("Firmware version: 1000000000 2020-01-01");
        mock.inject_read(b"BHBL> BHBL> BHBL> ");
        mock.inject_line("Done initialising ports");

        let mut transport = mock.clone();
        let mut reset = RecordingPin::new();
        let mut boot = RecordingPin::new();

        let state = run(&mut transport, &mut reset, &mut boot).unwrap();
        assert_eq!(state, HatState::NeedNewFirmware);

        // Bootzero pinned low, reset pulsed low then high.
        assert_eq!(boot.levels(), vec![false]);
        assert_eq!(reset.levels(), vec![false, true]);

        let written = mock.get_written();
        assert!(written.starts_with(b"version\rclear\r"));
        assert!(written.ends_with(b"reboot\r"));
    }

    #[test]
    fn test_unidentifiable_hat_fails() {
        let mock = MockTransport::new();
        for _ in 0..VERSION_RETRIES {
            mock.inject_line("garbage");
        }

        let mut transport = mock.clone();
        let mut reset = RecordingPin::new();
        let mut boot = RecordingPin::new();

        let err = run(&mut transport, &mut reset, &mut boot).unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }
}
