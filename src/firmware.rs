//! Embedded firmware image, signature, and expected version
//!
//! The Build HAT ships from the factory running only a bootloader; the host
//! is responsible for carrying the firmware image and pushing it over the
//! serial line on first contact. The blobs live in `data/` and are compiled
//! into the library so a deployed binary has no filesystem dependency.
//!
//! The checksum sent with the `load` command is a 32-bit shift-and-XOR
//! register over the image bytes (polynomial `0x1D872B41`, initial value 1).

/// Firmware image uploaded to the bootloader.
pub static FIRMWARE: &[u8] = include_bytes!("../data/firmware.bin");

/// Detached signature for [`FIRMWARE`], uploaded after the image.
pub static SIGNATURE: &[u8] = include_bytes!("../data/signature.bin");

const VERSION_RAW: &str = include_str!("../data/version");

/// Version string the running firmware is expected to report.
///
/// Compared against the first whitespace-delimited field after
/// `"Firmware version: "` in the HAT's `version` reply.
pub fn expected_version() -> &'static str {
    VERSION_RAW.trim_end()
}

/// Checksum of a firmware image, as expected by the bootloader `load` command.
///
/// 32-bit register initialised to 1. Per byte: shift left (XOR with the
/// polynomial `0x1D872B41` when the high bit was set), then XOR the byte in.
pub fn checksum(data: &[u8]) -> u32 {
    let mut c: u32 = 1;
    for &b in data {
        if c & 0x8000_0000 != 0 {
            c = (c << 1) ^ 0x1D87_2B41;
        } else {
            c <<= 1;
        }
        c ^= b as u32;
    }
    c
}
