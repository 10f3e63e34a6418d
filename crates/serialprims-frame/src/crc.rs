//! CRC-16/CCITT (polynomial 0x1021, no reflection, no final xor).
//!
//! The register seed differs per protocol and must never be shared:
//! binary frames seed with [`FRAME_CRC_INIT`], console inner messages with
//! [`CONSOLE_CRC_INIT`].

use crc::{Crc, Digest, CRC_16_XMODEM};

/// Initial register value for binary frames (CCITT-FALSE).
pub const FRAME_CRC_INIT: u16 = 0xFFFF;

/// Initial register value for console inner messages (XMODEM).
pub const CONSOLE_CRC_INIT: u16 = 0x0000;

// XMODEM is plain 0x1021 with init 0; every other seed goes through
// `digest_with_initial`.
static CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute CRC-16/CCITT over `data` starting from `initial`.
pub fn crc16_ccitt(data: &[u8], initial: u16) -> u16 {
    let mut digest = CCITT.digest_with_initial(initial);
    digest.update(data);
    digest.finalize()
}

/// Incremental CRC-16/CCITT over several discontiguous spans.
#[derive(Clone)]
pub struct Crc16Ccitt {
    digest: Digest<'static, u16>,
}

impl Crc16Ccitt {
    /// Start a digest seeded with `initial`.
    pub fn new(initial: u16) -> Self {
        Self {
            digest: CCITT.digest_with_initial(initial),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    pub fn finalize(self) -> u16 {
        self.digest.finalize()
    }
}

impl std::fmt::Debug for Crc16Ccitt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc16Ccitt").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_INPUT: &[u8] = b"123456789";

    #[test]
    fn check_value_frame_seed() {
        assert_eq!(crc16_ccitt(CHECK_INPUT, FRAME_CRC_INIT), 0x29B1);
    }

    #[test]
    fn check_value_console_seed() {
        assert_eq!(crc16_ccitt(CHECK_INPUT, CONSOLE_CRC_INIT), 0x31C3);
    }

    #[test]
    fn empty_input_returns_seed() {
        assert_eq!(crc16_ccitt(&[], FRAME_CRC_INIT), 0xFFFF);
        assert_eq!(crc16_ccitt(&[], CONSOLE_CRC_INIT), 0x0000);
        assert_eq!(crc16_ccitt(&[], 0x1D0F), 0x1D0F);
    }

    #[test]
    fn seeds_are_not_interchangeable() {
        let data = [0x01, 0x02, 0x03];
        assert_ne!(
            crc16_ccitt(&data, FRAME_CRC_INIT),
            crc16_ccitt(&data, CONSOLE_CRC_INIT)
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut digest = Crc16Ccitt::new(FRAME_CRC_INIT);
        digest.update(&CHECK_INPUT[..4]);
        digest.update(&[]);
        digest.update(&CHECK_INPUT[4..]);
        assert_eq!(digest.finalize(), 0x29B1);
    }

    #[test]
    fn concrete_frame_header() {
        let bytes = [0x0C, 0x00, 0x01, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x01, 0x02];
        assert_eq!(crc16_ccitt(&bytes, FRAME_CRC_INIT), 0x17D7);
    }
}
