//! Frame checksum: CRC-32 (IEEE 802.3, reflected, poly `0xEDB88320`).

use crc::{CRC_32_ISO_HDLC, Crc, Digest};

static FRAME_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Running checksum over the pieces of one frame.
pub fn digest() -> Digest<'static, u32> {
    FRAME_CRC.digest()
}

/// One-shot checksum of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    FRAME_CRC.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn split_input_matches_one_shot() {
        let mut d = digest();
        d.update(b"1234");
        d.update(b"56789");
        assert_eq!(d.finalize(), crc32(b"123456789"));
    }
}
