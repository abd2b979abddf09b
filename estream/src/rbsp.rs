//! RBSP extraction: removal of emulation-prevention bytes from a NAL
//! unit payload.

use crate::Error;

/// Collapses `00 00 03` sequences to `00 00`, yielding the raw byte
/// sequence payload. The `03` is stripped only when it follows exactly two
/// (or more) zero bytes, so `00 03` and lone `03` bytes pass through.
pub fn to_rbsp(escaped: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    out.try_reserve(escaped.len())
        .map_err(|_| Error::Alloc(escaped.len()))?;
    let mut zeros = 0u32;
    for &b in escaped {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::to_rbsp;
    use proptest::prelude::*;

    /// Inserts emulation-prevention bytes; inverse of [to_rbsp] for valid
    /// payloads.
    fn escape(rbsp: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(rbsp.len());
        let mut zeros = 0u32;
        for &b in rbsp {
            if zeros >= 2 && b <= 3 {
                out.push(3);
                zeros = 0;
            }
            if b == 0 {
                zeros += 1;
            } else {
                zeros = 0;
            }
            out.push(b);
        }
        out
    }

    #[test]
    fn strips_emulation_bytes() {
        assert_eq!(
            to_rbsp(&[0x42, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]).unwrap(),
            &[0x42, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00][..]
        );
    }

    #[test]
    fn keeps_unescaped_three() {
        assert_eq!(to_rbsp(&[0x00, 0x03, 0x00]).unwrap(), &[0x00, 0x03, 0x00][..]);
        assert_eq!(to_rbsp(&[0x03, 0x03]).unwrap(), &[0x03, 0x03][..]);
    }

    #[test]
    fn consecutive_escapes() {
        assert_eq!(
            to_rbsp(&[0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00]).unwrap(),
            &[0x00, 0x00, 0x00, 0x00, 0x00][..]
        );
    }

    #[test]
    fn long_zero_run() {
        // The escape may legally follow more than two zeros.
        assert_eq!(
            to_rbsp(&[0x00, 0x00, 0x00, 0x03, 0x02]).unwrap(),
            &[0x00, 0x00, 0x00, 0x02][..]
        );
    }

    proptest! {
        /// Escaping then unescaping is the identity for any payload.
        #[test]
        fn round_trip(rbsp in proptest::collection::vec(0u8..=4, 0..256)) {
            prop_assert_eq!(to_rbsp(&escape(&rbsp)).unwrap(), rbsp);
        }
    }
}
