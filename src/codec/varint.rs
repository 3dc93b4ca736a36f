//! 50-bit variable-length integers.
//!
//! Unsigned values use up to six 7-bit groups, low bits first, with `0x80`
//! marking that another byte follows. A seventh byte, when present, carries
//! bits 42..50 whole. Values are taken modulo 2^50, so the encoding is never
//! longer than [`MAX_VARINT_LEN`] bytes.
//!
//! Signed values are zig-zag mapped first so small magnitudes stay short.

use bytes::BufMut;

/// Longest possible encoding.
pub const MAX_VARINT_LEN: usize = 7;

const VALUE_BITS: u32 = 50;
const VALUE_MASK: u64 = (1 << VALUE_BITS) - 1;
const GROUPS: usize = 6;

/// Append `value` (mod 2^50) to `out`.
pub fn encode_vuint50<B: BufMut + ?Sized>(value: u64, out: &mut B) {
    let mut v = value & VALUE_MASK;
    for _ in 0..GROUPS {
        let low = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.put_u8(low);
            return;
        }
        out.put_u8(low | 0x80);
    }
    out.put_u8(v as u8);
}

/// Read an unsigned varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` if `data`
/// ends before the encoding does.
#[must_use]
pub fn decode_vuint50(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(GROUPS).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    let last = *data.get(GROUPS)?;
    Some((value | (u64::from(last) << (7 * GROUPS)), GROUPS + 1))
}

/// Append a signed value, zig-zag mapped and truncated to 50 bits.
pub fn encode_vint50<B: BufMut + ?Sized>(value: i64, out: &mut B) {
    let zigzag = ((value << 1) ^ (value >> 63)) as u64;
    encode_vuint50(zigzag, out);
}

/// Read a signed varint from the front of `data`.
#[must_use]
pub fn decode_vint50(data: &[u8]) -> Option<(i64, usize)> {
    let (zigzag, used) = decode_vuint50(data)?;
    let value = (zigzag >> 1) as i64 ^ -((zigzag & 1) as i64);
    Some((value, used))
}

/// Bytes needed to encode `value`.
#[must_use]
pub fn vuint50_len(value: u64) -> usize {
    let bits = 64 - (value & VALUE_MASK).leading_zeros() as usize;
    bits.div_ceil(7).clamp(1, MAX_VARINT_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_vuint50(value, &mut out);
        out
    }

    fn signed(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_vint50(value, &mut out);
        out
    }

    #[test]
    fn test_unsigned_vectors() {
        assert_eq!(unsigned(0), [0x00]);
        assert_eq!(unsigned(1), [0x01]);
        assert_eq!(unsigned(127), [0x7f]);
        assert_eq!(unsigned(128), [0x80, 0x01]);
        assert_eq!(unsigned(300), [0xac, 0x02]);
        assert_eq!(unsigned(16_383), [0xff, 0x7f]);
        assert_eq!(unsigned(16_384), [0x80, 0x80, 0x01]);
        assert_eq!(unsigned(1 << 42), [0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert_eq!(unsigned(VALUE_MASK), [0xff; 7]);
    }

    #[test]
    fn test_unsigned_truncates_to_50_bits() {
        assert_eq!(unsigned(1 << 50), [0x00]);
        assert_eq!(unsigned(u64::MAX), [0xff; 7]);
    }

    #[test]
    fn test_signed_vectors() {
        assert_eq!(signed(0), [0x00]);
        assert_eq!(signed(-1), [0x01]);
        assert_eq!(signed(1), [0x02]);
        assert_eq!(signed(-64), [0x7f]);
        assert_eq!(signed(64), [0x80, 0x01]);
    }

    #[test]
    fn test_decode_reports_consumed() {
        assert_eq!(decode_vuint50(&[0xac, 0x02, 0xff]), Some((300, 2)));
        assert_eq!(decode_vuint50(&[0xff; 7]), Some((VALUE_MASK, 7)));
        assert_eq!(decode_vint50(&[0x01]), Some((-1, 1)));
        assert_eq!(decode_vint50(&[0x80, 0x01]), Some((64, 2)));
    }

    #[test]
    fn test_decode_premature_end() {
        assert_eq!(decode_vuint50(&[]), None);
        assert_eq!(decode_vuint50(&[0x80]), None);
        assert_eq!(decode_vuint50(&[0xff; 6]), None);
        assert_eq!(decode_vint50(&[0x80, 0x80]), None);
    }

    #[test]
    fn test_signed_extremes() {
        let min = -(1i64 << 49);
        let max = (1i64 << 49) - 1;
        for value in [min, max, -12_345, 12_345] {
            let bytes = signed(value);
            assert_eq!(decode_vint50(&bytes), Some((value, bytes.len())));
        }
    }

    #[test]
    fn test_encoded_len() {
        for value in [0, 127, 128, 16_384, 1 << 42, VALUE_MASK] {
            assert_eq!(vuint50_len(value), unsigned(value).len(), "value {value}");
        }
    }
}
