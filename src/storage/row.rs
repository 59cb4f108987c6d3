//! Row encoding: a row is `(a: u32, b: up to 11 bytes + NUL)`. On disk a
//! row is exactly the 16-byte payload of a leaf cell — 12 bytes of `b`
//! followed by 4 little-endian bytes of `a`. `b` doubles as the cell's
//! key; there is no separate copy (spec.md §3, §4.7: "the canonical
//! order adopted here is `b` then `a`").
use crate::err;
use crate::errors::Error;

pub const KEY_SIZE: usize = 12;
pub const MAX_KEY_LEN: usize = KEY_SIZE - 1;
pub const ROW_SIZE: usize = KEY_SIZE + 4;

/// A decoded table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub a: u32,
    pub b: [u8; KEY_SIZE],
}

impl Row {
    /// Builds a row from a non-negative integer and a string key no
    /// longer than 11 bytes, NUL-padding `b` to `KEY_SIZE`.
    pub fn new(a: u32, b: &str) -> Result<Self, Error> {
        let buf = encode_key(b)?;
        Ok(Row { a, b: buf })
    }

    /// The key's printable representation, with the NUL padding and
    /// anything past the first NUL stripped off.
    pub fn b_str(&self) -> String {
        key_to_str(&self.b)
    }

    pub fn encode(&self) -> [u8; ROW_SIZE] {
        let mut out = [0u8; ROW_SIZE];
        out[..KEY_SIZE].copy_from_slice(&self.b);
        out[KEY_SIZE..].copy_from_slice(&self.a.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != ROW_SIZE {
            return Err(err!(
                Storage,
                "row payload size mismatch: expected {} got {}",
                ROW_SIZE,
                bytes.len()
            ));
        }
        let mut b = [0u8; KEY_SIZE];
        b.copy_from_slice(&bytes[..KEY_SIZE]);
        let a = u32::from_le_bytes(bytes[KEY_SIZE..].try_into().unwrap());
        Ok(Row { a, b })
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.a, self.b_str())
    }
}

/// Encodes a lookup/delete key to the fixed, NUL-padded 12-byte shape
/// cells store, for use in binary search comparisons.
pub fn encode_key(b: &str) -> Result<[u8; KEY_SIZE], Error> {
    let bytes = b.as_bytes();
    if bytes.len() > MAX_KEY_LEN {
        return Err(Error::Command(
            "String for column `b` is too long.".to_string(),
        ));
    }
    let mut buf = [0u8; KEY_SIZE];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

pub fn key_to_str(key: &[u8; KEY_SIZE]) -> String {
    let end = key.iter().position(|&b| b == 0).unwrap_or(KEY_SIZE);
    String::from_utf8_lossy(&key[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let row = Row::new(7, "hello").unwrap();
        let encoded = row.encode();
        let decoded = Row::decode(&encoded).unwrap();
        assert_eq!(decoded, row);
        assert_eq!(decoded.b_str(), "hello");
    }

    #[test]
    fn rejects_strings_over_eleven_bytes() {
        assert!(Row::new(1, "12345678901").is_ok());
        assert!(Row::new(1, "123456789012").is_err());
    }

    #[test]
    fn b_then_a_byte_layout() {
        let row = Row::new(0x0102_0304, "ab").unwrap();
        let encoded = row.encode();
        assert_eq!(&encoded[..2], b"ab");
        assert_eq!(&encoded[12..], &[0x04, 0x03, 0x02, 0x01]);
    }
}
