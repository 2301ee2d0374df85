//! Length-prefixed binary encoding for retry store records.
//!
//! Layout of a [`RetryRecord`]: `varbytes(tx_hash) | u32_le(height) | varstring(key)`.
//! Var-length prefixes use the compact var-uint form: values below `0xFD` take
//! one byte, otherwise a marker byte (`0xFD`, `0xFE`, `0xFF`) is followed by a
//! little-endian u16, u32 or u64.

use crate::{types::RetryRecord, Error, Result};

#[derive(Debug, Default)]
pub struct Sink {
    buf: Vec<u8>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_var_uint(&mut self, v: u64) {
        if v < 0xFD {
            self.write_u8(v as u8);
        } else if v <= 0xFFFF {
            self.write_u8(0xFD);
            self.write_u16(v as u16);
        } else if v <= 0xFFFF_FFFF {
            self.write_u8(0xFE);
            self.write_u32(v as u32);
        } else {
            self.write_u8(0xFF);
            self.write_u64(v);
        }
    }

    pub fn write_var_bytes(&mut self, v: &[u8]) {
        self.write_var_uint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_var_bytes(v.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub struct Source<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Source<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn next_bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Decode(format!(
                "unexpected end of input reading {}: need {} bytes, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn next_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.next_bytes(N, what)?);
        Ok(out)
    }

    pub fn next_u8(&mut self) -> Result<u8> {
        Ok(self.next_array::<1>("u8")?[0])
    }

    pub fn next_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.next_array("u32")?))
    }

    pub fn next_var_uint(&mut self) -> Result<u64> {
        match self.next_u8()? {
            0xFD => Ok(u16::from_le_bytes(self.next_array("var uint")?) as u64),
            0xFE => Ok(u32::from_le_bytes(self.next_array("var uint")?) as u64),
            0xFF => Ok(u64::from_le_bytes(self.next_array("var uint")?)),
            v => Ok(v as u64),
        }
    }

    pub fn next_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.next_var_uint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("var bytes length {} overflows", len)))?;
        self.next_bytes(len, "var bytes")
    }

    pub fn next_string(&mut self) -> Result<String> {
        let bytes = self.next_var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Decode(format!("invalid utf-8 string: {}", e)))
    }
}

impl RetryRecord {
    pub fn encode_to(&self, sink: &mut Sink) {
        sink.write_var_bytes(&self.tx_hash);
        sink.write_u32(self.height);
        sink.write_string(&self.key);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        self.encode_to(&mut sink);
        sink.into_bytes()
    }

    pub fn decode_from(source: &mut Source<'_>) -> Result<Self> {
        let tx_hash = source
            .next_var_bytes()
            .map_err(|e| Error::Decode(format!("retry record tx hash: {}", e)))?
            .to_vec();
        let height = source
            .next_u32()
            .map_err(|e| Error::Decode(format!("retry record height: {}", e)))?;
        let key = source
            .next_string()
            .map_err(|e| Error::Decode(format!("retry record key: {}", e)))?;
        Ok(Self { tx_hash, height, key })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode_from(&mut Source::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RetryRecord {
        RetryRecord {
            tx_hash: hex::decode("253488b641eb25509bbd6bf7a744d130d2e7be24016144ae3a7049a9d2760cf0").unwrap(),
            height: 100,
            key: "abc123".to_string(),
        }
    }

    #[test]
    fn test_record_layout() {
        let bytes = sample().to_bytes();
        // 1 byte length prefix + 32 byte hash
        assert_eq!(bytes[0], 32);
        assert_eq!(&bytes[33..37], &100u32.to_le_bytes());
        assert_eq!(bytes[37], 6);
        assert_eq!(&bytes[38..], b"abc123");
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample();
        assert_eq!(RetryRecord::from_bytes(&record.to_bytes()).unwrap(), record);

        let empty = RetryRecord { tx_hash: vec![], height: u32::MAX, key: String::new() };
        assert_eq!(RetryRecord::from_bytes(&empty.to_bytes()).unwrap(), empty);
    }

    #[test]
    fn test_var_uint_boundaries() {
        for (value, encoded_len) in [(0xFCu64, 1usize), (0xFD, 3), (0xFFFF, 3), (0x1_0000, 5), (0x1_0000_0000, 9)] {
            let mut sink = Sink::new();
            sink.write_var_uint(value);
            let bytes = sink.into_bytes();
            assert_eq!(bytes.len(), encoded_len, "value {:#x}", value);
            assert_eq!(Source::new(&bytes).next_var_uint().unwrap(), value);
        }
    }

    #[test]
    fn test_long_key() {
        let record = RetryRecord { tx_hash: vec![7; 32], height: 1, key: "ab".repeat(300) };
        let bytes = record.to_bytes();
        assert_eq!(RetryRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = sample().to_bytes();
        let err = RetryRecord::from_bytes(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("key"));

        assert!(RetryRecord::from_bytes(&[]).is_err());
    }
}
