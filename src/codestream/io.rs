//! Big-endian codestream byte I/O.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{J3kError, Result};
use crate::marker::Marker;

/// Growable big-endian writer backing the codestream builder.
#[derive(Debug, Default)]
pub struct StreamWriter {
    buf: Vec<u8>,
}

impl StreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.buf.write_u8(v)?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.buf.write_u16::<BigEndian>(v)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.buf.write_u32::<BigEndian>(v)?;
        Ok(())
    }

    pub fn write_marker(&mut self, marker: Marker) -> Result<()> {
        self.write_u16(marker as u16)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Back-patch a u32 written earlier (used for Psot).
    pub fn patch_u32(&mut self, offset: usize, v: u32) -> Result<()> {
        if offset + 4 > self.buf.len() {
            return Err(J3kError::InvalidParameter(format!(
                "patch offset {offset} out of range"
            )));
        }
        BigEndian::write_u32(&mut self.buf[offset..offset + 4], v);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked big-endian reader over a codestream slice.
#[derive(Debug)]
pub struct StreamReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(J3kError::Truncated(format!(
                "need {n} bytes at offset {}, {} remain",
                self.pos,
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        let v = BigEndian::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let v = BigEndian::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    pub fn peek_u16(&self) -> Option<u16> {
        if self.remaining() >= 2 {
            Some(BigEndian::read_u16(&self.data[self.pos..]))
        } else {
            None
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    /// Advance to the next position holding a recognisable marker, for
    /// tolerant recovery after a malformed segment.
    pub fn resync_to_marker(&mut self) -> bool {
        while self.remaining() >= 2 {
            let v = BigEndian::read_u16(&self.data[self.pos..]);
            if v >= 0xFF4F && Marker::try_from(v).is_ok() {
                return true;
            }
            self.pos += 1;
        }
        self.pos = self.data.len();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_big_endian() {
        let mut w = StreamWriter::new();
        w.write_u16(0xFF4F).unwrap();
        w.write_u32(0x01020304).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0xFF, 0x4F, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_reader_roundtrip() {
        let mut w = StreamWriter::new();
        w.write_marker(Marker::StartOfCodestream).unwrap();
        w.write_u16(1234).unwrap();
        w.write_u32(567890).unwrap();
        let bytes = w.into_bytes();

        let mut r = StreamReader::new(&bytes);
        assert_eq!(r.read_u16().unwrap(), Marker::StartOfCodestream as u16);
        assert_eq!(r.read_u16().unwrap(), 1234);
        assert_eq!(r.read_u32().unwrap(), 567890);
        assert!(r.is_at_end());
    }

    #[test]
    fn test_reader_truncated() {
        let mut r = StreamReader::new(&[0xFF]);
        assert!(matches!(r.read_u16(), Err(J3kError::Truncated(_))));
    }

    #[test]
    fn test_patch_u32() {
        let mut w = StreamWriter::new();
        w.write_u32(0).unwrap();
        w.write_u8(7).unwrap();
        w.patch_u32(0, 0xAABBCCDD).unwrap();
        assert_eq!(w.into_bytes(), vec![0xAA, 0xBB, 0xCC, 0xDD, 7]);
    }

    #[test]
    fn test_resync_finds_marker() {
        let data = [0x00, 0x12, 0xFF, 0x90, 0x00];
        let mut r = StreamReader::new(&data);
        assert!(r.resync_to_marker());
        assert_eq!(r.pos(), 2);
        assert_eq!(r.peek_u16(), Some(0xFF90));
    }
}
