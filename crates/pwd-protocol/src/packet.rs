//! Length-prefixed packet framing, as used by Erlang `{packet, N}` ports.
//!
//! Each packet is an unsigned big-endian length header of 1, 2 or 4 bytes
//! followed by exactly that many payload bytes.

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Largest inbound packet accepted, whatever the header allows.
pub const MAX_INBOUND_PACKET: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("packet truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("packet too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported packet header size {0} (expected 1, 2 or 4)")]
    InvalidPacketSize(u8),
}

/// Width of the length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketSize {
    One,
    Two,
    #[default]
    Four,
}

impl PacketSize {
    pub fn header_len(self) -> usize {
        match self {
            PacketSize::One => 1,
            PacketSize::Two => 2,
            PacketSize::Four => 4,
        }
    }

    /// Largest payload the header can describe.
    pub fn max_payload(self) -> usize {
        match self {
            PacketSize::One => usize::from(u8::MAX),
            PacketSize::Two => usize::from(u16::MAX),
            PacketSize::Four => u32::MAX as usize,
        }
    }

    fn put_header(self, buf: &mut BytesMut, len: usize) {
        match self {
            PacketSize::One => buf.put_u8(len as u8),
            PacketSize::Two => buf.put_u16(len as u16),
            PacketSize::Four => buf.put_u32(len as u32),
        }
    }

    fn parse_header(self, header: &[u8]) -> usize {
        header
            .iter()
            .fold(0_usize, |acc, &byte| (acc << 8) | usize::from(byte))
    }
}

impl TryFrom<u8> for PacketSize {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketSize::One),
            2 => Ok(PacketSize::Two),
            4 => Ok(PacketSize::Four),
            other => Err(ProtocolError::InvalidPacketSize(other)),
        }
    }
}

/// Frame `payload` into a single buffer: header followed by payload.
pub fn encode_packet(size: PacketSize, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
    if payload.len() > size.max_payload() {
        return Err(ProtocolError::TooLarge {
            size: payload.len(),
            max: size.max_payload(),
        });
    }

    let mut buf = BytesMut::with_capacity(size.header_len() + payload.len());
    size.put_header(&mut buf, payload.len());
    buf.put_slice(payload);
    Ok(buf)
}

/// Reads whole packets from a byte stream.
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
    size: PacketSize,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R, size: PacketSize) -> Self {
        Self { inner, size }
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between packets.
    pub fn read_packet(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut header = [0_u8; 4];
        let header = &mut header[..self.size.header_len()];
        let got = fill(&mut self.inner, header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < header.len() {
            return Err(ProtocolError::Truncated {
                expected: header.len(),
                actual: got,
            });
        }

        let len = self.size.parse_header(header);
        if len > MAX_INBOUND_PACKET {
            return Err(ProtocolError::TooLarge {
                size: len,
                max: MAX_INBOUND_PACKET,
            });
        }

        let mut payload = vec![0_u8; len];
        let got = fill(&mut self.inner, &mut payload)?;
        if got < len {
            return Err(ProtocolError::Truncated {
                expected: len,
                actual: got,
            });
        }
        Ok(Some(payload))
    }
}

/// Writes whole packets to a byte stream.
#[derive(Debug)]
pub struct PacketWriter<W> {
    inner: W,
    size: PacketSize,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(inner: W, size: PacketSize) -> Self {
        Self { inner, size }
    }

    pub fn packet_size(&self) -> PacketSize {
        self.size
    }

    /// Write one packet with a single `write_all` and flush it.
    ///
    /// Oversized payloads are rejected before anything reaches the stream.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let framed = encode_packet(self.size, payload)?;
        self.inner.write_all(&framed)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_widths() {
        assert_eq!(
            &encode_packet(PacketSize::One, b"ab").unwrap()[..],
            b"\x02ab"
        );
        assert_eq!(
            &encode_packet(PacketSize::Two, b"ab").unwrap()[..],
            b"\x00\x02ab"
        );
        assert_eq!(
            &encode_packet(PacketSize::Four, b"ab").unwrap()[..],
            b"\x00\x00\x00\x02ab"
        );
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let payload = vec![0_u8; 256];
        let err = encode_packet(PacketSize::One, &payload).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { size: 256, max: 255 }));

        let mut out = Vec::new();
        let mut writer = PacketWriter::new(&mut out, PacketSize::One);
        assert!(writer.write_packet(&payload).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_reader_yields_packets_then_eof() {
        let input = b"\x00\x02\x01\x30\x00\x01\x03".to_vec();
        let mut reader = PacketReader::new(Cursor::new(input), PacketSize::Two);
        assert_eq!(reader.read_packet().unwrap(), Some(vec![1, b'0']));
        assert_eq!(reader.read_packet().unwrap(), Some(vec![3]));
        assert_eq!(reader.read_packet().unwrap(), None);
    }

    #[test]
    fn test_zero_length_packet_is_empty_payload() {
        let mut reader = PacketReader::new(Cursor::new(vec![0_u8]), PacketSize::One);
        assert_eq!(reader.read_packet().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_truncated_header_and_payload() {
        let mut reader = PacketReader::new(Cursor::new(vec![0_u8, 0]), PacketSize::Four);
        assert!(matches!(
            reader.read_packet(),
            Err(ProtocolError::Truncated {
                expected: 4,
                actual: 2
            })
        ));

        let mut reader = PacketReader::new(Cursor::new(vec![0_u8, 5, 1, 2]), PacketSize::Two);
        assert!(matches!(
            reader.read_packet(),
            Err(ProtocolError::Truncated {
                expected: 5,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_inbound_limit() {
        let mut reader =
            PacketReader::new(Cursor::new(vec![0xff_u8, 0xff, 0xff, 0xff]), PacketSize::Four);
        assert!(matches!(
            reader.read_packet(),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_writer_and_reader_agree() {
        let mut out = Vec::new();
        {
            let mut writer = PacketWriter::new(&mut out, PacketSize::Four);
            writer.write_packet(b"first").unwrap();
            writer.write_packet(b"").unwrap();
        }
        let mut reader = PacketReader::new(Cursor::new(out), PacketSize::Four);
        assert_eq!(reader.read_packet().unwrap().as_deref(), Some(&b"first"[..]));
        assert_eq!(reader.read_packet().unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(reader.read_packet().unwrap(), None);
    }

    #[test]
    fn test_packet_size_from_config_value() {
        assert_eq!(PacketSize::try_from(2_u8).unwrap(), PacketSize::Two);
        assert!(matches!(
            PacketSize::try_from(3_u8),
            Err(ProtocolError::InvalidPacketSize(3))
        ));
    }
}
