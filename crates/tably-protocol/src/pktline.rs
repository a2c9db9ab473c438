//! Pkt-line framing for control messages.
//!
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself, or "0000" for a flush marker. This is bit-compatible
//! with git's pkt-line framing.

use crate::{ProtocolError, Result};
use std::io::{Read, Write};

/// Largest encoded pkt-line, prefix included.
pub const MAX_PKT_LEN: usize = 65520;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => {
                let len = data.len() + 4;
                if len > MAX_PKT_LEN {
                    return Err(ProtocolError::InvalidPktLine(format!(
                        "line too long: {} bytes",
                        data.len()
                    )));
                }
                let mut result = format!("{:04x}", len).into_bytes();
                result.extend_from_slice(data);
                Ok(result)
            }
            Self::Flush => Ok(b"0000".to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for a flush.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Flush => None,
        }
    }

    /// Returns the data as a string, trimming one trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }
}

/// Reader for pkt-line format.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet, or `None` at a clean end of input.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.reader.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(ProtocolError::InvalidPktLine(
                        "truncated length prefix".to_string(),
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !len_buf.iter().all(u8::is_ascii_hexdigit) {
            return Err(ProtocolError::InvalidPktLine(
                "invalid length prefix".to_string(),
            ));
        }
        // All four bytes are ASCII hex digits, so both conversions succeed.
        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| ProtocolError::InvalidPktLine("invalid length prefix".to_string()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| ProtocolError::InvalidPktLine("invalid length".to_string()))?;

        if len == 0 {
            return Ok(Some(PktLine::Flush));
        }
        if len < 4 {
            return Err(ProtocolError::InvalidPktLine("length too small".to_string()));
        }
        if len > MAX_PKT_LEN {
            return Err(ProtocolError::InvalidPktLine("length too large".to_string()));
        }

        let mut data = vec![0u8; len - 4];
        self.reader.read_exact(&mut data).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::InvalidPktLine("truncated line".to_string())
            } else {
                e.into()
            }
        })?;

        Ok(Some(PktLine::Data(data)))
    }

    /// Reads all packets up to a flush. A missing flush is an error.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) => return Ok(packets),
                Some(pkt) => packets.push(pkt),
                None => {
                    return Err(ProtocolError::InvalidPktLine(
                        "missing flush".to_string(),
                    ))
                }
            }
        }
    }

    /// Reads UTF-8 text lines up to a flush, stripping trailing newlines.
    pub fn read_lines(&mut self) -> Result<Vec<String>> {
        self.read_until_flush()?
            .iter()
            .map(|pkt| {
                pkt.as_str().map(str::to_string).ok_or_else(|| {
                    ProtocolError::InvalidPktLine("line is not valid UTF-8".to_string())
                })
            })
            .collect()
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a string line, appending a newline if missing.
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write(&PktLine::Data(data))
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: arbitrary strings survive a write/read cycle.
        #[test]
        fn prop_line_roundtrip(lines in prop::collection::vec(".{0,200}", 0..20)) {
            let mut buf = Vec::new();
            {
                let mut writer = PktLineWriter::new(&mut buf);
                for line in &lines {
                    writer.write(&PktLine::from_string(line)).unwrap();
                }
                writer.flush_pkt().unwrap();
            }
            let mut reader = PktLineReader::new(buf.as_slice());
            let packets = reader.read_until_flush().unwrap();
            prop_assert_eq!(packets.len(), lines.len());
            for (pkt, line) in packets.iter().zip(&lines) {
                prop_assert_eq!(pkt.data().unwrap(), line.as_bytes());
            }
        }

        /// Property: arbitrary input never panics the reader.
        #[test]
        fn prop_reader_no_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let mut reader = PktLineReader::new(data.as_slice());
            for _ in 0..64 {
                match reader.read() {
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}
