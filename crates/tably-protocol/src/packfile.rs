//! Packfile framing for object transfer.
//!
//! A packfile is an 8-byte header (`PACK` + big-endian version) followed
//! by a sequence of frames. Each frame header packs the object type and
//! payload length into a varint:
//!
//! ```text
//! first byte:  [more:1][type:3][len 0..4]
//! next bytes:  [more:1][len next 7 bits]   (least significant group first)
//! ```
//!
//! Objects are not compressed individually; the HTTP layer gzips the
//! whole stream.

use crate::{ProtocolError, Result};
use std::io::{Read, Write};
use tably_storage::ObjectType;

/// Magic bytes at the start of a packfile.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Packfile version we support.
const PACK_VERSION: u32 = 1;
/// Size of the packfile header in bytes.
pub const HEADER_LEN: usize = 8;
/// Upper bound on the buffer reserved before an object's bytes arrive.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Writes objects into a packfile stream.
pub struct PackfileWriter<W> {
    writer: W,
    written: usize,
}

impl<W: Write> PackfileWriter<W> {
    /// Creates a writer and emits the packfile header.
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(PACK_SIGNATURE)?;
        writer.write_all(&PACK_VERSION.to_be_bytes())?;
        Ok(Self {
            writer,
            written: HEADER_LEN,
        })
    }

    /// Frame-encodes and writes one object.
    pub fn write_object(&mut self, object_type: ObjectType, data: &[u8]) -> Result<()> {
        let mut header = [0u8; 11];
        let header_len = encode_frame_header(object_type, data.len() as u64, &mut header);
        self.writer.write_all(&header[..header_len])?;
        self.writer.write_all(data)?;
        self.written += header_len + data.len();
        Ok(())
    }

    /// Total bytes written so far, header included.
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Flushes and returns the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Encodes a frame header into `out`, returning the number of bytes used.
fn encode_frame_header(object_type: ObjectType, size: u64, out: &mut [u8; 11]) -> usize {
    let mut first_byte = (object_type.pack_type() << 4) | ((size & 0x0F) as u8);
    let mut remaining = size >> 4;
    if remaining > 0 {
        first_byte |= 0x80;
    }
    out[0] = first_byte;

    let mut n = 1;
    while remaining > 0 {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        out[n] = byte;
        n += 1;
    }
    n
}

/// Returns the encoded size of a frame carrying `len` payload bytes.
pub fn frame_len(len: usize) -> usize {
    let mut header = 1;
    let mut remaining = (len as u64) >> 4;
    while remaining > 0 {
        header += 1;
        remaining >>= 7;
    }
    header + len
}

/// Reads objects out of a packfile stream.
pub struct PackfileReader<R> {
    reader: R,
    max_object_size: u64,
}

impl<R: Read> PackfileReader<R> {
    /// Creates a reader, validating the packfile header.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::InvalidPackfile("packfile too small".to_string())
            } else {
                e.into()
            }
        })?;

        if &header[0..4] != PACK_SIGNATURE {
            return Err(ProtocolError::InvalidPackfile(
                "invalid signature".to_string(),
            ));
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != PACK_VERSION {
            return Err(ProtocolError::InvalidPackfile(format!(
                "unsupported version: {}",
                version
            )));
        }

        Ok(Self {
            reader,
            max_object_size: u32::MAX as u64,
        })
    }

    /// Caps the payload size a single frame may declare.
    pub fn with_max_object_size(mut self, max: u64) -> Self {
        self.max_object_size = max;
        self
    }

    /// Reads the next object, or `None` at the end of the stream.
    pub fn read_object(&mut self) -> Result<Option<(ObjectType, Vec<u8>)>> {
        let mut byte = [0u8; 1];
        match self.reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let first_byte = byte[0];
        let object_type = ObjectType::from_pack_type((first_byte >> 4) & 0x07)
            .map_err(|e| ProtocolError::InvalidPackfile(e.to_string()))?;
        let mut size = (first_byte & 0x0F) as u64;
        let mut shift = 4u32;

        let mut more = first_byte & 0x80 != 0;
        while more {
            self.read_byte(&mut byte, "unexpected end in size")?;
            if shift > 63 {
                return Err(ProtocolError::InvalidPackfile("size overflow".to_string()));
            }
            let group = (byte[0] & 0x7F) as u64;
            if shift > 57 && group >> (64 - shift) != 0 {
                return Err(ProtocolError::InvalidPackfile("size overflow".to_string()));
            }
            size |= group << shift;
            shift += 7;
            more = byte[0] & 0x80 != 0;
        }

        if size > self.max_object_size {
            return Err(ProtocolError::InvalidPackfile(format!(
                "object too large: {} bytes",
                size
            )));
        }

        // The declared size is untrusted until the bytes actually arrive.
        let mut data = Vec::with_capacity(size.min(PREALLOC_LIMIT) as usize);
        (&mut self.reader).take(size).read_to_end(&mut data)?;
        if data.len() as u64 != size {
            return Err(ProtocolError::InvalidPackfile(
                "truncated object".to_string(),
            ));
        }

        Ok(Some((object_type, data)))
    }

    fn read_byte(&mut self, byte: &mut [u8; 1], context: &str) -> Result<()> {
        self.reader.read_exact(byte).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::InvalidPackfile(context.to_string())
            } else {
                e.into()
            }
        })
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
