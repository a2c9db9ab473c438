//! Control-line grammar for the smart HTTP transfer protocol.
//!
//! Every message is a block of pkt-lines terminated by a flush. Sums are
//! written as 32 hex characters; the all-zero string stands for "no sum".

use crate::pktline::{PktLineReader, PktLineWriter};
use crate::{ProtocolError, Result, Update};
use std::io::{Read, Write};
use tably_storage::Sum;

/// Content type of the ref advertisement.
pub const UPLOAD_PACK_ADVERTISEMENT: &str = "application/x-tably-upload-pack-advertisement";
/// Content type of an upload-pack request body.
pub const UPLOAD_PACK_REQUEST: &str = "application/x-tably-upload-pack-request";
/// Content type of an upload-pack ACK/NAK response.
pub const UPLOAD_PACK_RESULT: &str = "application/x-tably-upload-pack-result";
/// Content type of a packfile response.
pub const PACKFILE: &str = "application/x-tably-packfile";
/// Content type of a receive-pack request body.
pub const RECEIVE_PACK_REQUEST: &str = "application/x-tably-receive-pack-request";
/// Content type of a receive-pack response.
pub const RECEIVE_PACK_RESULT: &str = "application/x-tably-receive-pack-result";

/// Response header set to `true` when more packfile chunks follow.
pub const PACKFILE_MORE_HEADER: &str = "tably-packfile-more";

/// Cookie carrying the upload-pack session id.
pub const UPLOAD_PACK_COOKIE: &str = "upload-pack-session-id";
/// Cookie carrying the receive-pack session id.
pub const RECEIVE_PACK_COOKIE: &str = "receive-pack-session-id";

fn bad_line(line: &str) -> ProtocolError {
    ProtocolError::BadRequest(format!("unexpected line: {:?}", line))
}

fn parse_sum(hex: &str) -> Result<Sum> {
    Sum::from_hex(hex).map_err(|e| ProtocolError::BadRequest(e.to_string()))
}

fn parse_optional_sum(hex: &str) -> Result<Option<Sum>> {
    Sum::from_hex_optional(hex).map_err(|e| ProtocolError::BadRequest(e.to_string()))
}

/// Writes the ref advertisement: `<hex> <name>` per ref, then flush.
pub fn advertise_refs<W: Write>(writer: W, refs: &[(String, Sum)]) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);
    for (name, sum) in refs {
        pkt_writer.write_line(&format!("{} {}", sum, name))?;
    }
    pkt_writer.flush_pkt()?;
    pkt_writer.flush()
}

/// Parses a ref advertisement.
pub fn parse_advertisement<R: Read>(reader: R) -> Result<Vec<(String, Sum)>> {
    PktLineReader::new(reader)
        .read_lines()?
        .iter()
        .map(|line| {
            let (hex, name) = line.split_once(' ').ok_or_else(|| bad_line(line))?;
            if name.is_empty() {
                return Err(bad_line(line));
            }
            Ok((name.to_string(), parse_sum(hex)?))
        })
        .collect()
}

/// One round of an upload-pack negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackRequest {
    /// Sums the client needs.
    pub wants: Vec<Sum>,
    /// Sums the client already holds.
    pub haves: Vec<Sum>,
    /// The client has no more haves to offer.
    pub done: bool,
}

impl UploadPackRequest {
    /// Writes the request: wants, haves, optional `done`, then flush.
    pub fn encode<W: Write>(&self, writer: W) -> Result<()> {
        let mut pkt_writer = PktLineWriter::new(writer);
        for want in &self.wants {
            pkt_writer.write_line(&format!("want {}", want))?;
        }
        for have in &self.haves {
            pkt_writer.write_line(&format!("have {}", have))?;
        }
        if self.done {
            pkt_writer.write_line("done")?;
        }
        pkt_writer.flush_pkt()?;
        pkt_writer.flush()
    }

    /// Encodes the request into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Parses a request. Wants must precede haves and `done` must be last.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut request = Self::default();
        for line in PktLineReader::new(reader).read_lines()? {
            if request.done {
                return Err(bad_line(&line));
            }
            if let Some(hex) = line.strip_prefix("want ") {
                if !request.haves.is_empty() {
                    return Err(ProtocolError::BadRequest(
                        "want after have".to_string(),
                    ));
                }
                request.wants.push(parse_sum(hex)?);
            } else if let Some(hex) = line.strip_prefix("have ") {
                request.haves.push(parse_sum(hex)?);
            } else if line == "done" {
                request.done = true;
            } else {
                return Err(bad_line(&line));
            }
        }
        Ok(request)
    }
}

/// Writes `ACK <hex>` per common sum, or `NAK` when there are none, then flush.
pub fn write_acks<W: Write>(writer: W, acks: &[Sum]) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);
    if acks.is_empty() {
        pkt_writer.write_line("NAK")?;
    }
    for ack in acks {
        pkt_writer.write_line(&format!("ACK {}", ack))?;
    }
    pkt_writer.flush_pkt()?;
    pkt_writer.flush()
}

/// Parses an ACK/NAK response.
pub fn parse_acks<R: Read>(reader: R) -> Result<Vec<Sum>> {
    let mut acks = Vec::new();
    for line in PktLineReader::new(reader).read_lines()? {
        if let Some(hex) = line.strip_prefix("ACK ") {
            acks.push(parse_sum(hex)?);
        } else if line != "NAK" {
            return Err(bad_line(&line));
        }
    }
    Ok(acks)
}

/// Writes update lines `<old> <new> <dst>`, then flush.
pub fn write_updates<W: Write>(writer: W, updates: &[Update]) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);
    for update in updates {
        pkt_writer.write_line(&format!(
            "{} {} {}",
            Sum::to_hex_optional(update.old_sum.as_ref()),
            Sum::to_hex_optional(update.sum.as_ref()),
            update.dst
        ))?;
    }
    pkt_writer.flush_pkt()?;
    pkt_writer.flush()
}

/// Reads update lines up to the flush. Source names are set to the destination.
pub fn parse_updates<R: Read>(reader: &mut PktLineReader<R>) -> Result<Vec<Update>> {
    reader
        .read_lines()?
        .iter()
        .map(|line| {
            let mut parts = line.splitn(3, ' ');
            let (Some(old), Some(new), Some(dst)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(bad_line(line));
            };
            if dst.is_empty() {
                return Err(bad_line(line));
            }
            Ok(Update::new(
                parse_optional_sum(old)?,
                parse_optional_sum(new)?,
                dst,
                dst,
            ))
        })
        .collect()
}

/// Writes `unpack ok`, `continue`, flush: more objects are expected.
pub fn write_continue<W: Write>(writer: W) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);
    pkt_writer.write_line("unpack ok")?;
    pkt_writer.write_line("continue")?;
    pkt_writer.flush_pkt()?;
    pkt_writer.flush()
}

/// Writes the final status report: `unpack ok`, one `ok`/`ng` line per update, flush.
pub fn write_report<W: Write>(writer: W, updates: &[Update]) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);
    pkt_writer.write_line("unpack ok")?;
    for update in updates {
        match &update.err_msg {
            None => pkt_writer.write_line(&format!("ok {}", update.dst))?,
            Some(reason) => pkt_writer.write_line(&format!("ng {} {}", update.dst, reason))?,
        }
    }
    pkt_writer.flush_pkt()?;
    pkt_writer.flush()
}

/// Outcome of one ref in a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefStatus {
    /// Destination ref.
    pub dst: String,
    /// Rejection reason, `None` if the ref was updated.
    pub err_msg: Option<String>,
}

/// A parsed receive-pack response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivePackReply {
    /// The server wants more objects.
    Continue,
    /// The final per-ref report.
    Report(Vec<RefStatus>),
}

/// Parses a receive-pack response.
pub fn parse_receive_pack_reply<R: Read>(reader: R) -> Result<ReceivePackReply> {
    let lines = PktLineReader::new(reader).read_lines()?;
    let mut lines = lines.iter();
    match lines.next().map(String::as_str) {
        Some("unpack ok") => {}
        Some(line) => {
            return Err(ProtocolError::Protocol(format!("unpack failed: {}", line)));
        }
        None => return Err(ProtocolError::Protocol("empty status report".to_string())),
    }

    let mut statuses = Vec::new();
    for line in lines {
        if line == "continue" {
            return Ok(ReceivePackReply::Continue);
        }
        if let Some(dst) = line.strip_prefix("ok ") {
            statuses.push(RefStatus {
                dst: dst.to_string(),
                err_msg: None,
            });
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (dst, reason) = rest.split_once(' ').unwrap_or((rest, ""));
            statuses.push(RefStatus {
                dst: dst.to_string(),
                err_msg: Some(reason.to_string()),
            });
        } else {
            return Err(ProtocolError::Protocol(format!(
                "unexpected status line: {:?}",
                line
            )));
        }
    }
    Ok(ReceivePackReply::Report(statuses))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(n: u8) -> Sum {
        Sum::from_bytes([n; 16])
    }

    #[test]
    fn test_advertisement_roundtrip() {
        let refs = vec![
            ("heads/main".to_string(), sum(1)),
            ("tags/v1".to_string(), sum(2)),
        ];
        let mut out = Vec::new();
        advertise_refs(&mut out, &refs).unwrap();
        assert!(out.starts_with(format!("0030{} heads/main\n", sum(1)).as_bytes()));
        assert!(out.ends_with(b"0000"));
        assert_eq!(parse_advertisement(out.as_slice()).unwrap(), refs);
    }

    #[test]
    fn test_empty_advertisement_is_just_flush() {
        let mut out = Vec::new();
        advertise_refs(&mut out, &[]).unwrap();
        assert_eq!(out, b"0000");
        assert!(parse_advertisement(out.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_upload_pack_request_roundtrip() {
        let request = UploadPackRequest {
            wants: vec![sum(3)],
            haves: vec![sum(1), sum(2)],
            done: true,
        };
        let bytes = request.to_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains(&format!("want {}\n", sum(3))));
        assert!(text.ends_with("0009done\n0000"));
        assert_eq!(UploadPackRequest::parse(bytes.as_slice()).unwrap(), request);
    }

    #[test]
    fn test_upload_pack_request_errors() {
        let mut out = Vec::new();
        let mut w = PktLineWriter::new(&mut out);
        w.write_line(&format!("have {}", sum(1))).unwrap();
        w.write_line(&format!("want {}", sum(2))).unwrap();
        w.flush_pkt().unwrap();
        assert!(UploadPackRequest::parse(out.as_slice()).is_err());

        let mut out = Vec::new();
        let mut w = PktLineWriter::new(&mut out);
        w.write_line("fetch everything").unwrap();
        w.flush_pkt().unwrap();
        assert!(UploadPackRequest::parse(out.as_slice()).is_err());

        let mut out = Vec::new();
        let mut w = PktLineWriter::new(&mut out);
        w.write_line("want zz").unwrap();
        w.flush_pkt().unwrap();
        assert!(matches!(
            UploadPackRequest::parse(out.as_slice()),
            Err(ProtocolError::BadRequest(_))
        ));

        // Missing flush.
        let mut out = Vec::new();
        PktLineWriter::new(&mut out).write_line("done").unwrap();
        assert!(UploadPackRequest::parse(out.as_slice()).is_err());
    }

    #[test]
    fn test_acks_and_nak() {
        let mut out = Vec::new();
        write_acks(&mut out, &[]).unwrap();
        assert_eq!(out, b"0008NAK\n0000");
        assert!(parse_acks(out.as_slice()).unwrap().is_empty());

        let mut out = Vec::new();
        write_acks(&mut out, &[sum(1), sum(2)]).unwrap();
        assert_eq!(parse_acks(out.as_slice()).unwrap(), vec![sum(1), sum(2)]);
    }

    #[test]
    fn test_updates_roundtrip_with_nil_sums() {
        let updates = vec![
            Update::new(None, Some(sum(1)), "heads/alpha", "heads/alpha"),
            Update::new(Some(sum(1)), None, "heads/beta", "heads/beta"),
        ];
        let mut out = Vec::new();
        write_updates(&mut out, &updates).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.contains(&format!("{} {} heads/alpha", "0".repeat(32), sum(1))));

        let mut reader = PktLineReader::new(out.as_slice());
        assert_eq!(parse_updates(&mut reader).unwrap(), updates);
    }

    #[test]
    fn test_updates_followed_by_packfile_bytes() {
        let mut out = Vec::new();
        write_updates(
            &mut out,
            &[Update::new(None, Some(sum(1)), "heads/a", "heads/a")],
        )
        .unwrap();
        out.extend_from_slice(b"PACK\x00\x00\x00\x01");

        let mut reader = PktLineReader::new(out.as_slice());
        assert_eq!(parse_updates(&mut reader).unwrap().len(), 1);
        assert_eq!(reader.into_inner(), b"PACK\x00\x00\x00\x01");
    }

    #[test]
    fn test_report_roundtrip() {
        let ok = Update::new(None, Some(sum(1)), "heads/a", "heads/a");
        let mut ng = Update::new(Some(sum(2)), Some(sum(1)), "heads/beta", "heads/beta");
        ng.err_msg = Some("remote ref updated since checkout".to_string());

        let mut out = Vec::new();
        write_report(&mut out, &[ok, ng]).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.contains("ng heads/beta remote ref updated since checkout\n"));

        assert_eq!(
            parse_receive_pack_reply(out.as_slice()).unwrap(),
            ReceivePackReply::Report(vec![
                RefStatus {
                    dst: "heads/a".to_string(),
                    err_msg: None
                },
                RefStatus {
                    dst: "heads/beta".to_string(),
                    err_msg: Some("remote ref updated since checkout".to_string())
                },
            ])
        );
    }

    #[test]
    fn test_continue() {
        let mut out = Vec::new();
        write_continue(&mut out).unwrap();
        assert_eq!(
            parse_receive_pack_reply(out.as_slice()).unwrap(),
            ReceivePackReply::Continue
        );
    }
}
