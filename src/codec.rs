//! DNS wire-format codec (RFC 1035).
//!
//! Both transports exchange raw DNS messages: DoH carries them as HTTP
//! bodies, DoT as length-prefixed TLS stream frames. This module owns the
//! binary encoding shared by the two.
//!
//! Decoding expands name-compression pointers; encoding always emits
//! uncompressed names, so `decode(encode(m)) == m` holds for any well-formed
//! message.

use crate::{DnsError, RecordType};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Upper bound on a DNS message over stream transports (2-byte framing).
pub const MAX_MESSAGE_SIZE: usize = 65_535;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
/// Guard against pointer loops in malicious messages.
const MAX_POINTER_JUMPS: usize = 64;

const FLAG_QR: u16 = 0x8000;
const FLAG_RD: u16 = 0x0100;
const RCODE_MASK: u16 = 0x000F;

/// A domain name as a sequence of labels (without the root label).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// Parse a dotted ASCII hostname ("example.com").
    pub fn from_ascii(name: &str) -> Result<Self, DnsError> {
        let trimmed = name.strip_suffix('.').unwrap_or(name);
        if trimmed.is_empty() {
            return Ok(Name { labels: Vec::new() });
        }
        let mut labels = Vec::new();
        let mut total = 1; // trailing root byte
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(DnsError::MalformedMessage(format!(
                    "invalid label in name '{}'",
                    name
                )));
            }
            if !label.is_ascii() {
                return Err(DnsError::MalformedMessage(format!(
                    "non-ASCII label in name '{}'",
                    name
                )));
            }
            total += label.len() + 1;
            labels.push(label.to_string());
        }
        if total > MAX_NAME_LEN {
            return Err(DnsError::MalformedMessage(format!("name '{}' too long", name)));
        }
        Ok(Name { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Root name (".")
    pub fn root() -> Self {
        Name { labels: Vec::new() }
    }

    fn encode(&self, buf: &mut BytesMut) {
        for label in &self.labels {
            buf.put_u8(label.len() as u8);
            buf.put_slice(label.as_bytes());
        }
        buf.put_u8(0);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.labels.join("."))
        }
    }
}

/// One entry of the question section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: u16,
    pub qclass: u16,
}

/// Typed RDATA for the record types this layer cares about; everything else
/// is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(Name),
    Ns(Name),
    Ptr(Name),
    Other(Vec<u8>),
}

/// One resource record of the answer/authority/additional sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

/// A full DNS message: 12-byte header plus four sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl DnsMessage {
    /// Build a recursion-desired query for one name/type pair.
    ///
    /// The transaction id is left at 0; the session assigns a fresh one when
    /// the query is sent.
    pub fn new_query(name: Name, record_type: RecordType) -> Self {
        DnsMessage {
            id: 0,
            flags: FLAG_RD,
            questions: vec![Question {
                name,
                qtype: record_type.to_type_code(),
                qclass: 1, // IN
            }],
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    /// RCODE of the header (0 = NOERROR)
    pub fn response_code(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    /// Encode to wire format. Names are written uncompressed.
    pub fn encode(&self) -> Result<Vec<u8>, DnsError> {
        let mut buf = BytesMut::with_capacity(512);
        buf.put_u16(self.id);
        buf.put_u16(self.flags);
        buf.put_u16(section_count(self.questions.len())?);
        buf.put_u16(section_count(self.answers.len())?);
        buf.put_u16(section_count(self.authorities.len())?);
        buf.put_u16(section_count(self.additionals.len())?);

        for question in &self.questions {
            question.name.encode(&mut buf);
            buf.put_u16(question.qtype);
            buf.put_u16(question.qclass);
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            encode_record(record, &mut buf)?;
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(DnsError::MalformedMessage(format!(
                "encoded message is {} bytes, limit is {}",
                buf.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(buf.to_vec())
    }

    /// Decode from wire format, expanding compression pointers.
    pub fn decode(data: &[u8]) -> Result<Self, DnsError> {
        if data.len() < HEADER_LEN {
            return Err(DnsError::MalformedMessage(format!(
                "message is {} bytes, header needs {}",
                data.len(),
                HEADER_LEN
            )));
        }
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(DnsError::MalformedMessage(format!(
                "message is {} bytes, limit is {}",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let mut reader = Reader::new(data);
        let id = reader.read_u16()?;
        let flags = reader.read_u16()?;
        let qd_count = reader.read_u16()?;
        let an_count = reader.read_u16()?;
        let ns_count = reader.read_u16()?;
        let ar_count = reader.read_u16()?;

        let mut questions = Vec::with_capacity(qd_count as usize);
        for _ in 0..qd_count {
            let name = reader.read_name()?;
            let qtype = reader.read_u16()?;
            let qclass = reader.read_u16()?;
            questions.push(Question { name, qtype, qclass });
        }

        let answers = read_section(&mut reader, an_count)?;
        let authorities = read_section(&mut reader, ns_count)?;
        let additionals = read_section(&mut reader, ar_count)?;

        if reader.remaining() != 0 {
            return Err(DnsError::MalformedMessage(format!(
                "{} trailing bytes after last section",
                reader.remaining()
            )));
        }

        Ok(DnsMessage {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

fn section_count(len: usize) -> Result<u16, DnsError> {
    u16::try_from(len)
        .map_err(|_| DnsError::MalformedMessage(format!("section of {} records", len)))
}

fn encode_record(record: &ResourceRecord, buf: &mut BytesMut) -> Result<(), DnsError> {
    record.name.encode(buf);
    buf.put_u16(record.rtype);
    buf.put_u16(record.class);
    buf.put_u32(record.ttl);

    let mut rdata = BytesMut::new();
    match &record.rdata {
        RData::A(addr) => rdata.put_slice(&addr.octets()),
        RData::Aaaa(addr) => rdata.put_slice(&addr.octets()),
        RData::Cname(name) | RData::Ns(name) | RData::Ptr(name) => name.encode(&mut rdata),
        RData::Other(bytes) => rdata.put_slice(bytes),
    }
    let rdlen = u16::try_from(rdata.len())
        .map_err(|_| DnsError::MalformedMessage(format!("RDATA of {} bytes", rdata.len())))?;
    buf.put_u16(rdlen);
    buf.put_slice(&rdata);
    Ok(())
}

fn read_section(reader: &mut Reader<'_>, count: u16) -> Result<Vec<ResourceRecord>, DnsError> {
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(read_record(reader)?);
    }
    Ok(records)
}

fn read_record(reader: &mut Reader<'_>) -> Result<ResourceRecord, DnsError> {
    let name = reader.read_name()?;
    let rtype = reader.read_u16()?;
    let class = reader.read_u16()?;
    let ttl = reader.read_u32()?;
    let rdlen = reader.read_u16()? as usize;

    let rdata_start = reader.pos();
    let rdata = match rtype {
        1 if rdlen == 4 => {
            let octets = reader.read_bytes(4)?;
            RData::A(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        28 if rdlen == 16 => {
            let octets = reader.read_bytes(16)?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(octets);
            RData::Aaaa(Ipv6Addr::from(bytes))
        }
        5 | 2 | 12 => {
            // Names inside RDATA may themselves be compressed.
            let target = reader.read_name()?;
            if reader.pos() != rdata_start + rdlen {
                return Err(DnsError::MalformedMessage(
                    "RDATA length does not match encoded name".to_string(),
                ));
            }
            match rtype {
                5 => RData::Cname(target),
                2 => RData::Ns(target),
                _ => RData::Ptr(target),
            }
        }
        _ => RData::Other(reader.read_bytes(rdlen)?.to_vec()),
    };

    Ok(ResourceRecord {
        name,
        rtype,
        class,
        ttl,
        rdata,
    })
}

/// Cursor over a full message buffer. Name decoding needs random access for
/// compression pointers, so this wraps the whole slice rather than a
/// consuming `Buf`.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, DnsError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| DnsError::MalformedMessage("unexpected end of message".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, DnsError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DnsError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DnsError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| DnsError::MalformedMessage("unexpected end of message".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a possibly-compressed name starting at the cursor. The cursor
    /// ends up just past the name (past the first pointer if one occurred).
    fn read_name(&mut self) -> Result<Name, DnsError> {
        let mut labels = Vec::new();
        let mut total = 1;
        let mut jumps = 0;
        let mut resume_pos = None;

        loop {
            let len = self.read_u8()? as usize;
            if len == 0 {
                break;
            }
            match len & 0xC0 {
                0xC0 => {
                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        return Err(DnsError::MalformedMessage(
                            "compression pointer loop".to_string(),
                        ));
                    }
                    let low = self.read_u8()? as usize;
                    let offset = ((len & 0x3F) << 8) | low;
                    if offset >= self.buf.len() {
                        return Err(DnsError::MalformedMessage(
                            "compression pointer out of range".to_string(),
                        ));
                    }
                    if resume_pos.is_none() {
                        resume_pos = Some(self.pos);
                    }
                    self.pos = offset;
                }
                0x00 => {
                    if len > MAX_LABEL_LEN {
                        return Err(DnsError::MalformedMessage("label too long".to_string()));
                    }
                    total += len + 1;
                    if total > MAX_NAME_LEN {
                        return Err(DnsError::MalformedMessage("name too long".to_string()));
                    }
                    let bytes = self.read_bytes(len)?;
                    if !bytes.is_ascii() {
                        return Err(DnsError::MalformedMessage(
                            "non-ASCII label".to_string(),
                        ));
                    }
                    // ASCII checked above, so the conversion cannot fail.
                    labels.push(String::from_utf8_lossy(bytes).into_owned());
                }
                _ => {
                    return Err(DnsError::MalformedMessage(format!(
                        "reserved label type 0x{:02x}",
                        len & 0xC0
                    )));
                }
            }
        }

        if let Some(pos) = resume_pos {
            self.pos = pos;
        }
        Ok(Name { labels })
    }
}
