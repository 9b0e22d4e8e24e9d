//! DNS wire-format encoding and decoding.
//!
//! Hand-rolled RFC 1035 messages: the 12-byte header, length-prefixed
//! QNAME labels, and a single synthesized TXT answer in responses.
//! Responses compress the answer name with the two-byte pointer
//! `0xC0 0x0C` back to the question, the only compression this codec
//! understands.
//!
//! All parsing goes through a bounds-checked [`Cursor`]; an overrun
//! surfaces as [`TunnelError::Truncated`] instead of a panic.

use crate::TunnelError;

/// DNS header length (RFC 1035 §4.1.1)
pub const HEADER_LEN: usize = 12;

/// Maximum UDP DNS message size (RFC 1035)
pub const MAX_DNS_UDP_SIZE: usize = 512;

/// Maximum bytes in a single TXT character-string
pub const MAX_TXT_STRING: usize = 255;

/// Maximum bytes per QNAME label (RFC 1035)
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum total QNAME length
pub const MAX_QNAME_LEN: usize = 253;

const TYPE_TXT: u16 = 16;
const CLASS_IN: u16 = 1;
const TTL_SECS: u32 = 60;

/// Transaction id used for all client queries. Each query goes out on a
/// fresh ephemeral socket, so ids never need to disambiguate in-flight
/// exchanges.
const QUERY_TRANSACTION_ID: u16 = 0x1337;

/// Bounds-checked reader over a raw DNS message.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn read_u8(&mut self) -> Result<u8, TunnelError> {
        let b = *self.buf.get(self.pos).ok_or(TunnelError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, TunnelError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TunnelError> {
        let end = self.pos.checked_add(n).ok_or(TunnelError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(TunnelError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), TunnelError> {
        self.take(n).map(|_| ())
    }
}

/// A parsed DNS query: the question's domain name plus enough layout
/// information to echo the question section back verbatim.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// Transaction id from the header
    pub transaction_id: u16,
    /// QNAME labels joined with `.` (original case preserved; payload
    /// labels may be case-sensitive base64url)
    pub domain: String,
    /// Byte length of the question section (QNAME + QTYPE + QCLASS)
    pub question_len: usize,
}

/// Parse a DNS query packet.
///
/// Walks the label-length-prefixed QNAME starting at offset 12 until the
/// zero label. Fails with [`TunnelError::Truncated`] on short input or a
/// label claiming more bytes than remain.
pub fn parse_query(packet: &[u8]) -> Result<ParsedQuery, TunnelError> {
    if packet.len() < HEADER_LEN {
        return Err(TunnelError::Truncated);
    }

    let transaction_id = u16::from_be_bytes([packet[0], packet[1]]);

    let mut cur = Cursor::new(packet);
    cur.skip(HEADER_LEN)?;

    let mut parts: Vec<String> = Vec::new();
    loop {
        let len = cur.read_u8()? as usize;
        if len == 0 {
            break;
        }
        let label = cur.take(len)?;
        parts.push(String::from_utf8_lossy(label).into_owned());
    }

    // QTYPE + QCLASS
    cur.skip(4)?;

    Ok(ParsedQuery {
        transaction_id,
        domain: parts.join("."),
        question_len: cur.pos() - HEADER_LEN,
    })
}

/// Build a TXT response to a parsed query.
///
/// Copies the request header (setting QR and RA, clearing RCODE), echoes
/// the question section verbatim, and appends one TXT answer whose
/// character-string is `payload` truncated to 255 bytes. The composed
/// size is checked against the 512-byte UDP limit before any bytes are
/// written; an oversized question yields [`TunnelError::Oversize`].
pub fn build_response(
    query: &[u8],
    question_len: usize,
    payload: &[u8],
) -> Result<Vec<u8>, TunnelError> {
    if query.len() < HEADER_LEN + question_len {
        return Err(TunnelError::Truncated);
    }

    let txt = &payload[..payload.len().min(MAX_TXT_STRING)];

    // NAME ptr (2) + TYPE (2) + CLASS (2) + TTL (4) + RDLENGTH (2) + len byte + data
    let answer_len = 12 + 1 + txt.len();
    let total = HEADER_LEN + question_len + answer_len;
    if total > MAX_DNS_UDP_SIZE {
        return Err(TunnelError::Oversize(MAX_DNS_UDP_SIZE));
    }

    let mut packet = Vec::with_capacity(total);
    packet.extend_from_slice(&query[..HEADER_LEN]);
    packet[2] |= 0x80; // QR: response
    packet[3] |= 0x80; // RA: recursion available
    packet[3] &= 0xf0; // RCODE: no error
    packet[4..6].copy_from_slice(&1u16.to_be_bytes()); // QDCOUNT: one echoed question
    packet[6..8].copy_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    packet[8..12].fill(0); // NSCOUNT, ARCOUNT

    packet.extend_from_slice(&query[HEADER_LEN..HEADER_LEN + question_len]);

    packet.extend_from_slice(&[0xc0, 0x0c]); // NAME: pointer to question
    packet.extend_from_slice(&TYPE_TXT.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    packet.extend_from_slice(&TTL_SECS.to_be_bytes());
    packet.extend_from_slice(&((1 + txt.len()) as u16).to_be_bytes()); // RDLENGTH
    packet.push(txt.len() as u8);
    packet.extend_from_slice(txt);

    Ok(packet)
}

/// Build a Name Error (RCODE 3) response: header copy with QR/RA set,
/// question passed through unmodified, no answer.
pub fn build_error_response(query: &[u8], question_len: usize) -> Vec<u8> {
    let question_end = (HEADER_LEN + question_len).min(query.len());

    let mut packet = Vec::with_capacity(question_end);
    packet.extend_from_slice(&query[..HEADER_LEN.min(query.len())]);
    packet.resize(HEADER_LEN, 0);
    packet[2] |= 0x80; // QR
    packet[3] |= 0x80; // RA
    packet[3] = (packet[3] & 0xf0) | 0x03; // RCODE: name error
    packet[4..6].copy_from_slice(&1u16.to_be_bytes()); // QDCOUNT: one echoed question
    packet[6..12].fill(0); // ANCOUNT, NSCOUNT, ARCOUNT

    if question_end > HEADER_LEN {
        packet.extend_from_slice(&query[HEADER_LEN..question_end]);
    }
    packet
}

/// Build a standard TXT query for `domain`.
pub fn build_query(domain: &str) -> Vec<u8> {
    let mut packet = Vec::new();

    packet.extend_from_slice(&QUERY_TRANSACTION_ID.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, RD
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT: 1 question
    packet.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    for label in domain.split('.').filter(|l| !l.is_empty()) {
        packet.push(label.len().min(MAX_LABEL_LEN) as u8);
        packet.extend_from_slice(&label.as_bytes()[..label.len().min(MAX_LABEL_LEN)]);
    }
    packet.push(0);

    packet.extend_from_slice(&TYPE_TXT.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());

    packet
}

/// Extract the first TXT character-string from a DNS response.
///
/// Skips the header and question section, handles either a compression
/// pointer or literal labels in the answer name, and returns the raw
/// bytes of the first character-string. The caller decodes them with
/// the configured [`Encoding`](crate::Encoding).
pub fn parse_response_txt(packet: &[u8]) -> Result<Vec<u8>, TunnelError> {
    if packet.len() < HEADER_LEN {
        return Err(TunnelError::Truncated);
    }

    let ancount = u16::from_be_bytes([packet[6], packet[7]]);
    if ancount == 0 {
        return Err(TunnelError::Truncated);
    }

    let mut cur = Cursor::new(packet);
    cur.skip(HEADER_LEN)?;

    // Question QNAME
    loop {
        let len = cur.read_u8()? as usize;
        if len == 0 {
            break;
        }
        cur.skip(len)?;
    }
    cur.skip(4)?; // QTYPE + QCLASS

    // Answer NAME: either a compression pointer or literal labels
    let first = cur.read_u8()?;
    if first & 0xc0 == 0xc0 {
        cur.skip(1)?;
    } else {
        let mut len = first as usize;
        while len != 0 {
            cur.skip(len)?;
            len = cur.read_u8()? as usize;
        }
    }

    let rtype = cur.read_u16()?;
    cur.skip(6)?; // CLASS + TTL
    let rdlength = cur.read_u16()? as usize;
    if rtype != TYPE_TXT || rdlength == 0 {
        return Err(TunnelError::Truncated);
    }

    let rdata = cur.take(rdlength)?;
    let txt_len = rdata[0] as usize;
    if 1 + txt_len > rdata.len() {
        return Err(TunnelError::Truncated);
    }

    Ok(rdata[1..1 + txt_len].to_vec())
}
