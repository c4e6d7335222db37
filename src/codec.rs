//! Fixed-header message frame and the big-endian primitive encoders it is built from.
//!
//! Wire layout (16-byte header, big-endian throughout):
//! `version(u8) | semantics(u8) | opcode(u8) | flags(u8) | request_id(u64) | payload_len(i32)`
//! followed by exactly `payload_len` payload bytes.

use thiserror::Error;

pub const HEADER_LEN: usize = 16;
pub const PROTOCOL_VERSION: u8 = 1;
/// Receive buffers on both sides; encoded messages must never exceed this.
pub const MAX_DATAGRAM: usize = 2048;
/// Payload budget once the fixed header is accounted for. A reply larger than
/// this would be silently truncated by the OS on the wire and fail to decode
/// on the other end (§6), so payload builders below truncate text to fit
/// rather than risk producing one.
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM - HEADER_LEN;

pub const OP_QUERY: u8 = 1;
pub const OP_BOOK: u8 = 2;
pub const OP_CHANGE: u8 = 3;
pub const OP_MONITOR_REGISTER: u8 = 4;
pub const OP_MONITOR_UPDATE: u8 = 5;
pub const OP_CANCEL: u8 = 6;
pub const OP_EXTEND: u8 = 7;
pub const OP_QUERY_BOOKING: u8 = 8;

const FLAG_ERROR: u8 = 0b0000_0001;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// The invocation semantics a client requests for a single message.
///
/// The server decides its own behavior from its *own* configuration (see
/// the semantics layer); this byte is carried on the wire and echoed back,
/// but a server never treats it as authoritative (Open Question 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    Alo = 0,
    Amo = 1,
}

impl Semantics {
    fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            0 => Ok(Semantics::Alo),
            1 => Ok(Semantics::Amo),
            _ => Err(DecodeError::Malformed("unknown semantics tag")),
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

impl std::str::FromStr for Semantics {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amo" => Ok(Semantics::Amo),
            "alo" => Ok(Semantics::Alo),
            other => Err(format!("unknown semantics '{other}', expected AMO or ALO")),
        }
    }
}

impl std::fmt::Display for Semantics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Semantics::Alo => "ALO",
            Semantics::Amo => "AMO",
        })
    }
}

/// A single protocol message: either a client request, a normal/error reply, or
/// a server-initiated `MONITOR_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: u8,
    pub semantics: Semantics,
    pub opcode: u8,
    pub error: bool,
    pub request_id: u64,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn request(semantics: Semantics, opcode: u8, request_id: u64, payload: Vec<u8>) -> Self {
        Message { version: PROTOCOL_VERSION, semantics, opcode, error: false, request_id, payload }
    }

    /// Builds a success/error reply to `request`, preserving version, semantics,
    /// opcode, and request id as required by the spec.
    pub fn reply_to(request: &Message, error: bool, payload: Vec<u8>) -> Self {
        Message { version: request.version, semantics: request.semantics, opcode: request.opcode, error, request_id: request.request_id, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.version);
        out.push(self.semantics.to_byte());
        out.push(self.opcode);
        out.push(if self.error { FLAG_ERROR } else { 0 });
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as i32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Malformed("header does not fit in datagram"));
        }
        let version = bytes[0];
        let semantics = Semantics::from_byte(bytes[1])?;
        let opcode = bytes[2];
        let error = bytes[3] & FLAG_ERROR != 0;
        let request_id = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
        let payload_len = i32::from_be_bytes(bytes[12..16].try_into().unwrap());
        if payload_len < 0 {
            return Err(DecodeError::Malformed("negative payload length"));
        }
        let payload_len = payload_len as usize;
        let remaining = &bytes[HEADER_LEN..];
        if payload_len > remaining.len() {
            return Err(DecodeError::Malformed("payload length exceeds remaining bytes"));
        }
        Ok(Message { version, semantics, opcode, error, request_id, payload: remaining[..payload_len].to_vec() })
    }
}

/// Writer for the length-prefixed string / fixed-width integer primitives a
/// payload is built from. This is the only place that knows the primitive
/// wire formats; handler-level encoders are built exclusively on top of it.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        PayloadWriter { buf: Vec::new() }
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        let bytes = s.as_bytes();
        self.buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PayloadReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::Malformed("field exceeds remaining payload bytes"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len_bytes = self.take(4)?;
        let len = i32::from_be_bytes(len_bytes.try_into().unwrap());
        if len < 0 {
            return Err(DecodeError::Malformed("negative string length"));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.take(8)?;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Convenience: build a single-string payload, the shape of every non-`MONITOR_UPDATE` reply.
/// Truncates `s` (at a char boundary) so the encoded message never exceeds `MAX_DATAGRAM`.
pub fn single_string_payload(s: &str) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.write_str(&truncate_to_fit(s, MAX_PAYLOAD_LEN - 4));
    w.into_bytes()
}

/// Builds the two-string `MONITOR_UPDATE` payload (facility name, full status
/// text), truncating the status text so the whole payload fits `MAX_PAYLOAD_LEN`.
pub fn monitor_update_payload(facility: &str, text: &str) -> Vec<u8> {
    let mut w = PayloadWriter::new();
    w.write_str(facility);
    let budget = MAX_PAYLOAD_LEN.saturating_sub(4 + facility.len()).saturating_sub(4);
    w.write_str(&truncate_to_fit(text, budget));
    w.into_bytes()
}

/// Truncates `s` to at most `budget` bytes, backing off to the nearest char
/// boundary so the result is still valid UTF-8. Logs a warning when it
/// actually has to cut anything.
fn truncate_to_fit(s: &str, budget: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= budget {
        return std::borrow::Cow::Borrowed(s);
    }
    let mut end = budget.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    log::warn!("truncating {}-byte payload string to {} bytes to fit MAX_DATAGRAM", s.len(), end);
    std::borrow::Cow::Owned(s[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request() {
        let mut w = PayloadWriter::new();
        w.write_str("RoomA").write_i32(0).write_i32(540).write_i32(630);
        let msg = Message::request(Semantics::Amo, OP_BOOK, 4242, w.into_bytes());
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn rejects_short_header() {
        let err = Message::decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn rejects_negative_payload_length() {
        let mut bytes = vec![1u8, 1, OP_QUERY, 0];
        bytes.extend_from_slice(&7u64.to_be_bytes());
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        let err = Message::decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn rejects_payload_length_exceeding_remaining_bytes() {
        let mut bytes = vec![1u8, 1, OP_QUERY, 0];
        bytes.extend_from_slice(&7u64.to_be_bytes());
        bytes.extend_from_slice(&100i32.to_be_bytes());
        bytes.extend_from_slice(b"short");
        let err = Message::decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn rejects_invalid_utf8_string() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2i32.to_be_bytes());
        payload.extend_from_slice(&[0xff, 0xfe]);
        let mut reader = PayloadReader::new(&payload);
        let err = reader.read_str().unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8));
    }

    #[test]
    fn reply_preserves_version_semantics_opcode_and_id() {
        let req = Message::request(Semantics::Alo, OP_CANCEL, 99, single_string_payload("x"));
        let reply = Message::reply_to(&req, true, single_string_payload("No such facility"));
        assert_eq!(reply.version, req.version);
        assert_eq!(reply.semantics, req.semantics);
        assert_eq!(reply.opcode, req.opcode);
        assert_eq!(reply.request_id, req.request_id);
        assert!(reply.error);
    }

    #[test]
    fn single_string_payload_truncates_oversized_text() {
        let huge = "x".repeat(MAX_PAYLOAD_LEN * 2);
        let payload = single_string_payload(&huge);
        let msg = Message::request(Semantics::Amo, OP_QUERY, 1, payload);
        assert!(msg.encode().len() <= MAX_DATAGRAM);
    }

    #[test]
    fn monitor_update_payload_fits_and_round_trips() {
        let huge = "y".repeat(MAX_PAYLOAD_LEN * 2);
        let payload = monitor_update_payload("RoomA", &huge);
        let msg = Message::request(Semantics::Amo, OP_MONITOR_UPDATE, 1, payload);
        let bytes = msg.encode();
        assert!(bytes.len() <= MAX_DATAGRAM);
        let decoded = Message::decode(&bytes).unwrap();
        let mut r = PayloadReader::new(&decoded.payload);
        assert_eq!(r.read_str().unwrap(), "RoomA");
        assert!(r.read_str().unwrap().len() < huge.len());
    }

    #[test]
    fn semantics_from_str_is_case_insensitive() {
        assert_eq!("amo".parse::<Semantics>().unwrap(), Semantics::Amo);
        assert_eq!("Alo".parse::<Semantics>().unwrap(), Semantics::Alo);
        assert!("bogus".parse::<Semantics>().is_err());
    }
}
