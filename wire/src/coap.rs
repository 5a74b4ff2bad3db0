//! CoAP message codec (RFC 7252 subset used by MeshCoP).
//!
//! Messages carry TLV payloads; options beyond Uri-Path, Content-Format and
//! the two Block options are preserved opaquely.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// CoAP protocol version.
pub const COAP_VERSION: u8 = 1;

/// Maximum token length.
pub const MAX_TOKEN_LENGTH: usize = 8;

/// Uri-Path option number.
pub const OPTION_URI_PATH: u16 = 11;
/// Content-Format option number.
pub const OPTION_CONTENT_FORMAT: u16 = 12;
/// Block2 option number.
pub const OPTION_BLOCK2: u16 = 23;
/// Block1 option number.
pub const OPTION_BLOCK1: u16 = 27;

/// Content-Format for application/octet-stream, used by all MeshCoP payloads.
pub const CONTENT_FORMAT_OCTET_STREAM: u16 = 42;

/// CoAP message types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// CoAP code: 3-bit class, 5-bit detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(u8);

impl Code {
    pub const EMPTY: Code = Code(0x00);
    pub const GET: Code = Code(0x01);
    pub const POST: Code = Code(0x02);
    pub const PUT: Code = Code(0x03);
    pub const DELETE: Code = Code(0x04);
    pub const CREATED: Code = Code(0x41);
    pub const DELETED: Code = Code(0x42);
    pub const VALID: Code = Code(0x43);
    pub const CHANGED: Code = Code(0x44);
    pub const CONTENT: Code = Code(0x45);
    pub const CONTINUE: Code = Code(0x5F);
    pub const BAD_REQUEST: Code = Code(0x80);
    pub const UNAUTHORIZED: Code = Code(0x81);
    pub const FORBIDDEN: Code = Code(0x83);
    pub const NOT_FOUND: Code = Code(0x84);
    pub const METHOD_NOT_ALLOWED: Code = Code(0x85);
    pub const INTERNAL_SERVER_ERROR: Code = Code(0xA0);

    pub fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1F))
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    pub fn is_request(self) -> bool {
        self.class() == 0 && self.0 != 0
    }

    pub fn is_response(self) -> bool {
        matches!(self.class(), 2..=5)
    }

    pub fn is_success(self) -> bool {
        self.class() == 2
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// A Block1/Block2 option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    /// Block number.
    pub num: u32,
    /// More blocks follow.
    pub more: bool,
    /// Size exponent; block size is `2^(szx + 4)`.
    pub szx: u8,
}

impl BlockOption {
    pub fn new(num: u32, more: bool, szx: u8) -> Self {
        Self {
            num,
            more,
            szx: szx & 0x07,
        }
    }

    /// Block size in bytes.
    pub fn size(self) -> usize {
        1usize << (self.szx + 4)
    }

    fn encode(self) -> Bytes {
        let value = (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx);
        let mut buf = BytesMut::new();
        if value == 0 {
            // Zero-length option value means num=0, more=false, szx=0.
        } else if value <= 0xFF {
            buf.put_u8(value as u8);
        } else if value <= 0xFFFF {
            buf.put_u16(value as u16);
        } else {
            buf.put_u8((value >> 16) as u8);
            buf.put_u16(value as u16);
        }
        buf.freeze()
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() > 3 {
            return Err(Error::invalid_args("block option longer than 3 bytes"));
        }
        let mut value = 0u32;
        for byte in raw {
            value = (value << 8) | u32::from(*byte);
        }
        Ok(Self {
            num: value >> 4,
            more: value & 0x08 != 0,
            szx: (value & 0x07) as u8,
        })
    }
}

/// A CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub typ: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Bytes,
    /// Options as (number, value), kept sorted by number.
    options: Vec<(u16, Bytes)>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(typ: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            typ,
            code,
            message_id,
            token: Bytes::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Build a request for the given `/`-separated URI path.
    pub fn request(confirmable: bool, code: Code, uri_path: &str) -> Self {
        let typ = if confirmable {
            MessageType::Confirmable
        } else {
            MessageType::NonConfirmable
        };
        let mut msg = Self::new(typ, code, 0);
        for segment in uri_path.split('/').filter(|s| !s.is_empty()) {
            msg.add_option(OPTION_URI_PATH, Bytes::copy_from_slice(segment.as_bytes()));
        }
        msg
    }

    /// Build the piggybacked response to a confirmable request.
    pub fn response(request: &Message, code: Code) -> Self {
        let mut msg = Self::new(MessageType::Acknowledgement, code, request.message_id);
        msg.token = request.token.clone();
        msg
    }

    /// Build an empty ACK for a confirmable message (separate-response case).
    pub fn empty_ack(request: &Message) -> Self {
        Self::new(MessageType::Acknowledgement, Code::EMPTY, request.message_id)
    }

    /// Build a Reset message for an unexpected peer message.
    pub fn reset(peer: &Message) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, peer.message_id)
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        if !self.payload.is_empty() {
            self.set_option_u16(OPTION_CONTENT_FORMAT, CONTENT_FORMAT_OCTET_STREAM);
        }
        self
    }

    /// Insert an option, keeping the list ordered by option number.
    pub fn add_option(&mut self, number: u16, value: Bytes) {
        let at = self
            .options
            .iter()
            .position(|(n, _)| *n > number)
            .unwrap_or(self.options.len());
        self.options.insert(at, (number, value));
    }

    /// Replace all instances of an option with a single uint value.
    pub fn set_option_u16(&mut self, number: u16, value: u16) {
        self.options.retain(|(n, _)| *n != number);
        let raw = if value == 0 {
            Bytes::new()
        } else if value <= 0xFF {
            Bytes::copy_from_slice(&[value as u8])
        } else {
            Bytes::copy_from_slice(&value.to_be_bytes())
        };
        self.add_option(number, raw);
    }

    pub fn option(&self, number: u16) -> Option<&Bytes> {
        self.options
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, v)| v)
    }

    /// The reassembled Uri-Path, without leading slash.
    pub fn uri_path(&self) -> String {
        let segments: Vec<&str> = self
            .options
            .iter()
            .filter(|(n, _)| *n == OPTION_URI_PATH)
            .filter_map(|(_, v)| std::str::from_utf8(v).ok())
            .collect();
        segments.join("/")
    }

    pub fn block1(&self) -> Result<Option<BlockOption>> {
        self.option(OPTION_BLOCK1)
            .map(|raw| BlockOption::decode(raw))
            .transpose()
    }

    pub fn block2(&self) -> Result<Option<BlockOption>> {
        self.option(OPTION_BLOCK2)
            .map(|raw| BlockOption::decode(raw))
            .transpose()
    }

    pub fn set_block1(&mut self, block: BlockOption) {
        self.options.retain(|(n, _)| *n != OPTION_BLOCK1);
        self.add_option(OPTION_BLOCK1, block.encode());
    }

    pub fn set_block2(&mut self, block: BlockOption) {
        self.options.retain(|(n, _)| *n != OPTION_BLOCK2);
        self.add_option(OPTION_BLOCK2, block.encode());
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Result<Bytes> {
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(Error::invalid_args("CoAP token longer than 8 bytes"));
        }
        let mut buf = BytesMut::with_capacity(4 + self.token.len() + 16 + self.payload.len());
        buf.put_u8((COAP_VERSION << 6) | ((self.typ as u8) << 4) | (self.token.len() as u8));
        buf.put_u8(self.code.raw());
        buf.put_u16(self.message_id);
        buf.put_slice(&self.token);

        let mut previous = 0u16;
        for (number, value) in &self.options {
            let delta = number - previous;
            previous = *number;
            Self::encode_option_header(&mut buf, delta, value.len())?;
            buf.put_slice(value);
        }

        if !self.payload.is_empty() {
            buf.put_u8(0xFF);
            buf.put_slice(&self.payload);
        }
        Ok(buf.freeze())
    }

    fn encode_option_header(buf: &mut BytesMut, delta: u16, len: usize) -> Result<()> {
        if len > u16::MAX as usize {
            return Err(Error::invalid_args("CoAP option too long"));
        }
        let (delta_nibble, delta_ext) = Self::split_varint(delta);
        let (len_nibble, len_ext) = Self::split_varint(len as u16);
        buf.put_u8((delta_nibble << 4) | len_nibble);
        Self::put_varint_ext(buf, delta_nibble, delta_ext);
        Self::put_varint_ext(buf, len_nibble, len_ext);
        Ok(())
    }

    fn split_varint(value: u16) -> (u8, u16) {
        match value {
            0..=12 => (value as u8, 0),
            13..=268 => (13, value - 13),
            _ => (14, value - 269),
        }
    }

    fn put_varint_ext(buf: &mut BytesMut, nibble: u8, ext: u16) {
        match nibble {
            13 => buf.put_u8(ext as u8),
            14 => buf.put_u16(ext),
            _ => {}
        }
    }

    /// Decode one datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let mut src = Bytes::copy_from_slice(datagram);
        if src.len() < 4 {
            return Err(Error::invalid_args("CoAP datagram shorter than header"));
        }
        let first = src.get_u8();
        if first >> 6 != COAP_VERSION {
            return Err(Error::invalid_args(format!(
                "unsupported CoAP version {}",
                first >> 6
            )));
        }
        let typ = MessageType::from_bits(first >> 4);
        let token_length = (first & 0x0F) as usize;
        if token_length > MAX_TOKEN_LENGTH {
            return Err(Error::invalid_args("CoAP token length nibble above 8"));
        }
        let code = Code(src.get_u8());
        let message_id = src.get_u16();
        if src.len() < token_length {
            return Err(Error::invalid_args("truncated CoAP token"));
        }
        let token = src.split_to(token_length);

        let mut options = Vec::new();
        let mut number = 0u16;
        let mut payload = Bytes::new();
        while !src.is_empty() {
            let byte = src.get_u8();
            if byte == 0xFF {
                if src.is_empty() {
                    return Err(Error::invalid_args("payload marker with empty payload"));
                }
                payload = src;
                break;
            }
            let delta = Self::read_varint(&mut src, byte >> 4)?;
            let len = Self::read_varint(&mut src, byte & 0x0F)? as usize;
            number = number
                .checked_add(delta)
                .ok_or_else(|| Error::invalid_args("CoAP option delta overflow"))?;
            if src.len() < len {
                return Err(Error::invalid_args("truncated CoAP option value"));
            }
            options.push((number, src.split_to(len)));
        }

        Ok(Self {
            typ,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }

    fn read_varint(src: &mut Bytes, nibble: u8) -> Result<u16> {
        match nibble {
            0..=12 => Ok(u16::from(nibble)),
            13 => {
                if src.is_empty() {
                    return Err(Error::invalid_args("truncated CoAP option extension"));
                }
                Ok(u16::from(src.get_u8()) + 13)
            }
            14 => {
                if src.len() < 2 {
                    return Err(Error::invalid_args("truncated CoAP option extension"));
                }
                Ok(src.get_u16() + 269)
            }
            _ => Err(Error::invalid_args("reserved CoAP option nibble 15")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let mut msg = Message::request(true, Code::POST, "c/lp");
        msg.message_id = 0x1234;
        msg.token = Bytes::copy_from_slice(&[0xAA, 0xBB]);
        let msg = msg.with_payload(vec![0x0A, 0x03, b'o', b'b', b'c']);

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.typ, MessageType::Confirmable);
        assert_eq!(decoded.code, Code::POST);
        assert_eq!(decoded.message_id, 0x1234);
        assert_eq!(decoded.uri_path(), "c/lp");
        assert_eq!(decoded.token.as_ref(), &[0xAA, 0xBB]);
        assert_eq!(decoded.payload, msg.payload);
        assert_eq!(
            decoded.option(OPTION_CONTENT_FORMAT).unwrap().as_ref(),
            &[42]
        );
    }

    #[test]
    fn test_empty_ack() {
        let mut req = Message::request(true, Code::POST, "c/la");
        req.message_id = 7;
        let ack = Message::empty_ack(&req);
        let decoded = Message::decode(&ack.encode().unwrap()).unwrap();
        assert_eq!(decoded.typ, MessageType::Acknowledgement);
        assert_eq!(decoded.code, Code::EMPTY);
        assert_eq!(decoded.message_id, 7);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_option_delta_extension() {
        let mut msg = Message::new(MessageType::Confirmable, Code::GET, 1);
        // Delta 11 then 16 (27 - 11 = 16 > 12 forces the 13-extension).
        msg.add_option(OPTION_URI_PATH, Bytes::from_static(b"c"));
        msg.set_block1(BlockOption::new(3, true, 6));
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        let block = decoded.block1().unwrap().unwrap();
        assert_eq!(block.num, 3);
        assert!(block.more);
        assert_eq!(block.size(), 1024);
    }

    #[test]
    fn test_block_option_size() {
        assert_eq!(BlockOption::new(0, false, 0).size(), 16);
        assert_eq!(BlockOption::new(0, false, 6).size(), 1024);
        let decoded = BlockOption::decode(&BlockOption::new(70, false, 4).encode()).unwrap();
        assert_eq!(decoded.num, 70);
        assert_eq!(decoded.size(), 256);
    }

    #[test]
    fn test_code_display() {
        assert_eq!(Code::CHANGED.to_string(), "2.04");
        assert_eq!(Code::NOT_FOUND.to_string(), "4.04");
        assert!(Code::CHANGED.is_success());
        assert!(!Code::BAD_REQUEST.is_success());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Message::decode(&[0xC0, 0x00, 0x00, 0x00]).is_err()); // bad version
        assert!(Message::decode(&[0x49, 0x01, 0x00, 0x01]).is_err()); // token overruns
    }
}
