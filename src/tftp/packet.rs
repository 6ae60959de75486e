//! TFTP wire format (RFC 1350 with the RFC 2347 OACK extension).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;
const OP_OACK: u16 = 6;

/// Largest datagram the engine ever expects: max block size plus DATA header.
pub const MAX_PACKET_SIZE: usize = super::options::MAX_BLOCK_SIZE as usize + 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short")]
    TooShort,

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("string field is not valid UTF-8")]
    InvalidString,
}

/// Error codes defined by RFC 1350 and RFC 2347.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTransferId,
    FileExists,
    NoSuchUser,
    OptionNegotiation,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTransferId => 5,
            ErrorCode::FileExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::OptionNegotiation => 8,
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileExists,
            7 => ErrorCode::NoSuchUser,
            8 => ErrorCode::OptionNegotiation,
            _ => ErrorCode::NotDefined,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::NotDefined => "not defined",
            ErrorCode::FileNotFound => "file not found",
            ErrorCode::AccessViolation => "access violation",
            ErrorCode::DiskFull => "disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "illegal operation",
            ErrorCode::UnknownTransferId => "unknown transfer id",
            ErrorCode::FileExists => "file already exists",
            ErrorCode::NoSuchUser => "no such user",
            ErrorCode::OptionNegotiation => "option negotiation failed",
        };
        write!(f, "{} ({})", text, self.as_u16())
    }
}

/// RRQ/WRQ body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub filename: String,
    pub mode: String,
    pub options: Vec<(String, String)>,
}

impl Request {
    pub fn new(filename: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self {
            filename: filename.into(),
            mode: "octet".to_string(),
            options,
        }
    }

    pub fn is_octet(&self) -> bool {
        self.mode.eq_ignore_ascii_case("octet")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq(Request),
    Wrq(Request),
    Data { block: u16, data: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
    Oack(Vec<(String, String)>),
}

impl Packet {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Packet::Error {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        match self {
            Packet::Rrq(req) => encode_request(&mut buf, OP_RRQ, req),
            Packet::Wrq(req) => encode_request(&mut buf, OP_WRQ, req),
            Packet::Data { block, data } => {
                buf.put_u16(OP_DATA);
                buf.put_u16(*block);
                buf.put_slice(data);
            }
            Packet::Ack { block } => {
                buf.put_u16(OP_ACK);
                buf.put_u16(*block);
            }
            Packet::Error { code, message } => {
                buf.put_u16(OP_ERROR);
                buf.put_u16(code.as_u16());
                put_str(&mut buf, message);
            }
            Packet::Oack(options) => {
                buf.put_u16(OP_OACK);
                for (name, value) in options {
                    put_str(&mut buf, name);
                    put_str(&mut buf, value);
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < 2 {
            return Err(PacketError::TooShort);
        }
        let opcode = buf.get_u16();
        match opcode {
            OP_RRQ => Ok(Packet::Rrq(decode_request(buf)?)),
            OP_WRQ => Ok(Packet::Wrq(decode_request(buf)?)),
            OP_DATA => {
                if buf.len() < 2 {
                    return Err(PacketError::TooShort);
                }
                let block = buf.get_u16();
                Ok(Packet::Data {
                    block,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            OP_ACK => {
                if buf.len() < 2 {
                    return Err(PacketError::TooShort);
                }
                Ok(Packet::Ack {
                    block: buf.get_u16(),
                })
            }
            OP_ERROR => {
                if buf.len() < 2 {
                    return Err(PacketError::TooShort);
                }
                let code = ErrorCode::from(buf.get_u16());
                // Some clients omit the trailing NUL
                let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
                let message = String::from_utf8_lossy(&buf[..end]).into_owned();
                Ok(Packet::Error { code, message })
            }
            OP_OACK => {
                let fields = split_fields(buf)?;
                Ok(Packet::Oack(pair_up(&fields)?))
            }
            other => Err(PacketError::UnknownOpcode(other)),
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Packet::Data { data, .. } => 4 + data.len(),
            Packet::Ack { .. } => 4,
            _ => 64,
        }
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

fn encode_request(buf: &mut BytesMut, opcode: u16, req: &Request) {
    buf.put_u16(opcode);
    put_str(buf, &req.filename);
    put_str(buf, &req.mode);
    for (name, value) in &req.options {
        put_str(buf, name);
        put_str(buf, value);
    }
}

fn decode_request(buf: &[u8]) -> Result<Request, PacketError> {
    let fields = split_fields(buf)?;
    if fields.len() < 2 {
        return Err(PacketError::Malformed("request needs filename and mode"));
    }
    let options = pair_up(&fields[2..])?;
    Ok(Request {
        filename: fields[0].clone(),
        mode: fields[1].clone(),
        options,
    })
}

/// Split a run of NUL-terminated strings.
fn split_fields(buf: &[u8]) -> Result<Vec<String>, PacketError> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    if buf.last() != Some(&0) {
        return Err(PacketError::Malformed("string field not NUL-terminated"));
    }
    buf[..buf.len() - 1]
        .split(|b| *b == 0)
        .map(|field| {
            std::str::from_utf8(field)
                .map(str::to_owned)
                .map_err(|_| PacketError::InvalidString)
        })
        .collect()
}

fn pair_up(fields: &[String]) -> Result<Vec<(String, String)>, PacketError> {
    if fields.len() % 2 != 0 {
        return Err(PacketError::Malformed("option without value"));
    }
    Ok(fields
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}
