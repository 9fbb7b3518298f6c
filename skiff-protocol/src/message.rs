//! Message envelopes: method name, message kind and sequence id.
//!
//! Strict envelope (default):
//!
//! ```text
//! +-----------------------+-------------+-----------+
//! | 0x8001_0000 | kind    | name string | seq_id    |
//! | 4 bytes               | 4 + n bytes | 4 bytes   |
//! +-----------------------+-------------+-----------+
//! ```
//!
//! Non-strict envelope: name string, kind byte, seq id. The struct payload
//! follows the envelope directly.

use crate::codec::{CodecOptions, Decoder, Encoder};
use crate::error::{CodecError, EncodeError, ProtocolError};
use crate::exception::ApplicationException;
use crate::structs::ThriftStruct;
use bytes::Bytes;
use std::fmt;

/// Version word of the strict binary protocol.
pub const VERSION_1: u32 = 0x8001_0000;

/// Mask selecting the version bits of the first envelope word.
pub const VERSION_MASK: u32 = 0xFFFF_0000;

/// RPC message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns whether the sender of this kind expects a response.
    pub fn expects_reply(self) -> bool {
        self == MessageType::Call
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Call => write!(f, "CALL"),
            MessageType::Reply => write!(f, "REPLY"),
            MessageType::Exception => write!(f, "EXCEPTION"),
            MessageType::Oneway => write!(f, "ONEWAY"),
        }
    }
}

/// Envelope preceding every message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub kind: MessageType,
    pub seq_id: i32,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, kind: MessageType, seq_id: i32) -> Self {
        Self {
            name: name.into(),
            kind,
            seq_id,
        }
    }
}

/// Writes an envelope using the encoder's `strict_write` setting.
pub fn write_message_begin(enc: &mut Encoder, header: &MessageHeader) -> Result<(), EncodeError> {
    if enc.options().strict_write {
        let word = VERSION_1 | u32::from(header.kind.as_u8());
        enc.write_i32(word as i32);
        enc.write_string(&header.name)?;
        enc.write_i32(header.seq_id);
    } else {
        enc.write_string(&header.name)?;
        enc.write_byte(header.kind.as_u8() as i8);
        enc.write_i32(header.seq_id);
    }
    Ok(())
}

/// Reads an envelope in either strict or non-strict form.
///
/// Non-strict envelopes are rejected when the decoder's `strict_read` is set.
pub fn read_envelope(dec: &mut Decoder) -> Result<MessageHeader, CodecError> {
    let word = dec.read_i32()?;
    if word < 0 {
        let word = word as u32;
        if word & VERSION_MASK != VERSION_1 {
            return Err(ProtocolError::BadVersion(word).into());
        }
        let kind = MessageType::try_from((word & 0xFF) as u8)?;
        let name = dec.read_string()?;
        let seq_id = dec.read_i32()?;
        Ok(MessageHeader { name, kind, seq_id })
    } else {
        if dec.options().strict_read {
            return Err(ProtocolError::MissingVersion.into());
        }
        // The first word was the name length.
        let name = dec.read_string_body(word)?;
        let kind = MessageType::try_from(dec.read_byte()? as u8)?;
        let seq_id = dec.read_i32()?;
        Ok(MessageHeader { name, kind, seq_id })
    }
}

/// Writes an envelope followed by a struct payload.
pub fn write_message<T: ThriftStruct>(
    enc: &mut Encoder,
    header: &MessageHeader,
    body: &T,
) -> Result<(), CodecError> {
    write_message_begin(enc, header)?;
    body.write(enc)
}

pub fn write_call<T: ThriftStruct>(
    enc: &mut Encoder,
    name: &str,
    seq_id: i32,
    args: &T,
) -> Result<(), CodecError> {
    write_message(enc, &MessageHeader::new(name, MessageType::Call, seq_id), args)
}

pub fn write_oneway<T: ThriftStruct>(
    enc: &mut Encoder,
    name: &str,
    seq_id: i32,
    args: &T,
) -> Result<(), CodecError> {
    write_message(enc, &MessageHeader::new(name, MessageType::Oneway, seq_id), args)
}

pub fn write_reply<T: ThriftStruct>(
    enc: &mut Encoder,
    name: &str,
    seq_id: i32,
    result: &T,
) -> Result<(), CodecError> {
    write_message(enc, &MessageHeader::new(name, MessageType::Reply, seq_id), result)
}

pub fn write_exception(
    enc: &mut Encoder,
    name: &str,
    seq_id: i32,
    exception: &ApplicationException,
) -> Result<(), CodecError> {
    write_message(
        enc,
        &MessageHeader::new(name, MessageType::Exception, seq_id),
        exception,
    )
}

/// Encodes a complete message into a standalone buffer.
pub fn encode_message<T: ThriftStruct>(
    options: CodecOptions,
    header: &MessageHeader,
    body: &T,
) -> Result<Bytes, CodecError> {
    let mut enc = Encoder::with_options(options);
    write_message(&mut enc, header, body)?;
    Ok(enc.into_inner().freeze())
}
