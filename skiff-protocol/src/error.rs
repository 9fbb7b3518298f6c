//! Protocol error types.
//!
//! Errors are split by who is at fault:
//! - [`ProtocolError`]: the bytes on the wire are malformed.
//! - [`DecodeError`]: the bytes are well-formed but do not satisfy the schema.
//! - [`EncodeError`]: a value handed to the writer does not satisfy the schema.
//!
//! [`CodecError`] unifies them for codec entry points.

use crate::ttype::TType;
use thiserror::Error;

/// Malformed or unexpected wire bytes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown wire type tag: {0:#04x}")]
    UnknownType(u8),

    #[error("bad protocol version word: {0:#010x}")]
    BadVersion(u32),

    #[error("missing protocol version in strict mode")]
    MissingVersion,

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("unexpected message type {kind} for method '{name}'")]
    UnexpectedMessageType { name: String, kind: u8 },

    #[error("negative size: {0}")]
    NegativeSize(i32),

    #[error("size {size} exceeds limit {max}")]
    SizeLimit { size: usize, max: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("nesting depth limit {0} exceeded")]
    DepthLimitExceeded(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Well-formed bytes that do not match the declared schema.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unexpected end of input: need {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("field {field_id} in '{struct_name}': expected {expected}, got {actual}")]
    TypeMismatch {
        struct_name: String,
        field_id: i16,
        expected: TType,
        actual: TType,
    },

    #[error("required field '{field}' was not found for struct {struct_name}")]
    MissingRequiredField { struct_name: String, field: String },

    #[error("cannot read union '{0}' with no set value")]
    EmptyUnion(String),

    #[error("cannot read union '{0}' with more than one set value")]
    UnionMultipleFields(String),

    #[error("field {field_id} in '{struct_name}' holds an unexpected value: {reason}")]
    InvalidValue {
        struct_name: String,
        field_id: i16,
        reason: String,
    },
}

/// Writer-side schema violations.
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("required field '{field}' cannot be absent in struct {struct_name}")]
    MissingRequiredField { struct_name: String, field: String },

    #[error("field {field_id} in '{struct_name}': declared {expected}, value is {actual}")]
    TypeMismatch {
        struct_name: String,
        field_id: i16,
        expected: TType,
        actual: TType,
    },

    #[error("field {field_id} in '{struct_name}': declared {expected}, value is {actual}")]
    StringKindMismatch {
        struct_name: String,
        field_id: i16,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("field {field_id} is not declared by struct {struct_name}")]
    UnknownField { struct_name: String, field_id: i16 },

    #[error("union '{struct_name}' must have exactly one field set, found {count}")]
    UnionFieldCount { struct_name: String, count: usize },

    #[error("collection of {0} elements is too large to encode")]
    TooLarge(usize),

    #[error("string of {len} bytes exceeds the limit of {max}")]
    StringTooLong { len: usize, max: usize },
}

/// Any failure raised by the codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl CodecError {
    /// Returns whether the stream can no longer be trusted after this error.
    ///
    /// Read-side failures leave the decoder at an unknown position, so the
    /// connection has to be closed. Encode failures happen before anything
    /// reaches the wire.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CodecError::Encode(_))
    }
}

/// Errors raised while building a struct descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate field id {id} in struct {struct_name}")]
    DuplicateFieldId { struct_name: String, id: i16 },

    #[error("field id {id} in struct {struct_name} must not be negative")]
    InvalidFieldId { struct_name: String, id: i16 },
}
