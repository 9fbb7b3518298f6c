//! Built-in exception carried by EXCEPTION messages.

use crate::error::DecodeError;
use crate::schema::{FieldType, StructDescriptor, StructKind};
use crate::structs::ThriftStruct;
use crate::value::StructValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Stable exception kind codes.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationExceptionKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
    InvalidTransform,
    InvalidProtocol,
    UnsupportedClientType,
}

impl ApplicationExceptionKind {
    pub fn code(self) -> i32 {
        match self {
            ApplicationExceptionKind::Unknown => 0,
            ApplicationExceptionKind::UnknownMethod => 1,
            ApplicationExceptionKind::InvalidMessageType => 2,
            ApplicationExceptionKind::WrongMethodName => 3,
            ApplicationExceptionKind::BadSequenceId => 4,
            ApplicationExceptionKind::MissingResult => 5,
            ApplicationExceptionKind::InternalError => 6,
            ApplicationExceptionKind::ProtocolError => 7,
            ApplicationExceptionKind::InvalidTransform => 8,
            ApplicationExceptionKind::InvalidProtocol => 9,
            ApplicationExceptionKind::UnsupportedClientType => 10,
        }
    }

    /// Maps a wire code to a kind. Unrecognised codes become `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ApplicationExceptionKind::UnknownMethod,
            2 => ApplicationExceptionKind::InvalidMessageType,
            3 => ApplicationExceptionKind::WrongMethodName,
            4 => ApplicationExceptionKind::BadSequenceId,
            5 => ApplicationExceptionKind::MissingResult,
            6 => ApplicationExceptionKind::InternalError,
            7 => ApplicationExceptionKind::ProtocolError,
            8 => ApplicationExceptionKind::InvalidTransform,
            9 => ApplicationExceptionKind::InvalidProtocol,
            10 => ApplicationExceptionKind::UnsupportedClientType,
            _ => ApplicationExceptionKind::Unknown,
        }
    }
}

impl fmt::Display for ApplicationExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationExceptionKind::Unknown => write!(f, "UNKNOWN"),
            ApplicationExceptionKind::UnknownMethod => write!(f, "UNKNOWN_METHOD"),
            ApplicationExceptionKind::InvalidMessageType => write!(f, "INVALID_MESSAGE_TYPE"),
            ApplicationExceptionKind::WrongMethodName => write!(f, "WRONG_METHOD_NAME"),
            ApplicationExceptionKind::BadSequenceId => write!(f, "BAD_SEQUENCE_ID"),
            ApplicationExceptionKind::MissingResult => write!(f, "MISSING_RESULT"),
            ApplicationExceptionKind::InternalError => write!(f, "INTERNAL_ERROR"),
            ApplicationExceptionKind::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            ApplicationExceptionKind::InvalidTransform => write!(f, "INVALID_TRANSFORM"),
            ApplicationExceptionKind::InvalidProtocol => write!(f, "INVALID_PROTOCOL"),
            ApplicationExceptionKind::UnsupportedClientType => {
                write!(f, "UNSUPPORTED_CLIENT_TYPE")
            }
        }
    }
}

/// A per-call failure reported through an EXCEPTION message.
///
/// Wire shape: `1: optional string message`, `2: optional i32 type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationException {
    pub kind: ApplicationExceptionKind,
    pub message: Option<String>,
}

impl ApplicationException {
    pub fn new(kind: ApplicationExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn unknown_method(name: &str) -> Self {
        Self::new(
            ApplicationExceptionKind::UnknownMethod,
            format!("Invalid method name: '{}'", name),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApplicationExceptionKind::InternalError, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ApplicationExceptionKind::ProtocolError, message)
    }

    pub fn missing_result(method: &str) -> Self {
        Self::new(
            ApplicationExceptionKind::MissingResult,
            format!("{} failed: unknown result", method),
        )
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ApplicationException {}

impl ThriftStruct for ApplicationException {
    fn descriptor() -> &'static StructDescriptor {
        static DESC: OnceLock<StructDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            StructDescriptor::builder("TApplicationException")
                .kind(StructKind::Exception)
                .optional(1, "message", FieldType::String)
                .optional(2, "type", FieldType::I32)
                .build()
                .expect("static schema")
        })
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new()
            .with_optional(1, self.message.clone())
            .with(2, self.kind.code())
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        let desc = Self::descriptor();
        let message = value.take(desc, 1)?;
        let kind = value
            .take::<i32>(desc, 2)?
            .map(ApplicationExceptionKind::from_code)
            .unwrap_or(ApplicationExceptionKind::Unknown);
        Ok(Self { kind, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoder, Encoder};

    #[test]
    fn test_kind_codes() {
        for code in 0..=10 {
            assert_eq!(ApplicationExceptionKind::from_code(code).code(), code);
        }
        assert_eq!(
            ApplicationExceptionKind::from_code(77),
            ApplicationExceptionKind::Unknown
        );
        assert_eq!(
            ApplicationExceptionKind::from_code(-1),
            ApplicationExceptionKind::Unknown
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(
            format!("{}", ApplicationExceptionKind::UnknownMethod),
            "UNKNOWN_METHOD"
        );
        assert_eq!(
            format!("{}", ApplicationExceptionKind::InternalError),
            "INTERNAL_ERROR"
        );
        assert_eq!(
            format!("{}", ApplicationExceptionKind::UnsupportedClientType),
            "UNSUPPORTED_CLIENT_TYPE"
        );
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ApplicationExceptionKind::BadSequenceId).unwrap();
        assert_eq!(json, "\"BAD_SEQUENCE_ID\"");
    }

    #[test]
    fn test_unknown_method_message() {
        let exc = ApplicationException::unknown_method("frobnicate");
        assert_eq!(exc.kind, ApplicationExceptionKind::UnknownMethod);
        assert_eq!(exc.message(), "Invalid method name: 'frobnicate'");
        assert_eq!(
            exc.to_string(),
            "UNKNOWN_METHOD: Invalid method name: 'frobnicate'"
        );
    }

    #[test]
    fn test_wire_roundtrip() {
        let exc = ApplicationException::internal("boom");
        let mut enc = Encoder::new();
        exc.write(&mut enc).unwrap();
        let bytes = enc.into_inner().freeze();

        // 1: "boom", 2: 6
        assert_eq!(
            &bytes[..],
            &[
                0x0B, 0, 1, 0, 0, 0, 4, b'b', b'o', b'o', b'm', //
                0x08, 0, 2, 0, 0, 0, 6, //
                0x00,
            ][..]
        );

        let mut dec = Decoder::new(bytes);
        assert_eq!(ApplicationException::read(&mut dec).unwrap(), exc);
    }

    #[test]
    fn test_missing_fields_decode_as_unknown() {
        let mut dec = Decoder::new(bytes::Bytes::from_static(&[0x00]));
        let exc = ApplicationException::read(&mut dec).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::Unknown);
        assert_eq!(exc.message, None);
    }
}
