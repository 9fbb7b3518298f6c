//! # skiff-protocol
//!
//! Schema-driven binary codec for skiff RPC.
//!
//! This crate provides:
//! - Wire type tags and big-endian primitive encoding
//! - Struct descriptors and dynamic field values
//! - Struct read/write with presence checks and unknown-field skipping
//! - Message envelopes and the built-in application exception
//! - Length-prefixed framing

pub mod codec;
pub mod error;
pub mod exception;
pub mod frame;
pub mod message;
pub mod schema;
pub mod structs;
pub mod ttype;
pub mod value;

pub use codec::{CodecOptions, Decoder, Encoder};
pub use error::{CodecError, DecodeError, EncodeError, ProtocolError, SchemaError};
pub use exception::{ApplicationException, ApplicationExceptionKind};
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
pub use message::{read_envelope, write_message_begin, MessageHeader, MessageType};
pub use schema::{FieldDescriptor, FieldType, Requiredness, StructDescriptor, StructKind};
pub use structs::{read_struct, write_struct, ThriftStruct};
pub use ttype::TType;
pub use value::{FromValue, IntoValue, ListValue, MapValue, StructValue, Value};

/// Default port for the skiff server.
pub const DEFAULT_PORT: u16 = 9090;
