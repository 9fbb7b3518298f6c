//! Wire type tags of the binary protocol.

use crate::error::ProtocolError;
use std::fmt;

/// Byte-level code identifying how a value is encoded on the wire.
///
/// These values are part of the protocol contract and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TType {
    Stop = 0,
    Void = 1,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    /// Shared by UTF-8 strings and raw binary.
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl TType {
    /// Returns the wire byte for this tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Smallest number of bytes a value of this type occupies on the wire.
    ///
    /// Used to reject collection headers that claim more elements than the
    /// remaining input could possibly hold.
    pub fn min_encoded_len(self) -> usize {
        match self {
            TType::Stop | TType::Void => 0,
            TType::Bool | TType::Byte => 1,
            TType::I16 => 2,
            TType::I32 => 4,
            TType::Double | TType::I64 => 8,
            TType::String => 4,
            TType::Struct => 1,
            TType::Map => 6,
            TType::Set | TType::List => 5,
        }
    }
}

impl TryFrom<u8> for TType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => TType::Stop,
            1 => TType::Void,
            2 => TType::Bool,
            3 => TType::Byte,
            4 => TType::Double,
            6 => TType::I16,
            8 => TType::I32,
            10 => TType::I64,
            11 => TType::String,
            12 => TType::Struct,
            13 => TType::Map,
            14 => TType::Set,
            15 => TType::List,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

impl fmt::Display for TType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TType::Stop => "STOP",
            TType::Void => "VOID",
            TType::Bool => "BOOL",
            TType::Byte => "BYTE",
            TType::Double => "DOUBLE",
            TType::I16 => "I16",
            TType::I32 => "I32",
            TType::I64 => "I64",
            TType::String => "STRING",
            TType::Struct => "STRUCT",
            TType::Map => "MAP",
            TType::Set => "SET",
            TType::List => "LIST",
        };
        f.write_str(name)
    }
}
