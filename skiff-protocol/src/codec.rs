//! Binary protocol encoder and decoder for primitive values and headers.
//!
//! All multi-byte integers are big-endian. Strings and binary values are
//! prefixed with a signed 32-bit length. Struct fields are introduced by a
//! one-byte type tag and a 16-bit field id; a lone zero byte ends a struct.

use crate::error::{CodecError, DecodeError, EncodeError, ProtocolError};
use crate::ttype::TType;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default limit on string and binary lengths (16 MiB).
pub const DEFAULT_MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Default limit on list, set and map element counts.
pub const DEFAULT_MAX_CONTAINER_LEN: usize = 1024 * 1024;

/// Default limit on struct and container nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Tunables shared by [`Encoder`] and [`Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Reject message envelopes that lack the version word.
    pub strict_read: bool,
    /// Write message envelopes with the version word.
    pub strict_write: bool,
    /// Maximum accepted string/binary length in bytes.
    pub max_string_len: usize,
    /// Maximum accepted element count for a single container.
    pub max_container_len: usize,
    /// Maximum nesting of structs and containers.
    pub max_depth: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            strict_read: true,
            strict_write: true,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_container_len: DEFAULT_MAX_CONTAINER_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CodecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict_read(mut self, strict: bool) -> Self {
        self.strict_read = strict;
        self
    }

    pub fn with_strict_write(mut self, strict: bool) -> Self {
        self.strict_write = strict;
        self
    }

    pub fn with_max_string_len(mut self, len: usize) -> Self {
        self.max_string_len = len;
        self
    }

    pub fn with_max_container_len(mut self, len: usize) -> Self {
        self.max_container_len = len;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

fn checked_len(len: usize) -> Result<i32, EncodeError> {
    i32::try_from(len).map_err(|_| EncodeError::TooLarge(len))
}

/// Appends binary protocol values to an output buffer.
#[derive(Debug)]
pub struct Encoder {
    buf: BytesMut,
    options: CodecOptions,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_options(CodecOptions::default())
    }

    pub fn with_options(options: CodecOptions) -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            options,
        }
    }

    /// Returns the options this encoder was built with.
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_byte(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), EncodeError> {
        self.write_binary(value.as_bytes())
    }

    pub fn write_binary(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        if value.len() > self.options.max_string_len {
            return Err(EncodeError::StringTooLong {
                len: value.len(),
                max: self.options.max_string_len,
            });
        }
        let len = checked_len(value.len())?;
        self.buf.put_i32(len);
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn write_ttype(&mut self, ttype: TType) {
        self.buf.put_u8(ttype.as_u8());
    }

    /// Writes a field header: type tag followed by the field id.
    pub fn write_field_begin(&mut self, ttype: TType, id: i16) {
        self.write_ttype(ttype);
        self.buf.put_i16(id);
    }

    /// Writes the struct terminator.
    pub fn write_field_stop(&mut self) {
        self.write_ttype(TType::Stop);
    }

    pub fn write_list_begin(&mut self, elem: TType, size: usize) -> Result<(), EncodeError> {
        let size = checked_len(size)?;
        self.write_ttype(elem);
        self.buf.put_i32(size);
        Ok(())
    }

    pub fn write_set_begin(&mut self, elem: TType, size: usize) -> Result<(), EncodeError> {
        self.write_list_begin(elem, size)
    }

    pub fn write_map_begin(
        &mut self,
        key: TType,
        value: TType,
        size: usize,
    ) -> Result<(), EncodeError> {
        let size = checked_len(size)?;
        self.write_ttype(key);
        self.write_ttype(value);
        self.buf.put_i32(size);
        Ok(())
    }

    /// Appends bytes that were already encoded elsewhere.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder, returning the output buffer.
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads binary protocol values from an input buffer.
///
/// Reads never block: running out of input is reported as
/// [`DecodeError::UnexpectedEof`].
#[derive(Debug, Clone)]
pub struct Decoder {
    buf: Bytes,
    options: CodecOptions,
    depth: usize,
}

impl Decoder {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self::with_options(buf, CodecOptions::default())
    }

    pub fn with_options(buf: impl Into<Bytes>, options: CodecOptions) -> Self {
        Self {
            buf: buf.into(),
            options,
            depth: 0,
        }
    }

    /// Returns the options this decoder was built with.
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    /// Returns the unread bytes without consuming them.
    pub fn peek_remaining(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the decoder, returning the unread bytes.
    pub fn into_remaining(self) -> Bytes {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        let available = self.buf.remaining();
        if available < needed {
            return Err(DecodeError::UnexpectedEof {
                needed: needed - available,
            });
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_byte(&mut self) -> Result<i8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_double(&mut self) -> Result<f64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    /// Reads a length-prefixed byte string without copying.
    pub fn read_binary(&mut self) -> Result<Bytes, CodecError> {
        let len = self.read_i32()?;
        self.read_binary_body(len)
    }

    /// Reads the body of a byte string whose length prefix was already
    /// consumed.
    pub fn read_binary_body(&mut self, len: i32) -> Result<Bytes, CodecError> {
        let len = self.check_size(len, self.options.max_string_len)?;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_i32()?;
        self.read_string_body(len)
    }

    pub fn read_string_body(&mut self, len: i32) -> Result<String, CodecError> {
        let bytes = self.read_binary_body(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    pub fn read_ttype(&mut self) -> Result<TType, CodecError> {
        self.ensure(1)?;
        Ok(TType::try_from(self.buf.get_u8())?)
    }

    /// Reads a field header. Returns `(TType::Stop, 0)` at the end of a struct.
    pub fn read_field_begin(&mut self) -> Result<(TType, i16), CodecError> {
        let ttype = self.read_ttype()?;
        if ttype == TType::Stop {
            return Ok((TType::Stop, 0));
        }
        let id = self.read_i16()?;
        Ok((ttype, id))
    }

    /// Reads a list header: element type and element count.
    pub fn read_list_begin(&mut self) -> Result<(TType, usize), CodecError> {
        let elem = self.read_ttype()?;
        let size = self.read_i32()?;
        let size = self.check_container(size, elem.min_encoded_len())?;
        Ok((elem, size))
    }

    pub fn read_set_begin(&mut self) -> Result<(TType, usize), CodecError> {
        self.read_list_begin()
    }

    /// Reads a map header: key type, value type and entry count.
    pub fn read_map_begin(&mut self) -> Result<(TType, TType, usize), CodecError> {
        let key = self.read_ttype()?;
        let value = self.read_ttype()?;
        let size = self.read_i32()?;
        let size = self.check_container(size, key.min_encoded_len() + value.min_encoded_len())?;
        Ok((key, value, size))
    }

    /// Reads raw bytes of a known length.
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes, CodecError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    fn check_size(&self, size: i32, max: usize) -> Result<usize, ProtocolError> {
        if size < 0 {
            return Err(ProtocolError::NegativeSize(size));
        }
        let size = size as usize;
        if size > max {
            return Err(ProtocolError::SizeLimit { size, max });
        }
        Ok(size)
    }

    fn check_container(&self, size: i32, min_elem_len: usize) -> Result<usize, CodecError> {
        let size = self.check_size(size, self.options.max_container_len)?;
        // A header claiming more elements than the input could hold is
        // rejected before anything is allocated for it.
        let needed = size.saturating_mul(min_elem_len);
        self.ensure(needed)?;
        Ok(size)
    }

    /// Enters one level of struct or container nesting.
    pub fn enter(&mut self) -> Result<(), ProtocolError> {
        if self.depth >= self.options.max_depth {
            return Err(ProtocolError::DepthLimitExceeded(self.options.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leaves one level of nesting.
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Consumes one value of the given type without interpreting it.
    pub fn skip(&mut self, ttype: TType) -> Result<(), CodecError> {
        match ttype {
            TType::Stop | TType::Void => Ok(()),
            TType::Bool | TType::Byte => self.skip_bytes(1),
            TType::I16 => self.skip_bytes(2),
            TType::I32 => self.skip_bytes(4),
            TType::I64 | TType::Double => self.skip_bytes(8),
            TType::String => {
                self.read_binary()?;
                Ok(())
            }
            TType::Struct => {
                self.enter()?;
                loop {
                    let (field_type, _) = self.read_field_begin()?;
                    if field_type == TType::Stop {
                        break;
                    }
                    self.skip(field_type)?;
                }
                self.leave();
                Ok(())
            }
            TType::List | TType::Set => {
                self.enter()?;
                let (elem, size) = self.read_list_begin()?;
                for _ in 0..size {
                    self.skip(elem)?;
                }
                self.leave();
                Ok(())
            }
            TType::Map => {
                self.enter()?;
                let (key, value, size) = self.read_map_begin()?;
                for _ in 0..size {
                    self.skip(key)?;
                    self.skip(value)?;
                }
                self.leave();
                Ok(())
            }
        }
    }

    fn skip_bytes(&mut self, n: usize) -> Result<(), CodecError> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_layout() {
        let mut enc = Encoder::new();
        enc.write_bool(true);
        enc.write_byte(-1);
        enc.write_i16(0x0102);
        enc.write_i32(0x0304_0506);
        enc.write_i64(1);
        enc.write_double(1.0);
        enc.write_string("hi").unwrap();

        let bytes = enc.into_inner();
        assert_eq!(
            &bytes[..],
            &[
                0x01, // bool
                0xFF, // byte
                0x01, 0x02, // i16
                0x03, 0x04, 0x05, 0x06, // i32
                0, 0, 0, 0, 0, 0, 0, 1, // i64
                0x3F, 0xF0, 0, 0, 0, 0, 0, 0, // double 1.0
                0, 0, 0, 2, b'h', b'i', // string
            ][..]
        );
    }

    #[test]
    fn test_primitive_roundtrip() {
        let mut enc = Encoder::new();
        enc.write_bool(false);
        enc.write_byte(i8::MIN);
        enc.write_i16(i16::MIN);
        enc.write_i32(i32::MAX);
        enc.write_i64(i64::MIN);
        enc.write_double(-2.5);
        enc.write_string("héllo").unwrap();
        enc.write_binary(&[0, 159, 146, 150]).unwrap();

        let mut dec = Decoder::new(enc.into_inner().freeze());
        assert!(!dec.read_bool().unwrap());
        assert_eq!(dec.read_byte().unwrap(), i8::MIN);
        assert_eq!(dec.read_i16().unwrap(), i16::MIN);
        assert_eq!(dec.read_i32().unwrap(), i32::MAX);
        assert_eq!(dec.read_i64().unwrap(), i64::MIN);
        assert_eq!(dec.read_double().unwrap(), -2.5);
        assert_eq!(dec.read_string().unwrap(), "héllo");
        assert_eq!(&dec.read_binary().unwrap()[..], &[0, 159, 146, 150]);
        assert!(dec.is_empty());
    }

    #[test]
    fn test_nonzero_bool_is_true() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x02]));
        assert!(dec.read_bool().unwrap());
    }

    #[test]
    fn test_truncated_input() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x00, 0x01]));
        let err = dec.read_i32().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode(DecodeError::UnexpectedEof { needed: 2 })
        ));
    }

    #[test]
    fn test_truncated_string_body() {
        let mut dec = Decoder::new(Bytes::from_static(&[0, 0, 0, 5, b'a', b'b']));
        let err = dec.read_string().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode(DecodeError::UnexpectedEof { needed: 3 })
        ));
    }

    #[test]
    fn test_negative_string_length() {
        let mut dec = Decoder::new(Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]));
        let err = dec.read_binary().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::NegativeSize(-1))
        ));
    }

    #[test]
    fn test_string_limit() {
        let options = CodecOptions::default().with_max_string_len(3);
        let mut dec = Decoder::with_options(Bytes::from_static(&[0, 0, 0, 4, 1, 2, 3, 4]), options);
        let err = dec.read_binary().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::SizeLimit { size: 4, max: 3 })
        ));
    }

    #[test]
    fn test_string_limit_on_write() {
        let options = CodecOptions::default().with_max_string_len(3);
        let mut enc = Encoder::with_options(options);
        enc.write_string("abc").unwrap();
        let err = enc.write_string("abcd").unwrap_err();
        assert_eq!(err, EncodeError::StringTooLong { len: 4, max: 3 });
        assert_eq!(enc.len(), 7);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut dec = Decoder::new(Bytes::from_static(&[0, 0, 0, 2, 0xC3, 0x28]));
        let err = dec.read_string().unwrap_err();
        assert!(matches!(err, CodecError::Protocol(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x07, 0x00, 0x01]));
        let err = dec.read_field_begin().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::UnknownType(7))
        ));
    }

    #[test]
    fn test_field_stop_has_no_id() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x00]));
        assert_eq!(dec.read_field_begin().unwrap(), (TType::Stop, 0));
        assert!(dec.is_empty());
    }

    #[test]
    fn test_container_header_larger_than_input() {
        // list<i64> claiming 1000 elements with 8 bytes of body
        let mut bytes = vec![TType::I64.as_u8(), 0, 0, 0x03, 0xE8];
        bytes.extend_from_slice(&[0u8; 8]);
        let mut dec = Decoder::new(bytes);
        let err = dec.read_list_begin().unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_skip_nested_values() {
        let mut enc = Encoder::new();
        // struct { 1: list<string> ["a", "b"], 2: map<i16, bool> {1: true} }
        enc.write_field_begin(TType::List, 1);
        enc.write_list_begin(TType::String, 2).unwrap();
        enc.write_string("a").unwrap();
        enc.write_string("b").unwrap();
        enc.write_field_begin(TType::Map, 2);
        enc.write_map_begin(TType::I16, TType::Bool, 1).unwrap();
        enc.write_i16(1);
        enc.write_bool(true);
        enc.write_field_stop();
        enc.write_i32(42);

        let mut dec = Decoder::new(enc.into_inner().freeze());
        dec.skip(TType::Struct).unwrap();
        assert_eq!(dec.read_i32().unwrap(), 42);
    }

    #[test]
    fn test_skip_depth_limit() {
        let options = CodecOptions::default().with_max_depth(2);
        let mut enc = Encoder::new();
        // three nested structs
        enc.write_field_begin(TType::Struct, 1);
        enc.write_field_begin(TType::Struct, 1);
        enc.write_field_stop();
        enc.write_field_stop();
        enc.write_field_stop();

        let mut dec = Decoder::with_options(enc.into_inner().freeze(), options);
        let err = dec.skip(TType::Struct).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::DepthLimitExceeded(2))
        ));
    }
}
