//! Dynamic field values and the field codec.
//!
//! [`Value`] holds one decoded field of any wire type. [`StructValue`] maps
//! field ids to values; a field is present exactly when its id is in the map.

use crate::codec::{Decoder, Encoder};
use crate::error::{CodecError, DecodeError, EncodeError, ProtocolError};
use crate::schema::{FieldType, StructDescriptor};
use crate::structs::{read_struct, write_struct, ThriftStruct};
use crate::ttype::TType;
use bytes::Bytes;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::{btree_map, BTreeMap, BTreeSet};

/// Elements of a list or set, tagged with their wire type.
#[derive(Debug, Clone, PartialEq)]
pub struct ListValue {
    pub elem: TType,
    pub items: Vec<Value>,
}

/// Entries of a map, tagged with key and value wire types.
#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    pub key: TType,
    pub value: TType,
    pub entries: Vec<(Value, Value)>,
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    String(String),
    Binary(Bytes),
    Struct(StructValue),
    List(ListValue),
    Set(ListValue),
    Map(MapValue),
}

impl Value {
    /// Returns the wire tag this value is written with.
    pub fn ttype(&self) -> TType {
        match self {
            Value::Bool(_) => TType::Bool,
            Value::Byte(_) => TType::Byte,
            Value::I16(_) => TType::I16,
            Value::I32(_) => TType::I32,
            Value::I64(_) => TType::I64,
            Value::Double(_) => TType::Double,
            Value::String(_) | Value::Binary(_) => TType::String,
            Value::Struct(_) => TType::Struct,
            Value::List(_) => TType::List,
            Value::Set(_) => TType::Set,
            Value::Map(_) => TType::Map,
        }
    }

    /// Builds a list value from typed structs.
    pub fn struct_list<T: ThriftStruct>(items: &[T]) -> Value {
        Value::List(ListValue {
            elem: TType::Struct,
            items: items
                .iter()
                .map(|item| Value::Struct(item.to_struct_value()))
                .collect(),
        })
    }
}

/// Field id to value mapping for one struct instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructValue {
    fields: BTreeMap<i16, Value>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a value holding every schema default declared by `desc`.
    pub fn with_defaults(desc: &StructDescriptor) -> Self {
        let fields = desc
            .fields()
            .iter()
            .filter_map(|f| f.default.clone().map(|v| (f.id, v)))
            .collect();
        Self { fields }
    }

    /// Sets a field, returning `self` for chaining.
    pub fn with(mut self, id: i16, value: impl IntoValue) -> Self {
        self.insert(id, value.into_value());
        self
    }

    /// Sets a field if `value` is `Some`.
    pub fn with_optional<T: IntoValue>(mut self, id: i16, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.insert(id, value.into_value());
        }
        self
    }

    /// Sets a nested struct field.
    pub fn with_struct<T: ThriftStruct>(mut self, id: i16, value: &T) -> Self {
        self.insert(id, Value::Struct(value.to_struct_value()));
        self
    }

    pub fn insert(&mut self, id: i16, value: Value) -> Option<Value> {
        self.fields.insert(id, value)
    }

    pub fn get(&self, id: i16) -> Option<&Value> {
        self.fields.get(&id)
    }

    pub fn remove(&mut self, id: i16) -> Option<Value> {
        self.fields.remove(&id)
    }

    pub fn contains(&self, id: i16) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, i16, Value> {
        self.fields.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = i16> + '_ {
        self.fields.keys().copied()
    }

    /// Removes and converts an optional field.
    pub fn take<T: FromValue>(
        &mut self,
        desc: &StructDescriptor,
        id: i16,
    ) -> Result<Option<T>, DecodeError> {
        match self.fields.remove(&id) {
            Some(value) => T::from_value(value).map(Some).map_err(|reason| {
                DecodeError::InvalidValue {
                    struct_name: desc.name().to_string(),
                    field_id: id,
                    reason,
                }
            }),
            None => Ok(None),
        }
    }

    /// Removes and converts a field that must be present.
    pub fn take_required<T: FromValue>(
        &mut self,
        desc: &StructDescriptor,
        id: i16,
    ) -> Result<T, DecodeError> {
        self.take(desc, id)?
            .ok_or_else(|| missing_required(desc, id))
    }

    /// Removes and converts an optional nested struct.
    pub fn take_struct<T: ThriftStruct>(
        &mut self,
        desc: &StructDescriptor,
        id: i16,
    ) -> Result<Option<T>, DecodeError> {
        match self.fields.remove(&id) {
            Some(Value::Struct(inner)) => T::from_struct_value(inner).map(Some),
            Some(other) => Err(invalid_kind(desc, id, "struct", &other)),
            None => Ok(None),
        }
    }

    /// Removes and converts a nested struct that must be present.
    pub fn take_required_struct<T: ThriftStruct>(
        &mut self,
        desc: &StructDescriptor,
        id: i16,
    ) -> Result<T, DecodeError> {
        self.take_struct(desc, id)?
            .ok_or_else(|| missing_required(desc, id))
    }

    /// Removes and converts a list of nested structs.
    pub fn take_struct_list<T: ThriftStruct>(
        &mut self,
        desc: &StructDescriptor,
        id: i16,
    ) -> Result<Option<Vec<T>>, DecodeError> {
        match self.fields.remove(&id) {
            Some(Value::List(list)) => list
                .items
                .into_iter()
                .map(|item| match item {
                    Value::Struct(inner) => T::from_struct_value(inner),
                    other => Err(invalid_kind(desc, id, "struct", &other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(invalid_kind(desc, id, "list", &other)),
            None => Ok(None),
        }
    }
}

fn missing_required(desc: &StructDescriptor, id: i16) -> DecodeError {
    let field = desc
        .field(id)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| id.to_string());
    DecodeError::MissingRequiredField {
        struct_name: desc.name().to_string(),
        field,
    }
}

fn invalid_kind(desc: &StructDescriptor, id: i16, wanted: &str, got: &Value) -> DecodeError {
    DecodeError::InvalidValue {
        struct_name: desc.name().to_string(),
        field_id: id,
        reason: format!("expected {}, found {}", wanted, got.ttype()),
    }
}

impl FromIterator<(i16, Value)> for StructValue {
    fn from_iter<I: IntoIterator<Item = (i16, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// =========================================================================
// Conversions
// =========================================================================

/// Conversion from a Rust value into a [`Value`].
pub trait IntoValue {
    /// Wire tag of the produced value, used for container element tags.
    const TTYPE: TType;

    fn into_value(self) -> Value;
}

/// Conversion from a [`Value`] into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, String>;
}

macro_rules! scalar_conversions {
    ($($ty:ty => $variant:ident, $ttype:ident;)*) => {
        $(
            impl IntoValue for $ty {
                const TTYPE: TType = TType::$ttype;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, String> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(format!(
                            "expected {}, found {}",
                            TType::$ttype,
                            other.ttype()
                        )),
                    }
                }
            }
        )*
    };
}

scalar_conversions! {
    bool => Bool, Bool;
    i8 => Byte, Byte;
    i16 => I16, I16;
    i32 => I32, I32;
    i64 => I64, I64;
    f64 => Double, Double;
    StructValue => Struct, Struct;
}

impl IntoValue for String {
    const TTYPE: TType = TType::String;

    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    const TTYPE: TType = TType::String;

    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(s),
            Value::Binary(b) => {
                String::from_utf8(b.to_vec()).map_err(|_| "binary is not valid UTF-8".to_string())
            }
            other => Err(format!("expected STRING, found {}", other.ttype())),
        }
    }
}

impl IntoValue for Bytes {
    const TTYPE: TType = TType::String;

    fn into_value(self) -> Value {
        Value::Binary(self)
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Binary(b) => Ok(b),
            Value::String(s) => Ok(Bytes::from(s)),
            other => Err(format!("expected STRING, found {}", other.ttype())),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    const TTYPE: TType = TType::List;

    fn into_value(self) -> Value {
        Value::List(ListValue {
            elem: T::TTYPE,
            items: self.into_iter().map(IntoValue::into_value).collect(),
        })
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::List(list) | Value::Set(list) => {
                list.items.into_iter().map(T::from_value).collect()
            }
            other => Err(format!("expected LIST, found {}", other.ttype())),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeSet<T> {
    const TTYPE: TType = TType::Set;

    fn into_value(self) -> Value {
        Value::Set(ListValue {
            elem: T::TTYPE,
            items: self.into_iter().map(IntoValue::into_value).collect(),
        })
    }
}

impl<T: FromValue + Ord> FromValue for BTreeSet<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Set(list) | Value::List(list) => {
                list.items.into_iter().map(T::from_value).collect()
            }
            other => Err(format!("expected SET, found {}", other.ttype())),
        }
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for BTreeMap<K, V> {
    const TTYPE: TType = TType::Map;

    fn into_value(self) -> Value {
        Value::Map(MapValue {
            key: K::TTYPE,
            value: V::TTYPE,
            entries: self
                .into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        })
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Map(map) => map
                .entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(format!("expected MAP, found {}", other.ttype())),
        }
    }
}

// =========================================================================
// Field codec
// =========================================================================

/// Location used in mismatch diagnostics.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldContext<'a> {
    pub struct_name: &'a str,
    pub field_id: i16,
}

const DETACHED: FieldContext<'static> = FieldContext {
    struct_name: "<value>",
    field_id: 0,
};

/// Encodes `value` as the declared type `ty`.
pub fn encode_value(enc: &mut Encoder, value: &Value, ty: &FieldType) -> Result<(), CodecError> {
    encode_field_value(enc, value, ty, DETACHED)
}

/// Decodes one value of the declared type `ty`.
pub fn decode_value(dec: &mut Decoder, ty: &FieldType) -> Result<Value, CodecError> {
    decode_field_value(dec, ty, DETACHED)
}

pub(crate) fn encode_field_value(
    enc: &mut Encoder,
    value: &Value,
    ty: &FieldType,
    ctx: FieldContext<'_>,
) -> Result<(), CodecError> {
    match (value, ty) {
        (Value::Bool(v), FieldType::Bool) => enc.write_bool(*v),
        (Value::Byte(v), FieldType::Byte) => enc.write_byte(*v),
        (Value::I16(v), FieldType::I16) => enc.write_i16(*v),
        (Value::I32(v), FieldType::I32) => enc.write_i32(*v),
        (Value::I64(v), FieldType::I64) => enc.write_i64(*v),
        (Value::Double(v), FieldType::Double) => enc.write_double(*v),
        (Value::String(v), FieldType::String) => enc.write_string(v)?,
        (Value::Binary(v), FieldType::Binary) => enc.write_binary(v)?,
        (Value::String(_), FieldType::Binary) | (Value::Binary(_), FieldType::String) => {
            // Same wire tag, so name the kinds instead of the TType.
            let (expected, actual) = match ty {
                FieldType::Binary => ("BINARY", "STRING"),
                _ => ("STRING", "BINARY"),
            };
            return Err(EncodeError::StringKindMismatch {
                struct_name: ctx.struct_name.to_string(),
                field_id: ctx.field_id,
                expected,
                actual,
            }
            .into());
        }
        (Value::Struct(v), FieldType::Struct(desc)) => write_struct(enc, v, desc)?,
        (Value::List(list), FieldType::List(elem)) => {
            enc.write_list_begin(elem.ttype(), list.items.len())?;
            for item in &list.items {
                encode_field_value(enc, item, elem, ctx)?;
            }
        }
        (Value::Set(set), FieldType::Set(elem)) => {
            enc.write_set_begin(elem.ttype(), set.items.len())?;
            for item in &set.items {
                encode_field_value(enc, item, elem, ctx)?;
            }
        }
        (Value::Map(map), FieldType::Map(key_ty, value_ty)) => {
            enc.write_map_begin(key_ty.ttype(), value_ty.ttype(), map.entries.len())?;
            for (k, v) in &map.entries {
                encode_field_value(enc, k, key_ty, ctx)?;
                encode_field_value(enc, v, value_ty, ctx)?;
            }
        }
        (value, ty) => {
            return Err(EncodeError::TypeMismatch {
                struct_name: ctx.struct_name.to_string(),
                field_id: ctx.field_id,
                expected: ty.ttype(),
                actual: value.ttype(),
            }
            .into())
        }
    }
    Ok(())
}

pub(crate) fn decode_field_value(
    dec: &mut Decoder,
    ty: &FieldType,
    ctx: FieldContext<'_>,
) -> Result<Value, CodecError> {
    let value = match ty {
        FieldType::Bool => Value::Bool(dec.read_bool()?),
        FieldType::Byte => Value::Byte(dec.read_byte()?),
        FieldType::I16 => Value::I16(dec.read_i16()?),
        FieldType::I32 => Value::I32(dec.read_i32()?),
        FieldType::I64 => Value::I64(dec.read_i64()?),
        FieldType::Double => Value::Double(dec.read_double()?),
        FieldType::String => Value::String(dec.read_string()?),
        FieldType::Binary => Value::Binary(dec.read_binary()?),
        FieldType::Struct(desc) => Value::Struct(read_struct(dec, desc)?),
        FieldType::List(elem) => {
            dec.enter()?;
            let (wire_elem, size) = dec.read_list_begin()?;
            check_elem(ctx, elem.ttype(), wire_elem, size)?;
            let items = decode_items(dec, elem, size, ctx)?;
            dec.leave();
            Value::List(ListValue {
                elem: elem.ttype(),
                items,
            })
        }
        FieldType::Set(elem) => {
            dec.enter()?;
            let (wire_elem, size) = dec.read_set_begin()?;
            check_elem(ctx, elem.ttype(), wire_elem, size)?;
            let items = decode_items(dec, elem, size, ctx)?;
            dec.leave();
            Value::Set(ListValue {
                elem: elem.ttype(),
                items,
            })
        }
        FieldType::Map(key_ty, value_ty) => {
            dec.enter()?;
            let (wire_key, wire_value, size) = dec.read_map_begin()?;
            check_elem(ctx, key_ty.ttype(), wire_key, size)?;
            check_elem(ctx, value_ty.ttype(), wire_value, size)?;
            let mut entries = Vec::with_capacity(size);
            for _ in 0..size {
                let k = decode_field_value(dec, key_ty, ctx)?;
                let v = decode_field_value(dec, value_ty, ctx)?;
                entries.push((k, v));
            }
            dec.leave();
            Value::Map(MapValue {
                key: key_ty.ttype(),
                value: value_ty.ttype(),
                entries,
            })
        }
    };
    Ok(value)
}

fn decode_items(
    dec: &mut Decoder,
    elem: &FieldType,
    size: usize,
    ctx: FieldContext<'_>,
) -> Result<Vec<Value>, CodecError> {
    let mut items = Vec::with_capacity(size);
    for _ in 0..size {
        items.push(decode_field_value(dec, elem, ctx)?);
    }
    Ok(items)
}

// Empty containers are exempt: some writers emit placeholder tags for them.
fn check_elem(
    ctx: FieldContext<'_>,
    expected: TType,
    actual: TType,
    size: usize,
) -> Result<(), DecodeError> {
    if size > 0 && expected != actual {
        return Err(DecodeError::TypeMismatch {
            struct_name: ctx.struct_name.to_string(),
            field_id: ctx.field_id,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Decodes one value using only its wire tag.
///
/// String-tagged values become [`Value::String`] when they hold valid UTF-8
/// and [`Value::Binary`] otherwise.
pub fn decode_untyped(dec: &mut Decoder, ttype: TType) -> Result<Value, CodecError> {
    let value = match ttype {
        TType::Bool => Value::Bool(dec.read_bool()?),
        TType::Byte => Value::Byte(dec.read_byte()?),
        TType::I16 => Value::I16(dec.read_i16()?),
        TType::I32 => Value::I32(dec.read_i32()?),
        TType::I64 => Value::I64(dec.read_i64()?),
        TType::Double => Value::Double(dec.read_double()?),
        TType::String => {
            let raw = dec.read_binary()?;
            match std::str::from_utf8(&raw) {
                Ok(s) => Value::String(s.to_string()),
                Err(_) => Value::Binary(raw),
            }
        }
        TType::Struct => {
            dec.enter()?;
            let mut fields = StructValue::new();
            loop {
                let (field_type, id) = dec.read_field_begin()?;
                if field_type == TType::Stop {
                    break;
                }
                fields.insert(id, decode_untyped(dec, field_type)?);
            }
            dec.leave();
            Value::Struct(fields)
        }
        TType::List | TType::Set => {
            dec.enter()?;
            let (elem, size) = dec.read_list_begin()?;
            let mut items = Vec::with_capacity(size);
            for _ in 0..size {
                items.push(decode_untyped(dec, elem)?);
            }
            dec.leave();
            let list = ListValue { elem, items };
            if ttype == TType::List {
                Value::List(list)
            } else {
                Value::Set(list)
            }
        }
        TType::Map => {
            dec.enter()?;
            let (key, value, size) = dec.read_map_begin()?;
            let mut entries = Vec::with_capacity(size);
            for _ in 0..size {
                let k = decode_untyped(dec, key)?;
                let v = decode_untyped(dec, value)?;
                entries.push((k, v));
            }
            dec.leave();
            Value::Map(MapValue {
                key,
                value,
                entries,
            })
        }
        TType::Stop | TType::Void => {
            return Err(ProtocolError::UnknownType(ttype.as_u8()).into());
        }
    };
    Ok(value)
}

// =========================================================================
// Serialization for diagnostics
// =========================================================================

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Byte(v) => serializer.serialize_i8(*v),
            Value::I16(v) => serializer.serialize_i16(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::I64(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Binary(v) => serializer.serialize_bytes(v),
            Value::Struct(v) => v.serialize(serializer),
            Value::List(list) | Value::Set(list) => {
                let mut seq = serializer.serialize_seq(Some(list.items.len()))?;
                for item in &list.items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            // Keys may be structs or lists, so maps render as pairs.
            Value::Map(map) => {
                let mut seq = serializer.serialize_seq(Some(map.entries.len()))?;
                for entry in &map.entries {
                    seq.serialize_element(&[&entry.0, &entry.1])?;
                }
                seq.end()
            }
        }
    }
}

impl Serialize for StructValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (id, value) in &self.fields {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &FieldType) -> Bytes {
        let mut enc = Encoder::new();
        encode_value(&mut enc, value, ty).unwrap();
        enc.into_inner().freeze()
    }

    #[test]
    fn test_list_layout() {
        let value = vec![1i16, 2].into_value();
        let bytes = encode(&value, &FieldType::list(FieldType::I16));
        assert_eq!(&bytes[..], &[0x06, 0, 0, 0, 2, 0, 1, 0, 2][..]);
    }

    #[test]
    fn test_map_layout() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 7i32);
        let bytes = encode(
            &map.into_value(),
            &FieldType::map(FieldType::String, FieldType::I32),
        );
        assert_eq!(
            &bytes[..],
            &[0x0B, 0x08, 0, 0, 0, 1, 0, 0, 0, 1, b'a', 0, 0, 0, 7][..]
        );
    }

    #[test]
    fn test_nested_containers_roundtrip() {
        let ty = FieldType::map(
            FieldType::String,
            FieldType::list(FieldType::set(FieldType::I64)),
        );
        let mut map: BTreeMap<String, Vec<BTreeSet<i64>>> = BTreeMap::new();
        map.insert(
            "x".to_string(),
            vec![[1i64, 2].into_iter().collect(), BTreeSet::new()],
        );
        map.insert("y".to_string(), vec![]);
        let value = map.clone().into_value();

        let mut dec = Decoder::new(encode(&value, &ty));
        let decoded = decode_value(&mut dec, &ty).unwrap();
        assert_eq!(decoded, value);

        let back: BTreeMap<String, Vec<BTreeSet<i64>>> = FromValue::from_value(decoded).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_encode_type_mismatch() {
        let mut enc = Encoder::new();
        let err = encode_value(&mut enc, &Value::I32(1), &FieldType::I64).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Encode(EncodeError::TypeMismatch {
                expected: TType::I64,
                actual: TType::I32,
                ..
            })
        ));
    }

    #[test]
    fn test_list_element_tag_mismatch() {
        // list header says i32 elements, schema says i64
        let bytes = Bytes::from_static(&[0x08, 0, 0, 0, 1, 0, 0, 0, 5]);
        let mut dec = Decoder::new(bytes);
        let err = decode_value(&mut dec, &FieldType::list(FieldType::I64)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode(DecodeError::TypeMismatch {
                expected: TType::I64,
                actual: TType::I32,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_list_ignores_element_tag() {
        let bytes = Bytes::from_static(&[0x0C, 0, 0, 0, 0]);
        let mut dec = Decoder::new(bytes);
        let value = decode_value(&mut dec, &FieldType::list(FieldType::String)).unwrap();
        assert_eq!(
            value,
            Value::List(ListValue {
                elem: TType::String,
                items: vec![]
            })
        );
    }

    #[test]
    fn test_binary_and_string_share_tag() {
        let ty = FieldType::Binary;
        let raw = Bytes::from_static(&[0xFF, 0x00, 0x10]);
        let bytes = encode(&Value::Binary(raw.clone()), &ty);

        let mut dec = Decoder::new(bytes.clone());
        assert_eq!(decode_value(&mut dec, &ty).unwrap(), Value::Binary(raw.clone()));

        // Without a schema, non-UTF-8 payloads stay binary.
        let mut dec = Decoder::new(bytes);
        assert_eq!(
            decode_untyped(&mut dec, TType::String).unwrap(),
            Value::Binary(raw)
        );
    }

    #[test]
    fn test_string_and_binary_are_not_interchangeable() {
        let mut enc = Encoder::new();
        let err = encode_value(&mut enc, &Value::String("text".into()), &FieldType::Binary)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::Encode(EncodeError::StringKindMismatch {
                expected: "BINARY",
                actual: "STRING",
                ..
            })
        ));

        let raw = Value::Binary(Bytes::from_static(&[0xFF, 0xFE]));
        let err = encode_value(&mut enc, &raw, &FieldType::String).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Encode(EncodeError::StringKindMismatch {
                expected: "STRING",
                actual: "BINARY",
                ..
            })
        ));
        assert!(enc.is_empty());
    }

    #[test]
    fn test_untyped_struct() {
        let mut enc = Encoder::new();
        enc.write_field_begin(TType::I32, 1);
        enc.write_i32(10);
        enc.write_field_begin(TType::String, 5);
        enc.write_string("five").unwrap();
        enc.write_field_stop();

        let mut dec = Decoder::new(enc.into_inner().freeze());
        let value = decode_untyped(&mut dec, TType::Struct).unwrap();
        let expected = StructValue::new().with(1, 10i32).with(5, "five");
        assert_eq!(value, Value::Struct(expected));
    }

    #[test]
    fn test_take_conversions() {
        let desc = StructDescriptor::builder("S")
            .required(1, "count", FieldType::I32)
            .optional(2, "label", FieldType::String)
            .build()
            .unwrap();

        let mut value = StructValue::new().with(1, 3i32);
        assert_eq!(value.take_required::<i32>(&desc, 1).unwrap(), 3);
        assert_eq!(value.take::<String>(&desc, 2).unwrap(), None);

        let err = value.take_required::<i32>(&desc, 1).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingRequiredField {
                struct_name: "S".to_string(),
                field: "count".to_string()
            }
        );

        let mut value = StructValue::new().with(1, "three");
        assert!(matches!(
            value.take_required::<i32>(&desc, 1),
            Err(DecodeError::InvalidValue { field_id: 1, .. })
        ));
    }

    #[test]
    fn test_json_rendering() {
        let value = StructValue::new()
            .with(1, 42i32)
            .with(2, "svc")
            .with(3, vec![true, false]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"1": 42, "2": "svc", "3": [true, false]})
        );
    }
}
