//! Struct codec: whole records against a [`StructDescriptor`].

use crate::codec::{Decoder, Encoder};
use crate::error::{CodecError, DecodeError, EncodeError};
use crate::schema::{StructDescriptor, StructKind};
use crate::ttype::TType;
use crate::value::{decode_field_value, encode_field_value, FieldContext, StructValue};

/// Writes `value` as a struct described by `desc`.
///
/// Fields are emitted in descriptor order. Required fields must be present;
/// optional and default fields are written only when present. On error the
/// encoder holds a partially written struct and should be discarded.
pub fn write_struct(
    enc: &mut Encoder,
    value: &StructValue,
    desc: &StructDescriptor,
) -> Result<(), CodecError> {
    if let Some(id) = value.ids().find(|id| desc.field(*id).is_none()) {
        return Err(EncodeError::UnknownField {
            struct_name: desc.name().to_string(),
            field_id: id,
        }
        .into());
    }

    if desc.kind() == StructKind::Union && value.len() != 1 {
        return Err(EncodeError::UnionFieldCount {
            struct_name: desc.name().to_string(),
            count: value.len(),
        }
        .into());
    }

    for field in desc.fields() {
        match value.get(field.id) {
            Some(field_value) => {
                enc.write_field_begin(field.ty.ttype(), field.id);
                let ctx = FieldContext {
                    struct_name: desc.name(),
                    field_id: field.id,
                };
                encode_field_value(enc, field_value, &field.ty, ctx)?;
            }
            None if field.is_required() => {
                return Err(EncodeError::MissingRequiredField {
                    struct_name: desc.name().to_string(),
                    field: field.name.clone(),
                }
                .into());
            }
            None => {}
        }
    }

    enc.write_field_stop();
    Ok(())
}

/// Reads a struct described by `desc`.
///
/// Unknown field ids are skipped. A known id carrying a different wire tag
/// is a [`DecodeError::TypeMismatch`]. Every required field must be present
/// once the stop byte is reached.
pub fn read_struct(dec: &mut Decoder, desc: &StructDescriptor) -> Result<StructValue, CodecError> {
    dec.enter()?;
    let mut value = StructValue::new();

    loop {
        let (ttype, id) = dec.read_field_begin()?;
        if ttype == TType::Stop {
            break;
        }

        let Some(field) = desc.field(id) else {
            dec.skip(ttype)?;
            continue;
        };

        let expected = field.ty.ttype();
        if ttype != expected {
            return Err(DecodeError::TypeMismatch {
                struct_name: desc.name().to_string(),
                field_id: id,
                expected,
                actual: ttype,
            }
            .into());
        }

        let ctx = FieldContext {
            struct_name: desc.name(),
            field_id: id,
        };
        let field_value = decode_field_value(dec, &field.ty, ctx)?;
        value.insert(id, field_value);
    }
    dec.leave();

    if let Some(missing) = desc.required_fields().find(|f| !value.contains(f.id)) {
        return Err(DecodeError::MissingRequiredField {
            struct_name: desc.name().to_string(),
            field: missing.name.clone(),
        }
        .into());
    }

    if desc.kind() == StructKind::Union {
        match value.len() {
            0 => return Err(DecodeError::EmptyUnion(desc.name().to_string()).into()),
            1 => {}
            _ => return Err(DecodeError::UnionMultipleFields(desc.name().to_string()).into()),
        }
    }

    Ok(value)
}

/// A typed record with a static schema.
///
/// Implementations convert between the typed form and a [`StructValue`];
/// the wire format is handled entirely by the struct codec.
pub trait ThriftStruct: Sized {
    /// Returns the schema of this record.
    fn descriptor() -> &'static StructDescriptor;

    /// Converts to the dynamic form. Absent optional fields are left out.
    fn to_struct_value(&self) -> StructValue;

    /// Builds the typed form from a decoded value.
    fn from_struct_value(value: StructValue) -> Result<Self, DecodeError>;

    fn write(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        write_struct(enc, &self.to_struct_value(), Self::descriptor())
    }

    fn read(dec: &mut Decoder) -> Result<Self, CodecError> {
        let value = read_struct(dec, Self::descriptor())?;
        Ok(Self::from_struct_value(value)?)
    }
}
