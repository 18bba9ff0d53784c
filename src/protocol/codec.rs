//! Schema-driven message codec (encode/decode)
//!
//! Records are written in protobuf binary encoding, field by field in the
//! order the schema declares them.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::schema::{Cardinality, FieldDescriptor, FieldKind, MessageDescriptor, ScalarType};
use super::wire::{
    WireReader, WireType, put_length_delimited, put_tag, put_varint, zigzag_decode32,
    zigzag_decode64, zigzag_encode32, zigzag_encode64,
};
use super::{Error, Record, Result, SchemaRegistry, Value};

/// Deepest message nesting the decoder follows before rejecting a frame
pub const MAX_NESTING_DEPTH: usize = 64;

/// Map entry field ids, fixed by the protobuf map encoding
const MAP_KEY_ID: u32 = 1;
const MAP_VALUE_ID: u32 = 2;

/// Encode a record as a frame of the named type
///
/// # Format
///
/// ```text
/// [TAG(field 1)] [VALUE] [TAG(field 2)] [VALUE] ...   (declaration order)
/// ```
///
/// # Errors
///
/// Returns an error if:
/// - `type_name` (or a nested type) is not in the registry
/// - A `required` field is missing
/// - The record carries a field the type does not declare
/// - A value does not fit its declared wire type
pub fn encode(registry: &SchemaRegistry, type_name: &str, record: &Record) -> Result<Bytes> {
    let descriptor = registry.resolve(type_name)?;
    let mut buf = BytesMut::new();
    Encoder { registry }.message(descriptor, record, &mut buf)?;
    trace!(type_name, len = buf.len(), "encoded frame");
    Ok(buf.freeze())
}

/// Decode a frame of the named type into a record
///
/// Fields with ids the type does not declare are skipped.
///
/// # Errors
///
/// Returns an error if:
/// - `type_name` is not in the registry
/// - The frame truncates mid-field or carries an invalid tag
/// - A known field arrives with the wrong wire type
/// - A `required` field never appears
pub fn decode(registry: &SchemaRegistry, type_name: &str, frame: &[u8]) -> Result<Record> {
    let descriptor = registry.resolve(type_name)?;
    Decoder { registry }.message(descriptor, frame, 0)
}

struct Encoder<'r> {
    registry: &'r SchemaRegistry,
}

impl Encoder<'_> {
    fn message(
        &self,
        descriptor: &MessageDescriptor,
        record: &Record,
        buf: &mut BytesMut,
    ) -> Result<()> {
        if let Some((name, _)) = record.iter().find(|(name, _)| descriptor.field(name).is_none()) {
            return Err(Error::UnknownField {
                type_name: descriptor.name().to_owned(),
                field: name.to_owned(),
            });
        }

        for field in descriptor.fields() {
            match record.get(field.name()) {
                Some(value) => self.field(descriptor, field, value, buf)?,
                None if field.cardinality() == Cardinality::Required => {
                    return Err(Error::MissingRequiredField {
                        type_name: descriptor.name().to_owned(),
                        field: field.name().to_owned(),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    fn field(
        &self,
        descriptor: &MessageDescriptor,
        field: &FieldDescriptor,
        value: &Value,
        buf: &mut BytesMut,
    ) -> Result<()> {
        let type_name = descriptor.name();
        match field.cardinality() {
            Cardinality::Required | Cardinality::Optional => {
                self.tagged(type_name, field.name(), field.id(), field.kind(), value, buf)
            }
            Cardinality::Repeated => {
                let Value::List(items) = value else {
                    return Err(Error::mismatch(
                        type_name,
                        field.name(),
                        format!("repeated {}", field.kind().describe()),
                    ));
                };
                match field.kind().packable_scalar() {
                    Some(scalar) if field.is_packed() => {
                        if items.is_empty() {
                            return Ok(());
                        }
                        let mut run = BytesMut::new();
                        for item in items {
                            scalar_payload(type_name, field.name(), scalar, item, &mut run)?;
                        }
                        put_tag(buf, field.id(), WireType::LengthDelimited);
                        put_length_delimited(buf, &run);
                        Ok(())
                    }
                    _ => items.iter().try_for_each(|item| {
                        self.tagged(type_name, field.name(), field.id(), field.kind(), item, buf)
                    }),
                }
            }
            Cardinality::Map => {
                let Value::Map(entries) = value else {
                    return Err(Error::mismatch(
                        type_name,
                        field.name(),
                        format!("map<string, {}>", field.kind().describe()),
                    ));
                };
                let mut entry = BytesMut::new();
                for (key, item) in entries {
                    entry.clear();
                    put_tag(&mut entry, MAP_KEY_ID, WireType::LengthDelimited);
                    put_length_delimited(&mut entry, key.as_bytes());
                    self.tagged(type_name, field.name(), MAP_VALUE_ID, field.kind(), item, &mut entry)?;
                    put_tag(buf, field.id(), WireType::LengthDelimited);
                    put_length_delimited(buf, &entry);
                }
                Ok(())
            }
        }
    }

    /// Write one tag and value
    fn tagged(
        &self,
        type_name: &str,
        field_name: &str,
        id: u32,
        kind: &FieldKind,
        value: &Value,
        buf: &mut BytesMut,
    ) -> Result<()> {
        match kind {
            FieldKind::Scalar(scalar) => {
                put_tag(buf, id, scalar.wire_type());
                scalar_payload(type_name, field_name, *scalar, value, buf)
            }
            FieldKind::Enum(_) => {
                put_tag(buf, id, WireType::Varint);
                scalar_payload(type_name, field_name, ScalarType::Int32, value, buf)
            }
            FieldKind::Message(target) => {
                let Value::Message(inner) = value else {
                    return Err(Error::mismatch(type_name, field_name, target.as_str()));
                };
                let nested = self.registry.resolve(target)?;
                let mut body = BytesMut::new();
                self.message(nested, inner, &mut body)?;
                put_tag(buf, id, WireType::LengthDelimited);
                put_length_delimited(buf, &body);
                Ok(())
            }
        }
    }
}

/// Write a scalar value without its tag.
///
/// Only values that decode back unchanged are accepted: signed kinds take
/// [`Value::Int`], unsigned kinds take [`Value::UInt`], and `float` takes a
/// [`Value::Double`] that `f32` holds exactly.
fn scalar_payload(
    type_name: &str,
    field_name: &str,
    scalar: ScalarType,
    value: &Value,
    buf: &mut BytesMut,
) -> Result<()> {
    let mismatch = || Error::mismatch(type_name, field_name, scalar.name());
    match scalar {
        ScalarType::Double => buf.put_f64_le(value.as_f64().ok_or_else(mismatch)?),
        ScalarType::Float => {
            let wide = value.as_f64().ok_or_else(mismatch)?;
            let narrow = wide as f32;
            if wide.is_finite() && f64::from(narrow) != wide {
                return Err(mismatch());
            }
            buf.put_f32_le(narrow);
        }
        ScalarType::Int32 => {
            let narrow = signed32(value).ok_or_else(mismatch)?;
            // negative int32 values are sign-extended to ten bytes
            put_varint(buf, i64::from(narrow) as u64);
        }
        ScalarType::Int64 => put_varint(buf, signed64(value).ok_or_else(mismatch)? as u64),
        ScalarType::UInt32 => put_varint(buf, u64::from(unsigned32(value).ok_or_else(mismatch)?)),
        ScalarType::UInt64 => put_varint(buf, unsigned64(value).ok_or_else(mismatch)?),
        ScalarType::SInt32 => {
            put_varint(buf, u64::from(zigzag_encode32(signed32(value).ok_or_else(mismatch)?)));
        }
        ScalarType::SInt64 => {
            put_varint(buf, zigzag_encode64(signed64(value).ok_or_else(mismatch)?));
        }
        ScalarType::Fixed32 => buf.put_u32_le(unsigned32(value).ok_or_else(mismatch)?),
        ScalarType::Fixed64 => buf.put_u64_le(unsigned64(value).ok_or_else(mismatch)?),
        ScalarType::SFixed32 => buf.put_i32_le(signed32(value).ok_or_else(mismatch)?),
        ScalarType::SFixed64 => buf.put_i64_le(signed64(value).ok_or_else(mismatch)?),
        ScalarType::Bool => {
            let Value::Bool(flag) = value else {
                return Err(mismatch());
            };
            put_varint(buf, u64::from(*flag));
        }
        ScalarType::String => {
            let text = value.as_str().ok_or_else(mismatch)?;
            put_length_delimited(buf, text.as_bytes());
        }
        ScalarType::Bytes => {
            let raw = value.as_bytes().ok_or_else(mismatch)?;
            put_length_delimited(buf, raw);
        }
    }
    Ok(())
}

const fn signed64(value: &Value) -> Option<i64> {
    match *value {
        Value::Int(wide) => Some(wide),
        _ => None,
    }
}

const fn unsigned64(value: &Value) -> Option<u64> {
    match *value {
        Value::UInt(wide) => Some(wide),
        _ => None,
    }
}

fn signed32(value: &Value) -> Option<i32> {
    signed64(value).and_then(|wide| i32::try_from(wide).ok())
}

fn unsigned32(value: &Value) -> Option<u32> {
    unsigned64(value).and_then(|wide| u32::try_from(wide).ok())
}

struct Decoder<'r> {
    registry: &'r SchemaRegistry,
}

impl Decoder<'_> {
    fn message(&self, descriptor: &MessageDescriptor, frame: &[u8], depth: usize) -> Result<Record> {
        let type_name = descriptor.name();
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::malformed(type_name, "message nesting too deep"));
        }

        let wire = |err: super::wire::WireError| Error::malformed(type_name, err.to_string());
        let mut reader = WireReader::new(frame);
        let mut record = Record::new();

        while !reader.is_empty() {
            let (id, wire_type) = reader.read_tag().map_err(wire)?;
            let Some(field) = descriptor.field_by_id(id) else {
                trace!(type_name, id, ?wire_type, "skipping unknown field");
                reader.skip(wire_type).map_err(wire)?;
                continue;
            };

            match field.cardinality() {
                Cardinality::Required | Cardinality::Optional => {
                    let value = self.tagged(descriptor, field, field.kind(), wire_type, &mut reader, depth)?;
                    record.insert(field.name(), value);
                }
                Cardinality::Repeated => {
                    let mut decoded = Vec::new();
                    match field.kind().packable_scalar() {
                        Some(scalar) if wire_type == WireType::LengthDelimited => {
                            let run = reader.read_length_delimited().map_err(wire)?;
                            let mut inner = WireReader::new(run);
                            while !inner.is_empty() {
                                decoded.push(scalar_value(type_name, field, scalar, &mut inner)?);
                            }
                        }
                        _ => decoded.push(self.tagged(
                            descriptor,
                            field,
                            field.kind(),
                            wire_type,
                            &mut reader,
                            depth,
                        )?),
                    }
                    let slot = record
                        .entry(field.name())
                        .or_insert_with(|| Value::List(Vec::new()));
                    if let Value::List(items) = slot {
                        items.extend(decoded);
                    }
                }
                Cardinality::Map => {
                    expect_wire_type(type_name, field, WireType::LengthDelimited, wire_type)?;
                    let body = reader.read_length_delimited().map_err(wire)?;
                    let (key, value) = self.map_entry(descriptor, field, body, depth)?;
                    let slot = record
                        .entry(field.name())
                        .or_insert_with(|| Value::Map(BTreeMap::new()));
                    if let Value::Map(entries) = slot {
                        entries.insert(key, value);
                    }
                }
            }
        }

        if let Some(missing) = descriptor
            .fields()
            .iter()
            .find(|field| field.cardinality() == Cardinality::Required && !record.contains(field.name()))
        {
            return Err(Error::MissingRequiredField {
                type_name: type_name.to_owned(),
                field: missing.name().to_owned(),
            });
        }

        Ok(record)
    }

    fn map_entry(
        &self,
        descriptor: &MessageDescriptor,
        field: &FieldDescriptor,
        body: &[u8],
        depth: usize,
    ) -> Result<(String, Value)> {
        let type_name = descriptor.name();
        let wire = |err: super::wire::WireError| Error::malformed(type_name, err.to_string());
        let mut reader = WireReader::new(body);
        let mut key = String::new();
        let mut value = None;

        while !reader.is_empty() {
            let (id, wire_type) = reader.read_tag().map_err(wire)?;
            match id {
                MAP_KEY_ID => {
                    expect_wire_type(type_name, field, WireType::LengthDelimited, wire_type)?;
                    let raw = reader.read_length_delimited().map_err(wire)?;
                    key = utf8(type_name, raw)?;
                }
                MAP_VALUE_ID => {
                    value = Some(self.tagged(descriptor, field, field.kind(), wire_type, &mut reader, depth)?);
                }
                _ => reader.skip(wire_type).map_err(wire)?,
            }
        }

        let value = match (value, field.kind()) {
            (Some(value), _) => value,
            // an absent message is decoded as an empty one so its required fields are checked
            (None, FieldKind::Message(target)) => {
                let nested = self.registry.resolve(target)?;
                Value::Message(self.message(nested, &[], depth + 1)?)
            }
            (None, FieldKind::Enum(_)) => Value::Int(0),
            (None, FieldKind::Scalar(scalar)) => default_value(*scalar),
        };
        Ok((key, value))
    }

    /// Read one value whose tag has already been consumed
    fn tagged(
        &self,
        descriptor: &MessageDescriptor,
        field: &FieldDescriptor,
        kind: &FieldKind,
        wire_type: WireType,
        reader: &mut WireReader<'_>,
        depth: usize,
    ) -> Result<Value> {
        let type_name = descriptor.name();
        expect_wire_type(type_name, field, kind.wire_type(), wire_type)?;
        match kind {
            FieldKind::Scalar(scalar) => scalar_value(type_name, field, *scalar, reader),
            FieldKind::Enum(_) => scalar_value(type_name, field, ScalarType::Int32, reader),
            FieldKind::Message(target) => {
                let body = reader
                    .read_length_delimited()
                    .map_err(|err| Error::malformed(type_name, err.to_string()))?;
                let nested = self.registry.resolve(target)?;
                self.message(nested, body, depth + 1).map(Value::Message)
            }
        }
    }
}

fn expect_wire_type(
    type_name: &str,
    field: &FieldDescriptor,
    expected: WireType,
    found: WireType,
) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::malformed(
            type_name,
            format!(
                "field {} ({}) expects wire type {}, got {}",
                field.name(),
                field.id(),
                expected.as_u8(),
                found.as_u8()
            ),
        ))
    }
}

/// Read a scalar payload whose tag has already been consumed
fn scalar_value(
    type_name: &str,
    field: &FieldDescriptor,
    scalar: ScalarType,
    reader: &mut WireReader<'_>,
) -> Result<Value> {
    let wire = |err: super::wire::WireError| {
        Error::malformed(type_name, format!("field {}: {err}", field.name()))
    };
    Ok(match scalar {
        ScalarType::Double => Value::Double(f64::from_bits(reader.read_fixed64().map_err(wire)?)),
        ScalarType::Float => {
            Value::Double(f64::from(f32::from_bits(reader.read_fixed32().map_err(wire)?)))
        }
        ScalarType::Int32 => Value::Int(i64::from(reader.read_varint().map_err(wire)? as u32 as i32)),
        ScalarType::Int64 => Value::Int(reader.read_varint().map_err(wire)? as i64),
        ScalarType::UInt32 => Value::UInt(u64::from(reader.read_varint().map_err(wire)? as u32)),
        ScalarType::UInt64 => Value::UInt(reader.read_varint().map_err(wire)?),
        ScalarType::SInt32 => {
            Value::Int(i64::from(zigzag_decode32(reader.read_varint().map_err(wire)? as u32)))
        }
        ScalarType::SInt64 => Value::Int(zigzag_decode64(reader.read_varint().map_err(wire)?)),
        ScalarType::Fixed32 => Value::UInt(u64::from(reader.read_fixed32().map_err(wire)?)),
        ScalarType::Fixed64 => Value::UInt(reader.read_fixed64().map_err(wire)?),
        ScalarType::SFixed32 => Value::Int(i64::from(reader.read_fixed32().map_err(wire)? as i32)),
        ScalarType::SFixed64 => Value::Int(reader.read_fixed64().map_err(wire)? as i64),
        ScalarType::Bool => Value::Bool(reader.read_varint().map_err(wire)? != 0),
        ScalarType::String => {
            Value::String(utf8(type_name, reader.read_length_delimited().map_err(wire)?)?)
        }
        ScalarType::Bytes => {
            Value::Bytes(Bytes::copy_from_slice(reader.read_length_delimited().map_err(wire)?))
        }
    })
}

fn utf8(type_name: &str, raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|err| Error::malformed(type_name, format!("invalid UTF-8: {err}")))
}

/// Value a scalar map entry takes when its value field is absent
fn default_value(scalar: ScalarType) -> Value {
    match scalar {
        ScalarType::Double | ScalarType::Float => Value::Double(0.0),
        ScalarType::UInt32 | ScalarType::UInt64 | ScalarType::Fixed32 | ScalarType::Fixed64 => {
            Value::UInt(0)
        }
        ScalarType::Bool => Value::Bool(false),
        ScalarType::String => Value::String(String::new()),
        ScalarType::Bytes => Value::Bytes(Bytes::new()),
        ScalarType::Int32
        | ScalarType::Int64
        | ScalarType::SInt32
        | ScalarType::SInt64
        | ScalarType::SFixed32
        | ScalarType::SFixed64 => Value::Int(0),
    }
}
