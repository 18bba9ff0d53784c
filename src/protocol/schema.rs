//! Schema registry built from a compiled JSON schema document.
//!
//! The document uses the protobufjs `Root.toJSON()` layout:
//!
//! ```text
//! { "nested": {
//!     "Namespace": { "nested": { ... } },
//!     "TypeName": {
//!       "fields": { "Field": { "rule": "required", "type": "sint32", "id": 1 } },
//!       "nested": { "Inner": { "fields": { ... } } }
//!     },
//!     "EnumName": { "values": { "A": 0, "B": 1 } }
//!   } }
//! ```
//!
//! Field declaration order in the document is preserved and drives encode order.

use std::collections::HashMap;

use serde_json::{Map, Value as Json};
use tracing::debug;

use super::wire::{MAX_FIELD_ID, WireType};
use super::{Error, Result};

/// Schema shipped with the crate: the clock/count/status service and its roster types
pub const BUNDLED_SCHEMA: &str = include_str!("schema.json");

/// Protobuf scalar types understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// 64-bit IEEE float
    Double,
    /// 32-bit IEEE float
    Float,
    /// Signed 32-bit, plain varint
    Int32,
    /// Signed 64-bit, plain varint
    Int64,
    /// Unsigned 32-bit varint
    UInt32,
    /// Unsigned 64-bit varint
    UInt64,
    /// Signed 32-bit, zig-zag varint
    SInt32,
    /// Signed 64-bit, zig-zag varint
    SInt64,
    /// Unsigned 32-bit, fixed width
    Fixed32,
    /// Unsigned 64-bit, fixed width
    Fixed64,
    /// Signed 32-bit, fixed width
    SFixed32,
    /// Signed 64-bit, fixed width
    SFixed64,
    /// Boolean varint
    Bool,
    /// UTF-8 string
    String,
    /// Raw byte sequence
    Bytes,
}

impl ScalarType {
    /// Parse a schema type name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "double" => Self::Double,
            "float" => Self::Float,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "sint32" => Self::SInt32,
            "sint64" => Self::SInt64,
            "fixed32" => Self::Fixed32,
            "fixed64" => Self::Fixed64,
            "sfixed32" => Self::SFixed32,
            "sfixed64" => Self::SFixed64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        })
    }

    /// Schema type name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::SInt32 => "sint32",
            Self::SInt64 => "sint64",
            Self::Fixed32 => "fixed32",
            Self::Fixed64 => "fixed64",
            Self::SFixed32 => "sfixed32",
            Self::SFixed64 => "sfixed64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }

    /// Wire type a single value of this scalar is tagged with
    #[must_use]
    pub const fn wire_type(self) -> WireType {
        match self {
            Self::Double | Self::Fixed64 | Self::SFixed64 => WireType::Fixed64,
            Self::Float | Self::Fixed32 | Self::SFixed32 => WireType::Fixed32,
            Self::String | Self::Bytes => WireType::LengthDelimited,
            Self::Int32
            | Self::Int64
            | Self::UInt32
            | Self::UInt64
            | Self::SInt32
            | Self::SInt64
            | Self::Bool => WireType::Varint,
        }
    }

    /// Whether repeated values of this scalar may use packed encoding
    #[must_use]
    pub const fn is_packable(self) -> bool {
        !matches!(self, Self::String | Self::Bytes)
    }
}

/// What a field's values are
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Built-in scalar
    Scalar(ScalarType),
    /// Nested message, by fully qualified name
    Message(String),
    /// Enum, by fully qualified name; encoded as `int32`
    Enum(String),
}

impl FieldKind {
    /// Wire type a single value of this kind is tagged with
    #[must_use]
    pub const fn wire_type(&self) -> WireType {
        match self {
            Self::Scalar(scalar) => scalar.wire_type(),
            Self::Message(_) => WireType::LengthDelimited,
            Self::Enum(_) => WireType::Varint,
        }
    }

    /// Scalar used on the wire, if this kind is not a message
    #[must_use]
    pub const fn packable_scalar(&self) -> Option<ScalarType> {
        match self {
            Self::Scalar(scalar) if scalar.is_packable() => Some(*scalar),
            Self::Enum(_) => Some(ScalarType::Int32),
            _ => None,
        }
    }

    /// Human-readable type name for error messages
    #[must_use]
    pub fn describe(&self) -> &str {
        match self {
            Self::Scalar(scalar) => scalar.name(),
            Self::Message(name) | Self::Enum(name) => name,
        }
    }
}

/// How many values a field carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly one value must be present
    Required,
    /// Zero or one value
    Optional,
    /// Any number of values, in order
    Repeated,
    /// String-keyed map, encoded as repeated key/value entries
    Map,
}

/// One field of a message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    id: u32,
    kind: FieldKind,
    cardinality: Cardinality,
    packed: bool,
}

impl FieldDescriptor {
    /// Field name as written in records
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire id
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Value kind (map value kind for map fields)
    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Cardinality
    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// True if repeated scalars are written as a single packed run
    #[must_use]
    pub const fn is_packed(&self) -> bool {
        self.packed
    }
}

/// Compiled description of one message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
    by_id: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
}

impl MessageDescriptor {
    /// Fully qualified type name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look a field up by wire id
    #[must_use]
    pub fn field_by_id(&self, id: u32) -> Option<&FieldDescriptor> {
        self.by_id.get(&id).map(|&index| &self.fields[index])
    }

    /// Look a field up by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&index| &self.fields[index])
    }
}

/// Immutable set of message descriptors, shared read-only by every caller
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    messages: HashMap<String, MessageDescriptor>,
    enums: HashMap<String, Vec<(String, i32)>>,
    simple_names: HashMap<String, Vec<String>>,
}

/// Raw type collected during the first pass, before references are resolved
struct PendingType<'a> {
    name: String,
    fields: &'a Map<String, Json>,
}

impl SchemaRegistry {
    /// Build the registry for [`BUNDLED_SCHEMA`]
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_SCHEMA)
    }

    /// Parse a schema document
    pub fn from_json(document: &str) -> Result<Self> {
        let root: Json = serde_json::from_str(document)?;
        Self::from_value(&root)
    }

    /// Build from an already parsed schema document
    pub fn from_value(root: &Json) -> Result<Self> {
        let root = root
            .as_object()
            .ok_or_else(|| Error::invalid_schema("document root must be an object"))?;

        let mut registry = Self::default();
        let mut pending = Vec::new();
        if let Some(nested) = root.get("nested") {
            registry.collect(nested, "", &mut pending)?;
        }

        for raw in &pending {
            let descriptor = registry.compile(raw)?;
            registry.messages.insert(raw.name.clone(), descriptor);
        }

        debug!(
            messages = registry.messages.len(),
            enums = registry.enums.len(),
            "schema registry built"
        );
        Ok(registry)
    }

    /// Resolve a type name to its descriptor
    ///
    /// Accepts a fully qualified name (optionally with a leading dot), or a
    /// bare simple name when exactly one type in the registry carries it.
    pub fn resolve(&self, type_name: &str) -> Result<&MessageDescriptor> {
        let name = type_name.strip_prefix('.').unwrap_or(type_name);
        if let Some(descriptor) = self.messages.get(name) {
            return Ok(descriptor);
        }
        match self.simple_names.get(name).map(Vec::as_slice) {
            Some([only]) => self.messages.get(only).ok_or_else(|| unknown(type_name)),
            _ => Err(unknown(type_name)),
        }
    }

    /// True if `type_name` resolves
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_ok()
    }

    /// Fully qualified names of every message type
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    /// Values of an enum, in declaration order
    #[must_use]
    pub fn enum_values(&self, enum_name: &str) -> Option<&[(String, i32)]> {
        self.enums.get(enum_name).map(Vec::as_slice)
    }

    /// Encode `record` as a `type_name` frame
    pub fn encode(&self, type_name: &str, record: &super::Record) -> Result<bytes::Bytes> {
        super::encode(self, type_name, record)
    }

    /// Decode a `type_name` frame
    pub fn decode(&self, type_name: &str, frame: &[u8]) -> Result<super::Record> {
        super::decode(self, type_name, frame)
    }

    fn collect<'a>(
        &mut self,
        nested: &'a Json,
        prefix: &str,
        pending: &mut Vec<PendingType<'a>>,
    ) -> Result<()> {
        let nested = nested
            .as_object()
            .ok_or_else(|| Error::invalid_schema(format!("`nested` of {prefix:?} is not an object")))?;

        for (name, node) in nested {
            let full = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            let node = node
                .as_object()
                .ok_or_else(|| Error::invalid_schema(format!("{full} is not an object")))?;

            if let Some(fields) = node.get("fields") {
                let fields = fields
                    .as_object()
                    .ok_or_else(|| Error::invalid_schema(format!("{full}.fields is not an object")))?;
                self.register_name(&full, name)?;
                pending.push(PendingType {
                    name: full.clone(),
                    fields,
                });
            } else if let Some(values) = node.get("values") {
                self.register_name(&full, name)?;
                self.enums.insert(full.clone(), parse_enum(&full, values)?);
            }

            if let Some(inner) = node.get("nested") {
                self.collect(inner, &full, pending)?;
            }
        }
        Ok(())
    }

    fn register_name(&mut self, full: &str, simple: &str) -> Result<()> {
        let taken = self.simple_names.values().flatten().any(|existing| existing == full);
        if taken {
            return Err(Error::invalid_schema(format!("type {full} defined twice")));
        }
        self.simple_names
            .entry(simple.to_owned())
            .or_default()
            .push(full.to_owned());
        Ok(())
    }

    fn compile(&self, raw: &PendingType<'_>) -> Result<MessageDescriptor> {
        let mut fields = Vec::with_capacity(raw.fields.len());
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();

        for (field_name, definition) in raw.fields {
            let field = self.compile_field(&raw.name, field_name, definition)?;
            if by_id.insert(field.id, fields.len()).is_some() {
                return Err(Error::invalid_schema(format!(
                    "{}: field id {} used twice",
                    raw.name, field.id
                )));
            }
            if by_name.insert(field.name.clone(), fields.len()).is_some() {
                return Err(Error::invalid_schema(format!(
                    "{}: field {} declared twice",
                    raw.name, field.name
                )));
            }
            fields.push(field);
        }

        Ok(MessageDescriptor {
            name: raw.name.clone(),
            fields,
            by_id,
            by_name,
        })
    }

    fn compile_field(&self, scope: &str, name: &str, definition: &Json) -> Result<FieldDescriptor> {
        let location = format!("{scope}.{name}");
        let definition = definition
            .as_object()
            .ok_or_else(|| Error::invalid_schema(format!("{location} is not an object")))?;

        let id = definition
            .get("id")
            .and_then(Json::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .filter(|id| (1..=MAX_FIELD_ID).contains(id))
            .ok_or_else(|| Error::invalid_schema(format!("{location}: missing or invalid id")))?;

        let type_name = definition
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::invalid_schema(format!("{location}: missing type")))?;
        let kind = self.resolve_kind(scope, type_name)?;

        let cardinality = if let Some(key_type) = definition.get("keyType") {
            if key_type.as_str() != Some("string") {
                return Err(Error::invalid_schema(format!(
                    "{location}: only string map keys are supported"
                )));
            }
            Cardinality::Map
        } else {
            match definition.get("rule").and_then(Json::as_str) {
                None | Some("optional") => Cardinality::Optional,
                Some("required") => Cardinality::Required,
                Some("repeated") => Cardinality::Repeated,
                Some(other) => {
                    return Err(Error::invalid_schema(format!(
                        "{location}: unknown rule {other:?}"
                    )));
                }
            }
        };

        let packed = cardinality == Cardinality::Repeated
            && kind.packable_scalar().is_some()
            && definition
                .get("options")
                .and_then(|options| options.get("packed"))
                .and_then(Json::as_bool)
                .unwrap_or(false);

        Ok(FieldDescriptor {
            name: name.to_owned(),
            id,
            kind,
            cardinality,
            packed,
        })
    }

    /// Resolve a field type the way protobuf scoping does: innermost scope first.
    fn resolve_kind(&self, scope: &str, type_name: &str) -> Result<FieldKind> {
        if let Some(scalar) = ScalarType::from_name(type_name) {
            return Ok(FieldKind::Scalar(scalar));
        }

        if let Some(absolute) = type_name.strip_prefix('.') {
            return self.lookup_kind(absolute).ok_or_else(|| unknown(type_name));
        }

        let mut scope = scope;
        loop {
            let candidate = if scope.is_empty() {
                type_name.to_owned()
            } else {
                format!("{scope}.{type_name}")
            };
            if let Some(kind) = self.lookup_kind(&candidate) {
                return Ok(kind);
            }
            if scope.is_empty() {
                return Err(unknown(type_name));
            }
            scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
        }
    }

    fn lookup_kind(&self, full: &str) -> Option<FieldKind> {
        if self.enums.contains_key(full) {
            return Some(FieldKind::Enum(full.to_owned()));
        }
        let known = self
            .simple_names
            .values()
            .flatten()
            .any(|existing| existing == full);
        known.then(|| FieldKind::Message(full.to_owned()))
    }
}

fn parse_enum(name: &str, values: &Json) -> Result<Vec<(String, i32)>> {
    let values = values
        .as_object()
        .ok_or_else(|| Error::invalid_schema(format!("{name}.values is not an object")))?;
    values
        .iter()
        .map(|(label, number)| {
            number
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(|n| (label.clone(), n))
                .ok_or_else(|| Error::invalid_schema(format!("{name}.{label} is not an int32")))
        })
        .collect()
}

fn unknown(name: &str) -> Error {
    Error::UnknownType {
        name: name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_schema_resolves_catalog_types() {
        let registry = SchemaRegistry::bundled().unwrap();
        for name in [
            "ClockRequest",
            "ClockResponse",
            "CountRequest",
            "CountResponse",
            "StatusRequest",
            "StatusResponse",
            "StatusResponse.Status",
            "Roster",
            "ServerIdentity",
        ] {
            assert!(registry.contains(name), "{name} should resolve");
        }
    }

    #[test]
    fn test_unknown_type() {
        let registry = SchemaRegistry::bundled().unwrap();
        let err = registry.resolve("NoSuchType").unwrap_err();
        assert!(matches!(err, Error::UnknownType { ref name } if name == "NoSuchType"));
    }

    #[test]
    fn test_field_declaration_order_preserved() {
        let registry = SchemaRegistry::bundled().unwrap();
        let identity = registry.resolve("ServerIdentity").unwrap();
        let names: Vec<_> = identity.fields().iter().map(FieldDescriptor::name).collect();
        assert_eq!(names, ["Public", "Id", "Address", "Description"]);

        let address = identity.field("Address").unwrap();
        assert_eq!(address.id(), 3);
        assert_eq!(address.cardinality(), Cardinality::Required);
        assert_eq!(address.kind(), &FieldKind::Scalar(ScalarType::String));
    }

    #[test]
    fn test_nested_reference_resolves_inner_scope() {
        let registry = SchemaRegistry::bundled().unwrap();
        let status = registry.resolve("StatusResponse").unwrap();

        let system = status.field("system").unwrap();
        assert_eq!(system.cardinality(), Cardinality::Map);
        assert_eq!(
            system.kind(),
            &FieldKind::Message("StatusResponse.Status".to_owned())
        );

        let server = status.field_by_id(2).unwrap();
        assert_eq!(server.kind(), &FieldKind::Message("ServerIdentity".to_owned()));

        // bare simple name of a nested type is accepted when unambiguous
        assert_eq!(registry.resolve("Status").unwrap().name(), "StatusResponse.Status");
        assert_eq!(registry.resolve(".Roster").unwrap().name(), "Roster");
    }

    #[test]
    fn test_repeated_message_is_not_packed() {
        let registry = SchemaRegistry::bundled().unwrap();
        let list = registry.resolve("Roster").unwrap().field("List").unwrap();
        assert_eq!(list.cardinality(), Cardinality::Repeated);
        assert!(!list.is_packed());
    }

    #[test]
    fn test_unresolvable_reference_fails() {
        let document = r#"{"nested":{"A":{"fields":{"b":{"type":"Missing","id":1}}}}}"#;
        let err = SchemaRegistry::from_json(document).unwrap_err();
        assert!(matches!(err, Error::UnknownType { ref name } if name == "Missing"));
    }

    #[test]
    fn test_duplicate_field_id_rejected() {
        let document = r#"{"nested":{"A":{"fields":{
            "x":{"type":"int32","id":1},
            "y":{"type":"int32","id":1}}}}}"#;
        let err = SchemaRegistry::from_json(document).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_non_string_map_key_rejected() {
        let document = r#"{"nested":{"A":{"fields":{
            "m":{"keyType":"int32","type":"string","id":1}}}}}"#;
        let err = SchemaRegistry::from_json(document).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_enum_and_packed_fields() {
        let document = r#"{"nested":{"pkg":{"nested":{
            "Level":{"values":{"LOW":0,"HIGH":1}},
            "Reading":{"fields":{
                "level":{"type":"Level","id":1},
                "samples":{"rule":"repeated","type":"sint32","id":2,"options":{"packed":true}}
            }}
        }}}}"#;
        let registry = SchemaRegistry::from_json(document).unwrap();
        let reading = registry.resolve("pkg.Reading").unwrap();
        assert_eq!(
            reading.field("level").unwrap().kind(),
            &FieldKind::Enum("pkg.Level".to_owned())
        );
        assert!(reading.field("samples").unwrap().is_packed());
        assert_eq!(
            registry.enum_values("pkg.Level").unwrap(),
            &[("LOW".to_owned(), 0), ("HIGH".to_owned(), 1)]
        );
    }

    #[test]
    fn test_ambiguous_simple_name_rejected() {
        let document = r#"{"nested":{
            "a":{"nested":{"Ping":{"fields":{}}}},
            "b":{"nested":{"Ping":{"fields":{}}}}
        }}"#;
        let registry = SchemaRegistry::from_json(document).unwrap();
        assert!(registry.resolve("a.Ping").is_ok());
        assert!(matches!(
            registry.resolve("Ping"),
            Err(Error::UnknownType { .. })
        ));
    }

    #[test]
    fn test_invalid_json_surfaces() {
        assert!(matches!(
            SchemaRegistry::from_json("{not json"),
            Err(Error::Json(_))
        ));
    }
}
