//! Logical messages: schema-agnostic records of tagged values

use std::collections::BTreeMap;

use bytes::Bytes;

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `double` or `float`
    Double(f64),
    /// Signed integers: `int*`, `sint*`, `sfixed*`, enums
    Int(i64),
    /// Unsigned integers: `uint*`, `fixed*`
    UInt(u64),
    /// `bool`
    Bool(bool),
    /// `bytes`
    Bytes(Bytes),
    /// `string`
    String(String),
    /// Nested message
    Message(Record),
    /// Repeated field
    List(Vec<Value>),
    /// String-keyed map field
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Variant name for diagnostics
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Double(_) => "double",
            Self::Int(_) => "signed integer",
            Self::UInt(_) => "unsigned integer",
            Self::Bool(_) => "bool",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Message(_) => "message",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Integer view accepting either signedness, if it fits
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(value) => Some(value),
            Self::UInt(value) => i64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Unsigned view accepting either signedness, if non-negative
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::UInt(value) => Some(value),
            Self::Int(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Float view
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Double(value) => Some(value),
            _ => None,
        }
    }

    /// String view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Bytes view
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(value) => Some(value),
            _ => None,
        }
    }

    /// Nested record view
    #[must_use]
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Message(value) => Some(value),
            _ => None,
        }
    }

    /// Repeated view
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    /// Map view
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Message(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}

/// Field-name to value mapping for one message
///
/// Records carry no schema; they are checked against a descriptor when
/// encoded, and produced from one when decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Field value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// True if the field is set
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields set
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn entry(&mut self, name: &str) -> std::collections::btree_map::Entry<'_, String, Value> {
        self.fields.entry(name.to_owned())
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = Record::new()
            .with("Address", "tcp://127.0.0.1:7002")
            .with("Count", 4_i32)
            .with("Public", vec![1u8, 2, 3]);

        assert_eq!(record.len(), 3);
        assert_eq!(record.get("Address").and_then(Value::as_str), Some("tcp://127.0.0.1:7002"));
        assert_eq!(record.get("Count").and_then(Value::as_i64), Some(4));
        assert_eq!(
            record.get("Public").and_then(Value::as_bytes).map(Bytes::as_ref),
            Some(&[1u8, 2, 3][..])
        );
        assert!(!record.contains("Description"));
    }

    #[test]
    fn test_integer_views_cross_signedness() {
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(9).as_u64(), Some(9));
        assert_eq!(Value::String("9".into()).as_i64(), None);
    }
}
