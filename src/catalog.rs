//! Typed request builders and response parsers for the node's services.
//!
//! The catalog holds no state beyond the registry it encodes against, so one
//! instance can be shared freely. Sending is left to the caller, or to
//! [`MeshClient`](crate::MeshClient).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{Error, Record, Result, SchemaRegistry, Value};
use crate::roster::{Roster, ServerIdentity};

/// Ping that also asks the node to contact `Roster`.
pub const CLOCK_REQUEST: &str = "ClockRequest";
/// Reply to [`CLOCK_REQUEST`].
pub const CLOCK_RESPONSE: &str = "ClockResponse";
/// Ask a node how many requests it has served.
pub const COUNT_REQUEST: &str = "CountRequest";
/// Reply to [`COUNT_REQUEST`].
pub const COUNT_RESPONSE: &str = "CountResponse";
/// Ask a node for its status report.
pub const STATUS_REQUEST: &str = "StatusRequest";
/// Reply to [`STATUS_REQUEST`].
pub const STATUS_RESPONSE: &str = "StatusResponse";

/// Decoded `ClockResponse`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockResponse {
    /// Time the round took, in seconds.
    pub time: f64,
    /// Nodes that answered.
    pub children: i32,
}

/// Decoded `CountResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountResponse {
    /// Requests served so far.
    pub count: i32,
}

/// One named section of a status report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    /// Key/value pairs reported by the section.
    pub field: BTreeMap<String, String>,
}

/// Decoded `StatusResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResponse {
    /// Sections keyed by subsystem name.
    pub system: BTreeMap<String, Status>,
    /// Identity of the reporting node, when it sent one.
    pub server: Option<ServerIdentity>,
}

/// Request/response builders bound to a schema registry.
#[derive(Debug, Clone)]
pub struct Catalog {
    registry: Arc<SchemaRegistry>,
}

impl Catalog {
    /// Catalog over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Catalog over the bundled schema.
    pub fn bundled() -> Result<Self> {
        Ok(Self::new(Arc::new(SchemaRegistry::bundled()?)))
    }

    /// Registry used for every encode and decode.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// `ClockRequest` asking the node to reach `servers`.
    pub fn clock_request(&self, servers: &[ServerIdentity]) -> Result<Bytes> {
        let roster = Roster::new(servers.to_vec());
        let record = Record::new().with("Roster", roster.to_record());
        self.registry.encode(CLOCK_REQUEST, &record)
    }

    /// Parse a `ClockResponse` frame.
    pub fn decode_clock_response(&self, frame: &[u8]) -> Result<ClockResponse> {
        let record = self.registry.decode(CLOCK_RESPONSE, frame)?;
        let time = required(&record, CLOCK_RESPONSE, "Time")?
            .as_f64()
            .ok_or_else(|| Error::mismatch(CLOCK_RESPONSE, "Time", "double"))?;
        let children = required_i32(&record, CLOCK_RESPONSE, "Children")?;
        Ok(ClockResponse { time, children })
    }

    /// `CountRequest` frame. The message has no fields, so this is empty.
    pub fn count_request(&self) -> Result<Bytes> {
        self.registry.encode(COUNT_REQUEST, &Record::new())
    }

    /// Parse a `CountResponse` frame.
    pub fn decode_count_response(&self, frame: &[u8]) -> Result<CountResponse> {
        let record = self.registry.decode(COUNT_RESPONSE, frame)?;
        let count = required_i32(&record, COUNT_RESPONSE, "Count")?;
        Ok(CountResponse { count })
    }

    /// `StatusRequest` frame. The message has no fields, so this is empty.
    pub fn status_request(&self) -> Result<Bytes> {
        self.registry.encode(STATUS_REQUEST, &Record::new())
    }

    /// Parse a `StatusResponse` frame.
    pub fn decode_status_response(&self, frame: &[u8]) -> Result<StatusResponse> {
        let record = self.registry.decode(STATUS_RESPONSE, frame)?;

        let mut system = BTreeMap::new();
        if let Some(sections) = record.get("system").and_then(Value::as_map) {
            for (name, section) in sections {
                let section = section
                    .as_record()
                    .ok_or_else(|| Error::mismatch(STATUS_RESPONSE, "system", "map<string, Status>"))?;
                system.insert(name.clone(), status_from_record(section));
            }
        }
        let server = record
            .get("server")
            .and_then(Value::as_record)
            .map(ServerIdentity::from_record);

        Ok(StatusResponse { system, server })
    }

    /// Roster carried by a `ClockRequest` frame.
    pub fn decode_clock_request(&self, frame: &[u8]) -> Result<Roster> {
        let record = self.registry.decode(CLOCK_REQUEST, frame)?;
        let roster = required(&record, CLOCK_REQUEST, "Roster")?
            .as_record()
            .ok_or_else(|| Error::mismatch(CLOCK_REQUEST, "Roster", "Roster"))?;
        Ok(Roster::from_record(roster))
    }

    /// `ClockResponse` frame, as a node would answer.
    pub fn encode_clock_response(&self, response: &ClockResponse) -> Result<Bytes> {
        let record = Record::new()
            .with("Time", response.time)
            .with("Children", response.children);
        self.registry.encode(CLOCK_RESPONSE, &record)
    }

    /// `CountResponse` frame, as a node would answer.
    pub fn encode_count_response(&self, response: &CountResponse) -> Result<Bytes> {
        let record = Record::new().with("Count", response.count);
        self.registry.encode(COUNT_RESPONSE, &record)
    }

    /// `StatusResponse` frame, as a node would answer.
    pub fn encode_status_response(&self, response: &StatusResponse) -> Result<Bytes> {
        let mut record = Record::new();
        if !response.system.is_empty() {
            let sections: BTreeMap<String, Value> = response
                .system
                .iter()
                .map(|(name, status)| (name.clone(), Value::Message(status_to_record(status))))
                .collect();
            record.insert("system", sections);
        }
        if let Some(server) = &response.server {
            record.insert("server", server.to_record());
        }
        self.registry.encode(STATUS_RESPONSE, &record)
    }
}

fn status_to_record(status: &Status) -> Record {
    let mut record = Record::new();
    if !status.field.is_empty() {
        let field: BTreeMap<String, Value> = status
            .field
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();
        record.insert("field", field);
    }
    record
}

fn status_from_record(record: &Record) -> Status {
    let field = record
        .get("field")
        .and_then(Value::as_map)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_owned())))
                .collect()
        })
        .unwrap_or_default();
    Status { field }
}

fn required<'a>(record: &'a Record, type_name: &str, field: &str) -> Result<&'a Value> {
    record.get(field).ok_or_else(|| Error::MissingRequiredField {
        type_name: type_name.to_owned(),
        field: field.to_owned(),
    })
}

fn required_i32(record: &Record, type_name: &str, field: &str) -> Result<i32> {
    required(record, type_name, field)?
        .as_i64()
        .and_then(|value| i32::try_from(value).ok())
        .ok_or_else(|| Error::mismatch(type_name, field, "sint32"))
}
