//! Server identities, rosters, and the addresses derived from them.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::protocol::{Error, Record, Result, Value};

/// Prefix hashed together with the hex public key to form a server id.
const IDENTITY_URL_PREFIX: &str = "https://dedis.epfl.ch/id/";

/// One node of a roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Raw public key.
    pub public: Bytes,
    /// 16-byte UUID derived from the public key.
    pub id: Bytes,
    /// Node address, `tcp://host:port`.
    pub address: String,
    /// Free-form label.
    pub description: String,
}

impl ServerIdentity {
    /// Identity with only an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Identity for `public`, with its id derived as [`identity_id`] does.
    pub fn with_public(address: impl Into<String>, public: impl Into<Bytes>) -> Self {
        let public = public.into();
        let id = Bytes::copy_from_slice(identity_id(&public).as_bytes());
        Self {
            public,
            id,
            address: address.into(),
            description: String::new(),
        }
    }

    /// See [`websocket_url`].
    pub fn websocket_url(&self, path: &str) -> Result<String> {
        websocket_url(self, path)
    }

    pub(crate) fn to_record(&self) -> Record {
        let mut record = Record::new().with("Address", self.address.as_str());
        if !self.public.is_empty() {
            record.insert("Public", self.public.clone());
        }
        if !self.id.is_empty() {
            record.insert("Id", self.id.clone());
        }
        if !self.description.is_empty() {
            record.insert("Description", self.description.as_str());
        }
        record
    }

    pub(crate) fn from_record(record: &Record) -> Self {
        Self {
            public: bytes_field(record, "Public"),
            id: bytes_field(record, "Id"),
            address: string_field(record, "Address"),
            description: string_field(record, "Description"),
        }
    }
}

/// An ordered group of servers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// Roster identifier, empty when unassigned.
    pub id: Bytes,
    /// Members in order.
    pub list: Vec<ServerIdentity>,
    /// Aggregate public key, empty when unassigned.
    pub aggregate: Bytes,
}

impl Roster {
    /// Roster listing `servers` with no id or aggregate.
    #[must_use]
    pub fn new(servers: Vec<ServerIdentity>) -> Self {
        Self {
            list: servers,
            ..Self::default()
        }
    }

    pub(crate) fn to_record(&self) -> Record {
        let mut record = Record::new();
        if !self.id.is_empty() {
            record.insert("Id", self.id.clone());
        }
        if !self.list.is_empty() {
            let list = self
                .list
                .iter()
                .map(|server| Value::Message(server.to_record()))
                .collect::<Vec<_>>();
            record.insert("List", list);
        }
        if !self.aggregate.is_empty() {
            record.insert("Aggregate", self.aggregate.clone());
        }
        record
    }

    pub(crate) fn from_record(record: &Record) -> Self {
        let list = record
            .get("List")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_record)
            .map(ServerIdentity::from_record)
            .collect();
        Self {
            id: bytes_field(record, "Id"),
            list,
            aggregate: bytes_field(record, "Aggregate"),
        }
    }
}

impl From<Vec<ServerIdentity>> for Roster {
    fn from(servers: Vec<ServerIdentity>) -> Self {
        Self::new(servers)
    }
}

/// WebSocket URL for `path` on `server`.
///
/// Nodes listen for WebSocket clients one port above the address they
/// advertise, so `tcp://10.0.0.1:7002` with path `/Template/Count` becomes
/// `ws://10.0.0.1:7003/Template/Count`. A bare `host:port` is accepted too.
pub fn websocket_url(server: &ServerIdentity, path: &str) -> Result<String> {
    let address = server.address.as_str();
    let invalid = |reason: &str| Error::InvalidAddress {
        address: address.to_owned(),
        reason: reason.to_owned(),
    };

    let host_port = match address.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some(_) => return Err(invalid("only tcp:// addresses are supported")),
        None => address,
    };
    let (host, port) = host_port
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
    let port = port
        .checked_add(1)
        .ok_or_else(|| invalid("no port above the advertised one"))?;

    Ok(format!("ws://{host}:{port}{path}"))
}

/// Identifier of the server holding `public`: the URL-namespace UUIDv5 of
/// `https://dedis.epfl.ch/id/<hex(public)>`.
#[must_use]
pub fn identity_id(public: &[u8]) -> Uuid {
    let url = format!("{IDENTITY_URL_PREFIX}{}", hex::encode(public));
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
}

#[derive(Deserialize)]
struct GroupFile {
    #[serde(default)]
    servers: Vec<GroupEntry>,
}

#[derive(Deserialize)]
struct GroupEntry {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Public")]
    public: String,
    #[serde(rename = "Description", default)]
    description: String,
}

/// Parse a `public.toml` group file into a roster.
///
/// ```toml
/// [[servers]]
///   Address = "tcp://127.0.0.1:7002"
///   Public = "<base64 public key>"
///   Description = "node 1"
/// ```
///
/// Keys other than these three are ignored.
pub fn parse_public_toml(document: &str) -> Result<Roster> {
    let group: GroupFile = toml::from_str(document)?;
    let list = group
        .servers
        .into_iter()
        .map(|entry| -> Result<ServerIdentity> {
            let public = STANDARD.decode(entry.public.trim())?;
            let mut server = ServerIdentity::with_public(entry.address, public);
            server.description = entry.description;
            Ok(server)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Roster::new(list))
}

fn bytes_field(record: &Record, name: &str) -> Bytes {
    record
        .get(name)
        .and_then(Value::as_bytes)
        .cloned()
        .unwrap_or_default()
}

fn string_field(record: &Record, name: &str) -> String {
    record
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_port_is_one_above() {
        let server = ServerIdentity::new("tcp://127.0.0.1:7002");
        assert_eq!(
            server.websocket_url("/Template/Count").unwrap(),
            "ws://127.0.0.1:7003/Template/Count"
        );
    }

    #[test]
    fn bare_host_port_is_accepted() {
        let server = ServerIdentity::new("localhost:9000");
        assert_eq!(websocket_url(&server, "").unwrap(), "ws://localhost:9001");
    }

    #[test]
    fn bad_addresses_are_rejected() {
        for address in ["tcp://host", "tls://host:1", "tcp://host:port", "tcp://host:65535", ":80"] {
            let err = websocket_url(&ServerIdentity::new(address), "/x").unwrap_err();
            assert!(matches!(err, Error::InvalidAddress { .. }), "{address}: {err}");
        }
    }

    #[test]
    fn identity_id_is_stable_uuid_v5() {
        let first = identity_id(&[1, 2, 3]);
        assert_eq!(first, identity_id(&[1, 2, 3]));
        assert_ne!(first, identity_id(&[1, 2, 4]));
        assert_eq!(first.get_version_num(), 5);

        let expected = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"https://dedis.epfl.ch/id/010203");
        assert_eq!(first, expected);
    }

    #[test]
    fn parses_group_file() {
        let document = r#"
            [[servers]]
              Address = "tcp://127.0.0.1:7002"
              Suite = "Ed25519"
              Public = "AQID"
              Description = "first"
            [[servers]]
              Address = "tcp://127.0.0.1:7004"
              Public = "BAUG"
        "#;
        let roster = parse_public_toml(document).unwrap();
        assert_eq!(roster.list.len(), 2);

        let first = &roster.list[0];
        assert_eq!(first.address, "tcp://127.0.0.1:7002");
        assert_eq!(first.public.as_ref(), &[1, 2, 3]);
        assert_eq!(first.description, "first");
        assert_eq!(first.id.as_ref(), identity_id(&[1, 2, 3]).as_bytes());
        assert!(roster.list[1].description.is_empty());
    }

    #[test]
    fn group_file_errors_surface() {
        assert!(matches!(parse_public_toml("[[servers]"), Err(Error::Toml(_))));
        let bad_key = "[[servers]]\nAddress = \"tcp://a:1\"\nPublic = \"!!\"\n";
        assert!(matches!(parse_public_toml(bad_key), Err(Error::Base64(_))));
    }

    #[test]
    fn empty_group_file_is_empty_roster() {
        assert!(parse_public_toml("").unwrap().list.is_empty());
    }

    #[test]
    fn identity_record_omits_empty_optionals() {
        let record = ServerIdentity::new("tcp://a:1").to_record();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("Address").and_then(Value::as_str), Some("tcp://a:1"));
    }
}
