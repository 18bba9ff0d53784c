//! Schema registry, logical values, and the protobuf wire codec.
//!
//! Encode and decode are synchronous and pure; nothing in this module touches
//! the network.

mod codec;
mod error;
mod schema;
mod value;
pub mod wire;

pub use codec::{MAX_NESTING_DEPTH, decode, encode};
pub use error::{Error, Result};
pub use schema::{
    BUNDLED_SCHEMA, Cardinality, FieldDescriptor, FieldKind, MessageDescriptor, ScalarType,
    SchemaRegistry,
};
pub use value::{Record, Value};
