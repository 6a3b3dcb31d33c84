//! Transformation module.
//!
//! Turns raw CSV rows into prepared records:
//! - Values: scalar coercions (UUID, numbers, booleans, timestamps)
//! - Payload: legacy-serialized or JSON payloads to JSON
//! - Row: per-entity row transformer

pub mod payload;
pub mod row;
pub mod values;

pub use payload::{decode_payload, sniff, PayloadDecoder};
pub use row::{transform_row, RowTransformer};
pub use values::{
    parse_boolean, parse_date, parse_float, parse_integer, parse_timestamp, parse_uuid, TRUTHY,
};
