//! Field codec for the binary message protocol.
//!
//! - [`varint`]: 50-bit signed and unsigned variable-length integers
//! - [`MessageSchema`]: declarative field layouts with one generic
//!   encoder/decoder
//! - [`Status`]: reply status codes

mod schema;
mod status;
pub mod varint;

pub use schema::{Field, FieldKind, MessageSchema, Record, Value};
pub use status::Status;
pub use varint::{decode_vint50, decode_vuint50, encode_vint50, encode_vuint50};
