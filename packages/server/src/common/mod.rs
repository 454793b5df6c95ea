// Common types and utilities shared across the application

pub mod entity_ids;
pub mod id;
pub mod payload;
pub mod time;

pub use entity_ids::*;
pub use id::Id;
pub use payload::{unwrap_payload, MalformedPayload, PayloadArchive};
pub use time::now_millis;
