//! Shared identifier types used across the coordination crates.

mod types;

pub use types::{RecordId, SagaId};
