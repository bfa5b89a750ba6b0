//! Data ingestion
//!
//! Row schema and delimited-text loading of match records.

pub mod loader;
pub mod schema;

pub use loader::{load_records, parse_line};
pub use schema::{ColumnSpec, SchemaDescriptor};
