//! SQLite sink for normalized results and the cross-artifact comparison query.

mod query;
mod schema;
mod store;

pub use query::{ComparisonRecord, RowFilter};
pub use schema::CURRENT_SCHEMA_VERSION;
pub use store::SqliteResultStore;
