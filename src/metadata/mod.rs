//! File metadata: records, the store trait and its SQLite implementation

pub mod errors;
pub mod record;
pub mod sqlite;
pub mod store;

pub use errors::MetadataError;
pub use record::{now_millis, FileRecord, Tags};
pub use sqlite::SqliteMetadataStore;
pub use store::{CacheUpdate, MetadataStore};
