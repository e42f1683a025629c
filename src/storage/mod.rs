pub mod duckdb;
pub mod traits;

pub use self::duckdb::DuckDbSessionStore;
pub use traits::{Session, SessionStore, StorageError};
