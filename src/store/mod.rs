//! Persistence layer: libSQL-backed email log and match history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{EmailLogStore, MatchHistoryStore, StatusCounts};
