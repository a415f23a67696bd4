//! Session lifecycle and generic query engine over a record store.
//!
//! A [`SessionManager`] opens the store for a named schema and wires a main
//! session with a background child. [`QueryService`] and
//! [`MutationService`] run fetch/count/insert/delete requests against
//! either session, falling back to the manager's default session.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod manager;
pub mod model;
pub mod query;
pub mod service;
pub mod session;

pub use config::{CorruptStorePolicy, StackConfig};
pub use db::{StoreError, StoreLocation};
pub use error::{
    ErrorKind, StackError, StackResult, ValidationError, ValidationReason,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
pub use manager::SessionManager;
pub use model::catalog::SchemaCatalog;
pub use model::record::{Record, RecordId};
pub use model::schema::{FieldDef, FieldKind, RecordType, Schema, SchemaError};
pub use model::value::Value;
pub use query::parse::PredicateParseError;
pub use query::predicate::{CompareOp, Predicate};
pub use query::request::{FetchRequest, SortDescriptor, SortDirection};
pub use service::mutation_service::MutationService;
pub use service::query_service::QueryService;
pub use session::{Session, SessionKind, SessionScope};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
