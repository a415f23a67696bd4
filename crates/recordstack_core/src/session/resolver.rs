//! Record type resolution and instantiation against a session.
//!
//! Descriptors are cached in the session that resolved them, so repeated
//! lookups never touch the schema map again.

use super::Session;
use crate::error::StackResult;
use crate::model::record::Record;
use crate::model::schema::RecordType;
use std::sync::Arc;

/// Looks up `record_type` in the session's schema.
///
/// # Errors
/// - `UnknownType` when the schema has no such record type.
pub fn describe(session: &Session, record_type: &str) -> StackResult<Arc<RecordType>> {
    let name = record_type.to_string();
    session.perform(move |scope| scope.describe(&name))
}

/// Creates a new, unsaved record of `record_type` owned by `session`.
///
/// Fields start at their declared default, or `Null`.
pub fn instantiate(session: &Session, record_type: &str) -> StackResult<Record> {
    let name = record_type.to_string();
    session.perform(move |scope| scope.insert(&name))
}
