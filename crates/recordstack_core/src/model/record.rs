//! Session-bound record handles.
//!
//! A `Record` is only a reference `(id, type, owning session)`; field data
//! lives in the owning session's identity map and is read or written through
//! that session's worker.

use crate::error::StackResult;
use crate::model::schema::RecordType;
use crate::model::value::Value;
use crate::session::Session;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Stable identifier of one record across sessions and the store.
pub type RecordId = Uuid;

/// Handle to one record instance owned by exactly one session.
///
/// Handles are cheap to clone. A handle becomes invalid once its record is
/// deleted or its session is torn down; every accessor then fails with
/// `StackError::Invalidated`.
#[derive(Clone)]
pub struct Record {
    id: RecordId,
    entity: Arc<RecordType>,
    session: Session,
    // Keeps the session's copy of an unchanged record alive.
    _anchor: Arc<()>,
}

impl Record {
    pub(crate) fn new(
        id: RecordId,
        entity: Arc<RecordType>,
        session: Session,
        anchor: Arc<()>,
    ) -> Self {
        Self {
            id,
            entity,
            session,
            _anchor: anchor,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn record_type(&self) -> &str {
        &self.entity.name
    }

    pub fn entity(&self) -> &Arc<RecordType> {
        &self.entity
    }

    /// Session that owns this instance.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Reads one field; unset optional fields read as `Value::Null`.
    pub fn get(&self, field: &str) -> StackResult<Value> {
        let record = self.clone();
        let field = field.to_string();
        self.session
            .perform(move |scope| scope.get(&record, &field))
    }

    /// Writes one field in the owning session. The change stays pending until
    /// that session saves.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> StackResult<()> {
        let record = self.clone();
        let field = field.to_string();
        let value = value.into();
        self.session
            .perform(move |scope| scope.set(&record, &field, value))
    }

    /// Snapshot of every field as currently seen by the owning session.
    pub fn values(&self) -> StackResult<BTreeMap<String, Value>> {
        let record = self.clone();
        self.session.perform(move |scope| scope.values(&record))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.session.same_as(&other.session)
    }
}

impl Eq for Record {}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("record_type", &self.entity.name)
            .field("session", &self.session)
            .finish()
    }
}
