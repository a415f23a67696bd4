//! Mutation use-case service.
//!
//! # Responsibility
//! - Insert new records and delete existing ones through their owning
//!   session, optionally saving afterwards.
//!
//! # Invariants
//! - `delete_all` is a sequence of single deletions followed by at most one
//!   save. It is not one store transaction: a failure midway leaves the
//!   earlier deletions pending in the session.

use crate::error::{StackError, StackResult};
use crate::manager::SessionManager;
use crate::model::record::Record;
use crate::query::request::FetchRequest;
use crate::session::{resolver, Session};
use log::info;

/// Write-side entry points over a `SessionManager`.
#[derive(Clone, Copy)]
pub struct MutationService<'m> {
    manager: &'m SessionManager,
}

impl<'m> MutationService<'m> {
    pub fn new(manager: &'m SessionManager) -> Self {
        Self { manager }
    }

    /// Marks `record` deleted in its owning session.
    ///
    /// # Contract
    /// - `session = None` uses the record's own session.
    /// - `save = true` runs that session's save propagation afterwards.
    ///
    /// # Errors
    /// - `WrongSession` when `session` does not own `record`.
    /// - `Invalidated` when the record is already deleted or its session was
    ///   torn down.
    pub fn delete(&self, record: &Record, session: Option<&Session>, save: bool) -> StackResult<()> {
        let owner = record.session();
        if let Some(session) = session {
            if !session.same_as(owner) {
                return Err(StackError::WrongSession {
                    record_id: record.id(),
                });
            }
        }

        let record = record.clone();
        owner.perform(move |scope| {
            scope.delete(&record)?;
            if save {
                scope.save()?;
            }
            Ok(())
        })
    }

    /// Deletes every record matching `request` and returns how many were
    /// deleted. Sort, batch size and limit of `request` apply as in
    /// `retrieve`.
    pub fn delete_all(
        &self,
        request: &FetchRequest,
        session: Option<&Session>,
        save: bool,
    ) -> StackResult<usize> {
        let session = super::resolve_session(self.manager, session)?;
        let request = super::prepare_request(self.manager, request);

        let session_id = session.id();
        let record_type = request.record_type.clone();
        let deleted = session.perform(move |scope| {
            let matches = scope.fetch(&request)?;
            for record in &matches {
                scope.delete(record)?;
            }
            if save {
                scope.save()?;
            }
            Ok(matches.len())
        })?;

        info!(
            "event=delete_all module=service status=ok session={session_id} record_type={record_type} deleted={deleted} saved={save}"
        );
        Ok(deleted)
    }

    /// New unsaved record of `record_type` in `session` (or the default
    /// session).
    pub fn insert(&self, record_type: &str, session: Option<&Session>) -> StackResult<Record> {
        let session = super::resolve_session(self.manager, session)?;
        resolver::instantiate(&session, record_type)
    }
}
