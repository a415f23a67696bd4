//! Query use-case service.
//!
//! # Responsibility
//! - Resolve the target session (explicit, or the manager's default).
//! - Run `retrieve` / `retrieve_first` / `count` as tasks on that session.
//!
//! # Invariants
//! - Queries never change a session's pending changes.
//! - `count` equals `retrieve(..).len()` for the same request without limit.

use crate::error::StackResult;
use crate::manager::SessionManager;
use crate::model::record::Record;
use crate::query::request::FetchRequest;
use crate::session::Session;

/// Read-side entry points over a `SessionManager`.
#[derive(Clone, Copy)]
pub struct QueryService<'m> {
    manager: &'m SessionManager,
}

impl<'m> QueryService<'m> {
    pub fn new(manager: &'m SessionManager) -> Self {
        Self { manager }
    }

    /// Ordered records matching `request`.
    ///
    /// # Contract
    /// - `session = None` runs against `SessionManager::default_session()`.
    /// - Sees the session's own pending changes and those of its ancestors.
    /// - Results do not depend on `batch_size`; `fetch_limit` truncates after
    ///   ordering.
    ///
    /// # Errors
    /// - `UnknownType`, `InvalidFilter`, `NotInitialized`, `Invalidated`.
    pub fn retrieve(
        &self,
        request: &FetchRequest,
        session: Option<&Session>,
    ) -> StackResult<Vec<Record>> {
        let session = super::resolve_session(self.manager, session)?;
        let request = super::prepare_request(self.manager, request);
        session.perform(move |scope| scope.fetch(&request))
    }

    /// First record of `retrieve` under the same request with limit 1.
    pub fn retrieve_first(
        &self,
        request: &FetchRequest,
        session: Option<&Session>,
    ) -> StackResult<Option<Record>> {
        let request = request.clone().limit(1);
        Ok(self.retrieve(&request, session)?.into_iter().next())
    }

    /// Number of matches. Ordering, batch size and limit are ignored and no
    /// record is materialized.
    pub fn count(&self, request: &FetchRequest, session: Option<&Session>) -> StackResult<usize> {
        let session = super::resolve_session(self.manager, session)?;
        let request = request.clone();
        session.perform(move |scope| scope.count(&request))
    }
}
