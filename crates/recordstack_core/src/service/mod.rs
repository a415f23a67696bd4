//! Generic query and mutation services.
//!
//! # Responsibility
//! - Expose retrieve/count/insert/delete parameterized by record type,
//!   filter, ordering and batching.
//! - Apply the manager's default-session rule when a call omits a session.

pub mod mutation_service;
pub mod query_service;

use crate::error::StackResult;
use crate::manager::SessionManager;
use crate::query::request::FetchRequest;
use crate::session::Session;

fn resolve_session(manager: &SessionManager, session: Option<&Session>) -> StackResult<Session> {
    match session {
        Some(session) => Ok(session.clone()),
        None => manager.default_session(),
    }
}

/// Copy of `request` with the configured default batch size filled in.
fn prepare_request(manager: &SessionManager, request: &FetchRequest) -> FetchRequest {
    let mut request = request.clone();
    if request.batch_size.is_none() {
        request.batch_size = manager.config().default_batch_size;
    }
    request
}
