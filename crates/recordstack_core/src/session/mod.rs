//! Units of work over the shared store.
//!
//! # Responsibility
//! - Confine each session's identity map and pending changes to a dedicated
//!   worker thread and expose blocking and future-based task submission.
//! - Implement save propagation: a root session writes to the store, a child
//!   session promotes its changes into its parent and then saves the parent.
//!
//! # Invariants
//! - A session's state is only touched by tasks running on its worker.
//! - Children may block on their parent's queue; parents never call children.
//! - After `invalidate`, every submission fails with `StackError::Invalidated`.
//!
//! # See also
//! - `query::executor` for how reads merge pending changes with store rows.

pub mod resolver;
mod state;
mod worker;

pub(crate) use state::OverlayEntry;

use crate::db::PersistentStore;
use crate::error::{StackError, StackResult, ValidationError, ValidationReason};
use crate::model::record::{Record, RecordId};
use crate::model::schema::{RecordType, Schema};
use crate::model::value::Value;
use crate::query::executor;
use crate::query::request::FetchRequest;
use futures::channel::oneshot;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use state::SessionState;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use worker::Worker;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Role of a session in the standard two-level stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Root session; saves write to the store.
    Main,
    /// Child of main; saves promote into main.
    Background,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Background => "background",
        }
    }
}

impl Display for SessionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to one session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    kind: SessionKind,
    parent: Option<Session>,
    store: Arc<PersistentStore>,
    timeout: Option<Duration>,
    invalidated: AtomicBool,
    worker: Worker,
}

impl Session {
    /// Starts a session worker. `parent = None` makes a root session.
    pub(crate) fn spawn(
        kind: SessionKind,
        parent: Option<Session>,
        store: Arc<PersistentStore>,
        schema: Arc<Schema>,
        timeout: Option<Duration>,
    ) -> StackResult<Self> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let label = format!("recordstack-{kind}-{id}");
        let worker = Worker::spawn(label, SessionState::new(schema))
            .map_err(|err| StackError::Store(err.into()))?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                kind,
                parent,
                store,
                timeout,
                invalidated: AtomicBool::new(false),
                worker,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> SessionKind {
        self.inner.kind
    }

    pub fn parent(&self) -> Option<&Session> {
        self.inner.parent.as_ref()
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same session.
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn store(&self) -> &Arc<PersistentStore> {
        &self.inner.store
    }

    /// Runs `task` on the session worker and waits for its result.
    ///
    /// # Errors
    /// - `WrongContext` when called from this session's own worker; use the
    ///   `SessionScope` passed to the running task instead.
    /// - `Invalidated` after teardown.
    /// - `Timeout` when the configured operation timeout elapses first. The
    ///   task itself keeps running.
    /// - `TaskPanicked` when `task` panics.
    pub fn perform<R, F>(&self, task: F) -> StackResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut SessionScope<'_>) -> StackResult<R> + Send + 'static,
    {
        if self.inner.worker.is_current() {
            return Err(StackError::WrongContext);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.submit(task, move |result| {
            let _ = reply_tx.send(result);
        })?;

        match self.inner.timeout {
            Some(timeout) => reply_rx.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => StackError::Timeout {
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => StackError::Invalidated("session"),
            })?,
            None => reply_rx
                .recv()
                .map_err(|_| StackError::Invalidated("session"))?,
        }
    }

    /// Queues `task` and returns a future resolved with its result.
    ///
    /// Never blocks, so it may also be called from inside a running task.
    pub fn perform_async<R, F>(&self, task: F) -> impl Future<Output = StackResult<R>> + Send
    where
        R: Send + 'static,
        F: FnOnce(&mut SessionScope<'_>) -> StackResult<R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submitted = self.submit(task, move |result| {
            let _ = reply_tx.send(result);
        });

        async move {
            submitted?;
            reply_rx
                .await
                .map_err(|_| StackError::Invalidated("session"))?
        }
    }

    /// Saves pending changes: to the store for a root session, into the
    /// parent (and then the parent's save) for a child.
    pub fn save(&self) -> StackResult<()> {
        self.perform(|scope| scope.save())
    }

    pub fn has_changes(&self) -> StackResult<bool> {
        self.perform(|scope| Ok(scope.has_changes()))
    }

    /// Fails every later submission and closes the worker queue without
    /// waiting for the worker to exit.
    ///
    /// Tasks already queued complete with `Invalidated`.
    pub(crate) fn retire(&self) {
        if self.inner.invalidated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.worker.close();
        info!(
            "event=session_invalidate module=session status=ok session={} kind={}",
            self.inner.id, self.inner.kind
        );
    }

    /// `retire`, then waits for the worker to drain its queue and exit.
    pub(crate) fn invalidate(&self) {
        self.retire();
        self.inner.worker.join();
    }

    fn submit<R, F, C>(&self, task: F, complete: C) -> StackResult<()>
    where
        R: Send + 'static,
        F: FnOnce(&mut SessionScope<'_>) -> StackResult<R> + Send + 'static,
        C: FnOnce(StackResult<R>) + Send + 'static,
    {
        if self.is_invalidated() {
            return Err(StackError::Invalidated("session"));
        }

        let session = self.clone();
        self.inner.worker.submit(Box::new(move |state: &mut SessionState| {
            let result = if session.is_invalidated() {
                Err(StackError::Invalidated("session"))
            } else {
                let mut scope = SessionScope {
                    session: &session,
                    state,
                };
                match panic::catch_unwind(AssertUnwindSafe(|| task(&mut scope))) {
                    Ok(result) => result,
                    Err(_) => {
                        error!(
                            "event=session_task module=session status=error session={} kind={} error_code=task_panicked",
                            session.inner.id, session.inner.kind
                        );
                        Err(StackError::TaskPanicked)
                    }
                }
            };
            complete(result);
        }))
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Access to a session's state from inside one of its tasks.
///
/// Every method runs synchronously on the worker; records passed in must be
/// owned by this session.
pub struct SessionScope<'a> {
    session: &'a Session,
    state: &'a mut SessionState,
}

impl SessionScope<'_> {
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Resolves `record_type` against the session's schema, cached per
    /// session.
    pub fn describe(&mut self, record_type: &str) -> StackResult<Arc<RecordType>> {
        self.state.describe(record_type)
    }

    /// Creates a new pending record with default field values.
    pub fn insert(&mut self, record_type: &str) -> StackResult<Record> {
        let entity = self.state.describe(record_type)?;
        let (id, anchor) = self.state.insert(Arc::clone(&entity));
        Ok(Record::new(id, entity, self.session.clone(), anchor))
    }

    pub fn get(&self, record: &Record, field: &str) -> StackResult<Value> {
        self.ensure_owned(record)?;
        let object = self.state.object(&record.id())?;
        if object.entity.field(field).is_none() {
            return Err(StackError::Validation(ValidationError {
                record_type: object.entity.name.clone(),
                record_id: Some(record.id()),
                field: field.to_string(),
                reason: ValidationReason::UnknownField,
            }));
        }
        Ok(object.fields.get(field).cloned().unwrap_or(Value::Null))
    }

    pub fn set(&mut self, record: &Record, field: &str, value: impl Into<Value>) -> StackResult<()> {
        self.ensure_owned(record)?;
        self.state.set(record.id(), field, value.into())
    }

    pub fn values(&self, record: &Record) -> StackResult<BTreeMap<String, Value>> {
        self.ensure_owned(record)?;
        Ok(self.state.object(&record.id())?.fields.clone())
    }

    /// Marks `record` deleted; a pending insert is dropped outright.
    pub fn delete(&mut self, record: &Record) -> StackResult<()> {
        self.ensure_owned(record)?;
        self.state.delete(record.id())
    }

    pub fn fetch(&mut self, request: &FetchRequest) -> StackResult<Vec<Record>> {
        self.state.prune();
        executor::fetch(self, request)
    }

    pub fn count(&mut self, request: &FetchRequest) -> StackResult<usize> {
        executor::count(self, request)
    }

    pub fn has_changes(&self) -> bool {
        self.state.has_changes()
    }

    /// Same as `Session::save`, for use inside a running task.
    pub fn save(&mut self) -> StackResult<()> {
        let started_at = Instant::now();
        let session_id = self.session.id();
        let kind = self.session.kind();

        let result = self.save_pending();
        match &result {
            Ok(writes) => info!(
                "event=session_save module=session status=ok session={session_id} kind={kind} changes={writes} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=session_save module=session status=error session={session_id} kind={kind} duration_ms={} error_code={} error={err}",
                started_at.elapsed().as_millis(),
                err.code()
            ),
        }
        result.map(|_| ())
    }

    /// Pending changes of this session and its ancestors, nearest last.
    pub(crate) fn pending_overlay(&mut self) -> StackResult<Vec<OverlayEntry>> {
        let session = self.session;
        let mut merged = match session.parent() {
            Some(parent) => parent.perform(|scope| scope.pending_overlay())?,
            None => Vec::new(),
        };

        let own = self.state.overlay();
        if !own.is_empty() {
            let shadowed: HashSet<RecordId> = own.iter().map(|entry| entry.record_id).collect();
            merged.retain(|entry| !shadowed.contains(&entry.record_id));
            merged.extend(own);
        }
        Ok(merged)
    }

    /// Adds a fetched row to the identity map and returns its handle.
    pub(crate) fn register(
        &mut self,
        id: RecordId,
        entity: &Arc<RecordType>,
        fields: BTreeMap<String, Value>,
    ) -> Record {
        let anchor = self.state.register(id, entity, fields);
        Record::new(id, Arc::clone(entity), self.session.clone(), anchor)
    }

    fn save_pending(&mut self) -> StackResult<usize> {
        self.state.validate_pending()?;

        let session = self.session;
        match session.parent() {
            None => {
                let changes = self.state.change_set();
                session.store().apply(&changes)?;
                self.state.clear_changes();
                Ok(changes.writes.len())
            }
            Some(parent) => {
                let promoted = self.state.promotions();
                let count = promoted.len();
                if count > 0 {
                    parent.perform(move |scope| {
                        scope.state.absorb(promoted);
                        Ok(())
                    })?;
                    self.state.clear_changes();
                }
                parent.save()?;
                Ok(count)
            }
        }
    }

    fn ensure_owned(&self, record: &Record) -> StackResult<()> {
        if record.session().same_as(self.session) {
            Ok(())
        } else {
            Err(StackError::WrongSession {
                record_id: record.id(),
            })
        }
    }
}
