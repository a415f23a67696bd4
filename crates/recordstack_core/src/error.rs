//! Error taxonomy surfaced by sessions, services and the lifecycle manager.
//!
//! # Responsibility
//! - Give every public failure a typed variant and a stable `code()`.
//! - Fold module-level errors (`StoreError`, predicate parse errors) into
//!   `StackError`.
//!
//! # Invariants
//! - No operation retries internally; `is_retryable` is advice for callers.

use crate::db::StoreError;
use crate::model::record::RecordId;
use crate::query::parse::PredicateParseError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StackResult<T> = Result<T, StackError>;

/// Coarse failure class with a stable machine-readable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    AlreadyInitialized,
    UnknownType,
    InvalidFilter,
    Invalidated,
    StoreIo,
    ValidationFailed,
    WrongSession,
    WrongContext,
    Timeout,
    TaskPanicked,
    LockPoisoned,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::UnknownType => "unknown_type",
            Self::InvalidFilter => "invalid_filter",
            Self::Invalidated => "invalidated",
            Self::StoreIo => "store_io",
            Self::ValidationFailed => "validation_failed",
            Self::WrongSession => "wrong_session",
            Self::WrongContext => "wrong_context",
            Self::Timeout => "timeout",
            Self::TaskPanicked => "task_panicked",
            Self::LockPoisoned => "lock_poisoned",
        }
    }
}

/// Why a field write or a save was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    UnknownField,
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    MissingRequired,
}

/// Field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub record_type: String,
    pub record_id: Option<RecordId>,
    pub field: String,
    pub reason: ValidationReason,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let target = format!("{}.{}", self.record_type, self.field);
        match &self.reason {
            ValidationReason::UnknownField => write!(f, "unknown field `{target}`"),
            ValidationReason::KindMismatch { expected, actual } => {
                write!(f, "field `{target}` expects {expected}, got {actual}")
            }
            ValidationReason::MissingRequired => match self.record_id {
                Some(id) => write!(f, "required field `{target}` is unset on record {id}"),
                None => write!(f, "required field `{target}` is unset"),
            },
        }
    }
}

impl Error for ValidationError {}

/// Error returned by every public stack operation.
#[derive(Debug)]
pub enum StackError {
    /// No stack has been set up.
    NotInitialized,
    /// `setup` called while a stack for `schema` is active.
    AlreadyInitialized { schema: String },
    /// Record type is absent from the active schema.
    UnknownType(String),
    /// Predicate or sort descriptor cannot be evaluated against the type.
    InvalidFilter(String),
    /// Target session or record has been torn down or deleted.
    Invalidated(&'static str),
    /// Underlying store failure.
    Store(StoreError),
    /// Field write or save rejected by schema constraints.
    Validation(ValidationError),
    /// Record used through a session that does not own it.
    WrongSession { record_id: RecordId },
    /// Blocking session call made from that session's own worker.
    WrongContext,
    /// Blocking wait exceeded the configured operation timeout.
    Timeout { waited_ms: u64 },
    /// Session task panicked; the worker keeps running.
    TaskPanicked,
    LockPoisoned(&'static str),
}

impl StackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorKind::AlreadyInitialized,
            Self::UnknownType(_) => ErrorKind::UnknownType,
            Self::InvalidFilter(_) => ErrorKind::InvalidFilter,
            Self::Invalidated(_) => ErrorKind::Invalidated,
            Self::Store(StoreError::Closed) => ErrorKind::Invalidated,
            Self::Store(_) => ErrorKind::StoreIo,
            Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::WrongSession { .. } => ErrorKind::WrongSession,
            Self::WrongContext => ErrorKind::WrongContext,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TaskPanicked => ErrorKind::TaskPanicked,
            Self::LockPoisoned(_) => ErrorKind::LockPoisoned,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Whether repeating the same call may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::StoreIo)
    }
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "session stack is not initialized"),
            Self::AlreadyInitialized { schema } => {
                write!(f, "session stack already initialized with schema `{schema}`")
            }
            Self::UnknownType(name) => write!(f, "unknown record type `{name}`"),
            Self::InvalidFilter(message) => write!(f, "invalid filter: {message}"),
            Self::Invalidated(target) => write!(f, "{target} has been invalidated"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::WrongSession { record_id } => {
                write!(f, "record {record_id} is not owned by the target session")
            }
            Self::WrongContext => write!(
                f,
                "blocking session call issued from the session's own worker"
            ),
            Self::Timeout { waited_ms } => {
                write!(f, "session operation timed out after {waited_ms} ms")
            }
            Self::TaskPanicked => write!(f, "session task panicked"),
            Self::LockPoisoned(what) => write!(f, "{what} lock poisoned"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for StackError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ValidationError> for StackError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<PredicateParseError> for StackError {
    fn from(value: PredicateParseError) -> Self {
        Self::InvalidFilter(value.to_string())
    }
}
