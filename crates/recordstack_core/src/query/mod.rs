//! Query construction and execution.
//!
//! # Responsibility
//! - Describe fetches (`FetchRequest`) and filters (`Predicate`, textual or
//!   programmatic).
//! - Compile filters and ordering to SQL for store reads and evaluate them in
//!   memory for pending changes, with identical semantics.
//!
//! # Invariants
//! - Evaluation is two-valued: comparisons touching a null field are false,
//!   except explicit null tests.
//!
//! # See also
//! - `service::query_service` for session resolution.

pub(crate) mod executor;
pub mod parse;
pub mod predicate;
pub mod request;
pub mod sql;
