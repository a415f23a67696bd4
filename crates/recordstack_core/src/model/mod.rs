//! Schema, value and record handle types shared by every layer.
//!
//! # Responsibility
//! - Describe record types and their fields (`schema`), and hold the named
//!   schemas a manager can set up (`catalog`).
//! - Define the scalar `Value` stored in record fields.
//!
//! # Invariants
//! - Type and field names are identifiers; names are unique in their scope.
//! - Every `Record` handle is bound to exactly one session.

pub mod catalog;
pub mod record;
pub mod schema;
pub mod value;
