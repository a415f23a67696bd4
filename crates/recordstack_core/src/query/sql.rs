//! Compiles predicate trees and sort descriptors into SQLite fragments over
//! the JSON `fields` column.
//!
//! # Invariants
//! - Every compiled leaf yields `0` or `1`, never `NULL`, so `NOT` and the
//!   connectives behave like `Predicate::matches`.
//! - Field names are bound as JSON path parameters, never spliced into SQL.

use crate::model::value::Value;
use crate::query::predicate::{CompareOp, Predicate};
use crate::query::request::SortDescriptor;
use rusqlite::types::Value as SqlValue;

/// SQL text plus positional parameters, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Compiles a validated predicate into a boolean SQL expression.
pub fn compile_predicate(predicate: &Predicate) -> SqlFragment {
    let mut fragment = SqlFragment::default();
    write_predicate(predicate, &mut fragment);
    fragment
}

/// Compiles sort descriptors into an `ORDER BY` key list (without the
/// keywords). Returns an empty fragment when `sort` is empty.
pub fn compile_order(sort: &[SortDescriptor]) -> SqlFragment {
    let mut fragment = SqlFragment::default();
    for (index, descriptor) in sort.iter().enumerate() {
        if index > 0 {
            fragment.sql.push_str(", ");
        }
        fragment.sql.push_str("json_extract(fields, ?) ");
        fragment.sql.push_str(descriptor.direction.as_sql());
        fragment.params.push(json_path(&descriptor.field));
    }
    fragment
}

pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(value) => SqlValue::Integer(i64::from(*value)),
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
    }
}

fn json_path(field: &str) -> SqlValue {
    SqlValue::Text(format!("$.{field}"))
}

fn write_predicate(predicate: &Predicate, out: &mut SqlFragment) {
    match predicate {
        Predicate::Compare { field, op, value } if value.is_null() => {
            let test = if *op == CompareOp::Ne {
                "IS NOT NULL"
            } else {
                "IS NULL"
            };
            out.sql.push_str(&format!("(json_extract(fields, ?) {test})"));
            out.params.push(json_path(field));
        }
        Predicate::Compare { field, op, value } => {
            out.sql.push_str(&format!(
                "COALESCE(json_extract(fields, ?) {} ?, 0)",
                op.as_sql()
            ));
            out.params.push(json_path(field));
            out.params.push(to_sql_value(value));
        }
        Predicate::Contains {
            field,
            needle,
            case_insensitive,
        } => {
            out.sql.push_str(if *case_insensitive {
                "COALESCE(instr(lower(json_extract(fields, ?)), lower(?)) > 0, 0)"
            } else {
                "COALESCE(instr(json_extract(fields, ?), ?) > 0, 0)"
            });
            out.params.push(json_path(field));
            out.params.push(SqlValue::Text(needle.clone()));
        }
        Predicate::BeginsWith {
            field,
            prefix,
            case_insensitive,
        } => {
            out.sql.push_str(if *case_insensitive {
                "COALESCE(instr(lower(json_extract(fields, ?)), lower(?)) = 1, 0)"
            } else {
                "COALESCE(instr(json_extract(fields, ?), ?) = 1, 0)"
            });
            out.params.push(json_path(field));
            out.params.push(SqlValue::Text(prefix.clone()));
        }
        Predicate::In { values, .. } if values.is_empty() => out.sql.push('0'),
        Predicate::In { field, values } => {
            let placeholders = vec!["?"; values.len()].join(", ");
            out.sql.push_str(&format!(
                "COALESCE(json_extract(fields, ?) IN ({placeholders}), 0)"
            ));
            out.params.push(json_path(field));
            out.params.extend(values.iter().map(to_sql_value));
        }
        Predicate::And(parts) => write_connective(parts, " AND ", "1", out),
        Predicate::Or(parts) => write_connective(parts, " OR ", "0", out),
        Predicate::Not(inner) => {
            out.sql.push_str("(NOT ");
            write_predicate(inner, out);
            out.sql.push(')');
        }
    }
}

fn write_connective(parts: &[Predicate], separator: &str, identity: &str, out: &mut SqlFragment) {
    if parts.is_empty() {
        out.sql.push_str(identity);
        return;
    }
    out.sql.push('(');
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.sql.push_str(separator);
        }
        write_predicate(part, out);
    }
    out.sql.push(')');
}
