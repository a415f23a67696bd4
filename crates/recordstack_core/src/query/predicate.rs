//! Filter expression tree.
//!
//! # Responsibility
//! - Represent filters as a tagged tree instead of opaque strings.
//! - Validate a tree against a record type before execution.
//! - Evaluate a tree in memory for records that only exist as pending changes.
//!
//! # Invariants
//! - Evaluation is two-valued: any comparison that touches a null field value
//!   is false, except the explicit null tests `Eq Null` / `Ne Null`.
//! - `query::sql` compiles the same tree with identical semantics.

use crate::model::schema::{FieldKind, RecordType};
use crate::model::value::Value;
use crate::query::parse::{parse_predicate, PredicateParseError};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Boolean predicate over record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Contains {
        field: String,
        needle: String,
        case_insensitive: bool,
    },
    BeginsWith {
        field: String,
        prefix: String,
        case_insensitive: bool,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    /// Empty conjunction is true.
    And(Vec<Predicate>),
    /// Empty disjunction is false.
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Parses the textual predicate syntax, e.g. `age < 25 AND name CONTAINS[c] 'bo'`.
    pub fn parse(text: &str) -> Result<Self, PredicateParseError> {
        parse_predicate(text)
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Eq, Value::Null)
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
            case_insensitive: false,
        }
    }

    /// ASCII case-insensitive substring match.
    pub fn contains_ignore_case(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
            case_insensitive: true,
        }
    }

    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            field: field.into(),
            prefix: prefix.into(),
            case_insensitive: false,
        }
    }

    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Checks fields and literal kinds against `record_type`.
    ///
    /// Returns a human-readable reason on failure.
    pub fn validate(&self, record_type: &RecordType) -> Result<(), String> {
        match self {
            Self::Compare { field, op, value } => {
                let kind = field_kind(record_type, field)?;
                if value.is_null() {
                    if matches!(op, CompareOp::Eq | CompareOp::Ne) {
                        return Ok(());
                    }
                    return Err(format!(
                        "`{field}` cannot be compared with nil using `{}`",
                        op.as_sql()
                    ));
                }
                check_literal(field, kind, value)
            }
            Self::Contains { field, .. } | Self::BeginsWith { field, .. } => {
                match field_kind(record_type, field)? {
                    FieldKind::Text => Ok(()),
                    other => Err(format!(
                        "string operator needs a text field, `{field}` is {}",
                        other.as_str()
                    )),
                }
            }
            Self::In { field, values } => {
                let kind = field_kind(record_type, field)?;
                for value in values {
                    if value.is_null() {
                        return Err(format!("IN list for `{field}` cannot contain nil"));
                    }
                    check_literal(field, kind, value)?;
                }
                Ok(())
            }
            Self::And(parts) | Self::Or(parts) => parts
                .iter()
                .try_for_each(|part| part.validate(record_type)),
            Self::Not(inner) => inner.validate(record_type),
        }
    }

    /// Evaluates the predicate against one record's field map.
    ///
    /// Missing fields read as `Null`.
    pub fn matches(&self, fields: &BTreeMap<String, Value>) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                let current = fields.get(field).unwrap_or(&Value::Null);
                match (value.is_null(), op) {
                    (true, CompareOp::Eq) => current.is_null(),
                    (true, CompareOp::Ne) => !current.is_null(),
                    (true, _) => false,
                    (false, _) if current.is_null() => false,
                    (false, op) => op.holds(current.sort_cmp(value)),
                }
            }
            Self::Contains {
                field,
                needle,
                case_insensitive,
            } => text_field(fields, field).is_some_and(|text| {
                if *case_insensitive {
                    text.to_ascii_lowercase()
                        .contains(&needle.to_ascii_lowercase())
                } else {
                    text.contains(needle.as_str())
                }
            }),
            Self::BeginsWith {
                field,
                prefix,
                case_insensitive,
            } => text_field(fields, field).is_some_and(|text| {
                if *case_insensitive {
                    text.to_ascii_lowercase()
                        .starts_with(&prefix.to_ascii_lowercase())
                } else {
                    text.starts_with(prefix.as_str())
                }
            }),
            Self::In { field, values } => {
                let current = fields.get(field).unwrap_or(&Value::Null);
                !current.is_null()
                    && values
                        .iter()
                        .any(|value| current.sort_cmp(value) == Ordering::Equal)
            }
            Self::And(parts) => parts.iter().all(|part| part.matches(fields)),
            Self::Or(parts) => parts.iter().any(|part| part.matches(fields)),
            Self::Not(inner) => !inner.matches(fields),
        }
    }
}

fn field_kind(record_type: &RecordType, field: &str) -> Result<FieldKind, String> {
    record_type
        .field(field)
        .map(|def| def.kind)
        .ok_or_else(|| format!("unknown field `{field}` on `{}`", record_type.name))
}

fn check_literal(field: &str, kind: FieldKind, value: &Value) -> Result<(), String> {
    let compatible = match value {
        Value::Bool(_) => kind == FieldKind::Bool,
        Value::Integer(_) | Value::Real(_) => kind.is_numeric(),
        Value::Text(_) => kind == FieldKind::Text,
        Value::Null => true,
    };
    if compatible {
        Ok(())
    } else {
        Err(format!(
            "`{field}` is {}, cannot compare with {} literal {value}",
            kind.as_str(),
            value.type_name()
        ))
    }
}

fn text_field<'a>(fields: &'a BTreeMap<String, Value>, field: &str) -> Option<&'a str> {
    fields.get(field).and_then(Value::as_str)
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compare { field, op, value } => {
                let op = match op {
                    CompareOp::Eq => "==",
                    other => other.as_sql(),
                };
                write!(f, "{field} {op} {value}")
            }
            Self::Contains {
                field,
                needle,
                case_insensitive,
            } => write!(
                f,
                "{field} CONTAINS{} '{needle}'",
                if *case_insensitive { "[c]" } else { "" }
            ),
            Self::BeginsWith {
                field,
                prefix,
                case_insensitive,
            } => write!(
                f,
                "{field} BEGINSWITH{} '{prefix}'",
                if *case_insensitive { "[c]" } else { "" }
            ),
            Self::In { field, values } => {
                let items = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{field} IN {{{items}}}")
            }
            Self::And(parts) if parts.is_empty() => write!(f, "TRUEPREDICATE"),
            Self::Or(parts) if parts.is_empty() => write!(f, "FALSEPREDICATE"),
            Self::And(parts) => write_joined(f, parts, " AND "),
            Self::Or(parts) => write_joined(f, parts, " OR "),
            Self::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

fn write_joined(f: &mut Formatter<'_>, parts: &[Predicate], separator: &str) -> std::fmt::Result {
    write!(f, "(")?;
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            write!(f, "{separator}")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::Predicate;
    use crate::model::schema::{FieldDef, FieldKind, RecordType};
    use crate::model::value::Value;
    use std::collections::BTreeMap;

    fn user() -> RecordType {
        RecordType::new("User")
            .with_field(FieldDef::required("name", FieldKind::Text))
            .with_field(FieldDef::optional("age", FieldKind::Integer))
            .with_field(FieldDef::optional("active", FieldKind::Bool))
    }

    fn row(name: &str, age: Option<i64>) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("name".to_string(), Value::from(name)),
            ("age".to_string(), Value::from(age)),
        ])
    }

    #[test]
    fn null_field_fails_every_comparison_except_null_tests() {
        let unknown_age = row("Ann", None);
        assert!(!Predicate::lt("age", 30).matches(&unknown_age));
        assert!(!Predicate::ne("age", 30).matches(&unknown_age));
        assert!(Predicate::is_null("age").matches(&unknown_age));
        assert!(Predicate::lt("age", 30).negate().matches(&unknown_age));
    }

    #[test]
    fn string_operators_fold_ascii_case_only_when_asked() {
        let bob = row("Bobby", Some(20));
        assert!(!Predicate::contains("name", "bob").matches(&bob));
        assert!(Predicate::contains_ignore_case("name", "bob").matches(&bob));
        assert!(Predicate::begins_with("name", "Bob").matches(&bob));
    }

    #[test]
    fn empty_connectives_follow_identity_elements() {
        let any = row("x", None);
        assert!(Predicate::And(Vec::new()).matches(&any));
        assert!(!Predicate::Or(Vec::new()).matches(&any));
        assert!(!Predicate::is_in("age", Vec::<i64>::new()).matches(&row("x", Some(1))));
    }

    #[test]
    fn validate_rejects_unknown_fields_and_kind_mismatches() {
        let record_type = user();
        assert!(Predicate::eq("email", "x").validate(&record_type).is_err());
        assert!(Predicate::lt("name", 3).validate(&record_type).is_err());
        assert!(Predicate::contains("age", "3").validate(&record_type).is_err());
        assert!(Predicate::lt("age", Value::Null).validate(&record_type).is_err());
        assert!(Predicate::eq("active", 1).validate(&record_type).is_err());
        assert!(Predicate::lt("age", 2.5).validate(&record_type).is_ok());
    }

    #[test]
    fn and_flattens_chained_calls() {
        let predicate = Predicate::gt("age", 1)
            .and(Predicate::lt("age", 9))
            .and(Predicate::is_null("active"));
        assert!(matches!(predicate, Predicate::And(parts) if parts.len() == 3));
    }
}
