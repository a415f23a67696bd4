//! Schema model: record types and their field sets.
//!
//! # Responsibility
//! - Describe the record types a store accepts.
//! - Validate names, uniqueness and defaults when a schema is built.
//!
//! # Invariants
//! - Record type and field names match `^[A-Za-z_][A-Za-z0-9_]*$`.
//! - Record type names are unique per schema, field names unique per type.
//! - A field default, when present, is non-null and matches the field kind.

use crate::model::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `name` is usable as a record type or field name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Errors raised while building or loading a schema.
#[derive(Debug)]
pub enum SchemaError {
    InvalidName {
        scope: &'static str,
        name: String,
    },
    DuplicateRecordType(String),
    DuplicateField {
        record_type: String,
        field: String,
    },
    InvalidDefault {
        record_type: String,
        field: String,
    },
    DuplicateSchema(String),
    Json(serde_json::Error),
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName { scope, name } => write!(f, "invalid {scope} name `{name}`"),
            Self::DuplicateRecordType(name) => write!(f, "record type `{name}` declared twice"),
            Self::DuplicateField { record_type, field } => {
                write!(f, "field `{field}` declared twice on `{record_type}`")
            }
            Self::InvalidDefault { record_type, field } => write!(
                f,
                "default for `{record_type}.{field}` does not match the field kind"
            ),
            Self::DuplicateSchema(name) => write!(f, "schema `{name}` is already registered"),
            Self::Json(err) => write!(f, "invalid schema document: {err}"),
            Self::Io { path, source } => write!(f, "failed to read schema `{path}`: {source}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Storage kind of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Integer,
    Real,
    Text,
}

impl FieldKind {
    /// Converts `value` into this kind's canonical form.
    ///
    /// `Null` is always accepted here; required-ness is checked at save time.
    /// Integers widen into `Real` fields. Any other mismatch returns `None`.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Bool, value @ Value::Bool(_)) => Some(value),
            (Self::Integer, value @ Value::Integer(_)) => Some(value),
            (Self::Real, value @ Value::Real(_)) => Some(value),
            (Self::Real, Value::Integer(value)) => Value::real(value as f64),
            (Self::Text, value @ Value::Text(_)) => Some(value),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
        }
    }
}

/// One declared field of a record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// Optional fields may stay `Null` when the record is saved.
    #[serde(default)]
    pub optional: bool,
    /// Initial value for newly instantiated records.
    #[serde(default)]
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Named schema entry describing one class of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field declaration.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Field map for a freshly instantiated record.
    pub fn initial_values(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .map(|field| {
                (
                    field.name.clone(),
                    field.default.clone().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if !is_valid_identifier(&self.name) {
            return Err(SchemaError::InvalidName {
                scope: "record type",
                name: self.name.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !is_valid_identifier(&field.name) {
                return Err(SchemaError::InvalidName {
                    scope: "field",
                    name: field.name.clone(),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    record_type: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if let Some(default) = &field.default {
                let accepted = field.kind.coerce(default.clone());
                if default.is_null() || accepted.as_ref() != Some(default) {
                    return Err(SchemaError::InvalidDefault {
                        record_type: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    name: String,
    #[serde(default = "default_schema_version")]
    version: u32,
    record_types: Vec<RecordType>,
}

fn default_schema_version() -> u32 {
    1
}

/// Validated, immutable schema shared by a store and its sessions.
#[derive(Debug)]
pub struct Schema {
    name: String,
    version: u32,
    record_types: BTreeMap<String, Arc<RecordType>>,
}

impl Schema {
    /// Builds a schema after validating every record type.
    pub fn new(
        name: impl Into<String>,
        version: u32,
        record_types: Vec<RecordType>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if !is_valid_identifier(&name) {
            return Err(SchemaError::InvalidName {
                scope: "schema",
                name,
            });
        }

        let mut types = BTreeMap::new();
        for record_type in record_types {
            record_type.validate()?;
            let type_name = record_type.name.clone();
            if types.insert(type_name.clone(), Arc::new(record_type)).is_some() {
                return Err(SchemaError::DuplicateRecordType(type_name));
            }
        }

        Ok(Self {
            name,
            version,
            record_types: types,
        })
    }

    /// Parses a JSON schema document:
    /// `{"name": "...", "version": 1, "record_types": [{"name": "...", "fields": [...]}]}`.
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let document: SchemaDocument = serde_json::from_str(text)?;
        Self::new(document.name, document.version, document.record_types)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn record_type(&self, name: &str) -> Option<Arc<RecordType>> {
        self.record_types.get(name).cloned()
    }

    pub fn record_type_names(&self) -> impl Iterator<Item = &str> {
        self.record_types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldDef, FieldKind, RecordType, Schema, SchemaError};
    use crate::model::value::Value;

    fn user_type() -> RecordType {
        RecordType::new("User")
            .with_field(FieldDef::required("name", FieldKind::Text))
            .with_field(FieldDef::optional("age", FieldKind::Integer))
    }

    #[test]
    fn schema_rejects_duplicate_types_and_fields() {
        let err = Schema::new("Model", 1, vec![user_type(), user_type()]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRecordType(name) if name == "User"));

        let doubled = user_type().with_field(FieldDef::required("name", FieldKind::Text));
        let err = Schema::new("Model", 1, vec![doubled]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn schema_rejects_bad_identifiers_and_defaults() {
        let bad_name = RecordType::new("bad-name");
        assert!(matches!(
            Schema::new("Model", 1, vec![bad_name]).unwrap_err(),
            SchemaError::InvalidName { .. }
        ));

        let bad_default = RecordType::new("Flag")
            .with_field(FieldDef::required("on", FieldKind::Bool).with_default(3));
        assert!(matches!(
            Schema::new("Model", 1, vec![bad_default]).unwrap_err(),
            SchemaError::InvalidDefault { .. }
        ));
    }

    #[test]
    fn integer_widens_into_real_but_text_does_not_fit_integer() {
        assert_eq!(
            FieldKind::Real.coerce(Value::Integer(2)),
            Some(Value::Real(2.0))
        );
        assert_eq!(FieldKind::Integer.coerce(Value::from("2")), None);
        assert_eq!(FieldKind::Text.coerce(Value::Null), Some(Value::Null));
    }

    #[test]
    fn from_json_reads_fields_and_defaults() {
        let schema = Schema::from_json(
            r#"{
                "name": "Model",
                "record_types": [
                    {"name": "Task", "fields": [
                        {"name": "title", "kind": "text"},
                        {"name": "done", "kind": "bool", "default": false}
                    ]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(schema.version(), 1);
        let task = schema.record_type("Task").unwrap();
        assert!(!task.field("title").unwrap().optional);
        assert_eq!(
            task.initial_values().get("done"),
            Some(&Value::Bool(false))
        );
    }
}
