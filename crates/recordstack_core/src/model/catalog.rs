//! Named schema resources available to `SessionManager::setup`.
//!
//! # Responsibility
//! - Hold validated schemas by name.
//! - Load schema documents from JSON text or a directory of
//!   `<name>.schema.json` files.
//!
//! # Invariants
//! - A schema name is registered at most once.

use crate::model::schema::{Schema, SchemaError};
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const SCHEMA_FILE_SUFFIX: &str = ".schema.json";

/// Registry of schemas addressable by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one schema.
    pub fn register(&mut self, schema: Schema) -> Result<(), SchemaError> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(SchemaError::DuplicateSchema(name));
        }
        self.schemas.insert(name, Arc::new(schema));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with_schema(mut self, schema: Schema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Parses and registers one JSON schema document.
    pub fn register_json(&mut self, text: &str) -> Result<(), SchemaError> {
        self.register(Schema::from_json(text)?)
    }

    /// Registers every `*.schema.json` file in `dir`, in file name order.
    ///
    /// Returns the number of schemas loaded.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, SchemaError> {
        let dir = dir.as_ref();
        let io_error = |source| SchemaError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_schema = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(SCHEMA_FILE_SUFFIX));
            if is_schema {
                paths.push(path);
            }
        }
        paths.sort();

        for path in &paths {
            let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
                path: path.display().to_string(),
                source,
            })?;
            self.register_json(&text)?;
        }

        info!(
            "event=schema_load module=catalog status=ok dir={} count={}",
            dir.display(),
            paths.len()
        );
        Ok(paths.len())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).cloned()
    }

    /// Sorted schema names.
    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
