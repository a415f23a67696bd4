//! Store bootstrap utilities.
//!
//! # Responsibility
//! - Open file or in-memory SQLite stores for one schema.
//! - Configure connection pragmas and apply layout migrations.
//! - Bind the store to the schema name it was created for.
//!
//! # Invariants
//! - Returned stores have migrations fully applied.
//! - A file store created for schema `A` is never reused for schema `B`.

use super::migrations::apply_migrations;
use super::store::PersistentStore;
use super::{StoreError, StoreResult};
use crate::model::schema::Schema;
use log::{error, info};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const STORE_DIR_NAME: &str = "persistent-store";
const STORE_FILE_EXTENSION: &str = "sqlite";
const SCHEMA_NAME_META_KEY: &str = "schema_name";
const SCHEMA_VERSION_META_KEY: &str = "schema_version";

/// Where a stack keeps its persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    /// Process-local database, gone after teardown.
    InMemory,
    /// Store files live in `<dir>/persistent-store/<schema>.sqlite`.
    Directory(PathBuf),
}

impl StoreLocation {
    /// Store file path for `schema_name`, `None` for in-memory stores.
    pub fn store_path(&self, schema_name: &str) -> Option<PathBuf> {
        match self {
            Self::InMemory => None,
            Self::Directory(dir) => Some(
                dir.join(STORE_DIR_NAME)
                    .join(format!("{schema_name}.{STORE_FILE_EXTENSION}")),
            ),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::InMemory => "memory",
            Self::Directory(_) => "file",
        }
    }
}

/// Opens (or creates) the store for `schema` and applies pending migrations.
///
/// # Side effects
/// - Creates the store directory for file-backed locations.
/// - Emits `store_open` logging events with duration and status.
pub fn open_store(
    location: &StoreLocation,
    schema: &Schema,
    busy_timeout: Duration,
) -> StoreResult<PersistentStore> {
    let started_at = Instant::now();
    let mode = location.mode();
    info!(
        "event=store_open module=db status=start mode={mode} schema={}",
        schema.name()
    );

    let result = open_connection(location, schema.name())
        .and_then(|mut conn| bootstrap_connection(&mut conn, schema, busy_timeout).map(|()| conn));

    match result {
        Ok(conn) => {
            info!(
                "event=store_open module=db status=ok mode={mode} schema={} duration_ms={}",
                schema.name(),
                started_at.elapsed().as_millis()
            );
            Ok(PersistentStore::new(
                conn,
                location.store_path(schema.name()),
                schema.name(),
            ))
        }
        Err(err) => {
            let error_code = if err.is_corruption() {
                "store_corrupt"
            } else {
                "store_open_failed"
            };
            error!(
                "event=store_open module=db status=error mode={mode} schema={} duration_ms={} error_code={error_code} error={err}",
                schema.name(),
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

/// Removes the store file and its SQLite companions.
///
/// Missing files are not an error; in-memory locations are a no-op.
pub fn destroy_store_files(path: &Path) -> StoreResult<()> {
    for candidate in companion_paths(path) {
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn companion_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        paths.push(PathBuf::from(name));
    }
    paths
}

fn open_connection(location: &StoreLocation, schema_name: &str) -> StoreResult<Connection> {
    match location.store_path(schema_name) {
        None => Ok(Connection::open_in_memory()?),
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Connection::open(path)?)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    schema: &Schema,
    busy_timeout: Duration,
) -> StoreResult<()> {
    conn.busy_timeout(busy_timeout)?;
    // In-memory databases answer `memory` here; only files switch to WAL.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    apply_migrations(conn)?;
    bind_schema(conn, schema)
}

fn bind_schema(conn: &Connection, schema: &Schema) -> StoreResult<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1;",
            [SCHEMA_NAME_META_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(name) if name != schema.name() => Err(StoreError::Corrupt(format!(
            "store belongs to schema `{name}`, not `{}`",
            schema.name()
        ))),
        Some(_) => {
            conn.execute(
                "UPDATE store_meta SET value = ?1 WHERE key = ?2;",
                rusqlite::params![schema.version().to_string(), SCHEMA_VERSION_META_KEY],
            )?;
            Ok(())
        }
        None => {
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES (?1, ?2), (?3, ?4);",
                rusqlite::params![
                    SCHEMA_NAME_META_KEY,
                    schema.name(),
                    SCHEMA_VERSION_META_KEY,
                    schema.version().to_string()
                ],
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{companion_paths, StoreLocation};
    use std::path::{Path, PathBuf};

    #[test]
    fn store_path_follows_directory_layout() {
        let location = StoreLocation::Directory(PathBuf::from("/data"));
        assert_eq!(
            location.store_path("Model"),
            Some(PathBuf::from("/data/persistent-store/Model.sqlite"))
        );
        assert_eq!(StoreLocation::InMemory.store_path("Model"), None);
    }

    #[test]
    fn companion_paths_cover_wal_and_journal_files() {
        let paths = companion_paths(Path::new("/data/Model.sqlite"));
        assert_eq!(paths.len(), 4);
        assert!(paths.contains(&PathBuf::from("/data/Model.sqlite-wal")));
        assert!(paths.contains(&PathBuf::from("/data/Model.sqlite-journal")));
    }
}
