//! Session stack lifecycle.
//!
//! # Responsibility
//! - Open the store for a named schema and wire the main session with its
//!   background child.
//! - Hand out sessions, including the default one used by services.
//! - Tear the stack down (`clear` wipes data, `shutdown` keeps it) and
//!   rebuild it (`reset`).
//!
//! # Invariants
//! - At most one stack is active per manager.
//! - The manager lock is never held while joining a session worker.
//! - `reset` swaps the old stack for the new one under a single lock, so no
//!   other caller observes the manager without a stack in between.
//! - Corrupt stores are only recreated under
//!   `CorruptStorePolicy::RecreateStore`, and at most once per `setup`.
//!
//! # See also
//! - `session` for save propagation between the two sessions.

use crate::config::{CorruptStorePolicy, StackConfig};
use crate::db::{destroy_store_files, open_store, PersistentStore, StoreError, StoreResult};
use crate::error::{StackError, StackResult};
use crate::model::catalog::SchemaCatalog;
use crate::model::schema::Schema;
use crate::session::{Session, SessionKind};
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

static SHARED_MANAGER: OnceCell<SessionManager> = OnceCell::new();

struct ActiveStack {
    schema: Arc<Schema>,
    store: Arc<PersistentStore>,
    main: Session,
    background: Session,
}

impl ActiveStack {
    /// Closes both session queues, then closes or destroys the store.
    fn retire(&self, mode: Teardown) -> StoreResult<()> {
        self.background.retire();
        self.main.retire();
        match mode {
            Teardown::Wipe => self.store.destroy(),
            Teardown::Keep => {
                self.store.close();
                Ok(())
            }
        }
    }

    fn join_workers(&self) {
        self.background.invalidate();
        self.main.invalidate();
    }
}

#[derive(Default)]
struct ManagerState {
    stack: Option<ActiveStack>,
    last_schema: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Delete store files.
    Wipe,
    /// Close the store and keep its files.
    Keep,
}

/// Owns the store and the two-session stack built on top of it.
pub struct SessionManager {
    config: StackConfig,
    catalog: SchemaCatalog,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    pub fn new(config: StackConfig, catalog: SchemaCatalog) -> Self {
        Self {
            config,
            catalog,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Installs the process-wide manager.
    ///
    /// Returns the manager back when one is already installed.
    pub fn install_shared(manager: SessionManager) -> Result<&'static SessionManager, SessionManager> {
        SHARED_MANAGER
            .try_insert(manager)
            .map_err(|(_, rejected)| rejected)
    }

    pub fn shared() -> Option<&'static SessionManager> {
        SHARED_MANAGER.get()
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Opens the store for `schema_name` and starts main and background
    /// sessions.
    ///
    /// # Errors
    /// - `AlreadyInitialized` while a stack is active.
    /// - `Store(SchemaNotFound)` when the catalog has no such schema.
    /// - `Store(..)` when the store cannot be opened.
    pub fn setup(&self, schema_name: &str) -> StackResult<()> {
        let mut state = self.lock()?;
        self.install_stack(&mut state, schema_name)
    }

    fn install_stack(&self, state: &mut ManagerState, schema_name: &str) -> StackResult<()> {
        let started_at = Instant::now();
        info!("event=stack_setup module=manager status=start schema={schema_name}");

        let result = self.build_stack(state, schema_name);
        match result {
            Ok(stack) => {
                info!(
                    "event=stack_setup module=manager status=ok schema={schema_name} main={} background={} duration_ms={}",
                    stack.main.id(),
                    stack.background.id(),
                    started_at.elapsed().as_millis()
                );
                state.stack = Some(stack);
                state.last_schema = Some(schema_name.to_string());
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=stack_setup module=manager status=error schema={schema_name} duration_ms={} error_code={} error={err}",
                    started_at.elapsed().as_millis(),
                    err.code()
                );
                Err(err)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock()
            .map(|state| state.stack.is_some())
            .unwrap_or(false)
    }

    /// Schema of the active stack.
    pub fn schema(&self) -> StackResult<Arc<Schema>> {
        self.with_stack(|stack| Arc::clone(&stack.schema))
    }

    /// Root session; saves write to the store.
    pub fn main_session(&self) -> StackResult<Session> {
        self.with_stack(|stack| stack.main.clone())
    }

    /// Child of main; saves promote into main, then save main.
    pub fn background_session(&self) -> StackResult<Session> {
        self.with_stack(|stack| stack.background.clone())
    }

    /// Session used when a service call omits one (main unless configured).
    pub fn default_session(&self) -> StackResult<Session> {
        match self.config.default_session {
            SessionKind::Main => self.main_session(),
            SessionKind::Background => self.background_session(),
        }
    }

    pub fn save_main(&self) -> StackResult<()> {
        self.main_session()?.save()
    }

    /// Promotes background changes into main, then saves main. Once this
    /// returns `Ok`, reads on main observe the changes.
    pub fn save_background(&self) -> StackResult<()> {
        self.background_session()?.save()
    }

    /// Tears the stack down and destroys the store's data.
    ///
    /// Sessions and records obtained earlier fail with `Invalidated`. A
    /// manager without a stack is left untouched.
    pub fn clear(&self) -> StackResult<()> {
        self.teardown(Teardown::Wipe)
    }

    /// Tears the stack down but keeps the store on disk for a later `setup`.
    pub fn shutdown(&self) -> StackResult<()> {
        self.teardown(Teardown::Keep)
    }

    /// `clear` followed by `setup` with the last schema name, as one step
    /// with respect to other manager calls.
    ///
    /// # Errors
    /// - `NotInitialized` when `setup` never succeeded on this manager.
    pub fn reset(&self) -> StackResult<()> {
        let mut state = self.lock()?;
        let schema_name = state
            .last_schema
            .clone()
            .ok_or(StackError::NotInitialized)?;

        let retired = match state.stack.take() {
            Some(stack) => {
                let started_at = Instant::now();
                let result = stack.retire(Teardown::Wipe);
                log_teardown(Teardown::Wipe, &stack, started_at, &result);
                result?;
                Some(stack)
            }
            None => None,
        };
        let result = self.install_stack(&mut state, &schema_name);
        drop(state);

        if let Some(stack) = retired {
            stack.join_workers();
        }
        result
    }

    fn build_stack(&self, state: &ManagerState, schema_name: &str) -> StackResult<ActiveStack> {
        if let Some(stack) = &state.stack {
            return Err(StackError::AlreadyInitialized {
                schema: stack.schema.name().to_string(),
            });
        }

        let schema = self
            .catalog
            .get(schema_name)
            .ok_or_else(|| StoreError::SchemaNotFound(schema_name.to_string()))?;
        let store = Arc::new(self.open_with_policy(&schema)?);

        let timeout = self.config.operation_timeout();
        let main = Session::spawn(
            SessionKind::Main,
            None,
            Arc::clone(&store),
            Arc::clone(&schema),
            timeout,
        )?;
        let background = match Session::spawn(
            SessionKind::Background,
            Some(main.clone()),
            Arc::clone(&store),
            Arc::clone(&schema),
            timeout,
        ) {
            Ok(background) => background,
            Err(err) => {
                main.retire();
                store.close();
                return Err(err);
            }
        };

        Ok(ActiveStack {
            schema,
            store,
            main,
            background,
        })
    }

    fn open_with_policy(&self, schema: &Schema) -> StoreResult<PersistentStore> {
        let location = &self.config.store;
        match open_store(location, schema, self.config.busy_timeout()) {
            Err(err)
                if err.is_corruption()
                    && self.config.corrupt_store_policy == CorruptStorePolicy::RecreateStore =>
            {
                let Some(path) = location.store_path(schema.name()) else {
                    return Err(err);
                };
                warn!(
                    "event=store_recreate module=manager status=start schema={} path={} error={err}",
                    schema.name(),
                    path.display()
                );
                destroy_store_files(&path)?;
                open_store(location, schema, self.config.busy_timeout())
            }
            other => other,
        }
    }

    fn teardown(&self, mode: Teardown) -> StackResult<()> {
        let Some(stack) = self.lock()?.stack.take() else {
            return Ok(());
        };

        let started_at = Instant::now();
        let result = stack.retire(mode);
        log_teardown(mode, &stack, started_at, &result);
        stack.join_workers();
        result.map_err(StackError::from)
    }

    fn with_stack<T>(&self, read: impl FnOnce(&ActiveStack) -> T) -> StackResult<T> {
        let state = self.lock()?;
        state
            .stack
            .as_ref()
            .map(read)
            .ok_or(StackError::NotInitialized)
    }

    fn lock(&self) -> StackResult<MutexGuard<'_, ManagerState>> {
        self.state
            .lock()
            .map_err(|_| StackError::LockPoisoned("session manager"))
    }
}

fn log_teardown(mode: Teardown, stack: &ActiveStack, started_at: Instant, result: &StoreResult<()>) {
    let schema_name = stack.schema.name();
    let action = match mode {
        Teardown::Wipe => "clear",
        Teardown::Keep => "shutdown",
    };
    match result {
        Ok(()) => info!(
            "event=stack_teardown module=manager status=ok action={action} schema={schema_name} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=stack_teardown module=manager status=error action={action} schema={schema_name} error={err}"
        ),
    }
}

impl Debug for SessionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("schemas", &self.catalog.names())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(stack) = state.stack.take() {
                let _ = stack.retire(Teardown::Keep);
                stack.join_workers();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionManager;
    use crate::config::StackConfig;
    use crate::error::ErrorKind;
    use crate::model::catalog::SchemaCatalog;
    use crate::model::schema::{FieldDef, FieldKind, RecordType, Schema};

    fn manager() -> SessionManager {
        let user = RecordType::new("User").with_field(FieldDef::required("name", FieldKind::Text));
        let catalog = SchemaCatalog::new()
            .with_schema(Schema::new("Model", 1, vec![user]).unwrap())
            .unwrap();
        SessionManager::new(StackConfig::in_memory(), catalog)
    }

    #[test]
    fn sessions_require_setup() {
        let manager = manager();
        assert_eq!(
            manager.main_session().unwrap_err().kind(),
            ErrorKind::NotInitialized
        );
        assert_eq!(manager.reset().unwrap_err().kind(), ErrorKind::NotInitialized);
        manager.clear().unwrap();
    }

    #[test]
    fn background_session_is_child_of_main() {
        let manager = manager();
        manager.setup("Model").unwrap();
        let main = manager.main_session().unwrap();
        let background = manager.background_session().unwrap();

        assert!(main.parent().is_none());
        assert!(background.parent().unwrap().same_as(&main));
        assert!(manager.default_session().unwrap().same_as(&main));
        assert_eq!(
            manager.setup("Model").unwrap_err().kind(),
            ErrorKind::AlreadyInitialized
        );
    }

    #[test]
    fn unknown_schema_is_a_store_failure() {
        let manager = manager();
        let err = manager.setup("Missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreIo);
        assert!(!manager.is_initialized());
    }
}
