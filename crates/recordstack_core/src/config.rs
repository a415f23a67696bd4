//! Stack configuration.
//!
//! [`StackConfig`] is plain data: build it in code with the `with_*`
//! methods or deserialize it (every field has a default, so `{}` is a valid
//! document).
//!
//! ```
//! use recordstack_core::{CorruptStorePolicy, SessionKind, StackConfig};
//!
//! let config = StackConfig::in_directory("/tmp/app")
//!     .with_corrupt_store_policy(CorruptStorePolicy::RecreateStore)
//!     .with_default_session(SessionKind::Background)
//!     .with_operation_timeout_ms(2_000);
//! assert_eq!(config.operation_timeout(), Some(std::time::Duration::from_secs(2)));
//! ```

use crate::db::StoreLocation;
use crate::session::SessionKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// What `setup` does when the store file exists but cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStorePolicy {
    /// Surface the failure to the caller.
    #[default]
    Fail,
    /// Log a warning, delete the store files and open a fresh store once.
    RecreateStore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub store: StoreLocation,
    pub corrupt_store_policy: CorruptStorePolicy,
    /// Session used when a service call omits one.
    pub default_session: SessionKind,
    /// Upper bound for blocking session calls; `None` waits forever.
    pub operation_timeout_ms: Option<u64>,
    /// SQLite busy timeout for the store connection.
    pub busy_timeout_ms: u64,
    /// Paging hint applied to fetch requests that set none.
    pub default_batch_size: Option<usize>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            store: StoreLocation::InMemory,
            corrupt_store_policy: CorruptStorePolicy::Fail,
            default_session: SessionKind::Main,
            operation_timeout_ms: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            default_batch_size: None,
        }
    }
}

impl StackConfig {
    /// In-memory store, default policies.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed store under `dir/persistent-store/`.
    pub fn in_directory(dir: impl Into<PathBuf>) -> Self {
        Self::default().with_store(StoreLocation::Directory(dir.into()))
    }

    pub fn with_store(mut self, store: StoreLocation) -> Self {
        self.store = store;
        self
    }

    pub fn with_corrupt_store_policy(mut self, policy: CorruptStorePolicy) -> Self {
        self.corrupt_store_policy = policy;
        self
    }

    pub fn with_default_session(mut self, kind: SessionKind) -> Self {
        self.default_session = kind;
        self
    }

    pub fn with_operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.operation_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.busy_timeout_ms = timeout_ms;
        self
    }

    /// `0` clears the default.
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = (size > 0).then_some(size);
        self
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{CorruptStorePolicy, StackConfig};
    use crate::db::StoreLocation;
    use crate::session::SessionKind;
    use std::path::PathBuf;

    #[test]
    fn empty_document_yields_defaults() {
        let config: StackConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StackConfig::default());
        assert_eq!(config.default_session, SessionKind::Main);
        assert_eq!(config.corrupt_store_policy, CorruptStorePolicy::Fail);
        assert_eq!(config.store, StoreLocation::InMemory);
    }

    #[test]
    fn document_fields_use_snake_case_names() {
        let config: StackConfig = serde_json::from_str(
            r#"{
                "store": {"directory": "/srv/data"},
                "corrupt_store_policy": "recreate_store",
                "default_session": "background",
                "operation_timeout_ms": 250
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.store,
            StoreLocation::Directory(PathBuf::from("/srv/data"))
        );
        assert_eq!(config.corrupt_store_policy, CorruptStorePolicy::RecreateStore);
        assert_eq!(config.default_session, SessionKind::Background);
        assert_eq!(config.operation_timeout_ms, Some(250));
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    #[test]
    fn zero_batch_size_clears_default() {
        let config = StackConfig::in_memory()
            .with_default_batch_size(50)
            .with_default_batch_size(0);
        assert_eq!(config.default_batch_size, None);
    }
}
