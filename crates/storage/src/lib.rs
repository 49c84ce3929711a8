pub mod backend;
pub mod error;
pub mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{MemoryStorage, STORAGE_PROBE_KEY, determine_storage};
pub use error::{StorageError, StorageResult};
pub use session::{SessionField, SessionStore, WEB_STORAGE_KEY_PREFIX};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Web-storage shaped key/value backend.
///
/// Implementations are single-threaded: the browser storage handle is not `Send`,
/// and the widget runs on one event loop per page.
pub trait KeyValueStorage {
    /// Short backend label used in logs and errors.
    fn name(&self) -> &'static str;
    fn keys(&self) -> StorageResult<Vec<String>>;
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove_item(&self, key: &str) -> StorageResult<()>;
}
