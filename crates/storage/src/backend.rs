use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use snafu::ensure;

use super::KeyValueStorage;
use super::error::{BackendUnavailableSnafu, StorageResult};

/// Key written and removed again when probing whether a backend accepts writes.
pub const STORAGE_PROBE_KEY: &str = "CHATDOCK_STORAGE_PROBE";

/// In-memory backend. Clones share the same map, so a second store opened over a
/// clone observes what the first one wrote (the equivalent of a page reload).
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    items: Rc<RefCell<BTreeMap<String, String>>>,
    writable: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            items: Rc::new(RefCell::new(BTreeMap::new())),
            writable: true,
        }
    }

    /// Backend that refuses every write, like web storage in a locked-down browser.
    pub fn unavailable() -> Self {
        Self {
            items: Rc::new(RefCell::new(BTreeMap::new())),
            writable: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.items.borrow().keys().cloned().collect())
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure!(
            self.writable,
            BackendUnavailableSnafu {
                stage: "memory-set-item",
                backend: "memory",
                operation: "set",
                key: key.to_string(),
            }
        );
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        ensure!(
            self.writable,
            BackendUnavailableSnafu {
                stage: "memory-remove-item",
                backend: "memory",
                operation: "remove",
                key: key.to_string(),
            }
        );
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

/// Picks the first candidate that accepts a probe write, in the given order.
///
/// Returns `None` when no candidate is usable; callers must then run without
/// persistence.
pub fn determine_storage(
    candidates: Vec<Box<dyn KeyValueStorage>>,
) -> Option<Box<dyn KeyValueStorage>> {
    for candidate in candidates {
        match probe(candidate.as_ref()) {
            Ok(()) => {
                tracing::info!("using '{}' web storage backend", candidate.name());
                return Some(candidate);
            }
            Err(error) => {
                tracing::warn!(
                    "web storage backend '{}' is not usable: {}",
                    candidate.name(),
                    error
                );
            }
        }
    }

    tracing::error!("no web storage backend is available; session resumption is disabled");
    None
}

fn probe(storage: &dyn KeyValueStorage) -> StorageResult<()> {
    storage.set_item(STORAGE_PROBE_KEY, STORAGE_PROBE_KEY)?;
    storage.remove_item(STORAGE_PROBE_KEY)
}
