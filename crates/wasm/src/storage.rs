use chatdock_storage::{
    KeyValueStorage, SessionStore, StorageError, StorageResult, determine_storage,
};
use wasm_bindgen::JsValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserStorageKind {
    Local,
    Session,
}

/// `window.localStorage` or `window.sessionStorage`.
pub struct BrowserStorage {
    kind: BrowserStorageKind,
    storage: web_sys::Storage,
}

impl BrowserStorage {
    pub fn local() -> Option<Self> {
        let storage = web_sys::window()?.local_storage().ok().flatten()?;
        Some(Self {
            kind: BrowserStorageKind::Local,
            storage,
        })
    }

    pub fn session() -> Option<Self> {
        let storage = web_sys::window()?.session_storage().ok().flatten()?;
        Some(Self {
            kind: BrowserStorageKind::Session,
            storage,
        })
    }

    fn backend_error(&self, stage: &'static str, error: JsValue) -> StorageError {
        StorageError::Backend {
            stage,
            backend: self.name(),
            details: describe(&error),
        }
    }
}

impl KeyValueStorage for BrowserStorage {
    fn name(&self) -> &'static str {
        match self.kind {
            BrowserStorageKind::Local => "localStorage",
            BrowserStorageKind::Session => "sessionStorage",
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let length = self
            .storage
            .length()
            .map_err(|error| self.backend_error("browser-storage-length", error))?;

        let mut keys = Vec::with_capacity(length as usize);
        for index in 0..length {
            if let Some(key) = self
                .storage
                .key(index)
                .map_err(|error| self.backend_error("browser-storage-key", error))?
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.storage
            .get_item(key)
            .map_err(|error| self.backend_error("browser-storage-get-item", error))
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.storage
            .set_item(key, value)
            .map_err(|error| self.backend_error("browser-storage-set-item", error))
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.storage
            .remove_item(key)
            .map_err(|error| self.backend_error("browser-storage-remove-item", error))
    }
}

/// Local storage first, then session storage. `None` when neither accepts writes.
pub fn open_session_store() -> Option<SessionStore> {
    let candidates: Vec<Box<dyn KeyValueStorage>> =
        [BrowserStorage::local(), BrowserStorage::session()]
            .into_iter()
            .flatten()
            .map(|storage| Box::new(storage) as Box<dyn KeyValueStorage>)
            .collect();

    let backend = determine_storage(candidates)?;
    match SessionStore::open(backend) {
        Ok(store) => Some(store),
        Err(error) => {
            log::warn!("failed to open session store: {}", error);
            None
        }
    }
}

pub(crate) fn describe(error: &JsValue) -> String {
    error.as_string().unwrap_or_else(|| format!("{error:?}"))
}
