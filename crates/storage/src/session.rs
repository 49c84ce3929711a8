use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};

use super::KeyValueStorage;
use super::error::{
    PayloadDecodeSnafu, PayloadEncodeSnafu, PayloadNotInitializedSnafu, StorageResult,
};

/// Namespace prefix of the single payload key holding every session field.
pub const WEB_STORAGE_KEY_PREFIX: &str = "CHATDOCK_WEB_STORAGE_KEY";

/// Logical session fields stored inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionField {
    OrganizationId,
    DeploymentDeveloperName,
    MessagingUrl,
    SessionToken,
}

impl SessionField {
    pub const ALL: [SessionField; 4] = [
        SessionField::OrganizationId,
        SessionField::DeploymentDeveloperName,
        SessionField::MessagingUrl,
        SessionField::SessionToken,
    ];

    /// Key of the field inside the JSON payload.
    pub const fn key(self) -> &'static str {
        match self {
            Self::OrganizationId => "ORGANIZATION_ID",
            Self::DeploymentDeveloperName => "DEPLOYMENT_DEVELOPER_NAME",
            Self::MessagingUrl => "MESSAGING_URL",
            Self::SessionToken => "JWT",
        }
    }
}

/// Session fields namespaced under one JSON payload in a key/value backend.
///
/// Every field write re-reads and rewrites the whole payload. There is no locking:
/// the widget is the only writer on a page.
pub struct SessionStore {
    backend: Box<dyn KeyValueStorage>,
    payload_key: Option<String>,
}

impl SessionStore {
    /// Opens the store and locates a payload left by an earlier page load, if any.
    pub fn open(backend: Box<dyn KeyValueStorage>) -> StorageResult<Self> {
        let payload_key = backend
            .keys()?
            .into_iter()
            .find(|key| key.starts_with(WEB_STORAGE_KEY_PREFIX));

        if let Some(key) = payload_key.as_deref() {
            tracing::debug!("found persisted session payload under '{}'", key);
        }

        Ok(Self {
            backend,
            payload_key,
        })
    }

    pub fn payload_key_for(organization_id: &str) -> String {
        format!("{WEB_STORAGE_KEY_PREFIX}_{organization_id}")
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn payload_key(&self) -> Option<&str> {
        self.payload_key.as_deref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload_key.is_some()
    }

    /// Establishes the payload for `organization_id`.
    ///
    /// Existing fields under the same key are kept unless the payload no longer
    /// decodes, in which case it is replaced by an empty one. A payload stored
    /// under a different key is dropped so a page only ever carries one session.
    pub fn initialize(&mut self, organization_id: &str) -> StorageResult<()> {
        let key = Self::payload_key_for(organization_id);

        if let Some(previous) = self.payload_key.take()
            && previous != key
        {
            tracing::info!("replacing session payload '{}' with '{}'", previous, key);
            self.backend.remove_item(&previous)?;
        }

        match self.backend.get_item(&key)? {
            Some(raw) if serde_json::from_str::<Map<String, Value>>(&raw).is_ok() => {}
            Some(_) => {
                tracing::warn!("discarding undecodable session payload '{}'", key);
                self.backend.set_item(&key, "{}")?;
            }
            None => self.backend.set_item(&key, "{}")?,
        }

        self.payload_key = Some(key);
        Ok(())
    }

    pub fn get(&self, field: SessionField) -> StorageResult<Option<String>> {
        let Some(key) = self.payload_key.as_deref() else {
            return Ok(None);
        };

        let payload = self.read_payload(key, "session-get")?;
        Ok(payload
            .get(field.key())
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub fn set(&self, field: SessionField, value: &str) -> StorageResult<()> {
        let key = self.require_payload_key("session-set")?;
        let mut payload = self.read_payload(key, "session-set")?;
        payload.insert(field.key().to_string(), Value::String(value.to_string()));
        self.write_payload(key, &payload, "session-set")
    }

    pub fn unset(&self, field: SessionField) -> StorageResult<()> {
        let key = self.require_payload_key("session-unset")?;
        let mut payload = self.read_payload(key, "session-unset")?;
        if payload.remove(field.key()).is_some() {
            self.write_payload(key, &payload, "session-unset")?;
        }
        Ok(())
    }

    /// Removes the entire payload, not a single field.
    pub fn remove(&mut self) -> StorageResult<()> {
        if let Some(key) = self.payload_key.take() {
            self.backend.remove_item(&key)?;
            tracing::info!("removed session payload '{}'", key);
        }
        Ok(())
    }

    fn require_payload_key(&self, stage: &'static str) -> StorageResult<&str> {
        self.payload_key
            .as_deref()
            .context(PayloadNotInitializedSnafu { stage })
    }

    fn read_payload(&self, key: &str, stage: &'static str) -> StorageResult<Map<String, Value>> {
        match self.backend.get_item(key)? {
            Some(raw) => serde_json::from_str(&raw).context(PayloadDecodeSnafu {
                stage,
                key: key.to_string(),
            }),
            None => Ok(Map::new()),
        }
    }

    fn write_payload(
        &self,
        key: &str,
        payload: &Map<String, Value>,
        stage: &'static str,
    ) -> StorageResult<()> {
        let raw = serde_json::to_string(payload).context(PayloadEncodeSnafu {
            stage,
            key: key.to_string(),
        })?;
        self.backend.set_item(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStorage, StorageError};

    const ORG_ID: &str = "00D000000000001";

    fn open(storage: &MemoryStorage) -> SessionStore {
        SessionStore::open(Box::new(storage.clone())).expect("open store")
    }

    #[test]
    fn fields_survive_reload() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        assert!(!store.has_payload());

        store.initialize(ORG_ID).expect("initialize");
        store
            .set(SessionField::OrganizationId, ORG_ID)
            .expect("set org");
        store
            .set(SessionField::DeploymentDeveloperName, "Web_Deployment")
            .expect("set deployment");
        store
            .set(SessionField::MessagingUrl, "https://acme.my.salesforce-scrt.com")
            .expect("set url");

        let reloaded = open(&storage);
        assert_eq!(
            reloaded.payload_key(),
            Some(SessionStore::payload_key_for(ORG_ID).as_str())
        );
        assert_eq!(
            reloaded.get(SessionField::OrganizationId).expect("get"),
            Some(ORG_ID.to_string())
        );
        assert_eq!(
            reloaded
                .get(SessionField::DeploymentDeveloperName)
                .expect("get"),
            Some("Web_Deployment".to_string())
        );
        assert_eq!(
            reloaded.get(SessionField::MessagingUrl).expect("get"),
            Some("https://acme.my.salesforce-scrt.com".to_string())
        );
        assert_eq!(reloaded.get(SessionField::SessionToken).expect("get"), None);
    }

    #[test]
    fn initialize_is_idempotent_and_keeps_fields() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        store.initialize(ORG_ID).expect("initialize");
        store.set(SessionField::SessionToken, "jwt").expect("set");
        let before = storage
            .get_item(&SessionStore::payload_key_for(ORG_ID))
            .expect("raw");

        store.initialize(ORG_ID).expect("initialize again");
        let after = storage
            .get_item(&SessionStore::payload_key_for(ORG_ID))
            .expect("raw");
        assert_eq!(before, after);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn initialize_for_new_org_drops_previous_payload() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        store.initialize(ORG_ID).expect("initialize");
        store.initialize("00D000000000002").expect("initialize");

        assert_eq!(
            storage.keys().expect("keys"),
            vec![SessionStore::payload_key_for("00D000000000002")]
        );
    }

    #[test]
    fn writes_require_an_initialized_payload() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        let error = store
            .set(SessionField::SessionToken, "jwt")
            .expect_err("set must fail");
        assert!(matches!(error, StorageError::PayloadNotInitialized { .. }));
        assert_eq!(store.get(SessionField::SessionToken).expect("get"), None);
    }

    #[test]
    fn undecodable_payload_is_reported() {
        let storage = MemoryStorage::new();
        storage
            .set_item(&SessionStore::payload_key_for(ORG_ID), "not json")
            .expect("seed");
        let store = open(&storage);
        let error = store
            .get(SessionField::OrganizationId)
            .expect_err("decode must fail");
        assert!(matches!(error, StorageError::PayloadDecode { .. }));
    }

    #[test]
    fn initialize_replaces_undecodable_payload() {
        let storage = MemoryStorage::new();
        let key = SessionStore::payload_key_for(ORG_ID);
        storage.set_item(&key, "not json").expect("seed");
        let mut store = open(&storage);

        store.initialize(ORG_ID).expect("initialize");
        assert_eq!(storage.get_item(&key).expect("raw"), Some("{}".to_string()));
        store.set(SessionField::SessionToken, "jwt").expect("set");
        assert_eq!(
            open(&storage).get(SessionField::SessionToken).expect("get"),
            Some("jwt".to_string())
        );
    }

    #[test]
    fn unset_and_remove() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        store.initialize(ORG_ID).expect("initialize");
        store.set(SessionField::SessionToken, "jwt").expect("set");
        store.unset(SessionField::SessionToken).expect("unset");
        assert_eq!(store.get(SessionField::SessionToken).expect("get"), None);

        store.remove().expect("remove");
        assert!(!store.has_payload());
        assert!(storage.is_empty());
    }
}
