use chatdock_storage::{SessionField, SessionStore, StorageResult};
use serde::Serialize;

use crate::client::{ClientResult, MessagingClient};
use crate::config::WidgetConfig;
use crate::credentials::{
    Credentials, is_valid_deployment_name, is_valid_messaging_url, is_valid_organization_id,
    validate_credentials,
};
use crate::widget::Notice;

/// Where the adopted session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    AutoConnect,
    Persisted,
    /// Entered through the credential form.
    Submitted,
    /// Nothing usable; the credential form must be shown.
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub credentials: Option<Credentials>,
    pub source: SessionSource,
    /// A session token is persisted, so there is a conversation to resume.
    pub has_existing_conversation: bool,
    pub auto_connect_attempted: bool,
    /// The client accepted the adopted credentials.
    pub client_initialized: bool,
    pub notice: Option<Notice>,
}

impl BootstrapOutcome {
    fn fresh(auto_connect_attempted: bool) -> Self {
        Self {
            credentials: None,
            source: SessionSource::Fresh,
            has_existing_conversation: false,
            auto_connect_attempted,
            client_initialized: false,
            notice: None,
        }
    }
}

/// Reconciles configuration and persisted state into one session at startup.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    config: WidgetConfig,
    auto_connect_attempted: bool,
}

impl Bootstrapper {
    pub fn new(config: WidgetConfig) -> Self {
        Self {
            config,
            auto_connect_attempted: false,
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn auto_connect_attempted(&self) -> bool {
        self.auto_connect_attempted
    }

    /// Auto-connect first (at most once per bootstrapper), then the persisted
    /// payload, then a fresh start.
    pub fn run(
        &mut self,
        mut store: Option<&mut SessionStore>,
        client: &dyn MessagingClient,
    ) -> BootstrapOutcome {
        let adopted = match self.try_auto_connect() {
            Some(credentials) => Some((credentials, SessionSource::AutoConnect)),
            None => restore_persisted(store.as_deref_mut())
                .map(|credentials| (credentials, SessionSource::Persisted)),
        };

        let Some((credentials, source)) = adopted else {
            tracing::info!("no usable session; showing the credential form");
            return BootstrapOutcome::fresh(self.auto_connect_attempted);
        };

        let initialized = initialize_session(store.as_deref_mut(), client, &credentials);
        let client_initialized = initialized.is_ok();
        let notice = initialized
            .err()
            .map(|error| Notice::ConnectionFailed(error.to_string()));

        let has_existing_conversation = store
            .as_deref()
            .and_then(|store| read_field(store, SessionField::SessionToken))
            .is_some();

        tracing::info!(
            "bootstrapped session from {:?} (existing conversation: {})",
            source,
            has_existing_conversation
        );

        BootstrapOutcome {
            credentials: Some(credentials),
            source,
            has_existing_conversation,
            auto_connect_attempted: self.auto_connect_attempted,
            client_initialized,
            notice,
        }
    }

    fn try_auto_connect(&mut self) -> Option<Credentials> {
        if self.auto_connect_attempted {
            return None;
        }

        let credentials = self.config.auto_connect_credentials()?;
        self.auto_connect_attempted = true;

        if validate_credentials(&credentials).is_ok() {
            tracing::info!(
                "auto-connecting deployment '{}'",
                credentials.deployment_developer_name
            );
            return Some(credentials);
        }

        tracing::warn!(
            "auto-connect credentials rejected (organization id valid: {}, deployment name valid: {}, messaging url valid: {}); falling back to the persisted session",
            is_valid_organization_id(&credentials.organization_id),
            is_valid_deployment_name(&credentials.deployment_developer_name),
            is_valid_messaging_url(&credentials.messaging_url)
        );
        None
    }
}

/// Writes the deployment identity to the store and hands it to the client.
///
/// Persistence is best effort; only the client result is reported. Calling it
/// again with the same credentials leaves the payload unchanged.
pub fn initialize_session(
    store: Option<&mut SessionStore>,
    client: &dyn MessagingClient,
    credentials: &Credentials,
) -> ClientResult<()> {
    if let Some(store) = store
        && let Err(error) = persist_credentials(store, credentials)
    {
        tracing::warn!("failed to persist session credentials: {}", error);
    }

    client.initialize(credentials)
}

pub(crate) fn persist_credentials(
    store: &mut SessionStore,
    credentials: &Credentials,
) -> StorageResult<()> {
    store.initialize(&credentials.organization_id)?;
    store.set(SessionField::OrganizationId, &credentials.organization_id)?;
    store.set(
        SessionField::DeploymentDeveloperName,
        &credentials.deployment_developer_name,
    )?;
    store.set(SessionField::MessagingUrl, &credentials.messaging_url)
}

fn restore_persisted(store: Option<&mut SessionStore>) -> Option<Credentials> {
    let store = store?;
    if !store.has_payload() {
        return None;
    }

    let organization_id = read_field(store, SessionField::OrganizationId);
    let Some(organization_id) =
        organization_id.filter(|organization_id| is_valid_organization_id(organization_id))
    else {
        tracing::warn!(
            "invalid organization id in web storage payload {:?}; removing it",
            store.payload_key()
        );
        if let Err(error) = store.remove() {
            tracing::warn!("failed to remove invalid session payload: {}", error);
        }
        return None;
    };

    // Stored by an earlier validated run, so not re-validated here.
    let deployment_developer_name =
        read_field(store, SessionField::DeploymentDeveloperName).unwrap_or_default();
    let messaging_url = read_field(store, SessionField::MessagingUrl).unwrap_or_default();

    Some(Credentials::new(
        organization_id,
        deployment_developer_name,
        messaging_url,
    ))
}

pub(crate) fn read_field(store: &SessionStore, field: SessionField) -> Option<String> {
    match store.get(field) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!("failed to read {} from web storage: {}", field.key(), error);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chatdock_storage::{KeyValueStorage, MemoryStorage};

    use super::*;
    use crate::client::{ClientCall, LoopbackClient};

    const ORG_ID: &str = "00D000000000001";
    const DEPLOYMENT: &str = "Web_Deployment";
    const URL: &str = "https://acme.my.salesforce-scrt.com";

    fn credentials() -> Credentials {
        Credentials::new(ORG_ID, DEPLOYMENT, URL)
    }

    fn auto_connect_config(organization_id: &str) -> WidgetConfig {
        WidgetConfig {
            organization_id: Some(organization_id.to_string()),
            deployment_developer_name: Some(DEPLOYMENT.to_string()),
            messaging_url: Some(URL.to_string()),
            auto_connect: true,
        }
    }

    fn open(storage: &MemoryStorage) -> SessionStore {
        SessionStore::open(Box::new(storage.clone())).expect("open store")
    }

    fn seed(storage: &MemoryStorage, organization_id: &str, token: Option<&str>) {
        let mut store = SessionStore::open(Box::new(storage.clone())).expect("open store");
        store.initialize(organization_id).expect("initialize");
        store
            .set(SessionField::OrganizationId, organization_id)
            .expect("org");
        store
            .set(SessionField::DeploymentDeveloperName, "Stored_Deployment")
            .expect("deployment");
        store
            .set(SessionField::MessagingUrl, "https://stored.my.salesforce-scrt.com")
            .expect("url");
        if let Some(token) = token {
            store.set(SessionField::SessionToken, token).expect("token");
        }
    }

    #[test]
    fn empty_storage_starts_fresh() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        let client = LoopbackClient::new();

        let outcome = Bootstrapper::new(WidgetConfig::default()).run(Some(&mut store), &client);
        assert_eq!(outcome, BootstrapOutcome::fresh(false));
        assert!(client.calls().is_empty());
    }

    #[test]
    fn corrupt_organization_id_removes_payload() {
        let storage = MemoryStorage::new();
        seed(&storage, "not-an-org", Some("jwt"));
        let mut store = open(&storage);
        let client = LoopbackClient::new();

        let outcome = Bootstrapper::new(WidgetConfig::default()).run(Some(&mut store), &client);
        assert_eq!(outcome.source, SessionSource::Fresh);
        assert_eq!(outcome.credentials, None);
        assert!(!store.has_payload());
        assert!(storage.is_empty());
    }

    #[test]
    fn undecodable_payload_removes_payload() {
        let storage = MemoryStorage::new();
        storage
            .set_item(&SessionStore::payload_key_for(ORG_ID), "[1, 2")
            .expect("seed");
        let mut store = open(&storage);

        let outcome = Bootstrapper::new(WidgetConfig::default())
            .run(Some(&mut store), &LoopbackClient::new());
        assert_eq!(outcome.source, SessionSource::Fresh);
        assert!(storage.is_empty());
    }

    #[test]
    fn persisted_session_is_adopted_and_resumed_with_token() {
        let storage = MemoryStorage::new();
        seed(&storage, ORG_ID, None);
        let mut store = open(&storage);
        let client = LoopbackClient::new();

        let outcome = Bootstrapper::new(WidgetConfig::default()).run(Some(&mut store), &client);
        let restored = Credentials::new(
            ORG_ID,
            "Stored_Deployment",
            "https://stored.my.salesforce-scrt.com",
        );
        assert_eq!(outcome.source, SessionSource::Persisted);
        assert_eq!(outcome.credentials, Some(restored.clone()));
        assert!(!outcome.has_existing_conversation);
        assert_eq!(client.calls(), vec![ClientCall::Initialize(restored)]);

        seed(&storage, ORG_ID, Some("jwt"));
        let mut store = open(&storage);
        let outcome = Bootstrapper::new(WidgetConfig::default())
            .run(Some(&mut store), &LoopbackClient::new());
        assert!(outcome.has_existing_conversation);
    }

    #[test]
    fn valid_auto_connect_wins_over_persisted_payload() {
        let storage = MemoryStorage::new();
        seed(&storage, "00D000000000009", Some("old-jwt"));
        let mut store = open(&storage);
        let client = LoopbackClient::new();

        let outcome = Bootstrapper::new(auto_connect_config(ORG_ID)).run(Some(&mut store), &client);
        assert_eq!(outcome.source, SessionSource::AutoConnect);
        assert_eq!(outcome.credentials, Some(credentials()));
        assert!(outcome.auto_connect_attempted);
        // The other organization's payload was replaced, token included.
        assert!(!outcome.has_existing_conversation);
        assert_eq!(
            store.get(SessionField::DeploymentDeveloperName).expect("get"),
            Some(DEPLOYMENT.to_string())
        );
    }

    #[test]
    fn invalid_auto_connect_falls_back_once() {
        let storage = MemoryStorage::new();
        seed(&storage, ORG_ID, None);
        let mut store = open(&storage);
        let client = LoopbackClient::new();
        let mut bootstrapper = Bootstrapper::new(auto_connect_config("bogus"));

        let outcome = bootstrapper.run(Some(&mut store), &client);
        assert_eq!(outcome.source, SessionSource::Persisted);
        assert!(outcome.auto_connect_attempted);

        let again = bootstrapper.run(Some(&mut store), &client);
        assert_eq!(again.source, SessionSource::Persisted);
        assert!(bootstrapper.auto_connect_attempted());
    }

    #[test]
    fn invalid_auto_connect_without_payload_starts_fresh() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        let outcome = Bootstrapper::new(auto_connect_config("bogus"))
            .run(Some(&mut store), &LoopbackClient::new());
        assert_eq!(outcome, BootstrapOutcome::fresh(true));
    }

    #[test]
    fn initializer_is_idempotent() {
        let storage = MemoryStorage::new();
        let mut store = open(&storage);
        let client = LoopbackClient::new();

        initialize_session(Some(&mut store), &client, &credentials()).expect("first");
        let once = storage.get_item(&SessionStore::payload_key_for(ORG_ID)).expect("raw");
        initialize_session(Some(&mut store), &client, &credentials()).expect("second");
        let twice = storage.get_item(&SessionStore::payload_key_for(ORG_ID)).expect("raw");

        assert!(once.is_some());
        assert_eq!(once, twice);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn auto_connect_works_without_storage() {
        let outcome =
            Bootstrapper::new(auto_connect_config(ORG_ID)).run(None, &LoopbackClient::new());
        assert_eq!(outcome.source, SessionSource::AutoConnect);
        assert!(!outcome.has_existing_conversation);
    }

    #[test]
    fn client_initialize_failure_becomes_a_notice() {
        let client = LoopbackClient::new();
        client.fail_initialize(true);
        let outcome = Bootstrapper::new(auto_connect_config(ORG_ID)).run(None, &client);
        assert!(matches!(outcome.notice, Some(Notice::ConnectionFailed(_))));
        assert!(!outcome.client_initialized);
        assert_eq!(outcome.credentials, Some(credentials()));
    }

    #[test]
    fn auto_connect_replaces_undecodable_payload_of_same_org() {
        let storage = MemoryStorage::new();
        let key = SessionStore::payload_key_for(ORG_ID);
        storage.set_item(&key, "not json").expect("seed");
        let mut store = open(&storage);

        let outcome = Bootstrapper::new(auto_connect_config(ORG_ID))
            .run(Some(&mut store), &LoopbackClient::new());
        assert_eq!(outcome.source, SessionSource::AutoConnect);
        assert!(outcome.client_initialized);
        assert_eq!(
            store.get(SessionField::OrganizationId).expect("decodes again"),
            Some(ORG_ID.to_string())
        );
        store
            .set(SessionField::SessionToken, "jwt")
            .expect("token persists");
    }
}
