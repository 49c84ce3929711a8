use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu};

use crate::credentials::Credentials;

pub const CONFIG_ENV_PREFIX: &str = "CHATDOCK_";
pub const CONFIG_DIRECTORY_NAME: &str = "chatdock";
pub const CONFIG_FILE_NAME: &str = "widget.json";

/// Startup configuration, read once and handed to the bootstrapper.
///
/// The camelCase aliases match the page-level embed object
/// (`orgId`, `deploymentName`, `messagingUrl`, `autoConnect`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetConfig {
    #[serde(default, alias = "orgId", alias = "organizationId")]
    pub organization_id: Option<String>,
    #[serde(
        default,
        alias = "deploymentName",
        alias = "deploymentDeveloperName"
    )]
    pub deployment_developer_name: Option<String>,
    #[serde(default, alias = "messagingUrl")]
    pub messaging_url: Option<String>,
    #[serde(
        default,
        alias = "autoConnect",
        deserialize_with = "deserialize_boolean_like"
    )]
    pub auto_connect: bool,
}

impl WidgetConfig {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(CONFIG_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIRECTORY_NAME))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(CONFIG_FILE_NAME)
    }

    /// Defaults, then the optional JSON file, then `CHATDOCK_*` environment variables.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(WidgetConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }
        figment.merge(Env::prefixed(CONFIG_ENV_PREFIX))
    }

    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config: WidgetConfig = Self::figment(path).extract().context(ExtractSnafu {
            stage: "extract-widget-config",
        })?;
        tracing::debug!(
            "loaded widget config (auto_connect={}, organization_id={:?})",
            config.auto_connect,
            config.organization_id
        );
        Ok(config)
    }

    /// Credentials for the auto-connect path: requested, and all three values supplied.
    pub fn auto_connect_credentials(&self) -> Option<Credentials> {
        if !self.auto_connect {
            return None;
        }

        let credentials = Credentials::new(
            self.organization_id.clone()?,
            self.deployment_developer_name.clone()?,
            self.messaging_url.clone()?,
        )
        .normalized();

        credentials.is_complete().then_some(credentials)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to load widget configuration on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        source: figment::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Deserialize)]
#[serde(untagged)]
enum BooleanLike {
    Flag(bool),
    Text(String),
}

fn deserialize_boolean_like<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<BooleanLike>::deserialize(deserializer)?;
    Ok(match value {
        Some(BooleanLike::Flag(flag)) => flag,
        Some(BooleanLike::Text(text)) => text.trim().eq_ignore_ascii_case("true"),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn embed_object_aliases_and_string_flag() {
        let config: WidgetConfig = serde_json::from_str(
            r#"{
                "orgId": "00D000000000001",
                "deploymentName": "Web_Deployment",
                "messagingUrl": "https://acme.my.salesforce-scrt.com",
                "autoConnect": "true"
            }"#,
        )
        .expect("parse embed object");

        assert!(config.auto_connect);
        assert_eq!(
            config.auto_connect_credentials(),
            Some(Credentials::new(
                "00D000000000001",
                "Web_Deployment",
                "https://acme.my.salesforce-scrt.com"
            ))
        );
    }

    #[test]
    fn auto_connect_needs_flag_and_every_value() {
        let mut config = WidgetConfig {
            organization_id: Some("00D000000000001".to_string()),
            deployment_developer_name: Some("Web_Deployment".to_string()),
            messaging_url: None,
            auto_connect: true,
        };
        assert_eq!(config.auto_connect_credentials(), None);

        config.messaging_url = Some("  ".to_string());
        assert_eq!(config.auto_connect_credentials(), None);

        config.messaging_url = Some("https://acme.my.salesforce-scrt.com".to_string());
        assert!(config.auto_connect_credentials().is_some());

        config.auto_connect = false;
        assert_eq!(config.auto_connect_credentials(), None);
    }

    #[test]
    fn null_and_unknown_flags_disable_auto_connect() {
        let config: WidgetConfig =
            serde_json::from_str(r#"{"autoConnect": null}"#).expect("parse null");
        assert!(!config.auto_connect);

        let config: WidgetConfig =
            serde_json::from_str(r#"{"autoConnect": "yes"}"#).expect("parse text");
        assert!(!config.auto_connect);
    }

    #[test]
    fn environment_overrides_json_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE_NAME,
                r#"{
                    "organization_id": "00D000000000001",
                    "deployment_developer_name": "From_File",
                    "messaging_url": "https://acme.my.salesforce-scrt.com"
                }"#,
            )?;
            jail.set_env("CHATDOCK_DEPLOYMENT_DEVELOPER_NAME", "From_Env");
            jail.set_env("CHATDOCK_AUTO_CONNECT", "true");

            let config = WidgetConfig::load(Some(Path::new(CONFIG_FILE_NAME)))
                .map_err(|error| error.to_string())?;
            assert_eq!(config.organization_id.as_deref(), Some("00D000000000001"));
            assert_eq!(
                config.deployment_developer_name.as_deref(),
                Some("From_Env")
            );
            assert!(config.auto_connect);
            Ok(())
        });
    }

    #[test]
    fn default_path_lives_under_the_chatdock_directory() {
        let path = WidgetConfig::default_config_path();
        assert!(path.ends_with(Path::new(CONFIG_DIRECTORY_NAME).join(CONFIG_FILE_NAME)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = WidgetConfig::load(Some(Path::new("absent.json")))
                .map_err(|error| error.to_string())?;
            assert_eq!(config, WidgetConfig::default());
            Ok(())
        });
    }
}
