use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};
use url::Url;

/// Prefix shared by every organization identifier.
pub const ORGANIZATION_ID_PREFIX: &str = "00D";
/// The two lengths an organization identifier may have.
pub const ORGANIZATION_ID_LENGTHS: [usize; 2] = [15, 18];
pub const HTTPS_SCHEME: &str = "https";
/// Required tail of `host + path` once normalized with a trailing slash.
pub const MESSAGING_URL_SUFFIX: &str = "salesforce-scrt.com/";

/// Deployment identity of one messaging endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub organization_id: String,
    pub deployment_developer_name: String,
    pub messaging_url: String,
}

impl Credentials {
    pub fn new(
        organization_id: impl Into<String>,
        deployment_developer_name: impl Into<String>,
        messaging_url: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            deployment_developer_name: deployment_developer_name.into(),
            messaging_url: messaging_url.into(),
        }
    }

    /// Trims surrounding whitespace from every field, as form inputs do.
    pub fn normalized(mut self) -> Self {
        self.organization_id = self.organization_id.trim().to_string();
        self.deployment_developer_name = self.deployment_developer_name.trim().to_string();
        self.messaging_url = self.messaging_url.trim().to_string();
        self
    }

    /// True when every field has a value; the submit control stays disabled otherwise.
    pub fn is_complete(&self) -> bool {
        !self.organization_id.is_empty()
            && !self.deployment_developer_name.is_empty()
            && !self.messaging_url.is_empty()
    }
}

/// User-facing rejection of submitted credentials.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CredentialError {
    #[snafu(display("Invalid organization id: {value}"))]
    InvalidOrganizationId { value: String },
    #[snafu(display(
        "Expected a valid deployment developer name to be a non-empty string but received: {value:?}"
    ))]
    InvalidDeploymentName { value: String },
    #[snafu(display("Expected a valid https messaging URL but received: {value}"))]
    InvalidMessagingUrl { value: String },
}

pub fn is_valid_organization_id(id: &str) -> bool {
    ORGANIZATION_ID_LENGTHS.contains(&id.chars().count()) && id.starts_with(ORGANIZATION_ID_PREFIX)
}

pub fn is_valid_deployment_name(name: &str) -> bool {
    !name.is_empty()
}

/// Accepts absolute `https` URLs whose host and path end in the messaging suffix,
/// with or without a trailing slash. Unparseable input is simply invalid.
pub fn is_valid_messaging_url(raw: &str) -> bool {
    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::debug!("messaging url {:?} failed to parse: {}", raw, error);
            return false;
        }
    };

    if parsed.scheme() != HTTPS_SCHEME {
        return false;
    }

    let Some(host) = parsed.host_str() else {
        return false;
    };

    let mut location = format!("{host}{}", parsed.path());
    if !location.ends_with('/') {
        location.push('/');
    }

    location.ends_with(MESSAGING_URL_SUFFIX)
}

/// Checks the fields in form order and reports the first failure.
pub fn validate_credentials(credentials: &Credentials) -> Result<(), CredentialError> {
    ensure!(
        is_valid_organization_id(&credentials.organization_id),
        InvalidOrganizationIdSnafu {
            value: credentials.organization_id.clone(),
        }
    );
    ensure!(
        is_valid_deployment_name(&credentials.deployment_developer_name),
        InvalidDeploymentNameSnafu {
            value: credentials.deployment_developer_name.clone(),
        }
    );
    ensure!(
        is_valid_messaging_url(&credentials.messaging_url),
        InvalidMessagingUrlSnafu {
            value: credentials.messaging_url.clone(),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_URL: &str = "https://acme.my.salesforce-scrt.com";

    #[test]
    fn organization_id_requires_prefix_and_length() {
        let cases = [
            ("00D000000000001", true),
            ("00D000000000001ABC", true),
            ("00D00000000001", false),
            ("00D0000000000012", false),
            ("00D00000000000123", false),
            ("00D0000000000012345", false),
            ("00E000000000001", false),
            ("00e000000000001ABC", false),
            ("", false),
            ("00D", false),
        ];

        for (id, expected) in cases {
            assert_eq!(is_valid_organization_id(id), expected, "id {id:?}");
        }
    }

    #[test]
    fn deployment_name_must_not_be_empty() {
        assert!(is_valid_deployment_name("Web_Deployment"));
        assert!(!is_valid_deployment_name(""));
    }

    #[test]
    fn messaging_url_accepts_both_slash_forms() {
        assert!(is_valid_messaging_url(VALID_URL));
        assert!(is_valid_messaging_url(&format!("{VALID_URL}/")));
    }

    #[test]
    fn messaging_url_rejects_other_schemes_hosts_and_garbage() {
        assert!(!is_valid_messaging_url("http://acme.my.salesforce-scrt.com"));
        assert!(!is_valid_messaging_url("wss://acme.my.salesforce-scrt.com"));
        assert!(!is_valid_messaging_url("https://acme.example.com"));
        assert!(!is_valid_messaging_url(
            "https://acme.my.salesforce-scrt.com/extra/path"
        ));
        assert!(!is_valid_messaging_url("acme.my.salesforce-scrt.com"));
        assert!(!is_valid_messaging_url("https://"));
        assert!(!is_valid_messaging_url("::not a url::"));
        assert!(!is_valid_messaging_url(""));
    }

    #[test]
    fn validation_reports_first_failing_field() {
        let valid = Credentials::new("00D000000000001", "Web_Deployment", VALID_URL);
        assert_eq!(validate_credentials(&valid), Ok(()));

        let bad_org = Credentials::new("bogus", "", "http://nope");
        assert_eq!(
            validate_credentials(&bad_org),
            Err(CredentialError::InvalidOrganizationId {
                value: "bogus".to_string()
            })
        );

        let bad_url = Credentials::new("00D000000000001", "Web_Deployment", "http://nope");
        let error = validate_credentials(&bad_url).expect_err("url must fail");
        assert_eq!(
            error.to_string(),
            "Expected a valid https messaging URL but received: http://nope"
        );
    }

    #[test]
    fn normalized_trims_and_completeness_checks_every_field() {
        let credentials =
            Credentials::new(" 00D000000000001 ", "\tWeb_Deployment", " https://x/ ").normalized();
        assert_eq!(credentials.organization_id, "00D000000000001");
        assert_eq!(credentials.deployment_developer_name, "Web_Deployment");
        assert_eq!(credentials.messaging_url, "https://x/");
        assert!(credentials.is_complete());
        assert!(!Credentials::new("00D000000000001", "", VALID_URL).is_complete());
    }
}
