use serde::Deserialize;

use crate::{error, ClientEmail, ClientEmailRef, KeyId, KeyIdRef, SigningKey};

/// A service account able to sign assertions on its own behalf
///
/// Service accounts are usually loaded from the JSON key file issued alongside the
/// account's private key. Only `client_email` and `private_key` are required; the
/// key identifier and token endpoint are kept when present.
#[derive(Clone, Debug)]
pub struct ServiceAccount {
    client_email: ClientEmail,
    key: SigningKey,
    key_id: Option<KeyId>,
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct ServiceAccountKeyFile {
    client_email: ClientEmail,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<KeyId>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccount {
    /// Constructs a service account from its email address and private key
    pub fn new(client_email: impl Into<ClientEmail>, key: SigningKey) -> Self {
        Self {
            client_email: client_email.into(),
            key,
            key_id: None,
            token_uri: None,
        }
    }

    /// Declares the identifier of the account's key, sent in assertion headers
    pub fn with_key_id(mut self, key_id: impl Into<KeyId>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Parses a service-account key file
    ///
    /// # Errors
    ///
    /// The document is not valid JSON, lacks `client_email` or `private_key`,
    /// or the private key is rejected.
    pub fn from_json(json: &str) -> Result<Self, error::IdentityError> {
        let file: ServiceAccountKeyFile = serde_json::from_str(json)?;
        let key = SigningKey::from_pem(&file.private_key)?;

        Ok(Self {
            client_email: file.client_email,
            key,
            key_id: file.private_key_id.filter(|k| !k.as_str().is_empty()),
            token_uri: file.token_uri.filter(|u| !u.is_empty()),
        })
    }

    /// Reads and parses a service-account key file
    ///
    /// # Errors
    ///
    /// The file cannot be read, or its contents are rejected as by
    /// [`from_json`][Self::from_json].
    #[cfg(feature = "file")]
    #[cfg_attr(docsrs, doc(cfg(feature = "file")))]
    pub async fn from_file(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, error::IdentityError> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), "read service account key file");
        Self::from_json(&data)
    }

    /// The account's email address, used as the assertion issuer
    pub fn client_email(&self) -> &ClientEmailRef {
        &self.client_email
    }

    /// The account's signing key
    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// The identifier of the account's signing key, if known
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// The token endpoint named in the key file, if any
    pub fn token_uri(&self) -> Option<&str> {
        self.token_uri.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test;

    #[test]
    fn parses_key_file() -> Result<()> {
        let account = ServiceAccount::from_json(test::SERVICE_ACCOUNT_JSON)?;

        assert_eq!(account.client_email().as_str(), test::CLIENT_EMAIL);
        assert_eq!(
            account.key_id().map(|k| k.as_str()),
            Some(test::PRIVATE_KEY_ID)
        );
        assert_eq!(
            account.token_uri(),
            Some("https://oauth2.googleapis.com/token")
        );
        Ok(())
    }

    #[test]
    fn accepts_minimal_key_file() -> Result<()> {
        let json = serde_json::json!({
            "client_email": "a@b.com",
            "private_key": test::PRIVATE_KEY_PEM,
        })
        .to_string();

        let account = ServiceAccount::from_json(&json)?;

        assert_eq!(account.client_email().as_str(), "a@b.com");
        assert_eq!(account.key_id(), None);
        assert_eq!(account.token_uri(), None);
        Ok(())
    }

    #[test]
    fn missing_email_is_malformed() {
        let json = serde_json::json!({ "private_key": test::PRIVATE_KEY_PEM }).to_string();

        assert!(matches!(
            ServiceAccount::from_json(&json),
            Err(error::IdentityError::Json(_))
        ));
    }

    #[test]
    fn invalid_private_key_is_rejected() {
        let json = serde_json::json!({
            "client_email": "a@b.com",
            "private_key": test::EC_PRIVATE_KEY_PEM,
        })
        .to_string();

        assert!(matches!(
            ServiceAccount::from_json(&json),
            Err(error::IdentityError::Key(_))
        ));
    }

    #[test]
    fn debug_output_does_not_leak_key() {
        let account = test::service_account();
        let debug = format!("{:?}", account);

        assert!(debug.contains(test::CLIENT_EMAIL));
        assert!(!debug.contains("MII"));
    }

    #[cfg(feature = "file")]
    #[tokio::test]
    async fn loads_key_file_from_disk() -> Result<()> {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/service-account.json");
        let account = ServiceAccount::from_file(path).await?;

        assert_eq!(account.client_email().as_str(), test::CLIENT_EMAIL);
        Ok(())
    }

    #[cfg(feature = "file")]
    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let result = ServiceAccount::from_file("/nonexistent/service-account.json").await;

        assert!(matches!(result, Err(error::IdentityError::Io(_))));
    }
}
