//! Exchanging assertions for access tokens
//!
//! The exchange is a single form-encoded `POST` to the token endpoint carrying
//! the JWT-bearer grant type and the signed assertion. A `200 OK` response with a
//! non-empty `access_token` is the only success.

use async_trait::async_trait;
use grantor_clock::DurationSecs;

use crate::{error::ExchangeError, AccessToken, AccessTokenRef, AssertionRef};

#[cfg(feature = "http")]
mod dto;

/// Google's OAuth2 token endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// The grant type identifying the JWT-bearer flow ([RFC 7523][])
///
///   [RFC 7523]: https://datatracker.ietf.org/doc/html/rfc7523#section-2.1
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// An access token as returned by the token endpoint
#[derive(Clone, Debug)]
pub struct ExchangedToken {
    access_token: AccessToken,
    expires_in: Option<DurationSecs>,
    token_type: Option<String>,
}

impl ExchangedToken {
    /// Constructs a response carrying only an access token
    pub fn new(access_token: impl Into<AccessToken>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in: None,
            token_type: None,
        }
    }

    /// Records the lifetime the endpoint reported for the token
    pub fn with_expires_in(mut self, expires_in: DurationSecs) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Records the token type the endpoint reported
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// The access token
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The lifetime reported by the endpoint, if any
    ///
    /// Informational only: the manager relies on the expiry it requested in the
    /// assertion.
    pub fn expires_in(&self) -> Option<DurationSecs> {
        self.expires_in
    }

    /// The token type reported by the endpoint, if any
    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Extracts the access token
    pub fn into_access_token(self) -> AccessToken {
        self.access_token
    }
}

/// Trades signed assertions for access tokens
///
/// Implementations perform at most one attempt per call; retrying is left to the
/// caller.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// The token endpoint, used as the audience of assertions sent to it
    fn audience(&self) -> &str;

    /// Exchanges `assertion` for an access token
    async fn exchange(&self, assertion: &AssertionRef) -> Result<ExchangedToken, ExchangeError>;
}

#[async_trait]
impl<T: TokenExchanger + ?Sized> TokenExchanger for std::sync::Arc<T> {
    fn audience(&self) -> &str {
        (**self).audience()
    }

    async fn exchange(&self, assertion: &AssertionRef) -> Result<ExchangedToken, ExchangeError> {
        (**self).exchange(assertion).await
    }
}

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use http::HttpTokenExchanger;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use reqwest::{StatusCode, Url};

    use super::{dto, ExchangedToken, TokenExchanger, GOOGLE_TOKEN_URL, JWT_BEARER_GRANT_TYPE};
    use crate::{error::ExchangeError, AssertionRef};

    /// A token exchanger that talks to the token endpoint over HTTP(S)
    #[derive(Clone, Debug)]
    pub struct HttpTokenExchanger {
        client: reqwest::Client,
        token_url: Url,
    }

    impl HttpTokenExchanger {
        /// Constructs an exchanger for Google's token endpoint
        ///
        /// Timeouts and other transport settings are taken from `client`.
        pub fn new(client: reqwest::Client) -> Self {
            Self {
                client,
                token_url: Url::parse(GOOGLE_TOKEN_URL).expect("token endpoint URL is valid"),
            }
        }

        /// Directs exchanges to a different token endpoint
        pub fn with_token_url(self, token_url: Url) -> Self {
            Self { token_url, ..self }
        }

        /// The token endpoint
        pub fn token_url(&self) -> &Url {
            &self.token_url
        }
    }

    #[async_trait]
    impl TokenExchanger for HttpTokenExchanger {
        fn audience(&self) -> &str {
            self.token_url.as_str()
        }

        async fn exchange(
            &self,
            assertion: &AssertionRef,
        ) -> Result<ExchangedToken, ExchangeError> {
            request_token(&self.client, self.token_url.clone(), assertion).await
        }
    }

    #[tracing::instrument(
        err,
        skip(client, token_url, assertion),
        fields(token_url = %token_url)
    )]
    async fn request_token(
        client: &reqwest::Client,
        token_url: Url,
        assertion: &AssertionRef,
    ) -> Result<ExchangedToken, ExchangeError> {
        tracing::trace!("sending assertion to token endpoint");

        let grant = dto::JwtBearerGrant {
            grant_type: JWT_BEARER_GRANT_TYPE,
            assertion: assertion.as_str(),
        };

        let resp = client
            .post(token_url)
            .form(&grant)
            .send()
            .await
            .map_err(ExchangeError::network)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received token response from token endpoint"
        );

        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_else(|err| {
                tracing::debug!(error = %err, "unable to read rejection body");
                String::new()
            });
            return Err(ExchangeError::RemoteRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await.map_err(ExchangeError::network)?;
        let resp: dto::TokenResponse =
            serde_json::from_slice(&body).map_err(|e| ExchangeError::MalformedResponse {
                reason: "response body is not a token response",
                source: Some(e),
            })?;

        let token = resp.into_exchanged_token().ok_or(ExchangeError::MalformedResponse {
            reason: "response did not include an access token",
            source: None,
        })?;

        tracing::debug!(
            token_type = token.token_type(),
            expires_in = token.expires_in().map(|d| d.0),
            "received access token"
        );

        Ok(token)
    }
}
