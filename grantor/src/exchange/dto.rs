//! Wire formats for the token endpoint

use grantor_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use super::ExchangedToken;
use crate::AccessToken;

/// The form body of a JWT-bearer token request
#[derive(Debug, Serialize)]
pub(super) struct JwtBearerGrant<'a> {
    pub grant_type: &'static str,
    pub assertion: &'a str,
}

/// The JSON body of a successful token response
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    #[serde(default)]
    pub expires_in: Option<DurationSecs>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Converts the response, or `None` if it carries no usable access token
    pub fn into_exchanged_token(self) -> Option<ExchangedToken> {
        let access_token = self.access_token.filter(|t| !t.as_str().is_empty())?;

        let mut token = ExchangedToken::new(access_token);
        if let Some(expires_in) = self.expires_in {
            token = token.with_expires_in(expires_in);
        }
        if let Some(token_type) = self.token_type {
            token = token.with_token_type(token_type);
        }
        Some(token)
    }
}
