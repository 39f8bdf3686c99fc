//! Common errors

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use grantor_clock::DurationSecs;
use thiserror::Error;

/// The private key material was rejected
///
/// The key could not be decoded, is not an RSA key, or is structurally invalid.
/// A service account carrying such a key can never produce assertions.
#[derive(Debug, Error)]
#[error("private key rejected")]
pub struct KeyRejected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn key_rejected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> KeyRejected {
    KeyRejected {
        source: source.into(),
    }
}

/// The assertion could not be signed
#[derive(Debug, Error)]
#[error("unable to sign assertion")]
pub struct SigningError {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn signing_error(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> SigningError {
    SigningError {
        source: source.into(),
    }
}

/// The assertion is not a well-formed three-part JWT
#[derive(Debug, Error)]
#[error("malformed assertion")]
pub struct MalformedAssertion {
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

pub(crate) fn malformed_assertion(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedAssertion {
    MalformedAssertion {
        source: Some(source.into()),
    }
}

pub(crate) const fn malformed_assertion_structure() -> MalformedAssertion {
    MalformedAssertion { source: None }
}

/// An invalid scope
#[derive(Debug, Error)]
pub enum InvalidScope {
    /// The scope was the empty string
    #[error("scope cannot be empty")]
    EmptyString,
    /// The scope contained an invalid byte
    #[error("invalid scope byte at position {position}: 0x{value:02x}")]
    InvalidByte {
        /// The index in the scope where the invalid byte was found
        position: usize,
        /// The invalid byte value
        value: u8,
    },
}

impl From<std::convert::Infallible> for InvalidScope {
    fn from(_: std::convert::Infallible) -> Self {
        unreachable!("infallible result")
    }
}

/// A token manager was configured with values the issuer would never accept
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested token lifetime is outside the range the issuer permits
    #[error(
        "token lifetime must be between 1 and {max} seconds, got {lifetime}",
        max = crate::MAX_LIFETIME.0
    )]
    LifetimeOutOfRange {
        /// The rejected lifetime
        lifetime: DurationSecs,
    },
    /// The safety margin would consume the entire token lifetime
    #[error("safety margin ({margin}) must be less than the token lifetime ({lifetime})")]
    SafetyMarginTooLarge {
        /// The rejected safety margin
        margin: DurationSecs,
        /// The configured lifetime
        lifetime: DurationSecs,
    },
    /// No scopes were requested
    #[error("at least one scope must be requested")]
    NoScopes,
    /// One of the requested scopes is invalid
    #[error("invalid scope")]
    InvalidScope(#[from] InvalidScope),
}

/// A service-account identity could not be loaded
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The key file could not be read
    #[error("unable to read service account key file")]
    Io(#[from] std::io::Error),
    /// The key file is not valid JSON or lacks required fields
    #[error("malformed service account key file")]
    Json(#[from] serde_json::Error),
    /// The private key in the key file was rejected
    #[error("invalid service account private key")]
    Key(#[from] KeyRejected),
}

/// An error while exchanging an assertion for an access token
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The token endpoint could not be reached, or the response could not be read
    ///
    /// These failures are usually transient and the exchange may be retried.
    #[error("error communicating with token endpoint")]
    Network(#[source] Box<dyn StdError + Send + Sync + 'static>),
    /// The token endpoint declined the assertion
    ///
    /// This usually indicates a revoked or deleted key, a deleted service account,
    /// or scopes the account may not request. Retrying will not help.
    #[error("token endpoint rejected assertion with status {status}: {body}")]
    RemoteRejected {
        /// The HTTP status code returned
        status: u16,
        /// The body of the error response
        body: String,
    },
    /// The token endpoint answered successfully but the response was unusable
    #[error("malformed token response: {reason}")]
    MalformedResponse {
        /// What was wrong with the response
        reason: &'static str,
        /// The underlying deserialization error, if any
        #[source]
        source: Option<serde_json::Error>,
    },
}

impl ExchangeError {
    /// Constructs a network error from any underlying transport error
    pub fn network(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Network(source.into())
    }
}

/// An error obtaining an access token from a [`TokenManager`][crate::TokenManager]
#[derive(Debug, Error)]
pub enum TokenError {
    /// The assertion could not be signed
    #[error("unable to build assertion")]
    Signing(#[from] SigningError),
    /// The assertion could not be exchanged for an access token
    #[error("unable to exchange assertion for access token")]
    Exchange(#[from] ExchangeError),
}

impl TokenError {
    /// Whether retrying the same request later might succeed
    ///
    /// Only network failures are considered transient. Signing failures and
    /// rejections by the token endpoint will repeat on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Exchange(ExchangeError::Network(_)))
    }

    /// The HTTP status code returned by the token endpoint, if it rejected the assertion
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Exchange(ExchangeError::RemoteRejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        let network = TokenError::from(ExchangeError::network("connection reset"));
        let rejected = TokenError::from(ExchangeError::RemoteRejected {
            status: 400,
            body: String::from("invalid_grant"),
        });
        let signing = TokenError::from(signing_error("bad key"));

        assert!(network.is_transient());
        assert!(!rejected.is_transient());
        assert!(!signing.is_transient());
    }

    #[test]
    fn status_is_reported_for_rejections_only() {
        let rejected = TokenError::from(ExchangeError::RemoteRejected {
            status: 401,
            body: String::new(),
        });
        let malformed = TokenError::from(ExchangeError::MalformedResponse {
            reason: "empty access token",
            source: None,
        });

        assert_eq!(rejected.status(), Some(401));
        assert_eq!(malformed.status(), None);
    }

    #[test]
    fn lifetime_error_names_the_limit() {
        let err = ConfigError::LifetimeOutOfRange {
            lifetime: DurationSecs(7200),
        };

        assert_eq!(
            err.to_string(),
            "token lifetime must be between 1 and 3600 seconds, got 7200s"
        );
    }
}
