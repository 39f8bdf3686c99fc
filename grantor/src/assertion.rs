//! Signed JWT-bearer assertions
//!
//! An assertion is a JWT, signed with RS256 by the service account's private key,
//! that asks the token endpoint for an access token with particular scopes.
//!
//! ```text
//! base64url({"alg":"RS256","typ":"JWT"}) . base64url(claims) . base64url(signature)
//! ```
//!
//! The claim set names the service account as issuer, the token endpoint as
//! audience, and the requested scopes joined by spaces. Its `iat` and `exp`
//! claims bound the period during which the assertion may be exchanged; the
//! token endpoint grants a token living until `exp`.
//!
//! Building an assertion is a pure function of its inputs and the current time,
//! so two assertions built at different instants differ.

use std::fmt::Write;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use grantor_clock::{Clock, DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    error, Assertion, AssertionRef, ClientEmail, ClientEmailRef, KeyId, KeyIdRef, Scopes,
    ServiceAccount, SigningKey, TokenLifetimeConfig,
};

/// The signing algorithm used for every assertion
pub const ALGORITHM: &str = "RS256";

/// The token type declared in every assertion header
pub const TOKEN_TYPE: &str = "JWT";

/// The header of an assertion
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct AssertionHeaders {
    alg: String,
    typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
}

impl AssertionHeaders {
    /// Constructs the RS256 header
    pub fn new() -> Self {
        Self {
            alg: ALGORITHM.to_owned(),
            typ: TOKEN_TYPE.to_owned(),
            kid: None,
        }
    }

    /// Constructs the RS256 header, naming the key that signed the assertion
    pub fn with_key_id(kid: impl Into<KeyId>) -> Self {
        Self {
            kid: Some(kid.into()),
            ..Self::new()
        }
    }

    /// The signing algorithm
    pub fn alg(&self) -> &str {
        &self.alg
    }

    /// The token type
    pub fn typ(&self) -> &str {
        &self.typ
    }

    /// The signing key's identifier, if declared
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }
}

impl Default for AssertionHeaders {
    fn default() -> Self {
        Self::new()
    }
}

/// The claim set of an assertion
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct AssertionClaims {
    iss: ClientEmail,
    scope: String,
    aud: String,
    exp: UnixTime,
    iat: UnixTime,
}

impl AssertionClaims {
    /// Constructs claims requesting `scopes` for `issuer`, valid from `issued`
    /// for `lifetime`
    pub fn new(
        issuer: impl Into<ClientEmail>,
        scopes: &Scopes,
        audience: impl Into<String>,
        issued: UnixTime,
        lifetime: DurationSecs,
    ) -> Self {
        Self {
            iss: issuer.into(),
            scope: scopes.to_claim(),
            aud: audience.into(),
            exp: issued + lifetime,
            iat: issued,
        }
    }

    /// The service account requesting access
    pub fn iss(&self) -> &ClientEmailRef {
        &self.iss
    }

    /// The requested scopes, separated by spaces
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The token endpoint the assertion is addressed to
    pub fn aud(&self) -> &str {
        &self.aud
    }

    /// When the assertion was issued
    pub fn iat(&self) -> UnixTime {
        self.iat
    }

    /// When the assertion, and any token granted for it, expires
    pub fn exp(&self) -> UnixTime {
        self.exp
    }

    /// Produces a signed assertion from these claims
    ///
    /// # Errors
    ///
    /// Returns an error if the signature cannot be produced.
    pub fn sign(
        &self,
        key: &SigningKey,
        headers: &AssertionHeaders,
    ) -> Result<SignedAssertion, error::SigningError> {
        let headers_json = serde_json::to_vec(headers).map_err(error::signing_error)?;
        let claims_json = serde_json::to_vec(self).map_err(error::signing_error)?;
        let h_raw = URL_SAFE_NO_PAD.encode(headers_json);
        let p_raw = URL_SAFE_NO_PAD.encode(claims_json);

        let expected_len = h_raw.len()
            + p_raw.len()
            + base64::encoded_len(key.signature_len(), false).unwrap_or_default()
            + 2;

        let mut message = String::with_capacity(expected_len);
        write!(message, "{}.{}", h_raw, p_raw).expect("writes to strings never fail");

        let signature = URL_SAFE_NO_PAD.encode(key.sign(message.as_bytes())?);

        write!(message, ".{}", signature).expect("writes to strings never fail");

        Ok(SignedAssertion {
            assertion: Assertion::new(message),
            issued: self.iat,
            expires: self.exp,
        })
    }
}

/// An assertion together with the validity period it claims
#[derive(Debug)]
#[must_use]
pub struct SignedAssertion {
    assertion: Assertion,
    issued: UnixTime,
    expires: UnixTime,
}

impl SignedAssertion {
    /// The encoded assertion
    pub fn assertion(&self) -> &AssertionRef {
        &self.assertion
    }

    /// When the assertion was issued (`iat`)
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// When the assertion expires (`exp`)
    pub fn expires(&self) -> UnixTime {
        self.expires
    }

    /// Extracts the encoded assertion
    pub fn into_assertion(self) -> Assertion {
        self.assertion
    }
}

/// Builds and signs an assertion for `account`, issued at the current time
/// according to `clock`
///
/// # Errors
///
/// The account's key cannot produce a signature.
pub fn build<C: Clock>(
    account: &ServiceAccount,
    scopes: &Scopes,
    lifetime: &TokenLifetimeConfig,
    audience: &str,
    clock: &C,
) -> Result<SignedAssertion, error::SigningError> {
    build_at(account, scopes, lifetime, audience, clock.now())
}

/// Builds and signs an assertion for `account`, issued at `issued`
///
/// # Errors
///
/// The account's key cannot produce a signature.
pub fn build_at(
    account: &ServiceAccount,
    scopes: &Scopes,
    lifetime: &TokenLifetimeConfig,
    audience: &str,
    issued: UnixTime,
) -> Result<SignedAssertion, error::SigningError> {
    let headers = match account.key_id() {
        Some(kid) => AssertionHeaders::with_key_id(kid),
        None => AssertionHeaders::new(),
    };

    let claims = AssertionClaims::new(
        account.client_email(),
        scopes,
        audience,
        issued,
        lifetime.lifetime(),
    );

    claims.sign(account.key(), &headers)
}

macro_rules! expect_three {
    ($iter:expr) => {{
        let mut i = $iter;
        match (i.next(), i.next(), i.next(), i.next()) {
            (Some(first), Some(second), Some(third), None) => Some((first, second, third)),
            _ => None,
        }
    }};
}

impl AssertionRef {
    /// Splits the assertion into its encoded header, claims and signature sections
    fn sections(&self) -> Result<(&str, &str, &str), error::MalformedAssertion> {
        expect_three!(self.as_str().split('.')).ok_or_else(error::malformed_assertion_structure)
    }

    /// Decodes the header without verifying the signature
    ///
    /// # Errors
    ///
    /// The assertion is not a three-part JWT or its header is not valid JSON.
    pub fn decode_headers(&self) -> Result<AssertionHeaders, error::MalformedAssertion> {
        let (header, _, _) = self.sections()?;
        decode_section(header)
    }

    /// Decodes the claim set without verifying the signature
    ///
    /// # Errors
    ///
    /// The assertion is not a three-part JWT or its claims are not valid JSON.
    pub fn decode_claims(&self) -> Result<AssertionClaims, error::MalformedAssertion> {
        let (_, claims, _) = self.sections()?;
        decode_section(claims)
    }

    /// Returns the signed message and the decoded signature
    ///
    /// # Errors
    ///
    /// The assertion is not a three-part JWT or its signature is not base64url.
    pub fn signing_input(&self) -> Result<(&str, Vec<u8>), error::MalformedAssertion> {
        let (_, _, signature) = self.sections()?;
        let message = &self.as_str()[..self.as_str().len() - signature.len() - 1];
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(error::malformed_assertion)?;
        Ok((message, signature))
    }
}

fn decode_section<T: for<'de> Deserialize<'de>>(
    section: &str,
) -> Result<T, error::MalformedAssertion> {
    let raw = URL_SAFE_NO_PAD
        .decode(section)
        .map_err(error::malformed_assertion)?;
    serde_json::from_slice(&raw).map_err(error::malformed_assertion)
}
