//! Access tokens for service accounts via the OAuth2 JWT-bearer grant
//!
//! A service account proves its identity to a token issuer by signing a short-lived
//! assertion with its RSA private key. The issuer answers with an access token that
//! can be attached to outbound requests as a bearer credential. This crate builds
//! those assertions, exchanges them for access tokens, and caches the result until
//! shortly before it expires.
//!
//! The [`TokenManager`] is the piece most applications need. One manager serves
//! exactly one combination of identity, scopes and lifetime. It is safe to share
//! between tasks: concurrent callers that find the cache empty or stale are
//! serialized so that only one of them talks to the issuer, and the rest reuse the
//! token it obtained.
//!
//! ```no_run
//! use grantor::{
//!     exchange::HttpTokenExchanger, ServiceAccount, Scopes, TokenLifetimeConfig, TokenManager,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let account = ServiceAccount::from_file("service-account.json").await?;
//! let scopes = Scopes::normalized(["devstorage.read_only"])?;
//!
//! let manager = TokenManager::new(
//!     account,
//!     scopes,
//!     TokenLifetimeConfig::default(),
//!     HttpTokenExchanger::new(reqwest::Client::new()),
//! );
//!
//! let token = manager.get_token().await?;
//! tracing::info!(expiry = token.expiry().0, "obtained access token");
//! # Ok(())
//! # }
//! ```
//!
//! # Refresh policy
//!
//! A token is requested with a lifetime of at most one hour. The manager considers
//! it usable until `expiry = exp - safety_margin`, where `exp` is the expiration
//! claimed in the assertion. The first call at or after that instant performs a
//! refresh. There is no background refresh and no automatic retry: a failed refresh
//! is reported to the caller and the next call tries again.
//!
//! # Features
//!
//! * `http` (default): the [`reqwest`]-based [`HttpTokenExchanger`][exchange::HttpTokenExchanger].
//! * `file` (default): loading service-account key files with
//!   [`ServiceAccount::from_file`].
//! * `rustls-tls`, `default-tls`: forwarded to `reqwest` to select a TLS backend.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod assertion;
mod braids;
pub mod error;
pub mod exchange;
mod identity;
mod key;
mod lifetime;
mod manager;
mod scope;

#[cfg(test)]
pub(crate) mod test;

pub use braids::*;
pub use identity::ServiceAccount;
pub use key::SigningKey;
pub use lifetime::{TokenLifetimeConfig, DEFAULT_SAFETY_MARGIN, MAX_LIFETIME};
pub use manager::{IssuedToken, TokenManager, TokenState};
pub use scope::{Scope, ScopeRef, Scopes, GOOGLE_SCOPE_BASE};
