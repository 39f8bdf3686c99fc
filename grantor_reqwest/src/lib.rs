//! Middleware to automatically attach service-account tokens to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to obtain an access
//! token from a shared [`TokenManager`] for each outbound request. The manager
//! hands out its cached token while it is valid and refreshes it on demand, so
//! most requests do not wait on the token endpoint at all.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use grantor::{
//!     exchange::HttpTokenExchanger, Scopes, ServiceAccount, TokenLifetimeConfig, TokenManager,
//! };
//! use grantor_reqwest::AccessTokenMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(TokenManager::new(
//!     ServiceAccount::from_file("service-account.json").await?,
//!     Scopes::normalized(["devstorage.read_only"])?,
//!     TokenLifetimeConfig::default(),
//!     HttpTokenExchanger::new(Client::new()),
//! ));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(manager))
//!     .build();
//!
//! client
//!     .get("https://storage.googleapis.com/storage/v1/b/my-bucket/o")
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that specific tokens are used for specific backends.
//!
//! ```ignore
//! use grantor_reqwest::{AccessTokenMiddleware, ExactHostMatch, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! AccessTokenMiddleware::new(manager)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("storage.googleapis.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use grantor::{exchange::TokenExchanger, IssuedToken, TokenManager};
use grantor_clock::{Clock, System};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};

/// A middleware that injects an access token into outgoing requests
pub struct AccessTokenMiddleware<E, C = System, P = HttpsOnly> {
    manager: Arc<TokenManager<E, C>>,
    predicate: P,
}

impl<E, C> AccessTokenMiddleware<E, C, HttpsOnly> {
    /// Construct a new middleware from a shared token manager
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(manager: Arc<TokenManager<E, C>>) -> Self {
        Self {
            manager,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<E, C, P> {
        AccessTokenMiddleware {
            manager: self.manager,
            predicate,
        }
    }
}

impl<E, C, P: Clone> Clone for AccessTokenMiddleware<E, C, P> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            predicate: self.predicate.clone(),
        }
    }
}

impl<E, C, P: fmt::Debug> fmt::Debug for AccessTokenMiddleware<E, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("subject", &self.manager.subject())
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl<E, C, P> AccessTokenMiddleware<E, C, P>
where
    E: TokenExchanger,
    C: Clock + Send + Sync,
{
    async fn authorization_header(&self) -> Result<header::HeaderValue> {
        let token = self.manager.get_token().await.map_err(Error::middleware)?;

        if tracing::enabled!(tracing::Level::TRACE) {
            trace_token(&token);
        }

        let mut header_value = BytesMut::with_capacity(token.access_token().as_str().len() + 7);
        header_value.put_slice(b"Bearer ");
        header_value.put_slice(token.access_token().as_str().as_bytes());
        let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())
            .map_err(Error::middleware)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

fn trace_token(token: &IssuedToken) {
    let now = System.now();

    tracing::trace!(
        token.issued = token.issued().0,
        token.expiry = token.expiry().0,
        token.until_expired = token.until_expired_at(now).0,
        "obtained access token"
    );
}

#[async_trait::async_trait]
impl<E, C, P> Middleware for AccessTokenMiddleware<E, C, P>
where
    E: TokenExchanger + 'static,
    C: Clock + Send + Sync + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let value = self.authorization_header().await?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

/// Attaches tokens only to requests sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }
}

impl reflection::PredicateReflection for HttpsOnly {}

impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("https only")
    }
}

/// Attaches tokens only to requests for one host, such as `storage.googleapis.com`
///
/// Hosts compare case-insensitively.
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Matches requests whose URL host is `host`
    pub fn new(host: impl AsRef<str>) -> Self {
        Self {
            host: host.as_ref().to_ascii_lowercase(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    fn eval(&self, req: &Request) -> bool {
        req.url()
            .host_str()
            .map_or(false, |host| host.eq_ignore_ascii_case(&self.host))
    }
}

impl reflection::PredicateReflection for ExactHostMatch {
    fn parameters<'a>(&'a self) -> Box<dyn Iterator<Item = reflection::Parameter<'a>> + 'a> {
        Box::new(std::iter::once(reflection::Parameter::new("host", &self.host)))
    }
}

impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host is {}", self.host)
    }
}
