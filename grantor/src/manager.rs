use grantor_clock::{Clock, DurationSecs, System, UnixTime};
use tokio::sync::Mutex;

use crate::{
    assertion, error::TokenError, exchange::TokenExchanger, AccessToken, AccessTokenRef,
    ClientEmailRef, Scopes, ServiceAccount, TokenLifetimeConfig,
};

/// An access token along with the window in which the manager hands it out
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    access_token: AccessToken,
    issued: UnixTime,
    expiry: UnixTime,
}

impl IssuedToken {
    /// The access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// When the assertion for this token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// The instant from which the token is no longer handed out
    ///
    /// This is the token's requested expiration minus the safety margin.
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Whether the token may still be used at `time`
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        time < self.expiry
    }

    /// How much longer the token would be valid as of the provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// The state of a manager's token cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// No token has been obtained yet
    Empty,
    /// A token is cached and will be returned without a refresh
    Valid,
    /// A token is cached but has reached its expiry; the next request refreshes it
    Stale,
}

/// Obtains access tokens for one service account and caches them until they expire
///
/// A manager serves exactly one combination of service account, scopes and lifetime.
/// Create one manager per combination and share it, typically behind an
/// [`Arc`][std::sync::Arc], with every task that needs tokens.
///
/// Checking the cache and refreshing it happen under a single lock. A caller that
/// arrives while another is refreshing waits for that refresh to finish, then finds
/// the new token in the cache. At most one exchange is in flight at any time.
#[derive(Debug)]
pub struct TokenManager<E, C = System> {
    account: ServiceAccount,
    scopes: Scopes,
    lifetime_config: TokenLifetimeConfig,
    exchanger: E,
    clock: C,
    cached: Mutex<Option<IssuedToken>>,
}

impl<E> TokenManager<E, System> {
    /// Constructs a new manager with an empty cache
    ///
    /// No token is requested until the first call to [`get_token()`][Self::get_token].
    pub fn new(
        account: ServiceAccount,
        scopes: Scopes,
        lifetime_config: TokenLifetimeConfig,
        exchanger: E,
    ) -> Self {
        Self {
            account,
            scopes,
            lifetime_config,
            exchanger,
            clock: System,
            cached: Mutex::new(None),
        }
    }
}

impl<E, C> TokenManager<E, C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenManager<E, D> {
        TokenManager {
            account: self.account,
            scopes: self.scopes,
            lifetime_config: self.lifetime_config,
            exchanger: self.exchanger,
            clock,
            cached: self.cached,
        }
    }

    /// The service account's email address, the subject of every token
    #[inline]
    pub fn subject(&self) -> &ClientEmailRef {
        self.account.client_email()
    }

    /// The scopes requested for every token
    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// The lifetime configuration applied to every token
    #[inline]
    pub fn lifetime_config(&self) -> &TokenLifetimeConfig {
        &self.lifetime_config
    }

    /// The exchanger used to trade assertions for access tokens
    #[inline]
    pub fn exchanger(&self) -> &E {
        &self.exchanger
    }
}

impl<E, C> TokenManager<E, C>
where
    E: TokenExchanger,
    C: Clock + Send + Sync,
{
    /// Returns a valid access token, refreshing it first if necessary
    ///
    /// If the cached token is still valid it is returned immediately. Otherwise a
    /// new assertion is signed and exchanged, and the result is cached until
    /// `exp - safety_margin`.
    ///
    /// # Errors
    ///
    /// The assertion could not be signed or the exchange failed. The cache is left
    /// as it was, and the next call will try again.
    pub async fn get_token(&self) -> Result<IssuedToken, TokenError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();

        match cached.as_ref() {
            Some(token) if token.is_valid_at(now) => {
                tracing::trace!(
                    subject = %self.subject(),
                    expiry = token.expiry.0,
                    "using cached access token"
                );
                return Ok(token.clone());
            }
            Some(token) => {
                tracing::debug!(
                    subject = %self.subject(),
                    expiry = token.expiry.0,
                    "cached access token is stale, refreshing"
                );
            }
            None => {
                tracing::debug!(
                    subject = %self.subject(),
                    "no access token cached, requesting one"
                );
            }
        }

        let token = self.refresh().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    #[tracing::instrument(err, skip(self), fields(subject = %self.subject()))]
    async fn refresh(&self) -> Result<IssuedToken, TokenError> {
        let signed = assertion::build(
            &self.account,
            &self.scopes,
            &self.lifetime_config,
            self.exchanger.audience(),
            &self.clock,
        )?;

        let exchanged = self.exchanger.exchange(signed.assertion()).await?;

        let token = IssuedToken {
            access_token: exchanged.into_access_token(),
            issued: signed.issued(),
            expiry: signed.expires() - self.lifetime_config.safety_margin(),
        };

        tracing::info!(
            issued = token.issued.0,
            expiry = token.expiry.0,
            "received new access token"
        );

        Ok(token)
    }

    /// Reports the state of the cache without waiting
    ///
    /// Returns `None` if another caller currently holds the cache, for example
    /// while a refresh is in progress.
    pub fn state(&self) -> Option<TokenState> {
        let cached = self.cached.try_lock().ok()?;
        let state = match cached.as_ref() {
            None => TokenState::Empty,
            Some(token) if token.is_valid_at(self.clock.now()) => TokenState::Valid,
            Some(_) => TokenState::Stale,
        };
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use color_eyre::Result;
    use grantor_clock::TestClock;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        error::ExchangeError,
        exchange::{ExchangedToken, GOOGLE_TOKEN_URL},
        test, AssertionRef,
    };

    const START: UnixTime = UnixTime(1_700_000_000);

    enum Reply {
        Token,
        Reject(u16),
        Offline,
    }

    /// An exchanger that counts calls and answers from a script
    struct ScriptedExchanger {
        calls: AtomicUsize,
        replies: std::sync::Mutex<Vec<Reply>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedExchanger {
        fn always_succeeds() -> Self {
            Self::scripted(Vec::new())
        }

        /// Replies are consumed front to back; once exhausted, every call succeeds
        fn scripted(replies: Vec<Reply>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                replies: std::sync::Mutex::new(replies),
                gate: None,
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::always_succeeds()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchanger for ScriptedExchanger {
        fn audience(&self) -> &str {
            GOOGLE_TOKEN_URL
        }

        async fn exchange(
            &self,
            assertion: &AssertionRef,
        ) -> Result<ExchangedToken, ExchangeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Reply::Token
                } else {
                    replies.remove(0)
                }
            };

            match reply {
                Reply::Token => {
                    let claims = assertion.decode_claims().expect("assertion is well formed");
                    Ok(ExchangedToken::new(AccessToken::new(format!(
                        "token-{}-{}",
                        call,
                        claims.iat()
                    ))))
                }
                Reply::Reject(status) => Err(ExchangeError::RemoteRejected {
                    status,
                    body: String::from(r#"{"error":"invalid_grant"}"#),
                }),
                Reply::Offline => Err(ExchangeError::network("connection refused")),
            }
        }
    }

    fn manager_with(
        exchanger: Arc<ScriptedExchanger>,
        config: TokenLifetimeConfig,
    ) -> (TokenManager<Arc<ScriptedExchanger>, Arc<TestClock>>, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(START));
        let manager = TokenManager::new(
            test::service_account(),
            Scopes::normalized(["devstorage.read_only"]).unwrap(),
            config,
            exchanger,
        )
        .with_clock(Arc::clone(&clock));
        (manager, clock)
    }

    #[test]
    fn exposes_subject_without_side_effects() {
        let exchanger = Arc::new(ScriptedExchanger::always_succeeds());
        let (manager, _) = manager_with(Arc::clone(&exchanger), TokenLifetimeConfig::default());

        assert_eq!(manager.subject().as_str(), test::CLIENT_EMAIL);
        assert_eq!(manager.state(), Some(TokenState::Empty));
        assert_eq!(exchanger.calls(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn refresh_is_logged_without_revealing_the_token() -> Result<()> {
        let exchanger = Arc::new(ScriptedExchanger::always_succeeds());
        let (manager, _) = manager_with(Arc::clone(&exchanger), TokenLifetimeConfig::default());

        let token = manager.get_token().await?;

        assert!(logs_contain("received new access token"));
        assert!(logs_contain(test::CLIENT_EMAIL));
        assert!(!logs_contain(token.access_token().as_str()));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_refresh_is_recorded_on_the_span() -> Result<()> {
        let exchanger = Arc::new(ScriptedExchanger::scripted(vec![Reply::Reject(403)]));
        let (manager, _) = manager_with(Arc::clone(&exchanger), TokenLifetimeConfig::default());

        assert!(manager.get_token().await.is_err());

        assert!(logs_contain("unable to exchange assertion for access token"));
        assert!(!logs_contain("received new access token"));
        Ok(())
    }

    #[tokio::test]
    async fn second_call_within_window_is_a_cache_hit() -> Result<()> {
        let exchanger = Arc::new(ScriptedExchanger::always_succeeds());
        let (manager, clock) =
            manager_with(Arc::clone(&exchanger), TokenLifetimeConfig::default());

        let first = manager.get_token().await?;
        clock.advance(DurationSecs(1_000));
        let second = manager.get_token().await?;

        assert_eq!(exchanger.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(manager.state(), Some(TokenState::Valid));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_issued_plus_lifetime_minus_margin() -> Result<()> {
        for (lifetime, margin) in [(3600, 10), (60, 59), (2, 1), (120, 0)] {
            let config = TokenLifetimeConfig::new(DurationSecs(lifetime))?
                .with_safety_margin(DurationSecs(margin))?;
            let exchanger = Arc::new(ScriptedExchanger::always_succeeds());
            let (manager, _) = manager_with(Arc::clone(&exchanger), config);

            let token = manager.get_token().await?;

            assert_eq!(token.issued(), START);
            assert_eq!(token.expiry(), UnixTime(START.0 + lifetime - margin));
        }
        Ok(())
    }

    #[tokio::test]
    async fn refreshes_once_expiry_is_reached() -> Result<()> {
        let config = TokenLifetimeConfig::new(DurationSecs(60))?
            .with_safety_margin(DurationSecs(10))?;
        let exchanger = Arc::new(ScriptedExchanger::always_succeeds());
        let (manager, clock) = manager_with(Arc::clone(&exchanger), config);

        let first = manager.get_token().await?;

        clock.set(UnixTime(first.expiry().0 - 1));
        assert_eq!(manager.get_token().await?, first);
        assert_eq!(exchanger.calls(), 1);

        clock.set(first.expiry());
        assert_eq!(manager.state(), Some(TokenState::Stale));

        let second = manager.get_token().await?;

        assert_eq!(exchanger.calls(), 2);
        assert_ne!(first.access_token(), second.access_token());
        assert_eq!(second.issued(), first.expiry());
        assert_eq!(second.expiry(), UnixTime(first.expiry().0 + 50));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_a_single_exchange() -> Result<()> {
        const CALLERS: usize = 32;

        let gate = Arc::new(Notify::new());
        let exchanger = Arc::new(ScriptedExchanger::gated(Arc::clone(&gate)));
        let (manager, _) = manager_with(Arc::clone(&exchanger), TokenLifetimeConfig::default());
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_token().await })
            })
            .collect();

        while exchanger.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.state(), None);
        gate.notify_one();

        let mut tokens = Vec::with_capacity(CALLERS);
        for handle in handles {
            tokens.push(handle.await??);
        }

        assert_eq!(exchanger.calls(), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_leaves_cache_empty() -> Result<()> {
        let exchanger = Arc::new(ScriptedExchanger::scripted(vec![Reply::Offline]));
        let (manager, _) = manager_with(Arc::clone(&exchanger), TokenLifetimeConfig::default());

        let err = manager.get_token().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(manager.state(), Some(TokenState::Empty));

        manager.get_token().await?;
        assert_eq!(exchanger.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn rejection_leaves_previous_token_untouched() -> Result<()> {
        let config = TokenLifetimeConfig::new(DurationSecs(60))?;
        let exchanger = Arc::new(ScriptedExchanger::scripted(vec![
            Reply::Token,
            Reply::Reject(400),
        ]));
        let (manager, clock) = manager_with(Arc::clone(&exchanger), config);

        let first = manager.get_token().await?;

        clock.set(first.expiry());
        let err = manager.get_token().await.unwrap_err();
        assert_eq!(err.status(), Some(400));

        clock.set(UnixTime(first.expiry().0 - 1));
        assert_eq!(manager.get_token().await?, first);
        assert_eq!(exchanger.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn stale_token_is_never_returned_after_failure() -> Result<()> {
        let config = TokenLifetimeConfig::new(DurationSecs(60))?;
        let exchanger = Arc::new(ScriptedExchanger::scripted(vec![
            Reply::Token,
            Reply::Offline,
            Reply::Offline,
        ]));
        let (manager, clock) = manager_with(Arc::clone(&exchanger), config);

        let first = manager.get_token().await?;
        clock.set(first.expiry());

        assert!(manager.get_token().await.is_err());
        assert!(manager.get_token().await.is_err());
        assert_eq!(manager.state(), Some(TokenState::Stale));

        let recovered = manager.get_token().await?;
        assert_ne!(recovered.access_token(), first.access_token());
        assert_eq!(exchanger.calls(), 4);
        Ok(())
    }

    #[test]
    fn lifetime_beyond_limit_is_rejected_before_any_exchange() {
        let exchanger = Arc::new(ScriptedExchanger::always_succeeds());

        assert!(TokenLifetimeConfig::new(DurationSecs(3601)).is_err());
        assert!(TokenLifetimeConfig::new(DurationSecs(0)).is_err());
        assert_eq!(exchanger.calls(), 0);
    }

    #[test]
    fn remaining_validity_saturates() {
        let token = IssuedToken {
            access_token: AccessToken::from_static("t"),
            issued: UnixTime(0),
            expiry: UnixTime(100),
        };

        assert_eq!(token.until_expired_at(UnixTime(40)), DurationSecs(60));
        assert_eq!(token.until_expired_at(UnixTime(140)), DurationSecs(0));
        assert!(token.is_valid_at(UnixTime(99)));
        assert!(!token.is_valid_at(UnixTime(100)));
    }
}
