use grantor_clock::DurationSecs;

use crate::error::ConfigError;

/// The longest token lifetime the token endpoint will grant
pub const MAX_LIFETIME: DurationSecs = DurationSecs(3600);

/// The safety margin applied when none is configured explicitly
pub const DEFAULT_SAFETY_MARGIN: DurationSecs = DurationSecs(10);

/// Configuration for how long requested tokens live and when they are refreshed
///
/// Each assertion asks for a token valid for `lifetime`. The manager stops
/// handing out a token `safety_margin` before that lifetime ends, so that a token
/// is never used right as the issuer starts considering it expired, whether due
/// to clock skew or request latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLifetimeConfig {
    lifetime: DurationSecs,
    safety_margin: DurationSecs,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Requests tokens with the maximum lifetime of one hour and refreshes them
    /// ten seconds before they expire.
    fn default() -> Self {
        Self {
            lifetime: MAX_LIFETIME,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a configuration requesting tokens valid for `lifetime`
    ///
    /// The safety margin defaults to [`DEFAULT_SAFETY_MARGIN`], or to zero if the
    /// lifetime is not longer than that default.
    ///
    /// # Errors
    ///
    /// `lifetime` is zero or longer than [`MAX_LIFETIME`].
    pub fn new(lifetime: DurationSecs) -> Result<Self, ConfigError> {
        if lifetime.0 == 0 || lifetime > MAX_LIFETIME {
            return Err(ConfigError::LifetimeOutOfRange { lifetime });
        }

        let safety_margin = if lifetime > DEFAULT_SAFETY_MARGIN {
            DEFAULT_SAFETY_MARGIN
        } else {
            DurationSecs(0)
        };

        Ok(Self {
            lifetime,
            safety_margin,
        })
    }

    /// Sets how long before the end of its lifetime a token is refreshed
    ///
    /// # Errors
    ///
    /// `safety_margin` is not strictly less than the configured lifetime.
    pub fn with_safety_margin(self, safety_margin: DurationSecs) -> Result<Self, ConfigError> {
        if safety_margin >= self.lifetime {
            return Err(ConfigError::SafetyMarginTooLarge {
                margin: safety_margin,
                lifetime: self.lifetime,
            });
        }

        Ok(Self {
            safety_margin,
            ..self
        })
    }

    /// The lifetime requested for each token
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// How long before the end of its lifetime a token is refreshed
    #[inline]
    pub fn safety_margin(&self) -> DurationSecs {
        self.safety_margin
    }

    /// How long a freshly issued token is handed out by the manager
    #[inline]
    pub fn usable_lifetime(&self) -> DurationSecs {
        self.lifetime - self.safety_margin
    }
}
