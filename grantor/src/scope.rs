use std::{fmt, slice};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, InvalidScope};

/// The base under which bare scope names are expanded
pub const GOOGLE_SCOPE_BASE: &str = "https://www.googleapis.com/auth/";

/// An OAuth2 scope as defined in [RFC 6749, Section 3.3][RFC6749 3.3]
///
/// A scope must be composed of printable ASCII characters excluding
/// ` ` (space), `"` (double quote), and `\` (backslash).
///
///   [RFC6749 3.3]: https://datatracker.ietf.org/doc/html/rfc6749#section-3.3
#[braid(serde, validator, ref_doc = "A borrowed reference to an OAuth2 [`Scope`]")]
pub struct Scope;

impl aliri_braid::Validator for Scope {
    type Error = InvalidScope;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            Err(InvalidScope::EmptyString)
        } else if let Some((position, &value)) = s
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, &b)| b <= 0x20 || b == 0x22 || b == 0x5C || 0x7F <= b)
        {
            Err(InvalidScope::InvalidByte { position, value })
        } else {
            Ok(())
        }
    }
}

impl Scope {
    /// Expands a bare scope name into a fully-qualified scope
    ///
    /// A value that is already an absolute URL with a host is kept as-is. Anything
    /// else is treated as a name under [`GOOGLE_SCOPE_BASE`].
    ///
    /// ```
    /// use grantor::Scope;
    ///
    /// let short = Scope::normalize("drive.readonly").unwrap();
    /// assert_eq!(short.as_str(), "https://www.googleapis.com/auth/drive.readonly");
    ///
    /// let full = Scope::normalize("https://example.com/custom-scope").unwrap();
    /// assert_eq!(full.as_str(), "https://example.com/custom-scope");
    /// ```
    ///
    /// # Errors
    ///
    /// The input is empty or contains characters not allowed in a scope.
    pub fn normalize(raw: &str) -> Result<Self, InvalidScope> {
        if raw.is_empty() {
            Err(InvalidScope::EmptyString)
        } else if is_absolute_url(raw) {
            Self::new(raw.to_owned())
        } else {
            Self::new(format!("{}{}", GOOGLE_SCOPE_BASE, raw))
        }
    }
}

fn is_absolute_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => url.host_str().map_or(false, |h| !h.is_empty()),
        Err(_) => false,
    }
}

/// A non-empty, ordered list of scopes requested for a token
///
/// Scopes are sent to the token endpoint in the order given, separated by
/// single spaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Scope>", into = "Vec<Scope>")]
pub struct Scopes(Vec<Scope>);

impl Scopes {
    /// Constructs a scope list
    ///
    /// # Errors
    ///
    /// `scopes` is empty.
    pub fn new(scopes: Vec<Scope>) -> Result<Self, ConfigError> {
        if scopes.is_empty() {
            Err(ConfigError::NoScopes)
        } else {
            Ok(Self(scopes))
        }
    }

    /// Constructs a scope list, expanding bare names with [`Scope::normalize`]
    ///
    /// # Errors
    ///
    /// No scopes were provided, or one of them is invalid.
    pub fn normalized<I, S>(raw: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes = raw
            .into_iter()
            .map(|s| Scope::normalize(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(scopes)
    }

    /// Produces an iterator of the scopes in request order
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Scope> {
        self.0.iter()
    }

    /// The number of scopes in the list, always at least one
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The scopes joined by single spaces, as sent in the `scope` claim
    pub fn to_claim(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut scopes = self.0.iter();
        if let Some(first) = scopes.next() {
            f.write_str(first.as_str())?;
        }
        for scope in scopes {
            f.write_str(" ")?;
            f.write_str(scope.as_str())?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<Scope>> for Scopes {
    type Error = ConfigError;

    #[inline]
    fn try_from(scopes: Vec<Scope>) -> Result<Self, Self::Error> {
        Self::new(scopes)
    }
}

impl From<Scopes> for Vec<Scope> {
    #[inline]
    fn from(scopes: Scopes) -> Self {
        scopes.0
    }
}

impl<'a> IntoIterator for &'a Scopes {
    type Item = &'a Scope;
    type IntoIter = slice::Iter<'a, Scope>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
