use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// An authorization token that identifies who a request is sent as.
///
/// Requests are queued per credential, so two tokens never share pacing
/// state. The token is never printed; [`fmt::Display`] shows a short
/// fingerprint that is safe to log.
///
/// Tokens without a scheme are sent as bot tokens (`Bot <token>`). Tokens that
/// already start with `Bot ` or `Bearer ` are sent verbatim.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns `true` for the anonymous credential used by unauthenticated
    /// requests when no default token is configured
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// The value of the `Authorization` header for this credential
    #[must_use]
    pub fn authorization(&self) -> String {
        if self.0.starts_with("Bot ") || self.0.starts_with("Bearer ") {
            self.0.clone()
        } else {
            format!("Bot {}", self.0)
        }
    }

    /// A loggable identifier: the last four characters of the token
    #[must_use]
    pub fn fingerprint(&self) -> String {
        if self.is_anonymous() {
            return "anonymous".to_string();
        }
        let tail: String = self.0.chars().rev().take(4).collect();
        format!("…{}", tail.chars().rev().collect::<String>())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

impl From<&SecretString> for Credential {
    fn from(secret: &SecretString) -> Self {
        Self::new(secret.expose_secret())
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}
