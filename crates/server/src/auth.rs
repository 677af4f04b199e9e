//! Connection authentication.

use std::fmt;

/// User name accepted by [`StaticAuthenticator::default`].
pub const DEFAULT_USER: &str = "client";

/// Secret accepted by [`StaticAuthenticator::default`].
pub const DEFAULT_SECRET: &str = "12345";

/// Authenticated name of a connection's user. Prefixes every uid it creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks `login` credentials.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the identity for valid credentials, `None` otherwise.
    fn authenticate(&self, name: &str, secret: &str) -> Option<Identity>;
}

/// Accepts exactly one configured user/secret pair.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    user: String,
    secret: String,
}

impl StaticAuthenticator {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }
}

impl Default for StaticAuthenticator {
    fn default() -> Self {
        Self::new(DEFAULT_USER, DEFAULT_SECRET)
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, name: &str, secret: &str) -> Option<Identity> {
        (name == self.user && secret == self.secret).then(|| Identity::new(name))
    }
}
