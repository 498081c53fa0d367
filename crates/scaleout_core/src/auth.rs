//! Token validation seam.
//!
//! The gateway never parses credentials itself. It asks a [`TokenValidator`]
//! supplied by the authentication subsystem whether a handshake token is
//! acceptable and treats a `false` answer as a terminal `AUTH_FAILURE`.

use std::collections::HashSet;

/// Decides whether a client token is acceptable.
pub trait TokenValidator: Send + Sync {
    /// Returns `true` when `token` grants access.
    fn is_valid(&self, token: &str) -> bool;
}

impl<F> TokenValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, token: &str) -> bool {
        self(token)
    }
}

/// Validator that accepts a fixed set of tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    accepted: HashSet<String>,
}

impl StaticTokenValidator {
    /// Creates a validator accepting exactly the given tokens.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of accepted tokens.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    /// Whether the validator rejects everything.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

impl TokenValidator for StaticTokenValidator {
    fn is_valid(&self, token: &str) -> bool {
        !token.is_empty() && self.accepted.contains(token)
    }
}
