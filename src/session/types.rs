//! Identity and session token types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier of an authenticated user, as stored in the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
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

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session store key, i.e. the cookie value with its signature removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reasons a handshake could not be tied to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session cookie in handshake")]
    NoSessionCookie,

    #[error("session cookie is malformed or its signature does not match")]
    MalformedToken,

    #[error("session store lookup failed: {0}")]
    StoreLookup(String),

    #[error("session carries no identity")]
    NoIdentityInSession,
}

impl SessionError {
    /// Stable code used in logs and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSessionCookie => "NO_SESSION_COOKIE",
            Self::MalformedToken => "MALFORMED_TOKEN",
            Self::StoreLookup(_) => "STORE_LOOKUP_ERROR",
            Self::NoIdentityInSession => "NO_IDENTITY_IN_SESSION",
        }
    }
}
