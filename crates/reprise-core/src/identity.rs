use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_LEN: usize = 128;

/// Key naming one conversation owner.
///
/// Identities arrive from the authentication layer already verified; this
/// type only guards the storage side, because an identity doubles as the
/// directory name its logs live under. Allowed characters are
/// `[A-Za-z0-9._@-]`, which covers usernames, emails, and opaque tokens
/// while keeping path separators and hidden-file prefixes out.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Identity(String);

/// Rejection reason for a malformed identity.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid identity: {reason}")]
pub struct InvalidIdentity {
    pub reason: &'static str,
}

impl Identity {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidIdentity> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(InvalidIdentity { reason: "must not be empty" });
        }
        if raw.len() > MAX_LEN {
            return Err(InvalidIdentity { reason: "longer than 128 bytes" });
        }
        if raw.starts_with('.') {
            return Err(InvalidIdentity { reason: "must not start with a dot" });
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-');
        if !raw.chars().all(allowed) {
            return Err(InvalidIdentity {
                reason: "contains characters outside [A-Za-z0-9._@-]",
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = InvalidIdentity;
    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl FromStr for Identity {
    type Err = InvalidIdentity;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
