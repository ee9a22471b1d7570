//! Caller authorization.
//!
//! Browse and command entry points take an [`AuthorizedCaller`], which only
//! [`CallerAllowList::authorize`] can produce.

use std::collections::HashSet;
use std::fmt;

use crate::error::{LecternError, LecternResult};
use crate::protocol_constants::SELF_IDENTITY;

/// Identities admitted by default besides the server's own.
pub const DEFAULT_ALLOWED_CALLERS: &[&str] = &[
    // Automotive projection
    "com.google.android.projection.gearhead",
    // Voice assistant
    "com.google.android.googlequicksearchbox",
    // Audio routing
    "com.android.bluetooth",
];

/// Opaque identity a caller presents when connecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof that a caller passed the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedCaller {
    identity: CallerIdentity,
}

impl AuthorizedCaller {
    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }
}

/// Fixed set of admitted caller identities, built once at startup.
#[derive(Debug, Clone)]
pub struct CallerAllowList {
    allowed: HashSet<String>,
}

impl CallerAllowList {
    /// Builds an allow-list from `callers` plus `self_identity`.
    ///
    /// Blank entries are dropped.
    pub fn new<I, S>(callers: I, self_identity: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = callers
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .chain(std::iter::once(self_identity.trim().to_string()))
            .filter(|c| !c.is_empty())
            .collect();
        Self { allowed }
    }

    /// The default identities plus [`SELF_IDENTITY`].
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ALLOWED_CALLERS.iter().copied(), SELF_IDENTITY)
    }

    /// Checks `caller` against the list. Exact, case-sensitive match.
    pub fn authorize(&self, caller: &CallerIdentity) -> LecternResult<AuthorizedCaller> {
        if self.allowed.contains(caller.as_str()) {
            Ok(AuthorizedCaller {
                identity: caller.clone(),
            })
        } else {
            log::debug!("[Auth] Rejected caller {}", caller);
            Err(LecternError::Unauthorized)
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl Default for CallerAllowList {
    fn default() -> Self {
        Self::with_defaults()
    }
}
