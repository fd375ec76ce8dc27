//! Caller identity port
//!
//! The authentication flow lives outside Flock; it only has to tell us who
//! is calling.

use crate::{Error, Result};

/// Supplies the uid of the signed-in caller
pub trait CallerIdentity: Send + Sync {
    fn current_uid(&self) -> Option<String>;

    /// Uid of the caller, or [`Error::Unauthenticated`]
    fn require_uid(&self) -> Result<String> {
        self.current_uid().ok_or(Error::Unauthenticated)
    }
}

/// Fixed identity, set once by whoever performed sign-in
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn signed_in(uid: impl Into<String>) -> Self {
        Self(Some(uid.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CallerIdentity for StaticIdentity {
    fn current_uid(&self) -> Option<String> {
        self.0.clone()
    }
}
