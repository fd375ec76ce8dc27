//! # Flock Core
//!
//! Foundation types shared by every Flock crate.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    model     │   │    error     │   │    event     │
//! │ Post / User  │   │ Error + Kind │   │ Event<T>     │
//! │ Comment      │   │ Result<T>    │   │ Resource<T>  │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!                         identity: CallerIdentity
//! ```
//!
//! Records carry two kinds of fields: persisted fields (stored in the
//! backing store) and derived fields (author name, avatar, liked-by-me)
//! which are recomputed on every read and never written back.

pub mod error;
pub mod event;
pub mod identity;
pub mod model;

pub use error::{Error, ErrorKind, Result};
pub use event::{Event, Resource};
pub use identity::{CallerIdentity, StaticIdentity};
pub use model::{Comment, Post, ProfileUpdate, User};

/// Profile picture assigned to users that never uploaded one
pub const DEFAULT_PROFILE_PICTURE_URL: &str = "default_profile_picture.png";

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 8;
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// This is the ordering key stored in every `date` field.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fresh random identifier for a new record
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Check a username against the length limits
pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "username must be at least {} characters",
            MIN_USERNAME_LENGTH
        )));
    }
    if len > MAX_USERNAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    Ok(())
}
