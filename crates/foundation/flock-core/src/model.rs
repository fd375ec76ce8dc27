//! Social records: posts, users and comments
//!
//! Field names are persisted in camelCase (`authorUid`, `likedBy`, ...).
//! Fields marked `#[serde(skip)]` are derived at read time and never stored.

use serde::{Deserialize, Serialize};

/// A post (the paginated, toggleable entity)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Post {
    pub id: String,
    pub author_uid: String,

    /// Copied from the author on every read
    #[serde(skip)]
    pub author_username: String,

    /// Copied from the author on every read
    #[serde(skip)]
    pub author_profile_picture_url: String,

    pub text: String,
    pub image_url: String,

    /// Creation time in ms since epoch, the feed ordering key
    pub date: i64,

    /// Whether the reading caller is in `liked_by`
    #[serde(skip)]
    pub is_liked: bool,

    /// Uids of users that liked this post
    pub liked_by: Vec<String>,
}

impl Post {
    /// Create a post authored by `author_uid`, stamped now
    pub fn new(author_uid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            author_uid: author_uid.into(),
            text: text.into(),
            date: crate::now_millis(),
            ..Default::default()
        }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }

    /// Copy the author's display fields and compute the caller flag
    pub fn enrich(&mut self, author: &User, caller_uid: &str) {
        self.author_username = author.username.clone();
        self.author_profile_picture_url = author.profile_picture_url.clone();
        self.is_liked = self.liked_by.iter().any(|uid| uid == caller_uid);
    }
}

/// A user profile (the author of posts and comments)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub uid: String,
    pub username: String,
    pub profile_picture_url: String,
    pub description: String,

    /// Uids this user follows
    pub follows: Vec<String>,

    /// Whether the reading caller follows this user
    #[serde(skip)]
    pub is_following: bool,
}

impl Default for User {
    fn default() -> Self {
        Self {
            uid: String::new(),
            username: String::new(),
            profile_picture_url: crate::DEFAULT_PROFILE_PICTURE_URL.to_string(),
            description: String::new(),
            follows: Vec::new(),
            is_following: false,
        }
    }
}

impl User {
    pub fn new(uid: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn follows(&self, uid: &str) -> bool {
        self.follows.iter().any(|f| f == uid)
    }
}

/// A comment on a post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Comment {
    pub comment_id: String,
    pub post_id: String,
    pub uid: String,

    #[serde(skip)]
    pub username: String,

    #[serde(skip)]
    pub profile_picture_url: String,

    pub comment: String,
    pub date: i64,
}

impl Comment {
    pub fn new(post_id: impl Into<String>, uid: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            comment_id: crate::new_id(),
            post_id: post_id.into(),
            uid: uid.into(),
            comment: comment.into(),
            date: crate::now_millis(),
            ..Default::default()
        }
    }

    pub fn enrich(&mut self, author: &User) {
        self.username = author.username.clone();
        self.profile_picture_url = author.profile_picture_url.clone();
    }
}

/// Requested profile changes; empty strings leave a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub uid_to_update: String,
    pub username: String,
    pub description: String,
    pub profile_picture_url: Option<String>,
}
