//! # Flock Social
//!
//! The social core on top of a [`DocumentStore`]:
//!
//! - [`ToggleSetMembership`]: atomically add-or-remove an id in a
//!   membership set (likes on a post, follows on the caller's profile)
//! - [`DenormalizedFeedPaginator`]: cursor-paged, newest-first feeds with
//!   author fields copied onto every post at read time
//! - [`SocialRepository`]: users, posts and comments for the presentation
//!   layer, and [`PostFeed`] with its home/profile variants
//!
//! ```text
//!   PostFeed (HomeFeed / ProfileFeed)
//!        │
//!   SocialRepository ──► ToggleSetMembership ──► run_transaction
//!        │
//!        └──────────────► DenormalizedFeedPaginator ──► AuthorResolver
//!                                    │
//!                              DocumentStore
//! ```

pub mod enrich;
pub mod feed;
pub mod paginator;
pub mod repository;
pub mod retry;
pub mod toggle;

pub use enrich::AuthorResolver;
pub use feed::{HomeFeed, PostFeed, ProfileFeed};
pub use paginator::{DenormalizedFeedPaginator, FeedFilter, FeedSession, Page, PageCursor};
pub use repository::SocialRepository;
pub use retry::with_retry;
pub use toggle::{MembershipResult, MembershipSet, ToggleSetMembership};

use flock_config::Config;
use flock_store::RetryPolicy;
use std::time::Duration;

/// Tuning shared by every social component
#[derive(Debug, Clone, PartialEq)]
pub struct SocialSettings {
    /// Posts per page for sessions opened by feeds
    pub page_size: usize,
    /// Max author ids per "any of" sub-query
    pub chunk_size: usize,
    /// Bound on every store call (a whole transaction counts as one call)
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SocialSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SocialSettings {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.feed.page_size,
            chunk_size: config.feed.chunk_size,
            call_timeout: config.store.call_timeout(),
            retry: RetryPolicy::new(
                config.store.transaction_max_attempts,
                config.store.retry_backoff(),
            ),
        }
    }
}
