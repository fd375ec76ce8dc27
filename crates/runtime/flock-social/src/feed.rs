//! Feed screens as a capability set
//!
//! Every feed can load posts, toggle a like and delete a post. Variants
//! differ only in which posts they show; the repository is injected.

use crate::paginator::{FeedFilter, FeedSession};
use crate::repository::SocialRepository;
use crate::retry::with_retry;
use async_trait::async_trait;
use flock_core::{Post, Result};
use std::sync::Arc;

#[async_trait]
pub trait PostFeed: Send + Sync {
    /// Filter for the current caller
    fn filter(&self) -> Result<FeedFilter>;

    fn repository(&self) -> &Arc<SocialRepository>;

    /// Open a fresh session at the newest post
    async fn posts(&self) -> Result<FeedSession> {
        let filter = self.filter()?;
        let repo = self.repository();
        Ok(repo.paginator().session(filter, repo.settings().page_size))
    }

    /// Toggle the caller's like and update the cached post in place.
    ///
    /// A timed-out toggle may still have committed, so the retry sets the
    /// state the cached post was toggled towards instead of toggling again.
    async fn toggle_like(&self, post: &mut Post) -> Result<bool> {
        let caller = self.repository().caller_uid()?;
        let post_id = post.id.clone();
        let target = !post.is_liked;
        let mut first = true;
        let result = with_retry(|| {
            let toggle = std::mem::replace(&mut first, false);
            let repo = self.repository();
            let post_id = post_id.as_str();
            async move {
                if toggle {
                    repo.toggle_like(post_id).await
                } else {
                    repo.set_like(post_id, target).await
                }
            }
        })
        .await?;
        result.apply_to(&mut post.liked_by, &caller);
        post.is_liked = result.added;
        Ok(result.added)
    }

    async fn delete_post(&self, post: &Post) -> Result<Post> {
        self.repository().delete_post(&post.id).await
    }
}

/// Posts by everyone the caller follows
pub struct HomeFeed {
    repo: Arc<SocialRepository>,
}

impl HomeFeed {
    pub fn new(repo: Arc<SocialRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PostFeed for HomeFeed {
    fn filter(&self) -> Result<FeedFilter> {
        Ok(FeedFilter::FollowsOf(self.repo.caller_uid()?))
    }

    fn repository(&self) -> &Arc<SocialRepository> {
        &self.repo
    }
}

/// Posts by a single user
pub struct ProfileFeed {
    repo: Arc<SocialRepository>,
    uid: String,
}

impl ProfileFeed {
    pub fn new(repo: Arc<SocialRepository>, uid: impl Into<String>) -> Self {
        Self {
            repo,
            uid: uid.into(),
        }
    }
}

#[async_trait]
impl PostFeed for ProfileFeed {
    fn filter(&self) -> Result<FeedFilter> {
        Ok(FeedFilter::Author(self.uid.clone()))
    }

    fn repository(&self) -> &Arc<SocialRepository> {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_post, add_user, memory, set_follows};
    use crate::SocialSettings;
    use flock_core::{Error, Event, Resource, StaticIdentity};
    use flock_store::{
        CollectionName, Document, DocumentStore, FieldFilter, OrderedQuery, QueryPage,
        Result as StoreResult, SortKey, TransactionRecord,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn repo_as(store: &Arc<dyn DocumentStore>, caller: &str) -> Arc<SocialRepository> {
        Arc::new(SocialRepository::new(
            Arc::clone(store),
            Arc::new(StaticIdentity::signed_in(caller)),
            SocialSettings::default(),
        ))
    }

    async fn seeded() -> Arc<dyn DocumentStore> {
        let store = memory();
        add_user(&store, "me", "me").await;
        add_user(&store, "a1", "alice").await;
        add_user(&store, "a2", "bob").await;
        set_follows(&store, "me", &["a1"]).await;
        add_post(&store, "p1", "a1", 100).await;
        add_post(&store, "p2", "a2", 200).await;
        add_post(&store, "p3", "me", 300).await;
        store
    }

    async fn first_ids(feed: &dyn PostFeed) -> Vec<String> {
        let mut session = feed.posts().await.unwrap();
        match session.next_page().await {
            Some(page) => page.unwrap().posts.into_iter().map(|p| p.id).collect(),
            None => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_variants_select_posts() {
        let store = seeded().await;
        let repo = repo_as(&store, "me");

        let home = HomeFeed::new(Arc::clone(&repo));
        assert_eq!(first_ids(&home).await, vec!["p1"]);

        let profile = ProfileFeed::new(Arc::clone(&repo), "a2");
        assert_eq!(first_ids(&profile).await, vec!["p2"]);
    }

    #[tokio::test]
    async fn test_toggle_like_updates_cached_post() {
        let store = seeded().await;
        let feed = HomeFeed::new(repo_as(&store, "me"));

        let mut session = feed.posts().await.unwrap();
        let mut post = session.next_page().await.unwrap().unwrap().posts.remove(0);
        assert!(!post.is_liked);

        assert!(feed.toggle_like(&mut post).await.unwrap());
        assert!(post.is_liked);
        assert_eq!(post.liked_by, vec!["me"]);

        assert!(!feed.toggle_like(&mut post).await.unwrap());
        assert!(!post.is_liked);
        assert!(post.liked_by.is_empty());
    }

    /// Commits go through, but the first one reports back late
    struct LateAckStore {
        inner: Arc<dyn DocumentStore>,
        delay: Duration,
        delayed: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for LateAckStore {
        async fn get(&self, collection: CollectionName, id: &str) -> StoreResult<Document> {
            self.inner.get(collection, id).await
        }

        async fn query_ordered(
            &self,
            query: &OrderedQuery,
            after: Option<&SortKey>,
        ) -> StoreResult<QueryPage> {
            self.inner.query_ordered(query, after).await
        }

        async fn query_by(
            &self,
            collection: CollectionName,
            filter: &FieldFilter,
            order_by: &str,
        ) -> StoreResult<Vec<Document>> {
            self.inner.query_by(collection, filter, order_by).await
        }

        async fn insert(&self, collection: CollectionName, document: Document) -> StoreResult<()> {
            self.inner.insert(collection, document).await
        }

        async fn delete(&self, collection: CollectionName, id: &str) -> StoreResult<()> {
            self.inner.delete(collection, id).await
        }

        async fn commit(&self, record: TransactionRecord) -> StoreResult<()> {
            self.inner.commit(record).await?;
            if !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(self.delay).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timed_out_like_is_not_reversed_on_retry() {
        let inner = seeded().await;
        let store: Arc<dyn DocumentStore> = Arc::new(LateAckStore {
            inner: Arc::clone(&inner),
            delay: Duration::from_millis(300),
            delayed: AtomicBool::new(false),
        });
        let settings = SocialSettings {
            call_timeout: Duration::from_millis(50),
            ..SocialSettings::default()
        };
        let feed = HomeFeed::new(Arc::new(SocialRepository::new(
            store,
            Arc::new(StaticIdentity::signed_in("me")),
            settings,
        )));

        let mut session = feed.posts().await.unwrap();
        let mut post = session.next_page().await.unwrap().unwrap().posts.remove(0);
        assert!(!post.is_liked);

        // The toggle commits, times out, and the retry keeps the like
        assert!(feed.toggle_like(&mut post).await.unwrap());
        assert!(post.is_liked);
        assert_eq!(post.liked_by, vec!["me"]);

        let doc = inner.get(CollectionName::Posts, &post.id).await.unwrap();
        assert_eq!(doc.string_set("likedBy"), vec!["me"]);
    }

    #[tokio::test]
    async fn test_delete_result_as_event() {
        let store = seeded().await;
        let feed = ProfileFeed::new(repo_as(&store, "me"), "me");

        let mut session = feed.posts().await.unwrap();
        let post = session.next_page().await.unwrap().unwrap().posts.remove(0);

        let event = Event::from_result(feed.delete_post(&post).await);
        assert_eq!(event.take().and_then(|r| r.data()).map(|p| p.id.as_str()), Some("p3"));
        assert!(event.take().is_none());

        let event = Event::from_result(feed.delete_post(&post).await);
        match event.peek() {
            Resource::Failure { kind, .. } => assert_eq!(*kind, flock_core::ErrorKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_home_feed_needs_caller() {
        let store = seeded().await;
        let repo = Arc::new(SocialRepository::new(
            store,
            Arc::new(StaticIdentity::anonymous()),
            SocialSettings::default(),
        ));
        let feed = HomeFeed::new(repo);
        assert!(matches!(feed.posts().await, Err(Error::Unauthenticated)));
    }
}
