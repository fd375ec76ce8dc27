//! Cursor-paged, newest-first post feeds
//!
//! Posts are ordered by `(date, id)` descending. A page is fetched by
//! running one ordered query per chunk of author ids, all starting after
//! the same key, then merging the chunk results and keeping the first
//! `page_size`. Every chunk returns its own best `page_size` candidates,
//! so the merged prefix is exactly the next `page_size` posts overall.
//!
//! ```text
//!   filter ──► author ids ──► chunk 1 ─┐
//!                             chunk 2 ─┼─► merge by SortKey ─► truncate ─► enrich ─► Page
//!                             chunk n ─┘
//! ```

use crate::enrich::AuthorResolver;
use crate::retry::timed;
use crate::SocialSettings;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flock_core::{CallerIdentity, Error, Post, Result};
use flock_store::{CollectionName, Document, DocumentStore, FieldFilter, OrderedQuery, SortKey};
use futures::future::try_join_all;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const AUTHOR_FIELD: &str = "authorUid";

/// Which posts a feed shows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedFilter {
    /// Posts by one author (a profile feed)
    Author(String),
    /// Posts by any of these authors
    Authors(Vec<String>),
    /// Posts by anyone this user follows, resolved when a page is fetched
    FollowsOf(String),
}

impl FeedFilter {
    /// Short stable digest used to tie a cursor to the filter it came from
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedFilter::Author(uid) => write!(f, "author:{}", uid),
            FeedFilter::Authors(uids) => write!(f, "authors:{}", uids.len()),
            FeedFilter::FollowsOf(uid) => write!(f, "follows-of:{}", uid),
        }
    }
}

/// Position after the last post of a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    fingerprint: String,
    last: SortKey,
}

impl PageCursor {
    fn new(filter: &FeedFilter, last: SortKey) -> Self {
        Self {
            fingerprint: filter.fingerprint(),
            last,
        }
    }

    /// Opaque token for handing the cursor to a client
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| Error::InvalidInput(format!("malformed cursor: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidInput(format!("malformed cursor: {}", e)))
    }

    pub fn last(&self) -> &SortKey {
        &self.last
    }
}

/// One page of enriched posts.
///
/// Not serializable: the author fields on [`Post`] are derived per fetch
/// and skipped by its serde impl, so callers render pages through their
/// own view types.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,

    /// Where the next page starts; `None` once the feed is exhausted
    pub next: Option<PageCursor>,

    /// Posts dropped because their author no longer exists
    pub orphaned: Vec<String>,
}

impl Page {
    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }
}

/// Newest-first post pages with author fields copied in at read time
pub struct DenormalizedFeedPaginator {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn CallerIdentity>,
    authors: Arc<AuthorResolver>,
    settings: SocialSettings,
}

impl DenormalizedFeedPaginator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn CallerIdentity>,
        settings: SocialSettings,
    ) -> Self {
        let authors = Arc::new(AuthorResolver::new(Arc::clone(&store), settings.call_timeout));
        Self {
            store,
            identity,
            authors,
            settings,
        }
    }

    pub async fn first_page(&self, filter: &FeedFilter, page_size: usize) -> Result<Page> {
        self.next_page(None, filter, page_size).await
    }

    /// Fetch the page after `cursor`; no cursor means the first page.
    ///
    /// # Panics
    ///
    /// If `cursor` was issued for a different filter.
    pub async fn next_page(
        &self,
        cursor: Option<&PageCursor>,
        filter: &FeedFilter,
        page_size: usize,
    ) -> Result<Page> {
        if let Some(cursor) = cursor {
            assert_eq!(
                cursor.fingerprint,
                filter.fingerprint(),
                "cursor was issued for a different feed filter than {}",
                filter
            );
        }
        let resolved = self.resolve_filter(filter).await?;
        self.fetch_page(filter, &resolved, cursor.map(PageCursor::last), page_size)
            .await
    }

    /// Start a forward-only session; a follow list is resolved once, on
    /// the session's first page, and reused for every later page
    pub fn session(self: &Arc<Self>, filter: FeedFilter, page_size: usize) -> FeedSession {
        FeedSession {
            paginator: Arc::clone(self),
            filter,
            resolved: None,
            page_size,
            cursor: None,
            done: false,
        }
    }

    /// Turn a filter into the concrete author ids to query
    async fn resolve_filter(&self, filter: &FeedFilter) -> Result<Vec<String>> {
        let uids = match filter {
            FeedFilter::Author(uid) => vec![uid.clone()],
            FeedFilter::Authors(uids) => uids.clone(),
            FeedFilter::FollowsOf(uid) => {
                let follows = self.authors.user(uid).await?.follows;
                tracing::debug!("Resolved {} follows for {}", follows.len(), uid);
                follows
            }
        };

        let mut unique: Vec<String> = Vec::with_capacity(uids.len());
        for uid in uids {
            if !unique.contains(&uid) {
                unique.push(uid);
            }
        }
        Ok(unique)
    }

    async fn fetch_page(
        &self,
        filter: &FeedFilter,
        authors: &[String],
        after: Option<&SortKey>,
        page_size: usize,
    ) -> Result<Page> {
        let caller = self.identity.require_uid()?;
        if page_size == 0 {
            return Err(Error::InvalidInput("page size must be positive".into()));
        }
        if authors.is_empty() {
            // An empty "any of" clause is rejected by real stores
            tracing::debug!("Feed {} has no authors; returning an empty page", filter);
            return Ok(Page::default());
        }

        let chunk_size = self.settings.chunk_size.max(1);
        let queries = authors.chunks(chunk_size).map(|chunk| {
            let query = OrderedQuery::new(
                CollectionName::Posts,
                FieldFilter::any_of(AUTHOR_FIELD, chunk.iter().map(String::as_str)),
                page_size,
            );
            async move {
                timed(self.settings.call_timeout, self.store.query_ordered(&query, after)).await
            }
        });
        let chunk_pages = try_join_all(queries).await?;

        let mut raw: Vec<Document> = chunk_pages.into_iter().flat_map(|page| page.items).collect();
        raw.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        raw.dedup_by(|a, b| a.id == b.id);
        raw.truncate(page_size);

        let last = match raw.last() {
            Some(doc) => doc.sort_key(),
            None => {
                tracing::debug!("Feed {} exhausted", filter);
                return Ok(Page::default());
            }
        };

        let posts = raw.iter().map(decode_post).collect::<Result<Vec<_>>>()?;
        let (posts, orphaned) = self.authors.enrich_posts(posts, &caller).await?;
        tracing::debug!(
            "Feed {} page: {} posts, {} orphaned",
            filter,
            posts.len(),
            orphaned.len()
        );

        Ok(Page {
            posts,
            next: Some(PageCursor::new(filter, last)),
            orphaned,
        })
    }
}

pub(crate) fn decode_post(doc: &Document) -> Result<Post> {
    let mut post: Post = doc.decode()?;
    if post.id.is_empty() {
        post.id = doc.id.clone();
    }
    Ok(post)
}

/// A forward-only walk over one feed.
///
/// The session owns its cursor; once it reports exhaustion it stays
/// exhausted. Start over with a new session.
pub struct FeedSession {
    paginator: Arc<DenormalizedFeedPaginator>,
    filter: FeedFilter,
    resolved: Option<Vec<String>>,
    page_size: usize,
    cursor: Option<PageCursor>,
    done: bool,
}

impl FeedSession {
    pub fn filter(&self) -> &FeedFilter {
        &self.filter
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next page, or `None` once the feed is exhausted.
    ///
    /// A failed fetch leaves the cursor where it was, so calling again
    /// retries the same page.
    pub async fn next_page(&mut self) -> Option<Result<Page>> {
        if self.done {
            return None;
        }

        let authors = match &self.resolved {
            Some(authors) => authors.clone(),
            None => match self.paginator.resolve_filter(&self.filter).await {
                Ok(authors) => {
                    self.resolved = Some(authors.clone());
                    authors
                }
                Err(e) => return Some(Err(e)),
            },
        };

        let after = self.cursor.as_ref().map(PageCursor::last);
        match self
            .paginator
            .fetch_page(&self.filter, &authors, after, self.page_size)
            .await
        {
            Ok(page) => {
                self.cursor = page.next.clone();
                if page.is_exhausted() {
                    self.done = true;
                    return None;
                }
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Pages as a stream; dropping it abandons any in-flight fetch
    pub fn into_stream(self) -> impl Stream<Item = Result<Page>> {
        stream::unfold(self, |mut session| async move {
            let page = session.next_page().await?;
            Some((page, session))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_post, add_user, memory, set_follows};
    use flock_core::StaticIdentity;
    use flock_store::MemoryStore;
    use futures::{StreamExt, TryStreamExt};
    use std::time::Duration;

    fn paginator(store: Arc<dyn DocumentStore>, caller: &str) -> Arc<DenormalizedFeedPaginator> {
        Arc::new(DenormalizedFeedPaginator::new(
            store,
            Arc::new(StaticIdentity::signed_in(caller)),
            SocialSettings::default(),
        ))
    }

    fn ids(page: &Page) -> Vec<&str> {
        page.posts.iter().map(|p| p.id.as_str()).collect()
    }

    async fn collect_all(
        feed: &DenormalizedFeedPaginator,
        filter: &FeedFilter,
        page_size: usize,
    ) -> Vec<Post> {
        let mut all = Vec::new();
        let mut page = feed.first_page(filter, page_size).await.unwrap();
        while let Some(cursor) = page.next.clone() {
            all.extend(page.posts);
            page = feed.next_page(Some(&cursor), filter, page_size).await.unwrap();
        }
        assert!(page.posts.is_empty());
        all
    }

    #[tokio::test]
    async fn test_single_author_page() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        add_user(&store, "a2", "bob").await;
        add_post(&store, "P1", "a1", 100).await;
        add_post(&store, "P2", "a2", 200).await;
        add_post(&store, "P3", "a1", 150).await;

        let feed = paginator(store, "me");
        let page = feed.first_page(&FeedFilter::Author("a1".into()), 10).await.unwrap();
        assert_eq!(ids(&page), vec!["P3", "P1"]);
    }

    #[tokio::test]
    async fn test_pagination_is_complete_and_ordered() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        for i in 0..23 {
            add_post(&store, &format!("p{:02}", i), "a1", 1000 + i * 10).await;
        }

        let feed = paginator(store, "me");
        let all = collect_all(&feed, &FeedFilter::Author("a1".into()), 5).await;
        assert_eq!(all.len(), 23);
        for pair in all.windows(2) {
            assert!(pair[0].date > pair[1].date);
        }
    }

    #[tokio::test]
    async fn test_cursor_survives_deleting_its_post() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        for i in 0..6 {
            add_post(&store, &format!("p{}", i), "a1", 100 + i).await;
        }

        let feed = paginator(Arc::clone(&store), "me");
        let filter = FeedFilter::Author("a1".into());
        let page = feed.first_page(&filter, 2).await.unwrap();
        assert_eq!(ids(&page), vec!["p5", "p4"]);

        store.delete(CollectionName::Posts, "p4").await.unwrap();
        let page = feed.next_page(page.next.as_ref(), &filter, 2).await.unwrap();
        assert_eq!(ids(&page), vec!["p3", "p2"]);
    }

    #[tokio::test]
    async fn test_chunked_feed_is_complete_across_pages() {
        let store = memory();
        add_user(&store, "me", "me").await;
        let follows: Vec<String> = (0..25).map(|i| format!("u{:02}", i)).collect();
        for (i, uid) in follows.iter().enumerate() {
            add_user(&store, uid, uid).await;
            for j in 0..3 {
                // Interleave dates so every page mixes chunks
                let date = (j * 25 + i) as i64;
                add_post(&store, &format!("{}-{}", uid, j), uid, date).await;
            }
        }
        let follow_refs: Vec<&str> = follows.iter().map(String::as_str).collect();
        set_follows(&store, "me", &follow_refs).await;

        let feed = paginator(store, "me");
        let all = collect_all(&feed, &FeedFilter::FollowsOf("me".into()), 4).await;
        assert_eq!(all.len(), 75);

        let keys: Vec<SortKey> = all.iter().map(|p| SortKey::new(p.date, p.id.clone())).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] > pair[1], "{:?} not before {:?}", pair[0], pair[1]);
        }
        let mut unique: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 75);
    }

    #[tokio::test]
    async fn test_ties_break_on_id_descending() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        for id in ["pa", "pc", "pb", "pe", "pd"] {
            add_post(&store, id, "a1", 500).await;
        }

        let feed = paginator(store, "me");
        let filter = FeedFilter::Author("a1".into());
        let first: Vec<_> = collect_all(&feed, &filter, 2).await.into_iter().map(|p| p.id).collect();
        let second: Vec<_> = collect_all(&feed, &filter, 3).await.into_iter().map(|p| p.id).collect();
        assert_eq!(first, vec!["pe", "pd", "pc", "pb", "pa"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_enrichment_is_fresh_per_fetch() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        add_post(&store, "p1", "a1", 100).await;

        let feed = paginator(Arc::clone(&store), "me");
        let filter = FeedFilter::Author("a1".into());
        let page = feed.first_page(&filter, 10).await.unwrap();
        assert_eq!(page.posts[0].author_username, "alice");

        add_user(&store, "a1", "alice2").await;
        let page = feed.first_page(&filter, 10).await.unwrap();
        assert_eq!(page.posts[0].author_username, "alice2");
    }

    #[tokio::test]
    async fn test_chunked_follows_merge_globally() {
        let store = memory();
        add_user(&store, "me", "me").await;
        let follows: Vec<String> = (0..25).map(|i| format!("u{:02}", i)).collect();
        for uid in &follows {
            add_user(&store, uid, uid).await;
        }
        let follow_refs: Vec<&str> = follows.iter().map(String::as_str).collect();
        set_follows(&store, "me", &follow_refs).await;

        // One post in each of the three chunks of ten
        add_post(&store, "t1", "u02", 1).await;
        add_post(&store, "t5", "u24", 5).await;
        add_post(&store, "t3", "u15", 3).await;

        let feed = paginator(store, "me");
        let page = feed.first_page(&FeedFilter::FollowsOf("me".into()), 10).await.unwrap();
        assert_eq!(ids(&page), vec!["t5", "t3", "t1"]);

        let page = feed.first_page(&FeedFilter::FollowsOf("me".into()), 2).await.unwrap();
        assert_eq!(ids(&page), vec!["t5", "t3"]);
    }

    #[tokio::test]
    async fn test_orphaned_post_is_dropped() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        add_post(&store, "p1", "a1", 100).await;
        add_post(&store, "p2", "ghost", 200).await;

        let feed = paginator(store, "me");
        let filter = FeedFilter::Authors(vec!["a1".into(), "ghost".into()]);
        let page = feed.first_page(&filter, 10).await.unwrap();
        assert_eq!(ids(&page), vec!["p1"]);
        assert_eq!(page.orphaned, vec!["p2"]);
        assert!(!page.is_exhausted());
    }

    #[tokio::test]
    async fn test_empty_follow_list_is_empty_page() {
        let store = memory();
        add_user(&store, "me", "me").await;

        let feed = paginator(store, "me");
        let page = feed.first_page(&FeedFilter::FollowsOf("me".into()), 10).await.unwrap();
        assert!(page.posts.is_empty());
        assert!(page.is_exhausted());

        let page = feed.first_page(&FeedFilter::Authors(vec![]), 10).await.unwrap();
        assert!(page.is_exhausted());
    }

    #[tokio::test]
    #[should_panic(expected = "different feed filter")]
    async fn test_foreign_cursor_panics() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        add_post(&store, "p1", "a1", 100).await;

        let feed = paginator(store, "me");
        let page = feed.first_page(&FeedFilter::Author("a1".into()), 1).await.unwrap();
        let cursor = page.next.unwrap();
        let _ = feed
            .next_page(Some(&cursor), &FeedFilter::Author("a2".into()), 1)
            .await;
    }

    #[tokio::test]
    async fn test_session_keeps_follow_list() {
        let store = memory();
        add_user(&store, "me", "me").await;
        add_user(&store, "a1", "alice").await;
        add_user(&store, "a2", "bob").await;
        set_follows(&store, "me", &["a1"]).await;
        add_post(&store, "p1", "a1", 100).await;
        add_post(&store, "p2", "a1", 90).await;
        add_post(&store, "q1", "a2", 95).await;

        let feed = paginator(Arc::clone(&store), "me");
        let mut session = feed.session(FeedFilter::FollowsOf("me".into()), 1);
        let first = session.next_page().await.unwrap().unwrap();
        assert_eq!(ids(&first), vec!["p1"]);

        // Following a2 mid-session does not change this session
        set_follows(&store, "me", &["a1", "a2"]).await;
        let second = session.next_page().await.unwrap().unwrap();
        assert_eq!(ids(&second), vec!["p2"]);
        assert!(session.next_page().await.is_none());
        assert!(session.is_done());
        assert!(session.next_page().await.is_none());

        // A fresh session sees the new follow
        let fresh = feed.session(FeedFilter::FollowsOf("me".into()), 10);
        let pages: Vec<Page> = fresh.into_stream().try_collect().await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(ids(&pages[0]), vec!["p1", "q1", "p2"]);
    }

    #[tokio::test]
    async fn test_stream_yields_every_post() {
        let store = memory();
        add_user(&store, "a1", "alice").await;
        for i in 0..7 {
            add_post(&store, &format!("p{}", i), "a1", i).await;
        }

        let feed = paginator(store, "me");
        let pages: Vec<Page> = feed
            .session(FeedFilter::Author("a1".into()), 3)
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<_> = pages.iter().map(|p| p.posts.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_anonymous_caller_rejected() {
        let store = memory();
        let feed = DenormalizedFeedPaginator::new(
            store,
            Arc::new(StaticIdentity::anonymous()),
            SocialSettings::default(),
        );
        let err = feed
            .first_page(&FeedFilter::Author("a1".into()), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(MemoryStore::with_latency(Duration::from_millis(200)));
        let settings = SocialSettings {
            call_timeout: Duration::from_millis(10),
            ..SocialSettings::default()
        };
        let feed = DenormalizedFeedPaginator::new(
            store,
            Arc::new(StaticIdentity::signed_in("me")),
            settings,
        );

        let err = feed
            .first_page(&FeedFilter::Author("a1".into()), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_dropping_stream_abandons_fetch() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(MemoryStore::with_latency(Duration::from_millis(100)));
        add_user(&store, "a1", "alice").await;
        add_post(&store, "p1", "a1", 100).await;

        let feed = paginator(store, "me");
        let filter = FeedFilter::Author("a1".into());
        let mut pages = Box::pin(feed.session(filter.clone(), 10).into_stream());
        let polled = tokio::time::timeout(Duration::from_millis(20), pages.next()).await;
        assert!(polled.is_err());
        assert_eq!(Arc::strong_count(&feed), 2);

        // Dropping mid-fetch releases the session and leaves the store usable
        drop(pages);
        assert_eq!(Arc::strong_count(&feed), 1);
        let page = feed.first_page(&filter, 10).await.unwrap();
        assert_eq!(ids(&page), vec!["p1"]);
    }

    #[test]
    fn test_cursor_token() {
        let filter = FeedFilter::Author("a1".into());
        let cursor = PageCursor::new(&filter, SortKey::new(42, "p9"));
        let decoded = PageCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert_eq!(decoded.last(), &SortKey::new(42, "p9"));

        assert!(matches!(PageCursor::decode("!!"), Err(Error::InvalidInput(_))));
        assert_ne!(filter.fingerprint(), FeedFilter::Author("a2".into()).fingerprint());
    }
}
