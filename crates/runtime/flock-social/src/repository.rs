//! Users, posts and comments as the presentation layer sees them
//!
//! Every public operation returns a typed [`Result`]; store failures are
//! converted at this boundary and never escape as panics.

use crate::enrich::AuthorResolver;
use crate::paginator::{decode_post, DenormalizedFeedPaginator};
use crate::retry::timed;
use crate::toggle::{MembershipResult, MembershipSet, ToggleSetMembership};
use crate::SocialSettings;
use flock_core::{CallerIdentity, Comment, Error, Post, ProfileUpdate, Result, User};
use flock_store::{
    run_transaction, CollectionName, Document, DocumentStore, FieldFilter, OrderedQuery, SortKey,
    StoreError,
};
use futures::future::try_join_all;
use serde_json::json;
use std::sync::Arc;

/// Social operations on behalf of the current caller
pub struct SocialRepository {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn CallerIdentity>,
    settings: SocialSettings,
    toggles: ToggleSetMembership,
    authors: AuthorResolver,
    paginator: Arc<DenormalizedFeedPaginator>,
}

impl SocialRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn CallerIdentity>,
        settings: SocialSettings,
    ) -> Self {
        let toggles = ToggleSetMembership::new(Arc::clone(&store), &settings);
        let authors = AuthorResolver::new(Arc::clone(&store), settings.call_timeout);
        let paginator = Arc::new(DenormalizedFeedPaginator::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            settings.clone(),
        ));
        Self {
            store,
            identity,
            settings,
            toggles,
            authors,
            paginator,
        }
    }

    pub fn caller_uid(&self) -> Result<String> {
        self.identity.require_uid()
    }

    pub fn paginator(&self) -> &Arc<DenormalizedFeedPaginator> {
        &self.paginator
    }

    pub fn settings(&self) -> &SocialSettings {
        &self.settings
    }

    // ---- users ----

    /// Register the profile for a freshly signed-up uid
    pub async fn create_user(&self, uid: &str, username: &str) -> Result<User> {
        flock_core::validate_username(username)?;
        match timed(self.settings.call_timeout, self.store.get(CollectionName::Users, uid)).await {
            Ok(_) => return Err(Error::InvalidInput(format!("user {} already exists", uid))),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let user = User::new(uid, username);
        let doc = Document::encode(uid, &user)?;
        timed(self.settings.call_timeout, self.store.insert(CollectionName::Users, doc)).await?;
        tracing::info!("Created user {} ({})", uid, username);
        Ok(user)
    }

    /// A profile with `is_following` computed for the caller
    pub async fn get_user(&self, uid: &str) -> Result<User> {
        let caller = self.caller_uid()?;
        let mut user = self.authors.user(uid).await?;
        if caller != uid {
            let me = self.authors.user(&caller).await?;
            user.is_following = me.follows(uid);
        }
        Ok(user)
    }

    /// Profiles for `uids`, ordered by username
    pub async fn get_users(&self, uids: &[String]) -> Result<Vec<User>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_size = self.settings.chunk_size.max(1);
        let lookups = uids.chunks(chunk_size).map(|chunk| {
            let filter = FieldFilter::any_of("uid", chunk.iter().map(String::as_str));
            async move {
                timed(
                    self.settings.call_timeout,
                    self.store.query_by(CollectionName::Users, &filter, "username"),
                )
                .await
            }
        });

        let mut users = try_join_all(lookups)
            .await?
            .into_iter()
            .flatten()
            .map(|doc| decode_user(&doc))
            .collect::<Result<Vec<_>>>()?;
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    /// Profiles of everyone who liked a post
    pub async fn users_who_liked(&self, post_id: &str) -> Result<Vec<User>> {
        let doc = timed(self.settings.call_timeout, self.store.get(CollectionName::Posts, post_id)).await?;
        self.get_users(&doc.string_set("likedBy")).await
    }

    /// Users whose name starts with `query`, ignoring case
    pub async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let filter = FieldFilter::prefix("username", query);
        let docs = timed(
            self.settings.call_timeout,
            self.store.query_by(CollectionName::Users, &filter, "username"),
        )
        .await?;
        docs.iter().map(decode_user).collect()
    }

    /// Apply profile changes to the caller's own profile
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User> {
        let caller = self.caller_uid()?;
        if update.uid_to_update != caller {
            return Err(Error::InvalidInput("only your own profile can be updated".into()));
        }
        let username = update.username.trim();
        if !username.is_empty() {
            flock_core::validate_username(username)?;
        }
        let description = update.description.trim();

        let mut changes = Vec::new();
        if !username.is_empty() {
            changes.push(("username", json!(username)));
        }
        if !description.is_empty() {
            changes.push(("description", json!(description)));
        }
        if let Some(url) = &update.profile_picture_url {
            changes.push(("profilePictureUrl", json!(url)));
        }

        if !changes.is_empty() {
            let uid = caller.as_str();
            let changes = &changes;
            let transaction = run_transaction(&self.store, &self.settings.retry, move |mut txn| async move {
                txn.get(CollectionName::Users, uid).await?;
                for (field, value) in changes {
                    txn.update(CollectionName::Users, uid, *field, value.clone());
                }
                Ok::<_, StoreError>((txn, ()))
            });
            timed(self.settings.call_timeout, transaction).await?;
            tracing::info!("Updated {} profile fields for {}", changes.len(), uid);
        }
        self.authors.user(&caller).await
    }

    pub async fn toggle_follow(&self, uid: &str) -> Result<MembershipResult> {
        let caller = self.caller_uid()?;
        if caller == uid {
            return Err(Error::InvalidInput("cannot follow yourself".into()));
        }
        self.toggles.toggle(MembershipSet::FOLLOWS, &caller, uid).await
    }

    // ---- posts ----

    /// Publish a post by the caller; the image is already uploaded
    pub async fn create_post(&self, text: &str, image_url: Option<&str>) -> Result<Post> {
        let caller = self.caller_uid()?;
        let author = self.authors.user(&caller).await?;

        let mut post = Post::new(caller.as_str(), text);
        if let Some(url) = image_url {
            post = post.with_image_url(url);
        }
        let doc = Document::encode(post.id.clone(), &post)?;
        timed(self.settings.call_timeout, self.store.insert(CollectionName::Posts, doc)).await?;

        post.enrich(&author, &caller);
        tracing::info!("Created post {} by {}", post.id, caller);
        Ok(post)
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Post> {
        let caller = self.caller_uid()?;
        let doc = timed(self.settings.call_timeout, self.store.get(CollectionName::Posts, post_id)).await?;
        let (mut posts, _) = self.authors.enrich_posts(vec![decode_post(&doc)?], &caller).await?;
        posts.pop().ok_or_else(|| Error::OrphanedAuthor {
            entity_id: doc.id.clone(),
            author_uid: doc
                .field("authorUid")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Delete one of the caller's posts along with its comments
    pub async fn delete_post(&self, post_id: &str) -> Result<Post> {
        let caller = self.caller_uid()?;
        let doc = timed(self.settings.call_timeout, self.store.get(CollectionName::Posts, post_id)).await?;
        let post = decode_post(&doc)?;
        if post.author_uid != caller {
            return Err(Error::InvalidInput("only the author can delete a post".into()));
        }

        timed(self.settings.call_timeout, self.store.delete(CollectionName::Posts, post_id)).await?;
        let comments = timed(
            self.settings.call_timeout,
            self.store
                .query_by(CollectionName::Comments, &FieldFilter::eq("postId", post_id), "date"),
        )
        .await?;
        for comment in &comments {
            timed(
                self.settings.call_timeout,
                self.store.delete(CollectionName::Comments, &comment.id),
            )
            .await?;
        }
        tracing::info!("Deleted post {} and {} comments", post_id, comments.len());
        Ok(post)
    }

    pub async fn toggle_like(&self, post_id: &str) -> Result<MembershipResult> {
        let caller = self.caller_uid()?;
        self.toggles.toggle(MembershipSet::LIKED_BY, post_id, &caller).await
    }

    /// Like or unlike a post outright; repeating it changes nothing
    pub async fn set_like(&self, post_id: &str, liked: bool) -> Result<MembershipResult> {
        let caller = self.caller_uid()?;
        self.toggles
            .set_membership(MembershipSet::LIKED_BY, post_id, &caller, liked)
            .await
    }

    // ---- comments ----

    pub async fn create_comment(&self, post_id: &str, text: &str) -> Result<Comment> {
        let caller = self.caller_uid()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("comment must not be empty".into()));
        }
        timed(self.settings.call_timeout, self.store.get(CollectionName::Posts, post_id)).await?;
        let author = self.authors.user(&caller).await?;

        let mut comment = Comment::new(post_id, caller.as_str(), text);
        let doc = Document::encode(comment.comment_id.clone(), &comment)?;
        timed(self.settings.call_timeout, self.store.insert(CollectionName::Comments, doc)).await?;
        comment.enrich(&author);
        Ok(comment)
    }

    /// Delete one of the caller's comments; deleting twice is harmless
    pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let caller = self.caller_uid()?;
        let doc = match timed(
            self.settings.call_timeout,
            self.store.get(CollectionName::Comments, comment_id),
        )
        .await
        {
            Ok(doc) => doc,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let comment: Comment = doc.decode()?;
        if comment.uid != caller {
            return Err(Error::InvalidInput("only the author can delete a comment".into()));
        }
        timed(self.settings.call_timeout, self.store.delete(CollectionName::Comments, comment_id)).await
    }

    /// All comments on a post, newest first, with author fields filled in
    pub async fn comments_for_post(&self, post_id: &str) -> Result<Vec<Comment>> {
        let query = OrderedQuery::new(
            CollectionName::Comments,
            FieldFilter::eq("postId", post_id),
            self.settings.page_size.max(1),
        );

        let mut comments = Vec::new();
        let mut after: Option<SortKey> = None;
        loop {
            let page = timed(
                self.settings.call_timeout,
                self.store.query_ordered(&query, after.as_ref()),
            )
            .await?;
            if page.is_empty() {
                break;
            }
            for doc in &page.items {
                let mut comment: Comment = doc.decode()?;
                if comment.comment_id.is_empty() {
                    comment.comment_id = doc.id.clone();
                }
                comments.push(comment);
            }
            after = page.next;
        }
        self.authors.enrich_comments(comments).await
    }
}

fn decode_user(doc: &Document) -> Result<User> {
    let mut user: User = doc.decode()?;
    if user.uid.is_empty() {
        user.uid = doc.id.clone();
    }
    Ok(user)
}
