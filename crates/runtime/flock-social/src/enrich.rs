//! Author lookups for denormalizing posts and comments

use crate::retry::timed;
use flock_core::{Comment, Error, Post, Result, User};
use flock_store::{CollectionName, DocumentStore};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fetches authors fresh on every call; nothing is cached between pages.
pub struct AuthorResolver {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl AuthorResolver {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Load one user profile
    pub async fn user(&self, uid: &str) -> Result<User> {
        let doc = timed(self.timeout, self.store.get(CollectionName::Users, uid)).await?;
        let mut user: User = doc.decode().map_err(Error::from)?;
        if user.uid.is_empty() {
            user.uid = doc.id;
        }
        Ok(user)
    }

    /// Look up every distinct uid in parallel.
    ///
    /// Missing users map to `None`; any other failure fails the whole lookup.
    pub async fn resolve<'a, I>(&self, uids: I) -> Result<HashMap<String, Option<User>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut unique: Vec<&str> = Vec::new();
        for uid in uids {
            if !unique.contains(&uid) {
                unique.push(uid);
            }
        }

        let lookups = unique.iter().map(|uid| async move {
            match self.user(uid).await {
                Ok(user) => Ok((uid.to_string(), Some(user))),
                Err(Error::NotFound(_)) => Ok((uid.to_string(), None)),
                Err(e) => Err(e),
            }
        });

        join_all(lookups).await.into_iter().collect()
    }

    /// Copy author fields onto each post and compute `is_liked` for `caller`.
    ///
    /// Posts whose author no longer exists are dropped; their ids come back
    /// as the second element, in page order.
    pub async fn enrich_posts(&self, posts: Vec<Post>, caller: &str) -> Result<(Vec<Post>, Vec<String>)> {
        let authors = self.resolve(posts.iter().map(|p| p.author_uid.as_str())).await?;

        let mut enriched = Vec::with_capacity(posts.len());
        let mut orphaned = Vec::new();
        for mut post in posts {
            match authors.get(&post.author_uid) {
                Some(Some(author)) => {
                    post.enrich(author, caller);
                    enriched.push(post);
                }
                _ => {
                    let err = Error::OrphanedAuthor {
                        entity_id: post.id.clone(),
                        author_uid: post.author_uid.clone(),
                    };
                    tracing::warn!("Dropping post from page: {}", err);
                    orphaned.push(post.id);
                }
            }
        }
        Ok((enriched, orphaned))
    }

    /// Copy author fields onto each comment, dropping orphans
    pub async fn enrich_comments(&self, comments: Vec<Comment>) -> Result<Vec<Comment>> {
        let authors = self.resolve(comments.iter().map(|c| c.uid.as_str())).await?;

        Ok(comments
            .into_iter()
            .filter_map(|mut comment| match authors.get(&comment.uid) {
                Some(Some(author)) => {
                    comment.enrich(author);
                    Some(comment)
                }
                _ => {
                    tracing::warn!(
                        "Dropping comment {} by missing user {}",
                        comment.comment_id,
                        comment.uid
                    );
                    None
                }
            })
            .collect())
    }
}
