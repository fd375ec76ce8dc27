//! Atomic add-or-remove on a membership set
//!
//! Likes live in `posts.likedBy`; follows live in `users.follows` on the
//! *follower's* document, so a follow locks the actor and never the target.

use crate::retry::timed;
use crate::SocialSettings;
use flock_core::Result;
use flock_store::{run_transaction, CollectionName, DocumentStore, RetryPolicy, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Where a membership set is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipSet {
    pub collection: CollectionName,
    pub field: &'static str,
}

impl MembershipSet {
    /// Users that liked a post
    pub const LIKED_BY: MembershipSet = MembershipSet {
        collection: CollectionName::Posts,
        field: "likedBy",
    };

    /// Users a user follows
    pub const FOLLOWS: MembershipSet = MembershipSet {
        collection: CollectionName::Users,
        field: "follows",
    };
}

impl std::fmt::Display for MembershipSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.collection, self.field)
    }
}

/// State of the member after a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipResult {
    /// True if the member is now in the set
    pub added: bool,
}

impl MembershipResult {
    /// Mirror the toggle into a cached copy of the set
    pub fn apply_to(&self, members: &mut Vec<String>, member_id: &str) {
        members.retain(|m| m != member_id);
        if self.added {
            members.push(member_id.to_string());
        }
    }
}

/// Transactional toggle over any [`MembershipSet`]
pub struct ToggleSetMembership {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ToggleSetMembership {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &SocialSettings) -> Self {
        Self {
            store,
            policy: settings.retry.clone(),
            timeout: settings.call_timeout,
        }
    }

    /// Add `member_id` to the set on `entity_id`, or remove it if present.
    ///
    /// Read, check and write run as one optimistic transaction that is
    /// re-run on conflict; the set field is the only thing written.
    pub async fn toggle(
        &self,
        set: MembershipSet,
        entity_id: &str,
        member_id: &str,
    ) -> Result<MembershipResult> {
        self.change(set, entity_id, member_id, None).await
    }

    /// Make `member_id` present in (or absent from) the set.
    ///
    /// Unlike [`toggle`](Self::toggle) this is idempotent, so it is the
    /// call to repeat when a toggle's outcome is unknown.
    pub async fn set_membership(
        &self,
        set: MembershipSet,
        entity_id: &str,
        member_id: &str,
        present: bool,
    ) -> Result<MembershipResult> {
        self.change(set, entity_id, member_id, Some(present)).await
    }

    async fn change(
        &self,
        set: MembershipSet,
        entity_id: &str,
        member_id: &str,
        target: Option<bool>,
    ) -> Result<MembershipResult> {
        let transaction = run_transaction(&self.store, &self.policy, move |mut txn| async move {
            let doc = txn.get(set.collection, entity_id).await?;
            let mut members = doc.string_set(set.field);

            let present = members.iter().any(|m| m == member_id);
            let added = target.unwrap_or(!present);
            if added != present {
                if added {
                    members.push(member_id.to_string());
                } else {
                    members.retain(|m| m != member_id);
                }
                txn.update(set.collection, entity_id, set.field, json!(members));
            }
            Ok::<_, StoreError>((txn, MembershipResult { added }))
        });

        let result = timed(self.timeout, transaction).await?;
        tracing::debug!(
            "Set {} on {}/{}: {}",
            member_id,
            set,
            entity_id,
            if result.added { "added" } else { "removed" }
        );
        Ok(result)
    }
}
