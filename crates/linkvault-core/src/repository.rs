use crate::error::Result;
use crate::shortcode::ShortCode;
use crate::task::DeletionTask;
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::Display;
use std::sync::Arc;

/// Identifies the caller that owns a reference to a short code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(SmolStr);

impl OwnerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A stored mapping from short code to target URL.
///
/// There is at most one record per target URL, shared by every owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub code: ShortCode,
    pub target_url: String,
}

/// One owner's reference to a [`UrlRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub owner: OwnerId,
    pub code: ShortCode,
    pub created_at: Timestamp,
    /// Set when the reference was soft-deleted; cleared on resurrection.
    pub deleted_at: Option<Timestamp>,
}

impl Ownership {
    pub fn live(owner: OwnerId, code: ShortCode) -> Self {
        Self {
            owner,
            code,
            created_at: Timestamp::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// What `create_or_attach` did to satisfy the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateOutcome {
    /// A new record and a new ownership reference were written.
    Created,
    /// The record already existed; a new ownership reference was added to it.
    Attached,
    /// The owner already holds a live reference. Callers treat this as a
    /// conflict but still hand out the canonical short form.
    AlreadyOwned,
    /// The owner's soft-deleted reference was revived.
    Resurrected,
}

impl CreateOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CreateOutcome::AlreadyOwned)
    }
}

/// The canonical short code for a target together with the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub code: ShortCode,
    pub outcome: CreateOutcome,
}

/// Result of resolving a short code.
///
/// A code is [`Resolution::Gone`] only when it has ownership references and
/// every one of them is deleted. One owner deleting their reference does not
/// hide the code from other owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    NotFound,
    Gone,
}

/// Aggregate counters for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of distinct target URLs.
    pub urls: u64,
    /// Number of distinct owners that ever created a link.
    pub owners: u64,
}

/// Durable mapping of short codes to targets and of owners to their codes.
///
/// Mutations on the same target or the same (owner, code) pair must be
/// linearizable; unrelated keys may proceed concurrently.
#[async_trait]
pub trait LinkStore: Send + Sync + 'static {
    /// Resolves a short code. Has no side effects.
    async fn resolve(&self, code: &ShortCode) -> Result<Resolution>;

    /// Stores `target` under `code` if it is not stored yet and makes sure
    /// `owner` holds a live reference to it.
    ///
    /// Racing callers on the same target all end up on one record. Returns
    /// [`StorageError::HashCollision`](crate::StorageError::HashCollision)
    /// when `code` is already bound to a different target.
    async fn create_or_attach(
        &self,
        owner: &OwnerId,
        code: &ShortCode,
        target: &str,
    ) -> Result<Attachment>;

    /// Lists the live references of `owner`, in no particular order.
    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<UrlRecord>>;

    /// Soft-deletes every live `(owner, code)` reference named by `tasks`.
    ///
    /// Missing or already deleted pairs are skipped. Returns the number of
    /// references flipped. Flips applied before a failure are kept.
    async fn bulk_soft_delete(&self, tasks: &[DeletionTask]) -> Result<u64>;

    /// Liveness probe of the backing medium.
    async fn health_check(&self) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[async_trait]
impl<S: LinkStore + ?Sized> LinkStore for Arc<S> {
    async fn resolve(&self, code: &ShortCode) -> Result<Resolution> {
        (**self).resolve(code).await
    }

    async fn create_or_attach(
        &self,
        owner: &OwnerId,
        code: &ShortCode,
        target: &str,
    ) -> Result<Attachment> {
        (**self).create_or_attach(owner, code, target).await
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<UrlRecord>> {
        (**self).list_by_owner(owner).await
    }

    async fn bulk_soft_delete(&self, tasks: &[DeletionTask]) -> Result<u64> {
        (**self).bulk_soft_delete(tasks).await
    }

    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }

    async fn stats(&self) -> Result<StoreStats> {
        (**self).stats().await
    }
}
