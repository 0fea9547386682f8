use crate::repository::{CreateOutcome, OwnerId, StoreStats};
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// A shortened URL handed back to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortened {
    pub code: ShortCode,
    /// The public short URL (`base_url/code`).
    pub short_url: String,
    pub outcome: CreateOutcome,
}

/// One entry of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShortened {
    pub correlation_id: String,
    pub short_url: String,
}

/// A live link of an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedUrl {
    pub short_url: String,
    pub original_url: String,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `url` on behalf of `owner`.
    ///
    /// Shortening a URL the owner already holds succeeds with
    /// [`CreateOutcome::AlreadyOwned`] and the existing short URL.
    async fn shorten(&self, owner: &OwnerId, url: &str) -> Result<Shortened>;

    /// Shortens several URLs at once, preserving correlation ids.
    async fn shorten_batch(
        &self,
        owner: &OwnerId,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchShortened>>;

    /// Resolves a short code to its target URL.
    async fn resolve(&self, code: &ShortCode) -> Result<String>;

    /// Lists the live links of `owner`.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<OwnedUrl>>;

    /// Queues deletion of the owner's references to `codes`.
    ///
    /// Returns once the requests are queued; the deletion is applied later.
    async fn delete(&self, owner: &OwnerId, codes: Vec<ShortCode>) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn ping(&self) -> Result<()>;
}
