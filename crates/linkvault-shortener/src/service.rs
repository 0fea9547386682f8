use async_trait::async_trait;
use linkvault_core::{
    BatchItem, BatchShortened, DeletionTask, LinkStore, OwnedUrl, OwnerId, Resolution, ShortCode,
    Shortened, Shortener, ShortenerError, StoreStats,
};
use linkvault_deleter::{DeletionSubmitter, PipelineError};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// A concrete implementation of the `Shortener` trait.
///
/// Creation, resolution and listing go straight to the `LinkStore`.
/// Deletion only queues tasks on the deletion pipeline; the caller gets an
/// answer before the store has been touched.
#[derive(Debug)]
pub struct ShortenerService<S> {
    store: Arc<S>,
    deletions: DeletionSubmitter,
    base_url: String,
}

impl<S> Clone for ShortenerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            deletions: self.deletions.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl<S: LinkStore> ShortenerService<S> {
    /// Creates a service publishing short URLs under `base_url`.
    pub fn new(store: Arc<S>, deletions: DeletionSubmitter, base_url: impl Into<String>) -> Self {
        Self {
            store,
            deletions,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validates that the URL is an absolute http(s) URL with a host.
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }
        // The parser would trim these away, but the target is stored verbatim.
        if url.chars().any(char::is_whitespace) {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must not contain whitespace: {url}"
            )));
        }

        let parsed = Url::parse(url)
            .map_err(|e| ShortenerError::InvalidUrl(format!("{url}: {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                parsed.scheme()
            )));
        }

        match parsed.host_str() {
            Some(host) if !host.is_empty() => Ok(()),
            _ => Err(ShortenerError::InvalidUrl(format!(
                "URL must have a host: {url}"
            ))),
        }
    }
}

#[async_trait]
impl<S: LinkStore> Shortener for ShortenerService<S> {
    async fn shorten(&self, owner: &OwnerId, url: &str) -> Result<Shortened, ShortenerError> {
        Self::validate_url(url)?;

        let code = ShortCode::for_target(url);
        let attachment = self.store.create_or_attach(owner, &code, url).await?;
        debug!(
            owner = %owner,
            code = %attachment.code,
            outcome = ?attachment.outcome,
            "shortened url"
        );

        Ok(Shortened {
            short_url: attachment.code.to_url(&self.base_url),
            code: attachment.code,
            outcome: attachment.outcome,
        })
    }

    async fn shorten_batch(
        &self,
        owner: &OwnerId,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchShortened>, ShortenerError> {
        // One bad URL rejects the whole batch before anything is stored.
        for item in &items {
            Self::validate_url(&item.original_url)?;
        }

        let mut shortened = Vec::with_capacity(items.len());
        for item in items {
            let code = ShortCode::for_target(&item.original_url);
            let attachment = self
                .store
                .create_or_attach(owner, &code, &item.original_url)
                .await?;
            shortened.push(BatchShortened {
                correlation_id: item.correlation_id,
                short_url: attachment.code.to_url(&self.base_url),
            });
        }

        debug!(owner = %owner, batch_size = shortened.len(), "shortened url batch");
        Ok(shortened)
    }

    async fn resolve(&self, code: &ShortCode) -> Result<String, ShortenerError> {
        match self.store.resolve(code).await? {
            Resolution::Found(target) => Ok(target),
            Resolution::NotFound => Err(ShortenerError::NotFound(code.to_string())),
            Resolution::Gone => Err(ShortenerError::Gone(code.to_string())),
        }
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<OwnedUrl>, ShortenerError> {
        let records = self.store.list_by_owner(owner).await?;
        Ok(records
            .into_iter()
            .map(|record| OwnedUrl {
                short_url: record.code.to_url(&self.base_url),
                original_url: record.target_url,
            })
            .collect())
    }

    async fn delete(
        &self,
        owner: &OwnerId,
        codes: Vec<ShortCode>,
    ) -> Result<usize, ShortenerError> {
        let accepted = codes.len();
        for code in codes {
            self.deletions
                .submit(DeletionTask::new(owner.clone(), code))
                .await
                .map_err(pipeline_to_shortener_error)?;
        }

        info!(owner = %owner, accepted, "deletion request queued");
        Ok(accepted)
    }

    async fn stats(&self) -> Result<StoreStats, ShortenerError> {
        Ok(self.store.stats().await?)
    }

    async fn ping(&self) -> Result<(), ShortenerError> {
        Ok(self.store.health_check().await?)
    }
}

/// Converts a PipelineError to a ShortenerError.
fn pipeline_to_shortener_error(e: PipelineError) -> ShortenerError {
    match e {
        PipelineError::Flush(storage) => storage.into(),
        other => ShortenerError::Pipeline(other.to_string()),
    }
}
