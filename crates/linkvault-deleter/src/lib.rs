//! Deferred, batched deletion of owner references.
//!
//! Callers submit [`DeletionTask`](linkvault_core::DeletionTask)s through a
//! [`DeletionSubmitter`]. A single collector task counts submissions and
//! raises a flush signal after `flush_threshold` submissions or after
//! `flush_interval`, whichever comes first. A pool of dispatchers takes
//! those signals one at a time, drains the bounded task queue and applies
//! the drained batch with one
//! [`LinkStore::bulk_soft_delete`](linkvault_core::LinkStore::bulk_soft_delete)
//! call.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use linkvault_core::{DeletionTask, ShortCode};
//! use linkvault_deleter::{BatchSettings, DeletionPipeline};
//! use linkvault_storage::InMemoryLinkStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryLinkStore::new());
//! let pipeline = DeletionPipeline::start(store, BatchSettings::default())?;
//!
//! let code = ShortCode::for_target("https://example.com");
//! pipeline.submit(DeletionTask::new("u1", code)).await?;
//!
//! // Apply whatever is still queued before exiting.
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! A batch whose apply fails is logged and dropped; it is not retried.

mod collector;
mod dispatcher;
pub mod error;
mod pipeline;
pub mod settings;

pub use collector::{DeletionSubmitter, FlushReason, FlushSignal};
pub use error::PipelineError;
pub use pipeline::DeletionPipeline;
pub use settings::BatchSettings;
