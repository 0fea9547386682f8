//! Core types and traits for the Linkvault URL shortener.
//!
//! This crate provides the link store contract shared by the storage
//! backends, the deletion pipeline and the shortener service.

pub mod error;
pub mod repository;
pub mod shortcode;
pub mod shortener;
pub mod task;

pub use error::{ShortenerError, StorageError};
pub use repository::{
    Attachment, CreateOutcome, LinkStore, OwnerId, Ownership, Resolution, StoreStats, UrlRecord,
};
pub use shortcode::{Fingerprint, ShortCode};
pub use shortener::{BatchItem, BatchShortened, OwnedUrl, Shortened, Shortener};
pub use task::DeletionTask;
