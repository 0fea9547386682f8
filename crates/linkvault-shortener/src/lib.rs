//! URL shortener service implementation.
//!
//! This crate wires a [`LinkStore`](linkvault_core::LinkStore) and the
//! deletion pipeline into the [`Shortener`](linkvault_core::Shortener)
//! contract. Core types are re-exported from `linkvault_core`.

pub mod service;

pub use linkvault_core::{Shortener, ShortenerError};
pub use service::ShortenerService;
