//! Link store backends.

pub mod memory;
pub mod mysql;

pub use linkvault_core::repository::{LinkStore, Resolution};
pub use linkvault_core::StorageError;
pub use memory::InMemoryLinkStore;
pub use mysql::MySqlLinkStore;
