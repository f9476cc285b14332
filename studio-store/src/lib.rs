//! Concrete implementations of `studio_core::Store`.

pub mod memory;
#[cfg(feature = "sled-backend")]
pub mod sled_store;

pub use memory::MemoryStore;
#[cfg(feature = "sled-backend")]
pub use sled_store::SledStore;
