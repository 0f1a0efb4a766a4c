//! Storage backends for workflow state and image payloads.
//!
//! Two abstractions: [`KeyValueStore`] for small JSON records (two tiers,
//! see [`StateStores`]) and [`BlobStore`] for binary images. Each has an
//! in-memory and a filesystem implementation.

pub mod blob;
pub mod error;
pub mod fs;
pub mod kv;
pub mod tier;

pub use blob::{BlobStore, MemoryBlobStore};
pub use error::StoreError;
pub use fs::{FsBlobStore, FsKvStore};
pub use kv::{load_json, save_json, KeyValueStore, MemoryKvStore};
pub use tier::{StateStores, StoreTier};
