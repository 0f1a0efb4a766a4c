//! The two key-value tiers used by the workflow.
//!
//! The volatile tier lives for one session and carries the session
//! snapshot. The durable tier survives across sessions and holds the
//! snapshot baseline, every per-pose collection record and the handoff
//! channel.

use std::sync::Arc;

use crate::kv::{KeyValueStore, MemoryKvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTier {
    Volatile,
    Durable,
}

impl StoreTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Volatile => "volatile",
            Self::Durable => "durable",
        }
    }
}

/// Handles to both key-value tiers.
#[derive(Clone)]
pub struct StateStores {
    pub volatile: Arc<dyn KeyValueStore>,
    pub durable: Arc<dyn KeyValueStore>,
}

impl StateStores {
    pub fn new(volatile: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self { volatile, durable }
    }

    /// Both tiers in memory, for tests and throwaway sessions.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()), Arc::new(MemoryKvStore::new()))
    }

    pub fn tier(&self, tier: StoreTier) -> &dyn KeyValueStore {
        match tier {
            StoreTier::Volatile => self.volatile.as_ref(),
            StoreTier::Durable => self.durable.as_ref(),
        }
    }
}

impl std::fmt::Debug for StateStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStores").finish_non_exhaustive()
    }
}
