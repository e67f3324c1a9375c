// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Crash Behavior
//
// - All state is lost when the process exits
// - Every run starts without a cooldown reference and creates a new result
//   artifact unless one is configured
//
// ## When to Use
//
// - Tests
// - Dry runs where nothing should be remembered

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{PriorRunState, StateStore};

/// In-memory state store implementation
///
/// Clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<PriorRunState>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `state`
    pub fn with_state(state: PriorRunState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PriorRunState, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, state: &PriorRunState) -> Result<(), Error> {
        *self.inner.write().await = state.clone();
        Ok(())
    }
}
