//! The non-replicated, single-node backend: a degenerate wrapper over
//! the store with no peer traffic whatsoever.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, ErrorKind, Result};
use crate::store::Store;

pub struct NoReplication {
    store: Store,
}

impl NoReplication {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Store::new(),
        })
    }
}

#[async_trait]
impl crate::http::Logic for NoReplication {
    async fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    async fn put(&self, key: String, value: String) {
        self.store.put(key, value);
    }

    async fn get_all(&self) -> Vec<(String, String)> {
        self.store.snapshot()
    }
}

/// Runs a single, non-replicated node. Never returns under normal
/// operation.
pub async fn serve(index: u32, connect_to: Vec<u32>) -> Result<()> {
    if index != 0 || !connect_to.is_empty() {
        return Err(Error::wrapped(
            ErrorKind::Config,
            "non-replicated mode requires index=0 and no peers",
        ));
    }

    let logic = NoReplication::new();
    info!("started minikv node (no replication)");
    crate::http::serve(logic, index).await
}
