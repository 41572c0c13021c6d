//! Process-local store backend.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::{SampleLogStore, StoreBackendKind, resolve_range};
use crate::error::StoreError;
use crate::sample::Sample;

/// Keeps every identity's log in a `Vec` behind one async lock.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    logs: RwLock<HashMap<String, Vec<Sample>>>,
}

impl MemoryLogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities that currently own a non-empty log.
    pub async fn identities(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.logs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SampleLogStore for MemoryLogStore {
    fn backend_kind(&self) -> StoreBackendKind {
        StoreBackendKind::Memory
    }

    async fn append(&self, identity: &str, sample: &Sample) -> Result<u64, StoreError> {
        let mut logs = self.logs.write().await;
        let log = logs.entry(identity.to_string()).or_default();
        log.push(sample.clone());
        Ok(log.len() as u64)
    }

    async fn read_range(
        &self,
        identity: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        let logs = self.logs.read().await;
        let Some(log) = logs.get(identity) else {
            return Ok(Vec::new());
        };
        Ok(resolve_range(log.len() as u64, start, end)
            .map(|range| log[range.start as usize..range.end as usize].to_vec())
            .unwrap_or_default())
    }

    async fn len(&self, identity: &str) -> Result<u64, StoreError> {
        Ok(self
            .logs
            .read()
            .await
            .get(identity)
            .map_or(0, |log| log.len() as u64))
    }

    async fn rename(&self, old: &str, new: &str) -> Result<u64, StoreError> {
        let mut logs = self.logs.write().await;
        if old == new {
            return Ok(logs.get(new).map_or(0, |log| log.len() as u64));
        }
        let moved = logs.remove(old).unwrap_or_default();
        let dest = logs.entry(new.to_string()).or_default();
        dest.extend(moved.into_iter().map(|mut sample| {
            sample.identity = new.to_string();
            sample
        }));
        let len = dest.len() as u64;
        if len == 0 {
            logs.remove(new);
        }
        Ok(len)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.logs.write().await.clear();
        Ok(())
    }
}
