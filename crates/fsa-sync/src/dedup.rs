use std::collections::HashSet;

use fsa_core::{KeyColumn, ProsecutionRecord};
use fsa_storage::{RecordStore, StoreError};
use tracing::debug;

/// Filters out records whose key is already stored. The stored key set is read once
/// per gate and reused for every later call.
#[derive(Debug)]
pub struct DedupGate {
    key: KeyColumn,
    existing: Option<HashSet<String>>,
}

impl DedupGate {
    pub fn new(key: KeyColumn) -> Self {
        Self {
            key,
            existing: None,
        }
    }

    pub async fn existing_keys(
        &mut self,
        store: &dyn RecordStore,
    ) -> Result<&HashSet<String>, StoreError> {
        let existing = match self.existing.take() {
            Some(existing) => existing,
            None => {
                let keys = store.existing_keys().await?;
                debug!(count = keys.len(), key = %self.key, "loaded stored keys");
                keys
            }
        };
        Ok(&*self.existing.insert(existing))
    }

    pub async fn filter_new(
        &mut self,
        store: &dyn RecordStore,
        records: Vec<ProsecutionRecord>,
    ) -> Result<Vec<ProsecutionRecord>, StoreError> {
        let key = self.key;
        let existing = self.existing_keys(store).await?;
        Ok(retain_new(records, existing, key))
    }
}

/// Stable filter: input order is kept and duplicates within `records` are not collapsed.
pub fn retain_new(
    records: Vec<ProsecutionRecord>,
    existing: &HashSet<String>,
    key: KeyColumn,
) -> Vec<ProsecutionRecord> {
    records
        .into_iter()
        .filter(|record| !existing.contains(record.key(key)))
        .collect()
}
