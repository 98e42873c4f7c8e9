// src/history/change_data/memory.rs

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{ChangeDataError, ChangeDataRecord, ChangeDataStore};

#[derive(Debug, Default)]
pub struct InMemoryChangeDataStore {
    data: RwLock<BTreeMap<(u64, String), serde_json::Value>>,
}

impl InMemoryChangeDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ChangeDataRecord>) -> Self {
        let data = records
            .into_iter()
            .map(|r| ((r.entry_id, r.key), r.data))
            .collect();
        InMemoryChangeDataStore { data: RwLock::new(data) }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl ChangeDataStore for InMemoryChangeDataStore {
    fn get(&self, entry_id: u64, key: &str) -> Result<Option<serde_json::Value>, ChangeDataError> {
        Ok(self.data.read().get(&(entry_id, key.to_string())).cloned())
    }

    fn put(&self, entry_id: u64, key: &str, data: serde_json::Value) -> Result<(), ChangeDataError> {
        self.data.write().insert((entry_id, key.to_string()), data);
        Ok(())
    }

    fn evict(&self, entry_id: u64) -> Result<(), ChangeDataError> {
        self.data.write().retain(|(id, _), _| *id != entry_id);
        Ok(())
    }

    fn records(&self) -> Result<Vec<ChangeDataRecord>, ChangeDataError> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|((entry_id, key), data)| ChangeDataRecord {
                entry_id: *entry_id,
                key: key.clone(),
                data: data.clone(),
            })
            .collect())
    }
}
