/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A simple, volatile, in-memory implementation of [`KVStore`].
//!
//! Clones share the same map, so a [`Cluster`](crate::cluster::Cluster) can keep a stopped replica's store
//! and hand it back to the replica when it is restarted.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use super::{
    kv_store::{KVGet, KVStore},
    write_batch::WriteBatch,
};

#[derive(Clone, Default)]
pub struct MemStore(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }
}

impl KVStore for MemStore {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) {
        // Safety: the lock is only held within this module, which never panics while holding it.
        let mut map = self.0.lock().unwrap();
        for (key, value) in wb.insertions {
            map.insert(key, value);
        }
        for key in wb.deletions {
            map.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.0.lock().unwrap().clear();
    }
}

impl KVGet for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }
}

/// A simple implementation of [`WriteBatch`].
pub struct MemWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        consensus::messages::CommitCertificate,
        store::{write_batch::LedgerWriteBatch, LedgerEntry},
        types::data_types::{CryptoHash, SeqNo, ViewNumber},
    };

    fn entry(seq: u64) -> LedgerEntry {
        LedgerEntry {
            seq: SeqNo::new(seq),
            view: ViewNumber::new(0),
            batch: Vec::new(),
            certificate: CommitCertificate {
                view: ViewNumber::new(0),
                seq: SeqNo::new(seq),
                digest: CryptoHash::new([seq as u8; 32]),
                signatures: BTreeMap::new(),
            },
            ledger_root: CryptoHash::new([seq as u8; 32]),
        }
    }

    #[test]
    fn appended_entries_are_read_back_in_order() {
        let mut store = MemStore::new();
        assert_eq!(store.last_executed().unwrap(), SeqNo::genesis());

        for seq in 1..=3 {
            let mut wb = LedgerWriteBatch::<MemWriteBatch>::new();
            wb.append_entry(&entry(seq)).unwrap();
            store.write(wb.0);
        }

        assert_eq!(store.last_executed().unwrap(), SeqNo::new(3));
        let entries = store.ledger_entries(SeqNo::new(2), 10).unwrap();
        assert_eq!(
            entries.iter().map(|entry| entry.seq).collect::<Vec<_>>(),
            vec![SeqNo::new(2), SeqNo::new(3)]
        );
        assert!(store.latest_new_view().unwrap().is_none());

        // Clones share the same map.
        let mut clone = store.clone();
        clone.clear();
        assert!(store.ledger_entry(SeqNo::new(1)).unwrap().is_none());
    }
}
