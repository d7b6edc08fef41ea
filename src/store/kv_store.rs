/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the [`KVStore`] trait, which specifies the required interface for the key-value store provided
//! by the user.
//!
//! Given a method to obtain the value for a given key in bytes, this module also provides methods to
//! obtain the ledger variables stored in the key-value store.

use borsh::BorshDeserialize;
use thiserror::Error;

use crate::{
    consensus::messages::NewView,
    types::data_types::SeqNo,
};

use super::{paths, write_batch::WriteBatch, LedgerEntry};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Ledger Entries ↓↓↓ */

    fn ledger_entry(&self, seq: SeqNo) -> Result<Option<LedgerEntry>, KVGetError> {
        if let Some(bytes) = self.get(&paths::ledger_entry(seq)) {
            let entry = LedgerEntry::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::LedgerEntry { seq },
                    source: err,
                }
            })?;
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// Get up to `limit` consecutive entries, starting at `from`. Stops early at the first missing entry.
    fn ledger_entries(&self, from: SeqNo, limit: usize) -> Result<Vec<LedgerEntry>, KVGetError> {
        let mut entries = Vec::new();
        let mut seq = from;
        while entries.len() < limit {
            match self.ledger_entry(seq)? {
                Some(entry) => entries.push(entry),
                None => break,
            }
            seq = seq.next();
        }
        Ok(entries)
    }

    /* ↓↓↓ Last Executed ↓↓↓ */

    /// Get the sequence number of the last executed entry, or [`SeqNo::genesis`] if nothing was executed.
    fn last_executed(&self) -> Result<SeqNo, KVGetError> {
        if let Some(bytes) = self.get(&paths::LAST_EXECUTED) {
            SeqNo::deserialize(&mut &*bytes).map_err(|err| KVGetError::DeserializeValueError {
                key: Key::LastExecuted,
                source: err,
            })
        } else {
            Ok(SeqNo::genesis())
        }
    }

    /* ↓↓↓ Latest New View ↓↓↓ */

    fn latest_new_view(&self) -> Result<Option<NewView>, KVGetError> {
        if let Some(bytes) = self.get(&paths::LATEST_NEW_VIEW) {
            let new_view =
                NewView::deserialize(&mut &*bytes).map_err(|err| KVGetError::DeserializeValueError {
                    key: Key::LatestNewView,
                    source: err,
                })?;
            Ok(Some(new_view))
        } else {
            Ok(None)
        }
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in case the value is not found in the store or the value cannot be deserialized.
#[derive(Debug, Error)]
pub enum KVGetError {
    #[error("failed to deserialize the value stored at {key:?}")]
    DeserializeValueError {
        key: Key,
        #[source]
        source: std::io::Error,
    },
    #[error("no value stored at {key:?}")]
    ValueNotFound { key: Key },
}

/// Error when trying to write a value to the [key value store][KVStore].
#[derive(Debug, Error)]
pub enum KVSetError {
    #[error("failed to serialize the value for {key:?}")]
    SerializeValueError {
        key: Key,
        #[source]
        source: std::io::Error,
    },
}

/// Enumerates the ledger variables stored in the key value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    LedgerEntry { seq: SeqNo },
    LastExecuted,
    LatestNewView,
}

/// Any error reading from or writing to the [key value store][KVStore].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Get(#[from] KVGetError),
    #[error(transparent)]
    Set(#[from] KVSetError),
}
