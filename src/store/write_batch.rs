/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Atomic writes to the ledger store.

use borsh::BorshSerialize;

use crate::consensus::messages::NewView;

use super::{
    kv_store::{KVSetError, Key},
    paths, LedgerEntry,
};

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// A [`WriteBatch`] that forms the keys of ledger variables itself.
pub struct LedgerWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> LedgerWriteBatch<W> {
    pub fn new() -> LedgerWriteBatch<W> {
        LedgerWriteBatch(W::new())
    }

    /// Append `entry` to the ledger and make it the last executed entry.
    pub fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), KVSetError> {
        let key = Key::LedgerEntry { seq: entry.seq };
        self.0.set(
            &paths::ledger_entry(entry.seq),
            &entry
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError { key, source: err })?,
        );
        self.0.set(
            &paths::LAST_EXECUTED,
            &entry
                .seq
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LastExecuted,
                    source: err,
                })?,
        );
        Ok(())
    }

    pub fn set_latest_new_view(&mut self, new_view: &NewView) -> Result<(), KVSetError> {
        self.0.set(
            &paths::LATEST_NEW_VIEW,
            &new_view
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LatestNewView,
                    source: err,
                })?,
        );
        Ok(())
    }
}

impl<W: WriteBatch> Default for LedgerWriteBatch<W> {
    fn default() -> Self {
        Self::new()
    }
}
