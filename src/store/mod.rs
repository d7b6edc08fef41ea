/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistent storage for the committed ledger.
//!
//! A replica persists every executed batch as a [`LedgerEntry`], together with the commit certificate that
//! justified executing it, and the latest [`NewView`](crate::consensus::messages::NewView) it installed. On
//! restart, the replica replays its entries to rebuild its
//! [`ReplicatedState`](crate::state::ReplicatedState), and serves the same entries to peers that are
//! catching up.
//!
//! Users plug in their own key-value store by implementing [`KVStore`](kv_store::KVStore). The crate ships
//! a volatile in-memory implementation, [`MemStore`](mem_store::MemStore).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    consensus::messages::CommitCertificate,
    types::{
        data_types::{CryptoHash, SeqNo, ViewNumber},
        request::Request,
    },
};

pub mod kv_store;

pub mod mem_store;

pub mod paths;

pub mod write_batch;

/// A batch of requests executed at `seq`, and the certificate that justified executing it.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct LedgerEntry {
    pub seq: SeqNo,
    pub view: ViewNumber,
    pub batch: Vec<Request>,
    pub certificate: CommitCertificate,
    /// The ledger root after executing this entry.
    pub ledger_root: CryptoHash,
}
