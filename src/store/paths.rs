/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each ledger variable is stored in the user-provided key-value store.
//!
//! Single values (the last executed sequence number, the latest new view) are stored at one-byte
//! constant keys. Ledger entries are stored at the [`LEDGER_ENTRIES`] prefix followed by the big-endian
//! bytes of their sequence number, so that a key-ordered store iterates entries in ledger order.

use crate::types::data_types::SeqNo;

pub const LEDGER_ENTRIES: [u8; 1] = [0];
pub const LAST_EXECUTED: [u8; 1] = [1];
pub const LATEST_NEW_VIEW: [u8; 1] = [2];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and
/// then the bytes of the second one.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

/// Get the key that the ledger entry at `seq` is stored at.
pub fn ledger_entry(seq: SeqNo) -> Vec<u8> {
    combine(&LEDGER_ENTRIES, &seq.int().to_be_bytes())
}
