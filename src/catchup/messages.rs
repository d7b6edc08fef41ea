/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the catch-up
//! subprotocol.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    consensus::messages::NewView,
    store::LedgerEntry,
    types::data_types::SeqNo,
};

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum CatchupMessage {
    CatchupRequest(CatchupRequest),
    CatchupResponse(CatchupResponse),
}

/// Ask for up to `limit` committed entries, starting at `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CatchupRequest {
    pub from: SeqNo,
    pub limit: u32,
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct CatchupResponse {
    pub entries: Vec<LedgerEntry>,
    pub new_view: Option<NewView>,
}
