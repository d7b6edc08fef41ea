/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read-only views into a running replica.
//!
//! The algorithm thread is the only writer of a replica's [`ReplicatedState`] and [`ReplicaStatus`]. A
//! [`ReplicaCamera`] shares both with other threads (the catch-up server, tests, cluster operators), which
//! can only read them.

use std::sync::{Arc, RwLock};

use crate::{
    state::ReplicatedState,
    types::{
        data_types::{CryptoHash, NodeAlias, SeqNo, ViewNumber},
        request::{ReadAnswer, ReadQuery},
    },
    view_change::{select_primary, ReplicaMode},
};

/// A snapshot of where a replica is in the protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub alias: NodeAlias,
    pub mode: ReplicaMode,
    pub view: ViewNumber,
    pub primary: Option<NodeAlias>,
    pub last_executed: SeqNo,
    pub ledger_root: CryptoHash,
    /// The active pool, in alias order.
    pub active: Vec<NodeAlias>,
    pub suspected: Vec<NodeAlias>,
    /// The number of faulty nodes the active pool tolerates.
    pub f: usize,
}

impl ReplicaStatus {
    /// The status of a replica of `alias` that has not recovered its ledger yet.
    pub(crate) fn initial(alias: NodeAlias, state: &ReplicatedState) -> Self {
        let pool = state.pool().pool_state();
        let view = ViewNumber::init();
        Self {
            alias,
            mode: ReplicaMode::Following,
            view,
            primary: select_primary(view, &pool),
            last_executed: state.last_executed(),
            ledger_root: state.ledger_root(),
            active: pool.aliases().cloned().collect(),
            suspected: Vec::new(),
            f: pool.quorums().f,
        }
    }
}

#[derive(Clone)]
pub struct ReplicaCamera {
    status: Arc<RwLock<ReplicaStatus>>,
    state: Arc<RwLock<ReplicatedState>>,
}

impl ReplicaCamera {
    pub(crate) fn new(status: Arc<RwLock<ReplicaStatus>>, state: Arc<RwLock<ReplicatedState>>) -> Self {
        Self { status, state }
    }

    pub fn status(&self) -> ReplicaStatus {
        // Safety: writers never panic while holding the lock.
        self.status.read().unwrap().clone()
    }

    /// Run `f` against the replica's committed state.
    pub fn with_state<T>(&self, f: impl FnOnce(&ReplicatedState) -> T) -> T {
        f(&self.state.read().unwrap())
    }

    /// Answer `query` from the replica's committed state and current view.
    pub fn answer(&self, query: &ReadQuery) -> ReadAnswer {
        if let Some(answer) = self.with_state(|state| state.answer(query)) {
            return answer;
        }
        let status = self.status();
        ReadAnswer::ViewInfo {
            view: status.view,
            primary: status.primary,
            active: status.active,
        }
    }
}
