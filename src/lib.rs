/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consensus, pool-membership and authorization core of a permissioned distributed ledger.
//!
//! A pool of [replicas](replica) orders signed [requests](types::request::Request) in batches with a
//! Byzantine-fault-tolerant protocol driven by a rotating primary, and executes them against a
//! [replicated state](state) that holds:
//! 1. The [role and authorization table](authorization): which identity is a trustee, steward or endorser,
//!    and which steward owns which node.
//! 2. The [pool ledger](pool_ledger): the validator nodes, their keys and addresses, and whether they are
//!    active or demoted.
//!
//! Every change to the active pool recomputes the [quorums](quorum) and, when the primary leaves or the
//! pool grows, starts a [view change](view_change).
//!
//! Clients reach the pool through a [`Gateway`](gateway::Gateway), sign their requests with a
//! [`Wallet`](wallet::Wallet), and wait on conditions with [`Eventually`](retry::Eventually). A
//! [`Cluster`](cluster::Cluster) runs a whole pool in one process over an
//! [in-memory network](networking::in_memory).

pub mod authorization;

pub(crate) mod algorithm;

pub mod camera;

pub mod catchup;

pub mod cluster;

pub mod config;

pub mod consensus;

pub mod errors;

pub(crate) mod event_bus;

pub mod events;

pub mod gateway;

pub(crate) mod logging;

pub mod networking;

pub mod pool_ledger;

pub mod quorum;

pub mod replica;

pub mod retry;

pub mod state;

pub mod store;

pub mod types;

pub mod view_change;

pub mod wallet;
