/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol that "catches-up" the local ledger in case the replica misses out on messages, e.g.,
//! because it was stopped, or because it was added to a pool that had already committed batches.
//!
//! ## Catch-up process
//!
//! A replica that learns it is behind (a peer's view change vote reports a higher `last_executed`, or it
//! holds a commit certificate for a batch it never received) broadcasts a
//! [`CatchupRequest`](messages::CatchupRequest) for the entries after its last executed one. Peers answer
//! with their committed [`LedgerEntry`](crate::store::LedgerEntry)s, up to a configurable limit, and the
//! latest [`NewView`](crate::consensus::messages::NewView) they installed.
//!
//! The replica applies the entries strictly in order. An entry is applied only if its commit certificate
//! carries `N - f` correct signatures of the pool that is active at the entry's height, and certifies the
//! digest of the entry's batch. Since the replica executes entries itself, the pool it checks the next
//! certificate against is always its own.
//!
//! Requests for more entries are rate-limited, so that a replica that is far behind catches up in rounds
//! of at most one request per view change timeout.
//!
//! The server side of this subprotocol is [`CatchupServer`](server::CatchupServer), which also answers
//! reads, since both are served from the committed state without involving the algorithm thread.

pub mod messages;

pub(crate) mod server;
