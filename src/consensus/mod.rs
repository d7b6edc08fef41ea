/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replication protocol that orders client requests into a totally ordered ledger of batches.
//!
//! ## Normal operation
//!
//! In every view, one active node is the [primary](crate::view_change::select_primary). The primary takes
//! pending client requests in arrival order and broadcasts them as a signed [`Proposal`](messages::Proposal)
//! for the next sequence number. Only one proposal is in flight at a time.
//!
//! Every active node that accepts the proposal broadcasts a [`CommitVote`](messages::CommitVote). Once
//! `N - f` active nodes voted for the same batch digest, any replica holding the votes forms a
//! [`CommitCertificate`](messages::CommitCertificate) and executes the batch against its
//! [`ReplicatedState`](crate::state::ReplicatedState). Batches execute strictly in sequence order.
//!
//! Replicas whose node is not active (not yet added, or demoted) execute and install views like every other
//! replica, but never propose or vote.
//!
//! ## View change
//!
//! A replica starts a view change when:
//! 1. A committed membership change requires one, according to the
//!    [view change policy](crate::view_change::ViewChangePolicy).
//! 2. A pending request was not executed within the primary timeout.
//! 3. At least `f + 1` active nodes voted for a higher view.
//! 4. Its current view change did not complete within its retry window.
//!
//! It then broadcasts a [`ViewChangeVote`](messages::ViewChangeVote) carrying its execution progress and the
//! proposal it voted for but has not executed. `N - f` votes for the same target install the target view.
//! The primary of the new view broadcasts a [`NewView`](messages::NewView) carrying the votes, and
//! re-proposes the prepared batch with the highest view for the next sequence number.
//!
//! ## Catch-up
//!
//! A replica that learns that its peers executed batches it has not broadcasts a
//! [`CatchupRequest`](crate::catchup::messages::CatchupRequest). The entries in the responses are applied
//! only if their commit certificates hold, against the active nodes at their height.

pub(crate) mod collectors;

pub(crate) mod engine;

pub mod messages;
