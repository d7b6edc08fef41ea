/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Error taxonomy shared by the components of a replica, the gateway and the cluster.
//!
//! Errors fall into four families:
//! 1. [`AuthorizationError`] and [`MembershipError`]: a transaction was ordered but violates a rule. These
//!    are never fatal; they travel back to the client as a [`RejectReason`](crate::types::request::RejectReason).
//! 2. [`GatewayError::NoReply`]: the pool did not answer within the caller's deadline. Retryable.
//! 3. [`ProtocolSafetyError`]: the replica observed evidence that honest replicas diverged. Fatal: the
//!    replica halts.
//! 4. [`ClusterError`] and [`WalletError`]: misuse of the local lifecycle and key management APIs.

use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{CryptoHash, Did, NodeAlias, SeqNo},
    roles::Role,
};

/// Why the Role & Authorization Table refused a transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, thiserror::Error)]
pub enum AuthorizationError {
    #[error("{actor} with role {role:?} is not allowed to perform this action")]
    InvalidRole { actor: Did, role: Role },

    #[error("{actor} is not the owner of node {alias}")]
    NotOwner { actor: Did, alias: NodeAlias },

    #[error("steward {steward} already owns an active node")]
    MultipleNodes { steward: Did },

    #[error("{builder} needs an endorser to write this transaction")]
    EndorsementRequired { builder: Did },

    #[error("{endorser} is not allowed to endorse transactions")]
    InvalidEndorser { endorser: Did },

    #[error("unknown identity: {did}")]
    UnknownIdentity { did: Did },

    #[error("missing signature of {did}")]
    MissingSignature { did: Did },

    #[error("invalid signature of {did}")]
    InvalidSignature { did: Did },
}

/// Why the Pool Ledger refused a membership change.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, thiserror::Error)]
pub enum MembershipError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeAlias),

    #[error("node {0} is already active")]
    AlreadyActive(NodeAlias),

    #[error("node {0} is already demoted")]
    AlreadyDemoted(NodeAlias),

    #[error("node {0} already exists")]
    AlreadyExists(NodeAlias),

    #[error("the validation key of {alias} is already used by {holder}")]
    DuplicateNodeKey { alias: NodeAlias, holder: NodeAlias },

    #[error("invalid data for node {alias}: {reason}")]
    InvalidNodeData { alias: NodeAlias, reason: String },

    #[error("demoting {alias} would leave {remaining} active nodes, minimum is {minimum}")]
    BelowMinimumPool {
        alias: NodeAlias,
        remaining: u32,
        minimum: u32,
    },
}

/// Evidence that this replica and a quorum (or a peer) disagree about committed history. Once raised, the
/// replica stops participating.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolSafetyError {
    #[error("batch {seq} was executed with digest {executed} but a quorum certified {certified}")]
    ConflictingCommit {
        seq: SeqNo,
        executed: CryptoHash,
        certified: CryptoHash,
    },

    #[error("{peer} executed up to {seq} like us but reports ledger root {peer_root} and {peer_active} active nodes")]
    DivergentState {
        peer: NodeAlias,
        seq: SeqNo,
        peer_root: CryptoHash,
        peer_active: u32,
    },
}

/// Errors returned by [`Gateway`](crate::gateway::Gateway) operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Consensus timeout: no outcome was agreed on by enough replicas within the wait. The request may still be
    /// committed later, so resubmitting the same request is safe.
    #[error("no agreed reply within {waited:?}")]
    NoReply { waited: Duration },

    #[error("the gateway has been shut down")]
    Closed,
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::NoReply { .. } => true,
            GatewayError::Closed => false,
        }
    }
}

/// Lifecycle states of a [`Cluster`](crate::cluster::Cluster).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterLifecycle {
    Initialized,
    Active,
    TornDown,
}

/// Errors returned by [`Cluster`](crate::cluster::Cluster) lifecycle operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: ClusterLifecycle,
        actual: ClusterLifecycle,
    },

    #[error("node {0} has not been provisioned")]
    NotProvisioned(NodeAlias),

    #[error("node {0} has already been provisioned")]
    AlreadyProvisioned(NodeAlias),

    #[error("node {0} is already running")]
    AlreadyRunning(NodeAlias),

    #[error("node {0} is not running")]
    NotRunning(NodeAlias),
}

/// Errors returned by [`Wallet`](crate::wallet::Wallet) operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("no key for {0} in this wallet")]
    UnknownIdentity(Did),

    #[error("{0} is not the builder of this request")]
    NotBuilder(Did),
}
