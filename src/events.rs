/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a replica emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by the
//! algorithm thread and the catch-up server thread onto a channel, and handled on the
//! [event bus](crate::event_bus) thread, so slow handlers never hold up the protocol.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    consensus::messages::{CommitCertificate, CommitVote, Proposal, ViewChangeVote},
    errors::ProtocolSafetyError,
    networking::network::PeerId,
    pool_ledger::CommitResult,
    types::{
        data_types::{CryptoHash, NodeAlias, SeqNo, ViewNumber},
        request::RejectReason,
    },
    view_change::ViewChangeReason,
};

pub enum Event {
    // Events that change persistent state.
    CommitBatch(CommitBatchEvent),
    RejectTransaction(RejectTransactionEvent),
    UpdatePool(UpdatePoolEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    CommitVote(CommitVoteEvent),
    ViewChangeVote(ViewChangeVoteEvent),
    // Events that involve receiving a consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveViewChangeVote(ReceiveViewChangeVoteEvent),
    CollectCertificate(CollectCertificateEvent),
    // View change events.
    StartViewChange(StartViewChangeEvent),
    StartView(StartViewEvent),
    PrimaryTimeout(PrimaryTimeoutEvent),
    // Catch-up events.
    StartCatchup(StartCatchupEvent),
    EndCatchup(EndCatchupEvent),
    ServeCatchup(ServeCatchupEvent),
    // The replica halted.
    SafetyViolation(SafetyViolationEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away when the replica is shutting down.
            let _ = event_publisher.send(self);
        }
    }
}

/// A batch was executed and appended to the ledger.
pub struct CommitBatchEvent {
    pub timestamp: SystemTime,
    pub seq: SeqNo,
    pub view: ViewNumber,
    pub digest: CryptoHash,
    pub requests: usize,
    pub ledger_root: CryptoHash,
}

/// A committed request was rejected during execution.
pub struct RejectTransactionEvent {
    pub timestamp: SystemTime,
    pub seq: SeqNo,
    pub digest: CryptoHash,
    pub reason: RejectReason,
}

/// A committed NODE transaction changed the active pool.
pub struct UpdatePoolEvent {
    pub timestamp: SystemTime,
    pub seq: SeqNo,
    pub result: CommitResult,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct CommitVoteEvent {
    pub timestamp: SystemTime,
    pub vote: CommitVote,
}

pub struct ViewChangeVoteEvent {
    pub timestamp: SystemTime,
    pub vote: ViewChangeVote,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: NodeAlias,
    pub proposal: Proposal,
}

pub struct ReceiveViewChangeVoteEvent {
    pub timestamp: SystemTime,
    pub origin: NodeAlias,
    pub target: ViewNumber,
}

pub struct CollectCertificateEvent {
    pub timestamp: SystemTime,
    pub certificate: CommitCertificate,
}

pub struct StartViewChangeEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub target: ViewNumber,
    pub reason: ViewChangeReason,
}

pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub primary: Option<NodeAlias>,
    pub suspected: Vec<NodeAlias>,
}

pub struct PrimaryTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub timeout: Duration,
}

pub struct StartCatchupEvent {
    pub timestamp: SystemTime,
    pub from: SeqNo,
}

pub struct EndCatchupEvent {
    pub timestamp: SystemTime,
    pub peer: NodeAlias,
    pub applied: usize,
    pub last_executed: SeqNo,
}

pub struct ServeCatchupEvent {
    pub timestamp: SystemTime,
    pub peer: PeerId,
    pub from: SeqNo,
    pub entries: usize,
}

pub struct SafetyViolationEvent {
    pub timestamp: SystemTime,
    pub error: ProtocolSafetyError,
}
