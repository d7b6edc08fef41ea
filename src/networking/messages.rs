/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant sent over the [`Network`](super::network::Network).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    catchup::messages::{CatchupMessage, CatchupRequest, CatchupResponse},
    consensus::messages::{CommitVote, ConsensusMessage, NewView, Proposal, ViewChangeVote},
    types::{
        data_types::CryptoHash,
        request::{Outcome, ReadAnswer, ReadQuery, Request},
    },
};

/// All message variants.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// Sent by clients to nodes.
    ClientMessage(ClientMessage),

    /// Sent by nodes to clients.
    ReplyMessage(ReplyMessage),

    /// See: [`ConsensusMessage`].
    ConsensusMessage(ConsensusMessage),

    /// See: [`CatchupMessage`].
    CatchupMessage(CatchupMessage),
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ClientMessage {
    /// A request to be ordered and executed by the pool.
    Request(Request),

    /// A query answered from a node's committed state.
    Read { query_id: u64, query: ReadQuery },
}

/// Replies carry the number of faulty nodes the replying node's pool tolerates after executing the request,
/// so that the client knows how many matching replies make the outcome certain.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ReplyMessage {
    Reply {
        digest: CryptoHash,
        outcome: Outcome,
        f: u64,
    },
    ReadReply {
        query_id: u64,
        answer: ReadAnswer,
        f: u64,
    },
}

impl From<ClientMessage> for Message {
    fn from(value: ClientMessage) -> Self {
        Message::ClientMessage(value)
    }
}

impl From<ReplyMessage> for Message {
    fn from(value: ReplyMessage) -> Self {
        Message::ReplyMessage(value)
    }
}

impl From<ConsensusMessage> for Message {
    fn from(value: ConsensusMessage) -> Self {
        Message::ConsensusMessage(value)
    }
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Proposal(value))
    }
}

impl From<CommitVote> for Message {
    fn from(value: CommitVote) -> Self {
        Message::ConsensusMessage(ConsensusMessage::CommitVote(value))
    }
}

impl From<ViewChangeVote> for Message {
    fn from(value: ViewChangeVote) -> Self {
        Message::ConsensusMessage(ConsensusMessage::ViewChangeVote(value))
    }
}

impl From<NewView> for Message {
    fn from(value: NewView) -> Self {
        Message::ConsensusMessage(ConsensusMessage::NewView(value))
    }
}

impl From<CatchupRequest> for Message {
    fn from(value: CatchupRequest) -> Self {
        Message::CatchupMessage(CatchupMessage::CatchupRequest(value))
    }
}

impl From<CatchupResponse> for Message {
    fn from(value: CatchupResponse) -> Self {
        Message::CatchupMessage(CatchupMessage::CatchupResponse(value))
    }
}
