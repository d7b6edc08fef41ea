/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the replication
//! protocol.
//!
//! ## Messages
//!
//! 1. [`Proposal`]: sent by the primary of a view to order a batch of requests at the next sequence number.
//! 2. [`CommitVote`]: broadcast by every active node that accepted a proposal. `N - f` matching votes form
//!    a [`CommitCertificate`], after which the batch is executed.
//! 3. [`ViewChangeVote`]: broadcast by every active node that wants to leave the current view. `N - f`
//!    votes for the same target install the target view.
//! 4. [`NewView`]: broadcast by the primary of a freshly installed view, carrying the votes that installed
//!    it, so that replicas that missed some votes can install the view too.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::{CryptoHasher, Digest, Keypair},
    data_types::{CryptoHash, NodeAlias, SeqNo, SignatureBytes, ViewNumber},
    pool::PoolState,
    request::Request,
};

use super::collectors::SignedMessage;

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    CommitVote(CommitVote),
    ViewChangeVote(ViewChangeVote),
    NewView(NewView),
}

impl ConsensusMessage {
    /// Get the view the message belongs to. For view change votes, this is the target view.
    pub fn view(&self) -> ViewNumber {
        match self {
            ConsensusMessage::Proposal(proposal) => proposal.view,
            ConsensusMessage::CommitVote(vote) => vote.view,
            ConsensusMessage::ViewChangeVote(vote) => vote.target,
            ConsensusMessage::NewView(new_view) => new_view.view,
        }
    }
}

/// Compute the digest that commit votes for `batch` at `seq` are over.
pub fn batch_digest(seq: SeqNo, batch: &[Request]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(seq.int().to_le_bytes());
    for request in batch {
        // Safety: serializing into a `Vec` never fails.
        hasher.update(request.try_to_vec().unwrap());
    }
    CryptoHash::new(hasher.finalize().into())
}

/// A batch of requests ordered by the primary of `view` at sequence number `seq`. The signature is over
/// view, seq, and the batch digest.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub view: ViewNumber,
    pub seq: SeqNo,
    pub batch: Vec<Request>,
    pub signature: SignatureBytes,
}

impl Proposal {
    pub(crate) fn new(me: &Keypair, view: ViewNumber, seq: SeqNo, batch: Vec<Request>) -> Self {
        let digest = batch_digest(seq, &batch);
        let signature = me.sign(&(view, seq, digest).try_to_vec().unwrap());
        Self {
            view,
            seq,
            batch,
            signature,
        }
    }

    pub fn digest(&self) -> CryptoHash {
        batch_digest(self.seq, &self.batch)
    }
}

impl SignedMessage for Proposal {
    fn message_bytes(&self) -> Vec<u8> {
        (self.view, self.seq, self.digest()).try_to_vec().unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// A vote to execute the batch with `digest` at `seq`, proposed in `view`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommitVote {
    pub view: ViewNumber,
    pub seq: SeqNo,
    pub digest: CryptoHash,
    pub signature: SignatureBytes,
}

impl CommitVote {
    pub(crate) fn new(me: &Keypair, view: ViewNumber, seq: SeqNo, digest: CryptoHash) -> Self {
        let signature = me.sign(&(view, seq, digest).try_to_vec().unwrap());
        Self {
            view,
            seq,
            digest,
            signature,
        }
    }
}

impl SignedMessage for CommitVote {
    fn message_bytes(&self) -> Vec<u8> {
        (self.view, self.seq, self.digest).try_to_vec().unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Proof that `N - f` active nodes voted to execute the batch with `digest` at `seq`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommitCertificate {
    pub view: ViewNumber,
    pub seq: SeqNo,
    pub digest: CryptoHash,
    pub signatures: BTreeMap<NodeAlias, SignatureBytes>,
}

impl CommitCertificate {
    /// Check that the certificate carries correct signatures from at least a commit quorum of `pool`.
    pub fn is_correct(&self, pool: &PoolState) -> bool {
        let valid = self
            .signatures
            .iter()
            .filter(|(signer, signature)| {
                let vote = CommitVote {
                    view: self.view,
                    seq: self.seq,
                    digest: self.digest,
                    signature: **signature,
                };
                pool.verkey(signer)
                    .map_or(false, |verkey| vote.is_correct(verkey))
            })
            .count();
        valid >= pool.quorums().commit && valid > 0
    }
}

/// A vote to leave the current view for `target`.
///
/// The vote carries the sender's execution progress, so that receivers can detect divergent state and
/// find out that they are behind, and the proposal the sender voted for but has not executed yet, so that
/// the next primary can re-propose it.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct ViewChangeVote {
    pub target: ViewNumber,
    pub last_executed: SeqNo,
    pub ledger_root: CryptoHash,
    pub active_count: u32,
    pub prepared: Option<Proposal>,
    pub signature: SignatureBytes,
}

impl ViewChangeVote {
    pub(crate) fn new(
        me: &Keypair,
        target: ViewNumber,
        last_executed: SeqNo,
        ledger_root: CryptoHash,
        active_count: u32,
        prepared: Option<Proposal>,
    ) -> Self {
        let mut vote = Self {
            target,
            last_executed,
            ledger_root,
            active_count,
            prepared,
            signature: SignatureBytes::new([0u8; 64]),
        };
        vote.signature = me.sign(&vote.message_bytes());
        vote
    }
}

impl SignedMessage for ViewChangeVote {
    fn message_bytes(&self) -> Vec<u8> {
        let prepared = self
            .prepared
            .as_ref()
            .map(|proposal| (proposal.view, proposal.seq, proposal.digest()));
        (
            self.target,
            self.last_executed,
            self.ledger_root,
            self.active_count,
            prepared,
        )
            .try_to_vec()
            .unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Announces that `view` was installed, carrying the view change votes that installed it.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct NewView {
    pub view: ViewNumber,
    pub votes: BTreeMap<NodeAlias, ViewChangeVote>,
}

impl NewView {
    /// Count the votes for `view` with correct signatures from active nodes of `pool`.
    pub fn valid_votes(&self, pool: &PoolState) -> usize {
        self.votes
            .iter()
            .filter(|(voter, vote)| {
                vote.target == self.view
                    && pool
                        .verkey(voter)
                        .map_or(false, |verkey| vote.is_correct(verkey))
            })
            .count()
    }

    /// The highest-viewed proposal among the votes that was prepared for `seq`, if any.
    pub fn highest_prepared(&self, seq: SeqNo) -> Option<&Proposal> {
        self.votes
            .values()
            .filter_map(|vote| vote.prepared.as_ref())
            .filter(|proposal| proposal.seq == seq)
            .max_by_key(|proposal| proposal.view)
    }
}

impl From<Proposal> for ConsensusMessage {
    fn from(value: Proposal) -> Self {
        ConsensusMessage::Proposal(value)
    }
}

impl From<CommitVote> for ConsensusMessage {
    fn from(value: CommitVote) -> Self {
        ConsensusMessage::CommitVote(value)
    }
}

impl From<ViewChangeVote> for ConsensusMessage {
    fn from(value: ViewChangeVote) -> Self {
        ConsensusMessage::ViewChangeVote(value)
    }
}

impl From<NewView> for ConsensusMessage {
    fn from(value: NewView) -> Self {
        ConsensusMessage::NewView(value)
    }
}
