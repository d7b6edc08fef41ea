/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the generic [`SignedMessage`] and [`Collector`] traits, and the collectors that turn
//! commit votes into [`CommitCertificate`]s and view change votes into [`NewView`]s.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{
    crypto_primitives::verify_signature,
    data_types::{CryptoHash, NodeAlias, SeqNo, SignatureBytes, VerifyingKeyBytes, ViewNumber},
    pool::PoolState,
};

use super::messages::{CommitCertificate, CommitVote, NewView, ViewChangeVote};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against a node's verifying key.
pub(crate) trait SignedMessage {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Verify that `signature_bytes` is a signature created by `verkey` over `message_bytes`.
    fn is_correct(&self, verkey: &VerifyingKeyBytes) -> bool {
        verify_signature(verkey, &self.message_bytes(), &self.signature_bytes())
    }
}

/// Collects [correct](SignedMessage::is_correct) signed messages from the active nodes of a pool into a
/// certificate.
pub(crate) trait Collector<S: SignedMessage, C> {
    fn new(pool: PoolState) -> Self;

    /// Replace the pool that signers are checked against. Signatures already collected from nodes that are
    /// no longer active stop counting.
    fn update_pool(&mut self, pool: PoolState);

    /// Collect `message` from `signer`, returning a certificate if this makes one.
    ///
    /// Messages from signers outside the pool, or with incorrect signatures, are ignored.
    fn collect(&mut self, signer: &NodeAlias, message: S) -> Option<C>;
}

/// Collects [`CommitVote`]s into [`CommitCertificate`]s.
///
/// Only the first vote of each signer for a given `(view, seq)` is collected, so a node that votes for two
/// different digests at the same height cannot contribute to both.
pub(crate) struct CommitVoteCollector {
    pool: PoolState,
    voted: BTreeMap<(ViewNumber, SeqNo), BTreeSet<NodeAlias>>,
    signature_sets: BTreeMap<(ViewNumber, SeqNo, CryptoHash), BTreeMap<NodeAlias, SignatureBytes>>,
}

impl CommitVoteCollector {
    /// Forget every vote for sequence numbers up to and including `executed`.
    pub(crate) fn prune(&mut self, executed: SeqNo) {
        self.voted.retain(|(_, seq), _| *seq > executed);
        self.signature_sets.retain(|(_, seq, _), _| *seq > executed);
    }

    fn certificate_for(&self, key: &(ViewNumber, SeqNo, CryptoHash)) -> Option<CommitCertificate> {
        let signatures: BTreeMap<NodeAlias, SignatureBytes> = self
            .signature_sets
            .get(key)?
            .iter()
            .filter(|(signer, _)| self.pool.contains(signer))
            .map(|(signer, signature)| (signer.clone(), *signature))
            .collect();

        if signatures.len() >= self.pool.quorums().commit {
            let (view, seq, digest) = *key;
            Some(CommitCertificate {
                view,
                seq,
                digest,
                signatures,
            })
        } else {
            None
        }
    }
}

impl Collector<CommitVote, CommitCertificate> for CommitVoteCollector {
    fn new(pool: PoolState) -> Self {
        Self {
            pool,
            voted: BTreeMap::new(),
            signature_sets: BTreeMap::new(),
        }
    }

    fn update_pool(&mut self, pool: PoolState) {
        self.pool = pool;
    }

    fn collect(&mut self, signer: &NodeAlias, vote: CommitVote) -> Option<CommitCertificate> {
        let verkey = self.pool.verkey(signer)?;
        if !vote.is_correct(verkey) {
            return None;
        }

        if !self
            .voted
            .entry((vote.view, vote.seq))
            .or_default()
            .insert(signer.clone())
        {
            return None;
        }

        let key = (vote.view, vote.seq, vote.digest);
        self.signature_sets
            .entry(key)
            .or_default()
            .insert(signer.clone(), vote.signature);

        let certificate = self.certificate_for(&key)?;
        self.signature_sets.remove(&key);
        Some(certificate)
    }
}

/// Collects [`ViewChangeVote`]s, grouped by target view, into [`NewView`]s.
pub(crate) struct ViewChangeVoteCollector {
    pool: PoolState,
    votes: BTreeMap<ViewNumber, BTreeMap<NodeAlias, ViewChangeVote>>,
}

impl ViewChangeVoteCollector {
    /// Count the votes for `target` from nodes that are active in the current pool.
    pub(crate) fn count(&self, target: ViewNumber) -> usize {
        self.votes.get(&target).map_or(0, |votes| {
            votes.keys().filter(|voter| self.pool.contains(voter)).count()
        })
    }

    /// Get the highest target above `view` that at least `f + 1` active nodes voted for, if any. At least one
    /// of these voters is honest, so joining its view change is safe.
    pub(crate) fn joinable(&self, view: ViewNumber) -> Option<ViewNumber> {
        let weak = self.pool.quorums().weak;
        self.votes
            .keys()
            .rev()
            .take_while(|target| **target > view)
            .find(|target| self.count(**target) >= weak)
            .copied()
    }

    /// Forget every vote for targets up to and including `view`.
    pub(crate) fn prune(&mut self, view: ViewNumber) {
        self.votes.retain(|target, _| *target > view);
    }

    fn new_view_for(&self, target: ViewNumber) -> Option<NewView> {
        let votes: BTreeMap<NodeAlias, ViewChangeVote> = self
            .votes
            .get(&target)?
            .iter()
            .filter(|(voter, _)| self.pool.contains(voter))
            .map(|(voter, vote)| (voter.clone(), vote.clone()))
            .collect();

        if votes.len() >= self.pool.quorums().view_change {
            Some(NewView {
                view: target,
                votes,
            })
        } else {
            None
        }
    }
}

impl Collector<ViewChangeVote, NewView> for ViewChangeVoteCollector {
    fn new(pool: PoolState) -> Self {
        Self {
            pool,
            votes: BTreeMap::new(),
        }
    }

    fn update_pool(&mut self, pool: PoolState) {
        self.pool = pool;
    }

    fn collect(&mut self, signer: &NodeAlias, vote: ViewChangeVote) -> Option<NewView> {
        let verkey = self.pool.verkey(signer)?;
        if !vote.is_correct(verkey) {
            return None;
        }

        let target = vote.target;
        self.votes
            .entry(target)
            .or_default()
            .insert(signer.clone(), vote);
        self.new_view_for(target)
    }
}
