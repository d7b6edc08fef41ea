/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the replication protocol described in the [module docs](super).
//!
//! Main type: [`Engine`].

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{mpsc::Sender, Arc, RwLock},
    time::{Instant, SystemTime},
};

use crate::{
    camera::ReplicaStatus,
    catchup::messages::{CatchupRequest, CatchupResponse},
    config::EngineConfiguration,
    errors::ProtocolSafetyError,
    events::*,
    networking::{
        messages::ReplyMessage,
        network::{Network, PeerId, PoolUpdateHandle},
        sending::SenderHandle,
    },
    state::ReplicatedState,
    store::{
        kv_store::{KVGetError, KVSetError, KVStore, StoreError},
        write_batch::LedgerWriteBatch,
        LedgerEntry,
    },
    types::{
        data_types::{CryptoHash, NodeAlias, SeqNo, ViewNumber},
        pool::PoolState,
        request::{Operation, Outcome, Request},
    },
    view_change::{
        next_view_with_new_primary, select_primary, ReplicaMode, ViewChangeReason, ViewState,
    },
};

use super::{
    collectors::{Collector, CommitVoteCollector, SignedMessage, ViewChangeVoteCollector},
    messages::{
        batch_digest, CommitCertificate, CommitVote, ConsensusMessage, NewView, Proposal,
        ViewChangeVote,
    },
};

/// Proposals and votes for sequence numbers further than this past the next one are not buffered.
const FUTURE_SEQ_WINDOW: u64 = 256;

/// Number of ledger entries read from the store at a time when replaying it.
const REPLAY_CHUNK: usize = 256;

/// A single replica's participant in the replication protocol.
///
/// # Usage
///
/// `Engine` is driven by the [algorithm thread](crate::algorithm), which calls:
/// 1. [`recover`](Self::recover) once, before anything else.
/// 2. [`on_receive_request`](Self::on_receive_request) for every client request.
/// 3. [`on_receive_msg`](Self::on_receive_msg) for every [`ConsensusMessage`] relevant in the current view.
/// 4. [`on_receive_catchup_response`](Self::on_receive_catchup_response) for every catch-up response.
/// 5. [`tick`](Self::tick) regularly, to fire timers.
///
/// The methods that return a `Result` fail only with an [`EngineError`], after which the algorithm thread
/// [halts](Self::halt) the engine.
pub(crate) struct Engine<N: Network, K: KVStore> {
    config: EngineConfiguration,
    state: Arc<RwLock<ReplicatedState>>,
    status: Arc<RwLock<ReplicaStatus>>,
    store: K,
    pool: PoolState,
    view_state: ViewState,
    mode: ReplicaMode,
    view_change: Option<ViewChangeProgress>,
    commit_votes: CommitVoteCollector,
    view_change_votes: ViewChangeVoteCollector,
    pending: VecDeque<PendingRequest>,
    reply_to: HashMap<CryptoHash, BTreeSet<PeerId>>,
    proposals: BTreeMap<SeqNo, Vec<(NodeAlias, Proposal)>>,
    certificates: BTreeMap<SeqNo, CommitCertificate>,
    future_votes: BTreeMap<SeqNo, Vec<(NodeAlias, CommitVote)>>,
    my_votes: BTreeMap<SeqNo, (ViewNumber, CryptoHash)>,
    prepared: Option<Proposal>,
    in_flight: Option<SeqNo>,
    highest_known: SeqNo,
    behind_since: Option<Instant>,
    last_catchup_request: Option<Instant>,
    sender: SenderHandle<N>,
    pool_update_handle: PoolUpdateHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, K: KVStore> Engine<N, K> {
    pub(crate) fn new(
        config: EngineConfiguration,
        state: Arc<RwLock<ReplicatedState>>,
        status: Arc<RwLock<ReplicaStatus>>,
        store: K,
        network: N,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        // Safety: the algorithm thread is the only writer of `state`, and never panics while holding the lock.
        let pool = state.read().unwrap().pool().pool_state();
        Self {
            config,
            state,
            status,
            store,
            view_state: ViewState::new(ViewNumber::init(), &pool),
            mode: ReplicaMode::Following,
            view_change: None,
            commit_votes: CommitVoteCollector::new(pool.clone()),
            view_change_votes: ViewChangeVoteCollector::new(pool.clone()),
            pool,
            pending: VecDeque::new(),
            reply_to: HashMap::new(),
            proposals: BTreeMap::new(),
            certificates: BTreeMap::new(),
            future_votes: BTreeMap::new(),
            my_votes: BTreeMap::new(),
            prepared: None,
            in_flight: None,
            highest_known: SeqNo::genesis(),
            behind_since: None,
            last_catchup_request: None,
            sender: SenderHandle::new(network.clone()),
            pool_update_handle: PoolUpdateHandle::new(network),
            event_publisher,
        }
    }

    /// Rebuild the replicated state by re-executing every entry in the store, enter the latest view the
    /// store knows of, and ask peers for whatever was committed since.
    pub(crate) fn recover(&mut self) -> Result<(), EngineError> {
        let mut latest_view = ViewNumber::init();
        let state_lock = Arc::clone(&self.state);
        {
            let mut state = state_lock.write().unwrap();
            loop {
                let entries = self
                    .store
                    .ledger_entries(state.last_executed().next(), REPLAY_CHUNK)?;
                if entries.is_empty() {
                    break;
                }
                for entry in entries {
                    let mut primary = select_primary(entry.view, &state.pool().pool_state());
                    for request in &entry.batch {
                        if state.execute(request, entry.seq, primary.as_ref()).membership.is_some() {
                            primary = select_primary(entry.view, &state.pool().pool_state());
                        }
                    }
                    state.commit_batch(entry.seq, &batch_digest(entry.seq, &entry.batch));
                    latest_view = latest_view.max(entry.view);
                }
            }
        }

        if let Some(new_view) = self.store.latest_new_view()? {
            latest_view = latest_view.max(new_view.view);
        }

        let pool = self.state.read().unwrap().pool().pool_state();
        if latest_view > self.view_state.view {
            let _ = self.view_state.update(latest_view, &pool, BTreeSet::new());
        }
        self.on_pool_updated(pool);
        self.mode = self.normal_mode();

        let last_executed = self.last_executed();
        if last_executed > SeqNo::genesis() {
            log::info!(
                "{} replayed its ledger up to {} in view {}",
                self.config.me,
                last_executed,
                self.view_state.view
            );
        }
        self.update_status();
        self.request_catchup();
        Ok(())
    }

    pub(crate) fn view(&self) -> ViewNumber {
        self.view_state.view
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.mode == ReplicaMode::Halted
    }

    /// Stop participating in the protocol after `error`.
    pub(crate) fn halt(&mut self, error: EngineError) {
        log::error!("{} halted: {}", self.config.me, error);
        if let EngineError::Safety(error) = error {
            Event::SafetyViolation(SafetyViolationEvent {
                timestamp: SystemTime::now(),
                error,
            })
            .publish(&self.event_publisher);
        }
        self.mode = ReplicaMode::Halted;
        self.view_change = None;
        self.update_status();
    }

    /// Queue `request` for ordering, or answer it right away if it was executed before.
    pub(crate) fn on_receive_request(&mut self, origin: PeerId, request: Request) {
        let digest = request.digest();
        let executed = self.state.read().unwrap().outcome_of(&digest).cloned();
        if let Some(outcome) = executed {
            self.sender.send(
                origin,
                ReplyMessage::Reply {
                    digest,
                    outcome,
                    f: self.pool.quorums().f as u64,
                },
            );
            return;
        }

        self.reply_to.entry(digest).or_default().insert(origin);
        if !self.pending.iter().any(|pending| pending.digest == digest) {
            self.pending.push_back(PendingRequest {
                digest,
                request,
                received: Instant::now(),
            });
        }
    }

    pub(crate) fn on_receive_msg(
        &mut self,
        origin: NodeAlias,
        msg: ConsensusMessage,
    ) -> Result<(), EngineError> {
        match msg {
            ConsensusMessage::Proposal(proposal) => self.on_receive_proposal(origin, proposal),
            ConsensusMessage::CommitVote(vote) => self.on_receive_commit_vote(origin, vote),
            ConsensusMessage::ViewChangeVote(vote) => self.on_receive_view_change_vote(origin, vote),
            ConsensusMessage::NewView(new_view) => self.on_receive_new_view(new_view),
        }
    }

    /// Apply the certified entries in `response` that extend the local ledger, then install the view the
    /// responder is in if enough active nodes vouch for it.
    pub(crate) fn on_receive_catchup_response(
        &mut self,
        origin: NodeAlias,
        response: CatchupResponse,
    ) -> Result<(), EngineError> {
        if origin == self.config.me {
            return Ok(());
        }

        let mut applied = 0;
        for entry in response.entries {
            let next = self.next_seq();
            if entry.seq < next {
                self.check_executed(&entry.certificate)?;
                continue;
            }
            if entry.seq > next {
                break;
            }

            let certified = entry.certificate.seq == entry.seq
                && entry.certificate.digest == batch_digest(entry.seq, &entry.batch)
                && entry.certificate.is_correct(&self.pool);
            if !certified {
                log::warn!(
                    "{} sent entry {} without a valid commit certificate",
                    origin,
                    entry.seq
                );
                break;
            }
            self.execute_batch(
                entry.view,
                entry.batch,
                entry.certificate,
                ExecutionSource::Catchup,
            )?;
            applied += 1;
        }

        // A responder may be a pool member that is not active at our height, so `f + 1` valid votes are
        // required rather than a full view change quorum.
        if let Some(new_view) = response.new_view {
            if new_view.view > self.view_state.view
                && new_view.valid_votes(&self.pool) >= self.pool.quorums().weak
            {
                self.install_view(new_view)?;
            }
        }

        if applied > 0 {
            Event::EndCatchup(EndCatchupEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                applied,
                last_executed: self.last_executed(),
            })
            .publish(&self.event_publisher);
            self.try_vote();
            self.try_execute()?;
        }
        Ok(())
    }

    /// Fire the timers of the protocol:
    /// 1. Re-broadcast the vote of an unfinished view change, or escalate it.
    /// 2. Start a view change if the oldest pending request waited longer than the primary timeout.
    /// 3. Propose the next batch if this replica is the primary and nothing is in flight.
    /// 4. Ask peers for missing entries if this replica has been behind for longer than the grace period.
    pub(crate) fn tick(&mut self) {
        let now = Instant::now();

        // 1. View change retry window.
        if let Some(progress) = self.view_change {
            if now.duration_since(progress.last_broadcast) >= self.config.view_change_timeout {
                if progress.retries < self.config.view_change_max_retries {
                    self.view_change = Some(ViewChangeProgress {
                        retries: progress.retries + 1,
                        last_broadcast: now,
                        ..progress
                    });
                    self.broadcast_view_change_vote(progress.target);
                } else {
                    let outgoing = select_primary(progress.target, &self.pool);
                    let escalated =
                        next_view_with_new_primary(progress.target, outgoing.as_ref(), &self.pool);
                    self.start_view_change(escalated, ViewChangeReason::Escalated);
                }
            }
        }

        // 2. Primary timeout.
        if matches!(self.mode, ReplicaMode::Following | ReplicaMode::Primary)
            && self.pool.contains(&self.config.me)
        {
            let timed_out = self.pending.front().map_or(false, |oldest| {
                now.duration_since(oldest.received) >= self.config.primary_timeout
            });
            if timed_out {
                Event::PrimaryTimeout(PrimaryTimeoutEvent {
                    timestamp: SystemTime::now(),
                    view: self.view_state.view,
                    timeout: self.config.primary_timeout,
                })
                .publish(&self.event_publisher);
                let target = next_view_with_new_primary(
                    self.view_state.view,
                    self.view_state.primary.as_ref(),
                    &self.pool,
                );
                self.start_view_change(target, ViewChangeReason::PrimaryTimeout);
            }
        }

        // 3. Propose.
        if self.mode == ReplicaMode::Primary && self.in_flight.is_none() && !self.pending.is_empty() {
            let batch = self
                .pending
                .iter()
                .take(self.config.max_batch_size)
                .map(|pending| pending.request.clone())
                .collect();
            self.propose(batch);
        }

        // 4. Catch-up.
        if self.highest_known > self.last_executed() {
            let behind_since = *self.behind_since.get_or_insert(now);
            let throttled = self.last_catchup_request.map_or(false, |requested| {
                now.duration_since(requested) < self.config.view_change_timeout
            });
            if now.duration_since(behind_since) >= self.config.catchup_grace && !throttled {
                self.request_catchup();
            }
        } else {
            self.behind_since = None;
        }
    }

    fn on_receive_proposal(
        &mut self,
        origin: NodeAlias,
        proposal: Proposal,
    ) -> Result<(), EngineError> {
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin: origin.clone(),
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        let next = self.next_seq();
        if proposal.seq < next {
            return Ok(());
        }
        match self.pool.verkey(&origin) {
            Some(verkey) if proposal.is_correct(verkey) => (),
            _ => return Ok(()),
        }

        self.view_state.suspected.remove(&origin);
        self.highest_known = self.highest_known.max(SeqNo::new(proposal.seq.int() - 1));
        if proposal.seq.int() > next.int() + FUTURE_SEQ_WINDOW {
            return Ok(());
        }

        let proposals = self.proposals.entry(proposal.seq).or_default();
        if let Some((_, existing)) = proposals
            .iter()
            .find(|(sender, existing)| *sender == origin && existing.view == proposal.view)
        {
            if existing.digest() != proposal.digest() {
                log::warn!(
                    "{} proposed two different batches for {} in view {}",
                    origin,
                    proposal.seq,
                    proposal.view
                );
            }
            return Ok(());
        }
        proposals.push((origin, proposal));

        self.try_vote();
        self.try_execute()
    }

    fn on_receive_commit_vote(&mut self, origin: NodeAlias, vote: CommitVote) -> Result<(), EngineError> {
        match self.pool.verkey(&origin) {
            Some(verkey) if vote.is_correct(verkey) => (),
            _ => return Ok(()),
        }
        self.view_state.suspected.remove(&origin);

        let next = self.next_seq();
        if vote.seq > next {
            self.highest_known = self.highest_known.max(SeqNo::new(vote.seq.int() - 1));
            if vote.seq.int() <= next.int() + FUTURE_SEQ_WINDOW {
                self.future_votes.entry(vote.seq).or_default().push((origin, vote));
            }
            return Ok(());
        }

        if let Some(certificate) = self.commit_votes.collect(&origin, vote) {
            self.on_collect_certificate(certificate)?;
        }
        self.try_execute()
    }

    fn on_collect_certificate(&mut self, certificate: CommitCertificate) -> Result<(), EngineError> {
        Event::CollectCertificate(CollectCertificateEvent {
            timestamp: SystemTime::now(),
            certificate: certificate.clone(),
        })
        .publish(&self.event_publisher);

        if certificate.seq <= self.last_executed() {
            return self.check_executed(&certificate);
        }
        self.highest_known = self.highest_known.max(certificate.seq);
        self.certificates.entry(certificate.seq).or_insert(certificate);
        Ok(())
    }

    /// Check that `certificate` does not certify a batch other than the one executed at its sequence number.
    fn check_executed(&self, certificate: &CommitCertificate) -> Result<(), EngineError> {
        if let Some(entry) = self.store.ledger_entry(certificate.seq)? {
            if entry.certificate.digest != certificate.digest && certificate.is_correct(&self.pool) {
                return Err(ProtocolSafetyError::ConflictingCommit {
                    seq: certificate.seq,
                    executed: entry.certificate.digest,
                    certified: certificate.digest,
                }
                .into());
            }
        }
        Ok(())
    }

    fn on_receive_view_change_vote(
        &mut self,
        origin: NodeAlias,
        vote: ViewChangeVote,
    ) -> Result<(), EngineError> {
        Event::ReceiveViewChangeVote(ReceiveViewChangeVoteEvent {
            timestamp: SystemTime::now(),
            origin: origin.clone(),
            target: vote.target,
        })
        .publish(&self.event_publisher);

        match self.pool.verkey(&origin) {
            Some(verkey) if vote.is_correct(verkey) => (),
            _ => return Ok(()),
        }

        // Replicas that executed the same prefix of the ledger must hold the same state.
        let (last_executed, ledger_root) = self.progress();
        if vote.last_executed == last_executed
            && (vote.ledger_root != ledger_root || vote.active_count as usize != self.pool.len())
        {
            return Err(ProtocolSafetyError::DivergentState {
                peer: origin,
                seq: last_executed,
                peer_root: vote.ledger_root,
                peer_active: vote.active_count,
            }
            .into());
        }
        self.highest_known = self.highest_known.max(vote.last_executed);

        if let Some(new_view) = self.view_change_votes.collect(&origin, vote) {
            return self.install_view(new_view);
        }
        if let Some(target) = self.view_change_votes.joinable(self.view_state.view) {
            self.start_view_change(target, ViewChangeReason::Joined);
        }
        Ok(())
    }

    fn on_receive_new_view(&mut self, new_view: NewView) -> Result<(), EngineError> {
        if new_view.valid_votes(&self.pool) >= self.pool.quorums().view_change.max(1) {
            self.install_view(new_view)?;
        }
        Ok(())
    }

    /// Vote for the current primary's proposal for the next sequence number, if this replica is an active node
    /// that has not voted for it in this view yet.
    fn try_vote(&mut self) {
        if !matches!(self.mode, ReplicaMode::Following | ReplicaMode::Primary)
            || !self.pool.contains(&self.config.me)
        {
            return;
        }

        let next = self.next_seq();
        let view = self.view_state.view;
        if matches!(self.my_votes.get(&next), Some((voted_view, _)) if *voted_view >= view) {
            return;
        }

        let proposal = match (&self.view_state.primary, self.proposals.get(&next)) {
            (Some(primary), Some(proposals)) => proposals
                .iter()
                .find(|(origin, proposal)| origin == primary && proposal.view == view)
                .map(|(_, proposal)| proposal.clone()),
            _ => None,
        };
        if let Some(proposal) = proposal {
            let digest = proposal.digest();
            let vote = CommitVote::new(&self.config.keypair, view, next, digest);
            self.sender.broadcast(vote);
            self.my_votes.insert(next, (view, digest));
            self.prepared = Some(proposal);

            Event::CommitVote(CommitVoteEvent {
                timestamp: SystemTime::now(),
                vote,
            })
            .publish(&self.event_publisher);
        }
    }

    /// Execute batches, in sequence order, for as long as the next one is both certified and known.
    fn try_execute(&mut self) -> Result<(), EngineError> {
        loop {
            let next = self.next_seq();
            if let Some(votes) = self.future_votes.remove(&next) {
                for (origin, vote) in votes {
                    if let Some(certificate) = self.commit_votes.collect(&origin, vote) {
                        self.on_collect_certificate(certificate)?;
                    }
                }
            }

            let certificate = match self.certificates.get(&next) {
                Some(certificate) => certificate.clone(),
                None => return Ok(()),
            };
            let proposal = match self.proposals.get(&next).and_then(|proposals| {
                proposals
                    .iter()
                    .find(|(_, proposal)| proposal.digest() == certificate.digest)
            }) {
                Some((_, proposal)) => proposal.clone(),
                None => return Ok(()),
            };

            self.execute_batch(
                proposal.view,
                proposal.batch,
                certificate,
                ExecutionSource::Consensus,
            )?;
            self.try_vote();
        }
    }

    /// Execute the certified `batch` at the next sequence number, persist it, and answer the clients waiting for
    /// its requests.
    ///
    /// Every membership change in the batch is evaluated against the view change policy on its own. Each one
    /// that requires a view change moves the target past the primary the previous target would have installed.
    fn execute_batch(
        &mut self,
        view: ViewNumber,
        batch: Vec<Request>,
        certificate: CommitCertificate,
        source: ExecutionSource,
    ) -> Result<(), EngineError> {
        let seq = certificate.seq;
        let digest = certificate.digest;
        let mut view_changes: Vec<(ViewNumber, ViewChangeReason)> = Vec::new();
        let mut membership_changed = false;

        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().unwrap();
        let mut primary = select_primary(view, &state.pool().pool_state());
        for request in &batch {
            let pool_before = match request.operation {
                Operation::Node { .. } => Some(state.pool().pool_state()),
                _ => None,
            };
            let execution = state.execute(request, seq, primary.as_ref());
            let f = state.pool().quorums().f as u64;

            self.pending.retain(|pending| pending.digest != execution.digest);
            for peer in self.reply_to.remove(&execution.digest).into_iter().flatten() {
                self.sender.send(
                    peer,
                    ReplyMessage::Reply {
                        digest: execution.digest,
                        outcome: execution.outcome.clone(),
                        f,
                    },
                );
            }

            if let Outcome::Reject(reason) = &execution.outcome {
                Event::RejectTransaction(RejectTransactionEvent {
                    timestamp: SystemTime::now(),
                    seq,
                    digest: execution.digest,
                    reason: reason.clone(),
                })
                .publish(&self.event_publisher);
            }

            if let (Some(result), Some(pool_before)) = (execution.membership, pool_before) {
                membership_changed = true;
                let pool_after = state.pool().pool_state();
                if let Some(reason) = self.config.view_change_policy.evaluate(&result) {
                    let base = view_changes
                        .last()
                        .map_or(self.view_state.view, |(target, _)| *target);
                    let outgoing = select_primary(base, &pool_before);
                    let target = next_view_with_new_primary(base, outgoing.as_ref(), &pool_after);
                    view_changes.push((target, reason));
                }
                primary = select_primary(view, &pool_after);

                Event::UpdatePool(UpdatePoolEvent {
                    timestamp: SystemTime::now(),
                    seq,
                    result,
                })
                .publish(&self.event_publisher);
            }
        }
        state.commit_batch(seq, &digest);
        let ledger_root = state.ledger_root();
        let pool = state.pool().pool_state();
        drop(state);

        let entry = LedgerEntry {
            seq,
            view,
            batch,
            certificate,
            ledger_root,
        };
        let mut write_batch = LedgerWriteBatch::<K::WriteBatch>::new();
        write_batch.append_entry(&entry)?;
        self.store.write(write_batch.0);

        Event::CommitBatch(CommitBatchEvent {
            timestamp: SystemTime::now(),
            seq,
            view,
            digest,
            requests: entry.batch.len(),
            ledger_root,
        })
        .publish(&self.event_publisher);

        self.proposals.retain(|proposed, _| *proposed > seq);
        self.certificates.retain(|certified, _| *certified > seq);
        self.future_votes.retain(|voted, _| *voted > seq);
        self.my_votes.retain(|voted, _| *voted > seq);
        self.commit_votes.prune(seq);
        if self.prepared.as_ref().map_or(false, |prepared| prepared.seq <= seq) {
            self.prepared = None;
        }
        if self.in_flight.map_or(false, |in_flight| in_flight <= seq) {
            self.in_flight = None;
        }
        if membership_changed {
            self.on_pool_updated(pool);
        }
        self.update_status();

        // Entries applied through catch-up carry the view the rest of the pool moved on to separately.
        if source == ExecutionSource::Consensus {
            for (target, reason) in view_changes {
                self.start_view_change(target, reason);
            }
        }
        Ok(())
    }

    fn start_view_change(&mut self, target: ViewNumber, reason: ViewChangeReason) {
        if target <= self.view_state.view
            || self
                .view_change
                .map_or(false, |progress| target <= progress.target)
        {
            return;
        }

        Event::StartViewChange(StartViewChangeEvent {
            timestamp: SystemTime::now(),
            view: self.view_state.view,
            target,
            reason,
        })
        .publish(&self.event_publisher);

        self.view_change = Some(ViewChangeProgress {
            target,
            retries: 0,
            last_broadcast: Instant::now(),
        });
        self.mode = ReplicaMode::ViewChanging;
        self.broadcast_view_change_vote(target);
        self.update_status();
    }

    fn broadcast_view_change_vote(&mut self, target: ViewNumber) {
        if !self.pool.contains(&self.config.me) {
            return;
        }
        let (last_executed, ledger_root) = self.progress();
        let vote = ViewChangeVote::new(
            &self.config.keypair,
            target,
            last_executed,
            ledger_root,
            self.pool.len() as u32,
            self.prepared.clone(),
        );
        self.sender.broadcast(vote.clone());

        Event::ViewChangeVote(ViewChangeVoteEvent {
            timestamp: SystemTime::now(),
            vote,
        })
        .publish(&self.event_publisher);
    }

    /// Enter the view `new_view` carries. Active nodes that did not vote for it are suspected in it.
    fn install_view(&mut self, new_view: NewView) -> Result<(), EngineError> {
        let suspected: BTreeSet<NodeAlias> = self
            .pool
            .aliases()
            .filter(|alias| !new_view.votes.contains_key(*alias))
            .cloned()
            .collect();
        if self
            .view_state
            .update(new_view.view, &self.pool, suspected)
            .is_err()
        {
            return Ok(());
        }

        let mut write_batch = LedgerWriteBatch::<K::WriteBatch>::new();
        write_batch.set_latest_new_view(&new_view)?;
        self.store.write(write_batch.0);

        self.view_change = None;
        self.view_change_votes.prune(new_view.view);
        self.mode = self.normal_mode();
        self.in_flight = None;
        {
            let state = self.state.read().unwrap();
            prune_awaited(&mut self.pending, &mut self.reply_to, |digest| {
                state.outcome_of(digest).is_some()
            });
        }
        let now = Instant::now();
        self.pending
            .iter_mut()
            .for_each(|pending| pending.received = now);

        Event::StartView(StartViewEvent {
            timestamp: SystemTime::now(),
            view: self.view_state.view,
            primary: self.view_state.primary.clone(),
            suspected: self.view_state.suspected.iter().cloned().collect(),
        })
        .publish(&self.event_publisher);

        if self.mode == ReplicaMode::Primary {
            let reproposal = new_view
                .highest_prepared(self.next_seq())
                .map(|prepared| prepared.batch.clone());
            self.sender.broadcast(new_view);
            if let Some(batch) = reproposal {
                self.propose(batch);
            }
        }

        self.try_vote();
        self.update_status();
        Ok(())
    }

    fn propose(&mut self, batch: Vec<Request>) {
        let proposal = Proposal::new(
            &self.config.keypair,
            self.view_state.view,
            self.next_seq(),
            batch,
        );
        self.in_flight = Some(proposal.seq);
        self.sender.broadcast(proposal.clone());

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            proposal,
        })
        .publish(&self.event_publisher);
    }

    fn request_catchup(&mut self) {
        let from = self.next_seq();
        self.sender.broadcast(CatchupRequest {
            from,
            limit: self.config.catchup_request_limit,
        });
        self.last_catchup_request = Some(Instant::now());

        Event::StartCatchup(StartCatchupEvent {
            timestamp: SystemTime::now(),
            from,
        })
        .publish(&self.event_publisher);
    }

    /// Propagate a changed pool to the network, the collectors, and the current view's primary.
    fn on_pool_updated(&mut self, pool: PoolState) {
        self.pool_update_handle.update_pool(&pool);
        self.commit_votes.update_pool(pool.clone());
        self.view_change_votes.update_pool(pool.clone());
        self.view_state.refresh_primary(&pool);
        self.view_state.suspected.retain(|alias| pool.contains(alias));
        self.pool = pool;
        if matches!(self.mode, ReplicaMode::Following | ReplicaMode::Primary) {
            self.mode = self.normal_mode();
        }
    }

    fn normal_mode(&self) -> ReplicaMode {
        if self.view_state.is_primary(&self.config.me) {
            ReplicaMode::Primary
        } else {
            ReplicaMode::Following
        }
    }

    fn last_executed(&self) -> SeqNo {
        self.state.read().unwrap().last_executed()
    }

    fn next_seq(&self) -> SeqNo {
        self.last_executed().next()
    }

    fn progress(&self) -> (SeqNo, CryptoHash) {
        let state = self.state.read().unwrap();
        (state.last_executed(), state.ledger_root())
    }

    fn update_status(&self) {
        let (last_executed, ledger_root) = self.progress();
        let status = ReplicaStatus {
            alias: self.config.me.clone(),
            mode: self.mode,
            view: self.view_state.view,
            primary: self.view_state.primary.clone(),
            last_executed,
            ledger_root,
            active: self.pool.aliases().cloned().collect(),
            suspected: self.view_state.suspected.iter().cloned().collect(),
            f: self.pool.quorums().f,
        };
        *self.status.write().unwrap() = status;
    }
}

/// Drop the pending requests `executed` already, then forget the clients of every request that is no longer
/// pending.
fn prune_awaited(
    pending: &mut VecDeque<PendingRequest>,
    reply_to: &mut HashMap<CryptoHash, BTreeSet<PeerId>>,
    executed: impl Fn(&CryptoHash) -> bool,
) {
    pending.retain(|pending| !executed(&pending.digest));
    reply_to.retain(|digest, _| pending.iter().any(|pending| &pending.digest == digest));
}

/// A client request waiting to be executed.
struct PendingRequest {
    digest: CryptoHash,
    request: Request,
    received: Instant,
}

/// An unfinished view change.
#[derive(Clone, Copy)]
struct ViewChangeProgress {
    target: ViewNumber,
    retries: u32,
    last_broadcast: Instant,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ExecutionSource {
    Consensus,
    Catchup,
}

/// The ways the engine can fail. Either one halts the replica.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ledger store failure: {0}")]
    Store(#[from] StoreError),

    #[error("protocol safety violation: {0}")]
    Safety(#[from] ProtocolSafetyError),
}

impl From<KVGetError> for EngineError {
    fn from(value: KVGetError) -> Self {
        EngineError::Store(value.into())
    }
}

impl From<KVSetError> for EngineError {
    fn from(value: KVSetError) -> Self {
        EngineError::Store(value.into())
    }
}
