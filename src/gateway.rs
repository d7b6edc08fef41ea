/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The client side of the pool: submits requests and reads, and decides which replies to trust.
//!
//! A [`Gateway`] owns one client endpoint of the [`Network`]. Its dispatcher thread receives the replies of
//! every replica and tallies them. An outcome (or a read answer) is accepted once `f + 1` replicas returned
//! it, so at least one of them is honest. `f` is the largest of:
//! - the fault tolerance reported by any reply in the tally, matching or not.
//! - the gateway's floor: the fault tolerance of the pool as last read from an accepted `GetPool` or
//!   `GetViewInfo` answer, or the configured initial value before any such read.
//!
//! A single reply therefore never decides an outcome for a pool that tolerates a fault.
//!
//! ## Submitting
//!
//! [`Gateway::submit`] returns a [`ReplyTicket`] right away. Requests that cannot possibly be executed (an
//! endorsed request missing a signature, or a request without its builder's signature) are rejected
//! locally, without being broadcast. Waiting on a ticket is bounded by the caller's timeout, and a timeout
//! is a retryable [`GatewayError::NoReply`]: the request may still be committed, and submitting it again is
//! safe because nothing executes the same digest twice.
//!
//! Dropping a ticket only abandons interest in the outcome. It never withdraws the request from the pool.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    config::GatewayConfiguration,
    errors::{AuthorizationError, GatewayError},
    quorum::max_faulty,
    networking::{
        messages::{ClientMessage, Message, ReplyMessage},
        network::{Network, PeerId},
        sending::SenderHandle,
    },
    types::{
        data_types::{CryptoHash, NodeAlias},
        request::{EndorsementState, Outcome, ReadAnswer, ReadQuery, RejectReason, Request},
    },
};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A client's handle on a pool.
pub struct Gateway<N: Network + 'static> {
    config: GatewayConfiguration,
    network: N,
    state: Arc<Mutex<GatewayState>>,
    next_query_id: AtomicU64,
    dispatcher: Option<JoinHandle<()>>,
    dispatcher_shutdown: Sender<()>,
}

impl<N: Network + 'static> Gateway<N> {
    /// Start a gateway on `network`, which must be a client endpoint.
    pub fn new(network: N, config: GatewayConfiguration) -> Self {
        let state = Arc::new(Mutex::new(GatewayState::new(config.initial_fault_tolerance)));
        let (dispatcher_shutdown, shutdown_receiver) = mpsc::channel();
        let dispatcher = start_dispatcher(
            network.clone(),
            Arc::clone(&state),
            config.dedup_window,
            shutdown_receiver,
        );

        Self {
            config,
            network,
            state,
            next_query_id: AtomicU64::new(0),
            dispatcher: Some(dispatcher),
            dispatcher_shutdown,
        }
    }

    /// Submit `request` to every replica of the pool.
    ///
    /// An exact duplicate of a request whose outcome was accepted within the deduplication window gets the
    /// original outcome without being broadcast again.
    pub fn submit(&self, request: Request) -> ReplyTicket {
        let digest = request.digest();
        let (sender, receiver) = mpsc::channel();
        let ticket = ReplyTicket {
            digest,
            receiver,
            outcome: None,
        };

        if let Some(reason) = local_rejection(&request) {
            log::debug!("rejected {} without submitting it: {:?}", digest, reason);
            let _ = sender.send(Outcome::Reject(reason));
            return ticket;
        }

        {
            // Safety: the dispatcher never panics while holding the lock.
            let mut state = self.state.lock().unwrap();
            state.prune_completed(self.config.dedup_window);
            if let Some((outcome, _)) = state.completed.get(&digest) {
                let _ = sender.send(outcome.clone());
                return ticket;
            }
            state
                .submissions
                .entry(digest)
                .or_default()
                .waiters
                .push(sender);
        }

        SenderHandle::new(self.network.clone()).broadcast(ClientMessage::Request(request));
        ticket
    }

    /// The fault tolerance below which this gateway never lowers its bar for accepting replies.
    pub fn fault_tolerance_floor(&self) -> u64 {
        self.state.lock().unwrap().fault_tolerance
    }

    /// Ask every replica `query`, and wait up to `timeout` for `f + 1` matching answers.
    pub fn read(&self, query: ReadQuery, timeout: Duration) -> Result<ReadAnswer, GatewayError> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();
        self.state.lock().unwrap().reads.insert(
            query_id,
            ReadTally {
                replies: BTreeMap::new(),
                waiter: sender,
            },
        );

        SenderHandle::new(self.network.clone()).broadcast(ClientMessage::Read { query_id, query });

        let result = match receiver.recv_timeout(timeout) {
            Ok(answer) => Ok(answer),
            Err(RecvTimeoutError::Timeout) => Err(GatewayError::NoReply { waited: timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(GatewayError::Closed),
        };
        self.state.lock().unwrap().reads.remove(&query_id);
        result
    }
}

impl<N: Network + 'static> Drop for Gateway<N> {
    fn drop(&mut self) {
        let _ = self.dispatcher_shutdown.send(());
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.join().unwrap();
        }
        // Close every outstanding ticket.
        if let Ok(mut state) = self.state.lock() {
            state.submissions.clear();
            state.reads.clear();
        }
    }
}

/// A claim on the outcome of a submitted request.
pub struct ReplyTicket {
    digest: CryptoHash,
    receiver: Receiver<Outcome>,
    outcome: Option<Outcome>,
}

impl ReplyTicket {
    /// The digest of the submitted request.
    pub fn digest(&self) -> CryptoHash {
        self.digest
    }

    /// Wait up to `timeout` for the accepted outcome. Once an outcome was returned, every later call returns
    /// it immediately.
    pub fn wait(&mut self, timeout: Duration) -> Result<Outcome, GatewayError> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => {
                self.outcome = Some(outcome.clone());
                Ok(outcome)
            }
            Err(RecvTimeoutError::Timeout) => Err(GatewayError::NoReply { waited: timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(GatewayError::Closed),
        }
    }
}

/// Get the reason `request` would be rejected by every replica before ordering, if any.
fn local_rejection(request: &Request) -> Option<RejectReason> {
    let missing = match request.endorsement_state() {
        EndorsementState::AwaitingSignatures { missing } => missing.into_iter().next(),
        EndorsementState::Unendorsed | EndorsementState::Ready => None,
    }
    .or_else(|| {
        (!request.signatures.contains_key(&request.identifier))
            .then(|| request.identifier.clone())
    });

    missing.map(|did| RejectReason::Authorization(AuthorizationError::MissingSignature { did }))
}

struct GatewayState {
    submissions: HashMap<CryptoHash, Submission>,
    completed: HashMap<CryptoHash, (Outcome, Instant)>,
    reads: HashMap<u64, ReadTally>,
    fault_tolerance: u64,
}

impl GatewayState {
    fn new(fault_tolerance: u64) -> Self {
        Self {
            submissions: HashMap::new(),
            completed: HashMap::new(),
            reads: HashMap::new(),
            fault_tolerance,
        }
    }

    fn prune_completed(&mut self, dedup_window: Duration) {
        self.completed
            .retain(|_, (_, accepted)| accepted.elapsed() < dedup_window);
    }

    /// Track the size of the pool as told by an accepted answer.
    fn on_accepted_answer(&mut self, answer: &ReadAnswer) {
        let active = match answer {
            ReadAnswer::Pool(records) => records.iter().filter(|record| record.is_active()).count(),
            ReadAnswer::ViewInfo { active, .. } => active.len(),
            ReadAnswer::Nym(_) | ReadAnswer::Write(_) => return,
        };
        let fault_tolerance = max_faulty(active) as u64;
        if fault_tolerance != self.fault_tolerance {
            log::debug!(
                "pool fault tolerance changed from {} to {}",
                self.fault_tolerance,
                fault_tolerance
            );
            self.fault_tolerance = fault_tolerance;
        }
    }
}

#[derive(Default)]
struct Submission {
    replies: BTreeMap<NodeAlias, (Outcome, u64)>,
    waiters: Vec<Sender<Outcome>>,
}

struct ReadTally {
    replies: BTreeMap<NodeAlias, (ReadAnswer, u64)>,
    waiter: Sender<ReadAnswer>,
}

/// Find a reply that `f + 1` replicas agree on, where `f` is the largest of `floor` and the fault tolerance
/// reported by any reply.
fn agreed<T: PartialEq + Clone>(replies: &BTreeMap<NodeAlias, (T, u64)>, floor: u64) -> Option<T> {
    let f = replies.values().map(|(_, f)| *f).fold(floor, u64::max);
    replies.values().find_map(|(candidate, _)| {
        let matching = replies
            .values()
            .filter(|(reply, _)| reply == candidate)
            .count() as u64;
        (matching > f).then(|| candidate.clone())
    })
}

/// Spawn the dispatcher thread, which tallies replies from replicas and wakes up the waiters of accepted
/// outcomes and answers.
fn start_dispatcher<N: Network + 'static>(
    mut network: N,
    state: Arc<Mutex<GatewayState>>,
    dedup_window: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Gateway dispatcher thread disconnected from its gateway")
            }
        }

        match network.recv() {
            Some((PeerId::Node(origin), Message::ReplyMessage(reply))) => {
                let mut state = state.lock().unwrap();
                let floor = state.fault_tolerance;
                match reply {
                    ReplyMessage::Reply { digest, outcome, f } => {
                        let accepted = state.submissions.get_mut(&digest).and_then(|submission| {
                            submission.replies.insert(origin, (outcome, f));
                            agreed(&submission.replies, floor)
                        });
                        if let Some(outcome) = accepted {
                            if let Some(submission) = state.submissions.remove(&digest) {
                                for waiter in submission.waiters {
                                    let _ = waiter.send(outcome.clone());
                                }
                            }
                            state.prune_completed(dedup_window);
                            state.completed.insert(digest, (outcome, Instant::now()));
                        }
                    }
                    ReplyMessage::ReadReply {
                        query_id,
                        answer,
                        f,
                    } => {
                        let accepted = state.reads.get_mut(&query_id).and_then(|tally| {
                            tally.replies.insert(origin, (answer, f));
                            agreed(&tally.replies, floor)
                        });
                        if let Some(answer) = accepted {
                            state.on_accepted_answer(&answer);
                            if let Some(tally) = state.reads.remove(&query_id) {
                                let _ = tally.waiter.send(answer);
                            }
                        }
                    }
                }
            }
            Some(_) => (),
            None => thread::sleep(IDLE_POLL_INTERVAL),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        data_types::{Did, SeqNo, SignatureBytes, ViewNumber},
        request::{Operation, TxnReceipt, WriteKind},
    };

    fn alias(n: u8) -> NodeAlias {
        NodeAlias::new(format!("Node{}", n))
    }

    fn reply(seq: u64) -> Outcome {
        Outcome::Reply(TxnReceipt {
            seq_no: SeqNo::new(seq),
            digest: CryptoHash::zero(),
        })
    }

    #[test]
    fn outcomes_need_f_plus_one_matching_replies() {
        let mut replies = BTreeMap::new();
        replies.insert(alias(1), (reply(1), 1));
        assert_eq!(agreed(&replies, 1), None);
        replies.insert(alias(2), (reply(2), 1));
        assert_eq!(agreed(&replies, 1), None);
        replies.insert(alias(3), (reply(1), 1));
        assert_eq!(agreed(&replies, 1), Some(reply(1)));
    }

    #[test]
    fn a_low_reported_fault_tolerance_does_not_lower_the_bar() {
        let mut replies = BTreeMap::new();
        replies.insert(alias(1), (reply(1), 0));
        replies.insert(alias(2), (reply(1), 2));
        assert_eq!(agreed(&replies, 0), None);
        replies.insert(alias(3), (reply(1), 2));
        assert_eq!(agreed(&replies, 0), Some(reply(1)));
    }

    #[test]
    fn a_lone_reply_claiming_no_fault_tolerance_decides_nothing() {
        // Node4 answers first with a forged outcome, claiming a pool that tolerates no fault.
        let mut replies = BTreeMap::new();
        replies.insert(alias(4), (reply(99), 0));
        assert_eq!(agreed(&replies, 1), None);

        replies.insert(alias(1), (reply(1), 1));
        replies.insert(alias(2), (reply(1), 1));
        assert_eq!(agreed(&replies, 1), Some(reply(1)));
    }

    #[test]
    fn non_matching_replies_raise_the_bar_too() {
        let mut replies = BTreeMap::new();
        replies.insert(alias(1), (reply(1), 0));
        replies.insert(alias(2), (reply(2), 1));
        assert_eq!(agreed(&replies, 0), None);
        replies.insert(alias(3), (reply(1), 0));
        assert_eq!(agreed(&replies, 0), Some(reply(1)));
    }

    #[test]
    fn accepted_pool_answers_move_the_floor() {
        let mut state = GatewayState::new(1);
        let active: Vec<NodeAlias> = (1..=7).map(alias).collect();
        state.on_accepted_answer(&ReadAnswer::ViewInfo {
            view: ViewNumber::new(1),
            primary: Some(alias(2)),
            active: active.clone(),
        });
        assert_eq!(state.fault_tolerance, 2);

        state.on_accepted_answer(&ReadAnswer::Write(None));
        assert_eq!(state.fault_tolerance, 2);

        state.on_accepted_answer(&ReadAnswer::ViewInfo {
            view: ViewNumber::new(2),
            primary: Some(alias(3)),
            active: active[..4].to_vec(),
        });
        assert_eq!(state.fault_tolerance, 1);
    }

    #[test]
    fn unsigned_or_partially_endorsed_requests_are_rejected_locally() {
        let builder = Did::from_verkey(&[1; 32]);
        let endorser = Did::from_verkey(&[2; 32]);
        let mut request = Request {
            identifier: builder.clone(),
            req_id: 1,
            operation: Operation::Write {
                kind: WriteKind::Attrib,
                key: "k".to_string(),
                payload: vec![1],
            },
            endorser: None,
            signatures: BTreeMap::new(),
        };
        assert_eq!(
            local_rejection(&request),
            Some(RejectReason::Authorization(
                AuthorizationError::MissingSignature {
                    did: builder.clone()
                }
            ))
        );

        request
            .signatures
            .insert(builder.clone(), SignatureBytes::new([0; 64]));
        assert_eq!(local_rejection(&request), None);

        request.endorser = Some(endorser.clone());
        assert_eq!(
            local_rejection(&request),
            Some(RejectReason::Authorization(
                AuthorizationError::MissingSignature { did: endorser }
            ))
        );
    }
}
