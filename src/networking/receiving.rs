/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    catchup::messages::{CatchupMessage, CatchupRequest, CatchupResponse},
    consensus::messages::ConsensusMessage,
    types::{
        data_types::{NodeAlias, ViewNumber},
        request::{ReadQuery, Request},
    },
};

use super::{
    messages::{ClientMessage, Message},
    network::{Network, PeerId},
};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Requests answered by the [`CatchupServer`](crate::catchup::server::CatchupServer) without involving the
/// algorithm thread.
#[derive(Clone, Debug)]
pub(crate) enum ServerRequest {
    Read { query_id: u64, query: ReadQuery },
    Catchup(CatchupRequest),
}

/// The receiving ends that the poller thread distributes messages into.
pub(crate) struct PollerReceivers {
    pub(crate) requests: Receiver<(PeerId, Request)>,
    pub(crate) consensus_messages: Receiver<(NodeAlias, ConsensusMessage)>,
    pub(crate) catchup_responses: Receiver<(NodeAlias, CatchupResponse)>,
    pub(crate) server_requests: Receiver<(PeerId, ServerRequest)>,
}

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller distributes are:
/// 1. Client requests, consensus messages, and catch-up responses (processed by the
///    [`Algorithm`](crate::algorithm::Algorithm)'s execute loop), and
/// 2. Reads and catch-up requests (processed by the [`CatchupServer`](crate::catchup::server::CatchupServer)).
///
/// Replies are addressed to clients, and are dropped. So are consensus and catch-up messages that were not
/// sent by a node.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, PollerReceivers) {
    let (to_requests, requests) = mpsc::channel();
    let (to_consensus_messages, consensus_messages) = mpsc::channel();
    let (to_catchup_responses, catchup_responses) = mpsc::channel();
    let (to_server_requests, server_requests) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match (origin, msg) {
                (origin, Message::ClientMessage(ClientMessage::Request(request))) => {
                    let _ = to_requests.send((origin, request));
                }
                (origin, Message::ClientMessage(ClientMessage::Read { query_id, query })) => {
                    let _ = to_server_requests.send((origin, ServerRequest::Read { query_id, query }));
                }
                (origin, Message::CatchupMessage(CatchupMessage::CatchupRequest(request))) => {
                    let _ = to_server_requests.send((origin, ServerRequest::Catchup(request)));
                }
                (PeerId::Node(origin), Message::ConsensusMessage(msg)) => {
                    let _ = to_consensus_messages.send((origin, msg));
                }
                (PeerId::Node(origin), Message::CatchupMessage(CatchupMessage::CatchupResponse(response))) => {
                    let _ = to_catchup_responses.send((origin, response));
                }
                _ => (),
            }
        } else {
            thread::sleep(IDLE_POLL_INTERVAL)
        }
    });

    (
        poller_thread,
        PollerReceivers {
            requests,
            consensus_messages,
            catchup_responses,
            server_requests,
        },
    )
}

/// A receiving end for [`ConsensusMessage`]s.
///
/// ## View-aware buffering
///
/// `ConsensusMessageStub` inspects incoming messages' view numbers to decide whether to:
/// 1. Return it from `recv` for immediate processing.
/// 2. Place it in its buffer for future processing.
/// 3. Discard it.
///
/// Proposals and commit votes are returned for **only** the current view, and messages from future views
/// are buffered until the replica enters their view. This keeps replicas that enter a view slightly later
/// than their peers from missing the first proposal of the view.
///
/// View change votes and new view messages are returned only if they are for a view **greater than** the
/// current view, and are never buffered, since they are what moves the replica into a higher view.
///
/// ## Buffer management
///
/// If the buffer grows beyond the capacity specified in [`new`](Self::new), the highest-viewed messages
/// are removed first.
pub(crate) struct ConsensusMessageStub {
    receiver: Receiver<(NodeAlias, ConsensusMessage)>,
    msg_buffer: ConsensusMessageBuffer,
}

impl ConsensusMessageStub {
    pub(crate) fn new(
        receiver: Receiver<(NodeAlias, ConsensusMessage)>,
        msg_buffer_capacity: usize,
    ) -> ConsensusMessageStub {
        Self {
            receiver,
            msg_buffer: ConsensusMessageBuffer::new(msg_buffer_capacity),
        }
    }

    /// Receive a message that is relevant in `cur_view`, waiting until `deadline` at most.
    pub(crate) fn recv(
        &mut self,
        cur_view: ViewNumber,
        deadline: Instant,
    ) -> Result<(NodeAlias, ConsensusMessage), ConsensusMessageReceiveError> {
        // Clear buffer of messages with views lower than the current one.
        self.msg_buffer.remove_expired_msgs(cur_view);

        // Try to get buffered messages for the current view.
        if let Some((sender, msg)) = self.msg_buffer.get_msg(&cur_view) {
            return Ok((sender, msg));
        }

        // Try to get messages from the poller.
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ConsensusMessageReceiveError::Timeout);
            }
            match self.receiver.recv_timeout(deadline - now) {
                Ok((sender, msg)) => match &msg {
                    ConsensusMessage::Proposal(_) | ConsensusMessage::CommitVote(_) => {
                        if msg.view() == cur_view {
                            return Ok((sender, msg));
                        } else if msg.view() > cur_view {
                            self.msg_buffer.insert(sender, msg);
                        }
                    }
                    ConsensusMessage::ViewChangeVote(_) | ConsensusMessage::NewView(_) => {
                        if msg.view() > cur_view {
                            return Ok((sender, msg));
                        }
                    }
                },
                Err(RecvTimeoutError::Timeout) => return Err(ConsensusMessageReceiveError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ConsensusMessageReceiveError::Disconnected)
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConsensusMessageReceiveError {
    Timeout,
    Disconnected,
}

/// Message buffer intended for storing received proposals and commit votes for future views.
struct ConsensusMessageBuffer {
    buffer_capacity: usize,
    buffer: BTreeMap<ViewNumber, VecDeque<(NodeAlias, ConsensusMessage)>>,
    buffer_size: usize,
}

impl ConsensusMessageBuffer {
    fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            buffer: BTreeMap::new(),
            buffer_size: 0,
        }
    }

    /// Insert the message, removing the highest-viewed messages if the buffer is full. If the message itself
    /// has the highest view in a full buffer, it is dropped instead.
    fn insert(&mut self, sender: NodeAlias, msg: ConsensusMessage) -> bool {
        let view = msg.view();
        if self.buffer_size >= self.buffer_capacity {
            match self.buffer.keys().next_back().copied() {
                Some(max_view) if view < max_view => self.remove_highest_viewed_msg(),
                _ => return false,
            }
        }

        self.buffer
            .entry(view)
            .or_default()
            .push_back((sender, msg));
        self.buffer_size += 1;
        true
    }

    /// If there are messages for this view in the buffer, remove and return the message at the front of the
    /// queue.
    fn get_msg(&mut self, view: &ViewNumber) -> Option<(NodeAlias, ConsensusMessage)> {
        let msg_queue = self.buffer.get_mut(view)?;
        let msg = msg_queue.pop_front();
        if msg_queue.is_empty() {
            self.buffer.remove(view);
        }
        if msg.is_some() {
            self.buffer_size -= 1;
        }
        msg
    }

    fn remove_highest_viewed_msg(&mut self) {
        if let Some(mut entry) = self.buffer.last_entry() {
            if entry.get_mut().pop_back().is_some() {
                self.buffer_size -= 1;
            }
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Remove all messages for views less than the current view.
    fn remove_expired_msgs(&mut self, cur_view: ViewNumber) {
        let current_and_future = self.buffer.split_off(&cur_view);
        let expired: usize = self.buffer.values().map(VecDeque::len).sum();
        self.buffer_size -= expired;
        self.buffer = current_and_future;
    }
}

/// A receiving end for [`CatchupResponse`]s.
pub(crate) struct CatchupClientStub {
    responses: Receiver<(NodeAlias, CatchupResponse)>,
}

impl CatchupClientStub {
    pub(crate) fn new(responses: Receiver<(NodeAlias, CatchupResponse)>) -> CatchupClientStub {
        CatchupClientStub { responses }
    }

    /// Take a response that has already arrived, if any.
    pub(crate) fn try_recv_response(&self) -> Option<(NodeAlias, CatchupResponse)> {
        self.responses.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consensus::messages::CommitVote,
        types::data_types::{CryptoHash, SeqNo, SignatureBytes},
    };

    fn vote(view: u64) -> ConsensusMessage {
        ConsensusMessage::CommitVote(CommitVote {
            view: ViewNumber::new(view),
            seq: SeqNo::new(1),
            digest: CryptoHash::zero(),
            signature: SignatureBytes::new([0; 64]),
        })
    }

    #[test]
    fn future_view_messages_are_buffered_until_their_view() {
        let (sender, receiver) = mpsc::channel();
        let mut stub = ConsensusMessageStub::new(receiver, 10);
        let node = NodeAlias::from("Node1");

        sender.send((node.clone(), vote(3))).unwrap();
        sender.send((node.clone(), vote(1))).unwrap();
        sender.send((node.clone(), vote(0))).unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let (_, msg) = stub.recv(ViewNumber::new(1), deadline).unwrap();
        assert_eq!(msg.view(), ViewNumber::new(1));
        assert_eq!(
            stub.recv(ViewNumber::new(1), Instant::now() + Duration::from_millis(10))
                .unwrap_err(),
            ConsensusMessageReceiveError::Timeout
        );

        let (_, msg) = stub.recv(ViewNumber::new(3), Instant::now()).unwrap();
        assert_eq!(msg.view(), ViewNumber::new(3));
    }

    #[test]
    fn full_buffers_drop_the_highest_views_first() {
        let mut buffer = ConsensusMessageBuffer::new(2);
        let node = NodeAlias::from("Node1");
        assert!(buffer.insert(node.clone(), vote(5)));
        assert!(buffer.insert(node.clone(), vote(7)));
        assert!(!buffer.insert(node.clone(), vote(9)));
        assert!(buffer.insert(node.clone(), vote(6)));

        assert!(buffer.get_msg(&ViewNumber::new(7)).is_none());
        assert!(buffer.get_msg(&ViewNumber::new(6)).is_some());
        assert!(buffer.get_msg(&ViewNumber::new(5)).is_some());
        assert_eq!(buffer.buffer_size, 0);
    }
}
