/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A [`Network`] implementation which passes messages from and to threads of the same process using
//! channels.
//!
//! Every endpoint registers an inbox with a shared [`InMemoryHub`]. Disconnecting an endpoint removes its
//! inbox, after which messages sent to it are silently dropped, like messages sent to a node that is down.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use crate::types::pool::PoolState;

use super::{
    messages::Message,
    network::{Network, PeerId},
};

type Inbox = Sender<(PeerId, Message)>;

/// The routing table shared by every [`InMemoryNetwork`] endpoint.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    inboxes: Arc<Mutex<HashMap<PeerId, Inbox>>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` and get its endpoint. Registering a peer again replaces its previous inbox.
    pub fn endpoint(&self, peer: PeerId) -> InMemoryNetwork {
        let (sender, receiver) = mpsc::channel();
        // Safety: the lock is never held across a panic point.
        self.inboxes.lock().unwrap().insert(peer.clone(), sender);
        InMemoryNetwork {
            me: peer,
            hub: self.clone(),
            inbox: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Stop delivering messages to `peer`.
    pub fn disconnect(&self, peer: &PeerId) {
        self.inboxes.lock().unwrap().remove(peer);
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.inboxes.lock().unwrap().contains_key(peer)
    }
}

/// One endpoint of an [`InMemoryHub`].
#[derive(Clone)]
pub struct InMemoryNetwork {
    me: PeerId,
    hub: InMemoryHub,
    inbox: Arc<Mutex<Receiver<(PeerId, Message)>>>,
}

impl InMemoryNetwork {
    pub fn me(&self) -> &PeerId {
        &self.me
    }
}

impl Network for InMemoryNetwork {
    fn update_pool(&mut self, _: &PoolState) {}

    fn broadcast(&mut self, message: Message) {
        let inboxes = self.hub.inboxes.lock().unwrap();
        for (peer, inbox) in inboxes.iter() {
            if matches!(peer, PeerId::Node(_)) {
                let _ = inbox.send((self.me.clone(), message.clone()));
            }
        }
    }

    fn send(&mut self, peer: PeerId, message: Message) {
        if let Some(inbox) = self.hub.inboxes.lock().unwrap().get(&peer) {
            let _ = inbox.send((self.me.clone(), message));
        }
    }

    fn recv(&mut self) -> Option<(PeerId, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(origin_and_message) => Some(origin_and_message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        networking::messages::ClientMessage,
        types::{data_types::NodeAlias, request::ReadQuery},
    };

    fn read() -> Message {
        ClientMessage::Read {
            query_id: 1,
            query: ReadQuery::GetPool,
        }
        .into()
    }

    #[test]
    fn broadcast_reaches_nodes_but_not_clients() {
        let hub = InMemoryHub::new();
        let mut node1 = hub.endpoint(PeerId::Node(NodeAlias::from("Node1")));
        let mut node2 = hub.endpoint(PeerId::Node(NodeAlias::from("Node2")));
        let mut client = hub.endpoint(PeerId::Client(7));

        client.broadcast(read());
        assert!(matches!(node1.recv(), Some((PeerId::Client(7), _))));
        assert!(matches!(node2.recv(), Some((PeerId::Client(7), _))));

        node1.broadcast(read());
        assert!(client.recv().is_none());
        // Broadcasts include the sender.
        assert!(node1.recv().is_some());
    }

    #[test]
    fn disconnected_peers_receive_nothing() {
        let hub = InMemoryHub::new();
        let node1_id = PeerId::Node(NodeAlias::from("Node1"));
        let mut node1 = hub.endpoint(node1_id.clone());
        let mut client = hub.endpoint(PeerId::Client(7));

        hub.disconnect(&node1_id);
        assert!(!hub.is_connected(&node1_id));
        client.send(node1_id, read());
        assert!(node1.recv().is_none());
    }
}
