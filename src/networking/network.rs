/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Network`] trait that replicas and gateways send and receive messages through.

use std::fmt::{self, Display, Formatter};

use crate::types::{data_types::NodeAlias, pool::PoolState};

use super::messages::Message;

/// Identifies an endpoint of the network: either a validator node, or a client (e.g., a
/// [`Gateway`](crate::gateway::Gateway)).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeerId {
    Node(NodeAlias),
    Client(u64),
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Node(alias) => write!(f, "{}", alias),
            PeerId::Client(id) => write!(f, "client-{}", id),
        }
    }
}

pub trait Network: Clone + Send {
    /// Inform the network provider of the active pool, on wake-up and after every committed membership
    /// change.
    fn update_pool(&mut self, pool: &PoolState);

    /// Send a message to every node peer (including the sender itself, if it is a node) without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: PeerId, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerId, Message)>;
}

/// Handle for informing the network provider about committed membership changes.
///
/// It is important for the network provider to know about membership changes because, for example, if a
/// node was added, the network provider may want to establish a connection to it.
#[derive(Clone)]
pub(crate) struct PoolUpdateHandle<N: Network> {
    network: N,
}

impl<N: Network> PoolUpdateHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn update_pool(&mut self, pool: &PoolState) {
        self.network.update_pool(pool)
    }
}
