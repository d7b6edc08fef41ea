/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A pool of replicas running in one process, connected by an [in-memory network](crate::networking::in_memory).
//!
//! A [`Cluster`] goes through three lifecycle states:
//! 1. `Initialized`: nodes can be [provisioned](Cluster::provision), nothing runs yet.
//! 2. `Active`: after [`start`](Cluster::start). Nodes can still be provisioned, and started or stopped one by
//!    one. Gateways can be opened.
//! 3. `TornDown`: after [`teardown`](Cluster::teardown), or when the cluster is dropped. Every replica is stopped.
//!
//! Provisioning only creates a node's key and ledger store. A node provisioned after genesis is not part of
//! the pool until a steward adds it with a NODE transaction; until then its replica follows the pool without
//! voting. A stopped replica keeps its ledger store, replays it when started again, and catches up.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::SigningKey;

use crate::{
    camera::{ReplicaCamera, ReplicaStatus},
    config::{Configuration, GatewayConfiguration},
    errors::{ClusterError, ClusterLifecycle},
    gateway::Gateway,
    networking::{
        in_memory::{InMemoryHub, InMemoryNetwork},
        network::PeerId,
    },
    quorum::max_faulty,
    replica::{Replica, ReplicaSpec},
    state::Genesis,
    store::mem_store::MemStore,
    types::{
        crypto_primitives::hash_of,
        data_types::{NetworkAddress, NodeAlias},
        pool::{BlsKey, BlsKeyPop, NodeData},
    },
};

pub struct Cluster {
    lifecycle: ClusterLifecycle,
    configuration: Configuration,
    hub: InMemoryHub,
    genesis: Genesis,
    nodes: BTreeMap<NodeAlias, ProvisionedNode>,
}

struct ProvisionedNode {
    signing_key: SigningKey,
    store: MemStore,
    replica: Option<Replica>,
}

impl Cluster {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            lifecycle: ClusterLifecycle::Initialized,
            configuration,
            hub: InMemoryHub::new(),
            genesis: Genesis::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn lifecycle(&self) -> ClusterLifecycle {
        self.lifecycle
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Create the key and the ledger store of node `alias`, returning the data a steward needs to add it to the
    /// pool (or to put it in the genesis). The node's keys are derived from `seed`.
    pub fn provision(
        &mut self,
        alias: &NodeAlias,
        client_addr: NetworkAddress,
        node_addr: NetworkAddress,
        seed: &[u8; 32],
    ) -> Result<NodeData, ClusterError> {
        if self.lifecycle == ClusterLifecycle::TornDown {
            return Err(self.invalid_state(ClusterLifecycle::Active));
        }
        if self.nodes.contains_key(alias) {
            return Err(ClusterError::AlreadyProvisioned(alias.clone()));
        }

        let signing_key = SigningKey::from_bytes(seed);
        let verkey = signing_key.verifying_key().to_bytes();
        let bls_key = STANDARD.encode(hash_of(&(alias.as_str().to_string(), verkey)).bytes());
        let bls_key_pop = STANDARD.encode(hash_of(&(bls_key.clone(), verkey)).bytes());
        let node_data = NodeData {
            client_addr,
            node_addr,
            verkey,
            bls_key: BlsKey(bls_key),
            bls_key_pop: BlsKeyPop(bls_key_pop),
        };

        self.nodes.insert(
            alias.clone(),
            ProvisionedNode {
                signing_key,
                store: MemStore::new(),
                replica: None,
            },
        );
        log::debug!("provisioned {}", alias);
        Ok(node_data)
    }

    /// Start the replica of every node provisioned so far, from `genesis`.
    pub fn start(&mut self, genesis: Genesis) -> Result<(), ClusterError> {
        if self.lifecycle != ClusterLifecycle::Initialized {
            return Err(self.invalid_state(ClusterLifecycle::Initialized));
        }
        self.genesis = genesis;
        self.lifecycle = ClusterLifecycle::Active;

        let aliases: Vec<NodeAlias> = self.nodes.keys().cloned().collect();
        for alias in aliases {
            self.start_service(&alias)?;
        }
        Ok(())
    }

    /// Start the replica of node `alias`.
    pub fn start_service(&mut self, alias: &NodeAlias) -> Result<(), ClusterError> {
        if self.lifecycle != ClusterLifecycle::Active {
            return Err(self.invalid_state(ClusterLifecycle::Active));
        }
        let node = self
            .nodes
            .get_mut(alias)
            .ok_or_else(|| ClusterError::NotProvisioned(alias.clone()))?;
        if node.replica.is_some() {
            return Err(ClusterError::AlreadyRunning(alias.clone()));
        }

        let network = self.hub.endpoint(PeerId::Node(alias.clone()));
        let replica = ReplicaSpec::builder()
            .alias(alias.clone())
            .keypair(node.signing_key.clone())
            .genesis(self.genesis.clone())
            .configuration(self.configuration.clone())
            .kv_store(node.store.clone())
            .network(network)
            .build()
            .start();
        node.replica = Some(replica);
        log::info!("started {}", alias);
        Ok(())
    }

    /// Stop the replica of node `alias`. Its ledger store is kept.
    pub fn stop(&mut self, alias: &NodeAlias) -> Result<(), ClusterError> {
        let node = self
            .nodes
            .get_mut(alias)
            .ok_or_else(|| ClusterError::NotProvisioned(alias.clone()))?;
        match node.replica.take() {
            Some(replica) => {
                self.hub.disconnect(&PeerId::Node(alias.clone()));
                drop(replica);
                log::info!("stopped {}", alias);
                Ok(())
            }
            None => Err(ClusterError::NotRunning(alias.clone())),
        }
    }

    pub fn is_running(&self, alias: &NodeAlias) -> bool {
        self.nodes
            .get(alias)
            .map_or(false, |node| node.replica.is_some())
    }

    /// Open a gateway on a new client endpoint.
    pub fn gateway(&self) -> Result<Gateway<InMemoryNetwork>, ClusterError> {
        if self.lifecycle != ClusterLifecycle::Active {
            return Err(self.invalid_state(ClusterLifecycle::Active));
        }
        let network = self.hub.endpoint(PeerId::Client(rand::random::<u64>()));
        let config = GatewayConfiguration {
            initial_fault_tolerance: max_faulty(self.genesis.nodes.len()) as u64,
            ..GatewayConfiguration::from(&self.configuration)
        };
        Ok(Gateway::new(network, config))
    }

    pub fn camera(&self, alias: &NodeAlias) -> Result<ReplicaCamera, ClusterError> {
        let node = self
            .nodes
            .get(alias)
            .ok_or_else(|| ClusterError::NotProvisioned(alias.clone()))?;
        node.replica
            .as_ref()
            .map(|replica| replica.camera().clone())
            .ok_or_else(|| ClusterError::NotRunning(alias.clone()))
    }

    pub fn status(&self, alias: &NodeAlias) -> Result<ReplicaStatus, ClusterError> {
        self.camera(alias).map(|camera| camera.status())
    }

    /// The status of every running replica, in alias order.
    pub fn statuses(&self) -> Vec<ReplicaStatus> {
        self.nodes
            .values()
            .filter_map(|node| node.replica.as_ref())
            .map(|replica| replica.camera().status())
            .collect()
    }

    /// Whether every running replica executed the same ledger and is in the same view.
    pub fn in_sync(&self) -> bool {
        let statuses = self.statuses();
        statuses.windows(2).all(|pair| {
            pair[0].last_executed == pair[1].last_executed
                && pair[0].ledger_root == pair[1].ledger_root
                && pair[0].view == pair[1].view
                && pair[0].active == pair[1].active
        })
    }

    /// Stop every replica. The cluster cannot be used afterwards.
    pub fn teardown(&mut self) -> Result<(), ClusterError> {
        if self.lifecycle == ClusterLifecycle::TornDown {
            return Err(self.invalid_state(ClusterLifecycle::Active));
        }
        let running: Vec<NodeAlias> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.replica.is_some())
            .map(|(alias, _)| alias.clone())
            .collect();
        for alias in running {
            self.stop(&alias)?;
        }
        self.lifecycle = ClusterLifecycle::TornDown;
        Ok(())
    }

    fn invalid_state(&self, expected: ClusterLifecycle) -> ClusterError {
        ClusterError::InvalidState {
            expected,
            actual: self.lifecycle,
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if self.lifecycle != ClusterLifecycle::TornDown {
            let _ = self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(n: u16) -> (NetworkAddress, NetworkAddress) {
        (
            NetworkAddress::new("127.0.0.1", 9700 + n),
            NetworkAddress::new("127.0.0.1", 9800 + n),
        )
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut cluster = Cluster::new(Configuration::default());
        let alias = NodeAlias::from("Node1");
        let (client_addr, node_addr) = addresses(1);
        cluster
            .provision(&alias, client_addr.clone(), node_addr.clone(), &[1; 32])
            .unwrap();
        assert_eq!(
            cluster
                .provision(&alias, client_addr, node_addr, &[1; 32])
                .unwrap_err(),
            ClusterError::AlreadyProvisioned(alias.clone())
        );
        assert!(matches!(
            cluster.gateway(),
            Err(ClusterError::InvalidState {
                expected: ClusterLifecycle::Active,
                actual: ClusterLifecycle::Initialized
            })
        ));
        assert_eq!(
            cluster.start_service(&alias).unwrap_err(),
            ClusterError::InvalidState {
                expected: ClusterLifecycle::Active,
                actual: ClusterLifecycle::Initialized
            }
        );

        cluster.teardown().unwrap();
        assert_eq!(cluster.lifecycle(), ClusterLifecycle::TornDown);
        assert!(cluster.start(Genesis::new()).is_err());
    }

    #[test]
    fn provisioned_node_data_is_deterministic_and_complete() {
        let mut first = Cluster::new(Configuration::default());
        let mut second = Cluster::new(Configuration::default());
        let alias = NodeAlias::from("Node5");
        let (client_addr, node_addr) = addresses(5);
        let data = first
            .provision(&alias, client_addr.clone(), node_addr.clone(), &[5; 32])
            .unwrap();
        assert_eq!(
            data,
            second
                .provision(&alias, client_addr, node_addr, &[5; 32])
                .unwrap()
        );
        assert!(!data.bls_key.0.is_empty());
        assert!(!data.bls_key_pop.0.is_empty());
    }
}
