/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types describing validator nodes and the active pool.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::quorum::Quorums;

use super::data_types::{Did, NetworkAddress, NodeAlias, VerifyingKeyBytes};

/// Whether a node currently takes part in consensus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum NodeStatus {
    Active,
    Demoted,
}

/// BLS public key of a node. Opaque to the pool, but must not be empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlsKey(pub String);

/// Proof of possession of a node's [`BlsKey`]. Opaque to the pool, but must not be empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlsKeyPop(pub String);

/// The data a steward supplies when adding a node to the pool.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NodeData {
    pub client_addr: NetworkAddress,
    pub node_addr: NetworkAddress,
    pub verkey: VerifyingKeyBytes,
    pub bls_key: BlsKey,
    pub bls_key_pop: BlsKeyPop,
}

/// A validator node, as stored in the pool ledger. Records are never deleted, only demoted.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NodeRecord {
    pub alias: NodeAlias,
    pub owner: Did,
    pub data: NodeData,
    pub status: NodeStatus,
}

impl NodeRecord {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// The ordered set of ACTIVE nodes and their validation keys.
///
/// Iteration order is ascending alias order. This is the order primaries are selected in, and the set that
/// quorums are computed over.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PoolState {
    active: BTreeMap<NodeAlias, VerifyingKeyBytes>,
}

impl PoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the pool state out of every ACTIVE record in `records`.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a NodeRecord>) -> Self {
        let active = records
            .into_iter()
            .filter(|record| record.is_active())
            .map(|record| (record.alias.clone(), record.data.verkey))
            .collect();
        Self { active }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, alias: &NodeAlias) -> bool {
        self.active.contains_key(alias)
    }

    /// Get the validation key of `alias`, if it is active.
    pub fn verkey(&self, alias: &NodeAlias) -> Option<&VerifyingKeyBytes> {
        self.active.get(alias)
    }

    /// Get the `n`-th active node in alias order.
    pub fn nth(&self, n: usize) -> Option<&NodeAlias> {
        self.active.keys().nth(n)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &NodeAlias> {
        self.active.keys()
    }

    /// Get the position of `alias` in alias order, if it is active.
    pub fn position(&self, alias: &NodeAlias) -> Option<usize> {
        self.active.keys().position(|active| active == alias)
    }

    pub fn quorums(&self) -> Quorums {
        Quorums::new(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(alias: &str, key: u8, status: NodeStatus) -> NodeRecord {
        NodeRecord {
            alias: NodeAlias::from(alias),
            owner: Did::from_verkey(&[key; 32]),
            data: NodeData {
                client_addr: NetworkAddress::new("127.0.0.1", 9700 + key as u16),
                node_addr: NetworkAddress::new("127.0.0.1", 9800 + key as u16),
                verkey: [key; 32],
                bls_key: BlsKey(format!("bls-{}", key)),
                bls_key_pop: BlsKeyPop(format!("pop-{}", key)),
            },
            status,
        }
    }

    #[test]
    fn pool_state_excludes_demoted_nodes_and_orders_by_alias() {
        let records = vec![
            record("Node2", 2, NodeStatus::Active),
            record("Node10", 10, NodeStatus::Active),
            record("Node3", 3, NodeStatus::Demoted),
            record("Node1", 1, NodeStatus::Active),
        ];
        let pool = PoolState::from_records(&records);

        assert_eq!(pool.len(), 3);
        assert!(!pool.contains(&NodeAlias::from("Node3")));
        assert_eq!(pool.nth(1), Some(&NodeAlias::from("Node10")));
        assert_eq!(pool.position(&NodeAlias::from("Node2")), Some(2));
        assert_eq!(pool.verkey(&NodeAlias::from("Node1")), Some(&[1u8; 32]));
    }
}
