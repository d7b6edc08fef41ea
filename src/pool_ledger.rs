/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Pool Ledger: the replicated list of validator node records.
//!
//! Node records are keyed (and therefore iterated) in alias order. A record is created by an ADD, and
//! afterwards only ever flips between [`Active`](NodeStatus::Active) and [`Demoted`](NodeStatus::Demoted).
//! Every change returns a [`CommitResult`] that carries the quorums before and after the change, so that
//! callers can decide whether the change requires a view change.

use std::collections::BTreeMap;

use crate::{
    errors::MembershipError,
    quorum::Quorums,
    types::{
        data_types::{Did, NodeAlias},
        pool::{NodeData, NodeRecord, NodeStatus, PoolState},
    },
};

/// A membership change, as requested by a committed NODE transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    Add { owner: Did, data: NodeData },
    Demote,
    Promote,
}

/// Which kind of [`MembershipChange`] was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipChangeKind {
    Add,
    Demote,
    Promote,
}

impl From<&MembershipChange> for MembershipChangeKind {
    fn from(value: &MembershipChange) -> Self {
        match value {
            MembershipChange::Add { .. } => MembershipChangeKind::Add,
            MembershipChange::Demote => MembershipChangeKind::Demote,
            MembershipChange::Promote => MembershipChangeKind::Promote,
        }
    }
}

/// The effect of a successfully applied [`MembershipChange`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitResult {
    pub kind: MembershipChangeKind,
    pub alias: NodeAlias,
    pub quorums_before: Quorums,
    pub quorums_after: Quorums,
    /// Whether `alias` was the primary of the current view when the change was applied.
    pub was_primary: bool,
}

impl CommitResult {
    /// Whether the change altered the number of faulty nodes the pool tolerates.
    pub fn fault_tolerance_changed(&self) -> bool {
        self.quorums_before.f != self.quorums_after.f
    }
}

#[derive(Clone, Debug)]
pub struct PoolLedger {
    records: BTreeMap<NodeAlias, NodeRecord>,
    min_active_nodes: usize,
}

impl PoolLedger {
    /// Create a pool ledger holding the genesis `records`. Demotions that would leave fewer than
    /// `min_active_nodes` active nodes are refused.
    pub fn new(records: impl IntoIterator<Item = NodeRecord>, min_active_nodes: usize) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.alias.clone(), record))
                .collect(),
            min_active_nodes,
        }
    }

    pub fn get(&self, alias: &NodeAlias) -> Option<&NodeRecord> {
        self.records.get(alias)
    }

    /// Iterate over every record, active or demoted, in alias order.
    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.values()
    }

    pub fn pool_state(&self) -> PoolState {
        PoolState::from_records(self.records.values())
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|record| record.is_active()).count()
    }

    pub fn quorums(&self) -> Quorums {
        Quorums::new(self.active_count())
    }

    /// Count the ACTIVE nodes owned by `owner`, not counting `except`.
    pub fn active_nodes_owned_by(&self, owner: &Did, except: Option<&NodeAlias>) -> usize {
        self.records
            .values()
            .filter(|record| record.is_active() && &record.owner == owner)
            .filter(|record| Some(&record.alias) != except)
            .count()
    }

    /// Check the preconditions of `change` to `alias`, and apply it if they hold.
    ///
    /// `primary` is the primary of the current view, used to fill in [`CommitResult::was_primary`].
    pub fn apply_membership_change(
        &mut self,
        change: MembershipChange,
        alias: &NodeAlias,
        primary: Option<&NodeAlias>,
    ) -> Result<CommitResult, MembershipError> {
        let quorums_before = self.quorums();
        let kind = MembershipChangeKind::from(&change);

        match change {
            MembershipChange::Add { owner, data } => {
                self.check_new_node(alias, &data)?;
                self.records.insert(
                    alias.clone(),
                    NodeRecord {
                        alias: alias.clone(),
                        owner,
                        data,
                        status: NodeStatus::Active,
                    },
                );
            }
            MembershipChange::Demote => {
                let active_count = self.active_count();
                let record = self
                    .records
                    .get_mut(alias)
                    .ok_or_else(|| MembershipError::UnknownNode(alias.clone()))?;
                if !record.is_active() {
                    return Err(MembershipError::AlreadyDemoted(alias.clone()));
                }
                if active_count - 1 < self.min_active_nodes {
                    return Err(MembershipError::BelowMinimumPool {
                        alias: alias.clone(),
                        remaining: (active_count - 1) as u32,
                        minimum: self.min_active_nodes as u32,
                    });
                }
                record.status = NodeStatus::Demoted;
            }
            MembershipChange::Promote => {
                let record = self
                    .records
                    .get_mut(alias)
                    .ok_or_else(|| MembershipError::UnknownNode(alias.clone()))?;
                if record.is_active() {
                    return Err(MembershipError::AlreadyActive(alias.clone()));
                }
                record.status = NodeStatus::Active;
            }
        }

        Ok(CommitResult {
            kind,
            alias: alias.clone(),
            quorums_before,
            quorums_after: self.quorums(),
            was_primary: primary == Some(alias),
        })
    }

    fn check_new_node(&self, alias: &NodeAlias, data: &NodeData) -> Result<(), MembershipError> {
        let invalid = |reason: &str| MembershipError::InvalidNodeData {
            alias: alias.clone(),
            reason: reason.to_string(),
        };

        if self.records.contains_key(alias) {
            return Err(MembershipError::AlreadyExists(alias.clone()));
        }
        if let Some(holder) = self
            .records
            .values()
            .find(|record| record.data.verkey == data.verkey)
        {
            return Err(MembershipError::DuplicateNodeKey {
                alias: alias.clone(),
                holder: holder.alias.clone(),
            });
        }
        if alias.as_str().is_empty() {
            return Err(invalid("empty alias"));
        }
        if data.bls_key.0.is_empty() {
            return Err(invalid("empty BLS key"));
        }
        if data.bls_key_pop.0.is_empty() {
            return Err(invalid("empty BLS key proof of possession"));
        }
        if data.client_addr.port == 0 || data.node_addr.port == 0 {
            return Err(invalid("port 0"));
        }
        if data.client_addr == data.node_addr {
            return Err(invalid("client and node addresses are the same"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        data_types::NetworkAddress,
        pool::{BlsKey, BlsKeyPop},
    };

    fn node_data(key: u8) -> NodeData {
        NodeData {
            client_addr: NetworkAddress::new("10.0.0.1", 9700 + key as u16),
            node_addr: NetworkAddress::new("10.0.0.1", 9800 + key as u16),
            verkey: [key; 32],
            bls_key: BlsKey(format!("bls-{}", key)),
            bls_key_pop: BlsKeyPop(format!("pop-{}", key)),
        }
    }

    fn add(key: u8) -> MembershipChange {
        MembershipChange::Add {
            owner: Did::from_verkey(&[100 + key; 32]),
            data: node_data(key),
        }
    }

    fn alias(n: u8) -> NodeAlias {
        NodeAlias::new(format!("Node{}", n))
    }

    fn genesis_pool() -> PoolLedger {
        let mut ledger = PoolLedger::new(Vec::new(), 4);
        for n in 1..=4 {
            ledger.apply_membership_change(add(n), &alias(n), None).unwrap();
        }
        ledger
    }

    #[test]
    fn adding_the_seventh_node_changes_fault_tolerance() {
        let mut ledger = genesis_pool();
        for n in 5..=6 {
            let result = ledger.apply_membership_change(add(n), &alias(n), None).unwrap();
            assert!(!result.fault_tolerance_changed());
        }
        let result = ledger.apply_membership_change(add(7), &alias(7), None).unwrap();
        assert!(result.fault_tolerance_changed());
        assert_eq!(result.quorums_before.f, 1);
        assert_eq!(result.quorums_after.f, 2);
        assert_eq!(result.kind, MembershipChangeKind::Add);
    }

    #[test]
    fn preconditions_are_rejected_with_specific_reasons() {
        let mut ledger = genesis_pool();
        ledger.apply_membership_change(add(5), &alias(5), None).unwrap();

        assert_eq!(
            ledger.apply_membership_change(add(6), &alias(5), None),
            Err(MembershipError::AlreadyExists(alias(5)))
        );
        assert_eq!(
            ledger.apply_membership_change(add(5), &alias(9), None),
            Err(MembershipError::DuplicateNodeKey {
                alias: alias(9),
                holder: alias(5)
            })
        );
        assert_eq!(
            ledger.apply_membership_change(MembershipChange::Promote, &alias(5), None),
            Err(MembershipError::AlreadyActive(alias(5)))
        );
        assert_eq!(
            ledger.apply_membership_change(MembershipChange::Demote, &alias(42), None),
            Err(MembershipError::UnknownNode(alias(42)))
        );

        let result = ledger
            .apply_membership_change(MembershipChange::Demote, &alias(5), Some(&alias(5)))
            .unwrap();
        assert!(result.was_primary);
        assert_eq!(
            ledger.apply_membership_change(MembershipChange::Demote, &alias(5), None),
            Err(MembershipError::AlreadyDemoted(alias(5)))
        );
    }

    #[test]
    fn demoting_then_promoting_restores_the_quorums() {
        let mut ledger = genesis_pool();
        for n in 5..=7 {
            ledger.apply_membership_change(add(n), &alias(n), None).unwrap();
        }
        let initial = ledger.quorums();
        assert_eq!(initial.f, 2);

        let demoted = ledger
            .apply_membership_change(MembershipChange::Demote, &alias(7), None)
            .unwrap();
        assert_eq!(demoted.quorums_before, initial);
        assert_eq!(demoted.quorums_after, Quorums::new(6));
        assert!(demoted.fault_tolerance_changed());

        let promoted = ledger
            .apply_membership_change(MembershipChange::Promote, &alias(7), None)
            .unwrap();
        assert_eq!(promoted.quorums_before, demoted.quorums_after);
        assert_eq!(promoted.quorums_after, initial);
        assert_eq!(ledger.quorums(), initial);
    }

    #[test]
    fn demotion_never_drops_below_the_minimum_pool() {
        let mut ledger = genesis_pool();
        assert!(matches!(
            ledger.apply_membership_change(MembershipChange::Demote, &alias(1), None),
            Err(MembershipError::BelowMinimumPool { remaining: 3, minimum: 4, .. })
        ));
        assert_eq!(ledger.active_count(), 4);
    }

    #[test]
    fn empty_bls_keys_are_invalid() {
        let mut ledger = genesis_pool();
        let mut data = node_data(8);
        data.bls_key_pop = BlsKeyPop(String::new());
        let change = MembershipChange::Add {
            owner: Did::from_verkey(&[108; 32]),
            data,
        };
        assert!(matches!(
            ledger.apply_membership_change(change, &alias(8), None),
            Err(MembershipError::InvalidNodeData { .. })
        ));
    }
}
