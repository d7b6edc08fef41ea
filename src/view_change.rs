/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Views, primary selection, and the policy that decides when a membership change requires a view change.
//!
//! ## Primary selection
//!
//! The primary of a view `v` is the active node at position `v mod N` of the alias-ordered pool (see
//! [`PoolState`]). Since the pool is ordered by alias, every replica that has executed the same prefix of
//! the ledger selects the same primary for the same view.
//!
//! ## Target of a view change
//!
//! A view change always moves to a *different* primary. The target view starts at `view + 1` and keeps
//! increasing while the selected primary is the outgoing one. When the pool itself just changed, `view + 1`
//! under the new pool can select the outgoing primary again (e.g., growing from 9 to 10 nodes moves every
//! alias after the new one by one position), and the skip moves past it.

use std::collections::BTreeSet;

use crate::{
    pool_ledger::{CommitResult, MembershipChangeKind},
    types::{
        data_types::{NodeAlias, ViewNumber},
        pool::PoolState,
    },
};

/// Deterministically select the primary of `view` among the active nodes of `pool`.
///
/// Returns `None` only if the pool is empty.
pub fn select_primary(view: ViewNumber, pool: &PoolState) -> Option<NodeAlias> {
    if pool.is_empty() {
        return None;
    }
    let index = (view.int() % pool.len() as u64) as usize;
    pool.nth(index).cloned()
}

/// Get the lowest view above `view` whose primary under `pool` is not `outgoing`.
pub fn next_view_with_new_primary(
    view: ViewNumber,
    outgoing: Option<&NodeAlias>,
    pool: &PoolState,
) -> ViewNumber {
    let mut next = view + 1;
    if pool.len() > 1 {
        while select_primary(next, pool).as_ref() == outgoing {
            next = next + 1;
        }
    }
    next
}

/// When committed membership changes trigger a view change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ViewChangePolicy {
    /// Change view when the number of tolerated faulty nodes changes, or when the primary is demoted.
    #[default]
    OnFaultToleranceChange,
    /// Change view on every committed membership change.
    OnEveryMembershipChange,
}

impl ViewChangePolicy {
    /// Decide whether `result` requires a view change, and why.
    pub fn evaluate(&self, result: &CommitResult) -> Option<ViewChangeReason> {
        match self {
            ViewChangePolicy::OnFaultToleranceChange => {
                if result.fault_tolerance_changed() {
                    Some(ViewChangeReason::FaultToleranceChanged)
                } else if result.was_primary && result.kind == MembershipChangeKind::Demote {
                    Some(ViewChangeReason::PrimaryDemoted)
                } else {
                    None
                }
            }
            ViewChangePolicy::OnEveryMembershipChange => Some(ViewChangeReason::MembershipChanged),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewChangeReason {
    FaultToleranceChanged,
    PrimaryDemoted,
    MembershipChanged,
    /// A pending request was not executed within the primary timeout.
    PrimaryTimeout,
    /// At least `f + 1` active nodes voted for a higher view.
    Joined,
    /// The previous view change did not complete within its retry window.
    Escalated,
}

/// The role a replica currently plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaMode {
    Following,
    Primary,
    ViewChanging,
    /// Stopped after a protocol safety violation.
    Halted,
}

/// The current view, its primary, and the nodes suspected of being faulty in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewState {
    pub view: ViewNumber,
    pub primary: Option<NodeAlias>,
    /// Active nodes that did not vote for this view. Cleared one by one as they prove liveness.
    pub suspected: BTreeSet<NodeAlias>,
}

impl ViewState {
    pub fn new(view: ViewNumber, pool: &PoolState) -> Self {
        Self {
            view,
            primary: select_primary(view, pool),
            suspected: BTreeSet::new(),
        }
    }

    /// Move to `next_view`, recomputing the primary under `pool` and replacing the suspected set.
    pub fn update(
        &mut self,
        next_view: ViewNumber,
        pool: &PoolState,
        suspected: BTreeSet<NodeAlias>,
    ) -> Result<(), UpdateViewError> {
        if next_view <= self.view {
            return Err(UpdateViewError::NonIncreasingView {
                cur_view: self.view,
                next_view,
            });
        }
        self.view = next_view;
        self.primary = select_primary(next_view, pool);
        self.suspected = suspected;
        Ok(())
    }

    /// Re-select the primary of the current view after the pool changed.
    pub fn refresh_primary(&mut self, pool: &PoolState) {
        self.primary = select_primary(self.view, pool);
    }

    pub fn is_primary(&self, alias: &NodeAlias) -> bool {
        self.primary.as_ref() == Some(alias)
    }
}

/// Enumerates the different ways a [`ViewState::update`] call can fail.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateViewError {
    /// Views must increase monotonically.
    NonIncreasingView {
        cur_view: ViewNumber,
        next_view: ViewNumber,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        quorum::Quorums,
        types::{
            data_types::{Did, NetworkAddress},
            pool::{BlsKey, BlsKeyPop, NodeData, NodeRecord, NodeStatus},
        },
    };

    fn pool(numbers: &[u8]) -> PoolState {
        let records: Vec<NodeRecord> = numbers
            .iter()
            .map(|n| NodeRecord {
                alias: NodeAlias::new(format!("Node{}", n)),
                owner: Did::from_verkey(&[*n; 32]),
                data: NodeData {
                    client_addr: NetworkAddress::new("127.0.0.1", 9700 + *n as u16),
                    node_addr: NetworkAddress::new("127.0.0.1", 9800 + *n as u16),
                    verkey: [*n; 32],
                    bls_key: BlsKey("bls".to_string()),
                    bls_key_pop: BlsKeyPop("pop".to_string()),
                },
                status: NodeStatus::Active,
            })
            .collect();
        PoolState::from_records(&records)
    }

    fn alias(n: u8) -> NodeAlias {
        NodeAlias::new(format!("Node{}", n))
    }

    #[test]
    fn primary_rotates_in_alias_order() {
        let pool = pool(&[1, 2, 3, 4]);
        let primaries: Vec<NodeAlias> = (0..5)
            .map(|v| select_primary(ViewNumber::new(v), &pool).unwrap())
            .collect();
        assert_eq!(primaries, vec![alias(1), alias(2), alias(3), alias(4), alias(1)]);
        assert_eq!(select_primary(ViewNumber::new(3), &PoolState::new()), None);
    }

    #[test]
    fn growing_the_pool_past_nine_skips_the_outgoing_primary() {
        let before = pool(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let after = pool(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let view = ViewNumber::new(1);
        let outgoing = select_primary(view, &before).unwrap();
        assert_eq!(outgoing, alias(2));

        // Under the new pool, view 2 is Node2 again ("Node1" < "Node10" < "Node2").
        assert_eq!(select_primary(ViewNumber::new(2), &after), Some(alias(2)));
        let next = next_view_with_new_primary(view, Some(&outgoing), &after);
        assert_eq!(next, ViewNumber::new(3));
        assert_eq!(select_primary(next, &after), Some(alias(3)));
    }

    #[test]
    fn single_node_pools_do_not_loop() {
        let pool = pool(&[1]);
        let next = next_view_with_new_primary(ViewNumber::new(0), Some(&alias(1)), &pool);
        assert_eq!(next, ViewNumber::new(1));
    }

    #[test]
    fn policy_fires_on_fault_tolerance_change_or_demoted_primary() {
        let result = |before, after, kind, was_primary| CommitResult {
            kind,
            alias: alias(5),
            quorums_before: Quorums::new(before),
            quorums_after: Quorums::new(after),
            was_primary,
        };
        let policy = ViewChangePolicy::default();

        assert_eq!(policy.evaluate(&result(5, 6, MembershipChangeKind::Add, false)), None);
        assert_eq!(
            policy.evaluate(&result(6, 7, MembershipChangeKind::Add, false)),
            Some(ViewChangeReason::FaultToleranceChanged)
        );
        assert_eq!(
            policy.evaluate(&result(9, 8, MembershipChangeKind::Demote, true)),
            Some(ViewChangeReason::PrimaryDemoted)
        );
        assert_eq!(
            ViewChangePolicy::OnEveryMembershipChange
                .evaluate(&result(5, 6, MembershipChangeKind::Add, false)),
            Some(ViewChangeReason::MembershipChanged)
        );
    }

    #[test]
    fn views_only_move_forward() {
        let pool = pool(&[1, 2, 3, 4]);
        let mut state = ViewState::new(ViewNumber::new(2), &pool);
        assert_eq!(
            state.update(ViewNumber::new(2), &pool, BTreeSet::new()),
            Err(UpdateViewError::NonIncreasingView {
                cur_view: ViewNumber::new(2),
                next_view: ViewNumber::new(2)
            })
        );
        state.update(ViewNumber::new(5), &pool, BTreeSet::new()).unwrap();
        assert!(state.is_primary(&alias(2)));
    }
}
