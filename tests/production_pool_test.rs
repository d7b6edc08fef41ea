/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Grows a pool from 4 to 11 nodes, then demotes nodes and promotes them back to the same 11. Checks that the
//! primary changes whenever the pool's fault tolerance does, and that the pool keeps ordering writes throughout.

use log::LevelFilter;
use pool_consensus::{
    errors::AuthorizationError,
    types::{
        data_types::{NetworkAddress, ViewNumber},
        request::{NodeAction, Outcome, RejectReason},
    },
    wallet,
};

mod common;

use crate::common::{
    logging::setup_logger,
    pool::{alias, seed, test_configuration, TestPool},
};

fn rejected_with(outcome: &Outcome) -> &AuthorizationError {
    match outcome.reject_reason() {
        Some(RejectReason::Authorization(err)) => err,
        other => panic!("expected an authorization rejection, got {:?}", other),
    }
}

#[test]
fn production_pool_test() {
    setup_logger(LevelFilter::Info);

    // 1. Start a pool of 4 nodes. The primary of view 0 is the first alias.
    let mut pool = TestPool::start(4, test_configuration());
    let (view, primary, active) = pool.view_info();
    assert_eq!(view, ViewNumber::init());
    assert_eq!(primary, alias(1));
    assert_eq!(active.len(), 4);

    // 2. Grow the pool to 6 nodes. `f` stays 1, so the primary does not change.
    for n in 5..=6 {
        log::info!("adding Node{}", n);
        let outcome = pool.add_node(n);
        assert!(outcome.is_reply(), "{:?}", outcome);
        pool.ensure_pool_performs_write_read(25);
        pool.ensure_pool_is_in_sync(n as usize);
    }
    assert_eq!(pool.primary(), (ViewNumber::init(), alias(1)));

    // 3. Adding the 7th node raises `f` to 2: view change to view 1, primary Node2.
    let primary1 = pool.primary();
    assert!(pool.add_node(7).is_reply());
    assert_eq!(
        pool.ensure_primary_changed(&primary1),
        (ViewNumber::new(1), alias(2))
    );
    pool.ensure_pool_performs_write_read(25);
    pool.ensure_pool_is_in_sync(7);

    // 4. Grow to 9 nodes without a view change.
    for n in 8..=9 {
        log::info!("adding Node{}", n);
        assert!(pool.add_node(n).is_reply());
        pool.ensure_pool_performs_write_read(25);
        pool.ensure_pool_is_in_sync(n as usize);
    }

    // 5. Adding the 10th node raises `f` to 3. "Node10" sorts right after "Node1", so view 2 would select
    //    Node2 again; the pool skips to view 3, primary Node3.
    let primary2 = pool.primary();
    assert_eq!(primary2, (ViewNumber::new(1), alias(2)));
    assert!(pool.add_node(10).is_reply());
    assert_eq!(
        pool.ensure_primary_changed(&primary2),
        (ViewNumber::new(3), alias(3))
    );
    pool.ensure_pool_performs_write_read(25);
    pool.ensure_pool_is_in_sync(10);

    // 6. The 11th node.
    assert!(pool.add_node(11).is_reply());
    pool.ensure_pool_performs_write_read(25);
    pool.ensure_pool_is_in_sync(11);
    let initial_active = pool.view_info().2;
    assert_eq!(initial_active.len(), 11);
    assert_eq!(pool.gateway.fault_tolerance_floor(), 3);

    // 7. Negative cases of adding nodes.
    let steward5 = pool.steward(5);
    let node12 = pool
        .cluster
        .provision(
            &alias(12),
            NetworkAddress::new("127.0.0.1", 9900),
            NetworkAddress::new("127.0.0.1", 9901),
            &seed("Node", 12),
        )
        .unwrap();
    let second_node = pool.sign_and_submit(wallet::build_node_request(
        &steward5,
        &alias(12),
        NodeAction::Add(node12.clone()),
    ));
    assert!(matches!(
        rejected_with(&second_node),
        AuthorizationError::MultipleNodes { .. }
    ));
    let by_trustee = pool.sign_and_submit(wallet::build_node_request(
        &pool.trustee,
        &alias(12),
        NodeAction::Add(node12),
    ));
    assert!(matches!(
        rejected_with(&by_trustee),
        AuthorizationError::InvalidRole { .. }
    ));

    // 8. Demote the 4 genesis nodes through the trustee. Demoting Node2 drops `f` to 2.
    let trustee = pool.trustee.clone();
    assert!(pool.demote(&trustee, 1).is_reply());
    pool.ensure_pool_performs_write_read(5);

    let primary3 = pool.primary();
    assert!(pool.demote(&trustee, 2).is_reply());
    pool.ensure_primary_changed(&primary3);
    pool.ensure_pool_performs_write_read(5);

    for n in 3..=4 {
        assert!(pool.demote(&trustee, n).is_reply());
        pool.ensure_pool_performs_write_read(5);
    }
    pool.ensure_pool_is_in_sync(7);

    // 9. Only the owner of Node11 (or a trustee) can demote it. Its demotion drops `f` to 1.
    let not_owner = pool.demote(&steward5, 11);
    assert!(matches!(
        rejected_with(&not_owner),
        AuthorizationError::NotOwner { .. }
    ));
    let primary4 = pool.primary();
    let steward11 = pool.steward(11);
    assert!(pool.demote(&steward11, 11).is_reply());
    pool.ensure_primary_changed(&primary4);
    pool.ensure_pool_performs_write_read(25);
    pool.ensure_pool_is_in_sync(6);

    // 10. Promoting Node11 back raises `f` to 2.
    let steward6 = pool.steward(6);
    let not_owner = pool.promote(&steward6, 11);
    assert!(matches!(
        rejected_with(&not_owner),
        AuthorizationError::NotOwner { .. }
    ));
    let primary5 = pool.primary();
    assert!(pool.promote(&trustee, 11).is_reply());
    pool.ensure_primary_changed(&primary5);
    pool.ensure_pool_performs_write_read(25);

    // 11. The genesis stewards promote their own nodes back. Node2 brings `f` back to 3.
    for n in [4, 3] {
        let steward = pool.steward(n);
        assert!(pool.promote(&steward, n).is_reply());
        pool.ensure_pool_performs_write_read(25);
    }
    let primary6 = pool.primary();
    let steward2 = pool.steward(2);
    assert!(pool.promote(&steward2, 2).is_reply());
    pool.ensure_primary_changed(&primary6);
    pool.ensure_pool_performs_write_read(25);
    pool.ensure_pool_is_in_sync(10);

    // 12. With Node1 promoted back by its steward, the pool is back to its 11 active nodes.
    let steward1 = pool.steward(1);
    assert!(pool.promote(&steward1, 1).is_reply());
    pool.ensure_pool_performs_write_read(5);
    pool.ensure_pool_is_in_sync(11);
    let (_, _, active) = pool.view_info();
    assert_eq!(active, initial_active);
    assert_eq!(pool.gateway.fault_tolerance_floor(), 3);
}
