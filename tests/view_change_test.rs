/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Stopping the primary forces a view change; a stopped replica catches up when it is started again.

use std::time::Duration;

use log::LevelFilter;
use pool_consensus::{
    errors::{ClusterError, GatewayError},
    types::{
        data_types::ViewNumber,
        request::{ReadAnswer, ReadQuery, WriteKind},
    },
    wallet,
};

mod common;

use crate::common::{
    logging::setup_logger,
    pool::{alias, eventually, test_configuration, TestPool},
};

#[test]
fn primary_failure_test() {
    setup_logger(LevelFilter::Info);
    let mut pool = TestPool::start(4, test_configuration());
    pool.ensure_pool_performs_write_read(3);
    let primary0 = pool.primary();
    assert_eq!(primary0, (ViewNumber::init(), alias(1)));

    // 1. Stop the primary. The next request times out on the followers, which move to view 1.
    pool.cluster.stop(&alias(1)).unwrap();
    assert_eq!(
        pool.cluster.stop(&alias(1)).unwrap_err(),
        ClusterError::NotRunning(alias(1))
    );
    let trustee = pool.trustee.clone();
    let outcome = pool.sign_and_submit(wallet::build_write_request(
        &trustee,
        WriteKind::Attrib,
        "after-primary-failure",
        vec![1],
    ));
    assert!(outcome.is_reply(), "{:?}", outcome);
    assert_eq!(
        pool.ensure_primary_changed(&primary0),
        (ViewNumber::new(1), alias(2))
    );
    pool.ensure_pool_performs_write_read(3);

    // 2. Start the old primary again. It replays its ledger, catches up, and joins view 1 as a follower.
    pool.cluster.start_service(&alias(1)).unwrap();
    assert_eq!(
        pool.cluster.start_service(&alias(1)).unwrap_err(),
        ClusterError::AlreadyRunning(alias(1))
    );
    pool.ensure_pool_is_in_sync(4);
    assert!(pool.cluster.in_sync());
    let status = pool.cluster.status(&alias(1)).unwrap();
    assert_eq!(status.view, ViewNumber::new(1));
    assert_eq!(status.primary, Some(alias(2)));
    pool.ensure_pool_performs_write_read(3);
}

#[test]
fn new_node_catches_up_test() {
    setup_logger(LevelFilter::Info);
    let mut pool = TestPool::start(4, test_configuration());
    pool.ensure_pool_performs_write_read(10);

    // A node added after the pool committed batches has to fetch them before it can vote.
    assert!(pool.add_node(5).is_reply());
    pool.ensure_pool_is_in_sync(5);
    let records = eventually()
        .check(|| match pool.cluster.camera(&alias(5)).map(|camera| camera.answer(&ReadQuery::GetPool)) {
            Ok(ReadAnswer::Pool(records)) if records.len() == 5 => Ok(records),
            other => Err(other),
        })
        .unwrap();
    assert!(records.iter().all(|record| record.is_active()));
    pool.ensure_pool_performs_write_read(3);
}

#[test]
fn no_reply_without_a_quorum_test() {
    setup_logger(LevelFilter::Info);
    let mut pool = TestPool::start(4, test_configuration());
    for n in 1..=4 {
        pool.cluster.stop(&alias(n)).unwrap();
    }

    let waited = Duration::from_millis(300);
    assert_eq!(
        pool.gateway.read(ReadQuery::GetPool, waited),
        Err(GatewayError::NoReply { waited })
    );

    let mut request = wallet::build_write_request(&pool.trustee, WriteKind::Attrib, "lost", vec![]);
    pool.wallet.sign_request(&pool.trustee, &mut request).unwrap();
    let mut ticket = pool.gateway.submit(request);
    assert_eq!(ticket.wait(waited), Err(GatewayError::NoReply { waited }));

    pool.cluster.teardown().unwrap();
    assert!(matches!(
        pool.cluster.gateway(),
        Err(ClusterError::InvalidState { .. })
    ));
}
