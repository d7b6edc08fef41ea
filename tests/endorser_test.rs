/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identities without a role can write only with the co-signature of a trustee, steward or endorser.

use log::LevelFilter;
use pool_consensus::{
    errors::AuthorizationError,
    types::{
        data_types::Did,
        request::{Outcome, ReadAnswer, ReadQuery, RejectReason, Request, WriteKind},
        roles::Role,
    },
    wallet,
};

mod common;

use crate::common::{
    logging::setup_logger,
    pool::{test_configuration, TestPool, REPLY_TIMEOUT},
};

fn authorization_error(outcome: &Outcome) -> &AuthorizationError {
    match outcome.reject_reason() {
        Some(RejectReason::Authorization(err)) => err,
        other => panic!("expected an authorization rejection, got {:?}", other),
    }
}

/// Register a new identity with `role` through the trustee.
fn register(pool: &mut TestPool, role: Option<Role>) -> Did {
    let (did, verkey) = pool.wallet.create_random_identity();
    let outcome = pool.sign_and_submit(wallet::build_nym_request(
        &pool.trustee,
        &did,
        Some(verkey),
        None,
        role,
    ));
    assert!(outcome.is_reply(), "{:?}", outcome);
    did
}

/// Name `endorser` as the endorser of `request`, and sign it as both its builder and its endorser.
fn endorse(pool: &TestPool, request: Request, endorser: &Did) -> Request {
    let builder = request.identifier.clone();
    let mut request = wallet::append_request_endorser(request, endorser);
    pool.wallet.multi_sign_request(&builder, &mut request).unwrap();
    pool.wallet.multi_sign_request(endorser, &mut request).unwrap();
    request
}

#[test]
fn endorser_roles_test() {
    setup_logger(LevelFilter::Info);
    let mut pool = TestPool::start(4, test_configuration());

    for role in [Role::Trustee, Role::Steward, Role::Endorser] {
        log::info!("endorsing as {:?}", role);
        let no_role = register(&mut pool, None);
        let endorser = register(&mut pool, Some(role));
        let (test_did, test_verkey) = pool.wallet.create_random_identity();

        // An identity without a role cannot endorse, whatever the builder's role.
        let request = endorse(
            &pool,
            wallet::build_nym_request(&endorser, &test_did, Some(test_verkey), Some("Alias"), None),
            &no_role,
        );
        let outcome = pool.submit(request);
        assert_eq!(
            authorization_error(&outcome),
            &AuthorizationError::InvalidEndorser {
                endorser: no_role.clone()
            }
        );

        // With the roles swapped, the request is accepted.
        let request = endorse(
            &pool,
            wallet::build_nym_request(&no_role, &test_did, Some(test_verkey), Some("Alias"), None),
            &endorser,
        );
        let outcome = pool.submit(request);
        assert!(outcome.is_reply(), "{:?}", outcome);
    }
}

#[test]
fn endorsed_domain_writes_test() {
    setup_logger(LevelFilter::Info);
    let mut pool = TestPool::start(4, test_configuration());
    let author = register(&mut pool, None);
    let endorser = register(&mut pool, Some(Role::Endorser));

    // A new identity, then one write of every domain kind. Each is rejected without an endorser and accepted
    // with one.
    let (test_did, test_verkey) = pool.wallet.create_random_identity();
    let mut requests = vec![wallet::build_nym_request(
        &author,
        &test_did,
        Some(test_verkey),
        Some("Alias 1"),
        None,
    )];
    for (kind, key) in [
        (WriteKind::Schema, "schema:1:0.1"),
        (WriteKind::CredDef, "cred_def:1:tag"),
        (WriteKind::RevocRegDef, "revoc_reg_def:1:tag"),
        (WriteKind::RevocRegEntry, "revoc_reg_entry:1"),
    ] {
        requests.push(wallet::build_write_request(
            &author,
            kind,
            key,
            format!("{{\"id\":\"{}\"}}", key).into_bytes(),
        ));
    }

    for request in requests {
        let outcome = pool.sign_and_submit(request.clone());
        assert!(matches!(
            authorization_error(&outcome),
            AuthorizationError::EndorsementRequired { .. }
        ));

        let outcome = pool.submit(endorse(&pool, request, &endorser));
        assert!(outcome.is_reply(), "{:?}", outcome);
    }

    let answer = pool
        .gateway
        .read(
            ReadQuery::GetWrite {
                kind: WriteKind::Schema,
                key: "schema:1:0.1".to_string(),
            },
            REPLY_TIMEOUT,
        )
        .unwrap();
    assert_eq!(
        answer,
        ReadAnswer::Write(Some(b"{\"id\":\"schema:1:0.1\"}".to_vec()))
    );
}

#[test]
fn incompletely_signed_requests_are_rejected_locally_test() {
    setup_logger(LevelFilter::Info);
    let mut pool = TestPool::start(4, test_configuration());
    let author = register(&mut pool, None);
    let endorser = register(&mut pool, Some(Role::Endorser));

    let mut request = wallet::append_request_endorser(
        wallet::build_write_request(&author, WriteKind::Attrib, "attrib:1", vec![1]),
        &endorser,
    );
    pool.wallet.multi_sign_request(&author, &mut request).unwrap();
    let outcome = pool
        .gateway
        .submit(request.clone())
        .wait(REPLY_TIMEOUT)
        .unwrap();
    assert_eq!(
        authorization_error(&outcome),
        &AuthorizationError::MissingSignature {
            did: endorser.clone()
        }
    );

    // The missing signature can be added later: a rejected signature check does not mark the digest as
    // executed.
    pool.wallet.multi_sign_request(&endorser, &mut request).unwrap();
    assert!(pool.submit(request).is_reply());
}
