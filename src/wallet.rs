/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Minimal key management for building and signing [`Request`]s.
//!
//! A [`Wallet`] holds the signing keys of the identities a client acts as. Every signature is over the
//! request [digest](Request::digest), which covers everything but the signatures, so a builder and its
//! endorser can sign in either order.
//!
//! ```
//! use pool_consensus::{
//!     types::request::WriteKind,
//!     wallet::{self, Wallet},
//! };
//!
//! let mut wallet = Wallet::new();
//! let (author, _) = wallet.create_identity(b"000000000000000000000000Author01");
//! let (endorser, _) = wallet.create_identity(b"0000000000000000000000Endorser01");
//!
//! let request = wallet::build_write_request(&author, WriteKind::Schema, "schema:1", b"{}".to_vec());
//! let mut request = wallet::append_request_endorser(request, &endorser);
//! wallet.multi_sign_request(&endorser, &mut request).unwrap();
//! wallet.multi_sign_request(&author, &mut request).unwrap();
//! assert_eq!(request.signatures.len(), 2);
//! ```

use std::collections::{BTreeMap, HashMap};

use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use crate::{
    errors::WalletError,
    types::{
        crypto_primitives::Keypair,
        data_types::{Did, NodeAlias, VerifyingKeyBytes},
        request::{NodeAction, Operation, Request, WriteKind},
        roles::Role,
    },
};

#[derive(Clone, Default)]
pub struct Wallet {
    keys: HashMap<Did, Keypair>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive an identity from a 32-byte `seed`. The same seed always gives the same identity.
    pub fn create_identity(&mut self, seed: &[u8; 32]) -> (Did, VerifyingKeyBytes) {
        self.insert(Keypair::new(SigningKey::from_bytes(seed)))
    }

    /// Create an identity from a freshly generated key.
    pub fn create_random_identity(&mut self) -> (Did, VerifyingKeyBytes) {
        self.insert(Keypair::new(SigningKey::generate(&mut OsRng)))
    }

    pub fn contains(&self, did: &Did) -> bool {
        self.keys.contains_key(did)
    }

    /// Sign `request` as its builder.
    pub fn sign_request(&self, did: &Did, request: &mut Request) -> Result<(), WalletError> {
        if *did != request.identifier {
            return Err(WalletError::NotBuilder(did.clone()));
        }
        self.multi_sign_request(did, request)
    }

    /// Add the signature of `did` to `request`, next to the signatures it already carries.
    pub fn multi_sign_request(&self, did: &Did, request: &mut Request) -> Result<(), WalletError> {
        let keypair = self
            .keys
            .get(did)
            .ok_or_else(|| WalletError::UnknownIdentity(did.clone()))?;
        let signature = keypair.sign(&request.digest().bytes());
        request.signatures.insert(did.clone(), signature);
        Ok(())
    }

    fn insert(&mut self, keypair: Keypair) -> (Did, VerifyingKeyBytes) {
        let verkey = keypair.public_bytes();
        let did = Did::from_verkey(&verkey);
        self.keys.insert(did.clone(), keypair);
        (did, verkey)
    }
}

fn unsigned(submitter: &Did, operation: Operation) -> Request {
    Request {
        identifier: submitter.clone(),
        req_id: rand::random::<u64>(),
        operation,
        endorser: None,
        signatures: BTreeMap::new(),
    }
}

/// Build a request registering `dest`, or updating it if it already exists.
pub fn build_nym_request(
    submitter: &Did,
    dest: &Did,
    verkey: Option<VerifyingKeyBytes>,
    alias: Option<&str>,
    role: Option<Role>,
) -> Request {
    unsigned(
        submitter,
        Operation::Nym {
            dest: dest.clone(),
            verkey,
            alias: alias.map(str::to_string),
            role,
        },
    )
}

/// Build a request adding, demoting or promoting the node `alias`.
pub fn build_node_request(submitter: &Did, alias: &NodeAlias, action: NodeAction) -> Request {
    unsigned(
        submitter,
        Operation::Node {
            alias: alias.clone(),
            action,
        },
    )
}

/// Build an opaque domain write.
pub fn build_write_request(submitter: &Did, kind: WriteKind, key: &str, payload: Vec<u8>) -> Request {
    unsigned(
        submitter,
        Operation::Write {
            kind,
            key: key.to_string(),
            payload,
        },
    )
}

/// Name `endorser` as the endorser of `request`. This changes the digest, so every signature the request
/// carried is dropped.
pub fn append_request_endorser(mut request: Request, endorser: &Did) -> Request {
    request.endorser = Some(endorser.clone());
    request.signatures.clear();
    request
}
