/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Client requests, their outcomes, and read queries.
//!
//! ## Request digest
//!
//! Every field of a [`Request`] except its signatures forms its payload. The payload is Borsh-serialized
//! and hashed with SHA256 into the request's [digest](Request::digest). Builders and endorsers sign the
//! digest, so signatures can be collected in any order and never invalidate each other.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::errors::{AuthorizationError, MembershipError};

use super::{
    crypto_primitives::{CryptoHasher, Digest},
    data_types::{CryptoHash, Did, NodeAlias, SeqNo, SignatureBytes, VerifyingKeyBytes, ViewNumber},
    pool::{NodeData, NodeRecord},
    roles::{Identity, Role},
};

/// A signed (or multi-signed) state-changing transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Request {
    /// DID of the builder of the request.
    pub identifier: Did,
    /// Nonce chosen by the builder. Distinguishes otherwise identical requests.
    pub req_id: u64,
    pub operation: Operation,
    pub endorser: Option<Did>,
    pub signatures: BTreeMap<Did, SignatureBytes>,
}

impl Request {
    /// Get the bytes every signature on this request is over.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        // Safety: serializing into a `Vec` never fails.
        self.identifier.serialize(&mut payload).unwrap();
        self.req_id.serialize(&mut payload).unwrap();
        self.operation.serialize(&mut payload).unwrap();
        self.endorser.serialize(&mut payload).unwrap();
        payload
    }

    /// Get the SHA256 hash of this request's payload.
    pub fn digest(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.payload_bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    pub fn endorsement_state(&self) -> EndorsementState {
        match &self.endorser {
            None => EndorsementState::Unendorsed,
            Some(endorser) => {
                let mut missing = Vec::new();
                for signer in [&self.identifier, endorser] {
                    if !self.signatures.contains_key(signer) && !missing.contains(signer) {
                        missing.push(signer.clone());
                    }
                }
                if missing.is_empty() {
                    EndorsementState::Ready
                } else {
                    EndorsementState::AwaitingSignatures { missing }
                }
            }
        }
    }
}

/// Progress of collecting the signatures an endorsed request needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndorsementState {
    /// The request carries no endorser.
    Unendorsed,
    /// The request names an endorser, but some of the builder and endorser signatures are missing.
    AwaitingSignatures { missing: Vec<Did> },
    /// The request names an endorser, and both builder and endorser signed it.
    Ready,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Operation {
    /// Register a new identity, or update the verkey or role of an existing one.
    ///
    /// When `dest` is new, an absent `role` registers an identity without a role. When `dest` exists, an
    /// absent `role` keeps the current role.
    Nym {
        dest: Did,
        verkey: Option<VerifyingKeyBytes>,
        alias: Option<String>,
        role: Option<Role>,
    },
    Node {
        alias: NodeAlias,
        action: NodeAction,
    },
    /// A domain write that the pool stores without interpreting.
    Write {
        kind: WriteKind,
        key: String,
        payload: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum NodeAction {
    Add(NodeData),
    Demote,
    Promote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum WriteKind {
    Schema,
    CredDef,
    RevocRegDef,
    RevocRegEntry,
    Attrib,
}

/// What the pool answers to a request.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Outcome {
    Reply(TxnReceipt),
    Reject(RejectReason),
}

impl Outcome {
    pub fn is_reply(&self) -> bool {
        matches!(self, Outcome::Reply(_))
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Outcome::Reply(_) => None,
            Outcome::Reject(reason) => Some(reason),
        }
    }
}

/// Proof that a request was committed: the batch it was ordered in, and its digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxnReceipt {
    pub seq_no: SeqNo,
    pub digest: CryptoHash,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RejectReason {
    Authorization(AuthorizationError),
    Membership(MembershipError),
    /// The request is well-signed but makes no sense, e.g., registering a DID without a verkey.
    InvalidRequest(String),
}

impl From<AuthorizationError> for RejectReason {
    fn from(value: AuthorizationError) -> Self {
        RejectReason::Authorization(value)
    }
}

impl From<MembershipError> for RejectReason {
    fn from(value: MembershipError) -> Self {
        RejectReason::Membership(value)
    }
}

/// Queries answered by replicas from their committed state, without going through consensus.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ReadQuery {
    GetNym(Did),
    GetWrite { kind: WriteKind, key: String },
    GetPool,
    GetViewInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ReadAnswer {
    Nym(Option<Identity>),
    Write(Option<Vec<u8>>),
    Pool(Vec<NodeRecord>),
    ViewInfo {
        view: ViewNumber,
        primary: Option<NodeAlias>,
        active: Vec<NodeAlias>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endorser: Option<Did>) -> Request {
        Request {
            identifier: Did::from_verkey(&[1u8; 32]),
            req_id: 7,
            operation: Operation::Write {
                kind: WriteKind::Schema,
                key: "degree:1.0".to_string(),
                payload: vec![1, 2, 3],
            },
            endorser,
            signatures: BTreeMap::new(),
        }
    }

    #[test]
    fn digest_ignores_signatures() {
        let unsigned = request(None);
        let mut signed = unsigned.clone();
        signed
            .signatures
            .insert(unsigned.identifier.clone(), SignatureBytes::new([9u8; 64]));

        assert_eq!(unsigned.digest(), signed.digest());

        let mut other = unsigned.clone();
        other.req_id = 8;
        assert_ne!(unsigned.digest(), other.digest());
    }

    #[test]
    fn endorsement_becomes_ready_once_both_parties_signed() {
        let endorser = Did::from_verkey(&[2u8; 32]);
        let mut request = request(Some(endorser.clone()));
        assert_eq!(
            request.endorsement_state(),
            EndorsementState::AwaitingSignatures {
                missing: vec![request.identifier.clone(), endorser.clone()]
            }
        );

        request
            .signatures
            .insert(endorser.clone(), SignatureBytes::new([0u8; 64]));
        assert_eq!(
            request.endorsement_state(),
            EndorsementState::AwaitingSignatures {
                missing: vec![request.identifier.clone()]
            }
        );

        request
            .signatures
            .insert(request.identifier.clone(), SignatureBytes::new([0u8; 64]));
        assert_eq!(request.endorsement_state(), EndorsementState::Ready);
        assert_eq!(
            self::request(None).endorsement_state(),
            EndorsementState::Unendorsed
        );
    }
}
