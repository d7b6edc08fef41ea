/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replicated state machine: identities, the pool ledger, and domain writes.
//!
//! [`ReplicatedState::execute`] is the only way committed requests change the state. It runs on the
//! replica's algorithm thread, in ledger order, so every replica that executed the same prefix of the
//! ledger holds the same state and the same [ledger root](ReplicatedState::ledger_root).
//!
//! Executing a request goes through these steps, stopping at the first one that fails:
//! 1. If the request's digest was executed before, return the original outcome without executing again.
//! 2. Verify the builder's (and endorser's) signature over the request digest.
//! 3. Authorize the operation against the Role & Authorization Table.
//! 4. Apply the operation. For NODE operations this is a [`PoolLedger`] membership change.

use std::collections::{BTreeMap, HashMap};

use crate::{
    authorization::{AuthAction, RoleTable},
    errors::{AuthorizationError, MembershipError},
    pool_ledger::{CommitResult, MembershipChange, PoolLedger},
    types::{
        crypto_primitives::chain_hash,
        data_types::{CryptoHash, Did, NodeAlias, SeqNo, VerifyingKeyBytes},
        pool::{NodeData, NodeRecord, NodeStatus},
        request::{
            NodeAction, Operation, Outcome, ReadAnswer, ReadQuery, RejectReason, Request, TxnReceipt,
            WriteKind,
        },
        roles::{Identity, Role},
    },
};

/// The identities and nodes every replica of a pool starts with.
#[derive(Clone, Debug, Default)]
pub struct Genesis {
    pub identities: Vec<Identity>,
    pub nodes: Vec<NodeRecord>,
}

impl Genesis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity whose DID is derived from `verkey`.
    pub fn with_identity(mut self, verkey: VerifyingKeyBytes, alias: Option<&str>, role: Role) -> Self {
        self.identities.push(Identity {
            did: Did::from_verkey(&verkey),
            verkey,
            alias: alias.map(str::to_string),
            role,
        });
        self
    }

    /// Add an active node owned by `owner`.
    pub fn with_node(mut self, alias: NodeAlias, owner: Did, data: NodeData) -> Self {
        self.nodes.push(NodeRecord {
            alias,
            owner,
            data,
            status: NodeStatus::Active,
        });
        self
    }
}

/// The outcome of executing one request.
#[derive(Clone, Debug)]
pub struct Execution {
    pub digest: CryptoHash,
    pub outcome: Outcome,
    /// Set if the request changed the pool membership.
    pub membership: Option<CommitResult>,
}

#[derive(Clone, Debug)]
pub struct ReplicatedState {
    roles: RoleTable,
    pool: PoolLedger,
    writes: BTreeMap<(WriteKind, String), Vec<u8>>,
    outcomes: HashMap<CryptoHash, Outcome>,
    last_executed: SeqNo,
    ledger_root: CryptoHash,
}

impl ReplicatedState {
    pub fn from_genesis(genesis: &Genesis, min_active_nodes: usize) -> Self {
        let mut roles = RoleTable::new();
        for identity in &genesis.identities {
            roles.put_identity(identity.clone());
        }
        for node in &genesis.nodes {
            roles.link_node(node.alias.clone(), node.owner.clone());
        }

        Self {
            roles,
            pool: PoolLedger::new(genesis.nodes.iter().cloned(), min_active_nodes),
            writes: BTreeMap::new(),
            outcomes: HashMap::new(),
            last_executed: SeqNo::genesis(),
            ledger_root: CryptoHash::zero(),
        }
    }

    pub fn roles(&self) -> &RoleTable {
        &self.roles
    }

    pub fn pool(&self) -> &PoolLedger {
        &self.pool
    }

    pub fn write(&self, kind: WriteKind, key: &str) -> Option<&Vec<u8>> {
        self.writes.get(&(kind, key.to_string()))
    }

    pub fn last_executed(&self) -> SeqNo {
        self.last_executed
    }

    /// Hash chain over the digests of every executed batch.
    pub fn ledger_root(&self) -> CryptoHash {
        self.ledger_root
    }

    /// Get the outcome of the request with `digest`, if it was executed.
    pub fn outcome_of(&self, digest: &CryptoHash) -> Option<&Outcome> {
        self.outcomes.get(digest)
    }

    /// Execute `request`, ordered in batch `seq_no`. `primary` is the primary of the current view.
    pub fn execute(
        &mut self,
        request: &Request,
        seq_no: SeqNo,
        primary: Option<&NodeAlias>,
    ) -> Execution {
        let digest = request.digest();
        if let Some(outcome) = self.outcomes.get(&digest) {
            return Execution {
                digest,
                outcome: outcome.clone(),
                membership: None,
            };
        }

        let (outcome, membership) = match self.apply(request, primary) {
            Ok(membership) => (Outcome::Reply(TxnReceipt { seq_no, digest }), membership),
            Err(reason) => (Outcome::Reject(reason), None),
        };

        // Signature failures are not a property of the payload: the same payload, correctly signed, must still
        // be executable.
        let signature_failure = matches!(
            outcome,
            Outcome::Reject(RejectReason::Authorization(
                AuthorizationError::MissingSignature { .. } | AuthorizationError::InvalidSignature { .. }
            ))
        );
        if !signature_failure {
            self.outcomes.insert(digest, outcome.clone());
        }

        Execution {
            digest,
            outcome,
            membership,
        }
    }

    /// Record that the batch with `batch_digest` was executed as batch `seq_no`.
    pub fn commit_batch(&mut self, seq_no: SeqNo, batch_digest: &CryptoHash) {
        self.last_executed = seq_no;
        self.ledger_root = chain_hash(&self.ledger_root, batch_digest);
    }

    fn apply(
        &mut self,
        request: &Request,
        primary: Option<&NodeAlias>,
    ) -> Result<Option<CommitResult>, RejectReason> {
        self.roles.verify_signatures(request)?;
        let builder = &request.identifier;
        let endorser = request.endorser.as_ref();

        match &request.operation {
            Operation::Nym {
                dest,
                verkey,
                alias,
                role,
            } => {
                let exists = self.roles.identity(dest).is_some();
                let action = if exists {
                    AuthAction::UpdateNym {
                        dest: dest.clone(),
                        new_role: *role,
                    }
                } else {
                    AuthAction::CreateNym {
                        role: role.unwrap_or(Role::IdentityOwner),
                    }
                };
                self.roles.authorize(&action, builder, endorser).into_result()?;

                if exists {
                    self.roles
                        .update_identity(dest, *verkey, alias.clone(), *role);
                } else {
                    let verkey = verkey.ok_or_else(|| {
                        RejectReason::InvalidRequest("a new identity needs a verkey".to_string())
                    })?;
                    if Did::from_verkey(&verkey) != *dest {
                        return Err(RejectReason::InvalidRequest(format!(
                            "{} is not derived from the given verkey",
                            dest
                        )));
                    }
                    self.roles.put_identity(Identity {
                        did: dest.clone(),
                        verkey,
                        alias: alias.clone(),
                        role: role.unwrap_or(Role::IdentityOwner),
                    });
                }
                Ok(None)
            }

            Operation::Node { alias, action } => {
                let (auth_action, change) = match action {
                    NodeAction::Add(data) => (
                        AuthAction::AddNode {
                            builder_active_nodes: self.pool.active_nodes_owned_by(builder, None),
                        },
                        MembershipChange::Add {
                            owner: builder.clone(),
                            data: data.clone(),
                        },
                    ),
                    NodeAction::Demote | NodeAction::Promote => {
                        let record = self
                            .pool
                            .get(alias)
                            .ok_or_else(|| MembershipError::UnknownNode(alias.clone()))?;
                        let promote = matches!(action, NodeAction::Promote);
                        (
                            AuthAction::ChangeNodeStatus {
                                alias: alias.clone(),
                                promote,
                                owner_other_active_nodes: self
                                    .pool
                                    .active_nodes_owned_by(&record.owner, Some(alias)),
                            },
                            if promote {
                                MembershipChange::Promote
                            } else {
                                MembershipChange::Demote
                            },
                        )
                    }
                };
                self.roles
                    .authorize(&auth_action, builder, endorser)
                    .into_result()?;

                let is_add = matches!(change, MembershipChange::Add { .. });
                let result = self.pool.apply_membership_change(change, alias, primary)?;
                if is_add {
                    self.roles.link_node(alias.clone(), builder.clone());
                }
                Ok(Some(result))
            }

            Operation::Write { kind, key, payload } => {
                self.roles
                    .authorize(&AuthAction::Write { kind: *kind }, builder, endorser)
                    .into_result()?;
                self.writes.insert((*kind, key.clone()), payload.clone());
                Ok(None)
            }
        }
    }

    /// Answer the state-dependent part of `query`. View info is not part of the replicated state, so
    /// [`ReadQuery::GetViewInfo`] returns `None`.
    pub fn answer(&self, query: &ReadQuery) -> Option<ReadAnswer> {
        match query {
            ReadQuery::GetNym(did) => Some(ReadAnswer::Nym(self.roles.identity(did).cloned())),
            ReadQuery::GetWrite { kind, key } => {
                Some(ReadAnswer::Write(self.write(*kind, key).cloned()))
            }
            ReadQuery::GetPool => Some(ReadAnswer::Pool(self.pool.records().cloned().collect())),
            ReadQuery::GetViewInfo => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        types::{
            data_types::NetworkAddress,
            pool::{BlsKey, BlsKeyPop},
        },
        wallet::{self, Wallet},
    };

    struct Fixture {
        wallet: Wallet,
        trustee: Did,
        steward: Did,
        new_steward: Did,
        author: Did,
        endorser: Did,
        state: ReplicatedState,
    }

    fn node_data(n: u8) -> NodeData {
        NodeData {
            client_addr: NetworkAddress::new("10.0.0.2", 9700 + n as u16),
            node_addr: NetworkAddress::new("10.0.0.2", 9800 + n as u16),
            verkey: [n; 32],
            bls_key: BlsKey(format!("bls-{}", n)),
            bls_key_pop: BlsKeyPop(format!("pop-{}", n)),
        }
    }

    fn fixture() -> Fixture {
        let mut wallet = Wallet::new();
        let (trustee, trustee_key) = wallet.create_identity(&[11; 32]);
        let (steward, steward_key) = wallet.create_identity(&[12; 32]);
        let (new_steward, new_steward_key) = wallet.create_identity(&[13; 32]);
        let (author, author_key) = wallet.create_identity(&[14; 32]);
        let (endorser, endorser_key) = wallet.create_identity(&[15; 32]);

        let mut genesis = Genesis::new()
            .with_identity(trustee_key, Some("Trustee1"), Role::Trustee)
            .with_identity(steward_key, Some("Steward1"), Role::Steward)
            .with_identity(new_steward_key, Some("Steward5"), Role::Steward)
            .with_identity(author_key, None, Role::IdentityOwner)
            .with_identity(endorser_key, None, Role::Endorser);
        for n in 1..=4 {
            let owner = if n == 1 {
                steward.clone()
            } else {
                Did::from_verkey(&[100 + n; 32])
            };
            genesis = genesis.with_node(NodeAlias::new(format!("Node{}", n)), owner, node_data(n));
        }

        Fixture {
            wallet,
            trustee,
            steward,
            new_steward,
            author,
            endorser,
            state: ReplicatedState::from_genesis(&genesis, 4),
        }
    }

    impl Fixture {
        fn signed(&self, signer: &Did, mut request: Request) -> Request {
            self.wallet.sign_request(signer, &mut request).unwrap();
            request
        }

        fn execute(&mut self, request: &Request) -> Execution {
            let seq_no = self.state.last_executed().next();
            let primary = NodeAlias::from("Node1");
            self.state.execute(request, seq_no, Some(&primary))
        }
    }

    fn reject(execution: &Execution) -> &RejectReason {
        execution.outcome.reject_reason().unwrap()
    }

    #[test]
    fn steward_adds_one_node_and_can_demote_and_promote_it() {
        let mut fx = fixture();
        let node5 = NodeAlias::from("Node5");
        let add = fx.signed(
            &fx.new_steward,
            wallet::build_node_request(&fx.new_steward, &node5, NodeAction::Add(node_data(5))),
        );
        let execution = fx.execute(&add);
        assert!(execution.outcome.is_reply());
        let membership = execution.membership.unwrap();
        assert_eq!(membership.quorums_after.active, 5);
        assert!(!membership.was_primary);
        assert_eq!(fx.state.roles().owner_of(&node5), Some(&fx.new_steward));

        let node6 = NodeAlias::from("Node6");
        let second = fx.signed(
            &fx.new_steward,
            wallet::build_node_request(&fx.new_steward, &node6, NodeAction::Add(node_data(6))),
        );
        assert_eq!(
            reject(&fx.execute(&second)),
            &RejectReason::Authorization(AuthorizationError::MultipleNodes {
                steward: fx.new_steward.clone()
            })
        );

        let demote = fx.signed(
            &fx.new_steward,
            wallet::build_node_request(&fx.new_steward, &node5, NodeAction::Demote),
        );
        assert!(fx.execute(&demote).outcome.is_reply());
        assert_eq!(fx.state.pool().active_count(), 4);

        let promote = fx.signed(
            &fx.trustee,
            wallet::build_node_request(&fx.trustee, &node5, NodeAction::Promote),
        );
        assert!(fx.execute(&promote).outcome.is_reply());
        assert_eq!(fx.state.pool().active_count(), 5);
    }

    #[test]
    fn demoting_a_node_of_another_steward_is_refused() {
        let mut fx = fixture();
        let demote = fx.signed(
            &fx.new_steward,
            wallet::build_node_request(&fx.new_steward, &NodeAlias::from("Node1"), NodeAction::Demote),
        );
        assert!(matches!(
            reject(&fx.execute(&demote)),
            RejectReason::Authorization(AuthorizationError::NotOwner { .. })
        ));

        let demote = fx.signed(
            &fx.steward,
            wallet::build_node_request(&fx.steward, &NodeAlias::from("Node1"), NodeAction::Demote),
        );
        assert!(matches!(
            reject(&fx.execute(&demote)),
            RejectReason::Membership(MembershipError::BelowMinimumPool { .. })
        ));
    }

    #[test]
    fn executed_requests_return_their_first_outcome() {
        let mut fx = fixture();
        let write = fx.signed(
            &fx.steward,
            wallet::build_write_request(&fx.steward, WriteKind::Schema, "schema:1", b"v1".to_vec()),
        );
        let first = fx.execute(&write);
        fx.state.commit_batch(SeqNo::new(1), &first.digest);
        let replayed = fx.execute(&write);
        assert_eq!(first.outcome, replayed.outcome);
        assert_eq!(fx.state.outcome_of(&write.digest()), Some(&first.outcome));
        assert_eq!(
            fx.state.answer(&ReadQuery::GetWrite {
                kind: WriteKind::Schema,
                key: "schema:1".to_string()
            }),
            Some(ReadAnswer::Write(Some(b"v1".to_vec())))
        );
    }

    #[test]
    fn identity_owners_write_only_when_endorsed() {
        let mut fx = fixture();
        let unendorsed = fx.signed(
            &fx.author,
            wallet::build_write_request(&fx.author, WriteKind::Attrib, "attr", vec![1]),
        );
        assert!(matches!(
            reject(&fx.execute(&unendorsed)),
            RejectReason::Authorization(AuthorizationError::EndorsementRequired { .. })
        ));

        let mut endorsed = wallet::append_request_endorser(
            wallet::build_write_request(&fx.author, WriteKind::Attrib, "attr", vec![1]),
            &fx.endorser,
        );
        fx.wallet.multi_sign_request(&fx.author, &mut endorsed).unwrap();
        let missing = fx.execute(&endorsed);
        assert_eq!(
            reject(&missing),
            &RejectReason::Authorization(AuthorizationError::MissingSignature {
                did: fx.endorser.clone()
            })
        );
        assert!(fx.state.outcome_of(&missing.digest).is_none());

        fx.wallet.multi_sign_request(&fx.endorser, &mut endorsed).unwrap();
        assert!(fx.execute(&endorsed).outcome.is_reply());
    }

    #[test]
    fn new_identities_must_match_their_verkey() {
        let mut fx = fixture();
        let verkey = [42; 32];
        let wrong_dest = Did::from_verkey(&[43; 32]);
        let nym = fx.signed(
            &fx.trustee,
            wallet::build_nym_request(&fx.trustee, &wrong_dest, Some(verkey), None, None),
        );
        assert!(matches!(reject(&fx.execute(&nym)), RejectReason::InvalidRequest(_)));

        let dest = Did::from_verkey(&verkey);
        let nym = fx.signed(
            &fx.trustee,
            wallet::build_nym_request(&fx.trustee, &dest, Some(verkey), Some("Holder"), Some(Role::Endorser)),
        );
        assert!(fx.execute(&nym).outcome.is_reply());
        assert_eq!(fx.state.roles().role(&dest), Some(Role::Endorser));
    }

    #[test]
    fn ledger_root_chains_batch_digests() {
        let mut state = fixture().state;
        let genesis_root = state.ledger_root();
        state.commit_batch(SeqNo::new(1), &CryptoHash::new([1; 32]));
        let one = state.ledger_root();
        state.commit_batch(SeqNo::new(2), &CryptoHash::new([2; 32]));
        assert_ne!(genesis_root, one);
        assert_ne!(one, state.ledger_root());
        assert_eq!(state.last_executed(), SeqNo::new(2));
    }
}
