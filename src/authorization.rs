/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Role & Authorization Table.
//!
//! The table maps every registered [`Did`] to its [`Identity`] (and therefore its [`Role`]), and every
//! node to the steward that added it. It is consulted on every write path, and only ever mutated by the
//! replica's ordered execution of committed transactions, so a check and the mutation it guards can never
//! be interleaved with another transaction.
//!
//! ## Rules
//!
//! | Action                         | Allowed                                                            |
//! |--------------------------------|--------------------------------------------------------------------|
//! | Register a DID with role `r`   | Trustee (any `r`), Steward (`r` ≤ Endorser)                        |
//! | Register a DID without a role  | Trustee, Steward, Endorser, or an endorsed identity owner          |
//! | Update an existing DID         | Trustee, or the DID itself (verkey rotation, role unchanged)       |
//! | Add a node                     | Steward that does not own an active node                           |
//! | Demote / promote a node        | Trustee, or the steward that owns the node                         |
//! | Domain writes                  | Trustee, Steward, Endorser, or an endorsed identity owner          |
//!
//! An endorser, when present, must be a Trustee, Steward, or Endorser, and both the builder and the
//! endorser must sign the request digest.

use std::collections::BTreeMap;

use crate::{
    errors::AuthorizationError,
    types::{
        crypto_primitives::verify_signature,
        data_types::{Did, NodeAlias, VerifyingKeyBytes},
        request::{Request, WriteKind},
        roles::{Identity, Role},
    },
};

/// A state-changing action, together with the facts about the pool the rules need to judge it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthAction {
    CreateNym {
        role: Role,
    },
    UpdateNym {
        dest: Did,
        new_role: Option<Role>,
    },
    AddNode {
        /// Number of ACTIVE nodes the builder already owns.
        builder_active_nodes: usize,
    },
    ChangeNodeStatus {
        alias: NodeAlias,
        promote: bool,
        /// Number of ACTIVE nodes, other than `alias`, owned by the owner of `alias`.
        owner_other_active_nodes: usize,
    },
    Write {
        kind: WriteKind,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny(AuthorizationError),
}

impl AuthDecision {
    pub fn into_result(self) -> Result<(), AuthorizationError> {
        match self {
            AuthDecision::Allow => Ok(()),
            AuthDecision::Deny(err) => Err(err),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoleTable {
    identities: BTreeMap<Did, Identity>,
    node_owners: BTreeMap<NodeAlias, Did>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self, did: &Did) -> Option<&Identity> {
        self.identities.get(did)
    }

    pub fn role(&self, did: &Did) -> Option<Role> {
        self.identities.get(did).map(|identity| identity.role)
    }

    pub fn owner_of(&self, alias: &NodeAlias) -> Option<&Did> {
        self.node_owners.get(alias)
    }

    pub fn nodes_owned_by<'a>(&'a self, owner: &'a Did) -> impl Iterator<Item = &'a NodeAlias> {
        self.node_owners
            .iter()
            .filter(move |(_, node_owner)| *node_owner == owner)
            .map(|(alias, _)| alias)
    }

    /// Insert or replace `identity`.
    pub fn put_identity(&mut self, identity: Identity) {
        self.identities.insert(identity.did.clone(), identity);
    }

    /// Apply a committed NYM to an existing identity: fields that are `Some` replace the current ones.
    pub(crate) fn update_identity(
        &mut self,
        did: &Did,
        verkey: Option<VerifyingKeyBytes>,
        alias: Option<String>,
        role: Option<Role>,
    ) {
        if let Some(identity) = self.identities.get_mut(did) {
            if let Some(verkey) = verkey {
                identity.verkey = verkey;
            }
            if alias.is_some() {
                identity.alias = alias;
            }
            if let Some(role) = role {
                identity.role = role;
            }
        }
    }

    /// Record that `owner` added the node `alias`.
    pub fn link_node(&mut self, alias: NodeAlias, owner: Did) {
        self.node_owners.insert(alias, owner);
    }

    /// Check that the builder of `request`, and its endorser if any, are known and signed the request digest
    /// with the verkeys the ledger holds for them.
    pub fn verify_signatures(&self, request: &Request) -> Result<(), AuthorizationError> {
        let digest = request.digest().bytes();

        let builder = self
            .identities
            .get(&request.identifier)
            .ok_or_else(|| AuthorizationError::UnknownIdentity {
                did: request.identifier.clone(),
            })?;
        Self::verify_signature_of(builder, request, &digest)?;

        if let Some(endorser) = &request.endorser {
            let endorser = match self.identities.get(endorser) {
                Some(identity) if identity.role.can_endorse() => identity,
                _ => {
                    return Err(AuthorizationError::InvalidEndorser {
                        endorser: endorser.clone(),
                    })
                }
            };
            Self::verify_signature_of(endorser, request, &digest)?;
        }

        Ok(())
    }

    fn verify_signature_of(
        signer: &Identity,
        request: &Request,
        digest: &[u8],
    ) -> Result<(), AuthorizationError> {
        let signature =
            request
                .signatures
                .get(&signer.did)
                .ok_or_else(|| AuthorizationError::MissingSignature {
                    did: signer.did.clone(),
                })?;
        if verify_signature(&signer.verkey, digest, signature) {
            Ok(())
        } else {
            Err(AuthorizationError::InvalidSignature {
                did: signer.did.clone(),
            })
        }
    }

    /// Decide whether `actor`, optionally endorsed by `endorser`, may perform `action`.
    ///
    /// This does not check signatures; see [`verify_signatures`](Self::verify_signatures).
    pub fn authorize(&self, action: &AuthAction, actor: &Did, endorser: Option<&Did>) -> AuthDecision {
        let actor_role = match self.role(actor) {
            Some(role) => role,
            None => {
                return AuthDecision::Deny(AuthorizationError::UnknownIdentity { did: actor.clone() })
            }
        };

        if let Some(endorser) = endorser {
            if !self.role(endorser).map_or(false, |role| role.can_endorse()) {
                return AuthDecision::Deny(AuthorizationError::InvalidEndorser {
                    endorser: endorser.clone(),
                });
            }
        }
        let endorsed = endorser.is_some();

        let invalid_role = || {
            AuthDecision::Deny(AuthorizationError::InvalidRole {
                actor: actor.clone(),
                role: actor_role,
            })
        };
        let endorsement_required = || {
            AuthDecision::Deny(AuthorizationError::EndorsementRequired {
                builder: actor.clone(),
            })
        };

        match action {
            AuthAction::CreateNym { role } => match actor_role {
                Role::Trustee | Role::Steward => {
                    if actor_role.can_grant(*role) {
                        AuthDecision::Allow
                    } else {
                        invalid_role()
                    }
                }
                Role::Endorser => match role {
                    Role::IdentityOwner => AuthDecision::Allow,
                    Role::Trustee | Role::Steward | Role::Endorser => invalid_role(),
                },
                Role::IdentityOwner => match role {
                    Role::IdentityOwner if endorsed => AuthDecision::Allow,
                    Role::IdentityOwner => endorsement_required(),
                    Role::Trustee | Role::Steward | Role::Endorser => invalid_role(),
                },
            },

            AuthAction::UpdateNym { dest, new_role } => match actor_role {
                Role::Trustee => AuthDecision::Allow,
                Role::Steward | Role::Endorser | Role::IdentityOwner => {
                    let keeps_role = new_role.map_or(true, |role| self.role(dest) == Some(role));
                    if actor == dest && keeps_role {
                        AuthDecision::Allow
                    } else {
                        invalid_role()
                    }
                }
            },

            AuthAction::AddNode {
                builder_active_nodes,
            } => match actor_role {
                Role::Steward if *builder_active_nodes > 0 => {
                    AuthDecision::Deny(AuthorizationError::MultipleNodes {
                        steward: actor.clone(),
                    })
                }
                Role::Steward => AuthDecision::Allow,
                Role::Trustee | Role::Endorser | Role::IdentityOwner => invalid_role(),
            },

            AuthAction::ChangeNodeStatus {
                alias,
                promote,
                owner_other_active_nodes,
            } => {
                let owner = self.node_owners.get(alias);
                match actor_role {
                    Role::Trustee => (),
                    Role::Steward if owner == Some(actor) => (),
                    Role::Steward => {
                        return AuthDecision::Deny(AuthorizationError::NotOwner {
                            actor: actor.clone(),
                            alias: alias.clone(),
                        })
                    }
                    Role::Endorser | Role::IdentityOwner => return invalid_role(),
                }
                match owner {
                    Some(owner) if *promote && *owner_other_active_nodes > 0 => {
                        AuthDecision::Deny(AuthorizationError::MultipleNodes {
                            steward: owner.clone(),
                        })
                    }
                    _ => AuthDecision::Allow,
                }
            }

            AuthAction::Write { .. } => match actor_role {
                Role::Trustee | Role::Steward | Role::Endorser => AuthDecision::Allow,
                Role::IdentityOwner if endorsed => AuthDecision::Allow,
                Role::IdentityOwner => endorsement_required(),
            },
        }
    }
}
