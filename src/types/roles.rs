/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Roles and identities.
//!
//! Roles form a strict privilege ladder: `Trustee > Steward > Endorser > IdentityOwner`. Every check
//! against a role is an exhaustive `match`, so adding a role is a compile error until every rule has
//! decided what the new role may do.

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{Did, VerifyingKeyBytes};

/// The role of an identity on the ledger. `IdentityOwner` is the "no role" role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Role {
    Trustee,
    Steward,
    Endorser,
    IdentityOwner,
}

impl Role {
    /// Position of the role on the privilege ladder. Higher is more privileged.
    pub const fn privilege(&self) -> u8 {
        match self {
            Role::Trustee => 3,
            Role::Steward => 2,
            Role::Endorser => 1,
            Role::IdentityOwner => 0,
        }
    }

    /// Whether an identity with this role may register a new identity with the `target` role.
    pub const fn can_grant(&self, target: Role) -> bool {
        match self {
            Role::Trustee => true,
            Role::Steward => matches!(target, Role::Endorser | Role::IdentityOwner),
            Role::Endorser | Role::IdentityOwner => false,
        }
    }

    /// Whether an identity with this role may co-sign transactions built by identities without a role.
    pub const fn can_endorse(&self) -> bool {
        match self {
            Role::Trustee | Role::Steward | Role::Endorser => true,
            Role::IdentityOwner => false,
        }
    }
}

/// An identity registered on the ledger through a NYM transaction (or genesis).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Identity {
    pub did: Did,
    pub verkey: VerifyingKeyBytes,
    pub alias: Option<String>,
    pub role: Role,
}
