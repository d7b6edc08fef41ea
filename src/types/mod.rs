/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of a replica, the gateway and the wallet.
//!
//! Types specific to a single component (e.g., consensus messages) live in that component's module.

pub mod crypto_primitives;

pub mod data_types;

pub mod pool;

pub mod request;

pub mod roles;
