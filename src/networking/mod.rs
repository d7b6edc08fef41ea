/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.

pub mod in_memory;

pub mod messages;

pub mod network;

pub(crate) mod receiving;

pub(crate) mod sending;
