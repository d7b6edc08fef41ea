/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The user-tunable parameters of a pool, and the per-component configurations they are split into.
//!
//! A [`Configuration`] is shared by every replica of a pool and by the gateways that talk to it. Before being
//! passed to a component, it is split up into smaller, component-specific configuration structs:
//! - [`EngineConfiguration`], used by the [consensus engine](crate::consensus::engine) on the algorithm thread.
//! - [`GatewayConfiguration`], used by the [gateway](crate::gateway::Gateway).
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use pool_consensus::{config::Configuration, view_change::ViewChangePolicy};
//!
//! let configuration = Configuration::builder()
//!     .max_batch_size(8)
//!     .primary_timeout(Duration::from_secs(3))
//!     .view_change_policy(ViewChangePolicy::OnEveryMembershipChange)
//!     .log_events(true)
//!     .build();
//! assert_eq!(configuration.min_active_nodes, 4);
//! ```

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{
    types::{crypto_primitives::Keypair, data_types::NodeAlias},
    view_change::ViewChangePolicy,
};

/// Stores the parameters every replica of a pool must agree on, and the parameters of its timers:
/// 1. The minimum number of active nodes. Demotions below it are rejected.
/// 2. The maximum number of requests the primary orders in one batch.
/// 3. The primary timeout: how long a pending request may wait for execution before its replica suspects the
///    primary and starts a view change.
/// 4. The view change timeout: how long a replica waits for a view change to complete before re-broadcasting
///    its vote. It also throttles catch-up requests.
/// 5. The number of re-broadcasts before a view change escalates to the next target view.
/// 6. The [view change policy](ViewChangePolicy) applied to committed membership changes.
/// 7. The maximum number of ledger entries served in one catch-up response.
/// 8. How long a replica tolerates being behind its peers before it asks them for the missing entries.
/// 9. The capacity of the buffer for consensus messages from future views.
/// 10. The window in which a gateway answers duplicate submissions with the original outcome.
/// 11. The "Log Events" flag. If set to `true`, every [event](crate::events) is [logged](crate::logging).
///
/// ## Agreement
///
/// Fields 1, 2, and 6 change the replicated state machine. Replicas of the same pool configured differently
/// will diverge, and halt with a [`ProtocolSafetyError`](crate::errors::ProtocolSafetyError).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. Every setter is optional, unset parameters take their
    default values.

    Optional:
    - `.min_active_nodes(...)` (default 4)
    - `.max_batch_size(...)` (default 16)
    - `.primary_timeout(...)` (default 5s)
    - `.view_change_timeout(...)` (default 2s)
    - `.view_change_max_retries(...)` (default 3)
    - `.view_change_policy(...)` (default [`ViewChangePolicy::OnFaultToleranceChange`])
    - `.catchup_request_limit(...)` (default 64)
    - `.catchup_grace(...)` (default 250ms)
    - `.msg_buffer_capacity(...)` (default 1024)
    - `.dedup_window(...)` (default 60s)
    - `.log_events(...)` (default false)
"))]
pub struct Configuration {
    #[builder(default = 4, setter(doc = "Set the minimum number of active nodes. Optional."))]
    pub min_active_nodes: usize,
    #[builder(default = 16, setter(doc = "Set the maximum number of requests in a batch. Optional."))]
    pub max_batch_size: usize,
    #[builder(
        default = Duration::from_secs(5),
        setter(doc = "Set how long a pending request may wait before the primary is suspected. Optional.")
    )]
    pub primary_timeout: Duration,
    #[builder(
        default = Duration::from_secs(2),
        setter(doc = "Set how long to wait for a view change before re-broadcasting the vote. Optional.")
    )]
    pub view_change_timeout: Duration,
    #[builder(
        default = 3,
        setter(doc = "Set how many times a view change vote is re-broadcast before escalating. Optional.")
    )]
    pub view_change_max_retries: u32,
    #[builder(default, setter(doc = "Set the policy applied to committed membership changes. Optional."))]
    pub view_change_policy: ViewChangePolicy,
    #[builder(
        default = 64,
        setter(doc = "Set the maximum number of ledger entries in a catch-up response. Optional.")
    )]
    pub catchup_request_limit: u32,
    #[builder(
        default = Duration::from_millis(250),
        setter(doc = "Set how long a replica may be behind before it requests a catch-up. Optional.")
    )]
    pub catchup_grace: Duration,
    #[builder(
        default = 1024,
        setter(doc = "Set the number of future-view consensus messages a replica buffers. Optional.")
    )]
    pub msg_buffer_capacity: usize,
    #[builder(
        default = Duration::from_secs(60),
        setter(doc = "Set the window in which gateways deduplicate submissions. Optional.")
    )]
    pub dedup_window: Duration,
    #[builder(default = false, setter(doc = "Enable logging? Optional."))]
    pub log_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}

/// Configuration parameters of the consensus [`Engine`](crate::consensus::engine::Engine).
#[derive(Clone)]
pub(crate) struct EngineConfiguration {
    /// The alias of the node the engine runs for.
    pub(crate) me: NodeAlias,

    /// The keypair the engine signs proposals and votes with.
    pub(crate) keypair: Keypair,

    pub(crate) max_batch_size: usize,
    pub(crate) primary_timeout: Duration,
    pub(crate) view_change_timeout: Duration,
    pub(crate) view_change_max_retries: u32,
    pub(crate) view_change_policy: ViewChangePolicy,
    pub(crate) catchup_request_limit: u32,
    pub(crate) catchup_grace: Duration,
}

impl EngineConfiguration {
    pub(crate) fn new(configuration: &Configuration, me: NodeAlias, keypair: Keypair) -> Self {
        Self {
            me,
            keypair,
            max_batch_size: configuration.max_batch_size.max(1),
            primary_timeout: configuration.primary_timeout,
            view_change_timeout: configuration.view_change_timeout,
            view_change_max_retries: configuration.view_change_max_retries,
            view_change_policy: configuration.view_change_policy,
            catchup_request_limit: configuration.catchup_request_limit.max(1),
            catchup_grace: configuration.catchup_grace,
        }
    }
}

/// Configuration parameters of a [`Gateway`](crate::gateway::Gateway).
#[derive(Clone, Debug)]
pub struct GatewayConfiguration {
    pub dedup_window: Duration,
    /// The fault tolerance the gateway assumes before it read the pool's size from the pool itself.
    pub initial_fault_tolerance: u64,
}

impl From<&Configuration> for GatewayConfiguration {
    fn from(value: &Configuration) -> Self {
        GatewayConfiguration {
            dedup_window: value.dedup_window,
            initial_fault_tolerance: 0,
        }
    }
}
