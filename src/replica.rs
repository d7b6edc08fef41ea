/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one node's process: it keeps a copy of the [replicated state](crate::state::ReplicatedState),
//! takes part in [consensus](crate::consensus) while its node is active, and serves reads and catch-up
//! requests. Each replica is identified by its node's [alias](crate::types::data_types::NodeAlias), and signs
//! with the [Ed25519 key](ed25519_dalek::SigningKey) registered for that alias in the pool.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Active and inactive replicas
//!
//! A replica whose node is not in the active pool (provisioned but not yet added, or demoted) still executes
//! every committed batch and follows view changes, but never proposes or votes. It becomes a full participant
//! as soon as the batch that adds or promotes its node is executed.
//!
//! This requires that the [network's](crate::networking::network::Network) broadcast method deliver consensus
//! messages to every replica of the pool, not only to the active ones.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .alias(NodeAlias::from("Node1"))
//!     .keypair(signing_key)
//!     .genesis(genesis)
//!     .configuration(configuration)
//!     .kv_store(kv_store)
//!     .network(network)
//!     .on_commit_batch(commit_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! - `.alias(...)`
//! - `.keypair(...)`
//! - `.genesis(...)`
//! - `.configuration(...)`
//! - `.kv_store(...)`
//! - `.network(...)`
//!
//! ### Optional setters
//!
//! The optional setters register user-defined handlers for the events in [crate::events]:
//! - `.on_commit_batch(...)`
//! - `.on_reject_transaction(...)`
//! - `.on_update_pool(...)`
//! - `.on_propose(...)`
//! - `.on_commit_vote(...)`
//! - `.on_view_change_vote(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_receive_view_change_vote(...)`
//! - `.on_collect_certificate(...)`
//! - `.on_start_view_change(...)`
//! - `.on_start_view(...)`
//! - `.on_primary_timeout(...)`
//! - `.on_start_catchup(...)`
//! - `.on_end_catchup(...)`
//! - `.on_serve_catchup(...)`
//! - `.on_safety_violation(...)`

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc, RwLock,
    },
    thread::JoinHandle,
};

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::{
    algorithm::Algorithm,
    camera::{ReplicaCamera, ReplicaStatus},
    catchup::server::CatchupServer,
    config::{Configuration, EngineConfiguration},
    consensus::engine::Engine,
    event_bus::*,
    events::*,
    networking::{
        network::Network,
        receiving::{start_polling, CatchupClientStub, ConsensusMessageStub},
    },
    state::{Genesis, ReplicatedState},
    store::kv_store::KVStore,
    types::{crypto_primitives::Keypair, data_types::NodeAlias},
};

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.alias(...)`
    - `.keypair(...)`
    - `.genesis(...)`
    - `.configuration(...)`
    - `.kv_store(...)`
    - `.network(...)`

    Optional:
    - `.on_commit_batch(...)`
    - `.on_reject_transaction(...)`
    - `.on_update_pool(...)`
    - `.on_propose(...)`
    - `.on_commit_vote(...)`
    - `.on_view_change_vote(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_view_change_vote(...)`
    - `.on_collect_certificate(...)`
    - `.on_start_view_change(...)`
    - `.on_start_view(...)`
    - `.on_primary_timeout(...)`
    - `.on_start_catchup(...)`
    - `.on_end_catchup(...)`
    - `.on_serve_catchup(...)`
    - `.on_safety_violation(...)`
"))]
pub struct ReplicaSpec<K: KVStore, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the alias of the node this replica runs for. Required."))]
    alias: NodeAlias,
    #[builder(setter(doc = "Set the key the replica signs proposals and votes with. Required."))]
    keypair: SigningKey,
    #[builder(setter(doc = "Set the genesis identities and nodes every replica of the pool starts from. Required."))]
    genesis: Genesis,
    #[builder(setter(doc = "Set the [configuration](Configuration) shared by the pool. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the implementation of the replica's ledger store. The argument must implement the [KVStore](crate::store::kv_store::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBatchEvent>),
    doc = "Register a handler closure to be invoked after the replica executes a batch. Optional."))]
    on_commit_batch: Option<HandlerPtr<CommitBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectTransactionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectTransactionEvent>),
    doc = "Register a handler closure to be invoked after an ordered transaction is rejected. Optional."))]
    on_reject_transaction: Option<HandlerPtr<RejectTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdatePoolEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdatePoolEvent>),
    doc = "Register a handler closure to be invoked after a membership change is applied. Optional."))]
    on_update_pool: Option<HandlerPtr<UpdatePoolEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica, as primary, broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a commit vote. Optional."))]
    on_commit_vote: Option<HandlerPtr<CommitVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewChangeVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ViewChangeVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a view change vote. Optional."))]
    on_view_change_vote: Option<HandlerPtr<ViewChangeVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveViewChangeVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveViewChangeVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a view change vote. Optional."))]
    on_receive_view_change_vote: Option<HandlerPtr<ReceiveViewChangeVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectCertificateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectCertificateEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a commit certificate. Optional."))]
    on_collect_certificate: Option<HandlerPtr<CollectCertificateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartViewChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartViewChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica starts a view change. Optional."))]
    on_start_view_change: Option<HandlerPtr<StartViewChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartViewEvent>),
    doc = "Register a handler closure to be invoked after the replica installs a new view. Optional."))]
    on_start_view: Option<HandlerPtr<StartViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrimaryTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrimaryTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica suspects the primary. Optional."))]
    on_primary_timeout: Option<HandlerPtr<PrimaryTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartCatchupEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartCatchupEvent>),
    doc = "Register a handler closure to be invoked after the replica requests a catch-up. Optional."))]
    on_start_catchup: Option<HandlerPtr<StartCatchupEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndCatchupEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndCatchupEvent>),
    doc = "Register a handler closure to be invoked after the replica applies entries from a catch-up response. Optional."))]
    on_end_catchup: Option<HandlerPtr<EndCatchupEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ServeCatchupEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ServeCatchupEvent>),
    doc = "Register a handler closure to be invoked after the replica answers a peer's catch-up request. Optional."))]
    on_serve_catchup: Option<HandlerPtr<ServeCatchupEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SafetyViolationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SafetyViolationEvent>),
    doc = "Register a handler closure to be invoked when the replica halts on a safety violation. Optional."))]
    on_safety_violation: Option<HandlerPtr<SafetyViolationEvent>>,
}

impl<K: KVStore, N: Network + 'static> ReplicaSpec<K, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to them in a [Replica] struct.
    pub fn start(mut self) -> Replica {
        let keypair = Keypair::new(self.keypair);
        let state =
            ReplicatedState::from_genesis(&self.genesis, self.configuration.min_active_nodes);
        let pool = state.pool().pool_state();
        if let Some(verkey) = pool.verkey(&self.alias) {
            if *verkey != keypair.public_bytes() {
                log::warn!(
                    "{} is registered with a different key than the one it was started with",
                    self.alias
                );
            }
        }
        self.network.update_pool(&pool);

        let status = Arc::new(RwLock::new(ReplicaStatus::initial(self.alias.clone(), &state)));
        let state = Arc::new(RwLock::new(state));
        let camera = ReplicaCamera::new(Arc::clone(&status), Arc::clone(&state));

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, receivers) = start_polling(self.network.clone(), poller_shutdown_receiver);

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_commit_batch,
            self.on_reject_transaction,
            self.on_update_pool,
            self.on_propose,
            self.on_commit_vote,
            self.on_view_change_vote,
            self.on_receive_proposal,
            self.on_receive_view_change_vote,
            self.on_collect_certificate,
            self.on_start_view_change,
            self.on_start_view,
            self.on_primary_timeout,
            self.on_start_catchup,
            self.on_end_catchup,
            self.on_serve_catchup,
            self.on_safety_violation,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (catchup_server_shutdown, catchup_server_shutdown_receiver) = mpsc::channel();
        let catchup_server = CatchupServer::new(
            self.configuration.catchup_request_limit,
            self.kv_store.clone(),
            camera.clone(),
            receivers.server_requests,
            self.network.clone(),
            catchup_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let engine = Engine::new(
            EngineConfiguration::new(&self.configuration, self.alias, keypair),
            state,
            status,
            self.kv_store,
            self.network,
            event_publisher,
        );
        let algorithm = Algorithm::new(
            engine,
            receivers.requests,
            ConsensusMessageStub::new(
                receivers.consensus_messages,
                self.configuration.msg_buffer_capacity,
            ),
            CatchupClientStub::new(receivers.catchup_responses),
            algorithm_shutdown_receiver,
        )
        .start();

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = match (event_subscriber, event_bus_shutdown_receiver) {
            (Some(event_subscriber), Some(shutdown_receiver)) => Some(start_event_bus(
                event_handlers,
                event_subscriber,
                shutdown_receiver,
            )),
            _ => None,
        };

        Replica {
            camera,
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            catchup_server: Some(catchup_server),
            catchup_server_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Replica {
    camera: ReplicaCamera,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    catchup_server: Option<JoinHandle<()>>,
    catchup_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Returns a [camera](ReplicaCamera) which can be used to peek into the replica's state and status.
    pub fn camera(&self) -> &ReplicaCamera {
        &self.camera
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads make assumptions about
        // the validity of their channels based on this. The algorithm and catch-up server threads receive messages
        // from the poller, and assume that the poller will live longer than them.

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if let Some(event_bus) = self.event_bus.take() {
            event_bus.join().unwrap();
        }

        self.algorithm_shutdown.send(()).unwrap();
        if let Some(algorithm) = self.algorithm.take() {
            algorithm.join().unwrap();
        }

        self.catchup_server_shutdown.send(()).unwrap();
        if let Some(catchup_server) = self.catchup_server.take() {
            catchup_server.join().unwrap();
        }

        self.poller_shutdown.send(()).unwrap();
        if let Some(poller) = self.poller.take() {
            poller.join().unwrap();
        }
    }
}
