/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A pool of in-process replicas, plus the identities that administer it.

use std::{collections::BTreeMap, time::Duration};

use pool_consensus::{
    camera::ReplicaStatus,
    cluster::Cluster,
    config::Configuration,
    errors::GatewayError,
    gateway::Gateway,
    networking::in_memory::InMemoryNetwork,
    retry::Eventually,
    state::Genesis,
    types::{
        data_types::{Did, NetworkAddress, NodeAlias, ViewNumber},
        pool::NodeData,
        request::{NodeAction, Outcome, ReadAnswer, ReadQuery, Request},
        roles::Role,
    },
    wallet::{self, Wallet},
};

/// How long to wait for the pool to answer a single request or read.
pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(20);

const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn test_configuration() -> Configuration {
    Configuration::builder()
        .primary_timeout(Duration::from_secs(3))
        .view_change_timeout(Duration::from_secs(1))
        .catchup_grace(Duration::from_millis(100))
        .log_events(true)
        .build()
}

pub(crate) fn alias(n: u8) -> NodeAlias {
    NodeAlias::new(format!("Node{}", n))
}

/// A seed that is unique per `(tag, n)`.
pub(crate) fn seed(tag: &str, n: u8) -> [u8; 32] {
    let mut seed = [b'0'; 32];
    let tag = tag.as_bytes();
    let len = tag.len().min(30);
    seed[30 - len..30].copy_from_slice(&tag[..len]);
    seed[30] = b'0' + n / 10;
    seed[31] = b'0' + n % 10;
    seed
}

/// Poll for up to 30 seconds.
pub(crate) fn eventually() -> Eventually {
    Eventually::builder()
        .max_attempts(150)
        .interval(Duration::from_millis(200))
        .build()
}

pub(crate) struct TestPool {
    pub(crate) gateway: Gateway<InMemoryNetwork>,
    pub(crate) cluster: Cluster,
    pub(crate) wallet: Wallet,
    pub(crate) trustee: Did,
    /// The steward that added each node.
    pub(crate) stewards: BTreeMap<NodeAlias, Did>,
    pub(crate) node_data: BTreeMap<NodeAlias, NodeData>,
}

impl TestPool {
    /// Start a pool of `genesis_nodes` nodes, `Node1` to `Node<genesis_nodes>`, each owned by its own
    /// steward, administered by one trustee.
    pub(crate) fn start(genesis_nodes: u8, configuration: Configuration) -> TestPool {
        let mut wallet = Wallet::new();
        let (trustee, trustee_verkey) = wallet.create_identity(&seed("Trustee", 1));
        let mut genesis = Genesis::new().with_identity(trustee_verkey, Some("Trustee1"), Role::Trustee);

        let mut cluster = Cluster::new(configuration);
        let mut stewards = BTreeMap::new();
        let mut node_data = BTreeMap::new();
        for n in 1..=genesis_nodes {
            let (steward, steward_verkey) = wallet.create_identity(&seed("Steward", n));
            let steward_alias = format!("Steward{}", n);
            genesis = genesis.with_identity(steward_verkey, Some(&steward_alias), Role::Steward);

            let data = provision(&mut cluster, n);
            genesis = genesis.with_node(alias(n), steward.clone(), data.clone());
            stewards.insert(alias(n), steward);
            node_data.insert(alias(n), data);
        }
        cluster.start(genesis).unwrap();
        let gateway = cluster.gateway().unwrap();

        TestPool {
            gateway,
            cluster,
            wallet,
            trustee,
            stewards,
            node_data,
        }
    }

    /// Sign `request` as its builder and submit it until the pool answers.
    pub(crate) fn sign_and_submit(&self, mut request: Request) -> Outcome {
        let builder = request.identifier.clone();
        self.wallet.sign_request(&builder, &mut request).unwrap();
        self.submit(request)
    }

    /// Submit an already signed `request`, resubmitting it when the pool does not answer in time.
    pub(crate) fn submit(&self, request: Request) -> Outcome {
        let retries = Eventually::builder()
            .max_attempts(5)
            .interval(Duration::from_millis(10))
            .build();
        let (outcome, _) = retries
            .retry(|| match self.gateway.submit(request.clone()).wait(REPLY_TIMEOUT) {
                Ok(outcome) => Some(Ok(outcome)),
                Err(GatewayError::NoReply { waited }) => {
                    log::warn!("no reply to {} after {:?}, resubmitting", request.digest(), waited);
                    None
                }
                Err(err) => Some(Err(err)),
            })
            .unwrap();
        outcome
    }

    /// Register a new steward for node `n`.
    pub(crate) fn add_steward(&mut self, n: u8) -> Did {
        let (steward, verkey) = self.wallet.create_identity(&seed("Steward", n));
        let steward_alias = format!("Steward{}", n);
        let outcome = self.sign_and_submit(wallet::build_nym_request(
            &self.trustee,
            &steward,
            Some(verkey),
            Some(&steward_alias),
            Some(Role::Steward),
        ));
        assert!(outcome.is_reply(), "{:?}", outcome);
        steward
    }

    /// Register a steward for node `n`, start the node's replica, and have the steward add it to the pool.
    pub(crate) fn add_node(&mut self, n: u8) -> Outcome {
        let steward = self.add_steward(n);
        let data = provision(&mut self.cluster, n);
        self.cluster.start_service(&alias(n)).unwrap();
        self.stewards.insert(alias(n), steward.clone());
        self.node_data.insert(alias(n), data.clone());
        self.sign_and_submit(wallet::build_node_request(
            &steward,
            &alias(n),
            NodeAction::Add(data),
        ))
    }

    pub(crate) fn demote(&self, by: &Did, node: u8) -> Outcome {
        self.sign_and_submit(wallet::build_node_request(by, &alias(node), NodeAction::Demote))
    }

    pub(crate) fn promote(&self, by: &Did, node: u8) -> Outcome {
        self.sign_and_submit(wallet::build_node_request(by, &alias(node), NodeAction::Promote))
    }

    pub(crate) fn steward(&self, node: u8) -> Did {
        self.stewards[&alias(node)].clone()
    }

    /// The view, the primary, and the active pool a quorum of replicas agrees on.
    pub(crate) fn view_info(&self) -> (ViewNumber, NodeAlias, Vec<NodeAlias>) {
        eventually()
            .check(|| match self.gateway.read(ReadQuery::GetViewInfo, READ_TIMEOUT) {
                Ok(ReadAnswer::ViewInfo {
                    view,
                    primary: Some(primary),
                    active,
                }) => Ok((view, primary, active)),
                other => Err(other),
            })
            .unwrap()
    }

    /// The current view and its primary.
    pub(crate) fn primary(&self) -> (ViewNumber, NodeAlias) {
        let (view, primary, _) = self.view_info();
        (view, primary)
    }

    /// Wait until the pool installed a view above `old`'s, with a primary other than `old`'s.
    pub(crate) fn ensure_primary_changed(&self, old: &(ViewNumber, NodeAlias)) -> (ViewNumber, NodeAlias) {
        let mut latest = None;
        eventually()
            .until(|| {
                let current = self.primary();
                let changed = current.0 > old.0 && current.1 != old.1;
                latest = Some(current);
                changed
            })
            .unwrap();
        latest.unwrap()
    }

    /// Write `count` new identities through the trustee and read each of them back.
    pub(crate) fn ensure_pool_performs_write_read(&mut self, count: usize) {
        for _ in 0..count {
            let (dest, verkey) = self.wallet.create_random_identity();
            let outcome = self.sign_and_submit(wallet::build_nym_request(
                &self.trustee,
                &dest,
                Some(verkey),
                None,
                None,
            ));
            assert!(outcome.is_reply(), "{:?}", outcome);

            eventually()
                .until(|| {
                    matches!(
                        self.gateway.read(ReadQuery::GetNym(dest.clone()), READ_TIMEOUT),
                        Ok(ReadAnswer::Nym(Some(ref identity))) if identity.verkey == verkey
                    )
                })
                .unwrap();
        }
    }

    /// Wait until every running replica of an active node executed the same ledger, is in the same view,
    /// and sees `nodes_num` active nodes.
    pub(crate) fn ensure_pool_is_in_sync(&self, nodes_num: usize) {
        eventually()
            .until(|| {
                let statuses: Vec<ReplicaStatus> = self
                    .cluster
                    .statuses()
                    .into_iter()
                    .filter(|status| status.active.contains(&status.alias))
                    .collect();
                statuses.len() == nodes_num
                    && statuses.iter().all(|status| status.active.len() == nodes_num)
                    && statuses.windows(2).all(|pair| {
                        pair[0].last_executed == pair[1].last_executed
                            && pair[0].ledger_root == pair[1].ledger_root
                            && pair[0].view == pair[1].view
                    })
            })
            .unwrap();
    }
}

fn provision(cluster: &mut Cluster, n: u8) -> NodeData {
    cluster
        .provision(
            &alias(n),
            NetworkAddress::new("127.0.0.1", 9700 + 2 * n as u16),
            NetworkAddress::new("127.0.0.1", 9701 + 2 * n as u16),
            &seed("Node", n),
        )
        .unwrap()
}
