/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, which drives the replica's [consensus engine](crate::consensus::engine::Engine).
//!
//! On start, the thread replays the replica's ledger store into its replicated state, then loops forever:
//! 1. Hand every newly received client request to the engine.
//! 2. Receive consensus messages relevant in the current view for a short while, handing each to the engine.
//! 3. Hand every newly received catch-up response to the engine.
//! 4. Fire the engine's timers.
//!
//! If the engine fails, the replica halts: the thread keeps running until shutdown, but stops participating.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    consensus::engine::Engine,
    networking::{
        network::{Network, PeerId},
        receiving::{CatchupClientStub, ConsensusMessageReceiveError, ConsensusMessageStub},
    },
    store::kv_store::KVStore,
    types::request::Request,
};

/// How long each iteration waits for a consensus message before firing the engine's timers.
const RECV_WINDOW: Duration = Duration::from_millis(10);

const HALTED_SLEEP: Duration = Duration::from_millis(50);

pub(crate) struct Algorithm<N: Network + 'static, K: KVStore> {
    engine: Engine<N, K>,
    requests: Receiver<(PeerId, Request)>,
    consensus_stub: ConsensusMessageStub,
    catchup_stub: CatchupClientStub,
    shutdown_signal: Receiver<()>,
}

impl<N: Network + 'static, K: KVStore> Algorithm<N, K> {
    pub(crate) fn new(
        engine: Engine<N, K>,
        requests: Receiver<(PeerId, Request)>,
        consensus_stub: ConsensusMessageStub,
        catchup_stub: CatchupClientStub,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            engine,
            requests,
            consensus_stub,
            catchup_stub,
            shutdown_signal,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = self.engine.recover() {
                self.engine.halt(err);
            }

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Algorithm thread disconnected from main thread")
                    }
                }

                if self.engine.is_halted() {
                    thread::sleep(HALTED_SLEEP);
                    continue;
                }

                while let Ok((origin, request)) = self.requests.try_recv() {
                    self.engine.on_receive_request(origin, request);
                }

                let deadline = Instant::now() + RECV_WINDOW;
                loop {
                    match self.consensus_stub.recv(self.engine.view(), deadline) {
                        Ok((origin, msg)) => {
                            if let Err(err) = self.engine.on_receive_msg(origin, msg) {
                                self.engine.halt(err);
                                break;
                            }
                        }
                        Err(ConsensusMessageReceiveError::Timeout) => break,
                        Err(ConsensusMessageReceiveError::Disconnected) => {
                            panic!("The poller has disconnected from the algorithm thread")
                        }
                    }
                }
                if self.engine.is_halted() {
                    continue;
                }

                while let Some((origin, response)) = self.catchup_stub.try_recv_response() {
                    if let Err(err) = self.engine.on_receive_catchup_response(origin, response) {
                        self.engine.halt(err);
                        break;
                    }
                }
                if self.engine.is_halted() {
                    continue;
                }

                self.engine.tick();
            }
        })
    }
}
