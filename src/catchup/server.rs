/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`CatchupServer`], which answers catch-up requests from the replica's
//! [ledger store](crate::store) and reads from its [camera](crate::camera::ReplicaCamera).
//!
//! Both are answered on the server's own thread, so a replica that is busy executing or changing view still
//! serves its peers and clients.

use std::{
    cmp::min,
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::{
    camera::ReplicaCamera,
    events::{Event, ServeCatchupEvent},
    networking::{
        messages::ReplyMessage,
        network::{Network, PeerId},
        receiving::ServerRequest,
        sending::SenderHandle,
    },
    store::kv_store::KVStore,
};

use super::messages::{CatchupRequest, CatchupResponse};

const RECV_TIMEOUT: Duration = Duration::from_millis(10);

pub(crate) struct CatchupServer<N: Network + 'static, K: KVStore> {
    request_limit: u32,
    store: K,
    camera: ReplicaCamera,
    requests: Receiver<(PeerId, ServerRequest)>,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, K: KVStore> CatchupServer<N, K> {
    pub(crate) fn new(
        request_limit: u32,
        store: K,
        camera: ReplicaCamera,
        requests: Receiver<(PeerId, ServerRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            request_limit,
            store,
            camera,
            requests,
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Catch-up server thread disconnected from main thread")
                }
            }

            match self.requests.recv_timeout(RECV_TIMEOUT) {
                Ok((origin, ServerRequest::Read { query_id, query })) => {
                    let answer = self.camera.answer(&query);
                    let f = self.camera.status().f as u64;
                    self.sender
                        .send(origin, ReplyMessage::ReadReply { query_id, answer, f });
                }
                Ok((origin, ServerRequest::Catchup(request))) => self.on_catchup_request(origin, request),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn on_catchup_request(&mut self, origin: PeerId, request: CatchupRequest) {
        let limit = min(request.limit, self.request_limit) as usize;
        let entries = self.store.ledger_entries(request.from, limit);
        let new_view = self.store.latest_new_view();

        match (entries, new_view) {
            (Ok(entries), Ok(new_view)) => {
                Event::ServeCatchup(ServeCatchupEvent {
                    timestamp: SystemTime::now(),
                    peer: origin.clone(),
                    from: request.from,
                    entries: entries.len(),
                })
                .publish(&self.event_publisher);
                self.sender
                    .send(origin, CatchupResponse { entries, new_view });
            }
            (Err(err), _) | (_, Err(err)) => {
                log::error!("Catch-up server failed to read the ledger store: {}", err)
            }
        }
    }
}
