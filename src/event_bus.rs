/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which fires the user-provided and logging handlers of every published
//! [`Event`].

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the handlers of every event type. When logging is enabled, the [`Logger`] of each event type is
/// registered before the user-provided handler.
pub(crate) struct EventHandlers {
    pub(crate) commit_batch_handlers: Vec<HandlerPtr<CommitBatchEvent>>,
    pub(crate) reject_transaction_handlers: Vec<HandlerPtr<RejectTransactionEvent>>,
    pub(crate) update_pool_handlers: Vec<HandlerPtr<UpdatePoolEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) commit_vote_handlers: Vec<HandlerPtr<CommitVoteEvent>>,
    pub(crate) view_change_vote_handlers: Vec<HandlerPtr<ViewChangeVoteEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_view_change_vote_handlers: Vec<HandlerPtr<ReceiveViewChangeVoteEvent>>,
    pub(crate) collect_certificate_handlers: Vec<HandlerPtr<CollectCertificateEvent>>,
    pub(crate) start_view_change_handlers: Vec<HandlerPtr<StartViewChangeEvent>>,
    pub(crate) start_view_handlers: Vec<HandlerPtr<StartViewEvent>>,
    pub(crate) primary_timeout_handlers: Vec<HandlerPtr<PrimaryTimeoutEvent>>,
    pub(crate) start_catchup_handlers: Vec<HandlerPtr<StartCatchupEvent>>,
    pub(crate) end_catchup_handlers: Vec<HandlerPtr<EndCatchupEvent>>,
    pub(crate) serve_catchup_handlers: Vec<HandlerPtr<ServeCatchupEvent>>,
    pub(crate) safety_violation_handlers: Vec<HandlerPtr<SafetyViolationEvent>>,
}

impl EventHandlers {
    pub(crate) fn new(
        log_events: bool,
        commit_batch_handler: Option<HandlerPtr<CommitBatchEvent>>,
        reject_transaction_handler: Option<HandlerPtr<RejectTransactionEvent>>,
        update_pool_handler: Option<HandlerPtr<UpdatePoolEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        commit_vote_handler: Option<HandlerPtr<CommitVoteEvent>>,
        view_change_vote_handler: Option<HandlerPtr<ViewChangeVoteEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        receive_view_change_vote_handler: Option<HandlerPtr<ReceiveViewChangeVoteEvent>>,
        collect_certificate_handler: Option<HandlerPtr<CollectCertificateEvent>>,
        start_view_change_handler: Option<HandlerPtr<StartViewChangeEvent>>,
        start_view_handler: Option<HandlerPtr<StartViewEvent>>,
        primary_timeout_handler: Option<HandlerPtr<PrimaryTimeoutEvent>>,
        start_catchup_handler: Option<HandlerPtr<StartCatchupEvent>>,
        end_catchup_handler: Option<HandlerPtr<EndCatchupEvent>>,
        serve_catchup_handler: Option<HandlerPtr<ServeCatchupEvent>>,
        safety_violation_handler: Option<HandlerPtr<SafetyViolationEvent>>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(handler);
            handlers
        }

        EventHandlers {
            commit_batch_handlers: handlers(log_events, commit_batch_handler),
            reject_transaction_handlers: handlers(log_events, reject_transaction_handler),
            update_pool_handlers: handlers(log_events, update_pool_handler),
            propose_handlers: handlers(log_events, propose_handler),
            commit_vote_handlers: handlers(log_events, commit_vote_handler),
            view_change_vote_handlers: handlers(log_events, view_change_vote_handler),
            receive_proposal_handlers: handlers(log_events, receive_proposal_handler),
            receive_view_change_vote_handlers: handlers(log_events, receive_view_change_vote_handler),
            collect_certificate_handlers: handlers(log_events, collect_certificate_handler),
            start_view_change_handlers: handlers(log_events, start_view_change_handler),
            start_view_handlers: handlers(log_events, start_view_handler),
            primary_timeout_handlers: handlers(log_events, primary_timeout_handler),
            start_catchup_handlers: handlers(log_events, start_catchup_handler),
            end_catchup_handlers: handlers(log_events, end_catchup_handler),
            serve_catchup_handlers: handlers(log_events, serve_catchup_handler),
            safety_violation_handlers: handlers(log_events, safety_violation_handler),
        }
    }

    /// Whether no handler is registered at all, in which case the replica does not publish events.
    pub(crate) fn is_empty(&self) -> bool {
        self.commit_batch_handlers.is_empty()
            && self.reject_transaction_handlers.is_empty()
            && self.update_pool_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.commit_vote_handlers.is_empty()
            && self.view_change_vote_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_view_change_vote_handlers.is_empty()
            && self.collect_certificate_handlers.is_empty()
            && self.start_view_change_handlers.is_empty()
            && self.start_view_handlers.is_empty()
            && self.primary_timeout_handlers.is_empty()
            && self.start_catchup_handlers.is_empty()
            && self.end_catchup_handlers.is_empty()
            && self.serve_catchup_handlers.is_empty()
            && self.safety_violation_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CommitBatch(commit_batch_event) => self
                .commit_batch_handlers
                .iter()
                .for_each(|handler| handler(&commit_batch_event)),

            Event::RejectTransaction(reject_transaction_event) => self
                .reject_transaction_handlers
                .iter()
                .for_each(|handler| handler(&reject_transaction_event)),

            Event::UpdatePool(update_pool_event) => self
                .update_pool_handlers
                .iter()
                .for_each(|handler| handler(&update_pool_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::CommitVote(commit_vote_event) => self
                .commit_vote_handlers
                .iter()
                .for_each(|handler| handler(&commit_vote_event)),

            Event::ViewChangeVote(view_change_vote_event) => self
                .view_change_vote_handlers
                .iter()
                .for_each(|handler| handler(&view_change_vote_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceiveViewChangeVote(receive_view_change_vote_event) => self
                .receive_view_change_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_view_change_vote_event)),

            Event::CollectCertificate(collect_certificate_event) => self
                .collect_certificate_handlers
                .iter()
                .for_each(|handler| handler(&collect_certificate_event)),

            Event::StartViewChange(start_view_change_event) => self
                .start_view_change_handlers
                .iter()
                .for_each(|handler| handler(&start_view_change_event)),

            Event::StartView(start_view_event) => self
                .start_view_handlers
                .iter()
                .for_each(|handler| handler(&start_view_event)),

            Event::PrimaryTimeout(primary_timeout_event) => self
                .primary_timeout_handlers
                .iter()
                .for_each(|handler| handler(&primary_timeout_event)),

            Event::StartCatchup(start_catchup_event) => self
                .start_catchup_handlers
                .iter()
                .for_each(|handler| handler(&start_catchup_event)),

            Event::EndCatchup(end_catchup_event) => self
                .end_catchup_handlers
                .iter()
                .for_each(|handler| handler(&end_catchup_event)),

            Event::ServeCatchup(serve_catchup_event) => self
                .serve_catchup_handlers
                .iter()
                .for_each(|handler| handler(&serve_catchup_event)),

            Event::SafetyViolation(safety_violation_event) => self
                .safety_violation_handlers
                .iter()
                .for_each(|handler| handler(&safety_violation_event)),
        }
    }
}

const RECV_TIMEOUT: Duration = Duration::from_millis(10);

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Event bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(RECV_TIMEOUT) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone: the replica is shutting down.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
