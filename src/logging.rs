/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [configuration](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
//! onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitBatch](crate::events::CommitBatchEvent) is printed:
//!
//! ```text
//! CommitBatch, 1701329264, 12, 3, fNGCJyk, 4, Id5u7f6
//! ```
//!
//! In the snippet:
//! - The third and fourth values are the sequence number and the view of the batch.
//! - The fifth value is the first seven characters of the Base64 encoding of the batch digest.
//! - The sixth value is the number of requests in the batch.
//! - The seventh value is the first seven characters of the Base64 encoding of the new ledger root.

use std::time::SystemTime;

use crate::{events::*, types::data_types::first_seven_base64_chars};

// Names of each event in PascalCase for printing:
pub const COMMIT_BATCH: &str = "CommitBatch";
pub const REJECT_TRANSACTION: &str = "RejectTransaction";
pub const UPDATE_POOL: &str = "UpdatePool";

pub const PROPOSE: &str = "Propose";
pub const COMMIT_VOTE: &str = "CommitVote";
pub const VIEW_CHANGE_VOTE: &str = "ViewChangeVote";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VIEW_CHANGE_VOTE: &str = "ReceiveViewChangeVote";
pub const COLLECT_CERTIFICATE: &str = "CollectCertificate";

pub const START_VIEW_CHANGE: &str = "StartViewChange";
pub const START_VIEW: &str = "StartView";
pub const PRIMARY_TIMEOUT: &str = "PrimaryTimeout";

pub const START_CATCHUP: &str = "StartCatchup";
pub const END_CATCHUP: &str = "EndCatchup";
pub const SERVE_CATCHUP: &str = "ServeCatchup";

pub const SAFETY_VIOLATION: &str = "SafetyViolation";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CommitBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_batch_event: &CommitBatchEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                COMMIT_BATCH,
                secs_since_unix_epoch(commit_batch_event.timestamp),
                commit_batch_event.seq,
                commit_batch_event.view,
                first_seven_base64_chars(&commit_batch_event.digest.bytes()),
                commit_batch_event.requests,
                first_seven_base64_chars(&commit_batch_event.ledger_root.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_transaction_event: &RejectTransactionEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                REJECT_TRANSACTION,
                secs_since_unix_epoch(reject_transaction_event.timestamp),
                reject_transaction_event.seq,
                first_seven_base64_chars(&reject_transaction_event.digest.bytes()),
                reject_transaction_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdatePoolEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_pool_event: &UpdatePoolEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}, {}, {}",
                UPDATE_POOL,
                secs_since_unix_epoch(update_pool_event.timestamp),
                update_pool_event.seq,
                update_pool_event.result.kind,
                update_pool_event.result.alias,
                update_pool_event.result.quorums_after.active,
                update_pool_event.result.quorums_after.f
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.proposal.view,
                propose_event.proposal.seq,
                propose_event.proposal.batch.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_vote_event: &CommitVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_VOTE,
                secs_since_unix_epoch(commit_vote_event.timestamp),
                commit_vote_event.vote.view,
                commit_vote_event.vote.seq,
                first_seven_base64_chars(&commit_vote_event.vote.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewChangeVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |view_change_vote_event: &ViewChangeVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VIEW_CHANGE_VOTE,
                secs_since_unix_epoch(view_change_vote_event.timestamp),
                view_change_vote_event.vote.target,
                view_change_vote_event.vote.last_executed,
                view_change_vote_event.vote.active_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                receive_proposal_event.origin,
                receive_proposal_event.proposal.view,
                receive_proposal_event.proposal.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveViewChangeVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_view_change_vote_event: &ReceiveViewChangeVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_VIEW_CHANGE_VOTE,
                secs_since_unix_epoch(receive_view_change_vote_event.timestamp),
                receive_view_change_vote_event.origin,
                receive_view_change_vote_event.target
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectCertificateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_certificate_event: &CollectCertificateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                COLLECT_CERTIFICATE,
                secs_since_unix_epoch(collect_certificate_event.timestamp),
                collect_certificate_event.certificate.view,
                collect_certificate_event.certificate.seq,
                first_seven_base64_chars(&collect_certificate_event.certificate.digest.bytes()),
                collect_certificate_event.certificate.signatures.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartViewChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_view_change_event: &StartViewChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                START_VIEW_CHANGE,
                secs_since_unix_epoch(start_view_change_event.timestamp),
                start_view_change_event.view,
                start_view_change_event.target,
                start_view_change_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_view_event: &StartViewEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_VIEW,
                secs_since_unix_epoch(start_view_event.timestamp),
                start_view_event.view,
                start_view_event
                    .primary
                    .as_ref()
                    .map_or("-".to_string(), ToString::to_string),
                start_view_event.suspected.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrimaryTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |primary_timeout_event: &PrimaryTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PRIMARY_TIMEOUT,
                secs_since_unix_epoch(primary_timeout_event.timestamp),
                primary_timeout_event.view,
                primary_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartCatchupEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_catchup_event: &StartCatchupEvent| {
            log::info!(
                "{}, {}, {}",
                START_CATCHUP,
                secs_since_unix_epoch(start_catchup_event.timestamp),
                start_catchup_event.from
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndCatchupEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_catchup_event: &EndCatchupEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                END_CATCHUP,
                secs_since_unix_epoch(end_catchup_event.timestamp),
                end_catchup_event.peer,
                end_catchup_event.applied,
                end_catchup_event.last_executed
            )
        };
        Box::new(logger)
    }
}

impl Logger for ServeCatchupEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |serve_catchup_event: &ServeCatchupEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SERVE_CATCHUP,
                secs_since_unix_epoch(serve_catchup_event.timestamp),
                serve_catchup_event.peer,
                serve_catchup_event.from,
                serve_catchup_event.entries
            )
        };
        Box::new(logger)
    }
}

impl Logger for SafetyViolationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |safety_violation_event: &SafetyViolationEvent| {
            log::error!(
                "{}, {}, {}",
                SAFETY_VIOLATION,
                secs_since_unix_epoch(safety_violation_event.timestamp),
                safety_violation_event.error
            )
        };
        Box::new(logger)
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
