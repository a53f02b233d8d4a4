//! Status reporting
//!
//! [`report`] is a pure function from the previous status and the outcome of
//! one reconcile step to the next status. `observedGeneration` only advances
//! on a fully successful sync.

use chrono::{DateTime, Utc};
use o2_common::crd::{
    Condition, ConditionStatus, ResourcePhase, ResourceStatus, CONDITION_ERROR, CONDITION_READY,
    CONDITION_SYNCED,
};
use o2_common::Error;

/// What a reconcile step achieved
#[derive(Debug)]
pub enum Outcome<'a> {
    /// A sync attempt is starting
    Syncing,
    /// Remote state matches the spec
    Synced {
        /// Backend id, when the kind has a remote object
        remote_id: Option<String>,
        /// Fingerprint of the payload now on the backend
        fingerprint: Option<String>,
        /// A remote write happened in this reconcile
        wrote: bool,
    },
    /// The sync failed
    Failed(&'a Error),
    /// Deletion is in progress
    Deleting,
    /// Deletion cannot proceed yet
    DeletionBlocked(&'a Error),
}

/// Compute the status after `outcome`
pub fn report(
    previous: &ResourceStatus,
    generation: i64,
    outcome: Outcome<'_>,
    now: DateTime<Utc>,
) -> ResourceStatus {
    let mut next = previous.clone();
    match outcome {
        Outcome::Syncing => {
            next.phase = ResourcePhase::Syncing;
            set_condition(&mut next, CONDITION_READY, false, "Syncing", "sync in progress", now);
            next.message = None;
        }
        Outcome::Synced {
            remote_id,
            fingerprint,
            wrote,
        } => {
            next.phase = ResourcePhase::Ready;
            set_condition(&mut next, CONDITION_READY, true, "Synced", "", now);
            set_condition(&mut next, CONDITION_SYNCED, true, "Synced", "", now);
            set_condition(&mut next, CONDITION_ERROR, false, "NoError", "", now);
            next.observed_generation = Some(generation);
            if remote_id.is_some() {
                next.remote_id = remote_id;
            }
            next.synced_fingerprint = fingerprint;
            next.message = None;
            if wrote || next != *previous || next.last_sync_time.is_none() {
                next.last_sync_time = Some(now);
            }
        }
        Outcome::Failed(err) => {
            next.phase = ResourcePhase::Error;
            let reason = err.reason();
            let message = err.to_string();
            set_condition(&mut next, CONDITION_READY, false, reason, &message, now);
            set_condition(&mut next, CONDITION_SYNCED, false, reason, &message, now);
            set_condition(&mut next, CONDITION_ERROR, true, reason, &message, now);
            next.message = Some(message);
        }
        Outcome::Deleting => {
            next.phase = ResourcePhase::Deleting;
            set_condition(&mut next, CONDITION_READY, false, "Deleting", "deletion in progress", now);
            next.message = None;
        }
        Outcome::DeletionBlocked(err) => {
            next.phase = ResourcePhase::Deleting;
            let reason = err.reason();
            let message = err.to_string();
            set_condition(&mut next, CONDITION_READY, false, "Deleting", "deletion in progress", now);
            set_condition(&mut next, CONDITION_ERROR, true, reason, &message, now);
            next.message = Some(message);
        }
    }
    next
}

/// Upsert a condition, keeping its transition time when the status is unchanged
fn set_condition(
    status: &mut ResourceStatus,
    type_: &str,
    value: bool,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    let value = if value {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    match status.conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != value {
                existing.last_transition_time = now;
            }
            existing.status = value;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        }
        None => status.conditions.push(Condition {
            type_: type_.to_string(),
            status: value,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
        }),
    }
}
