//! Soft, time-based leases on unlabeled triplets.
//!
//! A triplet handed to an annotator is stamped with `retrieved_at`. Until
//! `lock_timeout` has elapsed it is withheld from other annotators; after that
//! it becomes eligible again, even if the first annotator is still working on
//! it. A late label from the first annotator then overwrites (or is
//! overwritten by) the second one: last write wins.
//!
//! Store implementations must evaluate [`LeasePolicy::is_eligible`] and set
//! `retrieved_at` as one atomic step.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::Triplet;

/// Default lock window handed to annotators.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub lock_timeout: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl LeasePolicy {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }

    /// Retrievals strictly older than this instant are stale.
    ///
    /// Saturates at the earliest representable instant for very long windows.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lock_timeout)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_eligible(&self, triplet: &Triplet, now: DateTime<Utc>) -> bool {
        is_eligible_at(triplet.label.is_some(), triplet.retrieved_at, self.cutoff(now))
    }
}

/// The eligibility predicate in column form, shared with SQL-backed stores.
pub fn is_eligible_at(
    labeled: bool,
    retrieved_at: Option<DateTime<Utc>>,
    cutoff: DateTime<Utc>,
) -> bool {
    if labeled {
        return false;
    }
    match retrieved_at {
        None => true,
        Some(at) => at < cutoff,
    }
}
