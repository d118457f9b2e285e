//! Staleness policy for records a fresh listing no longer contains.
//!
//! A completed sync is a full listing of its scope, so anything in scope that
//! was not seen by the run is presumed gone upstream. Such records are first
//! soft-pruned (marked inactive); long-inactive ones can optionally be removed.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::package::PackageRecord;
use crate::platform::PruneScope;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruningPolicy {
    pub grace_days: u32,
    /// 0 disables hard deletion
    pub hard_delete_days: u32,
}

/// Cutoffs for one run, derived from the run's start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunePlan {
    pub scope: PruneScope,
    /// Active records last seen strictly before this become inactive
    pub deactivate_before: DateTime<Utc>,
    /// Inactive records last seen strictly before this are removed
    pub delete_before: Option<DateTime<Utc>>,
}

impl PrunePlan {
    pub fn should_deactivate(&self, record: &PackageRecord) -> bool {
        record.is_active
            && self
                .scope
                .contains(record.platform_id, record.repository.as_deref())
            && record
                .last_seen_at
                .is_none_or(|seen| seen < self.deactivate_before)
    }

    /// Evaluated after deactivation; an active record is never eligible
    pub fn should_delete(&self, record: &PackageRecord) -> bool {
        let Some(cutoff) = self.delete_before else {
            return false;
        };
        !record.is_active
            && self
                .scope
                .contains(record.platform_id, record.repository.as_deref())
            && record.last_seen_at.is_some_and(|seen| seen < cutoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PruneOutcome {
    pub deactivated: usize,
    pub deleted: usize,
}

impl PruningPolicy {
    pub fn new(grace_days: u32, hard_delete_days: u32) -> Self {
        Self {
            grace_days,
            hard_delete_days,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.prune_grace_days, config.prune_hard_delete_days)
    }

    pub fn hard_delete_enabled(&self) -> bool {
        self.hard_delete_days > 0
    }

    pub fn plan(&self, scope: PruneScope, run_started_at: DateTime<Utc>) -> PrunePlan {
        let deactivate_before = run_started_at - Duration::days(i64::from(self.grace_days));
        let delete_before = self
            .hard_delete_enabled()
            .then(|| run_started_at - Duration::days(i64::from(self.hard_delete_days)));
        PrunePlan {
            scope,
            deactivate_before,
            delete_before,
        }
    }

    /// Soft prune, then (if enabled) hard delete, against `store`
    pub async fn apply(
        &self,
        store: &dyn Store,
        scope: PruneScope,
        run_started_at: DateTime<Utc>,
    ) -> Result<PruneOutcome> {
        let plan = self.plan(scope, run_started_at);
        let deactivated = store.deactivate_unseen(&plan).await?;
        let deleted = if plan.delete_before.is_some() {
            store.delete_inactive(&plan).await?
        } else {
            0
        };
        Ok(PruneOutcome {
            deactivated,
            deleted,
        })
    }
}
