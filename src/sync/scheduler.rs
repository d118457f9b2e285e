//! Periodic sweep over every sync target.
//!
//! A sweep runs the targets one after another through the orchestrator and
//! collects a per-target result; one target failing never stops the sweep.
//! The last sweep time lives in memory only.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::auth::SyncRequest;
use super::clock::Clock;
use super::orchestrator::SyncOrchestrator;
use crate::error::{Result, SyncError};
use crate::platform::SyncTarget;
use crate::ui::prelude::*;

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Waiting,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSyncStatus {
    pub enabled: bool,
    pub interval_days: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: Option<DateTime<Utc>>,
    pub status: SchedulerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target: SyncTarget,
    pub status: TargetOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AutoSyncReport {
    Disabled,
    NotDue {
        last_sync: Option<DateTime<Utc>>,
        next_sync: DateTime<Utc>,
        hours_until_next: i64,
    },
    Completed {
        timestamp: DateTime<Utc>,
        last_sync: DateTime<Utc>,
        next_sync: DateTime<Utc>,
        results: Vec<TargetResult>,
        summary: SweepSummary,
    },
}

pub struct AutoScheduler {
    interval_days: u32,
    last_auto_sync: RwLock<Option<DateTime<Utc>>>,
    sweep: tokio::sync::Mutex<()>,
    orchestrator: Arc<SyncOrchestrator>,
    clock: Arc<dyn Clock>,
}

impl AutoScheduler {
    pub fn new(interval_days: u32, orchestrator: Arc<SyncOrchestrator>) -> Self {
        let clock = Arc::clone(orchestrator.clock());
        Self {
            interval_days,
            last_auto_sync: RwLock::new(None),
            sweep: tokio::sync::Mutex::new(()),
            orchestrator,
            clock,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_days > 0
    }

    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_auto_sync.read().unwrap_or_else(|p| p.into_inner())
    }

    /// When the next sweep becomes due. Disabled schedulers report the Unix
    /// epoch; one that never swept is due now.
    pub fn next_due(&self, last_sync: Option<DateTime<Utc>>) -> DateTime<Utc> {
        if !self.is_enabled() {
            return DateTime::UNIX_EPOCH;
        }
        match last_sync {
            Some(last) => last + Duration::days(i64::from(self.interval_days)),
            None => self.clock.now(),
        }
    }

    pub fn status(&self) -> AutoSyncStatus {
        let last_sync = self.last_sync();
        let enabled = self.is_enabled();
        let next = self.next_due(last_sync);
        let ready = enabled && self.clock.now() >= next;
        AutoSyncStatus {
            enabled,
            interval_days: self.interval_days,
            last_sync,
            next_sync: enabled.then_some(next),
            status: if ready {
                SchedulerState::Ready
            } else {
                SchedulerState::Waiting
            },
        }
    }

    /// Sweep every target if a sweep is due.
    pub async fn maybe_run_all(&self, request: &SyncRequest) -> Result<AutoSyncReport> {
        self.orchestrator
            .auth()
            .is_sync_allowed(request)
            .into_result()?;

        if !self.is_enabled() {
            emit(
                Level::Debug,
                "auto_sync.disabled",
                "Auto sync is disabled",
                None,
            );
            return Ok(AutoSyncReport::Disabled);
        }

        let _sweep = self.sweep.try_lock().map_err(|_| SyncError::SweepRunning)?;

        let started = self.clock.now();
        let last_sync = self.last_sync();
        let next = self.next_due(last_sync);
        if started < next {
            let remaining = (next - started).num_milliseconds();
            let hours_until_next = (remaining + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR;
            emit(
                Level::Debug,
                "auto_sync.not_due",
                &format!("Auto sync not due for another {hours_until_next}h"),
                Some(json!({ "nextSync": next })),
            );
            return Ok(AutoSyncReport::NotDue {
                last_sync,
                next_sync: next,
                hours_until_next,
            });
        }

        emit(
            Level::Info,
            "auto_sync.started",
            &format!("Starting automatic sync of {} targets", SyncTarget::ALL.len()),
            None,
        );

        let mut results = Vec::with_capacity(SyncTarget::ALL.len());
        for target in SyncTarget::ALL {
            let result = match self.orchestrator.run_to_completion(target).await {
                Ok(summary) => TargetResult {
                    target,
                    status: TargetOutcome::Success,
                    package_count: Some(summary.stored),
                    error: None,
                },
                Err(e) => TargetResult {
                    target,
                    status: TargetOutcome::Failed,
                    package_count: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }

        // a partially failed sweep still counts as a sweep
        *self.last_auto_sync.write().unwrap_or_else(|p| p.into_inner()) = Some(started);

        let successful = results
            .iter()
            .filter(|r| r.status == TargetOutcome::Success)
            .count();
        let summary = SweepSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        };
        emit(
            if summary.failed == 0 {
                Level::Success
            } else {
                Level::Warn
            },
            "auto_sync.completed",
            &format!(
                "Auto sync completed: {}/{} targets synced successfully",
                summary.successful, summary.total
            ),
            serde_json::to_value(summary).ok(),
        );

        Ok(AutoSyncReport::Completed {
            timestamp: started,
            last_sync: started,
            next_sync: self.next_due(Some(started)),
            results,
            summary,
        })
    }
}
