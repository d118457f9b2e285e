use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::clock::Clock;
use crate::platform::SyncTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Fetch,
    Store,
    Prune,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Running { phase: SyncPhase },
    Complete,
    Error { message: String },
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Complete | SyncStatus::Error { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running {
                phase: SyncPhase::Fetch,
            } => "fetching",
            SyncStatus::Running {
                phase: SyncPhase::Store,
            } => "storing",
            SyncStatus::Running {
                phase: SyncPhase::Prune,
            } => "pruning",
            SyncStatus::Complete => "complete",
            SyncStatus::Error { .. } => "error",
        }
    }
}

/// Observable state of one target's sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobState {
    pub target: SyncTarget,
    pub status: SyncStatus,
    pub fetch_progress: u64,
    pub fetch_total: u64,
    pub store_progress: u64,
    pub store_total: u64,
    pub current_item: String,
    pub error: Option<String>,
    pub in_progress: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJobState {
    fn idle(target: SyncTarget) -> Self {
        Self {
            target,
            status: SyncStatus::Idle,
            fetch_progress: 0,
            fetch_total: 0,
            store_progress: 0,
            store_total: 0,
            current_item: String::new(),
            error: None,
            in_progress: false,
            started_at: None,
            finished_at: None,
        }
    }

    fn phase(&self) -> Option<SyncPhase> {
        match self.status {
            SyncStatus::Running { phase } => Some(phase),
            _ => None,
        }
    }
}

/// Raise progress and total (never lower them), keeping `progress <= total`
/// once a total is known. A report whose total is below the progress already
/// recorded is stale and ignored.
fn advance(progress: &mut u64, total: &mut u64, current: u64, new_total: u64) {
    if new_total > 0 && new_total < *progress {
        return;
    }
    *total = (*total).max(new_total);
    *progress = (*progress).max(current);
    if *total > 0 {
        *progress = (*progress).min(*total);
    }
}

/// Pollable progress of one sync target.
///
/// Writers are the target's single active run; any number of readers may take
/// snapshots concurrently. `in_progress` is only ever changed under the state
/// lock, together with the status it belongs to, so a snapshot never pairs a
/// terminal status with a held claim.
pub struct ProgressTracker {
    target: SyncTarget,
    state: RwLock<SyncJobState>,
    in_flight: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(target: SyncTarget, clock: Arc<dyn Clock>) -> Self {
        Self {
            target,
            state: RwLock::new(SyncJobState::idle(target)),
            in_flight: AtomicBool::new(false),
            clock,
        }
    }

    pub fn target(&self) -> SyncTarget {
        self.target
    }

    fn read(&self) -> RwLockReadGuard<'_, SyncJobState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SyncJobState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim the target and reset it for a new run in one step. Returns `None`
    /// while another run holds it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<FlightGuard> {
        let mut state = self.write();
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.reset(&mut state);
        Some(FlightGuard {
            tracker: Arc::clone(self),
            released: false,
        })
    }

    /// Run-start state: fetch phase, counters zeroed, error and item cleared
    fn reset(&self, state: &mut SyncJobState) {
        *state = SyncJobState::idle(self.target);
        state.status = SyncStatus::Running {
            phase: SyncPhase::Fetch,
        };
        state.in_progress = true;
        state.started_at = Some(self.clock.now());
    }

    pub fn report_fetch_progress(&self, current: u64, total: u64, item: &str) {
        let mut state = self.write();
        if state.phase() != Some(SyncPhase::Fetch) {
            return;
        }
        let (mut progress, mut fetch_total) = (state.fetch_progress, state.fetch_total);
        advance(&mut progress, &mut fetch_total, current, total);
        state.fetch_progress = progress;
        state.fetch_total = fetch_total;
        if !item.is_empty() {
            state.current_item = item.to_string();
        }
    }

    pub fn report_store_progress(&self, current: u64, total: u64) {
        let mut state = self.write();
        match state.phase() {
            Some(SyncPhase::Fetch) => {
                state.status = SyncStatus::Running {
                    phase: SyncPhase::Store,
                };
            }
            Some(SyncPhase::Store) => {}
            Some(SyncPhase::Prune) | None => return,
        }
        let (mut progress, mut store_total) = (state.store_progress, state.store_total);
        advance(&mut progress, &mut store_total, current, total);
        state.store_progress = progress;
        state.store_total = store_total;
    }

    pub fn enter_prune(&self) {
        let mut state = self.write();
        if state.phase().is_some() {
            state.status = SyncStatus::Running {
                phase: SyncPhase::Prune,
            };
            state.current_item.clear();
        }
    }

    /// Write the terminal status and give up the claim under one lock
    fn finish(&self, outcome: Result<(), String>) {
        let mut state = self.write();
        if state.phase().is_some() {
            match outcome {
                Ok(()) => state.status = SyncStatus::Complete,
                Err(message) => {
                    state.error = Some(message.clone());
                    state.status = SyncStatus::Error { message };
                }
            }
            state.finished_at = Some(self.clock.now());
        }
        state.in_progress = false;
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> SyncJobState {
        self.read().clone()
    }
}

/// Held by the one run allowed on a target. The run ends through
/// [`complete`](Self::complete) or [`fail`](Self::fail); a guard dropped
/// without either (the task was cancelled) fails the run and releases the
/// target anyway.
pub struct FlightGuard {
    tracker: Arc<ProgressTracker>,
    released: bool,
}

impl FlightGuard {
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn complete(mut self) {
        self.tracker.finish(Ok(()));
        self.released = true;
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.tracker.finish(Err(message.into()));
        self.released = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.released {
            self.tracker
                .finish(Err("sync task ended without a result".to_string()));
        }
    }
}
