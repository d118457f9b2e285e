//! The sync engine: authorization, per-target progress, pruning, single-flight
//! runs and the periodic sweep.

pub mod auth;
pub mod clock;
pub mod orchestrator;
pub mod prune;
pub mod scheduler;
pub mod tracker;

pub use auth::{AuthDecision, AuthGate, DenyReason, SyncRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use orchestrator::{RunSummary, SyncOrchestrator};
pub use prune::{PruneOutcome, PrunePlan, PruningPolicy};
pub use scheduler::{AutoScheduler, AutoSyncReport, AutoSyncStatus};
pub use tracker::{ProgressTracker, SyncJobState, SyncPhase, SyncStatus};
