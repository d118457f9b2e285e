//! Single-flight sync runs per target.
//!
//! Every target owns one [`ProgressTracker`]. A run first claims the tracker,
//! which resets it in the same step; a second trigger for the same target is
//! refused until the first run's [`FlightGuard`] records its outcome. Runs go fetch, then store, then
//! prune, and stop at the first failure without rolling back what was stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use super::auth::{AuthGate, SyncRequest};
use super::clock::Clock;
use super::prune::{PruneOutcome, PruningPolicy};
use super::tracker::{FlightGuard, ProgressTracker, SyncJobState};
use crate::error::{Result, SyncError};
use crate::fetch::FetcherRegistry;
use crate::platform::SyncTarget;
use crate::store::Store;
use crate::ui::prelude::*;

/// What one successful run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub target: SyncTarget,
    pub run_started_at: DateTime<Utc>,
    pub fetched: usize,
    pub stored: usize,
    pub pruned: PruneOutcome,
}

pub struct SyncOrchestrator {
    trackers: BTreeMap<SyncTarget, Arc<ProgressTracker>>,
    detached: Mutex<HashMap<SyncTarget, JoinHandle<()>>>,
    auth: AuthGate,
    fetchers: FetcherRegistry,
    store: Arc<dyn Store>,
    policy: PruningPolicy,
    clock: Arc<dyn Clock>,
}

impl SyncOrchestrator {
    pub fn new(
        auth: AuthGate,
        fetchers: FetcherRegistry,
        store: Arc<dyn Store>,
        policy: PruningPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let trackers = SyncTarget::ALL
            .into_iter()
            .map(|target| {
                (
                    target,
                    Arc::new(ProgressTracker::new(target, Arc::clone(&clock))),
                )
            })
            .collect();
        Self {
            trackers,
            detached: Mutex::new(HashMap::new()),
            auth,
            fetchers,
            store,
            policy,
            clock,
        }
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn tracker(&self, target: SyncTarget) -> &Arc<ProgressTracker> {
        // every target gets a tracker in `new`
        &self.trackers[&target]
    }

    pub fn status(&self, target: SyncTarget) -> SyncJobState {
        self.tracker(target).snapshot()
    }

    pub fn statuses(&self) -> Vec<SyncJobState> {
        self.trackers.values().map(|t| t.snapshot()).collect()
    }

    fn claim(&self, target: SyncTarget) -> Result<FlightGuard> {
        self.tracker(target)
            .try_acquire()
            .ok_or(SyncError::AlreadyRunning(target))
    }

    /// Start a detached run and return the freshly reset state.
    ///
    /// Fails only on authorization or when a run for `target` is in flight;
    /// pipeline failures are recorded on the tracker.
    pub fn trigger_sync(
        self: &Arc<Self>,
        target: SyncTarget,
        request: &SyncRequest,
    ) -> Result<SyncJobState> {
        self.auth.is_sync_allowed(request).into_result()?;
        let guard = self.claim(target)?;
        let snapshot = guard.tracker().snapshot();

        emit(
            Level::Info,
            "sync.started",
            &format!("{} package sync started", target.display_name()),
            Some(json!({ "target": target })),
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _ = this.supervise(guard).await;
        });
        self.detached
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(target, handle);

        Ok(snapshot)
    }

    /// Run `target` and wait for the outcome. Takes the same single-flight
    /// claim as [`trigger_sync`](Self::trigger_sync) but skips authorization,
    /// which is the caller's business.
    pub async fn run_to_completion(self: &Arc<Self>, target: SyncTarget) -> Result<RunSummary> {
        let guard = self.claim(target)?;
        Arc::clone(self).supervise(guard).await
    }

    /// Wait for the detached run of `target`, if one was started
    pub async fn wait(&self, target: SyncTarget) {
        let handle = self
            .detached
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&target);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Drive one run to a terminal tracker state. The pipeline runs in its own
    /// task so a panic inside a fetcher or store still ends in `error`. The
    /// terminal state and the claim release are written together.
    async fn supervise(self: Arc<Self>, guard: FlightGuard) -> Result<RunSummary> {
        let tracker = Arc::clone(guard.tracker());
        let target = tracker.target();

        let this = Arc::clone(&self);
        let run_tracker = Arc::clone(&tracker);
        let outcome = match tokio::spawn(async move { this.execute(&run_tracker).await }).await {
            Ok(result) => result,
            Err(e) => Err(SyncError::Aborted(e.to_string())),
        };

        match &outcome {
            Ok(summary) => {
                guard.complete();
                emit(
                    Level::Success,
                    "sync.completed",
                    &format!(
                        "{} sync completed: {} stored, {} deactivated, {} deleted",
                        target.display_name(),
                        summary.stored,
                        summary.pruned.deactivated,
                        summary.pruned.deleted
                    ),
                    serde_json::to_value(summary).ok(),
                );
            }
            Err(e) => {
                guard.fail(e.to_string());
                emit(
                    Level::Error,
                    "sync.failed",
                    &format!("{} sync failed: {}", target.display_name(), e),
                    Some(json!({ "target": target, "error": e.to_string() })),
                );
            }
        }

        outcome
    }

    async fn execute(&self, tracker: &ProgressTracker) -> Result<RunSummary> {
        let target = tracker.target();
        let fetcher = self.fetchers.get(target).ok_or_else(|| {
            SyncError::Configuration(format!("no package feed configured for {target}"))
        })?;
        let run_started_at = self.clock.now();

        let on_fetch = |current: u64, total: u64, item: &str| {
            tracker.report_fetch_progress(current, total, item)
        };
        let records = fetcher.fetch_all(&on_fetch).await?;
        emit(
            Level::Info,
            "sync.fetched",
            &format!("Fetched {} {} packages", records.len(), target.display_name()),
            Some(json!({ "target": target, "count": records.len() })),
        );

        let on_store = |current: u64, total: u64| tracker.report_store_progress(current, total);
        let stored = self
            .store
            .upsert_packages(&records, self.clock.now(), &on_store)
            .await?;
        emit(
            Level::Debug,
            "sync.stored",
            &format!("Stored {stored} {} packages", target.display_name()),
            Some(json!({ "target": target, "count": stored })),
        );

        tracker.enter_prune();
        let pruned = self
            .policy
            .apply(self.store.as_ref(), target.prune_scope(), run_started_at)
            .await?;
        emit(
            Level::Debug,
            "sync.pruned",
            &format!(
                "Pruned {}: {} deactivated, {} deleted",
                target.display_name(),
                pruned.deactivated,
                pruned.deleted
            ),
            Some(json!({ "target": target, "deactivated": pruned.deactivated, "deleted": pruned.deleted })),
        );

        Ok(RunSummary {
            target,
            run_started_at,
            fetched: records.len(),
            stored,
            pruned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchProgress, Fetcher};
    use crate::package::PackageRecord;
    use crate::platform::Platform;
    use crate::store::{MemoryStore, StoreProgress};
    use crate::sync::clock::ManualClock;
    use crate::sync::prune::PrunePlan;
    use crate::sync::tracker::SyncStatus;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use tokio::sync::Notify;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 9, 30, 0).unwrap()
    }

    struct ListFetcher {
        records: Vec<PackageRecord>,
    }

    #[async_trait]
    impl Fetcher for ListFetcher {
        async fn fetch_all(&self, progress: FetchProgress<'_>) -> Result<Vec<PackageRecord>> {
            let total = self.records.len() as u64;
            for (i, r) in self.records.iter().enumerate() {
                progress(i as u64 + 1, total, &r.name);
            }
            Ok(self.records.clone())
        }
    }

    /// Blocks until released, so a test can observe a run mid-flight
    struct GatedFetcher {
        gate: Arc<Notify>,
        records: Vec<PackageRecord>,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch_all(&self, _progress: FetchProgress<'_>) -> Result<Vec<PackageRecord>> {
            self.gate.notified().await;
            Ok(self.records.clone())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch_all(&self, _progress: FetchProgress<'_>) -> Result<Vec<PackageRecord>> {
            Err(SyncError::Fetch("mirror returned 503".to_string()))
        }
    }

    struct PanickingFetcher;

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch_all(&self, _progress: FetchProgress<'_>) -> Result<Vec<PackageRecord>> {
            panic!("parser blew up");
        }
    }

    /// Accepts upserts, fails every prune
    struct PruneFailsStore(MemoryStore);

    #[async_trait]
    impl Store for PruneFailsStore {
        async fn upsert_packages(
            &self,
            records: &[PackageRecord],
            seen_at: DateTime<Utc>,
            progress: StoreProgress<'_>,
        ) -> Result<usize> {
            self.0.upsert_packages(records, seen_at, progress).await
        }

        async fn deactivate_unseen(&self, _plan: &PrunePlan) -> Result<usize> {
            Err(SyncError::Store("database is locked".to_string()))
        }

        async fn delete_inactive(&self, _plan: &PrunePlan) -> Result<usize> {
            Ok(0)
        }
    }

    /// Stores the first batch, then fails; records whether pruning was attempted
    struct UpsertFailsStore {
        inner: MemoryStore,
        first_batch: usize,
        prune_calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Store for UpsertFailsStore {
        async fn upsert_packages(
            &self,
            records: &[PackageRecord],
            seen_at: DateTime<Utc>,
            progress: StoreProgress<'_>,
        ) -> Result<usize> {
            let head = &records[..self.first_batch.min(records.len())];
            self.inner.upsert_packages(head, seen_at, &|current, _| {
                progress(current, records.len() as u64)
            })
            .await?;
            Err(SyncError::Store("disk I/O error".to_string()))
        }

        async fn deactivate_unseen(&self, plan: &PrunePlan) -> Result<usize> {
            self.prune_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.deactivate_unseen(plan).await
        }

        async fn delete_inactive(&self, plan: &PrunePlan) -> Result<usize> {
            self.prune_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.delete_inactive(plan).await
        }
    }

    fn arch_records(n: usize) -> Vec<PackageRecord> {
        (0..n)
            .map(|i| PackageRecord::new(Platform::Arch, Some("official"), format!("pkg-{i}")))
            .collect()
    }

    fn orchestrator(
        fetchers: FetcherRegistry,
        store: Arc<dyn Store>,
        auth: AuthGate,
    ) -> Arc<SyncOrchestrator> {
        crate::ui::set_quiet(true);
        Arc::new(SyncOrchestrator::new(
            auth,
            fetchers,
            store,
            PruningPolicy::new(0, 0),
            Arc::new(ManualClock::new(t0())),
        ))
    }

    #[tokio::test]
    async fn second_trigger_while_running_conflicts() {
        let gate = Arc::new(Notify::new());
        let fetchers = FetcherRegistry::new().with(
            SyncTarget::Fedora,
            Arc::new(GatedFetcher {
                gate: Arc::clone(&gate),
                records: vec![PackageRecord::new(Platform::Fedora, None, "dnf")],
            }),
        );
        let orch = orchestrator(fetchers, Arc::new(MemoryStore::new()), AuthGate::new(false, None));
        let request = SyncRequest::anonymous();

        let first = orch.trigger_sync(SyncTarget::Fedora, &request).unwrap();
        assert!(first.in_progress);
        assert!(matches!(
            orch.trigger_sync(SyncTarget::Fedora, &request),
            Err(SyncError::AlreadyRunning(SyncTarget::Fedora))
        ));
        // other targets are independent
        assert!(orch.trigger_sync(SyncTarget::Macos, &request).is_ok());

        gate.notify_one();
        orch.wait(SyncTarget::Fedora).await;
        orch.wait(SyncTarget::Macos).await;

        let state = orch.status(SyncTarget::Fedora);
        assert_eq!(state.status, SyncStatus::Complete);
        assert!(!state.in_progress);
        assert_eq!(state.store_progress, state.store_total);
        assert_eq!(state.store_total, 1);
    }

    #[tokio::test]
    async fn denied_trigger_does_not_claim_the_target() {
        let fetchers = FetcherRegistry::new().with(
            SyncTarget::Arch,
            Arc::new(ListFetcher {
                records: arch_records(3),
            }),
        );
        let orch = orchestrator(
            fetchers,
            Arc::new(MemoryStore::new()),
            AuthGate::new(true, Some("s3cret".to_string())),
        );

        let denied = orch.trigger_sync(SyncTarget::Arch, &SyncRequest::with_secret("wrong"));
        assert!(matches!(denied, Err(SyncError::Denied(_))));
        assert_eq!(orch.status(SyncTarget::Arch).status, SyncStatus::Idle);

        orch.trigger_sync(SyncTarget::Arch, &SyncRequest::with_secret("s3cret"))
            .unwrap();
        orch.wait(SyncTarget::Arch).await;
        assert_eq!(orch.status(SyncTarget::Arch).status, SyncStatus::Complete);
    }

    #[tokio::test]
    async fn run_prunes_records_missing_from_the_listing() {
        let store = Arc::new(MemoryStore::new());
        let mut foo = PackageRecord::new(Platform::Arch, Some("official"), "foo");
        foo.last_seen_at = Some(t0() - Duration::days(1));
        store.insert_raw(foo);

        let mut records = arch_records(99);
        records.push(PackageRecord::new(Platform::Arch, Some("official"), "bar"));
        let fetchers = FetcherRegistry::new().with(SyncTarget::Arch, Arc::new(ListFetcher { records }));
        let orch = orchestrator(fetchers, store.clone(), AuthGate::new(false, None));

        let summary = orch.run_to_completion(SyncTarget::Arch).await.unwrap();

        assert_eq!(summary.fetched, 100);
        assert_eq!(summary.pruned.deactivated, 1);
        assert!(!store.find(Platform::Arch, Some("official"), "foo").unwrap().is_active);
        assert!(store.find(Platform::Arch, Some("official"), "bar").unwrap().is_active);

        let state = orch.status(SyncTarget::Arch);
        assert_eq!(state.fetch_progress, 100);
        assert_eq!(state.fetch_total, 100);
        assert_eq!(state.store_progress, 100);
    }

    #[tokio::test]
    async fn fetch_failure_skips_store_and_prune() {
        let store = Arc::new(MemoryStore::new());
        let mut existing = PackageRecord::new(Platform::Windows, None, "Git.Git");
        existing.last_seen_at = Some(t0() - Duration::days(10));
        store.insert_raw(existing);

        let fetchers = FetcherRegistry::new().with(SyncTarget::Windows, Arc::new(FailingFetcher));
        let orch = orchestrator(fetchers, store.clone(), AuthGate::new(false, None));

        orch.trigger_sync(SyncTarget::Windows, &SyncRequest::anonymous())
            .unwrap();
        orch.wait(SyncTarget::Windows).await;

        let state = orch.status(SyncTarget::Windows);
        assert!(matches!(state.status, SyncStatus::Error { .. }));
        assert!(state.error.unwrap().contains("503"));
        assert!(!state.in_progress);
        assert!(store.find(Platform::Windows, None, "Git.Git").unwrap().is_active);
    }

    #[tokio::test]
    async fn prune_failure_keeps_upserted_records() {
        let store = Arc::new(PruneFailsStore(MemoryStore::new()));
        let fetchers = FetcherRegistry::new().with(
            SyncTarget::Arch,
            Arc::new(ListFetcher {
                records: arch_records(2),
            }),
        );
        let orch = orchestrator(fetchers, store.clone(), AuthGate::new(false, None));

        let err = orch.run_to_completion(SyncTarget::Arch).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
        assert_eq!(store.0.len(), 2);

        let state = orch.status(SyncTarget::Arch);
        assert_eq!(state.error.as_deref(), Some("Store error: database is locked"));
        assert!(!state.in_progress);
    }

    #[tokio::test]
    async fn store_failure_ends_in_error_without_pruning() {
        let inner = MemoryStore::new();
        let mut stale = PackageRecord::new(Platform::Arch, Some("official"), "stale");
        stale.last_seen_at = Some(t0() - Duration::days(30));
        inner.insert_raw(stale);
        let store = Arc::new(UpsertFailsStore {
            inner,
            first_batch: 3,
            prune_calls: Default::default(),
        });
        let fetchers = FetcherRegistry::new().with(
            SyncTarget::Arch,
            Arc::new(ListFetcher {
                records: arch_records(5),
            }),
        );
        let orch = orchestrator(fetchers, store.clone(), AuthGate::new(false, None));

        orch.trigger_sync(SyncTarget::Arch, &SyncRequest::anonymous())
            .unwrap();
        orch.wait(SyncTarget::Arch).await;

        let state = orch.status(SyncTarget::Arch);
        assert!(matches!(state.status, SyncStatus::Error { .. }));
        assert_eq!(state.error.as_deref(), Some("Store error: disk I/O error"));
        assert!(!state.in_progress);
        assert_eq!(state.store_progress, 3);
        assert_eq!(
            store.prune_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        // the first batch stays; the stale record is not deactivated
        assert_eq!(store.inner.len(), 4);
        assert!(store.inner.find(Platform::Arch, Some("official"), "pkg-2").is_some());
        assert!(store.inner.find(Platform::Arch, Some("official"), "stale").unwrap().is_active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn status_never_reports_terminal_and_in_progress_together() {
        let fetchers = FetcherRegistry::new().with(
            SyncTarget::Arch,
            Arc::new(ListFetcher {
                records: arch_records(2),
            }),
        );
        let orch = orchestrator(fetchers, Arc::new(MemoryStore::new()), AuthGate::new(false, None));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let orch = Arc::clone(&orch);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(std::sync::atomic::Ordering::Relaxed) {
                        let s = orch.status(SyncTarget::Arch);
                        assert!(!(s.status.is_terminal() && s.in_progress), "{s:?}");
                        if matches!(s.status, SyncStatus::Running { .. }) {
                            assert!(s.in_progress, "{s:?}");
                        }
                    }
                })
            })
            .collect();

        for _ in 0..2_000 {
            orch.trigger_sync(SyncTarget::Arch, &SyncRequest::anonymous())
                .unwrap();
            orch.wait(SyncTarget::Arch).await;
            let state = orch.status(SyncTarget::Arch);
            assert_eq!(state.status, SyncStatus::Complete);
            assert!(!state.in_progress);
        }
        done.store(true, std::sync::atomic::Ordering::Relaxed);
        for reader in readers {
            reader.join().expect("reader saw a torn status");
        }
    }

    #[tokio::test]
    async fn missing_fetcher_fails_the_run_not_the_trigger() {
        let orch = orchestrator(
            FetcherRegistry::new(),
            Arc::new(MemoryStore::new()),
            AuthGate::new(false, None),
        );
        assert!(orch.trigger_sync(SyncTarget::Aur, &SyncRequest::anonymous()).is_ok());
        orch.wait(SyncTarget::Aur).await;
        let state = orch.status(SyncTarget::Aur);
        assert!(matches!(state.status, SyncStatus::Error { .. }));
        assert!(!state.in_progress);
    }

    #[tokio::test]
    async fn panicking_fetcher_still_releases_the_target() {
        let fetchers = FetcherRegistry::new().with(SyncTarget::Ubuntu, Arc::new(PanickingFetcher));
        let orch = orchestrator(fetchers, Arc::new(MemoryStore::new()), AuthGate::new(false, None));

        let err = orch.run_to_completion(SyncTarget::Ubuntu).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted(_)));
        let state = orch.status(SyncTarget::Ubuntu);
        assert!(matches!(state.status, SyncStatus::Error { .. }));
        assert!(!state.in_progress);

        // claimable again, so the rerun panics rather than conflicting
        assert!(matches!(
            orch.run_to_completion(SyncTarget::Ubuntu).await,
            Err(SyncError::Aborted(_))
        ));
    }
}
