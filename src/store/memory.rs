use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{Catalog, Store, StoreProgress};
use crate::error::{Result, SyncError};
use crate::package::{PackageKey, PackageRecord, PackageUpdate, StoredPackage};
use crate::platform::{Platform, PlatformInfo};
use crate::sync::prune::PrunePlan;

#[derive(Default)]
struct State {
    next_id: i64,
    packages: BTreeMap<i64, PackageRecord>,
    by_key: HashMap<PackageKey, i64>,
    platforms: BTreeMap<String, PlatformInfo>,
}

impl State {
    fn remove_package(&mut self, id: i64) -> bool {
        match self.packages.remove(&id) {
            Some(record) => {
                self.by_key.remove(&record.key());
                true
            }
            None => false,
        }
    }
}

/// Process-local store, mainly for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Put a record in as-is, keeping its `is_active` and `last_seen_at`
    pub fn insert_raw(&self, record: PackageRecord) -> i64 {
        let mut state = self.lock();
        let key = record.key();
        if let Some(&id) = state.by_key.get(&key) {
            state.packages.insert(id, record);
            return id;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.packages.insert(id, record);
        state.by_key.insert(key, id);
        id
    }

    pub fn find(&self, platform: Platform, repository: Option<&str>, name: &str) -> Option<PackageRecord> {
        let state = self.lock();
        let key = PackageKey {
            platform_id: platform,
            repository: repository.map(str::to_string),
            name: name.to_string(),
        };
        state
            .by_key
            .get(&key)
            .and_then(|id| state.packages.get(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_packages(
        &self,
        records: &[PackageRecord],
        seen_at: DateTime<Utc>,
        progress: StoreProgress<'_>,
    ) -> Result<usize> {
        let total = records.len() as u64;
        progress(0, total);
        for (i, record) in records.iter().enumerate() {
            let mut refreshed = record.clone();
            refreshed.is_active = true;
            refreshed.last_seen_at = Some(seen_at);
            self.insert_raw(refreshed);
            progress(i as u64 + 1, total);
        }
        Ok(records.len())
    }

    async fn deactivate_unseen(&self, plan: &PrunePlan) -> Result<usize> {
        let mut state = self.lock();
        let mut changed = 0;
        for record in state.packages.values_mut() {
            if plan.should_deactivate(record) {
                record.is_active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_inactive(&self, plan: &PrunePlan) -> Result<usize> {
        let mut state = self.lock();
        let doomed: Vec<i64> = state
            .packages
            .iter()
            .filter(|(_, record)| plan.should_delete(record))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            state.remove_package(*id);
        }
        Ok(doomed.len())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn seed_platforms(&self, platforms: &[PlatformInfo]) -> Result<usize> {
        let mut state = self.lock();
        let mut inserted = 0;
        for p in platforms {
            if !state.platforms.contains_key(&p.id) {
                state.platforms.insert(p.id.clone(), p.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>> {
        let mut platforms: Vec<_> = self.lock().platforms.values().cloned().collect();
        platforms.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));
        Ok(platforms)
    }

    async fn get_platform(&self, id: &str) -> Result<Option<PlatformInfo>> {
        Ok(self.lock().platforms.get(id).cloned())
    }

    async fn create_platform(&self, platform: &PlatformInfo) -> Result<PlatformInfo> {
        let mut state = self.lock();
        if state.platforms.contains_key(&platform.id) {
            return Err(SyncError::Store(format!(
                "platform '{}' already exists",
                platform.id
            )));
        }
        state.platforms.insert(platform.id.clone(), platform.clone());
        Ok(platform.clone())
    }

    async fn update_platform(&self, id: &str, platform: &PlatformInfo) -> Result<Option<PlatformInfo>> {
        let mut state = self.lock();
        Ok(state.platforms.get_mut(id).map(|existing| {
            *existing = PlatformInfo {
                id: id.to_string(),
                ..platform.clone()
            };
            existing.clone()
        }))
    }

    async fn delete_platform(&self, id: &str) -> Result<bool> {
        Ok(self.lock().platforms.remove(id).is_some())
    }

    async fn list_packages(&self, platform: Platform) -> Result<Vec<StoredPackage>> {
        Ok(self
            .lock()
            .packages
            .iter()
            .filter(|(_, record)| record.platform_id == platform)
            .map(|(id, record)| StoredPackage {
                id: *id,
                record: record.clone(),
            })
            .collect())
    }

    async fn get_package(&self, id: i64) -> Result<Option<StoredPackage>> {
        Ok(self.lock().packages.get(&id).map(|record| StoredPackage {
            id,
            record: record.clone(),
        }))
    }

    async fn update_package(&self, id: i64, update: &PackageUpdate) -> Result<Option<StoredPackage>> {
        Ok(self.lock().packages.get_mut(&id).map(|record| {
            update.apply_to(record);
            StoredPackage {
                id,
                record: record.clone(),
            }
        }))
    }

    async fn delete_package(&self, id: i64) -> Result<bool> {
        Ok(self.lock().remove_package(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SyncTarget;
    use crate::sync::prune::PruningPolicy;
    use chrono::{Duration, TimeZone};

    fn no_progress(_: u64, _: u64) {}

    #[tokio::test]
    async fn hard_delete_spares_active_records_for_any_window() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for hard_days in [1, 7, 30, 365] {
            let store = MemoryStore::new();
            let mut stale_but_active = PackageRecord::new(Platform::Fedora, None, "htop");
            stale_but_active.last_seen_at = Some(t0 - Duration::days(1000));
            // outside the fedora scope, so soft prune leaves it active
            stale_but_active.repository = Some("updates-testing".to_string());
            store.insert_raw(stale_but_active);

            let mut gone = PackageRecord::new(Platform::Fedora, None, "tmux");
            gone.is_active = false;
            gone.last_seen_at = Some(t0 - Duration::days(1000));
            store.insert_raw(gone);

            let outcome = PruningPolicy::new(0, hard_days)
                .apply(&store, SyncTarget::Fedora.prune_scope(), t0)
                .await
                .unwrap();

            assert_eq!(outcome.deleted, 1);
            assert!(store.find(Platform::Fedora, Some("updates-testing"), "htop").unwrap().is_active);
            assert!(store.find(Platform::Fedora, None, "tmux").is_none());
        }
    }

    #[tokio::test]
    async fn upsert_reactivates_a_pruned_record() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let store = MemoryStore::new();
        let mut record = PackageRecord::new(Platform::Macos, None, "wget");
        record.is_active = false;
        store.insert_raw(record.clone());

        store.upsert_packages(&[record], t0, &no_progress).await.unwrap();

        let refreshed = store.find(Platform::Macos, None, "wget").unwrap();
        assert!(refreshed.is_active);
        assert_eq!(refreshed.last_seen_at, Some(t0));
        assert_eq!(store.len(), 1);
    }
}
