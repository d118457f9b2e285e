//! Persistence seams.
//!
//! [`Store`] is what a sync run needs: upsert by key and the two timestamp
//! driven prune operations. [`Catalog`] covers the administrative reads and
//! writes behind the write-gated endpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::package::{PackageRecord, PackageUpdate, StoredPackage};
use crate::platform::{Platform, PlatformInfo};
use crate::sync::prune::PrunePlan;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// `(stored so far, total)` callback fired while upserting
pub type StoreProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or refresh every record by `(platform, repository, name)`.
    /// Touched records become active with `last_seen_at = seen_at`.
    async fn upsert_packages(
        &self,
        records: &[PackageRecord],
        seen_at: DateTime<Utc>,
        progress: StoreProgress<'_>,
    ) -> Result<usize>;

    /// Mark in-scope active records not seen since the plan's cutoff inactive
    async fn deactivate_unseen(&self, plan: &PrunePlan) -> Result<usize>;

    /// Remove in-scope inactive records last seen before the hard-delete cutoff
    async fn delete_inactive(&self, plan: &PrunePlan) -> Result<usize>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Insert missing platform rows, leaving existing ones untouched
    async fn seed_platforms(&self, platforms: &[PlatformInfo]) -> Result<usize>;

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>>;

    async fn get_platform(&self, id: &str) -> Result<Option<PlatformInfo>>;

    /// Fails if a platform with the same id exists
    async fn create_platform(&self, platform: &PlatformInfo) -> Result<PlatformInfo>;

    /// Returns `None` when no platform has this id
    async fn update_platform(&self, id: &str, platform: &PlatformInfo) -> Result<Option<PlatformInfo>>;

    async fn delete_platform(&self, id: &str) -> Result<bool>;

    async fn list_packages(&self, platform: Platform) -> Result<Vec<StoredPackage>>;

    async fn get_package(&self, id: i64) -> Result<Option<StoredPackage>>;

    /// Returns `None` when no package has this id
    async fn update_package(&self, id: i64, update: &PackageUpdate) -> Result<Option<StoredPackage>>;

    async fn delete_package(&self, id: i64) -> Result<bool>;
}
