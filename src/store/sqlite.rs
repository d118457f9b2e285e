use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Catalog, Store, StoreProgress};
use crate::error::{Result, SyncError};
use crate::package::{PackageRecord, PackageUpdate, StoredPackage};
use crate::platform::{Platform, PlatformInfo, PruneScope, RepositoryScope};
use crate::sync::prune::PrunePlan;

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Records written per transaction; progress is reported after each batch
const UPSERT_BATCH: usize = 500;

impl ToSql for Platform {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Platform {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// The `repository` column is NOT NULL so that the unique key treats "no
/// repository" as one value; the empty string stands for it.
fn repository_column(repository: Option<&str>) -> &str {
    repository.unwrap_or("")
}

/// SQLite-backed package store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL,
                updated TEXT NOT NULL,
                PRIMARY KEY (version)
            )",
            (),
        )?;

        let version: i32 = match conn.query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                conn.execute(
                    "INSERT INTO schema_version (version, updated) VALUES (0, datetime('now'))",
                    [],
                )?;
                0
            }
            Err(e) => return Err(e),
        };

        if version < CURRENT_SCHEMA_VERSION {
            Self::migrate_schema(conn, version)?;
        }
        Ok(())
    }

    fn migrate_schema(conn: &Connection, from_version: i32) -> rusqlite::Result<()> {
        if from_version == 0 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS platforms (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    icon TEXT NOT NULL DEFAULT '',
                    color TEXT NOT NULL DEFAULT '',
                    package_manager TEXT NOT NULL DEFAULT '',
                    install_command TEXT NOT NULL DEFAULT '',
                    sort_order INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS packages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    platform_id TEXT NOT NULL,
                    repository TEXT NOT NULL DEFAULT '',
                    name TEXT NOT NULL,
                    version TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    last_seen_at INTEGER,
                    UNIQUE (platform_id, repository, name)
                );
                CREATE INDEX IF NOT EXISTS idx_packages_scope
                    ON packages (platform_id, repository, is_active);
                INSERT INTO schema_version (version, updated) VALUES (1, datetime('now'));",
            )?;
        }
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut *guard)
        })
        .await
        .map_err(|e| SyncError::Store(format!("database task failed: {e}")))?
        .map_err(SyncError::from)
    }
}

/// `WHERE` fragment and its parameters selecting one prune scope
fn scope_filter(scope: &PruneScope) -> (String, Vec<Value>) {
    let mut values = vec![Value::Text(scope.platform.as_str().to_string())];
    let clause = match &scope.repository {
        RepositoryScope::Any => "platform_id = ?".to_string(),
        RepositoryScope::Unset => "platform_id = ? AND repository = ''".to_string(),
        RepositoryScope::Named(name) => {
            values.push(Value::Text(name.clone()));
            "platform_id = ? AND repository = ?".to_string()
        }
    };
    (clause, values)
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<StoredPackage> {
    let repository: String = row.get("repository")?;
    Ok(StoredPackage {
        id: row.get("id")?,
        record: PackageRecord {
            platform_id: row.get("platform_id")?,
            repository: (!repository.is_empty()).then_some(repository),
            name: row.get("name")?,
            version: row.get("version")?,
            description: row.get("description")?,
            is_active: row.get("is_active")?,
            last_seen_at: from_millis(row.get("last_seen_at")?),
        },
    })
}

fn platform_from_row(row: &Row<'_>) -> rusqlite::Result<PlatformInfo> {
    Ok(PlatformInfo {
        id: row.get("id")?,
        name: row.get("name")?,
        icon: row.get("icon")?,
        color: row.get("color")?,
        package_manager: row.get("package_manager")?,
        install_command: row.get("install_command")?,
        sort_order: row.get("sort_order")?,
    })
}

const PACKAGE_COLUMNS: &str =
    "id, platform_id, repository, name, version, description, is_active, last_seen_at";
const PLATFORM_COLUMNS: &str =
    "id, name, icon, color, package_manager, install_command, sort_order";

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_packages(
        &self,
        records: &[PackageRecord],
        seen_at: DateTime<Utc>,
        progress: StoreProgress<'_>,
    ) -> Result<usize> {
        let total = records.len() as u64;
        let seen = to_millis(seen_at);
        let mut stored = 0usize;
        progress(0, total);

        for batch in records.chunks(UPSERT_BATCH) {
            let batch = batch.to_vec();
            stored += self
                .with_conn(move |conn| {
                    let tx = conn.transaction()?;
                    {
                        let mut stmt = tx.prepare_cached(
                            "INSERT INTO packages
                                (platform_id, repository, name, version, description, is_active, last_seen_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                             ON CONFLICT (platform_id, repository, name) DO UPDATE SET
                                version = excluded.version,
                                description = excluded.description,
                                is_active = 1,
                                last_seen_at = excluded.last_seen_at",
                        )?;
                        for record in &batch {
                            stmt.execute(params![
                                record.platform_id,
                                repository_column(record.repository.as_deref()),
                                record.name,
                                record.version,
                                record.description,
                                seen,
                            ])?;
                        }
                    }
                    tx.commit()?;
                    Ok(batch.len())
                })
                .await?;
            progress(stored as u64, total);
        }

        Ok(stored)
    }

    async fn deactivate_unseen(&self, plan: &PrunePlan) -> Result<usize> {
        let (clause, mut values) = scope_filter(&plan.scope);
        values.push(Value::Integer(to_millis(plan.deactivate_before)));
        let sql = format!(
            "UPDATE packages SET is_active = 0
             WHERE {clause}
               AND is_active = 1
               AND (last_seen_at IS NULL OR last_seen_at < ?)"
        );
        self.with_conn(move |conn| conn.execute(&sql, params_from_iter(values.iter())))
            .await
    }

    async fn delete_inactive(&self, plan: &PrunePlan) -> Result<usize> {
        let Some(cutoff) = plan.delete_before else {
            return Ok(0);
        };
        let (clause, mut values) = scope_filter(&plan.scope);
        values.push(Value::Integer(to_millis(cutoff)));
        let sql = format!(
            "DELETE FROM packages
             WHERE {clause}
               AND is_active = 0
               AND last_seen_at IS NOT NULL AND last_seen_at < ?"
        );
        self.with_conn(move |conn| conn.execute(&sql, params_from_iter(values.iter())))
            .await
    }
}

#[async_trait]
impl Catalog for SqliteStore {
    async fn seed_platforms(&self, platforms: &[PlatformInfo]) -> Result<usize> {
        let platforms = platforms.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO platforms
                        (id, name, icon, color, package_manager, install_command, sort_order)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for p in &platforms {
                    inserted += stmt.execute(params![
                        p.id,
                        p.name,
                        p.icon,
                        p.color,
                        p.package_manager,
                        p.install_command,
                        p.sort_order,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PLATFORM_COLUMNS} FROM platforms ORDER BY sort_order, id"
            ))?;
            let rows = stmt.query_map([], platform_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_platform(&self, id: &str) -> Result<Option<PlatformInfo>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {PLATFORM_COLUMNS} FROM platforms WHERE id = ?1"),
                [id],
                platform_from_row,
            )
            .optional()
        })
        .await
    }

    async fn create_platform(&self, platform: &PlatformInfo) -> Result<PlatformInfo> {
        let p = platform.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO platforms
                    (id, name, icon, color, package_manager, install_command, sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    p.id,
                    p.name,
                    p.icon,
                    p.color,
                    p.package_manager,
                    p.install_command,
                    p.sort_order,
                ],
            )?;
            Ok(p)
        })
        .await
    }

    async fn update_platform(&self, id: &str, platform: &PlatformInfo) -> Result<Option<PlatformInfo>> {
        let id = id.to_string();
        let p = platform.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE platforms SET
                    name = ?2, icon = ?3, color = ?4, package_manager = ?5,
                    install_command = ?6, sort_order = ?7
                 WHERE id = ?1",
                params![
                    id,
                    p.name,
                    p.icon,
                    p.color,
                    p.package_manager,
                    p.install_command,
                    p.sort_order,
                ],
            )?;
            Ok((changed > 0).then(|| PlatformInfo { id, ..p }))
        })
        .await
    }

    async fn delete_platform(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| Ok(conn.execute("DELETE FROM platforms WHERE id = ?1", [id])? > 0))
            .await
    }

    async fn list_packages(&self, platform: Platform) -> Result<Vec<StoredPackage>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PACKAGE_COLUMNS} FROM packages WHERE platform_id = ?1 ORDER BY repository, name"
            ))?;
            let rows = stmt.query_map([platform], package_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_package(&self, id: i64) -> Result<Option<StoredPackage>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?1"),
                [id],
                package_from_row,
            )
            .optional()
        })
        .await
    }

    async fn update_package(&self, id: i64, update: &PackageUpdate) -> Result<Option<StoredPackage>> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE packages SET
                    version = COALESCE(?2, version),
                    description = COALESCE(?3, description),
                    is_active = COALESCE(?4, is_active)
                 WHERE id = ?1",
                params![id, update.version, update.description, update.is_active],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let stored = tx.query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?1"),
                [id],
                package_from_row,
            )?;
            tx.commit()?;
            Ok(Some(stored))
        })
        .await
    }

    async fn delete_package(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| Ok(conn.execute("DELETE FROM packages WHERE id = ?1", [id])? > 0))
            .await
    }
}
