//! Replicated file metadata
//!
//! Records are written to every configured backend concurrently; a write
//! succeeds once the acknowledgment quorum is met and the caller sees which
//! replicas failed. Reads go cache → designated primary → fallbacks in fixed
//! order. Every backend call carries its own timeout so a hung provider
//! cannot pin a request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use mongodb::options::FindOptions;
use mongodb::Database;
use redis::{aio::ConnectionManager, AsyncCommands};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::{CdnError, CdnResult};
use crate::models::{FileRecord, ReplicationReport, StatsSnapshot};
use crate::providers::StorageRouter;

/// Uniform interface over the metadata replicas
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn store(&self, record: &FileRecord) -> CdnResult<()>;

    async fn get(&self, id: &str) -> CdnResult<Option<FileRecord>>;

    async fn increment_downloads(&self, id: &str) -> CdnResult<()>;

    async fn delete(&self, id: &str) -> CdnResult<()>;

    /// Records whose retention horizon has passed. Only the designated
    /// primary is consulted for cleanup candidates.
    async fn list_expired(&self, now: DateTime<Utc>) -> CdnResult<Vec<FileRecord>>;

    async fn stats(&self) -> CdnResult<StatsSnapshot>;

    async fn health_check(&self) -> CdnResult<()>;
}

/// PostgreSQL metadata replica (designated primary)
pub struct PostgresMetadata {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct FileRow {
    id: String,
    file_name: String,
    original_name: String,
    size: i64,
    mime_type: String,
    hash: String,
    storage_provider: String,
    storage_path: String,
    url: String,
    source_url: Option<String>,
    downloads: i64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_accessed: Option<DateTime<Utc>>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = CdnError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let storage_provider = row.storage_provider.parse().map_err(|e: String| {
            CdnError::Serialization { message: e }
        })?;
        Ok(FileRecord {
            id: row.id,
            file_name: row.file_name,
            original_name: row.original_name,
            size: row.size as u64,
            mime_type: row.mime_type,
            hash: row.hash,
            storage_provider,
            storage_path: row.storage_path,
            url: row.url,
            source_url: row.source_url,
            downloads: row.downloads as u64,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_accessed: row.last_accessed,
        })
    }
}

impl PostgresMetadata {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the files table and its indexes when missing.
    pub async fn ensure_schema(&self) -> CdnResult<()> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                original_name TEXT NOT NULL,
                size BIGINT NOT NULL,
                mime_type TEXT NOT NULL,
                hash TEXT NOT NULL,
                storage_provider TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                url TEXT NOT NULL,
                source_url TEXT,
                downloads BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ,
                last_accessed TIMESTAMPTZ
            )",
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash)",
            "CREATE INDEX IF NOT EXISTS idx_files_expires_at ON files(expires_at)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl MetadataBackend for PostgresMetadata {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn store(&self, record: &FileRecord) -> CdnResult<()> {
        sqlx::query(
            r"INSERT INTO files (
                id, file_name, original_name, size, mime_type, hash,
                storage_provider, storage_path, url, source_url, downloads,
                created_at, expires_at, last_accessed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.file_name)
        .bind(&record.original_name)
        .bind(record.size as i64)
        .bind(&record.mime_type)
        .bind(&record.hash)
        .bind(record.storage_provider.as_str())
        .bind(&record.storage_path)
        .bind(&record.url)
        .bind(&record.source_url)
        .bind(record.downloads as i64)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.last_accessed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> CdnResult<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn increment_downloads(&self, id: &str) -> CdnResult<()> {
        sqlx::query(
            "UPDATE files SET downloads = downloads + 1, last_accessed = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> CdnResult<()> {
        sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> CdnResult<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as(
            "SELECT * FROM files WHERE expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn stats(&self) -> CdnResult<StatsSnapshot> {
        let (total_files, total_size): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0)::BIGINT FROM files")
                .fetch_one(&self.pool)
                .await?;

        let breakdown: Vec<(String, i64)> =
            sqlx::query_as("SELECT storage_provider, COUNT(*) FROM files GROUP BY storage_provider")
                .fetch_all(&self.pool)
                .await?;

        Ok(StatsSnapshot {
            total_files: total_files as u64,
            total_size_bytes: total_size as u64,
            by_provider: breakdown
                .into_iter()
                .map(|(provider, count)| (provider, count as u64))
                .collect(),
        })
    }

    async fn health_check(&self) -> CdnResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// MongoDB metadata replica
pub struct MongoMetadata {
    database: Database,
}

impl MongoMetadata {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn collection(&self) -> mongodb::Collection<bson::Document> {
        self.database.collection("files")
    }

    fn to_document(record: &FileRecord) -> CdnResult<bson::Document> {
        bson::to_document(record).map_err(|e| CdnError::Serialization {
            message: e.to_string(),
        })
    }

    fn from_document(document: bson::Document) -> CdnResult<FileRecord> {
        bson::from_document(document).map_err(|e| CdnError::Serialization {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl MetadataBackend for MongoMetadata {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn store(&self, record: &FileRecord) -> CdnResult<()> {
        let document = Self::to_document(record)?;
        self.collection().insert_one(document, None).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> CdnResult<Option<FileRecord>> {
        let document = self.collection().find_one(doc! {"id": id}, None).await?;
        document.map(Self::from_document).transpose()
    }

    async fn increment_downloads(&self, id: &str) -> CdnResult<()> {
        let now = bson::to_bson(&Utc::now()).map_err(|e| CdnError::Serialization {
            message: e.to_string(),
        })?;
        self.collection()
            .update_one(
                doc! {"id": id},
                doc! {"$inc": {"downloads": 1}, "$set": {"last_accessed": now}},
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> CdnResult<()> {
        self.collection().delete_one(doc! {"id": id}, None).await?;
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> CdnResult<Vec<FileRecord>> {
        let now = bson::to_bson(&now).map_err(|e| CdnError::Serialization {
            message: e.to_string(),
        })?;
        let filter = doc! {"expires_at": {"$ne": null, "$lte": now}};
        let options = FindOptions::builder().limit(1000).build();

        let mut cursor = self.collection().find(filter, options).await?;
        let mut records = Vec::new();
        while cursor.advance().await? {
            let document = cursor.current().try_into().map_err(|e| {
                CdnError::Serialization {
                    message: format!("failed to read document: {e}"),
                }
            })?;
            records.push(Self::from_document(document)?);
        }
        Ok(records)
    }

    async fn stats(&self) -> CdnResult<StatsSnapshot> {
        let pipeline = vec![doc! {
            "$group": {
                "_id": "$storage_provider",
                "count": {"$sum": 1},
                "size": {"$sum": "$size"},
            }
        }];

        let mut cursor = self.collection().aggregate(pipeline, None).await?;
        let mut snapshot = StatsSnapshot::default();
        while cursor.advance().await? {
            let document = cursor.current();
            let provider = document.get_str("_id").unwrap_or("unknown").to_string();
            let count = document.get_i64("count").unwrap_or(0) as u64;
            let size = document.get_i64("size").unwrap_or(0) as u64;
            snapshot.total_files += count;
            snapshot.total_size_bytes += size;
            snapshot.by_provider.insert(provider, count);
        }
        Ok(snapshot)
    }

    async fn health_check(&self) -> CdnResult<()> {
        self.database.run_command(doc! {"ping": 1}, None).await?;
        Ok(())
    }
}

/// Redis-backed record cache with TTL
pub struct RecordCache {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RecordCache {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    fn key(id: &str) -> String {
        format!("file:{id}")
    }

    /// Cache lookups never fail a request; errors degrade to a miss.
    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        let mut conn = self.redis.clone();
        let cached: Option<String> = match conn.get(Self::key(id)).await {
            Ok(value) => value,
            Err(e) => {
                warn!("cache read failed for {}: {}", id, e);
                return None;
            }
        };

        cached.and_then(|json| serde_json::from_str(&json).ok())
    }

    pub async fn set(&self, record: &FileRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!("cache serialize failed for {}: {}", record.id, e);
                return;
            }
        };

        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = conn
            .set_ex(Self::key(&record.id), json, self.ttl.as_secs())
            .await;
        if let Err(e) = result {
            warn!("cache write failed for {}: {}", record.id, e);
        }
    }

    pub async fn invalidate(&self, id: &str) {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = conn.del(Self::key(id)).await;
        if let Err(e) = result {
            warn!("cache invalidation failed for {}: {}", id, e);
        }
    }
}

/// Replicated metadata store over the configured backends
pub struct MetadataStore {
    backends: Vec<Arc<dyn MetadataBackend>>,
    cache: Option<RecordCache>,
    write_quorum: usize,
    call_timeout: Duration,
}

impl MetadataStore {
    pub fn new(
        backends: Vec<Arc<dyn MetadataBackend>>,
        cache: Option<RecordCache>,
        write_quorum: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backends,
            cache,
            write_quorum: write_quorum.max(1),
            call_timeout,
        }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    async fn with_timeout<T>(
        &self,
        future: impl std::future::Future<Output = CdnResult<T>>,
    ) -> CdnResult<T> {
        match tokio::time::timeout(self.call_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(CdnError::Timeout {
                seconds: self.call_timeout.as_secs(),
            }),
        }
    }

    /// Write the record to every backend concurrently. Succeeds once the
    /// acknowledgment quorum is met; the report names the replicas that
    /// failed.
    pub async fn store(&self, record: &FileRecord) -> CdnResult<ReplicationReport> {
        let writes = self.backends.iter().map(|backend| async move {
            let result = self.with_timeout(backend.store(record)).await;
            (backend.name(), result)
        });

        let mut report = ReplicationReport::default();
        for (name, result) in join_all(writes).await {
            match result {
                Ok(()) => report.acks.push(name.to_string()),
                Err(e) => {
                    warn!(backend = name, "metadata write failed: {}", e);
                    report.failures.push((name.to_string(), e.to_string()));
                }
            }
        }

        if !report.meets_quorum(self.write_quorum) {
            return Err(CdnError::QuorumNotMet {
                acks: report.ack_count(),
                required: self.write_quorum,
            });
        }

        if let Some(cache) = &self.cache {
            cache.set(record).await;
        }

        debug!(
            id = %record.id,
            acks = report.ack_count(),
            failures = report.failures.len(),
            "metadata stored"
        );
        Ok(report)
    }

    /// Cache first, then the designated primary, then fallbacks in fixed
    /// order. The first non-empty answer wins.
    pub async fn get(&self, id: &str) -> CdnResult<Option<FileRecord>> {
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get(id).await {
                return Ok(Some(record));
            }
        }

        for backend in &self.backends {
            match self.with_timeout(backend.get(id)).await {
                Ok(Some(record)) => {
                    if let Some(cache) = &self.cache {
                        cache.set(&record).await;
                    }
                    return Ok(Some(record));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(backend = backend.name(), "metadata read failed: {}", e);
                    continue;
                }
            }
        }

        Ok(None)
    }

    /// Fire-and-forget counter bump on every backend; the cache entry is
    /// invalidated, not repopulated.
    pub async fn increment_downloads(&self, id: &str) {
        let updates = self.backends.iter().map(|backend| async move {
            let result = self.with_timeout(backend.increment_downloads(id)).await;
            (backend.name(), result)
        });

        for (name, result) in join_all(updates).await {
            if let Err(e) = result {
                warn!(backend = name, "download count update failed: {}", e);
            }
        }

        if let Some(cache) = &self.cache {
            cache.invalidate(id).await;
        }
    }

    /// Purge records past their retention horizon. Candidates come from the
    /// designated primary only; deletes fan out to every backend and to the
    /// provider holding the bytes.
    pub async fn cleanup_expired(&self, storage: &StorageRouter) -> CdnResult<usize> {
        let Some(primary) = self.backends.first() else {
            return Ok(0);
        };

        let expired = self.with_timeout(primary.list_expired(Utc::now())).await?;
        let mut purged = 0;

        for record in expired {
            match storage.get(record.storage_provider) {
                Ok(backend) => {
                    if let Err(e) = self.with_timeout(backend.delete(&record)).await {
                        warn!(id = %record.id, "failed to delete provider bytes: {}", e);
                    }
                }
                Err(e) => warn!(id = %record.id, "no backend for expired record: {}", e),
            }

            let record_id = record.id.clone();
            let deletes = self.backends.iter().map(|backend| {
                let record_id = record_id.clone();
                async move {
                    let result = self.with_timeout(backend.delete(&record_id)).await;
                    (backend.name(), result)
                }
            });
            for (name, result) in join_all(deletes).await {
                if let Err(e) = result {
                    warn!(backend = name, id = %record.id, "metadata delete failed: {}", e);
                }
            }

            if let Some(cache) = &self.cache {
                cache.invalidate(&record.id).await;
            }

            purged += 1;
        }

        if purged > 0 {
            info!(purged, "expired files cleaned up");
        }
        Ok(purged)
    }

    /// Aggregate statistics from the designated primary.
    pub async fn stats(&self) -> CdnResult<StatsSnapshot> {
        let Some(primary) = self.backends.first() else {
            return Ok(StatsSnapshot::default());
        };
        self.with_timeout(primary.stats()).await
    }

    pub async fn health_check(&self) -> Vec<(&'static str, bool)> {
        let checks = self.backends.iter().map(|backend| async move {
            let healthy = self.with_timeout(backend.health_check()).await.is_ok();
            (backend.name(), healthy)
        });
        join_all(checks).await
    }
}

/// In-memory test doubles for replication semantics
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// Backend storing records in a map; can be switched to fail on demand.
    pub struct MemoryMetadataBackend {
        name: &'static str,
        pub records: Mutex<HashMap<String, FileRecord>>,
        failing: AtomicBool,
    }

    impl MemoryMetadataBackend {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                records: Mutex::new(HashMap::new()),
                failing: AtomicBool::new(false),
            }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check_failing(&self) -> CdnResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(CdnError::database(format!("{} is down", self.name)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MetadataBackend for MemoryMetadataBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn store(&self, record: &FileRecord) -> CdnResult<()> {
            self.check_failing()?;
            self.records
                .lock()
                .await
                .insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn get(&self, id: &str) -> CdnResult<Option<FileRecord>> {
            self.check_failing()?;
            Ok(self.records.lock().await.get(id).cloned())
        }

        async fn increment_downloads(&self, id: &str) -> CdnResult<()> {
            self.check_failing()?;
            if let Some(record) = self.records.lock().await.get_mut(id) {
                record.downloads += 1;
                record.last_accessed = Some(Utc::now());
            }
            Ok(())
        }

        async fn delete(&self, id: &str) -> CdnResult<()> {
            self.check_failing()?;
            self.records.lock().await.remove(id);
            Ok(())
        }

        async fn list_expired(&self, now: DateTime<Utc>) -> CdnResult<Vec<FileRecord>> {
            self.check_failing()?;
            Ok(self
                .records
                .lock()
                .await
                .values()
                .filter(|r| r.expires_at.map(|at| at <= now).unwrap_or(false))
                .cloned()
                .collect())
        }

        async fn stats(&self) -> CdnResult<StatsSnapshot> {
            self.check_failing()?;
            let records = self.records.lock().await;
            let mut snapshot = StatsSnapshot {
                total_files: records.len() as u64,
                total_size_bytes: records.values().map(|r| r.size).sum(),
                ..StatsSnapshot::default()
            };
            for record in records.values() {
                *snapshot
                    .by_provider
                    .entry(record.storage_provider.as_str().to_string())
                    .or_insert(0) += 1;
            }
            Ok(snapshot)
        }

        async fn health_check(&self) -> CdnResult<()> {
            self.check_failing()
        }
    }

    pub fn sample_record(id: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            file_name: format!("{id}.txt"),
            original_name: "a.txt".to_string(),
            size: 10,
            mime_type: "text/plain".to_string(),
            hash: "0".repeat(64),
            storage_provider: crate::models::StorageProvider::SqlStoreA,
            storage_path: format!("{id}.txt"),
            url: format!("http://localhost:8080/files/{id}.txt"),
            source_url: None,
            downloads: 0,
            created_at: Utc::now(),
            expires_at: None,
            last_accessed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{sample_record, MemoryMetadataBackend};
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with(
        backends: Vec<Arc<MemoryMetadataBackend>>,
        quorum: usize,
    ) -> MetadataStore {
        let dyn_backends: Vec<Arc<dyn MetadataBackend>> = backends
            .into_iter()
            .map(|b| b as Arc<dyn MetadataBackend>)
            .collect();
        MetadataStore::new(dyn_backends, None, quorum, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_store_then_get_round_trip() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        let store = store_with(vec![primary.clone(), replica.clone()], 1);

        let record = sample_record("abc123def456");
        let report = store.store(&record).await.unwrap();
        assert_eq!(report.ack_count(), 2);
        assert!(report.failures.is_empty());

        let fetched = store.get("abc123def456").await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.size, record.size);
        assert_eq!(fetched.mime_type, record.mime_type);
    }

    #[tokio::test]
    async fn test_store_tolerates_single_replica_failure() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        replica.set_failing(true);
        let store = store_with(vec![primary.clone(), replica], 1);

        let record = sample_record("abc123def456");
        let report = store.store(&record).await.unwrap();
        assert_eq!(report.ack_count(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "replica");

        // The surviving replica still answers reads.
        assert!(store.get("abc123def456").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_fails_below_quorum() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        primary.set_failing(true);
        replica.set_failing(true);
        let store = store_with(vec![primary, replica], 1);

        let err = store.store(&sample_record("abc123def456")).await.unwrap_err();
        assert!(matches!(err, CdnError::QuorumNotMet { acks: 0, required: 1 }));
    }

    #[tokio::test]
    async fn test_get_falls_back_past_failing_primary() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        let store = store_with(vec![primary.clone(), replica.clone()], 1);

        let record = sample_record("abc123def456");
        store.store(&record).await.unwrap();

        primary.set_failing(true);
        let fetched = store.get("abc123def456").await.unwrap();
        assert_eq!(fetched.unwrap().id, "abc123def456");
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let store = store_with(vec![primary], 1);
        assert!(store.get("nosuchid1234").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_downloads_is_monotonic() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        let store = store_with(vec![primary.clone(), replica.clone()], 1);

        store.store(&sample_record("abc123def456")).await.unwrap();

        for _ in 0..3 {
            store.increment_downloads("abc123def456").await;
        }

        let fetched = store.get("abc123def456").await.unwrap().unwrap();
        assert_eq!(fetched.downloads, 3);
        assert!(fetched.last_accessed.is_some());

        // Both replicas observed every increment.
        let replica_copy = replica.records.lock().await;
        assert_eq!(replica_copy.get("abc123def456").unwrap().downloads, 3);
    }

    #[tokio::test]
    async fn test_increment_swallows_replica_failure() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        let store = store_with(vec![primary.clone(), replica.clone()], 1);

        store.store(&sample_record("abc123def456")).await.unwrap();
        replica.set_failing(true);

        store.increment_downloads("abc123def456").await;

        let fetched = store.get("abc123def456").await.unwrap().unwrap();
        assert_eq!(fetched.downloads, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired_purges_all_replicas() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let replica = Arc::new(MemoryMetadataBackend::new("replica"));
        let store = store_with(vec![primary.clone(), replica.clone()], 1);

        let mut expired = sample_record("expired00001");
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let live = sample_record("alive0000001");
        store.store(&expired).await.unwrap();
        store.store(&live).await.unwrap();

        let router = StorageRouter::new();
        let purged = store.cleanup_expired(&router).await.unwrap();
        assert_eq!(purged, 1);

        assert!(store.get("expired00001").await.unwrap().is_none());
        assert!(store.get("alive0000001").await.unwrap().is_some());
        assert!(replica.records.lock().await.get("expired00001").is_none());
    }

    #[tokio::test]
    async fn test_stats_come_from_primary() {
        let primary = Arc::new(MemoryMetadataBackend::new("primary"));
        let store = store_with(vec![primary], 1);

        store.store(&sample_record("abc123def456")).await.unwrap();
        let mut other = sample_record("def456abc123");
        other.size = 20;
        store.store(&other).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size_bytes, 30);
        assert_eq!(stats.by_provider.get("sql_store_a"), Some(&2));
    }
}
