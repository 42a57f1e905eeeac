//! Storage providers
//!
//! The provider selector is a pure function of the static priority/capacity
//! table and the upload's `(category, size)`. Every backend sits behind the
//! same `StorageBackend` trait so handlers never branch on provider names.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bson::{doc, Binary};
use bytes::Bytes;
use chrono::Utc;
use mongodb::Database;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::config_types::{HttpCdnConfig, S3Config};
use crate::error::{CdnError, CdnResult};
use crate::models::{FileCategory, FileRecord, StorageProvider};

/// Fallback when no provider in the table qualifies
pub const DEFAULT_PROVIDER: StorageProvider = StorageProvider::PrimaryStore;

/// One row of the static provider table
#[derive(Debug, Clone)]
pub struct ProviderPolicy {
    pub provider: StorageProvider,
    /// Lower wins among qualifying providers
    pub priority: u8,
    /// Size ceiling in bytes
    pub max_size: u64,
    /// Accepted categories; empty means any
    pub categories: &'static [FileCategory],
}

/// The static priority/capacity table. Small raw files land in the SQL
/// stores, media goes to the CDNs, everything else to the object store.
pub fn default_policy_table() -> Vec<ProviderPolicy> {
    vec![
        ProviderPolicy {
            provider: StorageProvider::SqlStoreA,
            priority: 1,
            max_size: 1024 * 1024,
            categories: &[FileCategory::Raw],
        },
        ProviderPolicy {
            provider: StorageProvider::SqlStoreB,
            priority: 2,
            max_size: 10 * 1024 * 1024,
            categories: &[FileCategory::Raw],
        },
        ProviderPolicy {
            provider: StorageProvider::MediaCdnA,
            priority: 3,
            max_size: 10 * 1024 * 1024,
            categories: &[FileCategory::Image],
        },
        ProviderPolicy {
            provider: StorageProvider::MediaCdnB,
            priority: 4,
            max_size: 100 * 1024 * 1024,
            categories: &[FileCategory::Image, FileCategory::Video, FileCategory::Audio],
        },
        ProviderPolicy {
            provider: StorageProvider::PrimaryStore,
            priority: 5,
            max_size: 100 * 1024 * 1024,
            categories: &[],
        },
    ]
}

/// Pick the backend for an upload. Pure: identical inputs always yield the
/// identical choice for a fixed table.
pub fn select_provider(
    table: &[ProviderPolicy],
    mime_type: &str,
    size: u64,
) -> StorageProvider {
    let category = FileCategory::from_mime(mime_type);

    let mut candidates: Vec<&ProviderPolicy> = table
        .iter()
        .filter(|policy| size <= policy.max_size)
        .filter(|policy| policy.categories.is_empty() || policy.categories.contains(&category))
        .collect();

    candidates.sort_by_key(|policy| policy.priority);

    candidates
        .first()
        .map(|policy| policy.provider)
        .unwrap_or(DEFAULT_PROVIDER)
}

/// How a backend's bytes reach the client on download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Client is redirected to the provider's public URL
    Redirect,
    /// Bytes are fetched server-side and streamed to the client
    Stream,
}

/// Result of storing bytes with a backend
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Public or service-relative URL for the bytes
    pub url: String,
    /// Backend-specific locator used for later fetch/delete
    pub storage_path: String,
}

/// Uniform interface over the byte-holding backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn provider(&self) -> StorageProvider;

    /// Capability descriptor: redirect to the provider or stream through us.
    fn delivery(&self) -> Delivery;

    async fn put(&self, file_name: &str, data: Bytes, content_type: &str)
        -> CdnResult<StoredObject>;

    async fn fetch(&self, record: &FileRecord) -> CdnResult<Bytes>;

    async fn delete(&self, record: &FileRecord) -> CdnResult<()>;

    async fn health_check(&self) -> CdnResult<()> {
        Ok(())
    }
}

/// Registry mapping providers to their backend implementations
#[derive(Default)]
pub struct StorageRouter {
    backends: HashMap<StorageProvider, Arc<dyn StorageBackend>>,
}

impl StorageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(backend.provider(), backend);
    }

    pub fn get(&self, provider: StorageProvider) -> CdnResult<Arc<dyn StorageBackend>> {
        self.backends.get(&provider).cloned().ok_or_else(|| {
            CdnError::storage(format!("no backend registered for {provider}"))
        })
    }

    pub fn providers(&self) -> Vec<StorageProvider> {
        self.backends.keys().copied().collect()
    }
}

/// S3-compatible primary object store
pub struct S3Backend {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3Backend {
    pub fn new(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn provider(&self) -> StorageProvider {
        StorageProvider::PrimaryStore
    }

    fn delivery(&self) -> Delivery {
        Delivery::Stream
    }

    async fn put(
        &self,
        file_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> CdnResult<StoredObject> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(file_name)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                error!("s3 upload failed for {}: {}", file_name, e);
                CdnError::storage(format!("upload failed: {e}"))
            })?;

        debug!("stored object {} in bucket {}", file_name, self.bucket);

        let encoded = urlencoding::encode(file_name);
        Ok(StoredObject {
            url: format!("{}/{}/{}", self.public_base_url, self.bucket, encoded),
            storage_path: file_name.to_string(),
        })
    }

    async fn fetch(&self, record: &FileRecord) -> CdnResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&record.storage_path)
            .send()
            .await
            .map_err(|e| CdnError::storage(format!("download failed: {e}")))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| CdnError::storage(format!("failed to read object body: {e}")))?;

        Ok(data.into_bytes())
    }

    async fn delete(&self, record: &FileRecord) -> CdnResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&record.storage_path)
            .send()
            .await
            .map_err(|e| CdnError::storage(format!("delete failed: {e}")))?;
        Ok(())
    }

    async fn health_check(&self) -> CdnResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| CdnError::storage(format!("bucket unreachable: {e}")))?;
        Ok(())
    }
}

/// Response shape shared by the hosted media CDN upload APIs
#[derive(Debug, serde::Deserialize)]
struct CdnUploadResponse {
    url: String,
    id: String,
}

/// Hosted media CDN reached over its HTTP upload API
pub struct HttpCdnBackend {
    provider: StorageProvider,
    config: HttpCdnConfig,
    client: reqwest::Client,
}

impl HttpCdnBackend {
    pub fn new(provider: StorageProvider, config: &HttpCdnConfig, client: reqwest::Client) -> Self {
        Self {
            provider,
            config: config.clone(),
            client,
        }
    }
}

#[async_trait]
impl StorageBackend for HttpCdnBackend {
    fn provider(&self) -> StorageProvider {
        self.provider
    }

    fn delivery(&self) -> Delivery {
        Delivery::Redirect
    }

    async fn put(
        &self,
        file_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> CdnResult<StoredObject> {
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.config.upload_url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!(provider = %self.provider, %status, "cdn upload rejected");
            return Err(CdnError::storage(format!(
                "cdn upload failed with status {status}"
            )));
        }

        let body: CdnUploadResponse = response.json().await?;

        Ok(StoredObject {
            url: body.url,
            storage_path: body.id,
        })
    }

    async fn fetch(&self, record: &FileRecord) -> CdnResult<Bytes> {
        let response = self.client.get(&record.url).send().await?;
        if !response.status().is_success() {
            return Err(CdnError::storage(format!(
                "cdn fetch failed with status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?)
    }

    async fn delete(&self, record: &FileRecord) -> CdnResult<()> {
        let url = format!(
            "{}/{}",
            self.config.upload_url.trim_end_matches('/'),
            urlencoding::encode(&record.storage_path)
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CdnError::storage(format!(
                "cdn delete failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Serverless PostgreSQL holding file bytes in a blob table
pub struct PgBlobBackend {
    pool: PgPool,
    base_url: String,
}

impl PgBlobBackend {
    pub fn new(pool: PgPool, base_url: &str) -> Self {
        Self {
            pool,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create the blob table when missing.
    pub async fn ensure_schema(&self) -> CdnResult<()> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS file_blobs (
                id TEXT PRIMARY KEY,
                data BYTEA NOT NULL,
                content_type TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for PgBlobBackend {
    fn provider(&self) -> StorageProvider {
        StorageProvider::SqlStoreA
    }

    fn delivery(&self) -> Delivery {
        Delivery::Stream
    }

    async fn put(
        &self,
        file_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> CdnResult<StoredObject> {
        sqlx::query("INSERT INTO file_blobs (id, data, content_type) VALUES ($1, $2, $3)")
            .bind(file_name)
            .bind(data.as_ref())
            .bind(content_type)
            .execute(&self.pool)
            .await?;

        Ok(StoredObject {
            url: format!("{}/files/{}", self.base_url, file_name),
            storage_path: file_name.to_string(),
        })
    }

    async fn fetch(&self, record: &FileRecord) -> CdnResult<Bytes> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM file_blobs WHERE id = $1")
                .bind(&record.storage_path)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(data,)| Bytes::from(data)).ok_or_else(|| {
            CdnError::storage(format!("blob {} missing from sql store", record.storage_path))
        })
    }

    async fn delete(&self, record: &FileRecord) -> CdnResult<()> {
        sqlx::query("DELETE FROM file_blobs WHERE id = $1")
            .bind(&record.storage_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> CdnResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Hosted MongoDB holding file bytes as binary documents
pub struct MongoBlobBackend {
    database: Database,
    base_url: String,
}

impl MongoBlobBackend {
    pub fn new(database: Database, base_url: &str) -> Self {
        Self {
            database,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn collection(&self) -> mongodb::Collection<bson::Document> {
        self.database.collection("file_blobs")
    }
}

#[async_trait]
impl StorageBackend for MongoBlobBackend {
    fn provider(&self) -> StorageProvider {
        StorageProvider::SqlStoreB
    }

    fn delivery(&self) -> Delivery {
        Delivery::Stream
    }

    async fn put(
        &self,
        file_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> CdnResult<StoredObject> {
        let document = doc! {
            "_id": file_name,
            "data": Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: data.to_vec(),
            },
            "content_type": content_type,
            "created_at": Utc::now().to_rfc3339(),
        };

        self.collection().insert_one(document, None).await?;

        Ok(StoredObject {
            url: format!("{}/files/{}", self.base_url, file_name),
            storage_path: file_name.to_string(),
        })
    }

    async fn fetch(&self, record: &FileRecord) -> CdnResult<Bytes> {
        let document = self
            .collection()
            .find_one(doc! {"_id": &record.storage_path}, None)
            .await?
            .ok_or_else(|| {
                CdnError::storage(format!(
                    "blob {} missing from document store",
                    record.storage_path
                ))
            })?;

        let binary = document
            .get_binary_generic("data")
            .map_err(|e| CdnError::storage(format!("malformed blob document: {e}")))?;

        Ok(Bytes::from(binary.clone()))
    }

    async fn delete(&self, record: &FileRecord) -> CdnResult<()> {
        self.collection()
            .delete_one(doc! {"_id": &record.storage_path}, None)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> CdnResult<()> {
        self.database.run_command(doc! {"ping": 1}, None).await?;
        Ok(())
    }
}
