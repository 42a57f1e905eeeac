//! Data model for stored files and API response shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Constant author tag carried on every API response
pub const AUTHOR: &str = "aka";
/// Constant contact email carried on every API response
pub const EMAIL: &str = "akaanakbaik17@proton.me";

/// The fixed set of storage backends that can hold file bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProvider {
    /// S3-compatible primary object store
    PrimaryStore,
    /// First hosted media CDN (HTTP upload API)
    MediaCdnA,
    /// Second hosted media CDN (HTTP upload API)
    MediaCdnB,
    /// Serverless PostgreSQL, bytes stored in a blob table
    SqlStoreA,
    /// Hosted MongoDB, bytes stored as binary documents
    SqlStoreB,
}

impl StorageProvider {
    pub const ALL: [StorageProvider; 5] = [
        StorageProvider::PrimaryStore,
        StorageProvider::MediaCdnA,
        StorageProvider::MediaCdnB,
        StorageProvider::SqlStoreA,
        StorageProvider::SqlStoreB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::PrimaryStore => "primary_store",
            StorageProvider::MediaCdnA => "media_cdn_a",
            StorageProvider::MediaCdnB => "media_cdn_b",
            StorageProvider::SqlStoreA => "sql_store_a",
            StorageProvider::SqlStoreB => "sql_store_b",
        }
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary_store" => Ok(StorageProvider::PrimaryStore),
            "media_cdn_a" => Ok(StorageProvider::MediaCdnA),
            "media_cdn_b" => Ok(StorageProvider::MediaCdnB),
            "sql_store_a" => Ok(StorageProvider::SqlStoreA),
            "sql_store_b" => Ok(StorageProvider::SqlStoreB),
            other => Err(format!("unknown storage provider: {other}")),
        }
    }
}

/// Coarse content category derived from the MIME type prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Raw,
}

impl FileCategory {
    pub fn from_mime(mime_type: &str) -> Self {
        match mime_type.split('/').next().unwrap_or("") {
            "image" => FileCategory::Image,
            "video" => FileCategory::Video,
            "audio" => FileCategory::Audio,
            _ => FileCategory::Raw,
        }
    }
}

/// One metadata record per stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Short opaque identifier, the public handle
    pub id: String,
    /// Stored object name, `{id}.{ext}`
    pub file_name: String,
    /// Sanitized human-readable name
    pub original_name: String,
    /// Byte length
    pub size: u64,
    /// Detected (not declared) content type
    pub mime_type: String,
    /// SHA-256 content digest; stored for reference, not consulted on read
    pub hash: String,
    /// Backend holding the bytes
    pub storage_provider: StorageProvider,
    /// Backend-specific locator
    pub storage_path: String,
    /// Public or service-relative URL for the bytes
    pub url: String,
    /// Origin URL when ingested via URL upload
    pub source_url: Option<String>,
    /// Monotonically incremented download counter
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
    /// Optional retention horizon; unset means keep forever
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Outcome of a replicated metadata write
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    /// Backends that acknowledged the write
    pub acks: Vec<String>,
    /// Backends that failed, with the failure message
    pub failures: Vec<(String, String)>,
}

impl ReplicationReport {
    pub fn ack_count(&self) -> usize {
        self.acks.len()
    }

    pub fn meets_quorum(&self, quorum: usize) -> bool {
        self.acks.len() >= quorum
    }
}

/// Aggregate storage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub by_provider: HashMap<String, u64>,
}

/// JSON envelope wrapping every API response
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub author: &'static str,
    pub email: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            author: AUTHOR,
            email: EMAIL,
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok(data)
        }
    }
}

/// Per-file entry in the upload response `data` array
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileData {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub url: String,
    pub db_type: StorageProvider,
    pub created_at: DateTime<Utc>,
}

/// Per-file row in the upload notification summary
#[derive(Debug, Clone, Serialize)]
pub struct UploadReportEntry {
    pub filename: String,
    pub size: String,
    pub db: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metadata projection returned by `GET /files/{id}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfoData {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Reserved; chunked uploads are not implemented
    pub chunked: bool,
    /// Reserved; chunked uploads are not implemented
    pub chunk_count: u32,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub downloads: u64,
    pub download_url: String,
    pub db_type: StorageProvider,
    pub url: String,
}

/// Status probe returned by `GET /files/{id}/status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusData {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub status: &'static str,
    pub message: &'static str,
    pub chunked: bool,
    pub chunk_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Aggregate payload for `GET /api/stats`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsData {
    pub total_files: u64,
    pub total_size: String,
    pub uptime: String,
    pub databases: usize,
    pub database_breakdown: HashMap<String, u64>,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        for provider in StorageProvider::ALL {
            assert_eq!(provider.as_str().parse::<StorageProvider>(), Ok(provider));
        }
        assert!("floppy_disk".parse::<StorageProvider>().is_err());
    }

    #[test]
    fn test_category_from_mime() {
        assert_eq!(FileCategory::from_mime("image/png"), FileCategory::Image);
        assert_eq!(FileCategory::from_mime("video/mp4"), FileCategory::Video);
        assert_eq!(FileCategory::from_mime("audio/mpeg"), FileCategory::Audio);
        assert_eq!(FileCategory::from_mime("text/plain"), FileCategory::Raw);
        assert_eq!(
            FileCategory::from_mime("application/pdf"),
            FileCategory::Raw
        );
    }

    #[test]
    fn test_replication_report_quorum() {
        let mut report = ReplicationReport::default();
        report.acks.push("postgres".into());
        report.failures.push(("mongodb".into(), "down".into()));
        assert!(report.meets_quorum(1));
        assert!(!report.meets_quorum(2));
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ApiEnvelope::ok_with_message(vec![1, 2], "done");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["author"], "aka");
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "done");
        assert!(json.get("error").is_none());
    }
}
