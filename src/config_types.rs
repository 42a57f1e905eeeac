use serde::{Deserialize, Serialize};

/// Main configuration structure for the file CDN service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload limits
    #[serde(default)]
    pub limits: UploadLimits,
    /// Security gate configuration
    #[serde(default)]
    pub security: SecurityConfig,
    /// Storage provider configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Notification sink configuration
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL used to build file links
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLimits {
    /// Maximum size per file in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum files per multipart request
    #[serde(default = "default_max_files_per_request")]
    pub max_files_per_request: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_files_per_request: default_max_files_per_request(),
        }
    }
}

/// Security gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Rate budget per key within the window
    #[serde(default = "default_rate_points")]
    pub rate_limit_points: u32,
    /// Rate window length in seconds
    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,
    /// How long an automatic IP block lasts, in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,
    /// Statically blocked IPs
    #[serde(default)]
    pub ip_blacklist: Vec<String>,
    /// Shared secret for admin bearer tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_points: default_rate_points(),
            rate_limit_window_secs: default_rate_window(),
            block_duration_secs: default_block_duration(),
            ip_blacklist: Vec::new(),
            jwt_secret: default_jwt_secret(),
        }
    }
}

/// Storage provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// S3-compatible primary object store
    #[serde(default)]
    pub s3: S3Config,
    /// First media CDN upload API
    #[serde(default)]
    pub media_cdn_a: HttpCdnConfig,
    /// Second media CDN upload API
    #[serde(default)]
    pub media_cdn_b: HttpCdnConfig,
}

/// S3/MinIO specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint URL (for MinIO or custom S3-compatible services)
    pub endpoint: Option<String>,
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Bucket holding uploaded objects
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Base URL under which bucket objects are publicly reachable
    #[serde(default)]
    pub public_base_url: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            bucket: default_bucket(),
            public_base_url: String::new(),
        }
    }
}

/// HTTP upload API configuration for a hosted media CDN
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpCdnConfig {
    /// Upload endpoint URL
    #[serde(default)]
    pub upload_url: String,
    /// API key sent as a bearer token
    #[serde(default)]
    pub api_key: String,
}

/// Metadata database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URI (designated primary)
    #[serde(default = "default_postgres_uri")]
    pub postgres_uri: String,
    /// MongoDB connection URI (replica)
    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    /// MongoDB database name
    #[serde(default = "default_mongodb_database")]
    pub mongodb_database: String,
    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Minimum replicas that must acknowledge a metadata write
    #[serde(default = "default_write_quorum")]
    pub write_quorum: usize,
    /// Per-call timeout for backend operations, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_uri: default_postgres_uri(),
            mongodb_uri: default_mongodb_uri(),
            mongodb_database: default_mongodb_database(),
            pool_size: default_pool_size(),
            write_quorum: default_write_quorum(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URI; cache and blocklist mirror are disabled when unset
    pub redis_uri: Option<String>,
    /// Metadata cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub metadata_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_uri: None,
            metadata_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Notification sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Bot API token; notifications are disabled when unset
    pub bot_token: Option<String>,
    /// Owner chat id for operational messages
    #[serde(default)]
    pub owner_chat_id: String,
    /// Channel id for broadcast messages
    #[serde(default)]
    pub channel_id: String,
    /// Bot API base URL
    #[serde(default = "default_bot_api_base")]
    pub api_base: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            owner_chat_id: String::new(),
            channel_id: String::new(),
            api_base: default_bot_api_base(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_files_per_request() -> usize {
    5
}

fn default_rate_points() -> u32 {
    10
}

fn default_rate_window() -> u64 {
    1
}

fn default_block_duration() -> u64 {
    3600
}

fn default_jwt_secret() -> String {
    "change-me".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket() -> String {
    "files".to_string()
}

fn default_postgres_uri() -> String {
    "postgres://localhost/file_cdn".to_string()
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongodb_database() -> String {
    "file_cdn".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_write_quorum() -> usize {
    1
}

fn default_call_timeout() -> u64 {
    5
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_bot_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.limits.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.limits.max_files_per_request, 5);
        assert_eq!(config.security.rate_limit_points, 10);
        assert_eq!(config.security.rate_limit_window_secs, 1);
        assert_eq!(config.database.write_quorum, 1);
        assert!(config.cache.redis_uri.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = serde_json::json!({
            "server": { "port": 9000 },
            "security": { "rate_limit_points": 3 }
        });
        let config: ServiceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.security.rate_limit_points, 3);
        assert_eq!(config.security.block_duration_secs, 3600);
    }
}
