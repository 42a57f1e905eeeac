//! HTTP request handlers
//!
//! Every handler runs the security gate first, then composes the validator,
//! provider selector, storage backend, and metadata store. Responses share
//! the fixed JSON envelope and security headers.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Multipart, Path, State},
    extract::rejection::JsonRejection,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{extract_bearer_token, verify_admin_token};
use crate::error::{CdnError, CdnResult};
use crate::models::{
    ApiEnvelope, FileInfoData, FileRecord, FileStatusData, StatsData, UploadReportEntry,
    UploadedFileData,
};
use crate::providers::{select_provider, Delivery};
use crate::security::{apply_security_headers, client_ip, InputKind};
use crate::utils::{
    hash::sha256_hex,
    id::generate_file_id,
    path::{dotted_extension, sanitize_filename},
    size::format_bytes,
    time::format_uptime,
};
use crate::AppState;

/// Length of generated file identifiers
const FILE_ID_LEN: usize = 12;

/// Request body for URL ingestion
#[derive(Debug, serde::Deserialize, Validate)]
pub struct UrlUploadRequest {
    #[validate(url)]
    pub url: String,
}

/// Wrap a success envelope with the fixed security headers.
fn envelope_response<T: Serialize>(envelope: ApiEnvelope<T>) -> Response {
    let mut response = Json(envelope).into_response();
    apply_security_headers(response.headers_mut());
    response
}

/// Attack detection + auto-block, shared by the write endpoints.
async fn reject_attacks(
    state: &AppState,
    ip: &str,
    headers: &HeaderMap,
    uri: &Uri,
) -> CdnResult<()> {
    let report = state.security.detect_attack(ip, headers, uri).await;
    if report.is_attack() {
        let indicators = report.indicator_names();
        state
            .security
            .block_ip(ip, &format!("Attack detected: {}", indicators.join(", ")))
            .await;
        return Err(CdnError::SecurityViolation { indicators });
    }
    Ok(())
}

/// Rate-limit gate for one logical endpoint.
fn enforce_rate_limit(state: &AppState, ip: &str, endpoint: &str) -> CdnResult<()> {
    let decision = state.security.check_rate_limit(ip, endpoint);
    if !decision.allowed {
        return Err(CdnError::RateLimited {
            retry_after: decision.retry_after.unwrap_or(1),
        });
    }
    Ok(())
}

/// One upload: validate, pick a provider, store bytes, replicate metadata.
pub(crate) async fn process_single_upload(
    state: &AppState,
    data: Bytes,
    declared_mime: &str,
    filename: &str,
    source_url: Option<String>,
) -> CdnResult<UploadedFileData> {
    let validated = state.validator.validate(&data, declared_mime, filename)?;

    let sanitized_name = sanitize_filename(filename);
    let hash = sha256_hex(&data);
    let file_id = generate_file_id(FILE_ID_LEN);
    let extension = dotted_extension(&sanitized_name).unwrap_or_else(|| ".bin".to_string());
    let stored_name = format!("{file_id}{extension}");
    let size = data.len() as u64;

    let provider = select_provider(&state.policy_table, &validated.mime_type, size);
    let backend = state.storage.get(provider)?;
    let stored = backend
        .put(&stored_name, data, &validated.mime_type)
        .await?;

    let record = FileRecord {
        id: file_id.clone(),
        file_name: stored_name,
        original_name: sanitized_name.clone(),
        size,
        mime_type: validated.mime_type.clone(),
        hash,
        storage_provider: provider,
        storage_path: stored.storage_path,
        url: stored.url.clone(),
        source_url,
        downloads: 0,
        created_at: Utc::now(),
        expires_at: None,
        last_accessed: None,
    };

    let report = state.metadata.store(&record).await?;
    if !report.failures.is_empty() {
        warn!(
            id = %file_id,
            failed_replicas = ?report.failures,
            "metadata replicated with partial failure"
        );
    }

    info!(id = %file_id, provider = %provider, size, "file stored");

    Ok(UploadedFileData {
        id: file_id,
        filename: sanitized_name,
        size,
        mime_type: validated.mime_type,
        url: stored.url,
        db_type: provider,
        created_at: record.created_at,
    })
}

/// `POST /api/upload` — multipart form with up to five files.
pub async fn upload_files(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    mut multipart: Multipart,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);

    reject_attacks(&state, &ip, &headers, &uri).await?;
    enforce_rate_limit(&state, &ip, "upload")?;

    let max_files = state.config.limits.max_files_per_request;
    let max_size = state.config.limits.max_file_size;
    let mut files: Vec<(String, String, Bytes)> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        CdnError::BadRequest {
            message: format!("Malformed multipart body: {e}"),
        }
    })? {
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("upload_{}", uuid::Uuid::new_v4()));
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(|e| CdnError::BadRequest {
            message: format!("Failed to read file data: {e}"),
        })?;

        if files.len() >= max_files {
            state.security.block_ip(&ip, "Too many files attempted").await;
            return Err(CdnError::BadRequest {
                message: format!("Maximum {max_files} files allowed per request"),
            });
        }

        if data.len() as u64 > max_size {
            return Err(CdnError::FileTooLarge {
                size: data.len() as u64,
                max_size,
            });
        }

        files.push((filename, content_type, data));
    }

    if files.is_empty() {
        return Err(CdnError::BadRequest {
            message: "No files provided".to_string(),
        });
    }

    let total = files.len();
    let mut uploaded = Vec::new();
    let mut report_entries = Vec::new();

    for (filename, content_type, data) in files {
        let size_label = format_bytes(data.len() as u64);
        match process_single_upload(&state, data, &content_type, &filename, None).await {
            Ok(item) => {
                report_entries.push(UploadReportEntry {
                    filename: item.filename.clone(),
                    size: size_label,
                    db: item.db_type.to_string(),
                    status: "success",
                    error: None,
                });
                uploaded.push(item);
            }
            Err(e) => {
                warn!(filename, "upload failed: {}", e);
                report_entries.push(UploadReportEntry {
                    filename: sanitize_filename(&filename),
                    size: size_label,
                    db: String::new(),
                    status: "failed",
                    error: Some(e.to_string()),
                });
            }
        }
    }

    state
        .notifier
        .notify_upload(&ip, &report_entries, uploaded.len(), total)
        .await;

    Ok(envelope_response(ApiEnvelope::ok_with_message(
        uploaded.clone(),
        format!("Successfully uploaded {} of {} files", uploaded.len(), total),
    )))
}

/// `POST /api/upload/url` — server-side fetch and store.
pub async fn upload_from_url(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    body: Result<Json<UrlUploadRequest>, JsonRejection>,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);

    reject_attacks(&state, &ip, &headers, &uri).await?;
    enforce_rate_limit(&state, &ip, "upload_url")?;

    let Json(request) = body.map_err(|_| CdnError::BadRequest {
        message: "URL parameter is required".to_string(),
    })?;

    if request.validate().is_err()
        || !state.security.validate_input(&request.url, InputKind::Url)
    {
        return Err(CdnError::invalid_input("URL format"));
    }

    let max_size = state.config.limits.max_file_size;

    let response = state
        .http
        .get(&request.url)
        .header(reqwest::header::USER_AGENT, "FileCdn/1.0")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(CdnError::BadRequest {
            message: format!("Failed to fetch URL: {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    if let Some(length) = response.content_length() {
        if length > max_size {
            return Err(CdnError::FileTooLarge {
                size: length,
                max_size,
            });
        }
    }

    let data = response.bytes().await?;
    if data.len() as u64 > max_size {
        return Err(CdnError::FileTooLarge {
            size: data.len() as u64,
            max_size,
        });
    }

    let parsed = reqwest::Url::parse(&request.url)
        .map_err(|_| CdnError::invalid_input("URL format"))?;
    let original_filename = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("file.bin")
        .to_string();

    let item = process_single_upload(
        &state,
        data,
        &content_type,
        &original_filename,
        Some(request.url.clone()),
    )
    .await?;

    state
        .notifier
        .notify_upload(
            &ip,
            &[UploadReportEntry {
                filename: item.filename.clone(),
                size: format_bytes(item.size),
                db: item.db_type.to_string(),
                status: "success",
                error: None,
            }],
            1,
            1,
        )
        .await;

    Ok(envelope_response(ApiEnvelope::ok(item)))
}

/// Validate a path id, auto-blocking callers probing with malformed ones.
async fn require_valid_id(state: &AppState, ip: &str, id: &str, context: &str) -> CdnResult<()> {
    if !state.security.validate_input(id, InputKind::Id) {
        state
            .security
            .block_ip(ip, &format!("Invalid file ID in {context}"))
            .await;
        return Err(CdnError::invalid_input("file ID"));
    }
    Ok(())
}

/// `GET /files/{id}` — metadata projection.
pub async fn file_info(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);

    require_valid_id(&state, &ip, &id, "info").await?;
    enforce_rate_limit(&state, &ip, "file_info")?;

    let record = state
        .metadata
        .get(&id)
        .await?
        .ok_or_else(|| CdnError::FileNotFound { file_id: id.clone() })?;

    let base_url = state.config.server.base_url.trim_end_matches('/');
    let data = FileInfoData {
        id: record.id.clone(),
        name: record.original_name,
        size: record.size,
        mime_type: record.mime_type,
        chunked: false,
        chunk_count: 0,
        checksum: record.hash,
        created_at: record.created_at,
        downloads: record.downloads,
        download_url: format!("{base_url}/files/{}/download", record.id),
        db_type: record.storage_provider,
        url: record.url,
    };

    Ok(envelope_response(ApiEnvelope::ok(data)))
}

/// `GET /files/{id}/status` — existence probe; always `success: true`.
pub async fn file_status(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);

    if !state.security.validate_input(&id, InputKind::Id) {
        return Err(CdnError::invalid_input("file ID"));
    }
    enforce_rate_limit(&state, &ip, "file_status")?;

    let base_url = state.config.server.base_url.trim_end_matches('/');
    let data = match state.metadata.get(&id).await? {
        Some(record) => FileStatusData {
            id: record.id.clone(),
            name: record.original_name,
            size: record.size,
            status: "completed",
            message: "Upload completed successfully",
            chunked: false,
            chunk_count: 0,
            download_url: Some(format!("{base_url}/files/{}/download", record.id)),
        },
        None => FileStatusData {
            id,
            name: "Unknown".to_string(),
            size: 0,
            status: "not_found",
            message: "File not found or not yet processed",
            chunked: false,
            chunk_count: 0,
            download_url: None,
        },
    };

    Ok(envelope_response(ApiEnvelope::ok(data)))
}

/// `GET /files/{id}/download` — redirect to the provider or stream bytes.
pub async fn download_file(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);

    require_valid_id(&state, &ip, &id, "download").await?;
    enforce_rate_limit(&state, &ip, "file_download")?;

    let record = state
        .metadata
        .get(&id)
        .await?
        .ok_or_else(|| CdnError::FileNotFound { file_id: id.clone() })?;

    // Best-effort counter bump; replica failures are logged, never surfaced.
    state.metadata.increment_downloads(&id).await;

    state
        .notifier
        .notify_download(&ip, &id, &record.original_name, record.size)
        .await;

    let backend = state.storage.get(record.storage_provider)?;

    match backend.delivery() {
        Delivery::Redirect => {
            let mut response = (
                StatusCode::TEMPORARY_REDIRECT,
                [(header::LOCATION, record.url.clone())],
            )
                .into_response();
            apply_security_headers(response.headers_mut());
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".parse().unwrap(),
            );
            Ok(response)
        }
        Delivery::Stream => {
            let data = backend.fetch(&record).await?;

            let mut response = (StatusCode::OK, data).into_response();
            apply_security_headers(response.headers_mut());
            let headers = response.headers_mut();
            if let Ok(content_type) = record.mime_type.parse() {
                headers.insert(header::CONTENT_TYPE, content_type);
            }
            headers.insert(
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}\"",
                    sanitize_filename(&record.original_name)
                )
                .parse()
                .map_err(|_| CdnError::internal("invalid content disposition"))?,
            );
            headers.insert(
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".parse().unwrap(),
            );
            Ok(response)
        }
    }
}

/// `GET /api/stats` — aggregate counts, sizes, uptime.
pub async fn stats(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);
    enforce_rate_limit(&state, &ip, "stats")?;

    let snapshot = state.metadata.stats().await?;
    let uptime_secs = state.started_at.elapsed().as_secs();

    let data = StatsData {
        total_files: snapshot.total_files,
        total_size: format_bytes(snapshot.total_size_bytes),
        uptime: format_uptime(uptime_secs),
        databases: state.metadata.backend_count(),
        database_breakdown: snapshot.by_provider,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    };

    Ok(envelope_response(ApiEnvelope::ok(data)))
}

/// Payload for the admin cleanup response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupData {
    pub purged: usize,
    pub execution_time: String,
}

/// `POST /api/admin/cleanup` — bearer-token gated expired-file purge.
pub async fn admin_cleanup(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> CdnResult<Response> {
    let ip = client_ip(&headers, peer);

    let token = extract_bearer_token(&headers)?;
    verify_admin_token(token, &state.config.security.jwt_secret)?;

    enforce_rate_limit(&state, &ip, "admin_cleanup")?;

    let started = Instant::now();
    let purged = match state.metadata.cleanup_expired(&state.storage).await {
        Ok(purged) => purged,
        Err(e) => {
            state
                .notifier
                .notify_error("/api/admin/cleanup", &e.to_string())
                .await;
            return Err(e);
        }
    };
    let elapsed = started.elapsed();

    state
        .notifier
        .notify_owner(&format!(
            "🧹 Cleanup completed in {}ms, {} files purged",
            elapsed.as_millis(),
            purged
        ))
        .await;

    Ok(envelope_response(ApiEnvelope::ok_with_message(
        CleanupData {
            purged,
            execution_time: format!("{}ms", elapsed.as_millis()),
        },
        "Cleanup completed successfully",
    )))
}
