//! Security gate
//!
//! Per-IP rate limiting, pattern-based attack detection, and a TTL-bounded
//! IP blocklist. The in-memory blocklist is authoritative for this process;
//! Redis carries the cross-process mirror with its own TTL.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, HeaderValue, Uri};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use redis::{aio::ConnectionManager, AsyncCommands};
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config_types::SecurityConfig;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Request patterns treated as hostile in any client-supplied field
const SUSPICIOUS_PATTERNS: &[&str] = &[
    r"\.\./",
    r"/etc/passwd",
    r"/bin/sh",
    r"(?i)union.*select",
    r"(?i)insert.*into",
    r"(?i)drop.*table",
    r"(?i)script.*>",
    r"(?i)onload=",
    r"(?i)onerror=",
    r"(?i)javascript:",
    r"(?i)data:",
    r"(?i)vbscript:",
];

/// User-agent substrings of known browsers; anything else counts as unknown
const KNOWN_BROWSERS: &[&str] = &["Firefox", "Chrome", "Safari", "Edg", "OPR", "Opera", "MSIE"];

/// Content types requests are allowed to carry
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "multipart/form-data",
    "application/x-www-form-urlencoded",
];

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "permissions-policy",
        "camera=(), microphone=(), geolocation=()",
    ),
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
         style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; \
         font-src 'self' data:; connect-src 'self'; frame-ancestors 'none'; \
         base-uri 'self'; form-action 'self';",
    ),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains; preload",
    ),
];

/// Attach the fixed security headers to a response
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(*name, HeaderValue::from_static(value));
    }
}

/// Resolve the client IP: X-Forwarded-For, then X-Real-IP, then the socket.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().to_string();
    }

    peer.ip().to_string()
}

/// Kinds of client-supplied fields with distinct validation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Id,
    Filename,
    Url,
    Text,
}

/// Signals produced by attack detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackIndicator {
    BlockedIp,
    CliTool,
    UnknownBrowser,
    SuspiciousReferer,
    PathTraversal,
    UnsupportedContentType,
}

impl AttackIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackIndicator::BlockedIp => "BLOCKED_IP",
            AttackIndicator::CliTool => "CLI_TOOL",
            AttackIndicator::UnknownBrowser => "UNKNOWN_BROWSER",
            AttackIndicator::SuspiciousReferer => "SUSPICIOUS_REFERER",
            AttackIndicator::PathTraversal => "PATH_TRAVERSAL",
            AttackIndicator::UnsupportedContentType => "UNSUPPORTED_CONTENT_TYPE",
        }
    }
}

/// Attack classification for one request
#[derive(Debug, Clone, Default)]
pub struct AttackReport {
    pub indicators: Vec<AttackIndicator>,
}

impl AttackReport {
    pub fn is_attack(&self) -> bool {
        !self.indicators.is_empty()
    }

    pub fn indicator_names(&self) -> Vec<String> {
        self.indicators.iter().map(|i| i.as_str().to_string()).collect()
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds to wait before retrying, when denied
    pub retry_after: Option<u64>,
}

/// Process-wide security state: rate limiter, blocklist, input validation
pub struct SecurityGate {
    limiter: KeyedLimiter,
    clock: DefaultClock,
    blocked: RwLock<HashMap<String, Instant>>,
    static_blacklist: HashSet<String>,
    block_duration: Duration,
    redis: Option<ConnectionManager>,
    patterns: Vec<Regex>,
}

impl SecurityGate {
    pub fn new(config: &SecurityConfig, redis: Option<ConnectionManager>) -> Self {
        let points = NonZeroU32::new(config.rate_limit_points).unwrap_or(NonZeroU32::MIN);
        let window = Duration::from_secs(config.rate_limit_window_secs.max(1));
        let quota = Quota::with_period(window / points.get())
            .unwrap_or_else(|| Quota::per_second(points))
            .allow_burst(points);

        let patterns = SUSPICIOUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect();

        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
            blocked: RwLock::new(HashMap::new()),
            static_blacklist: config.ip_blacklist.iter().cloned().collect(),
            block_duration: Duration::from_secs(config.block_duration_secs),
            redis,
            patterns,
        }
    }

    /// Consume one point from the `(ip, endpoint)` budget.
    pub fn check_rate_limit(&self, ip: &str, endpoint: &str) -> RateDecision {
        let key = format!("rate_limit:{ip}:{endpoint}");
        match self.limiter.check_key(&key) {
            Ok(()) => RateDecision {
                allowed: true,
                retry_after: None,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                let retry_after = wait.as_secs().max(1);
                debug!(ip, endpoint, retry_after, "rate limit exceeded");
                RateDecision {
                    allowed: false,
                    retry_after: Some(retry_after),
                }
            }
        }
    }

    /// Classify a request; BLOCKED_IP and PATH_TRAVERSAL auto-block the IP.
    pub async fn detect_attack(&self, ip: &str, headers: &HeaderMap, uri: &Uri) -> AttackReport {
        let mut indicators = Vec::new();

        if self.is_blocked(ip).await {
            indicators.push(AttackIndicator::BlockedIp);
        }

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if user_agent.contains("curl") || user_agent.contains("wget") {
            indicators.push(AttackIndicator::CliTool);
        }

        if !KNOWN_BROWSERS.iter().any(|b| user_agent.contains(b)) {
            indicators.push(AttackIndicator::UnknownBrowser);
        }

        if let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
            if !self.validate_input(referer, InputKind::Url) {
                indicators.push(AttackIndicator::SuspiciousReferer);
            }
        }

        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        if path_and_query.contains("..") || path_and_query.contains("//") {
            indicators.push(AttackIndicator::PathTraversal);
        }

        if let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !ALLOWED_CONTENT_TYPES
                .iter()
                .any(|allowed| content_type.contains(allowed))
            {
                indicators.push(AttackIndicator::UnsupportedContentType);
            }
        }

        let report = AttackReport { indicators };

        if report.is_attack() {
            warn!(
                ip,
                indicators = ?report.indicator_names(),
                uri = %uri,
                "attack detected"
            );

            let auto_block = report.indicators.iter().any(|i| {
                matches!(
                    i,
                    AttackIndicator::BlockedIp | AttackIndicator::PathTraversal
                )
            });
            if auto_block {
                self.block_ip(ip, &format!("Attack detected: {}", report.indicator_names().join(", ")))
                    .await;
            }
        }

        report
    }

    /// Block an IP for the configured duration, mirroring to Redis when available.
    pub async fn block_ip(&self, ip: &str, reason: &str) {
        {
            let mut blocked = self.blocked.write().await;
            blocked.insert(ip.to_string(), Instant::now() + self.block_duration);
        }

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let key = format!("blocked:{ip}");
            let result: redis::RedisResult<()> = conn
                .set_ex(&key, reason, self.block_duration.as_secs())
                .await;
            if let Err(e) = result {
                warn!(ip, "failed to mirror block to redis: {}", e);
            }
        }

        warn!(ip, reason, "IP blocked");
    }

    /// Lift a block; privileged callers only.
    pub async fn unblock_ip(&self, ip: &str) {
        self.blocked.write().await.remove(ip);

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: redis::RedisResult<()> = conn.del(format!("blocked:{ip}")).await;
            if let Err(e) = result {
                warn!(ip, "failed to remove redis block: {}", e);
            }
        }
    }

    /// The in-memory set is authoritative for this process; expired entries
    /// are ignored until the sweep removes them.
    pub async fn is_blocked(&self, ip: &str) -> bool {
        if self.static_blacklist.contains(ip) {
            return true;
        }

        let blocked = self.blocked.read().await;
        blocked
            .get(ip)
            .map(|expiry| *expiry > Instant::now())
            .unwrap_or(false)
    }

    /// Seed the in-memory blocklist from the Redis mirror at startup.
    pub async fn load_blocked_from_redis(&self) {
        let Some(redis) = &self.redis else {
            return;
        };

        let mut conn = redis.clone();
        let keys: Vec<String> = match conn.keys("blocked:*").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("failed to load blocked IPs from redis: {}", e);
                return;
            }
        };

        let mut blocked = self.blocked.write().await;
        for key in keys {
            let ip = key.trim_start_matches("blocked:").to_string();
            blocked.insert(ip, Instant::now() + self.block_duration);
        }
        debug!(count = blocked.len(), "loaded blocked IPs from redis");
    }

    /// Remove expired blocklist entries; Redis entries expire on their own TTL.
    pub async fn sweep_expired(&self) -> usize {
        let mut blocked = self.blocked.write().await;
        let before = blocked.len();
        let now = Instant::now();
        blocked.retain(|_, expiry| *expiry > now);
        before - blocked.len()
    }

    pub async fn blocked_count(&self) -> usize {
        self.blocked.read().await.len()
    }

    /// Per-field-kind validation of client input.
    pub fn validate_input(&self, input: &str, kind: InputKind) -> bool {
        if input.is_empty() {
            return false;
        }

        match kind {
            InputKind::Id => {
                input.len() >= 8
                    && input.len() <= 32
                    && input.chars().all(|c| c.is_ascii_alphanumeric())
            }
            InputKind::Filename => {
                input.len() <= 255
                    && !self.matches_suspicious(input)
                    && input.chars().all(|c| {
                        c.is_ascii_alphanumeric()
                            || c == '.'
                            || c == '_'
                            || c == '-'
                            || c == ' '
                    })
            }
            InputKind::Url => match reqwest::Url::parse(input) {
                Ok(url) => {
                    matches!(url.scheme(), "http" | "https")
                        && url.host_str().map(|h| h.len() <= 253).unwrap_or(false)
                        && !self.matches_suspicious(input)
                }
                Err(_) => false,
            },
            InputKind::Text => input.len() <= 1000 && !self.matches_suspicious(input),
        }
    }

    fn matches_suspicious(&self, input: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_types::SecurityConfig;

    fn gate_with(points: u32, window_secs: u64) -> SecurityGate {
        let config = SecurityConfig {
            rate_limit_points: points,
            rate_limit_window_secs: window_secs,
            ..SecurityConfig::default()
        };
        SecurityGate::new(&config, None)
    }

    #[tokio::test]
    async fn test_rate_limit_budget_exhaustion() {
        let gate = gate_with(3, 60);

        for _ in 0..3 {
            let decision = gate.check_rate_limit("10.0.0.1", "upload");
            assert!(decision.allowed);
        }

        let denied = gate.check_rate_limit("10.0.0.1", "upload");
        assert!(!denied.allowed);
        assert!(denied.retry_after.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_rate_limit_keys_are_independent() {
        let gate = gate_with(1, 60);

        assert!(gate.check_rate_limit("10.0.0.1", "upload").allowed);
        assert!(!gate.check_rate_limit("10.0.0.1", "upload").allowed);

        // A different endpoint and a different IP each have their own budget.
        assert!(gate.check_rate_limit("10.0.0.1", "stats").allowed);
        assert!(gate.check_rate_limit("10.0.0.2", "upload").allowed);
    }

    #[tokio::test]
    async fn test_block_and_unblock() {
        let gate = gate_with(10, 1);

        assert!(!gate.is_blocked("1.2.3.4").await);
        gate.block_ip("1.2.3.4", "test block").await;
        assert!(gate.is_blocked("1.2.3.4").await);

        gate.unblock_ip("1.2.3.4").await;
        assert!(!gate.is_blocked("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_static_blacklist() {
        let config = SecurityConfig {
            ip_blacklist: vec!["9.9.9.9".to_string()],
            ..SecurityConfig::default()
        };
        let gate = SecurityGate::new(&config, None);
        assert!(gate.is_blocked("9.9.9.9").await);
        assert!(!gate.is_blocked("9.9.9.8").await);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_blocks() {
        let config = SecurityConfig {
            block_duration_secs: 0,
            ..SecurityConfig::default()
        };
        let gate = SecurityGate::new(&config, None);

        gate.block_ip("5.6.7.8", "short block").await;
        assert!(!gate.is_blocked("5.6.7.8").await);

        let removed = gate.sweep_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(gate.blocked_count().await, 0);
    }

    #[tokio::test]
    async fn test_detect_attack_path_traversal_blocks() {
        let gate = gate_with(10, 1);
        let headers = browser_headers();
        let uri: Uri = "/files/..%2f..%2fetc/../passwd".parse().unwrap();

        let report = gate.detect_attack("6.6.6.6", &headers, &uri).await;
        assert!(report.is_attack());
        assert!(report.indicators.contains(&AttackIndicator::PathTraversal));
        assert!(gate.is_blocked("6.6.6.6").await);
    }

    #[tokio::test]
    async fn test_detect_attack_cli_tool() {
        let gate = gate_with(10, 1);
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "curl/8.4.0".parse().unwrap());
        let uri: Uri = "/api/upload".parse().unwrap();

        let report = gate.detect_attack("7.7.7.7", &headers, &uri).await;
        assert!(report.is_attack());
        assert!(report.indicators.contains(&AttackIndicator::CliTool));
        assert!(report.indicators.contains(&AttackIndicator::UnknownBrowser));
        // Neither indicator auto-blocks.
        assert!(!gate.is_blocked("7.7.7.7").await);
    }

    #[tokio::test]
    async fn test_detect_attack_clean_browser_request() {
        let gate = gate_with(10, 1);
        let headers = browser_headers();
        let uri: Uri = "/api/stats".parse().unwrap();

        let report = gate.detect_attack("8.8.8.8", &headers, &uri).await;
        assert!(!report.is_attack());
    }

    #[test]
    fn test_validate_input_id() {
        let gate = gate_with(10, 1);
        assert!(gate.validate_input("a1b2c3d4e5f6", InputKind::Id));
        assert!(!gate.validate_input("short", InputKind::Id));
        assert!(!gate.validate_input("has-dashes-in-it", InputKind::Id));
        assert!(!gate.validate_input("../../../../etc", InputKind::Id));
    }

    #[test]
    fn test_validate_input_filename() {
        let gate = gate_with(10, 1);
        assert!(gate.validate_input("report v2.pdf", InputKind::Filename));
        assert!(!gate.validate_input("../secret.txt", InputKind::Filename));
        assert!(!gate.validate_input("run<script>.txt", InputKind::Filename));
    }

    #[test]
    fn test_validate_input_url() {
        let gate = gate_with(10, 1);
        assert!(gate.validate_input("https://example.com/file.png", InputKind::Url));
        assert!(!gate.validate_input("ftp://example.com/file.png", InputKind::Url));
        assert!(!gate.validate_input("not a url", InputKind::Url));
        assert!(!gate.validate_input("https://example.com/../../etc/passwd", InputKind::Url));
    }

    #[test]
    fn test_validate_input_text() {
        let gate = gate_with(10, 1);
        assert!(gate.validate_input("ordinary description", InputKind::Text));
        assert!(!gate.validate_input("DROP TABLE files", InputKind::Text));
        assert!(!gate.validate_input(&"x".repeat(1001), InputKind::Text));
    }

    #[test]
    fn test_security_headers_applied() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers);
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert!(headers.contains_key("content-security-policy"));
        assert!(headers.contains_key("strict-transport-security"));
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.168.1.50:443".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), "192.168.1.50");

        headers.insert("x-real-ip", "203.0.113.9".parse().unwrap());
        assert_eq!(client_ip(&headers, peer), "203.0.113.9");

        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, peer), "198.51.100.7");
    }

    fn browser_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36"
                .parse()
                .unwrap(),
        );
        headers
    }
}
