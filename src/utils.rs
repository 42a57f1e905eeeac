//! Utility functions shared across the service
//!
//! Filename sanitization, identifier generation, hashing, and human-readable
//! formatting helpers.

/// Path and filename utilities
pub mod path {
    /// Sanitize a client-supplied filename for safe storage and display.
    ///
    /// Anything outside `[A-Za-z0-9._-]` becomes an underscore, runs of
    /// underscores collapse, and the result is capped at 255 characters.
    pub fn sanitize_filename(filename: &str) -> String {
        let mut sanitized = String::with_capacity(filename.len());
        let mut last_was_underscore = false;

        for ch in filename.chars() {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
                sanitized.push(ch);
                last_was_underscore = ch == '_';
            } else if !last_was_underscore {
                sanitized.push('_');
                last_was_underscore = true;
            }
        }

        sanitized.chars().take(255).collect()
    }

    /// Extract the lowercase extension (without the dot), if any.
    pub fn file_extension(filename: &str) -> Option<String> {
        let name = filename.rsplit('/').next().unwrap_or(filename);
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    /// Extension with leading dot, lowercased, for deny-list lookups.
    pub fn dotted_extension(filename: &str) -> Option<String> {
        file_extension(filename).map(|ext| format!(".{ext}"))
    }
}

/// Identifier generation
pub mod id {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    /// Generate a short opaque file identifier (alphanumeric).
    pub fn generate_file_id(length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

/// Hash utilities
pub mod hash {
    use sha2::{Digest, Sha256};

    /// SHA-256 digest of the payload as lowercase hex.
    pub fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}

/// Size formatting utilities
pub mod size {
    const UNITS: &[&str] = &["Bytes", "KB", "MB", "GB", "TB", "PB"];

    /// Format a byte count the way the API reports sizes (1024-based).
    pub fn format_bytes(bytes: u64) -> String {
        if bytes == 0 {
            return "0 Bytes".to_string();
        }

        let exp = (bytes as f64).log(1024.0).floor() as usize;
        let exp = exp.min(UNITS.len() - 1);
        let value = bytes as f64 / 1024_f64.powi(exp as i32);

        let formatted = format!("{value:.2}");
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        format!("{} {}", trimmed, UNITS[exp])
    }
}

/// Time utilities
pub mod time {
    /// Format an uptime duration as `1d 2h 3m`.
    pub fn format_uptime(total_seconds: u64) -> String {
        let days = total_seconds / 86_400;
        let hours = (total_seconds % 86_400) / 3_600;
        let minutes = (total_seconds % 3_600) / 60;
        format!("{days}d {hours}h {minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(path::sanitize_filename("hello world.txt"), "hello_world.txt");
        assert_eq!(path::sanitize_filename("a<>b|c.txt"), "a_b_c.txt");
        assert_eq!(path::sanitize_filename("report-final_v2.pdf"), "report-final_v2.pdf");
    }

    #[test]
    fn test_sanitize_collapses_runs() {
        assert_eq!(path::sanitize_filename("a   !!!  b.txt"), "a_b.txt");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(400);
        assert_eq!(path::sanitize_filename(&long).len(), 255);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(path::file_extension("a.txt"), Some("txt".to_string()));
        assert_eq!(path::file_extension("archive.TAR.GZ"), Some("gz".to_string()));
        assert_eq!(path::file_extension("noext"), None);
        assert_eq!(path::dotted_extension("setup.EXE"), Some(".exe".to_string()));
    }

    #[test]
    fn test_generate_file_id() {
        let a = id::generate_file_id(12);
        let b = id::generate_file_id(12);
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_sha256_hex() {
        let digest = hash::sha256_hex(b"test data");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(size::format_bytes(0), "0 Bytes");
        assert_eq!(size::format_bytes(512), "512 Bytes");
        assert_eq!(size::format_bytes(1024), "1 KB");
        assert_eq!(size::format_bytes(1_536), "1.5 KB");
        assert_eq!(size::format_bytes(10 * 1024 * 1024), "10 MB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(time::format_uptime(0), "0d 0h 0m");
        assert_eq!(time::format_uptime(90_061), "1d 1h 1m");
    }
}
