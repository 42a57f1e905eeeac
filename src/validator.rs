//! Upload payload validation
//!
//! Checks filenames and content against a MIME allow-list, an extension
//! deny-list, and known-dangerous byte signatures before anything reaches a
//! storage backend.

use regex::Regex;

use crate::error::{CdnError, CdnResult};
use crate::utils::path::dotted_extension;

/// MIME types accepted for storage
const ALLOWED_MIME_TYPES: &[&str] = &[
    // Images
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
    "image/vnd.microsoft.icon",
    // Videos
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-ms-wmv",
    "video/x-flv",
    "video/matroska",
    "video/x-matroska",
    "video/3gpp",
    "video/3gpp2",
    // Audio
    "audio/mpeg",
    "audio/wav",
    "audio/x-wav",
    "audio/ogg",
    "audio/flac",
    "audio/x-flac",
    "audio/aac",
    "audio/x-m4a",
    "audio/webm",
    // Documents
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/rtf",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    // Archives
    "application/zip",
    "application/x-rar-compressed",
    "application/vnd.rar",
    "application/x-7z-compressed",
    "application/x-tar",
    "application/gzip",
    "application/x-bzip2",
    "application/x-xz",
    // Text
    "text/plain",
    "text/csv",
    "text/html",
    "text/css",
    "text/javascript",
    "application/json",
    "application/xml",
    "text/xml",
    // Fonts
    "font/ttf",
    "font/otf",
    "font/woff",
    "font/woff2",
    // Other
    "application/octet-stream",
];

/// Extensions rejected regardless of content
const DANGEROUS_EXTENSIONS: &[&str] = &[
    ".exe", ".bat", ".cmd", ".sh", ".php", ".asp", ".aspx", ".jsp", ".pl", ".py", ".rb", ".jar",
    ".class", ".js", ".vbs", ".ps1", ".msi", ".com", ".scr", ".pif", ".application", ".gadget",
    ".msp", ".hta", ".cpl", ".msc", ".vb", ".vbe", ".ws", ".wsf", ".wsc", ".wsh", ".psc1",
    ".psc2", ".msh", ".msh1", ".msh2", ".mshxml", ".msh1xml", ".msh2xml", ".scf", ".lnk", ".inf",
    ".reg", ".docm", ".dotm", ".xlsm", ".xltm", ".xlam", ".pptm", ".potm", ".ppam", ".sldm",
    ".sldx",
];

/// Text patterns treated as malicious when found in the content prefix
const MALICIOUS_PATTERNS: &[&str] = &[
    r"(?i)<\s*script\s*>.*<\s*/script\s*>",
    r"(?i)javascript:",
    r"(?i)vbscript:",
    r"(?i)data:",
    r"(?i)onload=",
    r"(?i)onerror=",
    r"(?i)onclick=",
    r"(?i)eval\(",
    r"(?i)document\.cookie",
    r"(?i)window\.location",
    r"\.\./",
    r"(?i)/etc/passwd",
    r"(?i)/bin/sh",
    r"(?i)union.*select",
    r"(?i)insert.*into",
    r"(?i)drop.*table",
    r"(?i)delete.*from",
    r"(?i)update.*set",
    r"(?i)create.*table",
    r"(?i)alter.*table",
    r"(?i)exec\(",
    r"(?i)system\(",
    r"(?i)shell_exec\(",
    r"(?i)passthru\(",
];

/// Leading byte signatures of executables and containers that share them
const DANGEROUS_SIGNATURES: &[(&[u8], &str)] = &[
    (b"MZ", "MZ"),
    (b"ZM", "ZM"),
    (b"\x7fELF", "ELF"),
    (b"#!", "shebang"),
    (b"MSCF", "MS Cabinet"),
    (b"PK\x03\x04", "ZIP"),
    (b"Rar!\x1a\x07", "RAR"),
    (b"7z\xbc\xaf\x27\x1c", "7z"),
];

/// Archive extensions allowed to carry an executable-shaped signature
const SIGNATURE_EXEMPT_EXTENSIONS: &[&str] = &[".zip", ".rar", ".7z"];

/// How much of the content prefix gets pattern-scanned
const SCAN_PREFIX_LEN: usize = 1024;

/// Approved upload with its effective type
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFile {
    /// Detected content type (never the client's unchecked claim)
    pub mime_type: String,
    /// Dotted lowercase extension, e.g. `.png`
    pub extension: String,
}

/// Validates upload payloads against the allow/deny lists
pub struct FileValidator {
    max_file_size: u64,
    patterns: Vec<Regex>,
}

impl FileValidator {
    pub fn new(max_file_size: u64) -> Self {
        let patterns = MALICIOUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect();
        Self {
            max_file_size,
            patterns,
        }
    }

    /// Validate a payload against size, extension, type, and content checks.
    pub fn validate(
        &self,
        data: &[u8],
        declared_mime: &str,
        filename: &str,
    ) -> CdnResult<ValidatedFile> {
        if data.len() as u64 > self.max_file_size {
            return Err(CdnError::FileTooLarge {
                size: data.len() as u64,
                max_size: self.max_file_size,
            });
        }

        if data.is_empty() {
            return Err(CdnError::EmptyFile);
        }

        let extension = dotted_extension(filename).unwrap_or_default();
        if DANGEROUS_EXTENSIONS.contains(&extension.as_str()) {
            return Err(CdnError::BlockedExtension { extension });
        }

        // Magic numbers first, then the extension-derived guess, then the
        // generic binary fallback.
        let detected = match infer::get(data) {
            Some(kind) => kind.mime_type().to_string(),
            None => mime_guess::from_path(filename)
                .first()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.essence_str().to_string()),
        };

        if !ALLOWED_MIME_TYPES.contains(&detected.as_str()) {
            return Err(CdnError::UnsupportedFileType {
                mime_type: detected,
            });
        }

        // Type confusion defense: the caller's claim must agree with what the
        // bytes say, unless the claim is the generic fallback.
        let declared = declared_mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !declared.is_empty()
            && declared != mime::APPLICATION_OCTET_STREAM.essence_str()
            && declared != detected
        {
            return Err(CdnError::TypeMismatch {
                declared,
                detected,
            });
        }

        self.scan_content(data, filename)?;

        Ok(ValidatedFile {
            mime_type: detected,
            extension,
        })
    }

    /// Scan the content prefix for malicious text patterns and executable
    /// signatures.
    fn scan_content(&self, data: &[u8], filename: &str) -> CdnResult<()> {
        let prefix = &data[..data.len().min(SCAN_PREFIX_LEN)];
        let text = String::from_utf8_lossy(prefix);

        for pattern in &self.patterns {
            if pattern.is_match(&text) {
                return Err(CdnError::MaliciousContent {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        let lowered = filename.to_lowercase();
        for (signature, name) in DANGEROUS_SIGNATURES {
            if data.starts_with(signature) {
                let exempt = SIGNATURE_EXEMPT_EXTENSIONS
                    .iter()
                    .any(|ext| lowered.ends_with(ext));
                if !exempt {
                    return Err(CdnError::ExecutableSignature {
                        magic: (*name).to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
