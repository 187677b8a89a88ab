//! Input resolution: normalise a user-supplied path or URL to named PDF bytes.
//!
//! The rasteriser loads from a byte slice, so a download never touches the
//! file system. The `%PDF` magic bytes are validated here so callers get a
//! meaningful error rather than a pdfium load failure.

use crate::error::AnalysisError;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

/// A resolved input: display name plus raw PDF bytes.
#[derive(Clone)]
pub struct ResolvedInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ResolvedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedInput")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Last `/`-separated segment of a storage key or URL path.
///
/// Falls back to the whole key when it ends with a separator.
pub fn file_name_from_key(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}

/// Resolve the input string to PDF bytes.
///
/// URLs are downloaded with a timeout; local paths are read and validated.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, AnalysisError> {
    let resolved = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(AnalysisError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };
    check_magic(&resolved.name, &resolved.bytes)?;
    Ok(resolved)
}

/// Reject bytes that do not start with `%PDF`.
pub fn check_magic(name: &str, bytes: &[u8]) -> Result<(), AnalysisError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(AnalysisError::NotAPdf {
            name: name.to_string(),
            magic,
        });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<ResolvedInput, AnalysisError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => AnalysisError::PermissionDenied { path: path.clone() },
        _ => AnalysisError::FileNotFound { path: path.clone() },
    })?;

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput {
        name: file_name_from_key(path_str),
        bytes,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, AnalysisError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AnalysisError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            AnalysisError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            AnalysisError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(AnalysisError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AnalysisError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(ResolvedInput {
        name: name_from_url(url),
        bytes: bytes.to_vec(),
    })
}

fn name_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn file_name_from_keys() {
        assert_eq!(file_name_from_key("uploads/u1/deed.pdf"), "deed.pdf");
        assert_eq!(file_name_from_key("deed.pdf"), "deed.pdf");
        assert_eq!(file_name_from_key("uploads/u1/bundle/"), "bundle");
        assert_eq!(file_name_from_key("C:\\docs\\lease.pdf"), "lease.pdf");
    }

    #[test]
    fn url_names() {
        assert_eq!(name_from_url("https://x.test/a/deed.pdf"), "deed.pdf");
        assert_eq!(name_from_url("https://x.test/a/"), "downloaded.pdf");
    }

    #[test]
    fn magic_check() {
        assert!(check_magic("a.pdf", b"%PDF-1.7").is_ok());
        let err = check_magic("a.pdf", b"PK").unwrap_err();
        assert!(matches!(err, AnalysisError::NotAPdf { magic, .. } if magic == [b'P', b'K', 0, 0]));
    }

    #[tokio::test]
    async fn local_file_resolves() {
        let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        f.write_all(b"%PDF-1.4\n%%EOF").unwrap();
        let path = f.path().to_string_lossy().to_string();
        let r = resolve_input(&path, 5).await.unwrap();
        assert!(r.name.ends_with(".pdf"));
        assert_eq!(&r.bytes[..4], b"%PDF");
    }

    #[tokio::test]
    async fn missing_file() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn not_a_pdf() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        let err = resolve_input(&f.path().to_string_lossy(), 5).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotAPdf { .. }));
    }
}
