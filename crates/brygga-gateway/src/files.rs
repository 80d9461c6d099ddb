// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Attachment persistence.
//!
//! Chat-completion requests may carry inline file content (data-URL images,
//! base64 `file_data` parts).  Each one is written into the workspace's
//! `uploads/` directory so the child can read it from disk; the resulting
//! absolute paths travel in the normalized request.
//!
//! A bad attachment never fails the request — it is logged and skipped,
//! because the prompt itself is still actionable without it.

use std::path::{Path, PathBuf};

use base64::Engine;
use tracing::{debug, warn};
use uuid::Uuid;

/// Subdirectory of the workspace that receives uploads.
const UPLOADS_DIR: &str = "uploads";

/// One attachment extracted from the request, not yet on disk.
#[derive(Debug, Clone)]
pub enum Attachment {
    /// An `image_url` part: either a `data:` URL (persisted) or a remote
    /// URL (skipped — the gateway does not fetch).
    Url(String),
    /// A `file` part carrying inline base64 content.
    Data {
        data: String,
        filename: Option<String>,
    },
    /// A `file` part referencing server-side storage by id; brygga has no
    /// file store, so these are skipped.
    Reference(String),
}

/// Write every persistable attachment into `<workspace>/uploads/`.
///
/// Returns the absolute paths of the files actually written.
pub async fn persist_attachments(workspace: &Path, attachments: &[Attachment]) -> Vec<PathBuf> {
    if attachments.is_empty() {
        return Vec::new();
    }
    let dir = workspace.join(UPLOADS_DIR);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!(dir = %dir.display(), error = %e, "cannot create uploads dir, skipping attachments");
        return Vec::new();
    }

    let mut paths = Vec::new();
    for attachment in attachments {
        match attachment {
            Attachment::Url(url) => {
                if let Some((ext, bytes)) = decode_data_url(url) {
                    if let Some(path) = write_upload(&dir, &ext, bytes).await {
                        paths.push(path);
                    }
                } else if url.starts_with("http://") || url.starts_with("https://") {
                    warn!(url, "remote attachment URLs are not fetched, skipping");
                } else {
                    warn!("unrecognized image_url attachment, skipping");
                }
            }
            Attachment::Data { data, filename } => {
                let payload = data
                    .split_once("base64,")
                    .map(|(_, p)| p)
                    .unwrap_or(data.as_str());
                match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
                    Ok(bytes) => {
                        let ext = filename
                            .as_deref()
                            .and_then(extension_of)
                            .unwrap_or_else(|| "bin".to_string());
                        if let Some(path) = write_upload(&dir, &ext, bytes).await {
                            paths.push(path);
                        }
                    }
                    Err(e) => warn!(error = %e, "invalid base64 file_data, skipping"),
                }
            }
            Attachment::Reference(id) => {
                warn!(file_id = %id, "file_id references are not supported, skipping");
            }
        }
    }
    paths
}

async fn write_upload(dir: &Path, ext: &str, bytes: Vec<u8>) -> Option<PathBuf> {
    let path = dir.join(format!("{}.{ext}", Uuid::new_v4()));
    match tokio::fs::write(&path, &bytes).await {
        Ok(()) => {
            debug!(path = %path.display(), size = bytes.len(), "attachment persisted");
            // Workspace dirs are created resolved, so join() is absolute
            // already; canonicalize defends against a relative base.
            Some(path.canonicalize().unwrap_or(path))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "writing attachment failed, skipping");
            None
        }
    }
}

/// Decode `data:<mime>;base64,<payload>` into (extension, bytes).
fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    let mime = meta.trim_end_matches(";base64");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some((extension_for_mime(mime), bytes))
}

fn extension_for_mime(mime: &str) -> String {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "text/plain" => "txt",
        "application/pdf" => "pdf",
        "application/json" => "json",
        _ => "bin",
    }
    .to_string()
}

/// Sanitized extension from a client-supplied filename.
fn extension_of(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    let clean: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_ascii_lowercase())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // "ABC" in base64.
    const ABC: &str = "QUJD";

    #[tokio::test]
    async fn data_url_image_is_persisted_with_mime_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let atts = vec![Attachment::Url(format!("data:image/png;base64,{ABC}"))];
        let paths = persist_attachments(tmp.path(), &atts).await;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].extension().unwrap(), "png");
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"ABC");
        assert!(paths[0].starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[tokio::test]
    async fn file_data_uses_filename_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let atts = vec![Attachment::Data {
            data: ABC.into(),
            filename: Some("notes.TXT".into()),
        }];
        let paths = persist_attachments(tmp.path(), &atts).await;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].extension().unwrap(), "txt");
    }

    #[tokio::test]
    async fn remote_urls_and_references_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let atts = vec![
            Attachment::Url("https://example.com/cat.png".into()),
            Attachment::Reference("file-abc123".into()),
        ];
        let paths = persist_attachments(tmp.path(), &atts).await;
        assert!(paths.is_empty());
    }

    #[tokio::test]
    async fn invalid_base64_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let atts = vec![
            Attachment::Data {
                data: "!!!not-base64!!!".into(),
                filename: None,
            },
            Attachment::Url(format!("data:image/png;base64,{ABC}")),
        ];
        let paths = persist_attachments(tmp.path(), &atts).await;
        assert_eq!(paths.len(), 1, "good attachment still persisted");
    }

    #[test]
    fn decode_data_url_variants() {
        assert!(decode_data_url("data:image/png;base64,QUJD").is_some());
        assert!(decode_data_url("data:image/png,plain").is_none());
        assert!(decode_data_url("https://example.com/x.png").is_none());
    }

    #[test]
    fn extension_sanitization() {
        assert_eq!(extension_of("a.png"), Some("png".into()));
        assert_eq!(extension_of("evil.p/n#g"), None);
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("UPPER.JPG"), Some("jpg".into()));
    }

    #[test]
    fn mime_mapping_defaults_to_bin() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("application/x-custom"), "bin");
    }
}
