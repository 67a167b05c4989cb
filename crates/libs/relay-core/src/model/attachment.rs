//! Attachment ingestion.
//!
//! Senders supply filesystem paths; each becomes a tagged entry on the
//! message. Small payloads inline as data URIs, larger ones land
//! content-addressed under `attachments/<sha[:2]>/<sha>.<ext>` in the
//! project archive and are deduplicated by hash across messages.
//! Unreadable paths degrade to `missing` entries unless the settings
//! demand a hard failure.

use crate::Result;
use crate::model::ModelManager;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A stable-ordered, tagged attachment entry as stored on the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Inline {
        media_type: String,
        bytes: u64,
        sha256: String,
        data_uri: String,
    },
    File {
        media_type: String,
        bytes: u64,
        sha256: String,
        /// Project-relative archive path (`attachments/ab/abcd....png`).
        path: String,
    },
    Missing {
        original_path: String,
        reason: String,
    },
}

/// A content-addressed file that must be written into the archive as
/// part of the send commit (only when not already present by hash).
#[derive(Debug, Clone)]
pub struct PendingArchiveFile {
    /// Path relative to the archive root.
    pub rel_path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Result of ingesting a sender's attachment path list.
#[derive(Debug, Default)]
pub struct IngestedAttachments {
    pub entries: Vec<Attachment>,
    pub pending_files: Vec<PendingArchiveFile>,
}

pub struct AttachmentBmc;

impl AttachmentBmc {
    /// Ingest attachment paths for a send into `project_slug`.
    ///
    /// Ordering of `entries` follows the input paths.
    pub fn ingest_paths(
        mm: &ModelManager,
        project_slug: &str,
        attachment_paths: &[String],
        convert_images: bool,
    ) -> Result<IngestedAttachments> {
        let settings = &mm.settings.storage;
        let mut out = IngestedAttachments::default();

        for original_path in attachment_paths {
            let raw = match std::fs::read(original_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    if settings.allow_missing_attachments {
                        out.entries.push(Attachment::Missing {
                            original_path: original_path.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                    return Err(crate::Error::InvalidInput(format!(
                        "attachment path unreadable: {} ({})",
                        original_path, e
                    )));
                }
            };

            let ext = Path::new(original_path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            let mut media_type = media_type_for_ext(&ext).to_string();
            let mut bytes = raw;
            let mut final_ext = ext.clone();

            let should_convert = convert_images
                && settings.convert_images
                && is_convertible_image(&media_type)
                && media_type != "image/webp";
            if should_convert {
                match convert_to_webp(&bytes) {
                    Ok(webp) => {
                        if settings.keep_original_images {
                            // Keep the original alongside the converted copy.
                            let (entry, pending) = classify(
                                settings.inline_image_max_bytes,
                                project_slug,
                                &media_type,
                                &ext,
                                bytes.clone(),
                            );
                            out.entries.push(entry);
                            if let Some(p) = pending {
                                out.pending_files.push(p);
                            }
                        }
                        bytes = webp;
                        media_type = "image/webp".to_string();
                        final_ext = "webp".to_string();
                    }
                    Err(e) => {
                        debug!(path = %original_path, error = %e, "image conversion failed, keeping original");
                    }
                }
            }

            let (entry, pending) = classify(
                settings.inline_image_max_bytes,
                project_slug,
                &media_type,
                &final_ext,
                bytes,
            );
            out.entries.push(entry);
            if let Some(p) = pending {
                out.pending_files.push(p);
            }
        }

        Ok(out)
    }

    /// Filter out pending files whose content-addressed target already
    /// exists in the archive working tree (dedupe by sha256).
    pub fn dedupe_existing(
        storage_root: &Path,
        pending: Vec<PendingArchiveFile>,
    ) -> Vec<PendingArchiveFile> {
        pending
            .into_iter()
            .filter(|p| !storage_root.join(&p.rel_path).exists())
            .collect()
    }
}

/// Inline-vs-file split. The threshold is inclusive: a payload of
/// exactly `inline_max` bytes inlines.
fn classify(
    inline_max: u64,
    project_slug: &str,
    media_type: &str,
    ext: &str,
    bytes: Vec<u8>,
) -> (Attachment, Option<PendingArchiveFile>) {
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let size = bytes.len() as u64;

    if size <= inline_max {
        let data_uri = format!(
            "data:{};base64,{}",
            media_type,
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );
        (
            Attachment::Inline {
                media_type: media_type.to_string(),
                bytes: size,
                sha256,
                data_uri,
            },
            None,
        )
    } else {
        let file_name = if ext.is_empty() {
            format!("{}.bin", sha256)
        } else {
            format!("{}.{}", sha256, ext)
        };
        let project_rel = format!("attachments/{}/{}", &sha256[..2], file_name);
        let archive_rel = PathBuf::from("projects").join(project_slug).join(&project_rel);
        (
            Attachment::File {
                media_type: media_type.to_string(),
                bytes: size,
                sha256,
                path: project_rel,
            },
            Some(PendingArchiveFile {
                rel_path: archive_rel,
                bytes,
            }),
        )
    }
}

fn media_type_for_ext(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn is_convertible_image(media_type: &str) -> bool {
    matches!(
        media_type,
        "image/jpeg" | "image/png" | "image/gif" | "image/bmp"
    )
}

fn convert_to_webp(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| crate::Error::InvalidInput(format!("image decode failed: {}", e)))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut out = Vec::new();
    let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut out);
    encoder
        .encode(rgba.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| crate::Error::InvalidInput(format!("webp encode failed: {}", e)))?;
    Ok(out)
}
