//! `files_map.json` entries.

use serde::{Deserialize, Serialize};

use super::attachment::AttachmentType;

/// One record per stored (or intentionally not stored) attachment.
///
/// `relative_path` is relative to the message directory. It is `null` for
/// reference attachments, which never have a local file, and for
/// attachments whose download failed (those also carry `error`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesMapEntry {
    pub attachment_id: String,
    pub attachment_shortcode: String,
    pub attachment_type: AttachmentType,
    pub is_inline: bool,
    pub original_name: Option<String>,
    pub sanitized_name: String,
    pub relative_path: Option<String>,
    /// Metadata JSON of a reference attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_path: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub content_id: Option<String>,
    pub content_location: Option<String>,
    /// Hex SHA-256 of the stored bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Why this attachment could not be exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FilesMapEntry {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// An inline file that was stored and can be referenced from HTML.
    pub fn is_rewritable_inline(&self) -> bool {
        self.is_inline
            && !self.is_failed()
            && self.attachment_type == AttachmentType::FileAttachment
            && self.relative_path.is_some()
            && (self.content_id.is_some() || self.content_location.is_some())
    }
}
