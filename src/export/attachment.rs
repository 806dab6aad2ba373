//! Attachment export.
//!
//! Every attachment of a message is dispatched on its [`AttachmentVariant`]:
//!
//! | variant    | stored as                                  |
//! |------------|--------------------------------------------|
//! | Reference  | `attachments/links/<sc>.json`              |
//! | File       | `attachments/files/<sc><name>`             |
//! | InlineFile | `inline/<sc><name>`                        |
//! | Item       | `attachments/items/<sc>/` (recursive)      |
//!
//! Failures are recorded on the attachment's files-map entry and never
//! abort the message, unless they are fatal for the whole run.

use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MirrorError, Result};
use crate::model::attachment::{AttachmentMetadata, AttachmentVariant, ItemKind};
use crate::model::files_map::FilesMapEntry;
use crate::model::mail::RemoteMessage;
use crate::remote::RemoteApi;
use crate::shortcode::{self, sha256_hex, ShortcodeMap};

use super::files_map::FilesMap;
use super::layout::{self, ATTACHMENTS_DIR, FILES_DIR, INLINE_DIR, ITEMS_DIR, LINKS_DIR};
use super::sanitize::sanitize_filename;
use super::{write, Exporter};

pub const ATTACHMENTS_FILE: &str = "attachments.json";
pub const ATTACHMENT_SHORTCODES_FILE: &str = "attachment_shortcodes.json";
/// Expanded item-attachment metadata inside an item directory.
pub const ITEM_ATTACHMENT_FILE: &str = "attachment.json";

/// Per-message attachment counts of one export pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentReport {
    pub files: usize,
    pub inline: usize,
    pub links: usize,
    pub items: usize,
    pub failed: usize,
    /// Attachments without an id or of an unknown type.
    pub skipped: usize,
}

impl AttachmentReport {
    fn count(&mut self, variant: AttachmentVariant, entry: &FilesMapEntry) {
        if entry.is_failed() {
            self.failed += 1;
            return;
        }
        match variant {
            AttachmentVariant::File => self.files += 1,
            AttachmentVariant::InlineFile => self.inline += 1,
            AttachmentVariant::Reference => self.links += 1,
            AttachmentVariant::Item => self.items += 1,
        }
    }
}

impl AddAssign for AttachmentReport {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.inline += rhs.inline;
        self.links += rhs.links;
        self.items += rhs.items;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
    }
}

/// One attachment being exported.
struct Target<'p> {
    message_id: Option<&'p str>,
    dir: &'p Path,
    id: &'p str,
    shortcode: &'p str,
    depth: usize,
}

impl<R: RemoteApi + ?Sized> Exporter<'_, R> {
    /// Export the attachments of the message in `dir`.
    ///
    /// `message_id` addresses downloads; nested messages without one can
    /// only store attachments that carry their bytes inline. `depth` is the
    /// nesting level of the owning message and `chain` holds the message
    /// ids currently being exported above it.
    pub(crate) fn export_attachments(
        &self,
        message_id: Option<&str>,
        dir: &Path,
        attachments: Vec<AttachmentMetadata>,
        depth: usize,
        chain: &mut Vec<String>,
    ) -> Result<(FilesMap, AttachmentReport)> {
        let listing: Vec<AttachmentMetadata> = attachments
            .iter()
            .map(AttachmentMetadata::without_payload)
            .collect();
        write::write_json(&dir.join(ATTACHMENTS_FILE), &listing)?;

        let shortcodes = attachment_shortcodes(dir, &attachments)?;
        let mut files_map = FilesMap::open(dir);
        let mut report = AttachmentReport::default();

        for att in &attachments {
            let id = att.id.as_deref().filter(|id| !id.is_empty());
            let (Some(id), Some(variant)) = (id, att.variant()) else {
                warn!(
                    dir = %dir.display(),
                    name = ?att.name,
                    odata_type = ?att.odata_type,
                    "Skipping attachment without id or of unknown type"
                );
                report.skipped += 1;
                continue;
            };
            let Some(shortcode) = shortcodes.shortcode(id) else {
                report.skipped += 1;
                continue;
            };

            let target = Target {
                message_id,
                dir,
                id,
                shortcode,
                depth,
            };
            let entry = match self.export_one(&target, att, variant, &files_map, chain) {
                Ok(entry) => entry,
                Err(e) if e.is_fatal() => {
                    files_map.save()?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(attachment_id = id, error = %e, "Failed to export attachment");
                    let mut entry = base_entry(att, variant, shortcode);
                    entry.error = Some(e.to_string());
                    entry
                }
            };
            report.count(variant, &entry);
            files_map.record(entry);
        }

        files_map.save()?;
        Ok((files_map, report))
    }

    fn export_one(
        &self,
        target: &Target<'_>,
        att: &AttachmentMetadata,
        variant: AttachmentVariant,
        files_map: &FilesMap,
        chain: &mut Vec<String>,
    ) -> Result<FilesMapEntry> {
        match variant {
            AttachmentVariant::Reference => export_reference(target, att),
            AttachmentVariant::File => {
                self.export_file(target, att, variant, &[ATTACHMENTS_DIR, FILES_DIR], files_map)
            }
            AttachmentVariant::InlineFile => {
                self.export_file(target, att, variant, &[INLINE_DIR], files_map)
            }
            AttachmentVariant::Item => self.export_item(target, att, chain),
        }
    }

    fn export_file(
        &self,
        target: &Target<'_>,
        att: &AttachmentMetadata,
        variant: AttachmentVariant,
        location: &[&str],
        files_map: &FilesMap,
    ) -> Result<FilesMapEntry> {
        let mut entry = base_entry(att, variant, target.shortcode);
        let file_name = format!("{}{}", target.shortcode, entry.sanitized_name);
        let mut parts = location.to_vec();
        parts.push(&file_name);
        let relative = layout::relative(&parts);
        let path = join_parts(target.dir, &parts);

        if let Some(existing) = files_map.get(target.id) {
            if !existing.is_failed()
                && existing.relative_path.as_deref() == Some(relative.as_str())
                && path.is_file()
            {
                debug!(attachment_id = target.id, "Attachment already stored");
                return Ok(existing.clone());
            }
        }

        let bytes = self.attachment_bytes(target, att)?;
        write::write_atomic(&path, &bytes)?;

        entry.relative_path = Some(relative);
        entry.size = Some(bytes.len() as u64);
        if self.options.hash_attachments {
            entry.sha256 = Some(sha256_hex(&bytes));
        }
        Ok(entry)
    }

    /// Inline base64 payload when usable, otherwise a download.
    fn attachment_bytes(&self, target: &Target<'_>, att: &AttachmentMetadata) -> Result<Vec<u8>> {
        if let Some(encoded) = att.content_bytes.as_deref().filter(|s| !s.trim().is_empty()) {
            match BASE64.decode(encoded.trim()) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(attachment_id = target.id, error = %e, "Undecodable contentBytes");
                }
            }
        }
        let message_id = target
            .message_id
            .ok_or_else(|| MirrorError::MissingPayload(target.id.to_string()))?;
        Ok(self.remote.download_attachment(message_id, target.id)?)
    }

    fn export_item(
        &self,
        target: &Target<'_>,
        att: &AttachmentMetadata,
        chain: &mut Vec<String>,
    ) -> Result<FilesMapEntry> {
        let parts = [ATTACHMENTS_DIR, ITEMS_DIR, target.shortcode];
        let item_dir = join_parts(target.dir, &parts);
        std::fs::create_dir_all(&item_dir).map_err(|e| MirrorError::io(&item_dir, e))?;

        let mut entry = base_entry(att, AttachmentVariant::Item, target.shortcode);
        entry.relative_path = Some(layout::relative(&parts));
        let mut problems = Vec::new();

        let detail = match target.message_id {
            Some(message_id) => match self.remote.fetch_attachment_item(message_id, target.id) {
                Ok(detail) => detail,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(attachment_id = target.id, error = %e, "Using listed item metadata");
                    problems.push(e.to_string());
                    att.clone()
                }
            },
            None => att.clone(),
        };
        write::write_json(&item_dir.join(ITEM_ATTACHMENT_FILE), &strip_payloads(&detail))?;

        let item = detail
            .item
            .as_ref()
            .or(att.item.as_ref())
            .ok_or_else(|| MirrorError::MissingPayload(target.id.to_string()))?;
        let kind = ItemKind::of(item);
        entry.sanitized_name = sanitize_filename(att.name.as_deref(), kind.content_type());

        match kind {
            ItemKind::Message => {
                let depth = target.depth + 1;
                if depth > self.options.max_item_depth {
                    return Err(MirrorError::NestingTooDeep(self.options.max_item_depth));
                }
                let message = RemoteMessage::from_value(item.clone())
                    .ok_or_else(|| MirrorError::MissingPayload(target.id.to_string()))?;
                if let Some(nested_id) = message.id() {
                    if chain.iter().any(|id| id == nested_id) {
                        return Err(MirrorError::ItemCycle(nested_id.to_string()));
                    }
                }
                self.export_nested_message(&message, &item_dir, depth, chain)?;
            }
            ItemKind::Event => {
                write::write_json(&item_dir.join("event.json"), item)?;
                if let Err(e) = self.store_item_value(kind, item, &item_dir.join("event.ics")) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    problems.push(e.to_string());
                }
            }
            ItemKind::Contact => {
                write::write_json(&item_dir.join("contact.json"), item)?;
                // The vCard is optional; contact.json carries the data.
                if let Err(e) = self.store_item_value(kind, item, &item_dir.join("contact.vcf")) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    debug!(attachment_id = target.id, error = %e, "No vCard for contact");
                }
            }
            ItemKind::Other => {
                write::write_json(&item_dir.join("item.json"), item)?;
            }
        }

        if !problems.is_empty() {
            entry.error = Some(problems.join("; "));
        }
        Ok(entry)
    }

    /// Download the serialized form of an event or contact. Items without
    /// an id have none.
    fn store_item_value(&self, kind: ItemKind, item: &Value, path: &Path) -> Result<()> {
        let Some(item_id) = item.get("id").and_then(Value::as_str) else {
            debug!(kind = kind.as_str(), "Item has no id; skipping serialized copy");
            return Ok(());
        };
        let bytes = self.remote.fetch_item_value(kind, item_id)?;
        write::write_atomic(path, &bytes)
    }
}

/// Allocate the attachment scope of a message against its persisted map.
fn attachment_shortcodes(dir: &Path, attachments: &[AttachmentMetadata]) -> Result<ShortcodeMap> {
    let path = dir.join(ATTACHMENT_SHORTCODES_FILE);
    let prior = ShortcodeMap::load(&path)?;
    let map = shortcode::allocate(
        &format!("attachments of {}", dir.display()),
        attachments.iter().filter_map(|a| a.id.as_deref()),
        prior.as_ref(),
    )?;
    if prior.as_ref() != Some(&map) {
        map.save(&path)?;
    }
    Ok(map)
}

fn export_reference(target: &Target<'_>, att: &AttachmentMetadata) -> Result<FilesMapEntry> {
    let file_name = format!("{}.json", target.shortcode);
    let parts = [ATTACHMENTS_DIR, LINKS_DIR, file_name.as_str()];
    write::write_json(&join_parts(target.dir, &parts), &att.without_payload())?;

    let mut entry = base_entry(att, AttachmentVariant::Reference, target.shortcode);
    entry.link_path = Some(layout::relative(&parts));
    Ok(entry)
}

/// Entry fields known before anything is stored.
fn base_entry(att: &AttachmentMetadata, variant: AttachmentVariant, shortcode: &str) -> FilesMapEntry {
    FilesMapEntry {
        attachment_id: att.id.clone().unwrap_or_default(),
        attachment_shortcode: shortcode.to_string(),
        attachment_type: variant.attachment_type(),
        is_inline: att.inline(),
        original_name: att.name.clone(),
        sanitized_name: sanitize_filename(att.name.as_deref(), att.content_type.as_deref()),
        relative_path: None,
        link_path: None,
        content_type: att.content_type.clone(),
        size: att.size,
        content_id: att.normalized_content_id(),
        content_location: att.content_location.clone(),
        sha256: None,
        error: None,
    }
}

/// Metadata copy without base64 payloads, including those of attachments
/// embedded in a nested message.
fn strip_payloads(att: &AttachmentMetadata) -> AttachmentMetadata {
    let mut stripped = att.without_payload();
    if let Some(Value::Array(list)) = stripped
        .item
        .as_mut()
        .and_then(|item| item.get_mut("attachments"))
    {
        for nested in list.iter_mut().filter_map(Value::as_object_mut) {
            nested.remove("contentBytes");
        }
    }
    stripped
}

fn join_parts(dir: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(dir.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> AttachmentMetadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_base_entry_fields() {
        let att = parse(json!({
            "id": "att-1",
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": "Logo Image.PNG",
            "contentType": "image/png",
            "size": 1234,
            "isInline": true,
            "contentId": "<logo@x>",
            "contentBytes": "aGk="
        }));
        let entry = base_entry(&att, AttachmentVariant::InlineFile, "__abcdef12__");
        assert_eq!(entry.sanitized_name, "logo_image.png");
        assert_eq!(entry.content_id.as_deref(), Some("logo@x"));
        assert!(entry.is_inline);
        assert!(entry.relative_path.is_none());
    }

    #[test]
    fn test_strip_payloads_nested() {
        let att = parse(json!({
            "id": "att-2",
            "@odata.type": "#microsoft.graph.itemAttachment",
            "contentBytes": "aGk=",
            "item": {
                "@odata.type": "#microsoft.graph.message",
                "attachments": [{ "id": "n1", "contentBytes": "aGk=" }]
            }
        }));
        let stripped = strip_payloads(&att);
        assert!(stripped.content_bytes.is_none());
        let item = stripped.item.unwrap();
        let nested = &item["attachments"][0];
        assert!(nested.get("contentBytes").is_none());
        assert_eq!(nested["id"], json!("n1"));
    }

    #[test]
    fn test_report_counts() {
        let att = parse(json!({ "id": "a", "@odata.type": "#microsoft.graph.fileAttachment" }));
        let mut report = AttachmentReport::default();
        let ok = base_entry(&att, AttachmentVariant::File, "__a__");
        let mut failed = ok.clone();
        failed.error = Some("boom".into());
        report.count(AttachmentVariant::File, &ok);
        report.count(AttachmentVariant::File, &failed);
        assert_eq!(report.files, 1);
        assert_eq!(report.failed, 1);

        let mut total = AttachmentReport::default();
        total += report;
        total += report;
        assert_eq!(total.files, 2);
    }
}
