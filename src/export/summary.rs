//! Run summary built from the cache alone, without network calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{MirrorError, Result};
use crate::index::builder::{load_folder_scope, FolderScopeMaps};
use crate::index::IndexPaths;
use crate::model::attachment::AttachmentType;
use crate::model::files_map::FilesMapEntry;
use crate::shortcode::ShortcodeMap;

use super::attachment::ATTACHMENT_SHORTCODES_FILE;
use super::files_map::FILES_MAP_FILE;
use super::layout::{ATTACHMENTS_DIR, ITEMS_DIR};
use super::message::{ErrorMarker, ERROR_MARKER_FILE, MESSAGE_FILE};
use super::write;

/// A message directory holding an error marker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMessageRecord {
    /// Message directory, relative to the caches root.
    pub path: PathBuf,
    #[serde(flatten)]
    pub marker: ErrorMarker,
}

/// A files-map entry carrying an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAttachmentRecord {
    /// Message directory, relative to the caches root.
    pub path: PathBuf,
    pub attachment_id: String,
    pub original_name: Option<String>,
    pub error: String,
}

/// Totals and failures found under `caches/`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Top-level messages with a `message.json`.
    pub messages: usize,
    /// Messages exported from item attachments.
    pub nested_messages: usize,
    pub stored_files: usize,
    pub stored_bytes: u64,
    pub links: usize,
    pub items: usize,
    pub failed_messages: Vec<FailedMessageRecord>,
    pub failed_attachments: Vec<FailedAttachmentRecord>,
    /// Artifacts that could not be parsed.
    pub unreadable: Vec<PathBuf>,
    /// Directories named by shortcodes that a wider scope superseded. They
    /// are not counted.
    pub retired_dirs: Vec<PathBuf>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed_messages.is_empty() || !self.failed_attachments.is_empty()
    }
}

/// Walk `caches_dir` and summarize what a run left behind.
///
/// A missing directory yields an empty summary.
pub fn summarize(caches_dir: &Path) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    if !caches_dir.exists() {
        return Ok(summary);
    }

    let mut retired = RetiredCodes::new(caches_dir);
    let mut retired_dirs = Vec::new();
    let walker = WalkDir::new(caches_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() && retired.is_retired(entry.path()) {
                debug!(path = %entry.path().display(), "Skipping retired shortcode directory");
                retired_dirs.push(relative_to(caches_dir, entry.path()));
                return false;
            }
            true
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(caches_dir).to_path_buf();
            MirrorError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let dir = path.parent().unwrap_or(caches_dir);
        let relative_dir = dir.strip_prefix(caches_dir).unwrap_or(dir).to_path_buf();

        match entry.file_name().to_str() {
            Some(MESSAGE_FILE) => {
                if is_nested(&relative_dir) {
                    summary.nested_messages += 1;
                } else {
                    summary.messages += 1;
                }
            }
            Some(ERROR_MARKER_FILE) => match write::read_json::<ErrorMarker>(path) {
                Ok(marker) => summary.failed_messages.push(FailedMessageRecord {
                    path: relative_dir,
                    marker,
                }),
                Err(e) => unreadable(&mut summary, path, &e),
            },
            Some(FILES_MAP_FILE) => match write::read_json::<Vec<FilesMapEntry>>(path) {
                Ok(entries) => tally(&mut summary, &relative_dir, entries),
                Err(e) => unreadable(&mut summary, path, &e),
            },
            _ => {}
        }
    }
    summary.retired_dirs = retired_dirs;
    Ok(summary)
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(base).unwrap_or(path).to_path_buf()
}

/// Retired shortcodes of every scope, loaded on demand from the persisted
/// maps beside the cache.
struct RetiredCodes<'a> {
    caches_dir: &'a Path,
    paths: Option<IndexPaths>,
    folders: Option<ShortcodeMap>,
    scopes: HashMap<String, Option<FolderScopeMaps>>,
}

impl<'a> RetiredCodes<'a> {
    fn new(caches_dir: &'a Path) -> Self {
        let paths = caches_dir.parent().map(IndexPaths::new);
        let folders = paths
            .as_ref()
            .and_then(|p| loaded_or_warn(ShortcodeMap::load(&p.folder_shortcodes_file())));
        Self {
            caches_dir,
            paths,
            folders,
            scopes: HashMap::new(),
        }
    }

    fn is_retired(&mut self, dir: &Path) -> bool {
        let Ok(relative) = dir.strip_prefix(self.caches_dir) else {
            return false;
        };
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        match parts.as_slice() {
            [folder] => self.folders.as_ref().is_some_and(|m| retired_in(m, folder)),
            [folder, conversation] => self
                .scope(folder)
                .is_some_and(|s| retired_in(&s.conversations, conversation)),
            [folder, conversation, message] => self.scope(folder).is_some_and(|s| {
                s.conversations
                    .resolve(conversation)
                    .and_then(|id| s.messages.get(id))
                    .is_some_and(|m| retired_in(m, message))
            }),
            [.., ATTACHMENTS_DIR, ITEMS_DIR, item] => dir
                .ancestors()
                .nth(3)
                .and_then(|owner| {
                    loaded_or_warn(ShortcodeMap::load(&owner.join(ATTACHMENT_SHORTCODES_FILE)))
                })
                .is_some_and(|m| retired_in(&m, item)),
            _ => false,
        }
    }

    fn scope(&mut self, folder: &str) -> Option<&FolderScopeMaps> {
        let paths = self.paths.as_ref()?;
        self.scopes
            .entry(folder.to_string())
            .or_insert_with(|| loaded_or_warn(load_folder_scope(paths, folder)))
            .as_ref()
    }
}

fn retired_in(map: &ShortcodeMap, code: &str) -> bool {
    map.retired.contains_key(code) && !map.shortcode_to_id.contains_key(code)
}

fn loaded_or_warn<T>(loaded: Result<Option<T>>) -> Option<T> {
    loaded.unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable shortcode map");
        None
    })
}

fn tally(summary: &mut RunSummary, relative_dir: &Path, entries: Vec<FilesMapEntry>) {
    for entry in entries {
        if let Some(error) = entry.error {
            summary.failed_attachments.push(FailedAttachmentRecord {
                path: relative_dir.to_path_buf(),
                attachment_id: entry.attachment_id,
                original_name: entry.original_name,
                error,
            });
            continue;
        }
        match entry.attachment_type {
            AttachmentType::FileAttachment => {
                summary.stored_files += 1;
                summary.stored_bytes += entry.size.unwrap_or(0);
            }
            AttachmentType::ReferenceAttachment => summary.links += 1,
            AttachmentType::ItemAttachment => summary.items += 1,
        }
    }
}

fn unreadable(summary: &mut RunSummary, path: &Path, error: &MirrorError) {
    warn!(path = %path.display(), error = %error, "Unreadable artifact");
    summary.unreadable.push(path.to_path_buf());
}

/// Whether a message directory sits inside an item attachment.
fn is_nested(relative_dir: &Path) -> bool {
    let parts: Vec<_> = relative_dir.components().map(|c| c.as_os_str()).collect();
    parts
        .windows(2)
        .any(|w| w[0] == ATTACHMENTS_DIR && w[1] == ITEMS_DIR)
}
