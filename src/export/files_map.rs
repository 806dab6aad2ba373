//! `files_map.json` recorder.
//!
//! Entries are keyed by attachment id. A successful entry is never replaced;
//! a failed one may be replaced by a later attempt. New entries are
//! appended in the order they are recorded.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::files_map::FilesMapEntry;

use super::write;

pub const FILES_MAP_FILE: &str = "files_map.json";

/// What [`FilesMap::record`] did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Added,
    /// A failed entry was replaced.
    Replaced,
    /// A successful entry already existed and was kept.
    Kept,
}

/// The files map of one message directory.
#[derive(Debug)]
pub struct FilesMap {
    path: PathBuf,
    entries: Vec<FilesMapEntry>,
    dirty: bool,
}

impl FilesMap {
    /// Load the existing map of `message_dir`, or start an empty one.
    ///
    /// An unreadable map is logged and replaced on the next save.
    pub fn open(message_dir: &Path) -> Self {
        let path = message_dir.join(FILES_MAP_FILE);
        let (entries, dirty) = if path.exists() {
            match write::read_json::<Vec<FilesMapEntry>>(&path) {
                Ok(entries) => (entries, false),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable files map");
                    (Vec::new(), true)
                }
            }
        } else {
            (Vec::new(), true)
        };
        Self {
            path,
            entries,
            dirty,
        }
    }

    pub fn entries(&self) -> &[FilesMapEntry] {
        &self.entries
    }

    pub fn get(&self, attachment_id: &str) -> Option<&FilesMapEntry> {
        self.entries.iter().find(|e| e.attachment_id == attachment_id)
    }

    /// Record an entry, applying the merge rule.
    pub fn record(&mut self, entry: FilesMapEntry) -> RecordOutcome {
        match self
            .entries
            .iter_mut()
            .find(|e| e.attachment_id == entry.attachment_id)
        {
            Some(existing) if !existing.is_failed() => {
                if entry.is_failed() {
                    debug!(
                        attachment_id = %entry.attachment_id,
                        "Keeping earlier successful entry"
                    );
                }
                RecordOutcome::Kept
            }
            Some(existing) => {
                if *existing != entry {
                    *existing = entry;
                    self.dirty = true;
                }
                RecordOutcome::Replaced
            }
            None => {
                self.entries.push(entry);
                self.dirty = true;
                RecordOutcome::Added
            }
        }
    }

    /// Write the map if it changed or does not exist yet.
    pub fn save(&mut self) -> Result<()> {
        if self.dirty {
            write::write_json(&self.path, &self.entries)?;
            self.dirty = false;
        }
        Ok(())
    }
}
