//! Prebuilt mailbox index: reading it and assigning shortcodes over it.

pub mod builder;
pub mod format;
pub mod reader;

use std::path::{Path, PathBuf};

/// Locations of index files under a root directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    dir: PathBuf,
}

impl IndexPaths {
    /// Paths for the index under `<root>/index`.
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("index"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn folders_file(&self) -> PathBuf {
        self.dir.join("folders.json")
    }

    pub fn conversations_file(&self, folder_shortcode: &str) -> PathBuf {
        self.dir
            .join("conversations-organized")
            .join(format!("{folder_shortcode}.json"))
    }

    /// Pre-shortcode filename, keyed by the raw folder id.
    pub fn legacy_conversations_file(&self, folder_id: &str) -> PathBuf {
        self.dir
            .join("conversations-organized")
            .join(format!("{folder_id}.json"))
    }

    pub fn folder_shortcodes_file(&self) -> PathBuf {
        self.dir.join("shortcodes").join("folders.json")
    }

    pub fn conversation_shortcodes_file(&self, folder_shortcode: &str) -> PathBuf {
        self.dir
            .join("shortcodes")
            .join("conversations")
            .join(format!("{folder_shortcode}.json"))
    }
}
