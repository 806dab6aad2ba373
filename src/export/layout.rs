//! Cache directory skeleton.
//!
//! ```text
//! <root>/caches/<folder>/<conversation>/<message>/
//! ├── message.json
//! ├── body.html | body.txt
//! ├── uniqueBody.html | uniqueBody.txt
//! ├── attachments.json
//! ├── attachment_shortcodes.json
//! ├── files_map.json
//! ├── attachments/
//! │   ├── files/<shortcode><name>
//! │   ├── links/<shortcode>.json
//! │   └── items/<shortcode>/        same skeleton, recursively
//! └── inline/<shortcode><name>
//! ```

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{MirrorError, Result};

pub const CACHES_DIR: &str = "caches";
pub const ATTACHMENTS_DIR: &str = "attachments";
pub const FILES_DIR: &str = "files";
pub const LINKS_DIR: &str = "links";
pub const ITEMS_DIR: &str = "items";
pub const INLINE_DIR: &str = "inline";

/// Fixed subdirectories of every message directory, relative to it.
pub const MESSAGE_SUBDIRS: [&str; 4] = [
    "attachments/files",
    "attachments/links",
    "attachments/items",
    "inline",
];

/// The cache tree under a root directory.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    caches: PathBuf,
}

impl CacheLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            caches: root.join(CACHES_DIR),
        }
    }

    pub fn caches_dir(&self) -> &Path {
        &self.caches
    }

    /// Directory of a message, without touching the filesystem.
    pub fn message_dir(&self, folder: &str, conversation: &str, message: &str) -> PathBuf {
        self.caches.join(folder).join(conversation).join(message)
    }

    /// Create the directory chain and fixed subdirectories of a message.
    ///
    /// Idempotent; never removes or truncates anything.
    pub fn ensure_skeleton(&self, folder: &str, conversation: &str, message: &str) -> Result<PathBuf> {
        let dir = self.message_dir(folder, conversation, message);
        ensure_message_dirs(&dir)?;
        Ok(dir)
    }

    /// Remove the whole cache tree.
    pub fn reset(&self) -> Result<()> {
        if self.caches.exists() {
            std::fs::remove_dir_all(&self.caches).map_err(|e| MirrorError::io(&self.caches, e))?;
            info!(path = %self.caches.display(), "Cleared caches");
        }
        Ok(())
    }
}

/// Create `dir` and its fixed subdirectories if absent.
pub fn ensure_message_dirs(dir: &Path) -> Result<()> {
    for sub in MESSAGE_SUBDIRS {
        let path = dir.join(sub);
        std::fs::create_dir_all(&path).map_err(|e| MirrorError::io(&path, e))?;
    }
    Ok(())
}

/// Slash-separated path relative to a message directory, as recorded in
/// `files_map.json` and written into rewritten HTML.
pub fn relative(parts: &[&str]) -> String {
    parts.join("/")
}
