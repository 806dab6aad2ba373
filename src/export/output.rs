//! Human-readable output tree built from the cache.
//!
//! ```text
//! <out>/
//! ├── archive.json
//! └── <folder sc>__<name>/
//!     ├── folder_index.json
//!     ├── <child folder sc>__<name>/ ...
//!     └── __01__<conversation sc>__<date>__<subject>/
//!         ├── conversation_index.json
//!         └── __01__<message sc>__<date>__<subject>/
//!             ├── message_index.json
//!             └── (copy of the message cache directory)
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{json, Value};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{MirrorError, Result};
use crate::index::builder::{assign_folder_scope, assign_folder_shortcodes};
use crate::index::format::Conversation;
use crate::index::reader::{folders_in_order, load_conversations, load_folders, FolderRef};
use crate::index::IndexPaths;
use crate::shortcode::ShortcodeMap;

use super::layout::{CacheLayout, CACHES_DIR};
use super::write;

/// Characters that cannot appear in a path segment on common filesystems.
const UNSAFE: &AsciiSet = &CONTROLS
    .add(b'<')
    .add(b'>')
    .add(b':')
    .add(b'"')
    .add(b'/')
    .add(b'\\')
    .add(b'|')
    .add(b'?')
    .add(b'*');

const WINDOWS_RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

const INVALID_NAME: &str = "INVALID_FILENAME";
const NO_SUBJECT: &str = "no_subject";
const DATE_LABEL: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    /// Subject characters kept in directory names.
    pub subject_chars: usize,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { subject_chars: 36 }
    }
}

/// What [`build_output`] produced.
#[derive(Debug, Clone, Default)]
pub struct OutputReport {
    pub folders: usize,
    pub conversations: usize,
    pub messages: usize,
    /// Ids of indexed messages that have no cache directory.
    pub missing: Vec<String>,
}

/// Build the output tree for the cache under `root` into `out_dir`.
pub fn build_output(root: &Path, out_dir: &Path, options: &OutputOptions) -> Result<OutputReport> {
    let paths = IndexPaths::new(root);
    let layout = CacheLayout::new(root);
    if !layout.caches_dir().is_dir() {
        return Err(MirrorError::io(
            layout.caches_dir(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "nothing downloaded yet"),
        ));
    }

    let forest = load_folders(&paths)?;
    let folder_codes = assign_folder_shortcodes(&paths, &forest)?;
    std::fs::create_dir_all(out_dir).map_err(|e| MirrorError::io(out_dir, e))?;
    write::write_json(
        &out_dir.join("archive.json"),
        &json!({
            "generatedAtUtc": Utc::now().to_rfc3339(),
            "folders": forest,
            "folderShortcodes": folder_codes,
        }),
    )?;

    let mut report = OutputReport::default();
    for folder in folders_in_order(&forest) {
        let Some(folder_dir) = folder_output_dir(out_dir, &folder, &folder_codes) else {
            continue;
        };
        let Some(folder_code) = folder_codes.shortcode(&folder.node.id) else {
            continue;
        };
        let builder = FolderOutput {
            paths: &paths,
            layout: &layout,
            out_dir,
            options,
            folder: &folder,
            folder_code,
            folder_dir,
        };
        builder.build(&mut report)?;
        report.folders += 1;
    }

    info!(
        folders = report.folders,
        messages = report.messages,
        missing = report.missing.len(),
        "Output tree written"
    );
    Ok(report)
}

struct FolderOutput<'a> {
    paths: &'a IndexPaths,
    layout: &'a CacheLayout,
    out_dir: &'a Path,
    options: &'a OutputOptions,
    folder: &'a FolderRef<'a>,
    folder_code: &'a str,
    folder_dir: PathBuf,
}

impl FolderOutput<'_> {
    fn build(&self, report: &mut OutputReport) -> Result<()> {
        let folder_id = self.folder.node.id.as_str();
        let index = load_conversations(self.paths, folder_id, self.folder_code)?;
        let scopes = assign_folder_scope(self.paths, folder_id, self.folder_code, &index)?;
        std::fs::create_dir_all(&self.folder_dir).map_err(|e| MirrorError::io(&self.folder_dir, e))?;

        let conversations: Vec<Value> = index
            .conversations
            .iter()
            .map(|c| {
                let id = c.conversation_id.as_deref();
                json!({
                    "conversationId": id,
                    "conversationShortcode": id.and_then(|id| scopes.conversation_shortcode(id)),
                    "messageShortcodes": id.and_then(|id| scopes.messages.get(id)),
                    "messages": c.messages,
                })
            })
            .collect();
        write::write_json(
            &self.folder_dir.join("folder_index.json"),
            &json!({
                "folderId": folder_id,
                "folderShortcode": self.folder_code,
                "name": self.folder.node.name,
                "displayPath": self.folder.display_path,
                "outputFolder": self.relative_out(&self.folder_dir),
                "cacheFolder": format!("{CACHES_DIR}/{}", self.folder_code),
                "conversationShortcodes": scopes.conversations,
                "conversations": conversations,
            }),
        )?;

        let total = index.conversations.len();
        for (position, conversation) in index.conversations.iter().enumerate() {
            let Some(conversation_id) = conversation.conversation_id.as_deref() else {
                continue;
            };
            let Some(conversation_code) = scopes.conversation_shortcode(conversation_id) else {
                continue;
            };
            let messages = scopes.messages.get(conversation_id);
            self.build_conversation(
                report,
                conversation,
                conversation_id,
                conversation_code,
                messages,
                order_prefix(position + 1, total),
            )?;
            report.conversations += 1;
        }
        Ok(())
    }

    fn build_conversation(
        &self,
        report: &mut OutputReport,
        conversation: &Conversation,
        conversation_id: &str,
        conversation_code: &str,
        message_codes: Option<&ShortcodeMap>,
        prefix: String,
    ) -> Result<()> {
        let first = conversation.messages.first().cloned().unwrap_or_default();
        let date = first.timestamp();
        let dir = self.folder_dir.join(format!(
            "{prefix}{conversation_code}__{}__{}",
            date.format(DATE_LABEL),
            self.subject_label(first.subject.as_deref())
        ));
        std::fs::create_dir_all(&dir).map_err(|e| MirrorError::io(&dir, e))?;

        let mut message_entries = Vec::new();
        let total = conversation.messages.len();
        for (position, summary) in conversation.messages.iter().enumerate() {
            let Some(message_id) = summary.id.as_deref() else {
                continue;
            };
            let Some(message_code) = message_codes.and_then(|m| m.shortcode(message_id)) else {
                continue;
            };
            let cache_dir = self
                .layout
                .message_dir(self.folder_code, conversation_code, message_code);
            if !cache_dir.is_dir() {
                warn!(message_id = message_id, shortcode = message_code, "Missing cache for message");
                report.missing.push(message_id.to_string());
                continue;
            }

            let message_dir = dir.join(format!(
                "{}{message_code}__{}__{}",
                order_prefix(position + 1, total),
                summary.timestamp().format(DATE_LABEL),
                self.subject_label(summary.subject.as_deref())
            ));
            copy_tree(&cache_dir, &message_dir)?;

            let entry = json!({
                "folderId": self.folder.node.id,
                "folderShortcode": self.folder_code,
                "conversationId": conversation_id,
                "conversationShortcode": conversation_code,
                "messageId": message_id,
                "messageShortcode": message_code,
                "receivedDateTime": summary.received_date_time,
                "sentDateTime": summary.sent_date_time,
                "subject": summary.subject,
                "outputFolder": self.relative_out(&message_dir),
                "cacheFolder": format!(
                    "{CACHES_DIR}/{}/{conversation_code}/{message_code}",
                    self.folder_code
                ),
            });
            write::write_json(&message_dir.join("message_index.json"), &entry)?;
            set_dir_time(&message_dir, summary.timestamp());
            message_entries.push(entry);
            report.messages += 1;
        }

        write::write_json(
            &dir.join("conversation_index.json"),
            &json!({
                "folderId": self.folder.node.id,
                "folderShortcode": self.folder_code,
                "conversationId": conversation_id,
                "conversationShortcode": conversation_code,
                "conversationDateUtc": date.to_rfc3339(),
                "conversationSubject": first.subject,
                "messageShortcodes": message_codes,
                "outputFolder": self.relative_out(&dir),
                "cacheFolder": format!("{CACHES_DIR}/{}/{conversation_code}", self.folder_code),
                "messages": message_entries,
            }),
        )?;
        set_dir_time(&dir, date);
        Ok(())
    }

    fn subject_label(&self, subject: Option<&str>) -> String {
        let subject = subject.filter(|s| !s.trim().is_empty()).unwrap_or(NO_SUBJECT);
        truncate_subject(&safe_name(subject), self.options.subject_chars)
    }

    fn relative_out(&self, path: &Path) -> String {
        path.strip_prefix(self.out_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

/// Output directory of a folder: the segments of its ancestors, then its own.
fn folder_output_dir(out_dir: &Path, folder: &FolderRef<'_>, codes: &ShortcodeMap) -> Option<PathBuf> {
    let mut dir = out_dir.to_path_buf();
    for node in folder.parents.iter().copied().chain(std::iter::once(folder.node)) {
        let code = codes.shortcode(&node.id)?;
        dir.push(format!("{code}__{}", safe_name(&node.name)));
    }
    Some(dir)
}

/// Make a display name usable as a path segment.
///
/// Control characters and `<>:"/\|?*` are percent-encoded, Windows device
/// names get a leading underscore, and a trailing dot or space becomes an
/// underscore. Other characters, non-ASCII included, are kept.
pub fn safe_name(name: &str) -> String {
    let mut name = name.trim().to_string();
    if name.is_empty() || name.chars().all(|c| c.is_control()) {
        name = INVALID_NAME.to_string();
    }
    if name == "." || name == ".." {
        name = format!("_{name}");
    }
    let base = name.split('.').next().unwrap_or_default().to_lowercase();
    if WINDOWS_RESERVED.contains(&base.as_str()) {
        name = format!("_{name}");
    }
    if name.ends_with([' ', '.']) {
        name.pop();
        name.push('_');
    }

    let mut out = String::with_capacity(name.len());
    let mut buf = [0u8; 4];
    for c in name.chars() {
        if c.is_ascii() {
            out.extend(utf8_percent_encode(c.encode_utf8(&mut buf), UNSAFE));
        } else {
            out.push(c);
        }
    }
    out
}

/// Keep the first `limit` characters and note how many were dropped.
/// A cut through a `%XX` escape drops the partial escape.
pub fn truncate_subject(value: &str, limit: usize) -> String {
    let total = value.chars().count();
    if total <= limit {
        return value.to_string();
    }
    let mut kept: Vec<char> = value.chars().take(limit).collect();
    if kept.last() == Some(&'%') {
        kept.pop();
    } else if kept.len() >= 2 && kept[kept.len() - 2] == '%' {
        kept.truncate(kept.len() - 2);
    }
    let removed = total - kept.len();
    let kept: String = kept.into_iter().collect();
    format!("{kept}...({removed} more)")
}

/// `__NN__` with at least two digits, or as many as `total` needs.
pub fn order_prefix(position: usize, total: usize) -> String {
    let width = total.max(1).to_string().len().max(2);
    format!("__{position:0width$}__")
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            MirrorError::io(path, e.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| MirrorError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| MirrorError::io(&target, e))?;
        }
    }
    Ok(())
}

fn set_dir_time(dir: &Path, time: DateTime<Utc>) {
    let mtime = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
    if let Err(e) = filetime::set_file_mtime(dir, mtime) {
        warn!(path = %dir.display(), error = %e, "Could not set directory time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("Inbox"), "Inbox");
        assert_eq!(safe_name("  Re: a/b?  "), "Re%3A a%2Fb%3F");
        assert_eq!(safe_name("CON"), "_CON");
        assert_eq!(safe_name("nul.txt"), "_nul.txt");
        assert_eq!(safe_name("notes.."), "notes._");
        assert_eq!(safe_name(""), INVALID_NAME);
        assert_eq!(safe_name(".."), "_._");
        assert_eq!(safe_name("Résumé ✓"), "Résumé ✓");
        assert_eq!(safe_name("tab\there"), "tab%09here");
    }

    #[test]
    fn test_truncate_subject() {
        assert_eq!(truncate_subject("short", 36), "short");
        assert_eq!(truncate_subject("abcdefghij", 4), "abcd...(6 more)");
        // Never split a percent escape.
        assert_eq!(truncate_subject("ab%3Acd", 3), "ab...(5 more)");
        assert_eq!(truncate_subject("ab%3Acd", 4), "ab...(5 more)");
    }

    #[test]
    fn test_order_prefix() {
        assert_eq!(order_prefix(1, 5), "__01__");
        assert_eq!(order_prefix(7, 120), "__007__");
        assert_eq!(order_prefix(3, 0), "__03__");
    }

    #[test]
    fn test_copy_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("inline")).unwrap();
        std::fs::write(src.join("message.json"), "{}").unwrap();
        std::fs::write(src.join("inline").join("a.png"), "x").unwrap();

        let dst = dir.path().join("out").join("msg");
        copy_tree(&src, &dst).unwrap();
        assert!(dst.join("message.json").is_file());
        assert!(dst.join("inline").join("a.png").is_file());
    }
}
