//! Rewriting inline-content references in HTML bodies.
//!
//! `cid:` references (and attribute values equal to a recorded
//! `contentLocation`) that match a stored inline attachment are replaced
//! with the attachment's path relative to the message directory. The
//! untouched HTML is kept beside the body as `<field>_noParse.html`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::model::attachment::normalize_cid;
use crate::model::files_map::FilesMapEntry;

use super::write;

/// Suffix of the preserved pre-rewrite copy.
pub const NO_PARSE_SUFFIX: &str = "_noParse";

static CID_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcid:(?:<([^<>"'\s]+)>|([^<>"'\s)]+))"#).expect("valid regex")
});

static ATTR_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

/// Lookup tables built from the inline entries of one message.
#[derive(Debug, Default)]
struct InlineTargets<'a> {
    by_cid: HashMap<String, &'a str>,
    by_location: HashMap<&'a str, &'a str>,
}

impl<'a> InlineTargets<'a> {
    fn new(entries: &'a [FilesMapEntry]) -> Self {
        let mut targets = Self::default();
        for entry in entries.iter().filter(|e| e.is_rewritable_inline()) {
            let Some(path) = entry.relative_path.as_deref() else {
                continue;
            };
            if let Some(cid) = entry.content_id.as_deref().and_then(normalize_cid) {
                targets.by_cid.entry(cid).or_insert(path);
            }
            if let Some(location) = entry.content_location.as_deref().map(str::trim) {
                if !location.is_empty() {
                    targets.by_location.entry(location).or_insert(path);
                }
            }
        }
        targets
    }

    fn is_empty(&self) -> bool {
        self.by_cid.is_empty() && self.by_location.is_empty()
    }
}

/// Path of the pre-rewrite copy for an HTML body file.
pub fn no_parse_path(html_path: &Path) -> PathBuf {
    let stem = html_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    html_path.with_file_name(format!("{stem}{NO_PARSE_SUFFIX}.html"))
}

/// Remove a `_noParse` copy left by an earlier export of `html_path`.
pub fn clear_no_parse(html_path: &Path) -> Result<()> {
    let path = no_parse_path(html_path);
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| MirrorError::io(&path, e))?;
        debug!(path = %path.display(), "Removed stale pre-rewrite copy");
    }
    Ok(())
}

/// Rewrite inline references of one HTML body using `entries`, the files
/// map of the same message.
///
/// Returns `Ok(false)` when no entry qualifies, after removing any stale
/// `_noParse` copy.
/// Otherwise the original is copied to the `_noParse` sibling and the
/// body is rewritten in place; the result says whether any reference
/// changed.
pub fn rewrite_inline_references(html_path: &Path, entries: &[FilesMapEntry]) -> Result<bool> {
    let targets = InlineTargets::new(entries);
    if targets.is_empty() || !html_path.is_file() {
        clear_no_parse(html_path)?;
        return Ok(false);
    }

    let raw = std::fs::read(html_path).map_err(|e| MirrorError::io(html_path, e))?;
    let original = String::from_utf8_lossy(&raw);
    write::write_atomic(&no_parse_path(html_path), &raw)?;

    let rewritten = rewrite_html(&original, &targets);
    let changed = matches!(rewritten, Cow::Owned(ref s) if *s != *original);
    if changed {
        write::write_text(html_path, &rewritten)?;
    }
    debug!(path = %html_path.display(), changed = changed, "Inline references processed");
    Ok(changed)
}

fn rewrite_html<'h>(html: &'h str, targets: &InlineTargets<'_>) -> Cow<'h, str> {
    let html = if targets.by_cid.is_empty() {
        Cow::Borrowed(html)
    } else {
        CID_REF.replace_all(html, |caps: &Captures<'_>| {
            let cid = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match targets.by_cid.get(cid) {
                Some(path) => (*path).to_string(),
                None => caps[0].to_string(),
            }
        })
    };

    if targets.by_location.is_empty() {
        return html;
    }
    let replaced = match ATTR_VALUE.replace_all(&html, |caps: &Captures<'_>| {
        let (value, quote) = match (caps.get(1), caps.get(2)) {
            (Some(v), _) => (v.as_str(), '"'),
            (None, Some(v)) => (v.as_str(), '\''),
            (None, None) => return caps[0].to_string(),
        };
        match targets.by_location.get(value.trim()) {
            Some(path) => format!("={quote}{path}{quote}"),
            None => caps[0].to_string(),
        }
    }) {
        Cow::Borrowed(_) => None,
        Cow::Owned(s) => Some(s),
    };
    match replaced {
        Some(s) => Cow::Owned(s),
        None => html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attachment::AttachmentType;

    fn inline_entry(cid: Option<&str>, location: Option<&str>, path: &str) -> FilesMapEntry {
        FilesMapEntry {
            attachment_id: path.to_string(),
            attachment_shortcode: "__0a1b2c3d__".into(),
            attachment_type: AttachmentType::FileAttachment,
            is_inline: true,
            original_name: Some("image.png".into()),
            sanitized_name: "image.png".into(),
            relative_path: Some(path.to_string()),
            link_path: None,
            content_type: Some("image/png".into()),
            size: Some(3),
            content_id: cid.map(str::to_string),
            content_location: location.map(str::to_string),
            sha256: None,
            error: None,
        }
    }

    #[test]
    fn test_rewrites_cid_forms() {
        let entries = vec![inline_entry(Some("<img1>"), None, "inline/__aa__image.png")];
        let targets = InlineTargets::new(&entries);
        let html = r#"<img src="cid:img1"><img src='cid:<img1>'><img src="cid:other">"#;
        assert_eq!(
            rewrite_html(html, &targets),
            r#"<img src="inline/__aa__image.png"><img src='inline/__aa__image.png'><img src="cid:other">"#
        );
    }

    #[test]
    fn test_cid_needs_word_boundary() {
        let entries = vec![inline_entry(Some("img1"), None, "inline/__aa__image.png")];
        let targets = InlineTargets::new(&entries);
        let html = r#"<p>acid:img1 is prose</p><img src="cid:img1">"#;
        assert_eq!(
            rewrite_html(html, &targets),
            r#"<p>acid:img1 is prose</p><img src="inline/__aa__image.png">"#
        );
    }

    #[test]
    fn test_rewrites_content_location() {
        let entries = vec![inline_entry(None, Some("logo.png"), "inline/__bb__logo.png")];
        let targets = InlineTargets::new(&entries);
        let html = r#"<img src="logo.png"><a href="logo.png.html">x</a>"#;
        assert_eq!(
            rewrite_html(html, &targets),
            r#"<img src="inline/__bb__logo.png"><a href="logo.png.html">x</a>"#
        );
    }

    #[test]
    fn test_failed_or_non_inline_entries_ignored() {
        let mut failed = inline_entry(Some("img1"), None, "inline/x.png");
        failed.error = Some("boom".into());
        let mut attached = inline_entry(Some("img2"), None, "attachments/files/y.png");
        attached.is_inline = false;
        assert!(InlineTargets::new(&[failed, attached]).is_empty());
    }

    #[test]
    fn test_file_rewrite_and_no_parse_copy() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.html");
        std::fs::write(&body, r#"<p><img src="cid:img1"></p>"#).unwrap();
        let entries = vec![inline_entry(Some("img1"), None, "inline/__aa__image.png")];

        assert!(rewrite_inline_references(&body, &entries).unwrap());
        let no_parse = dir.path().join("body_noParse.html");
        assert!(std::fs::read_to_string(&no_parse).unwrap().contains("cid:img1"));
        assert_eq!(
            std::fs::read_to_string(&body).unwrap(),
            r#"<p><img src="inline/__aa__image.png"></p>"#
        );
    }

    #[test]
    fn test_skipped_without_qualifying_entries() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("uniqueBody.html");
        std::fs::write(&body, r#"<img src="cid:img1">"#).unwrap();

        assert!(!rewrite_inline_references(&body, &[]).unwrap());
        assert!(!dir.path().join("uniqueBody_noParse.html").exists());
    }

    #[test]
    fn test_stale_no_parse_removed() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.html");
        std::fs::write(&body, r#"<img src="cid:img1">"#).unwrap();
        let entries = vec![inline_entry(Some("img1"), None, "inline/__aa__image.png")];
        rewrite_inline_references(&body, &entries).unwrap();
        assert!(dir.path().join("body_noParse.html").exists());

        std::fs::write(&body, "<p>no images now</p>").unwrap();
        assert!(!rewrite_inline_references(&body, &[]).unwrap());
        assert!(!dir.path().join("body_noParse.html").exists());
    }

    #[test]
    fn test_no_parse_path() {
        assert_eq!(
            no_parse_path(Path::new("/m/uniqueBody.html")),
            PathBuf::from("/m/uniqueBody_noParse.html")
        );
    }
}
