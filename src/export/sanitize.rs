//! Filesystem- and URL-safe attachment names.

/// Basename used when nothing safe remains of the original name.
pub const FALLBACK_BASENAME: &str = "attachment";

/// Extension used when none can be recovered or guessed.
pub const FALLBACK_EXTENSION: &str = "bin";

/// Longest basename kept, extension excluded.
pub const MAX_BASENAME_LEN: usize = 120;

/// Turn a remote-supplied filename into a safe local name.
///
/// The result is lower-case, contains only `[a-z0-9._-]`, has no repeated
/// underscores, and always ends in an extension: the original one when it
/// has a usable one, otherwise one guessed from `content_type`, otherwise
/// `.bin`. Applying it to its own output is a no-op.
pub fn sanitize_filename(name: Option<&str>, content_type: Option<&str>) -> String {
    let name = name.unwrap_or_default().trim();
    let (base, extension) = split_extension(name);

    let mut base = clean_basename(base);
    if base.len() > MAX_BASENAME_LEN {
        base.truncate(MAX_BASENAME_LEN);
        base = trim_separators(&base).to_string();
    }
    if base.is_empty() {
        base = FALLBACK_BASENAME.to_string();
    }

    let extension = extension
        .or_else(|| content_type.and_then(extension_for_content_type).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());

    format!("{base}.{extension}")
}

/// Split off the last dot-segment when it looks like an extension.
fn split_extension(name: &str) -> (&str, Option<String>) {
    match name.rsplit_once('.') {
        Some((base, ext))
            if !base.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (base, Some(ext.to_ascii_lowercase()))
        }
        _ => (name, None),
    }
}

fn clean_basename(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let mapped = match c {
            c if c.is_ascii_alphanumeric() => c.to_ascii_lowercase(),
            '.' | '-' => c,
            _ => '_',
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    trim_separators(&out).to_string()
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, '_' | '.' | '-'))
}

/// Best-effort extension for a MIME type. Parameters are ignored.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let ext = match mime.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "application/pdf" => "pdf",
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.ms-outlook" => "msg",
        "message/rfc822" => "eml",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "text/calendar" => "ics",
        "text/vcard" | "text/x-vcard" => "vcf",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "video/mp4" => "mp4",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(
            sanitize_filename(Some("Quarterly Report (Final).PDF"), None),
            "quarterly_report_final.pdf"
        );
        assert_eq!(sanitize_filename(Some("a  b\t c.txt"), None), "a_b_c.txt");
        assert_eq!(
            sanitize_filename(Some("archive.tar.GZ"), None),
            "archive.tar.gz"
        );
    }

    #[test]
    fn test_sanitize_fallbacks() {
        assert_eq!(sanitize_filename(None, None), "attachment.bin");
        assert_eq!(sanitize_filename(Some("   "), Some("image/png")), "attachment.png");
        assert_eq!(sanitize_filename(Some("日本語.docx"), None), "attachment.docx");
        assert_eq!(sanitize_filename(Some("image001"), Some("image/JPEG; name=x")), "image001.jpg");
        assert_eq!(sanitize_filename(Some("notes"), Some("application/x-unknown")), "notes.bin");
        assert_eq!(sanitize_filename(Some(".bashrc"), None), "bashrc.bin");
    }

    #[test]
    fn test_sanitize_truncates_basename() {
        let long = format!("{}.png", "x".repeat(300));
        let out = sanitize_filename(Some(&long), None);
        assert_eq!(out.len(), MAX_BASENAME_LEN + ".png".len());
        assert!(out.ends_with(".png"));
    }

    #[test]
    fn test_path_separators_replaced() {
        let out = sanitize_filename(Some("../../etc/passwd"), None);
        assert!(!out.contains('/'));
        assert_eq!(out, "etc_passwd.bin");
        assert_eq!(sanitize_filename(Some("C:\\temp\\x.doc"), None), "c_temp_x.doc");
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(name in ".{0,200}", ct in prop::option::of("[a-z]+/[a-z+.-]+")) {
            let once = sanitize_filename(Some(&name), ct.as_deref());
            let twice = sanitize_filename(Some(&once), ct.as_deref());
            prop_assert_eq!(&twice, &once);
            prop_assert!(!once.is_empty());
            prop_assert!(once
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')));
        }

        #[test]
        fn prop_extension_preserved(base in "[A-Za-z0-9][A-Za-z0-9 _-]{0,39}", ext in "[A-Za-z0-9]{1,6}") {
            let name = format!("{base}.{ext}");
            let out = sanitize_filename(Some(&name), None);
            let expected = format!(".{}", ext.to_ascii_lowercase());
            prop_assert!(out.ends_with(&expected));
        }
    }
}
