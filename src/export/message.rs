//! Message export.
//!
//! A message directory receives `message.json`, one body file per present
//! body field, the attachment tree, and finally the inline-reference
//! rewrite of its HTML bodies. A top-level message that fails leaves an
//! `export_error.json` marker; a later successful export removes it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{MirrorError, Result};
use crate::model::attachment::AttachmentMetadata;
use crate::model::files_map::FilesMapEntry;
use crate::model::mail::{BodyContent, BodyField, BodyFormat, RemoteMessage};
use crate::remote::RemoteApi;

use super::attachment::AttachmentReport;
use super::inline::{clear_no_parse, rewrite_inline_references};
use super::layout::ensure_message_dirs;
use super::{write, Exporter};

pub const MESSAGE_FILE: &str = "message.json";
pub const ERROR_MARKER_FILE: &str = "export_error.json";

/// Step of a message export, recorded in the error marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStage {
    Skeleton,
    FetchMessage,
    WriteMessage,
    Attachments,
    Rewrite,
}

/// Contents of `export_error.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMarker {
    pub message_id: String,
    pub stage: ExportStage,
    pub error: String,
}

/// Result of exporting one message.
#[derive(Debug, Clone, Default)]
pub struct MessageOutcome {
    pub attachments: AttachmentReport,
    /// HTML bodies whose inline references were rewritten.
    pub rewritten_bodies: usize,
}

type Bodies = Vec<(BodyField, Option<BodyContent>)>;

struct StageError {
    stage: ExportStage,
    error: MirrorError,
}

trait AtStage<T> {
    fn at(self, stage: ExportStage) -> std::result::Result<T, StageError>;
}

impl<T, E: Into<MirrorError>> AtStage<T> for std::result::Result<T, E> {
    fn at(self, stage: ExportStage) -> std::result::Result<T, StageError> {
        self.map_err(|e| StageError {
            stage,
            error: e.into(),
        })
    }
}

impl<R: RemoteApi + ?Sized> Exporter<'_, R> {
    /// Fetch a message fresh from the remote and export it into `dir`.
    ///
    /// On failure the error marker is written (when `dir` exists) and the
    /// error is returned; callers decide whether it ends the run.
    pub fn export_message(&self, message_id: &str, dir: &Path) -> Result<MessageOutcome> {
        match self.export_stages(message_id, dir) {
            Ok(outcome) => {
                clear_error_marker(dir)?;
                Ok(outcome)
            }
            Err(StageError { stage, error }) => {
                warn!(
                    message_id = message_id,
                    stage = ?stage,
                    error = %error,
                    "Failed to export message"
                );
                if dir.is_dir() {
                    if let Err(e) = write_error_marker(dir, message_id, stage, &error) {
                        warn!(path = %dir.display(), error = %e, "Could not write error marker");
                    }
                }
                Err(error)
            }
        }
    }

    fn export_stages(
        &self,
        message_id: &str,
        dir: &Path,
    ) -> std::result::Result<MessageOutcome, StageError> {
        ensure_message_dirs(dir).at(ExportStage::Skeleton)?;

        let message = self
            .remote
            .fetch_message(message_id)
            .at(ExportStage::FetchMessage)?;
        let bodies = self
            .resolve_bodies(&message, Some(message_id))
            .at(ExportStage::FetchMessage)?;
        write_message(&message, &bodies, dir).at(ExportStage::WriteMessage)?;

        let attachments = self
            .remote
            .list_attachments(message_id)
            .at(ExportStage::Attachments)?;
        let mut chain = vec![message_id.to_string()];
        let (files_map, report) = self
            .export_attachments(Some(message_id), dir, attachments, 0, &mut chain)
            .at(ExportStage::Attachments)?;

        let rewritten_bodies =
            rewrite_bodies(dir, &bodies, files_map.entries()).at(ExportStage::Rewrite)?;

        debug!(message_id = message_id, "Exported message");
        Ok(MessageOutcome {
            attachments: report,
            rewritten_bodies,
        })
    }

    /// Export a message delivered inside an item attachment, at nesting
    /// `depth`. Nothing is fetched for the message itself.
    pub(crate) fn export_nested_message(
        &self,
        message: &RemoteMessage,
        dir: &Path,
        depth: usize,
        chain: &mut Vec<String>,
    ) -> Result<MessageOutcome> {
        ensure_message_dirs(dir)?;
        let bodies = self.resolve_bodies(message, None)?;
        write_message(message, &bodies, dir)?;

        let attachments = self.nested_attachment_list(message)?;
        let pushed = match message.id() {
            Some(id) => {
                chain.push(id.to_string());
                true
            }
            None => false,
        };
        let exported = self.export_attachments(message.id(), dir, attachments, depth, chain);
        if pushed {
            chain.pop();
        }
        let (files_map, report) = exported?;

        let rewritten_bodies = rewrite_bodies(dir, &bodies, files_map.entries())?;
        Ok(MessageOutcome {
            attachments: report,
            rewritten_bodies,
        })
    }

    /// Body payloads of a message. When `fetch_id` is given and the
    /// metadata omits a body field entirely, the field is fetched on its
    /// own. Only a missing `body` is an error; `uniqueBody` is advisory.
    fn resolve_bodies(&self, message: &RemoteMessage, fetch_id: Option<&str>) -> Result<Bodies> {
        let mut bodies = Vec::with_capacity(BodyField::ALL.len());
        for field in BodyField::ALL {
            let body = match (message.body(field), fetch_id) {
                (Some(body), _) => Some(body),
                (None, Some(id)) if !message.metadata().contains_key(field.key()) => {
                    match self.remote.fetch_message_body(id, field) {
                        Ok(body) => body,
                        Err(e) if field == BodyField::Body || e.is_fatal() => return Err(e.into()),
                        Err(e) => {
                            warn!(message_id = id, error = %e, "Unique body unavailable");
                            None
                        }
                    }
                }
                _ => None,
            };
            bodies.push((field, body));
        }
        Ok(bodies)
    }

    /// Attachment list of a nested message: the remote's, or the list
    /// embedded in the item payload when the remote has none.
    fn nested_attachment_list(&self, message: &RemoteMessage) -> Result<Vec<AttachmentMetadata>> {
        let Some(id) = message.id() else {
            return Ok(message.embedded_attachments());
        };
        match self.remote.list_attachments(id) {
            Ok(list) if !list.is_empty() => Ok(list),
            Ok(_) => Ok(message.embedded_attachments()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(message_id = id, error = %e, "Using embedded attachment list");
                Ok(message.embedded_attachments())
            }
        }
    }
}

/// Write `message.json` and the body files.
fn write_message(message: &RemoteMessage, bodies: &Bodies, dir: &Path) -> Result<()> {
    let mut record = message.record();
    for (field, body) in bodies {
        let reduced = match body {
            Some(body) => json!({ "contentType": body.content_type }),
            None => Value::Null,
        };
        record.insert(field.key().to_string(), reduced);
        write_body(dir, *field, body.as_ref())?;
    }
    write::write_json(&dir.join(MESSAGE_FILE), &record)
}

/// Write the one body file of `field`, removing a stale one of the other
/// format (or both when the body is absent).
fn write_body(dir: &Path, field: BodyField, body: Option<&BodyContent>) -> Result<()> {
    for format in [BodyFormat::Html, BodyFormat::Text] {
        let path = dir.join(format!("{}.{}", field.key(), format.extension()));
        match body {
            Some(body) if body.format() == format => write::write_text(&path, &body.content)?,
            _ if path.exists() => {
                std::fs::remove_file(&path).map_err(|e| MirrorError::io(&path, e))?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn rewrite_bodies(dir: &Path, bodies: &Bodies, entries: &[FilesMapEntry]) -> Result<usize> {
    let mut rewritten = 0;
    for (field, body) in bodies {
        let path = dir.join(format!("{}.{}", field.key(), BodyFormat::Html.extension()));
        if body.as_ref().map(BodyContent::format) != Some(BodyFormat::Html) {
            clear_no_parse(&path)?;
            continue;
        }
        if rewrite_inline_references(&path, entries)? {
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

fn write_error_marker(dir: &Path, message_id: &str, stage: ExportStage, error: &MirrorError) -> Result<()> {
    let marker = ErrorMarker {
        message_id: message_id.to_string(),
        stage,
        error: error.to_string(),
    };
    write::write_json(&dir.join(ERROR_MARKER_FILE), &marker)
}

fn clear_error_marker(dir: &Path) -> Result<()> {
    let path = dir.join(ERROR_MARKER_FILE);
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| MirrorError::io(&path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(value: Value) -> RemoteMessage {
        RemoteMessage::from_value(value).unwrap()
    }

    #[test]
    fn test_write_message_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let msg = message(json!({
            "id": "m1",
            "body": { "contentType": "html", "content": "<p>hi</p>" },
            "uniqueBody": { "contentType": "text", "content": "hi" }
        }));
        let bodies: Bodies = BodyField::ALL.iter().map(|f| (*f, msg.body(*f))).collect();
        write_message(&msg, &bodies, dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("body.html")).unwrap(),
            "<p>hi</p>"
        );
        assert!(dir.path().join("uniqueBody.txt").exists());
        assert!(!dir.path().join("body.txt").exists());

        let record: Value = write::read_json(&dir.path().join(MESSAGE_FILE)).unwrap();
        assert_eq!(record["body"], json!({ "contentType": "html" }));
        assert_eq!(record["uniqueBody"], json!({ "contentType": "text" }));
    }

    #[test]
    fn test_absent_body_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("uniqueBody.html"), "old").unwrap();
        let msg = message(json!({
            "id": "m1",
            "body": { "contentType": "text", "content": "plain" }
        }));
        let bodies: Bodies = BodyField::ALL.iter().map(|f| (*f, msg.body(*f))).collect();
        write_message(&msg, &bodies, dir.path()).unwrap();

        assert!(!dir.path().join("uniqueBody.html").exists());
        let record: Value = write::read_json(&dir.path().join(MESSAGE_FILE)).unwrap();
        assert_eq!(record["uniqueBody"], Value::Null);
    }

    #[test]
    fn test_text_body_clears_no_parse_copies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("body.html"), "<p>old</p>").unwrap();
        std::fs::write(dir.path().join("body_noParse.html"), "<p>old</p>").unwrap();
        std::fs::write(dir.path().join("uniqueBody_noParse.html"), "<p>old</p>").unwrap();
        let msg = message(json!({
            "id": "m1",
            "body": { "contentType": "text", "content": "see cid:img1" }
        }));
        let bodies: Bodies = BodyField::ALL.iter().map(|f| (*f, msg.body(*f))).collect();
        write_message(&msg, &bodies, dir.path()).unwrap();

        assert_eq!(rewrite_bodies(dir.path(), &bodies, &[]).unwrap(), 0);
        assert!(!dir.path().join("body.html").exists());
        assert!(!dir.path().join("body_noParse.html").exists());
        assert!(!dir.path().join("uniqueBody_noParse.html").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("body.txt")).unwrap(),
            "see cid:img1"
        );
    }

    #[test]
    fn test_error_marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let err = MirrorError::MissingPayload("a1".into());
        write_error_marker(dir.path(), "m1", ExportStage::FetchMessage, &err).unwrap();

        let marker: ErrorMarker = write::read_json(&dir.path().join(ERROR_MARKER_FILE)).unwrap();
        assert_eq!(marker.message_id, "m1");
        assert_eq!(marker.stage, ExportStage::FetchMessage);

        let raw = std::fs::read_to_string(dir.path().join(ERROR_MARKER_FILE)).unwrap();
        assert!(raw.contains("\"stage\": \"fetchMessage\""));

        clear_error_marker(dir.path()).unwrap();
        assert!(!dir.path().join(ERROR_MARKER_FILE).exists());
        clear_error_marker(dir.path()).unwrap();
    }
}
