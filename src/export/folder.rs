//! Folder export orchestration.
//!
//! Folders are visited depth-first in index order, and within a folder
//! every conversation and message in index order. Message failures are
//! recorded and the run continues; only fatal errors end it.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::index::builder::{assign_folder_scope, assign_folder_shortcodes};
use crate::index::reader::{folders_in_order, load_conversations, load_folders, FolderRef};
use crate::index::IndexPaths;
use crate::remote::RemoteApi;

use super::attachment::AttachmentReport;
use super::layout::CacheLayout;
use super::{ExportOptions, Exporter};

/// Progress events emitted while exporting.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    /// A folder is about to be exported. `total` counts its top-level
    /// messages.
    FolderStarted {
        display_path: &'a str,
        shortcode: &'a str,
        total: usize,
    },
    /// One top-level message was handled (exported, failed or skipped).
    MessageDone { position: usize, total: usize },
    /// The folder reached its end.
    FolderFinished { report: &'a FolderReport },
}

/// A message that could not be exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMessage {
    pub message_id: String,
    pub error: String,
}

/// Outcome of one folder.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderReport {
    pub folder_id: String,
    pub folder_shortcode: String,
    pub display_path: String,
    /// Top-level messages in the index.
    pub total: usize,
    pub exported: usize,
    /// Index entries without an id.
    pub skipped: usize,
    pub failed: Vec<FailedMessage>,
    pub attachments: AttachmentReport,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub folders: Vec<FolderReport>,
}

impl RunReport {
    pub fn exported(&self) -> usize {
        self.folders.iter().map(|f| f.exported).sum()
    }

    pub fn failed(&self) -> usize {
        self.folders.iter().map(|f| f.failed.len()).sum()
    }
}

/// Export every folder of the index under `root`.
pub fn export_all<R: RemoteApi + ?Sized>(
    root: &Path,
    remote: &R,
    options: ExportOptions,
    progress: &mut dyn FnMut(Progress<'_>),
) -> Result<RunReport> {
    let paths = IndexPaths::new(root);
    let layout = CacheLayout::new(root);
    let exporter = Exporter::new(remote, options);

    let forest = load_folders(&paths)?;
    let folder_codes = assign_folder_shortcodes(&paths, &forest)?;

    let mut report = RunReport::default();
    for folder in folders_in_order(&forest) {
        let Some(shortcode) = folder_codes.shortcode(&folder.node.id) else {
            continue;
        };
        let folder_report = export_folder(&exporter, &paths, &layout, &folder, shortcode, progress)?;
        report.folders.push(folder_report);
    }

    info!(
        folders = report.folders.len(),
        exported = report.exported(),
        failed = report.failed(),
        "Export finished"
    );
    Ok(report)
}

/// Export one folder. Returns an error only for fatal failures.
pub fn export_folder<R: RemoteApi + ?Sized>(
    exporter: &Exporter<'_, R>,
    paths: &IndexPaths,
    layout: &CacheLayout,
    folder: &FolderRef<'_>,
    folder_shortcode: &str,
    progress: &mut dyn FnMut(Progress<'_>),
) -> Result<FolderReport> {
    let folder_id = folder.node.id.as_str();
    let index = load_conversations(paths, folder_id, folder_shortcode)?;
    let scopes = assign_folder_scope(paths, folder_id, folder_shortcode, &index)?;

    let total = index.total_messages();
    let mut report = FolderReport {
        folder_id: folder_id.to_string(),
        folder_shortcode: folder_shortcode.to_string(),
        display_path: folder.display_path.clone(),
        total,
        ..FolderReport::default()
    };
    progress(Progress::FolderStarted {
        display_path: &folder.display_path,
        shortcode: folder_shortcode,
        total,
    });
    info!(folder = %folder.display_path, messages = total, "Exporting folder");

    let mut position = 0;
    for conversation in &index.conversations {
        let conversation_id = conversation.conversation_id.as_deref();
        let conversation_code = conversation_id.and_then(|id| scopes.conversation_shortcode(id));

        for summary in &conversation.messages {
            position += 1;
            let message_id = summary.id.as_deref();
            let message_code = conversation_id
                .zip(message_id)
                .and_then(|(c, m)| scopes.message_shortcode(c, m));

            match (message_id, conversation_code, message_code) {
                (Some(message_id), Some(conversation_code), Some(message_code)) => {
                    let exported = layout
                        .ensure_skeleton(folder_shortcode, conversation_code, message_code)
                        .and_then(|dir| exporter.export_message(message_id, &dir));
                    match exported {
                        Ok(outcome) => {
                            report.exported += 1;
                            report.attachments += outcome.attachments;
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => report.failed.push(FailedMessage {
                            message_id: message_id.to_string(),
                            error: e.to_string(),
                        }),
                    }
                }
                _ => {
                    debug!(
                        folder = folder_shortcode,
                        position = position,
                        "Skipping index entry without id"
                    );
                    report.skipped += 1;
                }
            }
            progress(Progress::MessageDone { position, total });
        }
    }

    if !report.failed.is_empty() {
        warn!(
            folder = %folder.display_path,
            failed = report.failed.len(),
            "Some messages failed to export"
        );
    }
    progress(Progress::FolderFinished { report: &report });
    Ok(report)
}
