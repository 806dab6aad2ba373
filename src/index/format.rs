//! Prebuilt index file formats.
//!
//! ```text
//! <root>/index/
//! ├── folders.json                         forest of FolderNode
//! ├── conversations-organized/
//! │   └── <folder shortcode>.json          ConversationIndex (or bare array)
//! └── shortcodes/                          written by this crate
//!     ├── folders.json                     ShortcodeMap
//!     └── conversations/<folder>.json      FolderScopeMaps
//! ```
//!
//! The index is produced by a separate indexing step and is treated as
//! read-only input. Unknown keys are preserved in `extra`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One folder of the mailbox, with its subfolders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderNode {
    /// Remote folder id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub children: Vec<FolderNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Conversations of one folder, in index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIndex {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

impl ConversationIndex {
    /// Number of top-level messages, the progress total for the folder.
    pub fn total_messages(&self) -> usize {
        self.conversations.iter().map(|c| c.messages.len()).sum()
    }
}

/// On-disk shape of a conversation file: the organized object, or a bare
/// array written by older indexers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ConversationFile {
    Organized(ConversationIndex),
    Bare(Vec<Conversation>),
}

impl ConversationFile {
    pub(crate) fn into_index(self, folder_id: &str) -> ConversationIndex {
        match self {
            ConversationFile::Organized(mut index) => {
                index.folder_id.get_or_insert_with(|| folder_id.to_string());
                index
            }
            ConversationFile::Bare(conversations) => ConversationIndex {
                folder_id: Some(folder_id.to_string()),
                conversations,
            },
        }
    }
}

/// One conversation and its messages, in index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageSummary>,
}

/// Index-time summary of a message. Only `id` drives the export; the rest
/// names directories in the output tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub sent_date_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageSummary {
    /// Received time, then sent time, then `receivedEpoch`/`sentEpoch`
    /// (milliseconds), then the Unix epoch.
    pub fn timestamp(&self) -> DateTime<Utc> {
        [&self.received_date_time, &self.sent_date_time]
            .into_iter()
            .flatten()
            .find_map(|s| parse_timestamp(s))
            .or_else(|| {
                ["receivedEpoch", "sentEpoch"]
                    .into_iter()
                    .find_map(|key| self.extra.get(key).and_then(Value::as_i64))
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            })
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
