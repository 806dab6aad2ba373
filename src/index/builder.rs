//! Shortcode assignment over the index, persisted next to it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::export::write;
use crate::shortcode::{self, ShortcodeMap};

use super::format::{ConversationIndex, FolderNode};
use super::reader::folders_in_order;
use super::IndexPaths;

/// Conversation and message shortcodes of one folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderScopeMaps {
    pub folder_id: String,
    /// Conversations of the folder (one scope).
    pub conversations: ShortcodeMap,
    /// Messages per conversation id (one scope each).
    #[serde(default)]
    pub messages: BTreeMap<String, ShortcodeMap>,
}

impl FolderScopeMaps {
    pub fn conversation_shortcode(&self, conversation_id: &str) -> Option<&str> {
        self.conversations.shortcode(conversation_id)
    }

    pub fn message_shortcode(&self, conversation_id: &str, message_id: &str) -> Option<&str> {
        self.messages
            .get(conversation_id)
            .and_then(|m| m.shortcode(message_id))
    }
}

/// Allocate the global folder scope, reusing and extending the persisted map.
pub fn assign_folder_shortcodes(paths: &IndexPaths, forest: &[FolderNode]) -> Result<ShortcodeMap> {
    let file = paths.folder_shortcodes_file();
    let prior = ShortcodeMap::load(&file)?;
    let folders = folders_in_order(forest);
    let map = shortcode::allocate(
        "folders",
        folders.iter().map(|f| f.node.id.as_str()),
        prior.as_ref(),
    )?;

    if prior.as_ref() != Some(&map) {
        map.save(&file)?;
        info!(
            count = map.len(),
            length = map.shortcode_length,
            "Saved folder shortcodes"
        );
    }
    Ok(map)
}

/// Load the persisted shortcodes of one folder, if any.
pub fn load_folder_scope(paths: &IndexPaths, folder_shortcode: &str) -> Result<Option<FolderScopeMaps>> {
    let file = paths.conversation_shortcodes_file(folder_shortcode);
    if !file.exists() {
        return Ok(None);
    }
    write::read_json(&file).map(Some)
}

/// Allocate the conversation scope of a folder and the message scope of
/// each of its conversations, then persist them.
///
/// Conversations and messages without an id get no shortcode.
pub fn assign_folder_scope(
    paths: &IndexPaths,
    folder_id: &str,
    folder_shortcode: &str,
    index: &ConversationIndex,
) -> Result<FolderScopeMaps> {
    let prior = load_folder_scope(paths, folder_shortcode)?;

    let conversations = shortcode::allocate(
        &format!("conversations of {folder_shortcode}"),
        index
            .conversations
            .iter()
            .filter_map(|c| c.conversation_id.as_deref()),
        prior.as_ref().map(|p| &p.conversations),
    )?;

    let mut messages = prior
        .as_ref()
        .map(|p| p.messages.clone())
        .unwrap_or_default();
    for conversation in &index.conversations {
        let Some(conversation_id) = conversation.conversation_id.as_deref() else {
            continue;
        };
        let conversation_shortcode = conversations.shortcode(conversation_id).unwrap_or_default();
        let map = shortcode::allocate(
            &format!("messages of {folder_shortcode}/{conversation_shortcode}"),
            conversation.messages.iter().filter_map(|m| m.id.as_deref()),
            messages.get(conversation_id),
        )?;
        messages.insert(conversation_id.to_string(), map);
    }

    let maps = FolderScopeMaps {
        folder_id: folder_id.to_string(),
        conversations,
        messages,
    };

    if prior.as_ref() != Some(&maps) {
        write::write_json(&paths.conversation_shortcodes_file(folder_shortcode), &maps)?;
        debug!(
            folder = folder_shortcode,
            conversations = maps.conversations.len(),
            "Saved conversation shortcodes"
        );
    }
    Ok(maps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> ConversationIndex {
        serde_json::from_value(json!({
            "folderId": "f1",
            "conversations": [
                { "conversationId": "c1", "messages": [{ "id": "m1" }, { "id": "m2" }] },
                { "conversationId": "c2", "messages": [{ "id": "m1" }, {}] },
                { "messages": [{ "id": "m9" }] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_folder_scope_assignment_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let first = assign_folder_scope(&paths, "f1", "__f__", &index()).unwrap();

        assert_eq!(first.conversations.len(), 2);
        assert_eq!(first.messages["c1"].len(), 2);
        assert_eq!(first.messages["c2"].len(), 1);
        // Message scopes are per conversation: the same id maps identically.
        assert_eq!(
            first.message_shortcode("c1", "m1"),
            first.message_shortcode("c2", "m1")
        );

        let file = paths.conversation_shortcodes_file("__f__");
        let before = std::fs::read(&file).unwrap();
        let second = assign_folder_scope(&paths, "f1", "__f__", &index()).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&file).unwrap(), before);
    }

    #[test]
    fn test_folder_shortcodes_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let forest: Vec<FolderNode> = serde_json::from_value(json!([
            { "id": "f1", "name": "Inbox", "children": [{ "id": "f2", "name": "Sub" }] }
        ]))
        .unwrap();

        let map = assign_folder_shortcodes(&paths, &forest).unwrap();
        assert_eq!(map.len(), 2);
        let loaded = ShortcodeMap::load(&paths.folder_shortcodes_file())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, map);
        let code = map.shortcode("f2").unwrap();
        assert_eq!(loaded.resolve(code), Some("f2"));
    }
}
