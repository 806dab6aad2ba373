//! Loading the prebuilt index.

use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::export::write;

use super::format::{ConversationFile, ConversationIndex, FolderNode};
use super::IndexPaths;

/// A folder together with its ancestry, in depth-first forest order.
#[derive(Debug, Clone)]
pub struct FolderRef<'a> {
    pub node: &'a FolderNode,
    /// Ancestors from the root down, excluding `node`.
    pub parents: Vec<&'a FolderNode>,
    /// Names from the root down, joined with `" → "`.
    pub display_path: String,
}

/// Load the folder forest. A missing or unreadable file is fatal.
pub fn load_folders(paths: &IndexPaths) -> Result<Vec<FolderNode>> {
    let path = paths.folders_file();
    if !path.exists() {
        return Err(MirrorError::IndexMissing(path));
    }
    write::read_json(&path).map_err(|e| MirrorError::InvalidIndex {
        path: path.clone(),
        reason: e.to_string(),
    })
}

/// Flatten the forest depth-first, parents before children.
pub fn folders_in_order(forest: &[FolderNode]) -> Vec<FolderRef<'_>> {
    fn walk<'a>(node: &'a FolderNode, parents: &[&'a FolderNode], out: &mut Vec<FolderRef<'a>>) {
        let display_path = parents
            .iter()
            .map(|p| p.name.as_str())
            .chain(std::iter::once(node.name.as_str()))
            .collect::<Vec<_>>()
            .join(" → ");
        out.push(FolderRef {
            node,
            parents: parents.to_vec(),
            display_path,
        });
        let mut chain = parents.to_vec();
        chain.push(node);
        for child in &node.children {
            walk(child, &chain, out);
        }
    }

    let mut out = Vec::new();
    for root in forest {
        walk(root, &[], &mut out);
    }
    out
}

/// Load the conversation index of one folder.
///
/// Looks for `<folder shortcode>.json` first, then the legacy
/// `<folder id>.json`. A missing or unreadable file is fatal.
pub fn load_conversations(
    paths: &IndexPaths,
    folder_id: &str,
    folder_shortcode: &str,
) -> Result<ConversationIndex> {
    let path = paths.conversations_file(folder_shortcode);
    let path = if path.exists() {
        path
    } else {
        let legacy = paths.legacy_conversations_file(folder_id);
        if !legacy.exists() {
            return Err(MirrorError::IndexMissing(path));
        }
        debug!(path = %legacy.display(), "Using legacy conversation index");
        legacy
    };

    let file: ConversationFile = write::read_json(&path).map_err(|e| MirrorError::InvalidIndex {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    Ok(file.into_index(folder_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forest() -> Vec<FolderNode> {
        serde_json::from_value(json!([
            { "id": "f1", "name": "Inbox", "children": [
                { "id": "f2", "name": "Receipts", "children": [
                    { "id": "f3", "name": "2024" }
                ]}
            ]},
            { "id": "f4", "name": "Sent Items" }
        ]))
        .unwrap()
    }

    #[test]
    fn test_folders_in_order() {
        let forest = forest();
        let order = folders_in_order(&forest);
        let ids: Vec<&str> = order.iter().map(|f| f.node.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "f3", "f4"]);
        assert_eq!(order[2].display_path, "Inbox → Receipts → 2024");
        assert_eq!(order[2].parents.len(), 2);
        assert!(order[3].parents.is_empty());
    }

    #[test]
    fn test_missing_index_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let err = load_folders(&paths).unwrap_err();
        assert!(matches!(err, MirrorError::IndexMissing(_)));
        assert!(err.is_fatal());

        let err = load_conversations(&paths, "f1", "__abcd1234__").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_legacy_conversation_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        write::write_json(
            &paths.legacy_conversations_file("f1"),
            &json!([{ "conversationId": "c1", "messages": [{ "id": "m1" }] }]),
        )
        .unwrap();
        let index = load_conversations(&paths, "f1", "__abcd1234__").unwrap();
        assert_eq!(index.total_messages(), 1);
    }

    #[test]
    fn test_corrupt_folders_is_invalid_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        write::write_text(&paths.folders_file(), "{ nope").unwrap();
        assert!(matches!(
            load_folders(&paths),
            Err(MirrorError::InvalidIndex { .. })
        ));
    }
}
