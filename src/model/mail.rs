//! Remote message and body types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::attachment::AttachmentMetadata;

/// The two body representations a remote message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyField {
    /// Canonical, human-facing body.
    Body,
    /// Heuristic body with quoted history removed. Advisory only.
    UniqueBody,
}

impl BodyField {
    /// Both fields, canonical first.
    pub const ALL: [BodyField; 2] = [BodyField::Body, BodyField::UniqueBody];

    /// JSON key on the remote message and basename of the artifact.
    pub fn key(self) -> &'static str {
        match self {
            BodyField::Body => "body",
            BodyField::UniqueBody => "uniqueBody",
        }
    }
}

/// Body format, as reported by the remote `contentType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Html,
    Text,
}

impl BodyFormat {
    /// Anything other than `html` is stored as text.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.trim().eq_ignore_ascii_case("html") {
            BodyFormat::Html
        } else {
            BodyFormat::Text
        }
    }

    /// File extension of the body artifact.
    pub fn extension(self) -> &'static str {
        match self {
            BodyFormat::Html => "html",
            BodyFormat::Text => "txt",
        }
    }
}

/// A body payload as returned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyContent {
    pub content_type: String,
    pub content: String,
}

impl BodyContent {
    pub fn format(&self) -> BodyFormat {
        BodyFormat::from_content_type(&self.content_type)
    }
}

/// A message as fetched from the remote: its full metadata object,
/// bodies included.
///
/// The metadata is kept as a JSON object so that `message.json` preserves
/// every field the remote returns, not just the ones this crate reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    metadata: Map<String, Value>,
}

impl RemoteMessage {
    /// Wrap a JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(metadata) => Some(Self { metadata }),
            _ => None,
        }
    }

    /// Raw metadata object.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// The remote id, if present.
    pub fn id(&self) -> Option<&str> {
        self.metadata
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The subject line, if present.
    pub fn subject(&self) -> Option<&str> {
        self.metadata.get("subject").and_then(Value::as_str)
    }

    /// A body payload. `None` when the field is missing, malformed, or has
    /// no content string.
    pub fn body(&self, field: BodyField) -> Option<BodyContent> {
        let obj = self.metadata.get(field.key())?.as_object()?;
        let content_type = obj.get("contentType")?.as_str()?;
        let content = obj.get("content")?.as_str()?;
        Some(BodyContent {
            content_type: content_type.to_string(),
            content: content.to_string(),
        })
    }

    /// Attachments embedded in the metadata (present on nested item messages).
    pub fn embedded_attachments(&self) -> Vec<AttachmentMetadata> {
        self.metadata
            .get("attachments")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build the `message.json` record: every metadata field, with body
    /// content strings reduced to their declared content type (or `null`
    /// when absent) and embedded attachment payloads stripped.
    pub fn record(&self) -> Map<String, Value> {
        let mut record = self.metadata.clone();
        for field in BodyField::ALL {
            let reduced = match self.body(field) {
                Some(body) => serde_json::json!({ "contentType": body.content_type }),
                None => Value::Null,
            };
            record.insert(field.key().to_string(), reduced);
        }
        if let Some(Value::Array(list)) = record.get_mut("attachments") {
            for att in list.iter_mut() {
                if let Some(obj) = att.as_object_mut() {
                    obj.remove("contentBytes");
                }
            }
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> RemoteMessage {
        RemoteMessage::from_value(json!({
            "id": "AAMk-1",
            "subject": "Quarterly numbers",
            "body": { "contentType": "html", "content": "<p>Hi</p>" },
            "uniqueBody": { "contentType": "text" },
            "attachments": [
                { "id": "att-1", "name": "a.txt", "contentBytes": "aGk=" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_body_extraction() {
        let msg = sample();
        let body = msg.body(BodyField::Body).unwrap();
        assert_eq!(body.format(), BodyFormat::Html);
        assert_eq!(body.content, "<p>Hi</p>");
        // contentType without content counts as absent
        assert!(msg.body(BodyField::UniqueBody).is_none());
    }

    #[test]
    fn test_record_strips_payloads() {
        let record = sample().record();
        assert_eq!(record["body"], json!({ "contentType": "html" }));
        assert_eq!(record["uniqueBody"], Value::Null);
        assert_eq!(record["subject"], json!("Quarterly numbers"));
        assert!(record["attachments"][0].get("contentBytes").is_none());
        assert_eq!(record["attachments"][0]["name"], json!("a.txt"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(RemoteMessage::from_value(json!(["x"])).is_none());
    }

    #[test]
    fn test_body_format_parsing() {
        assert_eq!(BodyFormat::from_content_type("HTML"), BodyFormat::Html);
        assert_eq!(BodyFormat::from_content_type("text"), BodyFormat::Text);
        assert_eq!(BodyFormat::from_content_type("weird"), BodyFormat::Text);
    }
}
