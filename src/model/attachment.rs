//! Attachment metadata and the variant dispatch types.
//!
//! The remote reports the attachment kind through an OData type tag
//! (`#microsoft.graph.fileAttachment`, ...). [`AttachmentMetadata::variant`]
//! turns that tag plus the inline flag into the closed set of handling
//! strategies the exporter dispatches on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata about one attachment of a remote message.
///
/// Unknown fields are kept in `extra` so the metadata can be written back
/// out close to verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMetadata {
    /// Remote attachment id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// OData type tag, e.g. `#microsoft.graph.fileAttachment`.
    #[serde(
        rename = "@odata.type",
        alias = "odataType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub odata_type: Option<String>,

    /// Display name supplied by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// MIME content type (e.g. `"image/png"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Size in bytes as reported by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// `true` if the attachment is embedded in the HTML body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_inline: Option<bool>,

    /// Content-ID for inline attachments referenced from HTML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,

    /// Content-Location for inline attachments referenced from HTML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_location: Option<String>,

    /// Base64 payload, when the remote included it in the listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_bytes: Option<String>,

    /// Expanded item payload of an item attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,

    /// Every other field, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Attachment type as recorded in `files_map.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentType {
    FileAttachment,
    ReferenceAttachment,
    ItemAttachment,
}

impl AttachmentType {
    /// Recognise an OData type tag.
    pub fn from_odata(tag: &str) -> Option<Self> {
        if tag.contains("fileAttachment") {
            Some(AttachmentType::FileAttachment)
        } else if tag.contains("referenceAttachment") {
            Some(AttachmentType::ReferenceAttachment)
        } else if tag.contains("itemAttachment") {
            Some(AttachmentType::ItemAttachment)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentType::FileAttachment => "fileAttachment",
            AttachmentType::ReferenceAttachment => "referenceAttachment",
            AttachmentType::ItemAttachment => "itemAttachment",
        }
    }
}

/// How an attachment is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentVariant {
    /// Link to content stored elsewhere. Metadata only.
    Reference,
    /// Regular file, stored under `attachments/files/`.
    File,
    /// File embedded in the body, stored under `inline/`.
    InlineFile,
    /// Structured item (message, event, contact), exported recursively.
    Item,
}

impl AttachmentVariant {
    pub fn attachment_type(self) -> AttachmentType {
        match self {
            AttachmentVariant::Reference => AttachmentType::ReferenceAttachment,
            AttachmentVariant::File | AttachmentVariant::InlineFile => AttachmentType::FileAttachment,
            AttachmentVariant::Item => AttachmentType::ItemAttachment,
        }
    }
}

/// Kind of object carried by an item attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Message,
    Event,
    Contact,
    Other,
}

impl ItemKind {
    /// Classify an item by its OData type tag.
    ///
    /// `eventMessage` (a meeting request) is a message.
    pub fn from_odata(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        if tag.contains("message") {
            ItemKind::Message
        } else if tag.contains("event") {
            ItemKind::Event
        } else if tag.contains("contact") {
            ItemKind::Contact
        } else {
            ItemKind::Other
        }
    }

    /// Classify an item payload.
    pub fn of(item: &Value) -> Self {
        item.get("@odata.type")
            .and_then(Value::as_str)
            .map(Self::from_odata)
            .unwrap_or(ItemKind::Other)
    }

    /// MIME type of the item's serialized form, used to name it.
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            ItemKind::Message => Some("message/rfc822"),
            ItemKind::Event => Some("text/calendar"),
            ItemKind::Contact => Some("text/vcard"),
            ItemKind::Other => None,
        }
    }

    /// Name used by the remote's item-value route.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Message => "message",
            ItemKind::Event => "event",
            ItemKind::Contact => "contact",
            ItemKind::Other => "item",
        }
    }
}

impl AttachmentMetadata {
    /// Recognised attachment type, if any.
    pub fn attachment_type(&self) -> Option<AttachmentType> {
        self.odata_type.as_deref().and_then(AttachmentType::from_odata)
    }

    pub fn inline(&self) -> bool {
        self.is_inline.unwrap_or(false)
    }

    /// The handling strategy for this attachment, or `None` for unknown types.
    pub fn variant(&self) -> Option<AttachmentVariant> {
        Some(match self.attachment_type()? {
            AttachmentType::ReferenceAttachment => AttachmentVariant::Reference,
            AttachmentType::FileAttachment if self.inline() => AttachmentVariant::InlineFile,
            AttachmentType::FileAttachment => AttachmentVariant::File,
            AttachmentType::ItemAttachment => AttachmentVariant::Item,
        })
    }

    /// Content-ID without surrounding angle brackets.
    pub fn normalized_content_id(&self) -> Option<String> {
        self.content_id.as_deref().and_then(normalize_cid)
    }

    /// A copy without the base64 payload, for writing to disk as metadata.
    pub fn without_payload(&self) -> Self {
        Self {
            content_bytes: None,
            ..self.clone()
        }
    }
}

/// Strip whitespace and one pair of `<...>` from a Content-ID.
pub fn normalize_cid(cid: &str) -> Option<String> {
    let cid = cid.trim();
    let cid = cid
        .strip_prefix('<')
        .and_then(|c| c.strip_suffix('>'))
        .unwrap_or(cid)
        .trim();
    if cid.is_empty() {
        None
    } else {
        Some(cid.to_string())
    }
}
