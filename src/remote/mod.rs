//! Remote mailbox API.
//!
//! [`RemoteApi`] is the seam between the export engine and the service that
//! talks to the mailbox. Implementations own retry, backoff and rate-limit
//! handling; whatever error they return is terminal for that call.

pub mod http;

use thiserror::Error;

use crate::model::attachment::{AttachmentMetadata, ItemKind};
use crate::model::mail::{BodyContent, BodyField, RemoteMessage};

/// Terminal failure of a single remote call.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The credentials were rejected. Every later call would fail too.
    #[error("Remote rejected credentials for '{route}'; log in again")]
    Unauthorized { route: String },

    /// Non-success HTTP status.
    #[error("Request '{route}' failed with status {status}")]
    Status {
        route: String,
        status: u16,
        body: String,
    },

    /// Connection, TLS or timeout failure.
    #[error("Request '{route}' failed: {source}")]
    Transport {
        route: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response did not have the expected shape.
    #[error("Unexpected response from '{route}': {reason}")]
    Decode { route: String, reason: String },
}

impl RemoteError {
    /// Whether the failure applies to the whole run, not just this call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Unauthorized { .. })
    }
}

/// Operations the exporter needs from the remote mailbox.
pub trait RemoteApi {
    /// Fetch a message's full metadata, bodies included.
    fn fetch_message(&self, message_id: &str) -> Result<RemoteMessage, RemoteError>;

    /// Fetch one body representation of a message.
    fn fetch_message_body(
        &self,
        message_id: &str,
        field: BodyField,
    ) -> Result<Option<BodyContent>, RemoteError> {
        Ok(self.fetch_message(message_id)?.body(field))
    }

    /// List a message's attachments (metadata only).
    fn list_attachments(&self, message_id: &str) -> Result<Vec<AttachmentMetadata>, RemoteError>;

    /// Fetch one attachment with its item payload expanded.
    fn fetch_attachment_item(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentMetadata, RemoteError>;

    /// Download an attachment's raw bytes.
    fn download_attachment(&self, message_id: &str, attachment_id: &str)
        -> Result<Vec<u8>, RemoteError>;

    /// Download the serialized form of an item (`.ics` for events, `.vcf`
    /// for contacts).
    fn fetch_item_value(&self, kind: ItemKind, item_id: &str) -> Result<Vec<u8>, RemoteError>;
}
