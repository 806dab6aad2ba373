//! [`RemoteApi`] over the export backend's HTTP routes.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::model::attachment::{AttachmentMetadata, ItemKind};
use crate::model::mail::RemoteMessage;

use super::{RemoteApi, RemoteError};

const ROUTE_PREFIX: &str = "api/outlook/download";

/// On-disk credential file written by the login flow.
#[derive(Debug, Deserialize)]
struct JwtFile {
    jwt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentList {
    attachments: Vec<AttachmentMetadata>,
}

/// Blocking HTTP client for the export backend.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    jwt: String,
}

impl HttpRemote {
    /// Create a client for `base_url` authenticating with `jwt`.
    pub fn new(base_url: &str, jwt: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RemoteError::Transport {
                route: "client".to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            jwt,
        })
    }

    /// Create a client from configuration, loading the JWT from disk.
    pub fn from_config(config: &Config) -> Result<Self> {
        let jwt = load_jwt(&config.jwt_path())?;
        Self::new(
            &config.remote.base_url,
            jwt,
            Duration::from_secs(config.remote.timeout_secs),
        )
    }

    fn get(&self, route: &str, params: &[(&str, &str)]) -> std::result::Result<Response, RemoteError> {
        let url = format!("{}/{ROUTE_PREFIX}/{route}", self.base_url);
        debug!(route = route, "Remote request");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.jwt)
            .query(params)
            .send()
            .map_err(|source| RemoteError::Transport {
                route: route.to_string(),
                source,
            })?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED => Err(RemoteError::Unauthorized {
                route: route.to_string(),
            }),
            s => Err(RemoteError::Status {
                route: route.to_string(),
                status: s.as_u16(),
                body: resp.text().unwrap_or_default(),
            }),
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<T, RemoteError> {
        self.get(route, params)?
            .json()
            .map_err(|e| RemoteError::Decode {
                route: route.to_string(),
                reason: e.to_string(),
            })
    }

    fn get_bytes(
        &self,
        route: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<Vec<u8>, RemoteError> {
        let bytes = self
            .get(route, params)?
            .bytes()
            .map_err(|source| RemoteError::Transport {
                route: route.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}

impl RemoteApi for HttpRemote {
    fn fetch_message(&self, message_id: &str) -> std::result::Result<RemoteMessage, RemoteError> {
        let route = "get-message";
        let value: serde_json::Value = self.get_json(route, &[("messageId", message_id)])?;
        RemoteMessage::from_value(value).ok_or_else(|| RemoteError::Decode {
            route: route.to_string(),
            reason: "message is not a JSON object".to_string(),
        })
    }

    fn list_attachments(
        &self,
        message_id: &str,
    ) -> std::result::Result<Vec<AttachmentMetadata>, RemoteError> {
        let list: AttachmentList = self.get_json("get-attachments", &[("messageId", message_id)])?;
        Ok(list.attachments)
    }

    fn fetch_attachment_item(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> std::result::Result<AttachmentMetadata, RemoteError> {
        self.get_json(
            "get-attachment",
            &[("messageId", message_id), ("attachmentId", attachment_id)],
        )
    }

    fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> std::result::Result<Vec<u8>, RemoteError> {
        self.get_bytes(
            "get-attachment-value",
            &[("messageId", message_id), ("attachmentId", attachment_id)],
        )
    }

    fn fetch_item_value(
        &self,
        kind: ItemKind,
        item_id: &str,
    ) -> std::result::Result<Vec<u8>, RemoteError> {
        self.get_bytes(
            "get-item-value",
            &[("itemType", kind.as_str()), ("itemId", item_id)],
        )
    }
}

/// Read the JWT written by the login flow.
pub fn load_jwt(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(MirrorError::Credentials(format!(
            "{} not found; log in first",
            path.display()
        )));
    }
    let data = std::fs::read(path).map_err(|e| MirrorError::io(path, e))?;
    let file: JwtFile = serde_json::from_slice(&data)
        .map_err(|e| MirrorError::Credentials(format!("{}: {e}", path.display())))?;
    file.jwt
        .filter(|jwt| !jwt.is_empty())
        .ok_or_else(|| MirrorError::Credentials(format!("{} has no jwt", path.display())))
}
