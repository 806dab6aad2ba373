//! Export engine: mirrors remote messages into the local cache, and builds
//! reports and output trees from it.

pub mod attachment;
pub mod files_map;
pub mod folder;
pub mod inline;
pub mod layout;
pub mod message;
pub mod output;
pub mod sanitize;
pub mod summary;
pub mod write;

use crate::remote::RemoteApi;

/// Tunables of the export engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Record the SHA-256 of stored attachment bytes.
    pub hash_attachments: bool,
    /// Deepest item-attachment nesting that is followed.
    pub max_item_depth: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            hash_attachments: true,
            max_item_depth: 8,
        }
    }
}

/// Exports messages and their attachments from a [`RemoteApi`].
///
/// Message and attachment export recurse into each other for item
/// attachments; see [`message`] and [`attachment`].
pub struct Exporter<'a, R: RemoteApi + ?Sized> {
    remote: &'a R,
    options: ExportOptions,
}

impl<'a, R: RemoteApi + ?Sized> Exporter<'a, R> {
    pub fn new(remote: &'a R, options: ExportOptions) -> Self {
        Self { remote, options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }
}
