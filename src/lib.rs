//! `mailmirror`: mirror a remote mailbox into a deterministic local archive.
//!
//! This crate provides the export engine: shortcode allocation, the cache
//! layout, message/attachment export with recursive item attachments,
//! inline-reference rewriting, and reports built from the cache.

pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod model;
pub mod remote;
pub mod shortcode;
