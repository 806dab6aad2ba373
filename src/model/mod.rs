//! Core data model types for remote messages, attachments, and the files map.

pub mod attachment;
pub mod files_map;
pub mod mail;
