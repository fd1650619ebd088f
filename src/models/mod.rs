//! Core data models for the blob store.
//!
//! These types are shared by both backends: listing entries, object
//! descriptors, metadata maps, bucket locations, and multipart sessions.
//! They serialize naturally as JSON via `serde`.

pub mod bucket;
pub mod entry;
pub mod metadata;
pub mod multipart;
pub mod object;
