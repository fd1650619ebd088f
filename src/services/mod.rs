//! Storage services: the uniform `BlobStore` surface and the two backends
//! behind it, plus the engines they share (listing, streaming transfer,
//! multipart upload, rename).

pub mod fs_store;
pub mod keys;
pub mod list;
pub mod multipart;
pub mod object_client;
pub mod object_store;
pub mod rename;
pub mod sidecar;
pub mod storage_service;
pub mod transfer;
