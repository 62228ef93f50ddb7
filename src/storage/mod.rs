//! Blob storage (C1) — streaming byte payloads rooted under one directory.

pub mod blob_store;
