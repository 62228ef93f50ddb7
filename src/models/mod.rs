//! Core data models for the object-storage service.
//!
//! These types represent the one logical entity the service persists
//! (`MetaData`) plus the smaller shapes derived from it for listing and
//! mode resolution. They map cleanly to the database via `sqlx::FromRow`
//! and serialize naturally as JSON via `serde`.

pub mod content_type;
pub mod metadata;
