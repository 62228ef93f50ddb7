//! Service layer — orchestrates the blob store and metadata repository.

pub mod object_service;
