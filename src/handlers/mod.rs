//! HTTP handlers (part of C5). Route wiring, auth gating, and CORS live in
//! `routes`; this module holds the per-verb request/response logic.

pub mod health_handlers;
pub mod object_handlers;
