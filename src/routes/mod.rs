//! HTTP dispatcher (C5): route table, auth gating, and CORS wiring.

pub mod routes;
