//! Shared application state handed to every HTTP handler and auth gate.
//! Constructed once in `main` and cloned per request (cheap: an `Arc`-backed
//! service plus two optional `Arc<SigV4Verifier>`s).

use std::sync::Arc;

use crate::{auth::sigv4::SigV4Verifier, services::object_service::ObjectService};

#[derive(Clone)]
pub struct AppState {
    pub object_service: ObjectService,
    /// `None` when `auth.read` is `public` — the read routes are then
    /// unauthenticated.
    pub read_verifier: Option<Arc<SigV4Verifier>>,
    /// `None` when `auth.write` is `public`.
    pub write_verifier: Option<Arc<SigV4Verifier>>,
}
