//! Authentication: SigV4 presigned-URL verification (C4) over a
//! configurable secret store (C6).

pub mod secret_store;
pub mod sigv4;
