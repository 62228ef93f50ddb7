//! HTTP dispatcher (C5): the literal routing table from spec §4.5 —
//! `PUT`/`GET`/`DELETE` on `/{key...}`, `GET /` for listing (store mode
//! only), and CORS preflight on any path. A per-verb auth gate (read vs.
//! write) is applied as route-scoped middleware so the two verifier
//! policies stay independent, per spec §4.4/§4.5.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::{
    config::CorsConfig,
    errors::AppError,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, list_objects, put_object, reject_empty_key},
    },
    state::AppState,
};

/// Build the full router: health endpoints, the object surface (gated by
/// per-verb SigV4 verifiers), and an optional CORS layer.
pub fn build_router(state: AppState, cors: Option<CorsLayer>) -> Result<Router> {
    let write_routes = Router::new()
        .route("/", axum::routing::put(reject_empty_key).delete(reject_empty_key))
        .route(
            "/{*key}",
            axum::routing::put(put_object).delete(delete_object),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_write));

    let read_routes = Router::new()
        .route("/", get(list_objects))
        .route("/{*key}", get(get_object))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_read));

    let mut router = Router::new()
        .merge(write_routes)
        .merge(read_routes)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state);

    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    Ok(router)
}

async fn auth_read(State(state): State<AppState>, req: Request, next: Next) -> Response {
    auth_gate(state.read_verifier.as_deref(), req, next).await
}

async fn auth_write(State(state): State<AppState>, req: Request, next: Next) -> Response {
    auth_gate(state.write_verifier.as_deref(), req, next).await
}

async fn auth_gate(
    verifier: Option<&crate::auth::sigv4::SigV4Verifier>,
    req: Request,
    next: Next,
) -> Response {
    use axum::response::IntoResponse;

    let Some(verifier) = verifier else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let path = parts.uri.path();
    let query = parts.uri.query().unwrap_or("");
    if let Err(err) = verifier.verify(&parts.method, path, query, &parts.headers) {
        return AppError::from(err).into_response();
    }
    let req = Request::from_parts(parts, body);
    next.run(req).await
}

/// Translate [`CorsConfig`] into a `tower_http` layer. `None` when CORS is
/// disabled.
pub fn build_cors_layer(cfg: &CorsConfig) -> Result<Option<CorsLayer>> {
    if !cfg.enabled {
        return Ok(None);
    }

    let origin = if cfg.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = cfg
            .allowed_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>().context("parsing cors.allowed_origins entry"))
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    let methods = if cfg.allowed_methods.iter().any(|m| m == "*") {
        AllowMethods::any()
    } else {
        let methods = cfg
            .allowed_methods
            .iter()
            .map(|m| m.parse::<Method>().context("parsing cors.allowed_methods entry"))
            .collect::<Result<Vec<_>>>()?;
        AllowMethods::list(methods)
    };

    let headers = if cfg.allowed_headers.iter().any(|h| h == "*") {
        AllowHeaders::any()
    } else {
        let headers = cfg
            .allowed_headers
            .iter()
            .map(|h| h.parse::<HeaderName>().context("parsing cors.allowed_headers entry"))
            .collect::<Result<Vec<_>>>()?;
        AllowHeaders::list(headers)
    };

    let exposed = cfg
        .exposed_headers
        .iter()
        .map(|h| h.parse::<HeaderName>().context("parsing cors.exposed_headers entry"))
        .collect::<Result<Vec<_>>>()?;

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .max_age(std::time::Duration::from_secs(cfg.max_age));

    if !exposed.is_empty() {
        layer = layer.expose_headers(ExposeHeaders::list(exposed));
    }

    if cfg.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    Ok(Some(layer))
}
