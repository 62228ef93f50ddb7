//! HTTP handlers for the single-origin object surface (C5): `PUT`/`GET`/
//! `DELETE` on `/{key...}` and `GET /` for listing. Streams bodies in both
//! directions and renders [`MetaData`] as the JSON wire format spec §6
//! names verbatim (`serde`'s `DateTime<Utc>` impl already emits RFC 3339).

use std::io;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::{io::ReaderStream, sync::CancellationToken};

use crate::{
    errors::AppError,
    models::metadata::Mode,
    services::object_service::{GetOutcome, ListArgs},
    state::AppState,
};

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `PUT /{key...}` with an empty key, and `DELETE /{key...}` with an empty
/// key, both route here instead of matching the catch-all — spec requires
/// `400` for an empty key, and axum's `/{*key}` wildcard never matches an
/// empty segment so this needs its own route registered for bare `/`.
pub async fn reject_empty_key() -> AppError {
    AppError::InvalidArgument("empty key".into())
}

pub async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = header_str(&headers, header::CONTENT_TYPE).map(str::to_string);
    let if_match = header_str(&headers, header::IF_MATCH);
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let token = CancellationToken::new();
    let meta = state
        .object_service
        .create(&key, content_type, if_match, stream, &token)
        .await?;

    let mut response = (StatusCode::OK, Json(&meta)).into_response();
    let etag = format!("\"{}\"", meta.etag);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let if_none_match = header_str(&headers, header::IF_NONE_MATCH);
    let if_match = header_str(&headers, header::IF_MATCH);
    let token = CancellationToken::new();

    match state
        .object_service
        .get(&key, if_none_match, if_match, &token)
        .await?
    {
        GetOutcome::Found { meta, file } => {
            let stream = ReaderStream::new(file);
            let mut response = Response::new(Body::from_stream(stream));
            let h = response.headers_mut();
            h.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(&meta.content_type)
                    .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
            );
            if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
                h.insert(header::ETAG, value);
            }
            if let Ok(value) = HeaderValue::from_str(&meta.updated_at.to_rfc2822()) {
                h.insert(header::LAST_MODIFIED, value);
            }
            Ok(response)
        }
        GetOutcome::NotModified(meta) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
                response.headers_mut().insert(header::ETAG, value);
            }
            Ok(response)
        }
    }
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    let token = CancellationToken::new();
    state.object_service.delete(&key, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

pub async fn list_objects(
    State(state): State<AppState>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Response, AppError> {
    if state.object_service.mode() != Mode::Store {
        return Err(AppError::NotFound);
    }

    let token = CancellationToken::new();
    let (items, next_cursor) = state
        .object_service
        .list(
            ListArgs {
                prefix: query.prefix,
                limit: query.limit,
                cursor: query.cursor,
            },
            &token,
        )
        .await?;

    Ok(Json(json!({
        "items": items,
        "next_cursor": next_cursor.unwrap_or_default(),
    }))
    .into_response())
}
