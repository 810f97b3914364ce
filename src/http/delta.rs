//! The delta endpoint: `POST /<catalog>` with the list of parts the caller wants.

use std::{borrow::Cow, io, time::Instant};

use axum::{
    body::Body,
    extract::State,
    response::{IntoResponse, Response},
};
use futures_util::{StreamExt, TryStreamExt, stream};
use http::{HeaderMap, Method, StatusCode, Uri, header::CONTENT_TYPE};
use percent_encoding::percent_decode_str;
use tokio::{sync::oneshot, time};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{Instrument, Span, debug, trace};

use super::error::{AppError, AppResult};
use crate::{archive, delta, state::AppState};

/// Capacity of the in-memory pipe between the archive writer and the response body.
const ARCHIVE_PIPE_CAP: usize = 64 * 1024;

/// The catalog a request is for: the last segment of its path, percent-decoded.
///
/// A segment that does not decode to UTF-8 names no catalog and yields the empty name.
fn catalog_name(path: &str) -> Cow<'_, str> {
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    percent_decode_str(segment).decode_utf8().unwrap_or_default()
}

/// Handler for delta requests.
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> AppResult<Response> {
    let catalog = catalog_name(uri.path()).to_string();
    let start = Instant::now();
    let res = serve_delta(state, method, &catalog, headers, body).await;
    debug!("Delta of catalog {catalog:?} took {:?}", start.elapsed());
    res
}

async fn serve_delta(
    state: AppState,
    method: Method,
    catalog: &str,
    headers: HeaderMap,
    body: Body,
) -> AppResult<Response> {
    state.metrics.delta_requests.inc();
    if method != Method::POST {
        state.metrics.delta_rejected_method.inc();
        trace!("Delta: rejecting request {method} for catalog {catalog:?}.");
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }
    if state.identity.is_self_request(&headers) {
        state.metrics.delta_rejected_self.inc();
        trace!("Delta: rejecting /SELF/ request for catalog {catalog:?}.");
        return Ok(StatusCode::CONFLICT.into_response());
    }

    // the body and the archive share one deadline
    let deadline = time::Instant::now() + state.request_timeout;
    let known = state.oracle.query(catalog).await?;
    debug!("query handler: {catalog:?} -> {}", known.is_some());
    let Some(members) = known else {
        state.metrics.delta_unknown_catalog.inc();
        return Ok((StatusCode::NOT_FOUND, "404 not found, sorry").into_response());
    };

    let body = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let Ok(approved) = time::timeout_at(deadline, delta::approve(&members, body)).await else {
        state.metrics.delta_body_timeout.inc();
        trace!("Delta: request body for catalog {catalog:?} not received in time.");
        return Err(AppError::new(
            StatusCode::REQUEST_TIMEOUT,
            Some("request body not received in time"),
        ));
    };
    // the membership list is no longer needed while streaming
    drop(members);
    state.metrics.delta_served.inc();
    state
        .metrics
        .delta_parts_approved
        .inc_by(approved.len() as u64);

    let archive = stream_archive(state, catalog.to_string(), approved, deadline);
    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/zip")], archive).into_response())
}

/// Stream the delta archive as a response body.
///
/// The archive is written by a separate task into an in-memory pipe. If writing fails, or is not
/// done by `deadline`, the body ends with an error so the connection is torn down instead of
/// completing with a truncated archive.
fn stream_archive(
    state: AppState,
    catalog: String,
    approved: Vec<String>,
    deadline: time::Instant,
) -> Body {
    let (reader, writer) = tokio::io::duplex(ARCHIVE_PIPE_CAP);
    let (abort_tx, abort_rx) = oneshot::channel::<io::Error>();

    tokio::spawn(
        async move {
            let write = archive::write_delta(writer, state.store.as_ref(), &approved, &catalog);
            let err = match time::timeout_at(deadline, write).await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(_elapsed) => io::Error::new(
                    io::ErrorKind::TimedOut,
                    "delta archive exceeded the request timeout",
                ),
            };
            state.metrics.delta_stream_failed.inc();
            debug!("DELTA: aborting archive of catalog {catalog:?}: {err}");
            abort_tx.send(err).ok();
        }
        .instrument(Span::current()),
    );

    let abort = stream::once(abort_rx).filter_map(|res| async move { res.ok().map(Err) });
    Body::from_stream(ReaderStream::new(reader).chain(abort))
}
