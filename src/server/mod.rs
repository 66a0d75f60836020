//! HTTP surface: stream creation, chunked publish, tailing subscribe with
//! optional SSE framing, health, and the cold-storage hooks.

mod auth;
pub mod keepalive;
pub mod storage;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Registrar};
use crate::config::Config;
use crate::error::Error;
use crate::report::Reporter;
use crate::sse;
use crate::store::Store;
use crate::util;

const CHUNKED_ENCODING_REQUIRED: &str = "A chunked Transfer-Encoding header is required.\n";
const NOT_REGISTERED: &str = "Channel is not registered.\n";
const OCTET_STREAM: &str = "application/octet-stream";
const EVENT_STREAM: &str = "text/event-stream; charset=utf-8";
const KEEP_ALIVE_PACKET: &[u8] = b"\x00";

/// Shared server state; cheap to clone.
#[derive(Clone)]
pub struct App {
    pub store: Store,
    pub config: Arc<Config>,
    http: reqwest::Client,
    reporter: Reporter,
    shutdown: CancellationToken,
}

impl App {
    pub fn new(store: Store, config: Config) -> Self {
        let http = reqwest::Client::new();
        let reporter = Reporter::new(
            http.clone(),
            config.rollbar_token.clone(),
            config.rollbar_environment.clone(),
        );
        Self {
            store,
            config: Arc::new(config),
            http,
            reporter,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registrar(&self) -> Registrar {
        Registrar::new(self.store.clone(), self.config.channel_expire())
    }

    pub fn broker(&self, id: &str) -> Broker {
        Broker::new(
            self.store.clone(),
            id,
            self.config.key_expire(),
            self.config.channel_expire(),
        )
    }

    /// Cancelled on graceful shutdown; live subscribers observe it as a
    /// disconnect.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

pub fn router(app: App) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/streams", post(create_stream))
        .route(
            "/streams/*id",
            put(register_stream).post(publish_stream).get(subscribe_stream),
        )
        .layer(middleware::from_fn_with_state(app.clone(), auth::require_auth))
        .layer(middleware::from_fn_with_state(app.clone(), auth::require_https))
        .with_state(app)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_stream(State(app): State<App>) -> Response {
    let id = util::new_stream_id();
    match app.registrar().register(&id) {
        Ok(()) => (StatusCode::OK, id).into_response(),
        Err(err) => {
            app.reporter.report("server.create_stream", &err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn register_stream(State(app): State<App>, Path(id): Path<String>) -> Response {
    match app.registrar().register(&id) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => {
            app.reporter.report("server.register_stream", &err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn publish_stream(
    State(app): State<App>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if !transfer_encoding_chunked(&headers) {
        return (StatusCode::BAD_REQUEST, CHUNKED_ENCODING_REQUIRED).into_response();
    }
    if !app.registrar().is_registered(&id) {
        return (StatusCode::NOT_FOUND, NOT_REGISTERED).into_response();
    }

    let broker = app.broker(&id);
    let offload = app
        .config
        .storage_base_url
        .as_ref()
        .map(|base| storage::Offload::start(app.http.clone(), base, &id));

    let mut body = body.into_data_stream();
    let deadline = tokio::time::Instant::now() + app.config.http_read_timeout();
    loop {
        let chunk = match tokio::time::timeout_at(deadline, body.next()).await {
            Err(_) => {
                util::count("server.publish.read_timeout");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                util::count_with_data("server.publish.read_error", &format!("error={err}"));
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Ok(Some(Ok(chunk))) => chunk,
        };
        // Broadcast first, then tee to cold storage. Broker errors are
        // best-effort; offload errors abort the response.
        broker.publish(&chunk);
        if let Some(offload) = &offload {
            if let Err(err) = offload.send(chunk).await {
                app.reporter.report("server.publish.offload", &err);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    broker.unsubscribe_all();
    if let Some(offload) = offload {
        if let Err(err) = offload.finish().await {
            app.reporter.report("server.publish.offload", &err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    StatusCode::OK.into_response()
}

async fn subscribe_stream(
    State(app): State<App>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !app.registrar().is_registered(&id) {
        if let Some(base) = &app.config.storage_base_url {
            match storage::get(&app.http, base, &id).await {
                Ok(Some(upstream)) => {
                    let body = Body::from_stream(upstream.bytes_stream());
                    return ([(header::CONTENT_TYPE, OCTET_STREAM)], body).into_response();
                }
                Ok(None) => {}
                Err(err) => {
                    util::count_with_data("storage.get.error", &format!("error={err}"));
                }
            }
        }
        return (StatusCode::NOT_FOUND, NOT_REGISTERED).into_response();
    }

    let offset = last_event_id(&headers);
    let sse_requested = accepts_event_stream(&headers);
    let broker = app.broker(&id);

    // The SSE encoder resumes by dropping bytes itself so its ids stay in
    // cumulative coordinates; raw subscribers seek in the broker instead.
    let subscription = match broker.subscribe(if sse_requested { 0 } else { offset }) {
        Ok(subscription) => subscription,
        Err(Error::NotRegistered) => {
            return (StatusCode::NOT_FOUND, NOT_REGISTERED).into_response();
        }
        Err(err) => {
            app.reporter.report("server.subscribe", &err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let source: BoxStream<'static, Bytes> = if sse_requested {
        sse::encode(subscription, offset).boxed()
    } else {
        subscription.boxed()
    };
    let wrapped = keepalive::wrap(
        source,
        Bytes::from_static(KEEP_ALIVE_PACKET),
        app.config.heartbeat_duration(),
        app.shutdown.child_token(),
    );
    let mut stream =
        Box::pin(wrapped.take_until(tokio::time::sleep(app.config.http_write_timeout())));

    let content_type = if sse_requested { EVENT_STREAM } else { OCTET_STREAM };
    // The status depends on whether anything is coming, so peek one chunk
    // before committing to a streaming response.
    match stream.next().await {
        Some(first) => {
            let body = Body::from_stream(
                stream::iter(std::iter::once(first))
                    .chain(stream)
                    .map(Ok::<_, Infallible>),
            );
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        None => {
            if broker.no_content(offset) {
                StatusCode::NO_CONTENT.into_response()
            } else {
                ([(header::CONTENT_TYPE, content_type)], Body::empty()).into_response()
            }
        }
    }
}

fn transfer_encoding_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

fn last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("text/event-stream"))
        .unwrap_or(false)
}
