//! HTTP endpoint for remote state-update callbacks and metrics.
//!
//! - `POST /callback/{file_id}` and `POST /callback` (JSON or form body
//!   carrying `video_id`): answered `202 Accepted`, reconciled in a
//!   spawned task.
//! - `GET /metrics`: Prometheus text format.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::NotificationError;
use crate::notify::Metrics;
use crate::orchestrator::{CallbackOutcome, JobOrchestrator};

/// Largest callback body accepted.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// A resolved request route.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Metrics,
    Callback { file_id: Option<String> },
    NotFound,
    MethodNotAllowed,
}

/// Maps a method and path to a route.
pub fn route(method: &Method, path: &str) -> Route {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["metrics"] if method == Method::GET => Route::Metrics,
        ["callback"] if method == Method::POST => Route::Callback { file_id: None },
        ["callback", file_id] if method == Method::POST && !file_id.is_empty() => Route::Callback {
            file_id: Some((*file_id).to_string()),
        },
        ["metrics"] | ["callback"] | ["callback", _] => Route::MethodNotAllowed,
        _ => Route::NotFound,
    }
}

/// Identifiers carried by a callback body.
#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackBody {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

impl CallbackBody {
    /// Parses a JSON or form-encoded body. Unparseable bodies yield no ids.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Self {
        let is_json = content_type.is_some_and(|ct| ct.contains("json"))
            || body.first() == Some(&b'{');
        if is_json {
            return serde_json::from_slice(body).unwrap_or_default();
        }

        let mut parsed = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "video_id" => parsed.video_id = Some(value.into_owned()),
                "file_id" => parsed.file_id = Some(value.into_owned()),
                _ => {}
            }
        }
        parsed
    }
}

/// Serves callbacks and metrics.
pub struct CallbackServer {
    orchestrator: Option<Arc<JobOrchestrator>>,
    metrics: Option<Arc<Metrics>>,
    port: u16,
}

impl CallbackServer {
    pub fn new(
        orchestrator: Option<Arc<JobOrchestrator>>,
        metrics: Option<Arc<Metrics>>,
        port: u16,
    ) -> Self {
        Self {
            orchestrator,
            metrics,
            port,
        }
    }

    /// Starts accepting connections. Runs until the listener fails.
    pub async fn start(self) -> Result<(), NotificationError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NotificationError::ServerFailed(e.to_string()))?;

        info!(
            port = self.port,
            callbacks = self.orchestrator.is_some(),
            metrics = self.metrics.is_some(),
            "Starting HTTP server"
        );

        let state = Arc::new(self);

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| NotificationError::ServerFailed(e.to_string()))?;

            let io = TokioIo::new(stream);
            let state = Arc::clone(&state);

            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, hyper::Error>(state.handle(req).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(error = %e, "Error serving connection");
                }
            });
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        match route(req.method(), req.uri().path()) {
            Route::Metrics => match &self.metrics {
                Some(metrics) => match metrics.gather() {
                    Ok(body) => respond(StatusCode::OK, body),
                    Err(e) => {
                        error!(error = %e, "Failed to encode metrics");
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                    }
                },
                None => respond(StatusCode::NOT_FOUND, "Not Found"),
            },
            Route::Callback { file_id } => self.accept_callback(req, file_id).await,
            Route::MethodNotAllowed => respond(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
            Route::NotFound => respond(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    async fn accept_callback(
        &self,
        req: Request<Incoming>,
        path_file_id: Option<String>,
    ) -> Response<Full<Bytes>> {
        let Some(orchestrator) = self.orchestrator.clone() else {
            return respond(StatusCode::NOT_FOUND, "Not Found");
        };

        let content_type = req
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = match read_body(req.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(BodyError::TooLarge) => {
                warn!(limit = MAX_BODY_BYTES, "Rejected oversized callback body");
                return respond(StatusCode::PAYLOAD_TOO_LARGE, "body too large");
            }
            Err(BodyError::Unreadable(e)) => {
                warn!(error = %e, "Failed to read callback body");
                return respond(StatusCode::BAD_REQUEST, "unreadable body");
            }
        };

        let body = CallbackBody::parse(content_type.as_deref(), &bytes);
        let file_id = path_file_id.or(body.file_id);
        let video_id = body.video_id;
        debug!(file_id = ?file_id, video_id = ?video_id, "Received callback");

        tokio::spawn(async move {
            match orchestrator
                .handle_callback(file_id.as_deref(), video_id.as_deref())
                .await
            {
                Ok(CallbackOutcome::Reconciled(result)) => {
                    for (video_id, e) in result.errors() {
                        warn!(file_id = %result.file_id, video_id = %video_id, error = %e, "Callback reconcile failed");
                    }
                }
                Ok(CallbackOutcome::Ignored { .. }) => {}
                Err(e) => error!(error = %e, "Callback handling failed"),
            }
        });

        respond(StatusCode::ACCEPTED, "")
    }
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Unreadable(String),
}

/// Reads a request body, giving up as soon as it exceeds `limit` bytes.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, BodyError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
        Err(e) => Err(BodyError::Unreadable(e.to_string())),
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
