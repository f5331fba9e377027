//! HTTP handlers for the Herald server.
//!
//! This module serves the event stream and publish endpoints and ties each
//! stream's lifetime to its subscription session.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use herald_core::{
    Broker, BrokerError, EventDispatcher, SubscribeRequest, SubscriptionSession,
};
use herald_protocol::{codec, ProtocolError, PublishRequest};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Channels and presence.
    pub broker: Arc<Broker>,
    /// Publish entry point over `broker`.
    pub dispatcher: EventDispatcher,
    /// Server configuration.
    pub config: Config,
    /// Flipped to `true` once the server starts shutting down.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let broker = Arc::new(Broker::with_config(config.broker_config()));
        let (shutdown, _) = watch::channel(false);

        Self {
            dispatcher: EventDispatcher::new(Arc::clone(&broker)),
            broker,
            config,
            shutdown,
        }
    }
}

/// Errors returned to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Subscribe request without channels.
    #[error("Bad Request")]
    BadRequest,

    /// Rejected by the broker.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Publish body failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Publish body could not be read or parsed.
    #[error(transparent)]
    Body(#[from] JsonRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Broker(BrokerError::MaxChannelsReached) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Body(rejection) => rejection.status(),
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Broker(BrokerError::ReservedEventType(_))
            | Self::Protocol(ProtocolError::ReservedEventType(_))
            | Self::BadRequest => self.to_string(),
            Self::Body(rejection) => rejection.body_text(),
            other => format!("Bad Request: {other}"),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Broker(_) => "broker",
            Self::Protocol(_) => "validation",
            Self::Body(_) => "body",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.kind());
        (self.status(), self.message()).into_response()
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let transport = &state.config.transport;
    let publish_base = transport.publish_path.trim_end_matches('/');
    let publish_slash = format!("{publish_base}/");

    Router::new()
        .route("/", get(root_handler))
        .route(&transport.subscribe_path, get(subscribe_handler))
        .route(publish_base, post(publish_handler))
        .route(&publish_slash, post(publish_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(state.config.limits.max_request_size))
        .with_state(state)
}

/// Run the HTTP server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config));

    // Start metrics server if enabled
    if state.config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&state.config.host, state.config.metrics.port)
        {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Herald server listening on {}", addr);
    info!(
        "Subscribe endpoint: http://{}{}",
        addr, state.config.transport.subscribe_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    info!("Herald server shut down");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then end every open event stream.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down...");
    state.shutdown.send_replace(true);
}

async fn root_handler() -> &'static str {
    "ROOT"
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broker.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "clients": stats.client_count,
        "connections": stats.connection_count,
    }))
}

/// Query string of a subscribe request.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    /// Comma-separated channel names.
    pub channels: Option<String>,
    /// Client id to subscribe as.
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// Open an event stream.
async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubscribeParams>,
) -> Result<Response, ApiError> {
    let channels = params
        .channels
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(ApiError::BadRequest)?;

    let mut request = SubscribeRequest::new(channels.split(','));
    if let Some(client_id) = params.client_id.filter(|id| !id.is_empty()) {
        request = request.with_client_id(client_id);
    }

    let (session, receiver) = SubscriptionSession::open(Arc::clone(&state.broker), request)
        .map_err(|e| {
            warn!(channels = %channels, error = %e, "Subscribe rejected");
            e
        })?;

    debug!(
        connection = session.connection_id(),
        client = %session.client_id(),
        "Event stream opened"
    );
    metrics::record_subscriptions(session.channels().len());
    metrics::record_stats(&state.broker.stats());

    let stream = EventStream {
        session,
        receiver,
        heartbeat: heartbeat(state.config.heartbeat.interval_ms),
        shutdown: state.shutdown.subscribe(),
        _metrics: ConnectionMetricsGuard::new(),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(stream.into_body_stream()),
    )
        .into_response())
}

/// Publish a batch of events.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let start = Instant::now();

    let Json(request) = body.map_err(|e| {
        warn!(error = %e, "Unreadable publish body");
        e
    })?;
    let events = request.validate().map_err(|e| {
        warn!(error = %e, "Publish rejected");
        e
    })?;

    let outcomes = state.dispatcher.publish_batch(&events)?;
    for outcome in &outcomes {
        metrics::record_publish(outcome);
    }
    metrics::record_stats(&state.broker.stats());
    metrics::record_latency(start.elapsed().as_secs_f64());

    debug!(events = events.len(), "Published batch");
    Ok(StatusCode::OK)
}

fn heartbeat(interval_ms: u64) -> Option<Interval> {
    if interval_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(interval_ms);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

/// Everything an open event stream owns. Dropping it closes the session.
struct EventStream {
    session: SubscriptionSession,
    receiver: mpsc::Receiver<Bytes>,
    heartbeat: Option<Interval>,
    shutdown: watch::Receiver<bool>,
    _metrics: ConnectionMetricsGuard,
}

impl EventStream {
    fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let preamble = stream::once(async { Ok(Bytes::from_static(codec::STREAM_PREAMBLE)) });
        let events = stream::unfold(self, |mut stream| async move {
            let frame = tokio::select! {
                frame = stream.receiver.recv() => frame,
                () = tick(stream.heartbeat.as_mut()) => Some(Bytes::from_static(codec::KEEP_ALIVE)),
                Ok(()) = stream.shutdown.changed() => None,
            };

            match frame {
                Some(frame) => Some((Ok(frame), stream)),
                None => {
                    debug!(
                        connection = stream.session.connection_id(),
                        "Event stream ended"
                    );
                    None
                }
            }
        });
        preamble.chain(events)
    }
}

async fn tick(heartbeat: Option<&mut Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
