use crate::config::{Config, CorsConfig};
use crate::mcp::capabilities::register_builtin_capabilities;
use crate::mcp::protocol::{codes, JsonRpcResponse};
use crate::mcp::{CapabilityRegistry, Dispatcher, SessionTransport};
use crate::{Error, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::middleware::{capture_credential, ApiCredential};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub transport: Arc<SessionTransport>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Option<PrometheusHandle>,
}

pub struct ApiServer {
    state: AppState,
}

/// Query string of POST <message_path>
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl ApiServer {
    /// Build a server with the built-in capabilities
    pub fn new(config: Config) -> Result<Self> {
        let mut registry = CapabilityRegistry::new();
        register_builtin_capabilities(&mut registry, &config.upstream)?;
        Ok(Self::with_registry(config, registry))
    }

    pub fn with_registry(config: Config, registry: CapabilityRegistry) -> Self {
        let transport = Arc::new(SessionTransport::new(
            &config.session,
            config.server.message_path.clone(),
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(Arc::new(registry), config.session.handler_timeout())
                .with_upstream(config.upstream.clone(), reqwest::Client::new()),
        );

        Self {
            state: AppState {
                config: Arc::new(config),
                transport,
                dispatcher,
                metrics: None,
            },
        }
    }

    /// Install the global Prometheus recorder and expose it at GET /metrics
    pub fn with_prometheus(mut self) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        self.state.metrics = Some(handle);
        Ok(self)
    }

    pub fn transport(&self) -> &Arc<SessionTransport> {
        &self.state.transport
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    /// GET <sse_path> - open a session and stream its events
    async fn sse_handler(
        State(state): State<AppState>,
        Extension(credential): Extension<ApiCredential>,
    ) -> std::result::Result<
        Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>,
        (StatusCode, String),
    > {
        let opened = state.transport.open(credential.0).map_err(|e| {
            tracing::error!("Failed to open SSE session: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        })?;

        let session_id = opened.session.id.clone();
        state
            .dispatcher
            .spawn_loop(state.transport.clone(), session_id.clone(), opened.inbox);

        let stream = state
            .transport
            .event_stream(session_id, opened.events)
            .map(|event| {
                Ok::<Event, Infallible>(Event::default().event(event.event_type).data(event.data))
            });

        Ok(Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(state.config.session.keep_alive())
                .text("ping"),
        ))
    }

    /// POST <message_path> - queue JSON-RPC messages for a session.
    ///
    /// Results are delivered on the SSE stream; this only acknowledges.
    async fn message_handler(
        State(state): State<AppState>,
        Query(query): Query<MessageQuery>,
        headers: HeaderMap,
        Extension(credential): Extension<ApiCredential>,
        body: Bytes,
    ) -> Response {
        let token = query.session_id.or_else(|| {
            headers
                .get("mcp-session-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        });

        let frames = match state.transport.route_inbound(token.as_deref(), &body) {
            Ok(frames) => frames,
            Err(e) => return error_response(e),
        };

        if let (Some(key), Some(first)) = (credential.0, frames.first()) {
            state.transport.set_credential(&first.session_id, key);
        }

        match state.transport.deliver(frames) {
            Ok(count) => {
                tracing::debug!(frames = count, "Queued inbound frames");
                (StatusCode::ACCEPTED, "Accepted").into_response()
            }
            Err(e) => error_response(e),
        }
    }

    /// Build CORS layer from configuration
    fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
        if !cors_config.enabled {
            return CorsLayer::new();
        }

        let origins: Vec<HeaderValue> = cors_config
            .origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| o.parse().ok())
            .collect();

        let has_wildcard = cors_config.origins.iter().any(|o| o == "*");

        let cors = if has_wildcard {
            CorsLayer::new().allow_origin(tower_http::cors::Any)
        } else if origins.is_empty() {
            CorsLayer::new()
        } else {
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(tower_http::cors::Any)
    }

    pub fn router(&self) -> Router {
        let server = &self.state.config.server;

        let mcp_routes = Router::new()
            .route(&server.sse_path, get(Self::sse_handler))
            .route(&server.message_path, post(Self::message_handler));

        Router::new()
            .route("/", get(super::routes::root_info))
            .route("/health", get(super::routes::health))
            .route("/metrics", get(super::routes::metrics))
            .merge(mcp_routes)
            .layer(from_fn_with_state(self.state.clone(), capture_credential))
            .layer(DefaultBodyLimit::max(server.max_body_size))
            .layer(Self::build_cors_layer(&server.cors))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", addr);
        tracing::info!(
            "Connect to SSE stream at http://{}{}",
            addr,
            self.state.config.server.sse_path
        );

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

/// Map transport errors to HTTP statuses; only decode and session lookup
/// failures surface here
fn error_response(err: Error) -> Response {
    match &err {
        Error::Decode(msg) => {
            tracing::warn!("Rejecting undecodable POST: {}", msg);
            (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(None, codes::PARSE_ERROR, msg)),
            )
                .into_response()
        }
        Error::NoSession => {
            tracing::error!("No active transport connection");
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Error::UnknownSession(_) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
        Error::SessionClosed(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
