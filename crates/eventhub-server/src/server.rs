//! `EventHubServer`: axum router over the event driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use eventhub_core::{ChannelId, IncomingRequest};
use eventhub_driver::{EventDriver, POLLING_MARKER, SOCKETS_MARKER, STREAMS_MARKER};
use eventhub_settings::ServerSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::request::refreshed_cookie;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::polling::polling_handler;
use crate::transport::socket::socket_handler;
use crate::transport::stream::stream_handler;
use crate::transport::preflight;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The event driver.
    pub driver: Arc<EventDriver>,
    /// Listener and transport settings.
    pub settings: Arc<ServerSettings>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics` when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// `Set-Cookie` value refreshing the channel cookie of a freshly bound
    /// request, when cookie refreshing is enabled.
    pub fn refreshed_cookie(&self, request: &IncomingRequest, id: ChannelId) -> Option<HeaderValue> {
        let minutes = self.driver.cookie_timeout();
        if minutes == 0 {
            return None;
        }
        let channel = self.driver.find_channel(id)?;
        let path = match self.base_path() {
            "" => "/",
            base => base,
        };
        refreshed_cookie(request, &channel.identity().cookie_name, path, minutes)
    }

    /// Base path without a trailing slash (`""` for the root).
    pub fn base_path(&self) -> &str {
        self.settings.base_path.trim_end_matches('/')
    }

    /// How long a long poll stays parked.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.poll_timeout_ms)
    }

    /// WebSocket ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.settings.heartbeat_interval_ms.max(1))
    }

    /// SSE keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.settings.sse_keep_alive_ms.max(1))
    }
}

/// The HTTP face of an [`EventDriver`].
pub struct EventHubServer {
    state: AppState,
}

impl EventHubServer {
    /// Create a server over `driver`.
    pub fn new(settings: ServerSettings, driver: Arc<EventDriver>) -> Self {
        Self {
            state: AppState {
                driver,
                settings: Arc::new(settings),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let base = self.state.base_path();
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));

        for marker in [SOCKETS_MARKER, STREAMS_MARKER, POLLING_MARKER] {
            let method_router = match marker {
                SOCKETS_MARKER => get(socket_handler),
                STREAMS_MARKER => get(stream_handler),
                _ => post(polling_handler),
            }
            .options(preflight);
            router = router
                .route(&format!("{base}/{marker}"), method_router.clone())
                .route(&format!("{base}/{marker}/{{*session}}"), method_router);
        }

        router
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(self.cors())
    }

    fn cors(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .state
            .settings
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        if origins.is_empty() {
            return CorsLayer::permissive();
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.state.settings.host, self.state.settings.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serve on `listener` until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let token = self.state.shutdown.token();
        let local = listener.local_addr()?;
        info!(addr = %local, base_path = %self.state.settings.base_path, "eventhub listening");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
        info!("eventhub listener stopped");
        Ok(())
    }

    /// The event driver.
    pub fn driver(&self) -> &Arc<EventDriver> {
        &self.state.driver
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Listener and transport settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.state.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.driver.channel_count(),
        state.driver.scheduler_state().as_str(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
