//! `CastgateServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use castgate_core::{ConnectionId, NodeId};
use castgate_pubsub::{PeerRelay, PubSubBus, serve_relay};
use castgate_rpc::{Backend, CapacityController, RpcClient};
use castgate_settings::GatewaySettings;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broadcast::{BroadcastReceiver, broadcast_handler};
use crate::gateway::Gateway;
use crate::health::{self, HealthResponse};
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SUBPROTOCOL, SessionConfig, connection_env, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection lifecycle.
    pub gateway: Arc<Gateway>,
    /// Broadcast ingress.
    pub broadcast: Arc<BroadcastReceiver>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Per-connection limits.
    pub session: Arc<SessionConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// This node.
    pub node_id: NodeId,
    /// Prometheus render handle.
    pub metrics_handle: PrometheusHandle,
}

/// The castgate server.
pub struct CastgateServer {
    settings: GatewaySettings,
    state: AppState,
    bus: Arc<PubSubBus>,
    registry: Arc<ConnectionRegistry>,
}

impl CastgateServer {
    /// Wire up the RPC client, bus, relay, and gateway.
    ///
    /// With peers configured this spawns relay link tasks, so it must run
    /// inside a Tokio runtime.
    pub fn new(
        settings: GatewaySettings,
        backend: Arc<dyn Backend>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let node_id = settings
            .cluster
            .node_id
            .clone()
            .map_or_else(NodeId::new, NodeId::from);
        let secret = settings.broadcast.secret.clone().unwrap_or_default();

        let bus = if settings.cluster.peers.is_empty() {
            Arc::new(PubSubBus::new())
        } else {
            let relay = PeerRelay::spawn(
                node_id.clone(),
                &secret,
                &settings.cluster.peers,
                settings.cluster.peer_queue_size,
                settings.cluster.connect_timeout(),
                &shutdown.token(),
            );
            Arc::new(PubSubBus::with_relay(Arc::new(relay)))
        };

        let rpc = Arc::new(RpcClient::new(
            backend,
            CapacityController::new(settings.rpc.concurrency, settings.rpc.acquire_timeout()),
            settings.rpc.timeout(),
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(Gateway::new(rpc, bus.clone(), registry.clone()));

        let state = AppState {
            gateway,
            broadcast: Arc::new(BroadcastReceiver::new(bus.clone(), secret)),
            shutdown,
            session: Arc::new(SessionConfig::from(&settings.server)),
            start_time: Instant::now(),
            node_id,
            metrics_handle,
        };

        Self {
            settings,
            state,
            bus,
            registry,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.settings.server.path, get(ws_handler))
            .route(&self.settings.broadcast.path, post(broadcast_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the client listener (and the relay listener when configured)
    /// and serve until shutdown.
    ///
    /// Returns the bound client address and the server task handle.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.settings.server.listen_addr()).await?;
        let addr = listener.local_addr()?;

        if let Some(relay_addr) = &self.settings.cluster.listen {
            let relay_listener = TcpListener::bind(relay_addr).await?;
            info!(addr = %relay_listener.local_addr()?, "relay listener bound");
            drop(tokio::spawn(serve_relay(
                relay_listener,
                self.bus.clone(),
                self.settings.broadcast.secret.clone().unwrap_or_default(),
                self.state.shutdown.token(),
            )));
        }

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(
            %addr,
            path = %self.settings.server.path,
            node_id = %self.state.node_id,
            "castgate listening"
        );
        Ok((addr, handle))
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Pub/sub bus.
    pub fn bus(&self) -> &Arc<PubSubBus> {
        &self.bus
    }

    /// Gateway.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.state.gateway
    }

    /// Broadcast receiver.
    pub fn broadcast(&self) -> &Arc<BroadcastReceiver> {
        &self.state.broadcast
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Effective settings.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// This node's ID.
    pub fn node_id(&self) -> &NodeId {
        &self.state.node_id
    }
}

/// GET upgrade to the client `WebSocket`.
async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let env = connection_env(&uri, &headers, &state.session.forward_headers);
    let conn_id = ConnectionId::new();
    let gateway = state.gateway.clone();
    let session = state.session.clone();
    let shutdown = state.shutdown.token();

    ws.protocols([SUBPROTOCOL])
        .max_message_size(state.session.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, conn_id, env, gateway, session, shutdown))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let gateway = &state.gateway;
    Json(health::health_check(
        state.start_time,
        state.node_id.as_str(),
        state.shutdown.is_shutting_down(),
        gateway.registry().len(),
        gateway.bus().topic_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics_handle)
}
