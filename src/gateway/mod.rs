//! Public HTTP surface: the reverse proxy in front of the active worker and
//! the session-gated management API.
//!
//! ```text
//!   /static/{*path}  ──► active worker (no artifact check)
//!   /script/{id}     ──► AccessGate ──► active worker autoload.js
//!   /{id}/ws         ──► AccessGate ──► active worker | blackhole
//!   /api/*           ──► session required ──► RestartOrchestrator
//!   /health
//! ```

pub mod api;
pub mod proxy;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::content::ContentStore;
use crate::gate::{AccessGate, Session, SessionStore, TokenStore};
use crate::orchestrator::RestartOrchestrator;

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: RestartOrchestrator,
    pub gate: AccessGate,
    pub tokens: TokenStore,
    pub sessions: SessionStore,
    pub content: ContentStore,
    pub http: reqwest::Client,
    pub upstream_host: String,
    pub public_url: String,
    pub blackhole_addr: String,
}

impl AppState {
    pub fn new(
        config: &Config,
        orchestrator: RestartOrchestrator,
        tokens: TokenStore,
        content: ContentStore,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proxy.upstream_timeout_secs))
            .build()?;
        Ok(Self {
            orchestrator,
            gate: AccessGate::new(tokens.clone()),
            tokens,
            sessions: SessionStore::from_config(&config.sessions),
            content,
            http,
            upstream_host: config.workers.upstream_host.clone(),
            public_url: config.server.public_url.clone(),
            blackhole_addr: config.proxy.blackhole_addr.clone(),
        })
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let api = api::routes().route_layer(axum::middleware::from_fn(require_session));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .route("/static/{*path}", any(proxy::static_passthrough))
        .route("/script/{id}", get(proxy::script))
        .route("/{id}/ws", get(proxy::websocket))
        .layer(axum::middleware::from_fn_with_state(
            state.sessions.clone(),
            attach_session,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("plothub listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_check() -> &'static str {
    "ok"
}

/// Resolve the request's session, if any, before any routing decision.
async fn attach_session(
    State(sessions): State<SessionStore>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(session) = sessions.resolve(req.headers()) {
        req.extensions_mut().insert(session);
    }
    next.run(req).await
}

async fn require_session(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.extensions().get::<Session>().is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}
