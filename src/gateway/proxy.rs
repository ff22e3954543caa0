//! Forwarding to the active worker.
//!
//! The target port is read from the pool on every request, never cached, so
//! traffic keeps going to the old worker until a cycle has swapped.

use std::sync::LazyLock;

use axum::body::Body;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::{SinkExt, StreamExt};
use regex::Regex;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

use crate::error::ProxyError;
use crate::gate::{Session, without_session_cookie};
use crate::gateway::AppState;

static SESSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bokeh-session-id=(\w+)").expect("session id pattern"));
static WS_ARTIFACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\w{8})/ws").expect("artifact path pattern"));

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        tracing::warn!("Proxy request failed: {}", self);
        status.into_response()
    }
}

/// Worker assets (JS, CSS) under `/static/`.
pub(crate) async fn static_passthrough(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let port = state.orchestrator.pool().active().port;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("http://{}:{}{}", state.upstream_host, port, path);

    let mut request = state
        .http
        .request(method.clone(), &url)
        .headers(forwardable(&headers));
    if method != Method::GET && method != Method::HEAD {
        request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let upstream = request
        .send()
        .await
        .map_err(|e| ProxyError::Upstream {
            port,
            reason: e.to_string(),
        })?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(out) = response.headers_mut() {
        *out = forwardable(upstream.headers());
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScriptQuery {
    token: Option<String>,
    elemid: Option<String>,
}

/// Embed script for one artifact, fetched from the active worker.
pub(crate) async fn script(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ScriptQuery>,
    session: Option<Extension<Session>>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let session = session.map(|Extension(s)| s);
    if !state.gate.authorize(&id, Some(&token), session.as_ref()).await {
        tracing::debug!(artifact = %id, "Script request denied");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let port = state.orchestrator.pool().active().port;
    let element = query.elemid.unwrap_or_else(|| id.clone());
    let url = format!("http://{}:{}/{}/autoload.js", state.upstream_host, port, id);
    let query = script_query(&id, &element, &state.public_url, &token);

    let upstream = match state.http.get(&url).query(&query).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            tracing::error!(artifact = %id, port, status = %resp.status(), "Worker rejected script request");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            tracing::error!(artifact = %id, port, "Script request to worker failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or(header::HeaderValue::from_static("application/javascript"));
    (
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response()
}

/// Query for the worker's autoload script. The presented token doubles as
/// the worker's session id so the websocket that follows can be checked
/// against it.
pub(crate) fn script_query(
    id: &str,
    element: &str,
    public_url: &str,
    token: &str,
) -> [(&'static str, String); 4] {
    [
        ("bokeh-autoload-element", element.to_string()),
        ("bokeh-app-path", format!("/{id}")),
        ("bokeh-absolute-url", format!("{public_url}/{id}")),
        ("bokeh-session-id", token.to_string()),
    ]
}

/// Where a websocket upgrade gets sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WsRoute {
    Worker(u16),
    Denied,
}

/// Pull `(artifact id, token)` out of an upgrade request target.
pub(crate) fn ws_credentials(target: &str) -> Option<(&str, &str)> {
    let token = SESSION_ID.captures(target)?.get(1)?.as_str();
    let id = WS_ARTIFACT.captures(target)?.get(1)?.as_str();
    Some((id, token))
}

pub(crate) async fn ws_route(state: &AppState, target: &str, session: Option<&Session>) -> WsRoute {
    let Some((id, token)) = ws_credentials(target) else {
        return WsRoute::Denied;
    };
    if state.gate.authorize(id, Some(token), session).await {
        WsRoute::Worker(state.orchestrator.pool().active().port)
    } else {
        WsRoute::Denied
    }
}

/// Websocket for a live document. Denied upgrades are pointed at an
/// unroutable address, so the client only ever sees a failed handshake.
pub(crate) async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    session: Option<Extension<Session>>,
) -> Response {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let session = session.map(|Extension(s)| s);
    let url = match ws_route(&state, target, session.as_ref()).await {
        WsRoute::Worker(port) => format!("ws://{}:{}{}", state.upstream_host, port, target),
        WsRoute::Denied => {
            tracing::debug!(path = target, "Websocket denied");
            format!("ws://{}{}", state.blackhole_addr, target)
        }
    };

    let mut request = match url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => return ProxyError::InvalidRequest(e.to_string()).into_response(),
    };
    for name in [header::ORIGIN, header::SEC_WEBSOCKET_PROTOCOL] {
        if let Some(value) = headers.get(&name) {
            request.headers_mut().insert(name, value.clone());
        }
    }
    // The gateway session stays with the gateway.
    if let Some(cookie) = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(without_session_cookie)
        .and_then(|v| header::HeaderValue::from_str(&v).ok())
    {
        request.headers_mut().insert(header::COOKIE, cookie);
    }

    let (upstream, handshake) = match tokio_tungstenite::connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::debug!(path = target, "Upstream websocket handshake failed: {}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let protocol = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let ws = match protocol {
        Some(p) => ws.protocols([p]),
        None => ws,
    };
    ws.on_upgrade(move |socket| pump(socket, upstream))
}

async fn pump<S>(client: WebSocket, upstream: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let Some(msg) = to_upstream_message(msg) else {
                continue;
            };
            if upstream_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };
    let to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(msg) = to_client_message(msg) else {
                continue;
            };
            if client_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = to_upstream => {}
        _ = to_client => {}
    }
}

// Ping and pong are answered on each leg by the websocket libraries.
fn to_upstream_message(msg: ws::Message) -> Option<UpstreamMessage> {
    match msg {
        ws::Message::Text(text) => Some(UpstreamMessage::text(text.as_str().to_owned())),
        ws::Message::Binary(data) => Some(UpstreamMessage::binary(data)),
        ws::Message::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| {
            UpstreamCloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().to_owned().into(),
            }
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => None,
    }
}

fn to_client_message(msg: UpstreamMessage) -> Option<ws::Message> {
    match msg {
        UpstreamMessage::Text(text) => Some(ws::Message::Text(text.as_str().to_owned().into())),
        UpstreamMessage::Binary(data) => Some(ws::Message::Binary(data)),
        UpstreamMessage::Close(frame) => Some(ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out
}
