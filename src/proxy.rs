//! Reverse proxy for the per-session web terminals.
//!
//! `/t/{id}/...` maps onto `127.0.0.1:{port}` of the session's ttyd with the
//! prefix stripped. ttyd was written to live at `/`, so the proxied root
//! document gets two scripts injected: a WebSocket-constructor wrapper (so
//! ttyd's absolute-to-localhost WS URL resolves back through this proxy) and
//! an OSC 52 handler that copies tmux clipboard writes into the browser.

use axum::body::Body;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path as AxumPath, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::api::AppState;

/// Injected at the start of `<head>` so it runs before ttyd's own bundle.
/// Rewrites any localhost/127.0.0.1 WebSocket URL to the current host and
/// page path, which lands it back on this proxy.
const HEAD_SCRIPT: &str = r#"<head><script>
// WebSocket proxy fix - must run before ttyd's JavaScript
(function() {
    var OrigWebSocket = window.WebSocket;
    window.WebSocket = function(url, protocols) {
        if (url.match(/^wss?:\/\/(localhost|127\.0\.0\.1)/)) {
            var pagePath = window.location.pathname.replace(/\/$/, '');
            var wsPath = url.replace(/^wss?:\/\/[^\/]+/, '');
            var protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            url = protocol + '//' + window.location.host + pagePath + wsPath;
            console.log('[webmux] Rewriting WebSocket URL to:', url);
        }
        if (protocols) {
            return new OrigWebSocket(url, protocols);
        }
        return new OrigWebSocket(url);
    };
    window.WebSocket.prototype = OrigWebSocket.prototype;
    window.WebSocket.CONNECTING = OrigWebSocket.CONNECTING;
    window.WebSocket.OPEN = OrigWebSocket.OPEN;
    window.WebSocket.CLOSING = OrigWebSocket.CLOSING;
    window.WebSocket.CLOSED = OrigWebSocket.CLOSED;
})();
</script>"#;

/// Injected before `</body>`: registers an OSC 52 handler on the embedded
/// terminal (used by tmux set-clipboard) that decodes the base64 payload and
/// writes it to the browser clipboard.
const BODY_SCRIPT: &str = r#"<script>
(function() {
    var checkTerm = setInterval(function() {
        if (window.term && window.term.terminal) {
            clearInterval(checkTerm);
            var terminal = window.term.terminal;
            if (terminal.parser && terminal.parser.registerOscHandler) {
                terminal.parser.registerOscHandler(52, function(data) {
                    // OSC 52 format: "<selection>;<base64-text>"
                    var parts = data.split(';');
                    if (parts.length >= 2) {
                        var base64Text = parts.slice(1).join(';');
                        if (base64Text && base64Text !== '?') {
                            try {
                                var text = atob(base64Text);
                                navigator.clipboard.writeText(text);
                            } catch (e) {}
                        }
                    }
                    return true;
                });
            }
        }
    }, 100);
})();
</script></body>"#;

/// Rewrite the ttyd index document: head script first, clipboard handler
/// last. Only the first occurrence of each anchor is touched.
pub fn rewrite_index_html(body: &str) -> String {
    body.replacen("<head>", HEAD_SCRIPT, 1)
        .replacen("</body>", BODY_SCRIPT, 1)
}

/// Hop-by-hop headers that must not be forwarded in either direction.
/// Accept-Encoding is also dropped so the backend responds with an identity
/// body the rewriter can patch.
fn is_skipped_request_header(name: &header::HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "upgrade"
            | "keep-alive"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "proxy-authorization"
            | "proxy-connection"
            | "accept-encoding"
            | "content-length"
    )
}

fn is_skipped_response_header(name: &header::HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection" | "keep-alive" | "transfer-encoding" | "upgrade"
    )
}

/// `GET/... /t/{id}` — the terminal root document.
pub async fn proxy_root(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    req: Request,
) -> Response {
    handle(state, id, String::new(), req).await
}

/// `/t/{id}/{*rest}` — everything below the terminal root.
pub async fn proxy_path(
    State(state): State<AppState>,
    AxumPath((id, rest)): AxumPath<(String, String)>,
    req: Request,
) -> Response {
    handle(state, id, rest, req).await
}

async fn handle(state: AppState, id: String, rest: String, req: Request) -> Response {
    let Some(session) = state.manager.get(&id) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    let port = session.port;

    let is_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    if is_upgrade {
        let (mut parts, _body) = req.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => {
                proxy_websocket(ws, parts.headers.clone(), port, &rest, &parts.uri).await
            }
            Err(rejection) => rejection.into_response(),
        };
    }
    forward_http(&state, port, &id, &rest, req).await
}

/// Forward a plain HTTP request to ttyd, rewriting the root HTML document.
async fn forward_http(state: &AppState, port: u16, id: &str, rest: &str, req: Request) -> Response {
    let query = req
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let url = format!("http://127.0.0.1:{}/{}{}", port, rest, query);

    let method = req.method().clone();
    let mut headers = HeaderMap::new();
    for (name, value) in req.headers() {
        if !is_skipped_request_header(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    let is_index = rest.is_empty() || rest == "index.html";

    let mut builder = state
        .http_client
        .request(method.clone(), &url)
        .headers(headers);
    if method != Method::GET && method != Method::HEAD {
        builder = builder.body(reqwest::Body::wrap_stream(req.into_body().into_data_stream()));
    }

    let upstream = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("proxy to session {} failed: {}", id, e);
            return (StatusCode::BAD_GATEWAY, "Failed to connect to terminal").into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_skipped_response_header(name) {
            response_headers.insert(name.clone(), value.clone());
        }
    }

    let is_html = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"));

    if is_index && is_html {
        // Buffer and rewrite; Content-Length is recomputed for the new body.
        let body = match upstream.text().await {
            Ok(text) => rewrite_index_html(&text),
            Err(e) => {
                tracing::warn!("reading ttyd index for session {} failed: {}", id, e);
                return (StatusCode::BAD_GATEWAY, "Failed to read terminal page").into_response();
            }
        };
        response_headers.remove(header::CONTENT_LENGTH);
        response_headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&body.len().to_string()).unwrap(),
        );
        let mut response = (status, body).into_response();
        merge_headers(response.headers_mut(), response_headers);
        return response;
    }

    let stream = upstream.bytes_stream();
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    merge_headers(response.headers_mut(), response_headers);
    response
}

fn merge_headers(target: &mut HeaderMap, source: HeaderMap) {
    for (name, value) in source {
        if let Some(name) = name {
            target.insert(name, value);
        }
    }
}

/// Tunnel a WebSocket through to ttyd.
///
/// The backend is dialed (with a short bounded retry, since ttyd may be
/// mid-restart) before the client upgrade is committed, so a dead backend
/// still yields a plain 502. After the upgrade, frames are relayed in both
/// directions until either peer closes.
async fn proxy_websocket(
    ws: WebSocketUpgrade,
    client_headers: HeaderMap,
    port: u16,
    rest: &str,
    uri: &Uri,
) -> Response {
    let query = uri.query().map(|q| format!("?{}", q)).unwrap_or_default();
    let url = format!("ws://127.0.0.1:{}/{}{}", port, rest, query);

    let protocols: Vec<String> = client_headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|p| p.trim().to_string()).collect())
        .unwrap_or_default();

    let backend = match dial_backend(&url, &protocols).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("websocket dial to {} failed: {}", url, e);
            return (StatusCode::BAD_GATEWAY, "Failed to connect to terminal").into_response();
        }
    };

    ws.protocols(protocols)
        .on_upgrade(move |client| tunnel(client, backend))
}

type BackendWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn dial_backend(url: &str, protocols: &[String]) -> Result<BackendWs, tungstenite::Error> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut last_err = None;
    for attempt in 0..5 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let mut request = url.into_client_request()?;
        if !protocols.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&protocols.join(", ")) {
                request
                    .headers_mut()
                    .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
            }
        }
        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _resp)) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("at least one dial attempt"))
}

/// Relay frames in both directions; when one side ends, the other side is
/// closed and both halves wind down.
async fn tunnel(client: WebSocket, backend: BackendWs) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let client_to_backend = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let Some(msg) = client_to_tungstenite(msg) else {
                continue;
            };
            if backend_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = backend_tx.close().await;
    };

    let backend_to_client = async {
        while let Some(Ok(msg)) = backend_rx.next().await {
            let Some(msg) = tungstenite_to_client(msg) else {
                continue;
            };
            if client_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::join!(client_to_backend, backend_to_client);
}

fn client_to_tungstenite(msg: ws::Message) -> Option<tungstenite::Message> {
    Some(match msg {
        ws::Message::Text(text) => tungstenite::Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => {
            tungstenite::Message::Close(frame.map(|f| tungstenite::protocol::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }))
        }
    })
}

fn tungstenite_to_client(msg: tungstenite::Message) -> Option<ws::Message> {
    Some(match msg {
        tungstenite::Message::Text(text) => ws::Message::Text(text.as_str().into()),
        tungstenite::Message::Binary(data) => ws::Message::Binary(data),
        tungstenite::Message::Ping(data) => ws::Message::Ping(data),
        tungstenite::Message::Pong(data) => ws::Message::Pong(data),
        tungstenite::Message::Close(frame) => {
            ws::Message::Close(frame.map(|f| ws::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }))
        }
        // Raw frames only appear when reading in frame mode; skip.
        tungstenite::Message::Frame(_) => return None,
    })
}
