pub mod error;
mod handlers;
mod web;

#[cfg(feature = "dev")]
mod dev;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::keys::MAX_REQUEST_BYTES;
use crate::proxy;
use crate::session::SessionManager;
use crate::settings::SettingsStore;
use crate::shutdown::ShutdownCoordinator;
use crate::store::clipboard::Clipboard;
use crate::store::marked::MarkedStore;
use crate::store::scratch::ScratchPad;
use crate::store::ui_state::UiStateStore;

use handlers::*;

/// Per-request ceiling for multipart uploads.
const MAX_UPLOAD_BYTES: usize = 1 << 30; // 1 GiB

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub settings: Arc<SettingsStore>,
    pub scratch: Arc<ScratchPad>,
    pub marked: Arc<MarkedStore>,
    pub clipboard: Arc<Clipboard>,
    pub ui_state: Arc<UiStateStore>,
    pub upload_dir: PathBuf,
    /// Shared client for the terminal proxy's plain-HTTP forwarding.
    pub http_client: reqwest::Client,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(
        manager: SessionManager,
        settings: Arc<SettingsStore>,
        upload_dir: PathBuf,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            manager,
            settings,
            scratch: Arc::new(ScratchPad::new()),
            marked: Arc::new(MarkedStore::new()),
            clipboard: Arc::new(Clipboard::new()),
            ui_state: Arc::new(UiStateStore::new()),
            upload_dir,
            http_client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(2))
                .build()
                .expect("failed to build proxy client"),
            shutdown,
        }
    }

    /// Arm the background task that prunes UI-state references when a
    /// session dies outside of any HTTP request.
    pub fn spawn_ui_state_pruner(&self) {
        let mut events = self.manager.subscribe_events();
        let ui_state = self.ui_state.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(crate::session::SessionEvent::Destroyed { id }) => {
                        ui_state.remove_session(&id);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/info", get(info))
        .route("/sessions", get(session_list).post(session_create))
        .route(
            "/sessions/{id}",
            axum::routing::delete(session_delete).patch(session_rename),
        )
        .route(
            "/sessions/{id}/keys",
            post(session_keys).layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES)),
        )
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/download", get(download))
        .route("/browse", get(browse))
        .route("/settings", get(settings_get).post(settings_post))
        .route("/ui-state", get(ui_state_get).post(ui_state_post))
        .route(
            "/scratch",
            get(scratch_get).post(scratch_post).delete(scratch_delete),
        )
        .route("/scratch/events", get(scratch_events))
        .route(
            "/marked",
            get(marked_get).post(marked_post).delete(marked_delete),
        )
        .route("/marked/events", get(marked_events))
        .route("/marked/download", get(marked_download))
        .route("/clipboard", get(clipboard_get).post(clipboard_post))
        .route("/clipboard/version", get(clipboard_version));

    #[cfg(feature = "dev")]
    let api = api.route("/dev-reload", get(dev::dev_reload));

    Router::new()
        .nest("/api", api)
        .route("/t/{id}", any(proxy::proxy_root))
        .route("/t/{id}/", any(proxy::proxy_root))
        .route("/t/{id}/{*rest}", any(proxy::proxy_path))
        .fallback(web::static_asset)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        // SAMEORIGIN, not DENY: the SPA iframes the proxied terminals.
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt; // for oneshot()

    use crate::session::{ManagerConfig, Session};

    /// Test state: real stores, a manager with no live helper processes,
    /// and settings persisted under a temp dir.
    fn create_test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")));
        let manager = SessionManager::new(ManagerConfig {
            start_port: 7700,
            shell: "/bin/bash".to_string(),
            work_dir: dir.path().to_path_buf(),
            server_port: 8080,
            settings: settings.clone(),
        })
        .unwrap();
        let state = AppState::new(
            manager,
            settings,
            dir.path().join("uploads"),
            ShutdownCoordinator::new(),
        );
        (state, dir)
    }

    fn fake_session(port: u16) -> Session {
        Session::new(
            format!("session-{}", port),
            port.to_string(),
            port,
            format!("mux-{}", port),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, json: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap()
    }

    // ── info ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn info_reports_configuration() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.oneshot(get_req("/api/info")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["shell"], "/bin/bash");
        assert_eq!(json["port"], 8080);
        assert_eq!(json["sessionCount"], 0);
        assert!(json["tmuxSocket"].as_str().unwrap().contains("webmux-tmux"));
    }

    // ── sessions (registry-level; spawning needs tmux/ttyd) ────────

    #[tokio::test]
    async fn session_list_empty() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.oneshot(get_req("/api/sessions")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn session_list_shows_inserted_sessions() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let response = app.oneshot(get_req("/api/sessions")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json[0]["id"], "session-7701");
        assert_eq!(json[0]["port"], 7701);
    }

    #[tokio::test]
    async fn delete_unknown_session_returns_404() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sessions/session-9999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_inserted_session_returns_204() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sessions/session-7701")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn rename_session_roundtrip() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_req(
                "PATCH",
                "/api/sessions/session-7701",
                serde_json::json!({"name": "builds"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "builds");

        let response = app.oneshot(get_req("/api/sessions")).await.unwrap();
        assert_eq!(body_json(response).await[0]["name"], "builds");
    }

    #[tokio::test]
    async fn rename_unknown_session_returns_404() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app
            .oneshot(json_req(
                "PATCH",
                "/api/sessions/session-1",
                serde_json::json!({"name": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // ── keys ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn keys_to_unknown_session_returns_404() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app
            .oneshot(json_req(
                "POST",
                "/api/sessions/session-9999/keys",
                serde_json::json!({"keys": ["Enter"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn keys_with_invalid_name_returns_400() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let response = app
            .oneshot(json_req(
                "POST",
                "/api/sessions/session-7701/keys",
                serde_json::json!({"keys": ["$(reboot)"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn keys_with_unknown_field_returns_400() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let response = app
            .oneshot(json_req(
                "POST",
                "/api/sessions/session-7701/keys",
                serde_json::json!({"keys": ["Enter"], "bogus": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn keys_with_too_many_steps_returns_400() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let keys: Vec<String> = std::iter::repeat("a".to_string()).take(101).collect();
        let response = app
            .oneshot(json_req(
                "POST",
                "/api/sessions/session-7701/keys",
                serde_json::json!({"keys": keys}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_keys_body_returns_413() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        // 33 KiB of body: over the route's 32 KiB cap.
        let big = "x".repeat(33 * 1024);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions/session-7701/keys")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(
                        r#"{{"sequence":[{{"type":"text","value":"{}"}}]}}"#,
                        big
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    // ── scratch pad ────────────────────────────────────────────────

    #[tokio::test]
    async fn scratch_roundtrip() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.clone().oneshot(get_req("/api/scratch")).await.unwrap();
        assert_eq!(body_json(response).await["text"], "");

        let response = app
            .clone()
            .oneshot(json_req(
                "POST",
                "/api/scratch",
                serde_json::json!({"text": "notes"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "ok");

        let response = app.clone().oneshot(get_req("/api/scratch")).await.unwrap();
        assert_eq!(body_json(response).await["text"], "notes");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/scratch")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "cleared");

        let response = app.oneshot(get_req("/api/scratch")).await.unwrap();
        assert_eq!(body_json(response).await["text"], "");
    }

    #[tokio::test]
    async fn scratch_toggle_keeps_text() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        app.clone()
            .oneshot(json_req(
                "POST",
                "/api/scratch",
                serde_json::json!({"text": "kept"}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(json_req(
                "POST",
                "/api/scratch",
                serde_json::json!({"toggle": "true"}),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "toggled");
        assert_eq!(json["text"], "kept");

        let response = app.oneshot(get_req("/api/scratch")).await.unwrap();
        assert_eq!(body_json(response).await["text"], "kept");
    }

    #[tokio::test]
    async fn scratch_events_start_with_init_frame() {
        let (state, _dir) = create_test_state();
        state.scratch.set("hello".into());
        let app = router(state);

        let response = app.oneshot(get_req("/api/scratch/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/event-stream"));
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

        let mut stream = response.into_body().into_data_stream();
        let first = stream.next().await.unwrap().unwrap();
        let frame = String::from_utf8(first.to_vec()).unwrap();
        assert!(frame.starts_with("data: "), "got frame: {frame}");
        assert!(frame.ends_with("\n\n"));
        let json: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["text"], "hello");
    }

    // ── marked files ───────────────────────────────────────────────

    #[tokio::test]
    async fn marked_antichain_conflict_is_409() {
        let (state, dir) = create_test_state();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b"), b"x").unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_req(
                "POST",
                "/api/marked",
                serde_json::json!({"path": sub.to_str().unwrap()}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let child = sub.join("b");
        let response = app
            .clone()
            .oneshot(json_req(
                "POST",
                "/api/marked",
                serde_json::json!({"path": child.to_str().unwrap()}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert!(json["error"]["message"].as_str().unwrap().contains("\"a\""));

        // The set still holds only the directory.
        let response = app.oneshot(get_req("/api/marked")).await.unwrap();
        let json = body_json(response).await;
        let files = json["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["path"], sub.to_str().unwrap());
    }

    #[tokio::test]
    async fn marked_missing_path_is_404() {
        let (state, dir) = create_test_state();
        let app = router(state);

        let ghost = dir.path().join("ghost");
        let response = app
            .oneshot(json_req(
                "POST",
                "/api/marked",
                serde_json::json!({"path": ghost.to_str().unwrap()}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn marked_download_without_marks_is_400() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.oneshot(get_req("/api/marked/download")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn marked_download_single_file_streams_and_unmarks() {
        let (state, dir) = create_test_state();
        let file = dir.path().join("out.txt");
        std::fs::write(&file, b"payload").unwrap();
        state.marked.add(&file).unwrap();
        let app = router(state.clone());

        let response = app.oneshot(get_req("/api/marked/download")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(disposition.contains("attachment"));
        assert!(disposition.contains("out.txt"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"payload");
        assert!(state.marked.list().is_empty());
    }

    #[tokio::test]
    async fn marked_download_multiple_streams_zip() {
        let (state, dir) = create_test_state();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"1").unwrap();
        std::fs::write(&b, b"2").unwrap();
        state.marked.add(&a).unwrap();
        state.marked.add(&b).unwrap();
        let app = router(state.clone());

        let response = app.oneshot(get_req("/api/marked/download")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/zip"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        // PK zip magic.
        assert_eq!(&body[..2], b"PK");
        assert!(state.marked.list().is_empty());
    }

    // ── clipboard ──────────────────────────────────────────────────

    #[tokio::test]
    async fn clipboard_version_monotonicity() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_req("/api/clipboard/version"))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"0");

        for expected in ["1", "2"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/clipboard")
                        .body(Body::from("x"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);

            let response = app
                .clone()
                .oneshot(get_req("/api/clipboard/version"))
                .await
                .unwrap();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&body[..], expected.as_bytes());
        }

        let response = app.oneshot(get_req("/api/clipboard")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"x");
    }

    // ── ui state ───────────────────────────────────────────────────

    #[tokio::test]
    async fn ui_state_prunes_dead_sessions() {
        let (state, _dir) = create_test_state();
        state.manager.insert(fake_session(7701));
        let app = router(state);

        let posted = serde_json::json!({
            "groups": [
                {"id": "g1", "name": "g1", "sessionIds": ["session-7701", "session-9999"],
                 "layout": "horizontal", "splitRatio": [0.5]},
                {"id": "g2", "name": "g2", "sessionIds": ["session-9999"],
                 "layout": "single"}
            ],
            "groupOrder": ["g1", "g2"],
            "activeGroupId": "g2",
            "groupCounter": 2
        });

        let response = app
            .clone()
            .oneshot(json_req("POST", "/api/ui-state", posted))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let groups = json["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["sessionIds"], serde_json::json!(["session-7701"]));
        assert_eq!(groups[0]["layout"], "single");
        assert_eq!(json["activeGroupId"], "g1");

        let response = app.oneshot(get_req("/api/ui-state")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["groups"].as_array().unwrap().len(), 1);
    }

    // ── settings ───────────────────────────────────────────────────

    #[tokio::test]
    async fn settings_post_then_get_returns_merged_value() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_req(
                "POST",
                "/api/settings",
                serde_json::json!({"ui": {"accent": "#123456"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ui"]["accent"], "#123456");
        // Unspecified fields merged from defaults.
        assert_eq!(json["ui"]["bgPrimary"], "#1e1e2e");

        let response = app.oneshot(get_req("/api/settings")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ui"]["accent"], "#123456");
        assert_eq!(json["terminal"]["base00"], "#1e1e2e");
    }

    // ── browse / download ──────────────────────────────────────────

    #[tokio::test]
    async fn browse_lists_directory_with_parent_entry() {
        let (state, dir) = create_test_state();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();
        let app = router(state);

        let uri = format!("/api/browse?path={}", dir.path().to_str().unwrap());
        let response = app.oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let files = json["files"].as_array().unwrap();
        assert_eq!(files[0]["name"], "..");
        assert!(files.iter().any(|f| f["name"] == "hello.txt"));
    }

    #[tokio::test]
    async fn download_zero_byte_file_has_empty_body_and_attachment() {
        let (state, dir) = create_test_state();
        let file = dir.path().join("empty.bin");
        std::fs::write(&file, b"").unwrap();
        let app = router(state);

        let uri = format!("/api/download?path={}", file.to_str().unwrap());
        let response = app.oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("attachment"));
        assert_eq!(response.headers().get("content-length").unwrap(), "0");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn download_missing_file_is_404() {
        let (state, dir) = create_test_state();
        let app = router(state);

        let uri = format!("/api/download?path={}/nope", dir.path().to_str().unwrap());
        let response = app.oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_without_path_is_400() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.oneshot(get_req("/api/download")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_directory_streams_zip() {
        let (state, dir) = create_test_state();
        let sub = dir.path().join("bundle");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("inner.txt"), b"zipped").unwrap();
        let app = router(state);

        let uri = format!("/api/download?path={}", sub.to_str().unwrap());
        let response = app.oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/zip"
        );
        assert!(response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("bundle.zip"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..2], b"PK");
    }

    // ── upload ─────────────────────────────────────────────────────

    fn multipart_request(uri: &str, boundary: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn upload_writes_file_and_dedups_names() {
        let (state, dir) = create_test_state();
        let target = dir.path().join("incoming");
        let app = router(state);

        let boundary = "xXbOuNdArYXx";
        let body = format!(
            "--{b}\r\ncontent-disposition: form-data; name=\"directory\"\r\n\r\n{dir}\r\n\
             --{b}\r\ncontent-disposition: form-data; name=\"files\"; filename=\"../../etc/x.txt\"\r\n\
             content-type: text/plain\r\n\r\nfirst\r\n--{b}--\r\n",
            b = boundary,
            dir = target.to_str().unwrap()
        );

        let response = app
            .clone()
            .oneshot(multipart_request("/api/upload", boundary, body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 1);
        // Path traversal is stripped to the basename.
        assert_eq!(std::fs::read(target.join("x.txt")).unwrap(), b"first");

        // Uploading the same name again lands beside it with a suffix.
        let response = app
            .oneshot(multipart_request("/api/upload", boundary, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(target.join("x (1).txt").exists());
    }

    // ── proxy ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn proxy_unknown_session_returns_404() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.oneshot(get_req("/t/session-9999/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn proxy_dead_backend_returns_502() {
        let (state, _dir) = create_test_state();
        // Session record exists but nothing listens on its port.
        state.manager.insert(fake_session(1));
        let app = router(state);

        let response = app.oneshot(get_req("/t/session-1/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    // ── static shell ───────────────────────────────────────────────

    #[tokio::test]
    async fn root_serves_embedded_index() {
        let (state, _dir) = create_test_state();
        let app = router(state);

        let response = app.oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/html"));
    }
}
