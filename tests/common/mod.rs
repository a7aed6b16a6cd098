#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use webmux::api::{self, AppState};
use webmux::session::{ManagerConfig, Session, SessionManager};
use webmux::settings::SettingsStore;
use webmux::shutdown::ShutdownCoordinator;

/// A live daemon instance bound to an ephemeral loopback port, with its
/// temp dir kept alive for the test's duration.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub dir: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Spawn the full router on an ephemeral port. Sessions inserted via
/// `fake_session` have no helper processes behind them, so the suite runs
/// without tmux or ttyd installed.
pub async fn spawn_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")));
    let manager = SessionManager::new(ManagerConfig {
        start_port: 7700,
        shell: "/bin/bash".to_string(),
        work_dir: dir.path().to_path_buf(),
        server_port: 0,
        settings: settings.clone(),
    })
    .unwrap();

    let state = AppState::new(
        manager,
        settings,
        dir.path().join("uploads"),
        ShutdownCoordinator::new(),
    );
    state.spawn_ui_state_pruner();

    let app = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state, dir }
}

/// A session record with no processes behind it.
pub fn fake_session(port: u16) -> Session {
    Session::new(
        format!("session-{}", port),
        port.to_string(),
        port,
        format!("mux-{}", port),
    )
}
