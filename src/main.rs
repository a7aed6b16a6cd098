//! webmux - a browser-based terminal multiplexer.
//!
//! The daemon supervises one tmux session plus one ttyd child per terminal,
//! serves the SPA shell and side-channel API over HTTP, and reverse-proxies
//! browser traffic into the per-session ttyds under `/t/{id}/`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webmux::api::{self, AppState};
use webmux::session::{ManagerConfig, SessionManager};
use webmux::settings::{self, SettingsStore};
use webmux::shutdown::ShutdownCoordinator;

/// First ttyd port; session ids are derived from the allocated port.
const START_PORT: u16 = 7700;

/// webmux - a browser-based terminal multiplexer
///
/// Serves persistent shell sessions (tmux + ttyd) to the browser, with file
/// transfer, clipboard, scratch pad, and layout side-channels.
#[derive(Parser, Debug)]
#[command(name = "webmux", version, about, long_about = None)]
struct Args {
    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Shell to spawn in terminals (defaults to $SHELL, then /bin/bash)
    #[arg(long)]
    shell: Option<String>,

    /// Directory for uploaded files
    #[arg(long = "upload-dir")]
    upload_dir: Option<PathBuf>,

    /// Starting directory for new sessions (defaults to the current dir)
    directory: Option<PathBuf>,
}

fn default_upload_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webmux")
        .join("uploads")
}

fn resolve_work_dir(arg: Option<PathBuf>) -> Result<PathBuf, String> {
    let cwd = std::env::current_dir().map_err(|e| format!("cannot determine cwd: {}", e))?;
    let Some(dir) = arg else {
        return Ok(cwd);
    };
    let dir = if dir.is_absolute() { dir } else { cwd.join(dir) };
    match std::fs::metadata(&dir) {
        Ok(meta) if meta.is_dir() => Ok(dir),
        Ok(_) => Err(format!("not a directory: {}", dir.display())),
        Err(e) => Err(format!("invalid directory: {}: {}", dir.display(), e)),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webmux=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let shell = args
        .shell
        .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "/bin/bash".to_string());

    let work_dir = match resolve_work_dir(args.directory) {
        Ok(dir) => dir,
        Err(msg) => {
            eprintln!("webmux: {}", msg);
            std::process::exit(1);
        }
    };

    // Both helpers are required; better to fail now than on first session.
    for helper in ["ttyd", "tmux"] {
        if which::which(helper).is_err() {
            eprintln!(
                "webmux: {} not found in PATH. Please install {} first.",
                helper, helper
            );
            std::process::exit(1);
        }
    }

    let upload_dir = args.upload_dir.unwrap_or_else(default_upload_dir);
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        tracing::warn!("could not create upload dir {}: {}", upload_dir.display(), e);
    }

    let settings = Arc::new(SettingsStore::load(settings::settings_file_path()));
    let manager = match SessionManager::new(ManagerConfig {
        start_port: START_PORT,
        shell,
        work_dir: work_dir.clone(),
        server_port: args.port,
        settings: settings.clone(),
    }) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("webmux: failed to initialize session manager: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = ShutdownCoordinator::new();
    let state = AppState::new(manager.clone(), settings, upload_dir.clone(), shutdown.clone());
    state.spawn_ui_state_pruner();

    let app = api::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("webmux: failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("starting server on http://localhost:{}", args.port);
    tracing::info!("working directory: {}", work_dir.display());
    tracing::info!("upload directory: {}", upload_dir.display());
    tracing::info!("default shell: {}", manager.shell());

    // SIGINT/SIGTERM trigger graceful shutdown: ttyds killed, tmux sessions
    // and server destroyed, transient files removed.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutting down");
            shutdown.trigger();
        });
    }

    let serve = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    });
    if let Err(e) = serve.await {
        tracing::error!("server failed: {}", e);
    }

    manager.shutdown_all().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
