//! Live-reload support, compiled in with the `dev` feature.
//!
//! `/api/dev-reload` is a WebSocket that pushes the literal text `reload`
//! whenever a file under the daemon-adjacent `static/` directory changes
//! (500 ms mtime poll). The SPA shell opens this socket in dev builds and
//! reloads itself on message.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;

fn static_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("static")))
        .unwrap_or_else(|| PathBuf::from("static"))
}

fn scan(dir: &Path, out: &mut HashMap<PathBuf, SystemTime>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.metadata() {
            Ok(meta) if meta.is_dir() => scan(&path, out),
            Ok(meta) => {
                if let Ok(modified) = meta.modified() {
                    out.insert(path, modified);
                }
            }
            Err(_) => {}
        }
    }
}

pub async fn dev_reload(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(watch_and_notify)
}

async fn watch_and_notify(mut socket: WebSocket) {
    let dir = static_dir();
    tracing::info!("[dev] watching {} for changes", dir.display());

    let mut last = HashMap::new();
    scan(&dir, &mut last);

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut current = HashMap::new();
        scan(&dir, &mut current);
        let changed = current
            .iter()
            .any(|(path, modified)| last.get(path).map_or(true, |prev| modified > prev));
        last = current;

        if changed {
            tracing::info!("[dev] static files changed, notifying client");
            if socket.send(Message::Text("reload".into())).await.is_err() {
                return;
            }
        }

        // Drain client frames so close is noticed promptly.
        while let Ok(result) =
            tokio::time::timeout(Duration::from_millis(1), socket.recv()).await
        {
            match result {
                Some(Ok(_)) => continue,
                _ => return,
            }
        }
    }
}
