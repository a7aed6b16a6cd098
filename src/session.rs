//! Session lifecycle: one tmux session plus one ttyd child per session,
//! supervised by the daemon.
//!
//! The registry exclusively owns `Session` records; the supervisor tasks
//! spawned here own the ttyd child handles. Ports come from a monotonic
//! counter that resets to its seed when the last session closes, so ids
//! (`session-{port}`) are never reused while any session lives.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::keys::{self, KeysRequest, Step};
use crate::settings::SettingsStore;
use crate::tmux::{self, TmuxControl, TmuxError};
use crate::ttyd;

/// Display-server variables pinned to a sentinel in new sessions. A dummy
/// value rather than empty, because some shell init scripts check
/// `[ -z "$DISPLAY" ]` to detect headless sessions and would try to start a
/// display server if the variable were merely unset.
const DISPLAY_ENV_VARS: &[&str] = &["DISPLAY", "WAYLAND_DISPLAY"];
const DISPLAY_SENTINEL: &str = "none";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("failed to create session: {0}")]
    CreateFailed(String),
    #[error(transparent)]
    Keys(#[from] keys::KeysError),
    #[error("tmux send-keys failed: {0}")]
    SendKeys(#[source] TmuxError),
}

/// Registry event, broadcast so other subsystems (the UI-state pruner, the
/// shutdown path) can react to session churn without polling.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { id: String },
    Destroyed { id: String },
}

/// Wire representation of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub current_process: String,
}

/// One terminal session: a tmux session holding the TTY, fronted by a ttyd
/// child. Cloning shares the mutable interior.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    /// tmux session name on the daemon socket ("mux-{port}").
    pub tmux_target: String,
    name: Arc<RwLock<String>>,
    current_process: Arc<RwLock<String>>,
    /// PID of the current ttyd child; None between restarts.
    ttyd_pid: Arc<Mutex<Option<u32>>>,
    /// Fires when this session is killed or removed.
    pub cancelled: CancellationToken,
}

impl Session {
    pub fn new(id: String, name: String, port: u16, tmux_target: String) -> Self {
        Self {
            id,
            port,
            created_at: Utc::now(),
            tmux_target,
            name: Arc::new(RwLock::new(name)),
            current_process: Arc::new(RwLock::new(String::new())),
            ttyd_pid: Arc::new(Mutex::new(None)),
            cancelled: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    pub fn set_current_process(&self, proc: String) {
        *self.current_process.write() = proc;
    }

    fn set_ttyd_pid(&self, pid: Option<u32>) {
        *self.ttyd_pid.lock() = pid;
    }

    /// SIGKILL the ttyd child if one is tracked. Idempotent: the pid is
    /// taken out of the slot first, and signalling a reaped pid is harmless
    /// here because ttyd children are awaited by their watcher task.
    pub fn kill_ttyd(&self) {
        let pid = self.ttyd_pid.lock().take();
        if let Some(pid) = pid {
            if pid > i32::MAX as u32 {
                tracing::warn!(pid, "PID exceeds i32::MAX, cannot send signal");
                return;
            }
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name(),
            port: self.port,
            created_at: self.created_at,
            current_process: self.current_process.read().clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("tmux_target", &self.tmux_target)
            .finish_non_exhaustive()
    }
}

/// tmux config shipped with the daemon (mouse mode, OSC 52 clipboard, large
/// scrollback).
const TMUX_CONF: &str = include_str!("../static/tmux.conf");

/// Shell init sourced inside every session: defines the `wm` wrapper.
/// Same content as `wm init` prints.
fn init_script(wm_path: &Path) -> String {
    format!(
        r#"# webmux shell init
_wm_bin="{wm}"
wm() {{
  "$_wm_bin" "$@"
}}
"#,
        wm = wm_path.display()
    )
}

/// Transient files materialized once per daemon lifetime: the tmux config,
/// the `wm` helper binary, and the shell init files. Everything lives under
/// one temp dir that is deleted when the manager drops.
pub struct RuntimeFiles {
    dir: tempfile::TempDir,
    tmux_conf: Option<PathBuf>,
    wm_bin: Option<PathBuf>,
    init_script: Option<PathBuf>,
    bash_rc: Option<PathBuf>,
    zdotdir: Option<PathBuf>,
}

impl RuntimeFiles {
    /// Write the transient files. The `wm` helper is copied from alongside
    /// the daemon executable; a missing helper degrades sessions (no `wm`
    /// command) but is not fatal.
    pub fn materialize(shell: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("webmux-").tempdir()?;

        let tmux_conf = dir.path().join("tmux.conf");
        std::fs::write(&tmux_conf, TMUX_CONF)?;

        let wm_bin = match std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|d| d.join("wm")))
            .filter(|p| p.is_file())
        {
            Some(source) => {
                let dest = dir.path().join("wm");
                std::fs::copy(&source, &dest)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
                }
                Some(dest)
            }
            None => {
                tracing::warn!(
                    "wm helper binary not found next to daemon; sessions get no wm command"
                );
                None
            }
        };

        let mut files = Self {
            tmux_conf: Some(tmux_conf),
            wm_bin,
            init_script: None,
            bash_rc: None,
            zdotdir: None,
            dir,
        };

        if let Some(wm) = files.wm_bin.clone() {
            let init = files.dir.path().join("init.sh");
            std::fs::write(&init, init_script(&wm))?;
            files.init_script = Some(init.clone());

            match Path::new(shell).file_name().and_then(|s| s.to_str()) {
                Some("bash") => {
                    // --rcfile replaces ~/.bashrc, so our rc sources it first.
                    let rc = files.dir.path().join("bashrc");
                    std::fs::write(
                        &rc,
                        format!("[ -f ~/.bashrc ] && . ~/.bashrc\n. {}\n", init.display()),
                    )?;
                    files.bash_rc = Some(rc);
                }
                Some("zsh") => {
                    // ZDOTDIR redirection: each rc defers to the user's own,
                    // then .zshrc sources our init last.
                    let zdotdir = files.dir.path().join("zsh");
                    std::fs::create_dir_all(&zdotdir)?;
                    std::fs::write(
                        zdotdir.join(".zshenv"),
                        "[ -f \"$HOME/.zshenv\" ] && . \"$HOME/.zshenv\"\n",
                    )?;
                    std::fs::write(
                        zdotdir.join(".zprofile"),
                        "[ -f \"$HOME/.zprofile\" ] && . \"$HOME/.zprofile\"\n",
                    )?;
                    std::fs::write(
                        zdotdir.join(".zshrc"),
                        format!(
                            "[ -f \"$HOME/.zshrc\" ] && . \"$HOME/.zshrc\"\n. {}\n",
                            init.display()
                        ),
                    )?;
                    files.zdotdir = Some(zdotdir);
                }
                _ => {}
            }
        }

        Ok(files)
    }

    pub fn tmux_conf(&self) -> Option<&Path> {
        self.tmux_conf.as_deref()
    }
}

/// Configuration for the session manager.
pub struct ManagerConfig {
    pub start_port: u16,
    pub shell: String,
    pub work_dir: PathBuf,
    pub server_port: u16,
    pub settings: Arc<SettingsStore>,
}

struct ManagerInner {
    sessions: RwLock<HashMap<String, Session>>,
    next_port: AtomicU32,
    start_port: u32,
    next_name: AtomicU32,
    shell: String,
    work_dir: PathBuf,
    server_port: u16,
    tmux: TmuxControl,
    runtime: RuntimeFiles,
    settings: Arc<SettingsStore>,
    events: broadcast::Sender<SessionEvent>,
}

/// Owns every live session and the helper processes behind them.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> std::io::Result<Self> {
        let runtime = RuntimeFiles::materialize(&config.shell)?;
        let tmux = TmuxControl::new(
            tmux::default_socket_path(),
            runtime.tmux_conf().map(Path::to_path_buf),
        );
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                next_port: AtomicU32::new(config.start_port as u32),
                start_port: config.start_port as u32,
                next_name: AtomicU32::new(0),
                shell: config.shell,
                work_dir: config.work_dir,
                server_port: config.server_port,
                tmux,
                runtime,
                settings: config.settings,
                events,
            }),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn shell(&self) -> &str {
        &self.inner.shell
    }

    pub fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    pub fn server_port(&self) -> u16 {
        self.inner.server_port
    }

    pub fn tmux_socket(&self) -> PathBuf {
        self.inner.tmux.socket().to_path_buf()
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.sessions.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .inner
            .sessions
            .read()
            .values()
            .map(Session::info)
            .collect();
        infos.sort_by_key(|s| s.port);
        infos
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn live_ids(&self) -> HashSet<String> {
        self.inner.sessions.read().keys().cloned().collect()
    }

    /// Insert a pre-built session record. Used by the spawn path once both
    /// helpers are up, and by tests that don't spawn processes.
    pub fn insert(&self, session: Session) {
        let id = session.id.clone();
        self.inner.sessions.write().insert(id.clone(), session);
        let _ = self.inner.events.send(SessionEvent::Created { id });
    }

    fn env_for_session(&self, id: &str) -> Vec<(String, String)> {
        let mut env = vec![
            ("WEBMUX_PORT".to_string(), self.inner.server_port.to_string()),
            ("WEBMUX_SESSION".to_string(), id.to_string()),
        ];
        if let Some(wm) = &self.inner.runtime.wm_bin {
            env.push(("_wm_bin".to_string(), wm.display().to_string()));
        }
        if let Some(init) = &self.inner.runtime.init_script {
            env.push(("WEBMUX_INIT".to_string(), init.display().to_string()));
        }
        for key in DISPLAY_ENV_VARS {
            env.push((key.to_string(), DISPLAY_SENTINEL.to_string()));
        }
        env
    }

    /// How to launch the shell so it sources the user's normal rc files and
    /// then the injected init. bash and zsh have dedicated mechanisms; other
    /// shells get the POSIX `ENV` hook.
    fn shell_argv(&self, env: &mut Vec<(String, String)>) -> Vec<String> {
        let shell = self.inner.shell.clone();
        let base = Path::new(&shell)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        match base {
            "bash" => {
                if let Some(rc) = &self.inner.runtime.bash_rc {
                    return vec![shell, "--rcfile".to_string(), rc.display().to_string()];
                }
            }
            "zsh" => {
                if let Some(zdotdir) = &self.inner.runtime.zdotdir {
                    env.push(("ZDOTDIR".to_string(), zdotdir.display().to_string()));
                    return vec![shell];
                }
            }
            _ => {
                if let Some(init) = &self.inner.runtime.init_script {
                    env.push(("ENV".to_string(), init.display().to_string()));
                }
            }
        }
        vec![shell]
    }

    /// Create a new session: allocate a port, create the tmux session, start
    /// ttyd against it, register, and arm the watchers.
    pub async fn create(&self, name: &str) -> Result<Session, SessionError> {
        let port = (self.inner.next_port.fetch_add(1, Ordering::AcqRel) + 1) as u16;
        let id = format!("session-{}", port);
        let target = format!("{}{}", tmux::SESSION_PREFIX, port);

        let name = if name.is_empty() {
            (self.inner.next_name.fetch_add(1, Ordering::AcqRel) + 1).to_string()
        } else {
            name.to_string()
        };

        let mut env = self.env_for_session(&id);
        let argv = self.shell_argv(&mut env);

        self.inner
            .tmux
            .new_session(&target, Some(&self.inner.work_dir), &env, &argv)
            .await
            .map_err(|e| SessionError::CreateFailed(e.to_string()))?;
        self.inner.tmux.wait_ready(&target).await;

        let session = Session::new(id.clone(), name, port, target.clone());
        if let Err(e) = self.start_ttyd(&session).await {
            // Never leave a half-created tmux session behind.
            let _ = self.inner.tmux.kill_session(&target).await;
            return Err(e);
        }

        self.insert(session.clone());
        self.spawn_monitor(session.clone());
        tracing::info!("created session {} on port {}", id, port);
        Ok(session)
    }

    /// Start (or restart) the ttyd child for a session, arm its exit
    /// watcher, and wait for the port to accept connections.
    async fn start_ttyd(&self, session: &Session) -> Result<(), SessionError> {
        let colors = self.inner.settings.get().terminal;
        let child = ttyd::spawn(session.port, &self.inner.tmux, &session.tmux_target, &colors)
            .map_err(|e| SessionError::CreateFailed(format!("failed to start ttyd: {}", e)))?;
        session.set_ttyd_pid(child.id());
        self.spawn_ttyd_watcher(session.clone(), child);
        ttyd::wait_port(session.port).await;
        Ok(())
    }

    /// Waits for ttyd to exit. While the tmux session lives, ttyd is
    /// restarted so the browser can reconnect; once tmux is gone the session
    /// is reaped and the restart loop ends.
    fn spawn_ttyd_watcher(&self, session: Session, mut child: tokio::process::Child) {
        let manager = self.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            session.set_ttyd_pid(None);

            if manager.get(&session.id).is_none() {
                return;
            }
            if !manager.inner.tmux.has_session(&session.tmux_target).await {
                tracing::info!("session {}: tmux session exited, cleaning up", session.id);
                manager.remove_dead(&session.id);
                return;
            }

            tracing::info!(
                "session {}: ttyd exited, restarting for reconnection",
                session.id
            );
            if let Err(e) = manager.start_ttyd(&session).await {
                tracing::error!("session {}: failed to restart ttyd: {}", session.id, e);
                manager.remove_dead(&session.id);
            }
        });
    }

    /// Polls the tmux session every 2s, refreshing the foreground process
    /// name and reaping the session when tmux is gone.
    fn spawn_monitor(&self, session: Session) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = session.cancelled.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                }
                if manager.get(&session.id).is_none() {
                    return;
                }
                if !manager.inner.tmux.has_session(&session.tmux_target).await {
                    tracing::info!("session {}: tmux session exited, cleaning up", session.id);
                    manager.remove_dead(&session.id);
                    return;
                }
                let proc = manager.inner.tmux.current_command(&session.tmux_target).await;
                session.set_current_process(proc);
            }
        });
    }

    /// Remove a session whose tmux side already died.
    fn remove_dead(&self, id: &str) {
        let removed = self.inner.sessions.write().remove(id);
        if let Some(session) = removed {
            session.kill_ttyd();
            session.cancelled.cancel();
            self.maybe_reset_counters();
            let _ = self
                .inner
                .events
                .send(SessionEvent::Destroyed { id: id.to_string() });
        }
    }

    /// Explicitly close a session: kill ttyd and the tmux session
    /// synchronously, then drop the record.
    pub async fn close(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .inner
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.kill_ttyd();
        if let Err(e) = self.inner.tmux.kill_session(&session.tmux_target).await {
            tracing::debug!("kill-session {}: {}", session.tmux_target, e);
        }
        session.cancelled.cancel();
        self.maybe_reset_counters();
        let _ = self
            .inner
            .events
            .send(SessionEvent::Destroyed { id: id.to_string() });
        tracing::info!("closed session {}", id);
        Ok(())
    }

    pub fn rename(&self, id: &str, name: &str) -> Result<SessionInfo, SessionError> {
        let sessions = self.inner.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.set_name(name.to_string());
        Ok(session.info())
    }

    /// Validate a keys request and inject it into the session's tmux pane.
    ///
    /// The tmux target is reconstructed from the registry record, never taken
    /// from the request, and re-checked against the generated-name shape
    /// inside the tmux driver. Steps run in order; the first failure aborts
    /// (earlier steps stay applied).
    pub async fn send_keys(&self, id: &str, req: &KeysRequest) -> Result<(), SessionError> {
        let session = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let plan = keys::plan(req)?;

        for step in plan {
            let result = match &step {
                Step::Key(key) => self.inner.tmux.send_key(&session.tmux_target, key).await,
                Step::Text(text) => self.inner.tmux.send_text(&session.tmux_target, text).await,
            };
            result.map_err(SessionError::SendKeys)?;
        }
        Ok(())
    }

    /// When the last session closes, ports are free again: rewind the port
    /// counter to its seed and the default-name counter to zero.
    fn maybe_reset_counters(&self) {
        if self.inner.sessions.read().is_empty() {
            self.inner
                .next_port
                .store(self.inner.start_port, Ordering::Release);
            self.inner.next_name.store(0, Ordering::Release);
            tracing::info!(
                "all sessions closed, reset counters (port={}, name=0)",
                self.inner.start_port
            );
        }
    }

    /// Daemon shutdown: kill all ttyd children, destroy all tmux sessions,
    /// kill the tmux server on our socket. Transient files go when the
    /// manager's temp dir drops.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Session> = {
            let mut map = self.inner.sessions.write();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in &sessions {
            session.kill_ttyd();
            if let Err(e) = self.inner.tmux.kill_session(&session.tmux_target).await {
                tracing::debug!("kill-session {}: {}", session.tmux_target, e);
            }
            session.cancelled.cancel();
            tracing::info!("cleaned up session {}", session.id);
        }
        self.inner.tmux.kill_server().await;

        // Remove the transient files now; the TempDir handle may outlive the
        // process inside lingering Arc clones of the manager.
        if let Err(e) = std::fs::remove_dir_all(self.inner.runtime.dir.path()) {
            tracing::debug!("removing transient files: {}", e);
        }
    }
}
