//! Driver for the persistence layer (tmux). Every invocation goes through a
//! daemon-owned socket so webmux never touches the user's default tmux server.
//!
//! Sessions created here survive ttyd restarts and browser disconnects; a
//! session is gone only when its shell exits or the daemon kills it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

/// Maximum length of a generated tmux session name ("mux-NNNNN").
const MAX_TARGET_LEN: usize = 15;

/// Prefix for all tmux sessions owned by this daemon.
pub const SESSION_PREFIX: &str = "mux-";

#[derive(Debug, thiserror::Error)]
pub enum TmuxError {
    #[error("failed to run tmux: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("tmux {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("invalid tmux session target")]
    InvalidTarget,
}

/// Returns the daemon's tmux socket path.
///
/// Prefers `XDG_RUNTIME_DIR` (per-user tmpfs); falls back to the system temp
/// dir with the uid embedded so concurrent users don't collide.
pub fn default_socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("webmux-tmux.sock");
        }
    }
    let uid = unsafe { libc::getuid() };
    std::env::temp_dir().join(format!("webmux-tmux-{}.sock", uid))
}

/// A generated target is "mux-{port}"; anything else is rejected before it
/// can reach a tmux command line.
pub fn is_valid_target(name: &str) -> bool {
    if name.len() > MAX_TARGET_LEN {
        return false;
    }
    match name.strip_prefix(SESSION_PREFIX) {
        Some(suffix) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Handle on the daemon's tmux server (socket plus optional config file).
#[derive(Clone, Debug)]
pub struct TmuxControl {
    socket: PathBuf,
    config: Option<PathBuf>,
}

impl TmuxControl {
    pub fn new(socket: PathBuf, config: Option<PathBuf>) -> Self {
        Self { socket, config }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("tmux");
        cmd.arg("-S").arg(&self.socket);
        if let Some(config) = &self.config {
            cmd.arg("-f").arg(config);
        }
        cmd.kill_on_drop(false);
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<String, TmuxError> {
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(TmuxError::CommandFailed {
                command: what.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Create a detached session running `shell_argv` with the given
    /// environment and working directory.
    pub async fn new_session(
        &self,
        target: &str,
        cwd: Option<&Path>,
        env: &[(String, String)],
        shell_argv: &[String],
    ) -> Result<(), TmuxError> {
        if !is_valid_target(target) {
            return Err(TmuxError::InvalidTarget);
        }
        let mut cmd = self.command();
        cmd.args(["new-session", "-d", "-s", target, "-x", "200", "-y", "50"]);
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        if let Some(dir) = cwd {
            cmd.arg("-c").arg(dir);
        }
        cmd.args(shell_argv);
        self.run(cmd, "new-session").await.map(|_| ())
    }

    /// True if the session exists on our socket.
    pub async fn has_session(&self, target: &str) -> bool {
        if !is_valid_target(target) {
            return false;
        }
        let mut cmd = self.command();
        cmd.args(["has-session", "-t", target]);
        matches!(cmd.output().await, Ok(out) if out.status.success())
    }

    /// Poll until the session is attachable, up to ~0.5s.
    pub async fn wait_ready(&self, target: &str) -> bool {
        for _ in 0..50 {
            if self.has_session(target).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Kill one session. Errors are reported but killing a session that is
    /// already gone is not an error for callers, so most ignore the result.
    pub async fn kill_session(&self, target: &str) -> Result<(), TmuxError> {
        if !is_valid_target(target) {
            return Err(TmuxError::InvalidTarget);
        }
        let mut cmd = self.command();
        cmd.args(["kill-session", "-t", target]);
        self.run(cmd, "kill-session").await.map(|_| ())
    }

    /// Kill the entire tmux server on our socket.
    pub async fn kill_server(&self) {
        let mut cmd = self.command();
        cmd.arg("kill-server");
        let _ = cmd.output().await;
    }

    /// Send one named key (e.g. "C-c", "Enter") to the session's pane.
    pub async fn send_key(&self, target: &str, key: &str) -> Result<(), TmuxError> {
        if !is_valid_target(target) {
            return Err(TmuxError::InvalidTarget);
        }
        let mut cmd = self.command();
        cmd.args(["send-keys", "-t", target, key]);
        self.run(cmd, "send-keys").await.map(|_| ())
    }

    /// Send literal text to the session's pane. The `-l` flag stops tmux
    /// from interpreting key names or metacharacters in the payload.
    pub async fn send_text(&self, target: &str, text: &str) -> Result<(), TmuxError> {
        if !is_valid_target(target) {
            return Err(TmuxError::InvalidTarget);
        }
        let mut cmd = self.command();
        cmd.args(["send-keys", "-t", target, "-l", text]);
        self.run(cmd, "send-keys").await.map(|_| ())
    }

    /// Name of the foreground command in the session's first pane, or empty
    /// if the session is unreachable.
    pub async fn current_command(&self, target: &str) -> String {
        if !is_valid_target(target) {
            return String::new();
        }
        let mut cmd = self.command();
        cmd.args(["display-message", "-p", "-t", target, "#{pane_current_command}"]);
        match self.run(cmd, "display-message").await {
            Ok(out) => out.trim().to_string(),
            Err(_) => String::new(),
        }
    }

    /// Build the argv tail that makes ttyd attach to `target` on connect.
    pub fn attach_argv(&self, target: &str) -> Vec<String> {
        let mut argv = vec![
            "tmux".to_string(),
            "-S".to_string(),
            self.socket.display().to_string(),
        ];
        if let Some(config) = &self.config {
            argv.push("-f".to_string());
            argv.push(config.display().to_string());
        }
        argv.push("attach-session".to_string());
        argv.push("-t".to_string());
        argv.push(target.to_string());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_prefers_runtime_dir() {
        // Just shape-check the fallback; XDG_RUNTIME_DIR handling depends on
        // the environment and is covered by the branch itself.
        let path = default_socket_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("webmux-tmux"));
        assert!(name.ends_with(".sock"));
    }

    #[test]
    fn target_validation() {
        assert!(is_valid_target("mux-7701"));
        assert!(is_valid_target("mux-1"));
        assert!(!is_valid_target("other-7701"));
        assert!(!is_valid_target("mux-; rm -rf /"));
        assert!(!is_valid_target("mux-77010000000000"));
    }

    #[test]
    fn attach_argv_includes_socket_and_config() {
        let ctl = TmuxControl::new(PathBuf::from("/tmp/s.sock"), Some(PathBuf::from("/tmp/t.conf")));
        let argv = ctl.attach_argv("mux-7701");
        assert_eq!(
            argv,
            vec![
                "tmux",
                "-S",
                "/tmp/s.sock",
                "-f",
                "/tmp/t.conf",
                "attach-session",
                "-t",
                "mux-7701"
            ]
        );
    }

    #[tokio::test]
    async fn invalid_target_never_reaches_tmux() {
        let ctl = TmuxControl::new(PathBuf::from("/tmp/does-not-exist.sock"), None);
        let err = ctl.send_key("evil; whoami", "Enter").await.unwrap_err();
        assert!(matches!(err, TmuxError::InvalidTarget));
        assert!(!ctl.has_session("evil; whoami").await);
        assert_eq!(ctl.current_command("evil; whoami").await, "");
    }
}
