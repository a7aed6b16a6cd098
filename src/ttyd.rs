//! Web-terminal child processes. One ttyd per session, bound to a loopback
//! port; every browser connection it accepts runs `tmux attach-session`, so
//! closing the browser tab never kills the TTY.

use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::settings::TerminalColors;
use crate::tmux::TmuxControl;

/// Build the xterm.js theme JSON for ttyd from a Base24 palette.
///
/// Mapping: background=base00, foreground=base05, cursor=base06,
/// cursorAccent=base00, selection=base02, black=base03, red=base08,
/// green=base0B, yellow=base0A, blue=base0D, magenta=base0E, cyan=base0C,
/// white=base06, brightBlack=base04, bright colors=base12..base17,
/// brightWhite=base07.
pub fn theme_json(colors: &TerminalColors) -> String {
    serde_json::json!({
        "background": colors.base00,
        "foreground": colors.base05,
        "cursor": colors.base06,
        "cursorAccent": colors.base00,
        "selection": colors.base02,
        "black": colors.base03,
        "red": colors.base08,
        "green": colors.base0b,
        "yellow": colors.base0a,
        "blue": colors.base0d,
        "magenta": colors.base0e,
        "cyan": colors.base0c,
        "white": colors.base06,
        "brightBlack": colors.base04,
        "brightRed": colors.base12,
        "brightGreen": colors.base14,
        "brightYellow": colors.base13,
        "brightBlue": colors.base16,
        "brightMagenta": colors.base17,
        "brightCyan": colors.base15,
        "brightWhite": colors.base07,
    })
    .to_string()
}

/// Spawn ttyd on `port`, attaching to the given tmux session on each client
/// connection. No `--once`: ttyd keeps serving and concurrent attaches share
/// the view.
pub fn spawn(
    port: u16,
    tmux: &TmuxControl,
    target: &str,
    colors: &TerminalColors,
) -> std::io::Result<Child> {
    let mut cmd = Command::new("ttyd");
    cmd.args(["--port", &port.to_string()])
        .arg("--writable")
        .args(["--client-option", "fontSize=14"])
        .args([
            "--client-option",
            "fontFamily=JetBrains Mono,Fira Code,SF Mono,Menlo,Monaco,Courier New,monospace",
        ])
        .args(["--client-option", &format!("theme={}", theme_json(colors))])
        .args(["--client-option", "disableLeaveAlert=true"])
        .args(["--client-option", "scrollback=50000"])
        .args(["--client-option", "allowProposedApi=true"])
        .args(["--client-option", "rightClickSelectsWord=true"])
        .args(tmux.attach_argv(target))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.spawn()
}

/// Poll the ttyd port with short connect timeouts until it accepts, up to
/// ~0.5s. Returns false if the port never came up; callers may still proceed
/// since the proxy retries the dial per request.
pub async fn wait_port(port: u16) -> bool {
    let addr = format!("127.0.0.1:{}", port);
    for _ in 0..50 {
        let dial = tokio::time::timeout(Duration::from_millis(10), TcpStream::connect(&addr));
        if matches!(dial.await, Ok(Ok(_))) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
