//! webmux - a browser-based terminal multiplexer.
//!
//! A single daemon exposes a fleet of persistent shell sessions over HTTP.
//! Each session is a tmux session (TTY persistence, scrollback) fronted by a
//! ttyd process (TTY <-> WebSocket). The daemon owns the lifecycle of both
//! helpers, reverse-proxies browser traffic into ttyd under `/t/{id}/`, and
//! provides side-channels: file transfer, clipboard, a shared scratch pad,
//! marked-for-download files, theme settings, and persisted UI layout.

pub mod api;
pub mod files;
pub mod keys;
pub mod proxy;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod store;
pub mod tmux;
pub mod ttyd;
