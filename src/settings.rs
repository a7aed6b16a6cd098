//! User-configurable theme settings, persisted as JSON under the XDG config
//! directory. Loaded once at startup; every successful mutation through the
//! settings endpoint is written back to disk. Running sessions keep the theme
//! they were spawned with -- only future ttyd spawns see the new colors.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Multiplexer UI color scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiColors {
    pub bg_primary: String,
    pub bg_secondary: String,
    pub bg_tertiary: String,
    pub text_primary: String,
    pub text_secondary: String,
    pub text_muted: String,
    pub accent: String,
    pub accent_hover: String,
    pub border: String,
}

/// Terminal color scheme using Base24 naming.
///
/// base00=bg, base01-03=grays, base04-05=fg, base06-07=bright fg,
/// base08-0F=colors, base10-11=darker bg, base12-17=bright colors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalColors {
    pub base00: String,
    pub base01: String,
    pub base02: String,
    pub base03: String,
    pub base04: String,
    pub base05: String,
    pub base06: String,
    pub base07: String,
    pub base08: String,
    pub base09: String,
    #[serde(rename = "base0A")]
    pub base0a: String,
    #[serde(rename = "base0B")]
    pub base0b: String,
    #[serde(rename = "base0C")]
    pub base0c: String,
    #[serde(rename = "base0D")]
    pub base0d: String,
    #[serde(rename = "base0E")]
    pub base0e: String,
    #[serde(rename = "base0F")]
    pub base0f: String,
    pub base10: String,
    pub base11: String,
    pub base12: String,
    pub base13: String,
    pub base14: String,
    pub base15: String,
    pub base16: String,
    pub base17: String,
}

/// User-configurable settings: UI colors plus the terminal palette.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ui: UiColors,
    pub terminal: TerminalColors,
}

impl Default for UiColors {
    fn default() -> Self {
        Self {
            bg_primary: "#1e1e2e".into(),
            bg_secondary: "#181825".into(),
            bg_tertiary: "#313244".into(),
            text_primary: "#cdd6f4".into(),
            text_secondary: "#a6adc8".into(),
            text_muted: "#6c7086".into(),
            accent: "#89b4fa".into(),
            accent_hover: "#b4befe".into(),
            border: "#45475a".into(),
        }
    }
}

impl Default for TerminalColors {
    fn default() -> Self {
        Self {
            base00: "#1e1e2e".into(), // Background
            base01: "#181825".into(), // Lighter Background
            base02: "#313244".into(), // Selection
            base03: "#45475a".into(), // Comments
            base04: "#585b70".into(), // Dark Foreground
            base05: "#cdd6f4".into(), // Foreground
            base06: "#f5e0dc".into(), // Light Foreground
            base07: "#ffffff".into(), // Lightest
            base08: "#f38ba8".into(), // Red
            base09: "#fab387".into(), // Orange
            base0a: "#f9e2af".into(), // Yellow
            base0b: "#a6e3a1".into(), // Green
            base0c: "#94e2d5".into(), // Cyan
            base0d: "#89b4fa".into(), // Blue
            base0e: "#cba6f7".into(), // Magenta
            base0f: "#f2cdcd".into(), // Brown
            base10: "#11111b".into(), // Darker Background
            base11: "#0a0a0f".into(), // Darkest Background
            base12: "#f38ba8".into(), // Bright Red
            base13: "#f9e2af".into(), // Bright Yellow
            base14: "#a6e3a1".into(), // Bright Green
            base15: "#94e2d5".into(), // Bright Cyan
            base16: "#89b4fa".into(), // Bright Blue
            base17: "#cba6f7".into(), // Bright Magenta
        }
    }
}

fn or_default(value: &mut String, default: String) {
    if value.is_empty() {
        *value = default;
    }
}

impl Settings {
    /// Fill any empty color fields with the default palette.
    ///
    /// POSTed settings may carry a subset of fields; an empty string means
    /// "revert to default" rather than "black".
    pub fn merge_with_defaults(&mut self) {
        let d = Settings::default();

        or_default(&mut self.ui.bg_primary, d.ui.bg_primary);
        or_default(&mut self.ui.bg_secondary, d.ui.bg_secondary);
        or_default(&mut self.ui.bg_tertiary, d.ui.bg_tertiary);
        or_default(&mut self.ui.text_primary, d.ui.text_primary);
        or_default(&mut self.ui.text_secondary, d.ui.text_secondary);
        or_default(&mut self.ui.text_muted, d.ui.text_muted);
        or_default(&mut self.ui.accent, d.ui.accent);
        or_default(&mut self.ui.accent_hover, d.ui.accent_hover);
        or_default(&mut self.ui.border, d.ui.border);

        or_default(&mut self.terminal.base00, d.terminal.base00);
        or_default(&mut self.terminal.base01, d.terminal.base01);
        or_default(&mut self.terminal.base02, d.terminal.base02);
        or_default(&mut self.terminal.base03, d.terminal.base03);
        or_default(&mut self.terminal.base04, d.terminal.base04);
        or_default(&mut self.terminal.base05, d.terminal.base05);
        or_default(&mut self.terminal.base06, d.terminal.base06);
        or_default(&mut self.terminal.base07, d.terminal.base07);
        or_default(&mut self.terminal.base08, d.terminal.base08);
        or_default(&mut self.terminal.base09, d.terminal.base09);
        or_default(&mut self.terminal.base0a, d.terminal.base0a);
        or_default(&mut self.terminal.base0b, d.terminal.base0b);
        or_default(&mut self.terminal.base0c, d.terminal.base0c);
        or_default(&mut self.terminal.base0d, d.terminal.base0d);
        or_default(&mut self.terminal.base0e, d.terminal.base0e);
        or_default(&mut self.terminal.base0f, d.terminal.base0f);
        or_default(&mut self.terminal.base10, d.terminal.base10);
        or_default(&mut self.terminal.base11, d.terminal.base11);
        or_default(&mut self.terminal.base12, d.terminal.base12);
        or_default(&mut self.terminal.base13, d.terminal.base13);
        or_default(&mut self.terminal.base14, d.terminal.base14);
        or_default(&mut self.terminal.base15, d.terminal.base15);
        or_default(&mut self.terminal.base16, d.terminal.base16);
        or_default(&mut self.terminal.base17, d.terminal.base17);
    }
}

/// Default on-disk location: `{XDG_CONFIG_HOME|~/.config}/webmux/settings.json`.
pub fn settings_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webmux")
        .join("settings.json")
}

/// Errors that can occur when persisting settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to write settings to {0}: {1}")]
    WriteFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to serialize settings: {0}")]
    SerializeFailed(#[from] serde_json::Error),
}

/// Shared settings store: read by the supervisor at every ttyd spawn,
/// written only through the settings endpoint.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults on any error.
    /// A missing or unparseable file is not fatal.
    pub fn load(path: PathBuf) -> Self {
        let settings = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Settings>(&data) {
                Ok(mut s) => {
                    s.merge_with_defaults();
                    s
                }
                Err(e) => {
                    tracing::warn!("ignoring malformed settings file {}: {}", path.display(), e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };
        Self {
            path,
            inner: RwLock::new(settings),
        }
    }

    /// Snapshot the current settings.
    pub fn get(&self) -> Settings {
        self.inner.read().clone()
    }

    /// Replace the settings and persist them to disk.
    ///
    /// The in-memory value is only updated after the write succeeds, so a
    /// full disk never leaves memory and disk out of sync.
    pub fn update(&self, mut settings: Settings) -> Result<Settings, SettingsError> {
        settings.merge_with_defaults();
        save_settings(&self.path, &settings)?;
        *self.inner.write() = settings.clone();
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SettingsError::WriteFailed(path.to_path_buf(), e))?;
    }
    let data = serde_json::to_vec_pretty(settings)?;
    std::fs::write(path, data).map_err(|e| SettingsError::WriteFailed(path.to_path_buf(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644));
    }
    Ok(())
}
