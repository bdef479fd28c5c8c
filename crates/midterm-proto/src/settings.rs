//! The flat settings record owned by the settings collaborator and consumed
//! by the core through a read-through cache.

use serde::{Deserialize, Serialize};

use crate::session::ShellKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CursorStyle {
    Block,
    Underline,
    Bar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BellStyle {
    None,
    Sound,
    Visual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClipboardPolicy {
    Auto,
    Ask,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TabTitleMode {
    ProcessName,
    StaticName,
    Sequence,
}

/// The settings record. Field set is fixed; values are owned and
/// persisted by an external collaborator — this core only reads them
/// through `SettingsCache` and reacts to `settings-changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: String,
    pub font: String,
    pub cursor_style: CursorStyle,
    pub bell_style: BellStyle,
    pub scrollback_size: u32,
    pub run_as_user: Option<String>,
    pub clipboard_policy: ClipboardPolicy,
    pub tab_title_mode: TabTitleMode,
    pub smooth_scrolling: bool,
    pub webgl: bool,
    pub minimum_contrast_ratio: f32,
    pub default_shell: Option<ShellKind>,
    pub default_cols: u16,
    pub default_rows: u16,
    pub default_working_directory: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            font: "Menlo, monospace".to_string(),
            cursor_style: CursorStyle::Block,
            bell_style: BellStyle::Sound,
            scrollback_size: 1024 * 1024,
            run_as_user: None,
            clipboard_policy: ClipboardPolicy::Ask,
            tab_title_mode: TabTitleMode::ProcessName,
            smooth_scrolling: true,
            webgl: true,
            minimum_contrast_ratio: 1.0,
            default_shell: None,
            default_cols: 80,
            default_rows: 24,
            default_working_directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serialize_camel_case() {
        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(json.contains("\"cursorStyle\""));
        assert!(json.contains("\"scrollbackSize\""));
    }
}
