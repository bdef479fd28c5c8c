use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Minimum and maximum accepted PTY dimensions.
pub const MIN_DIM: u16 = 1;
pub const MAX_DIM: u16 = 500;

/// 8 lowercase hex characters, unique within a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId([u8; 8]);

impl SessionId {
    /// Generate a fresh id from a random `u32`. Collision retry is the
    /// caller's responsibility.
    pub fn generate(entropy: u32) -> Self {
        let hex = format!("{:08x}", entropy);
        Self::parse(&hex).expect("8-char hex formatting is always valid")
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(Error::InvalidArgument(format!(
                "session id must be 8 lowercase hex characters, got {s:?}"
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(s.as_bytes());
        Ok(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("constructed only from ASCII hex")
    }

    /// The 8 raw ASCII bytes, as embedded in mux frame headers.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// The all-zero padding used for mux frames with no session context.
    pub fn from_header_bytes(bytes: &[u8; 8]) -> Option<Self> {
        if bytes == &[0u8; 8] {
            return None;
        }
        let s = std::str::from_utf8(bytes).ok()?;
        Self::parse(s).ok()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.as_str().to_string()
    }
}

/// Tag identifying the shell family a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Pwsh,
    Powershell,
    Cmd,
    Bash,
    Zsh,
    Fish,
    Sh,
}

impl ShellKind {
    /// Resolve from a shell executable path/name, falling back to `Sh`.
    pub fn from_program(program: &str) -> Self {
        let name = program.rsplit('/').next().unwrap_or(program);
        let name = name.rsplit('\\').next().unwrap_or(name);
        match name {
            "pwsh" => ShellKind::Pwsh,
            "powershell" | "powershell.exe" => ShellKind::Powershell,
            "cmd" | "cmd.exe" => ShellKind::Cmd,
            "bash" => ShellKind::Bash,
            "zsh" => ShellKind::Zsh,
            "fish" => ShellKind::Fish,
            _ => ShellKind::Sh,
        }
    }

    pub fn default_program(&self) -> &'static str {
        match self {
            ShellKind::Pwsh => "pwsh",
            ShellKind::Powershell => "powershell.exe",
            ShellKind::Cmd => "cmd.exe",
            ShellKind::Bash => "bash",
            ShellKind::Zsh => "zsh",
            ShellKind::Fish => "fish",
            ShellKind::Sh => "sh",
        }
    }
}

/// Validate PTY dimensions against the [1, 500] range.
pub fn validate_dimensions(cols: u16, rows: u16) -> Result<()> {
    if !(MIN_DIM..=MAX_DIM).contains(&cols) || !(MIN_DIM..=MAX_DIM).contains(&rows) {
        return Err(Error::InvalidArgument(format!(
            "cols/rows must be within [{MIN_DIM}, {MAX_DIM}], got ({cols}, {rows})"
        )));
    }
    Ok(())
}

/// Maximum length of a (trimmed) user-supplied session name.
pub const MAX_NAME_LEN: usize = 256;

pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim().to_string();
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "name too long: {} chars (max {MAX_NAME_LEN})",
            trimmed.len()
        )));
    }
    Ok(trimmed)
}

/// The foreground-process record tracked per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundInfo {
    pub pid: Option<u32>,
    pub name: Option<String>,
    #[serde(rename = "commandLine")]
    pub command_line: Option<String>,
    pub cwd: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_hex_id() {
        let id = SessionId::parse("a1b2c3d4").unwrap();
        assert_eq!(id.as_str(), "a1b2c3d4");
    }

    #[test]
    fn rejects_uppercase_or_wrong_length() {
        assert!(SessionId::parse("A1B2C3D4").is_err());
        assert!(SessionId::parse("a1b2c3d").is_err());
        assert!(SessionId::parse("a1b2c3d44").is_err());
        assert!(SessionId::parse("zzzzzzzz").is_err());
    }

    #[test]
    fn header_bytes_roundtrip() {
        let id = SessionId::parse("deadbeef").unwrap();
        let bytes = *id.as_bytes();
        assert_eq!(SessionId::from_header_bytes(&bytes), Some(id));
        assert_eq!(SessionId::from_header_bytes(&[0u8; 8]), None);
    }

    #[test]
    fn dimension_bounds() {
        assert!(validate_dimensions(80, 24).is_ok());
        assert!(validate_dimensions(0, 24).is_err());
        assert!(validate_dimensions(80, 501).is_err());
        assert!(validate_dimensions(500, 500).is_ok());
    }

    #[test]
    fn shell_kind_from_program() {
        assert_eq!(ShellKind::from_program("/bin/zsh"), ShellKind::Zsh);
        assert_eq!(ShellKind::from_program("C:\\Windows\\System32\\cmd.exe"), ShellKind::Cmd);
        assert_eq!(ShellKind::from_program("/usr/bin/env"), ShellKind::Sh);
    }
}
