//! Shared wire protocol, DTOs, error taxonomy, and settings record for the
//! midterm terminal multiplexer (`midterm-host` and `midterm-server`).
//!
//! Keeping this in one crate is the point: both processes import the same
//! `host_wire`/`mux_wire` codecs so the framed protocols between them can't
//! silently drift apart.

pub mod error;
pub mod host_wire;
pub mod mux_wire;
pub mod rest_dto;
pub mod session;
pub mod settings;
pub mod state_dto;

pub use error::{Error, Result};
pub use session::{ForegroundInfo, SessionId, ShellKind};
pub use settings::Settings;
