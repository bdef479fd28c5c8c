//! Wire format for the duplex byte stream between `midterm-server` and a
//! `midterm-host` process.
//!
//! Every message is `1 byte type + 3 byte big-endian payload length +
//! payload`. This module only encodes/decodes payloads; the byte-stream
//! framing loop lives in each binary crate since it needs an async
//! reader/writer this dependency-light crate doesn't pull in.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::{ForegroundInfo, ShellKind};

/// Header size: 1 byte type tag + 3 byte big-endian length.
pub const HEADER_LEN: usize = 4;

/// A longer payload is a protocol error and the host terminates.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

pub const TYPE_GET_INFO: u8 = 0x01;
pub const TYPE_INFO: u8 = 0x02;
pub const TYPE_INPUT: u8 = 0x03;
pub const TYPE_OUTPUT: u8 = 0x04;
pub const TYPE_RESIZE: u8 = 0x05;
pub const TYPE_GET_BUFFER: u8 = 0x06;
pub const TYPE_BUFFER: u8 = 0x07;
pub const TYPE_EXITED: u8 = 0x08;
pub const TYPE_SHUTDOWN: u8 = 0x09;
pub const TYPE_FOREGROUND_CHANGE: u8 = 0x0A;

/// `{id, pid, shellKind, isRunning, cols, rows}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoPayload {
    pub id: String,
    pub pid: u32,
    pub shell_kind: ShellKind,
    pub is_running: bool,
    pub cols: u16,
    pub rows: u16,
}

/// One message on the Host IPC stream, in either direction.
#[derive(Debug, Clone)]
pub enum HostMessage {
    GetInfo,
    Info(InfoPayload),
    Input(Vec<u8>),
    Output(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    GetBuffer,
    Buffer(Vec<u8>),
    Exited(i32),
    Shutdown,
    ForegroundChange(ForegroundInfo),
}

impl HostMessage {
    pub fn msg_type(&self) -> u8 {
        match self {
            HostMessage::GetInfo => TYPE_GET_INFO,
            HostMessage::Info(_) => TYPE_INFO,
            HostMessage::Input(_) => TYPE_INPUT,
            HostMessage::Output(_) => TYPE_OUTPUT,
            HostMessage::Resize { .. } => TYPE_RESIZE,
            HostMessage::GetBuffer => TYPE_GET_BUFFER,
            HostMessage::Buffer(_) => TYPE_BUFFER,
            HostMessage::Exited(_) => TYPE_EXITED,
            HostMessage::Shutdown => TYPE_SHUTDOWN,
            HostMessage::ForegroundChange(_) => TYPE_FOREGROUND_CHANGE,
        }
    }

    /// Encode the payload bytes (without the 4-byte header).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let payload = match self {
            HostMessage::GetInfo | HostMessage::GetBuffer | HostMessage::Shutdown => Vec::new(),
            HostMessage::Info(info) => serde_json::to_vec(info)
                .map_err(|e| Error::ProtocolViolation(format!("encoding Info: {e}")))?,
            HostMessage::Input(bytes) | HostMessage::Output(bytes) | HostMessage::Buffer(bytes) => {
                bytes.clone()
            }
            HostMessage::Resize { cols, rows } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&cols.to_be_bytes());
                buf.extend_from_slice(&rows.to_be_bytes());
                buf
            }
            HostMessage::Exited(code) => code.to_be_bytes().to_vec(),
            HostMessage::ForegroundChange(info) => serde_json::to_vec(info)
                .map_err(|e| Error::ProtocolViolation(format!("encoding ForegroundChange: {e}")))?,
        };
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::ProtocolViolation(format!(
                "payload too large: {} bytes",
                payload.len()
            )));
        }
        Ok(payload)
    }

    /// Encode the header bytes for a payload of the given length.
    pub fn encode_header(msg_type: u8, payload_len: usize) -> Result<[u8; HEADER_LEN]> {
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::ProtocolViolation(format!(
                "payload too large: {payload_len} bytes"
            )));
        }
        let len = payload_len as u32;
        let be = len.to_be_bytes(); // 4 bytes; we only keep the low 3
        Ok([msg_type, be[1], be[2], be[3]])
    }

    /// Decode a 4-byte header into (msg_type, payload_len).
    pub fn decode_header(header: &[u8; HEADER_LEN]) -> (u8, usize) {
        let msg_type = header[0];
        let len = u32::from_be_bytes([0, header[1], header[2], header[3]]);
        (msg_type, len as usize)
    }

    /// Decode a complete message from its type tag and payload bytes.
    pub fn decode(msg_type: u8, payload: Vec<u8>) -> Result<Self> {
        Ok(match msg_type {
            TYPE_GET_INFO => HostMessage::GetInfo,
            TYPE_INFO => HostMessage::Info(
                serde_json::from_slice(&payload)
                    .map_err(|e| Error::ProtocolViolation(format!("decoding Info: {e}")))?,
            ),
            TYPE_INPUT => HostMessage::Input(payload),
            TYPE_OUTPUT => HostMessage::Output(payload),
            TYPE_RESIZE => {
                if payload.len() != 4 {
                    return Err(Error::ProtocolViolation(
                        "Resize payload must be 4 bytes".into(),
                    ));
                }
                let cols = u16::from_be_bytes([payload[0], payload[1]]);
                let rows = u16::from_be_bytes([payload[2], payload[3]]);
                HostMessage::Resize { cols, rows }
            }
            TYPE_GET_BUFFER => HostMessage::GetBuffer,
            TYPE_BUFFER => HostMessage::Buffer(payload),
            TYPE_EXITED => {
                if payload.len() != 4 {
                    return Err(Error::ProtocolViolation(
                        "Exited payload must be 4 bytes".into(),
                    ));
                }
                let code = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                HostMessage::Exited(code)
            }
            TYPE_SHUTDOWN => HostMessage::Shutdown,
            TYPE_FOREGROUND_CHANGE => HostMessage::ForegroundChange(
                serde_json::from_slice(&payload)
                    .map_err(|e| Error::ProtocolViolation(format!("decoding ForegroundChange: {e}")))?,
            ),
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "unknown host message type 0x{other:02x}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_roundtrip() {
        let msg = HostMessage::Resize { cols: 120, rows: 40 };
        let payload = msg.encode_payload().unwrap();
        let decoded = HostMessage::decode(TYPE_RESIZE, payload).unwrap();
        match decoded {
            HostMessage::Resize { cols, rows } => {
                assert_eq!(cols, 120);
                assert_eq!(rows, 40);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn exited_roundtrip_negative() {
        let msg = HostMessage::Exited(-1);
        let payload = msg.encode_payload().unwrap();
        match HostMessage::decode(TYPE_EXITED, payload).unwrap() {
            HostMessage::Exited(code) => assert_eq!(code, -1),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = HostMessage::encode_header(TYPE_OUTPUT, 42).unwrap();
        assert_eq!(HostMessage::decode_header(&header), (TYPE_OUTPUT, 42));
    }

    #[test]
    fn oversized_payload_rejected() {
        let header = HostMessage::encode_header(TYPE_OUTPUT, MAX_PAYLOAD_LEN + 1);
        assert!(header.is_err());
    }

    #[test]
    fn info_payload_camel_case() {
        let info = InfoPayload {
            id: "a1b2c3d4".into(),
            pid: 42,
            shell_kind: ShellKind::Zsh,
            is_running: true,
            cols: 80,
            rows: 24,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"shellKind\""));
        assert!(json.contains("\"isRunning\""));
    }
}
