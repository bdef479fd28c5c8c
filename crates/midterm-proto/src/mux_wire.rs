//! Binary frame format for the per-client Mux WebSocket.
//!
//! Every message is a 9-byte header (1 byte type + 8 ASCII session-id bytes,
//! zero-padded when there is no session context) followed by a type-specific
//! payload. Numeric fields in the payload are little-endian.

use crate::error::{Error, Result};
use crate::session::{ForegroundInfo, SessionId};

pub const HEADER_LEN: usize = 9;

pub const TYPE_OUTPUT: u8 = 0x01;
pub const TYPE_INPUT: u8 = 0x02;
pub const TYPE_RESIZE: u8 = 0x03;
pub const TYPE_RESYNC: u8 = 0x05;
pub const TYPE_BUFFER_REQUEST: u8 = 0x06;
pub const TYPE_COMPRESSED_OUTPUT: u8 = 0x07;
pub const TYPE_ACTIVE_SESSION_HINT: u8 = 0x08;
pub const TYPE_FOREGROUND_CHANGE: u8 = 0x0A;
pub const TYPE_DATA_LOSS: u8 = 0x0B;
pub const TYPE_INIT: u8 = 0xFF;

/// Mux protocol version this build speaks.
pub const PROTOCOL_VERSION: u16 = 1;

/// A decoded Mux frame, with its session-id header field split out since
/// not every variant carries one in its payload.
#[derive(Debug, Clone)]
pub enum MuxFrame {
    /// server→client: `cols:u16 LE, rows:u16 LE, data...`
    Output { cols: u16, rows: u16, data: Vec<u8> },
    /// client→server: raw bytes for the PTY.
    Input { data: Vec<u8> },
    /// client→server: `cols:u16 LE, rows:u16 LE`.
    Resize { cols: u16, rows: u16 },
    /// server→client: no payload.
    Resync,
    /// client→server: no payload.
    BufferRequest,
    /// server→client: `cols:u16 LE, rows:u16 LE, uncompressed_len:u32 LE, gzip_bytes...`
    CompressedOutput {
        cols: u16,
        rows: u16,
        uncompressed_len: u32,
        gzip_bytes: Vec<u8>,
    },
    /// client→server: the session id lives in the header (all-zero clears it).
    ActiveSessionHint,
    /// server→client: UTF-8 JSON of the foreground record.
    ForegroundChange(ForegroundInfo),
    /// server→client: `dropped_bytes:u32 LE`.
    DataLoss { dropped_bytes: u32 },
    /// server→client: `protocol_version:u16 LE, full_client_id:32 bytes`.
    Init {
        protocol_version: u16,
        full_client_id: [u8; 32],
    },
}

impl MuxFrame {
    fn msg_type(&self) -> u8 {
        match self {
            MuxFrame::Output { .. } => TYPE_OUTPUT,
            MuxFrame::Input { .. } => TYPE_INPUT,
            MuxFrame::Resize { .. } => TYPE_RESIZE,
            MuxFrame::Resync => TYPE_RESYNC,
            MuxFrame::BufferRequest => TYPE_BUFFER_REQUEST,
            MuxFrame::CompressedOutput { .. } => TYPE_COMPRESSED_OUTPUT,
            MuxFrame::ActiveSessionHint => TYPE_ACTIVE_SESSION_HINT,
            MuxFrame::ForegroundChange(_) => TYPE_FOREGROUND_CHANGE,
            MuxFrame::DataLoss { .. } => TYPE_DATA_LOSS,
            MuxFrame::Init { .. } => TYPE_INIT,
        }
    }

    /// Encode a complete WebSocket binary message: 9-byte header + payload.
    pub fn encode(&self, session_id: Option<SessionId>) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16);
        out.push(self.msg_type());
        match session_id {
            Some(id) => out.extend_from_slice(id.as_bytes()),
            None => out.extend_from_slice(&[0u8; 8]),
        }
        match self {
            MuxFrame::Output { cols, rows, data } => {
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&rows.to_le_bytes());
                out.extend_from_slice(data);
            }
            MuxFrame::Input { data } => out.extend_from_slice(data),
            MuxFrame::Resize { cols, rows } => {
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&rows.to_le_bytes());
            }
            MuxFrame::Resync | MuxFrame::BufferRequest | MuxFrame::ActiveSessionHint => {}
            MuxFrame::CompressedOutput {
                cols,
                rows,
                uncompressed_len,
                gzip_bytes,
            } => {
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&rows.to_le_bytes());
                out.extend_from_slice(&uncompressed_len.to_le_bytes());
                out.extend_from_slice(gzip_bytes);
            }
            MuxFrame::ForegroundChange(info) => {
                // infallible: ForegroundInfo has no non-serializable fields
                out.extend_from_slice(&serde_json::to_vec(info).unwrap_or_default());
            }
            MuxFrame::DataLoss { dropped_bytes } => {
                out.extend_from_slice(&dropped_bytes.to_le_bytes());
            }
            MuxFrame::Init {
                protocol_version,
                full_client_id,
            } => {
                out.extend_from_slice(&protocol_version.to_le_bytes());
                out.extend_from_slice(full_client_id);
            }
        }
        out
    }

    /// Decode a complete WebSocket binary message into a frame and its
    /// header session id (`None` when the header id field is all-zero).
    pub fn decode(bytes: &[u8]) -> Result<(Self, Option<SessionId>)> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::ProtocolViolation(format!(
                "mux frame shorter than {HEADER_LEN}-byte header"
            )));
        }
        let msg_type = bytes[0];
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&bytes[1..9]);
        let session_id = SessionId::from_header_bytes(&id_bytes);
        let payload = &bytes[HEADER_LEN..];

        let frame = match msg_type {
            TYPE_OUTPUT => {
                require_len(payload, 4)?;
                MuxFrame::Output {
                    cols: le_u16(payload, 0),
                    rows: le_u16(payload, 2),
                    data: payload[4..].to_vec(),
                }
            }
            TYPE_INPUT => MuxFrame::Input { data: payload.to_vec() },
            TYPE_RESIZE => {
                require_len(payload, 4)?;
                MuxFrame::Resize {
                    cols: le_u16(payload, 0),
                    rows: le_u16(payload, 2),
                }
            }
            TYPE_RESYNC => MuxFrame::Resync,
            TYPE_BUFFER_REQUEST => MuxFrame::BufferRequest,
            TYPE_COMPRESSED_OUTPUT => {
                require_len(payload, 8)?;
                let uncompressed_len = le_u32(payload, 4);
                MuxFrame::CompressedOutput {
                    cols: le_u16(payload, 0),
                    rows: le_u16(payload, 2),
                    uncompressed_len,
                    gzip_bytes: payload[8..].to_vec(),
                }
            }
            TYPE_ACTIVE_SESSION_HINT => MuxFrame::ActiveSessionHint,
            TYPE_FOREGROUND_CHANGE => {
                let info = serde_json::from_slice(payload).map_err(|e| {
                    Error::ProtocolViolation(format!("decoding ForegroundChange: {e}"))
                })?;
                MuxFrame::ForegroundChange(info)
            }
            TYPE_DATA_LOSS => {
                require_len(payload, 4)?;
                MuxFrame::DataLoss {
                    dropped_bytes: le_u32(payload, 0),
                }
            }
            TYPE_INIT => {
                require_len(payload, 34)?;
                let mut full_client_id = [0u8; 32];
                full_client_id.copy_from_slice(&payload[2..34]);
                MuxFrame::Init {
                    protocol_version: le_u16(payload, 0),
                    full_client_id,
                }
            }
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "unknown mux frame type 0x{other:02x}"
                )))
            }
        };
        Ok((frame, session_id))
    }
}

fn require_len(payload: &[u8], min: usize) -> Result<()> {
    if payload.len() < min {
        return Err(Error::ProtocolViolation(format!(
            "mux frame payload too short: need >= {min} bytes, got {}",
            payload.len()
        )));
    }
    Ok(())
}

fn le_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn le_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_roundtrip_with_session_id() {
        let id = SessionId::parse("a1b2c3d4").unwrap();
        let frame = MuxFrame::Output {
            cols: 80,
            rows: 24,
            data: b"hello".to_vec(),
        };
        let bytes = frame.encode(Some(id));
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 5);
        let (decoded, decoded_id) = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(decoded_id, Some(id));
        match decoded {
            MuxFrame::Output { cols, rows, data } => {
                assert_eq!(cols, 80);
                assert_eq!(rows, 24);
                assert_eq!(data, b"hello");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn init_has_no_session_id() {
        let frame = MuxFrame::Init {
            protocol_version: PROTOCOL_VERSION,
            full_client_id: [7u8; 32],
        };
        let bytes = frame.encode(None);
        let (decoded, id) = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(id, None);
        match decoded {
            MuxFrame::Init { protocol_version, full_client_id } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(full_client_id, [7u8; 32]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn active_session_hint_clears_with_zero_id() {
        let frame = MuxFrame::ActiveSessionHint;
        let bytes = frame.encode(None);
        let (_, id) = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(id, None);
    }

    #[test]
    fn short_frame_is_protocol_violation() {
        assert!(MuxFrame::decode(&[0x01, 0, 0]).is_err());
    }

    #[test]
    fn compressed_output_roundtrip() {
        let frame = MuxFrame::CompressedOutput {
            cols: 80,
            rows: 24,
            uncompressed_len: 4096,
            gzip_bytes: vec![1, 2, 3],
        };
        let bytes = frame.encode(None);
        let (decoded, _) = MuxFrame::decode(&bytes).unwrap();
        match decoded {
            MuxFrame::CompressedOutput { uncompressed_len, gzip_bytes, .. } => {
                assert_eq!(uncompressed_len, 4096);
                assert_eq!(gzip_bytes, vec![1, 2, 3]);
            }
            _ => panic!("wrong variant"),
        }
    }
}
