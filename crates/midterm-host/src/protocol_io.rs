//! Async framed read/write over the Host IPC stream, built on
//! `midterm_proto::host_wire`'s header/payload codec the same way
//! `pty-proxy`'s `send_frame`/`read_frame` helpers wrapped its own
//! length-prefixed format.

use midterm_proto::host_wire::HostMessage;
use midterm_proto::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &HostMessage) -> Result<()> {
    let payload = msg.encode_payload()?;
    let header = HostMessage::encode_header(msg.msg_type(), payload.len())?;
    writer
        .write_all(&header)
        .await
        .map_err(|e| Error::HostStreamError(e.to_string()))?;
    writer
        .write_all(&payload)
        .await
        .map_err(|e| Error::HostStreamError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::HostStreamError(e.to_string()))?;
    Ok(())
}

/// Returns `Ok(None)` on a clean EOF at a message boundary (peer closed the
/// stream), `Err` on any mid-message disconnect or protocol violation.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<HostMessage>> {
    let mut header = [0u8; midterm_proto::host_wire::HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::HostStreamError(e.to_string())),
    }
    let (msg_type, len) = HostMessage::decode_header(&header);
    if len > midterm_proto::host_wire::MAX_PAYLOAD_LEN {
        return Err(Error::ProtocolViolation(format!(
            "declared payload length {len} exceeds max {}",
            midterm_proto::host_wire::MAX_PAYLOAD_LEN
        )));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::HostStreamError(e.to_string()))?;
    HostMessage::decode(msg_type, payload).map(Some)
}
