//! WebSocket opening handshake (client side).
//!
//! Sends the HTTP/1.1 upgrade request, reads the response header block and
//! requires a `101` status, `Upgrade: websocket`, and a
//! `Sec-WebSocket-Accept` derived from the key we sent. Any bytes the
//! server sent after the header block are returned so the frame decoder
//! can start from them.
//!
//! Key generation and accept derivation come from `tungstenite`; the
//! request itself and all framing are built here.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::{AppError, Result};

/// Largest response header block accepted.
const MAX_HEADER_BYTES: usize = 8192;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Perform the opening handshake on `stream`.
///
/// Returns any bytes received after the response headers.
///
/// # Errors
///
/// Returns `AppError::Bridge` if the connection closes early, the header
/// block is too large, the server does not switch protocols, or the
/// accept value does not match our key.
pub async fn client_handshake<S>(stream: &mut S, config: &BridgeConfig) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = build_request(config, &key);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| AppError::Bridge(format!("failed to send upgrade request: {e}")))?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_header_end(&buf) {
            let head = buf.split_to(end + HEADER_END.len());
            check_response(&head, &key)?;
            debug!(leftover = buf.len(), "websocket handshake complete");
            return Ok(buf);
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(AppError::Bridge("handshake response headers too large".into()));
        }
        let n = stream
            .read_buf(&mut buf)
            .await
            .map_err(|e| AppError::Bridge(format!("handshake read failed: {e}")))?;
        if n == 0 {
            return Err(AppError::Bridge(
                "connection closed during websocket handshake".into(),
            ));
        }
    }
}

fn build_request(config: &BridgeConfig, key: &str) -> String {
    let origin = if config.origin.is_empty() {
        String::new()
    } else {
        format!("Origin: {}\r\n", config.origin)
    };
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         {origin}\r\n",
        path = config.path,
        host = config.host,
        port = config.port,
    )
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len()).position(|w| w == HEADER_END)
}

fn check_response(head: &[u8], key: &str) -> Result<()> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let status = lines.next().unwrap_or_default();

    let mut parts = status.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") || code != "101" {
        return Err(AppError::Bridge(format!(
            "server refused websocket upgrade: {status}"
        )));
    }

    let mut upgraded = false;
    let mut accept = None;
    for (name, value) in lines.filter_map(|line| line.split_once(':')) {
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            upgraded = true;
        } else if name.eq_ignore_ascii_case("sec-websocket-accept") {
            accept = Some(value);
        }
    }
    if !upgraded {
        return Err(AppError::Bridge(
            "upgrade response is missing `Upgrade: websocket`".into(),
        ));
    }

    let expected = derive_accept_key(key.as_bytes());
    match accept {
        Some(value) if value == expected => Ok(()),
        Some(value) => Err(AppError::Bridge(format!(
            "Sec-WebSocket-Accept mismatch: expected {expected}, got {value}"
        ))),
        None => Err(AppError::Bridge(
            "upgrade response is missing `Sec-WebSocket-Accept`".into(),
        )),
    }
}
