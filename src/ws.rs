//! WebSocket carrier for STOMP frames.
//!
//! Wraps `tokio-tungstenite` so the session only ever deals in STOMP frames
//! and heart-beats. Text and binary messages are both decoded as STOMP;
//! pings are answered by tungstenite on the next read or write.
//!
//! [`connect`] offers the STOMP subprotocols and returns a
//! ([`FrameSink`], [`FrameStream`]) pair ready for use in `tokio::select!`
//! loops.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, http::header::SEC_WEBSOCKET_PROTOCOL};

use crate::constants;
use crate::stomp::{self, Decoded, Frame};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// What one WebSocket message turned into.
#[derive(Debug)]
pub enum Incoming {
    /// A text or binary message. Frames before a malformed one are kept;
    /// the rest of the message is reported in `malformed`.
    Message(Decoded),
    /// The peer sent a close frame.
    Closed {
        /// WebSocket close code (1005 when none was given).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Write half: encodes frames onto the socket.
#[derive(Debug)]
pub struct FrameSink {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl FrameSink {
    /// Encode `frame` and send it as one text message.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.write(frame.encode())
            .await
            .with_context(|| format!("failed to send {} frame", frame.command))
    }

    /// Send a heart-beat (a bare EOL).
    pub async fn heartbeat(&mut self) -> Result<()> {
        self.write("\n".to_string()).await
    }

    /// Send a close frame and shut the sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }

    async fn write(&mut self, text: String) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .context("WebSocket send failed")
    }
}

/// Read half: yields decoded STOMP traffic.
#[derive(Debug)]
pub struct FrameStream {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl FrameStream {
    /// Next decoded message, or `None` once the socket is gone.
    pub async fn next(&mut self) -> Option<Result<Incoming>> {
        loop {
            let incoming = match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => Incoming::Message(stomp::decode(&text)),
                Ok(tungstenite::Message::Binary(data)) => {
                    Incoming::Message(stomp::decode(&String::from_utf8_lossy(&data)))
                }
                Ok(tungstenite::Message::Close(close_frame)) => {
                    let (code, reason) = close_frame
                        .map_or((1005, String::new()), |cf| (cf.code.into(), cf.reason.to_string()));
                    Incoming::Closed { code, reason }
                }
                Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                ) => continue,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            return Some(Ok(incoming));
        }
    }
}

/// Open a WebSocket to `url`, offering the STOMP subprotocols.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails
/// (including a server that accepts none of the offered subprotocols).
pub async fn connect(url: &str) -> Result<(FrameSink, FrameStream)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        tungstenite::http::HeaderValue::from_static(constants::STOMP_SUBPROTOCOLS),
    );

    let (ws_stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;
    log::debug!(
        "[STOMP] WebSocket open, subprotocol {:?}",
        response.headers().get(SEC_WEBSOCKET_PROTOCOL)
    );

    let (sink, stream) = ws_stream.split();
    Ok((FrameSink { sink }, FrameStream { stream }))
}

/// WebSocket endpoint for a backend base URL.
///
/// `ws://` and `wss://` URLs are taken as the full endpoint. HTTP(S) URLs
/// get their scheme swapped and the endpoint path appended.
#[must_use]
pub fn endpoint_url(server_url: &str) -> String {
    if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        return server_url.to_string();
    }

    let base = server_url.trim_end_matches('/');
    let origin = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    };
    format!("{origin}{}", constants::WS_ENDPOINT_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_swaps_scheme_and_appends_path() {
        assert_eq!(endpoint_url("https://api.example.com/"), "wss://api.example.com/ws");
        assert_eq!(endpoint_url("http://localhost:8080"), "ws://localhost:8080/ws");
        assert_eq!(endpoint_url("chat.local:8080"), "ws://chat.local:8080/ws");
    }

    #[test]
    fn test_endpoint_url_explicit_ws_verbatim() {
        assert_eq!(endpoint_url("ws://127.0.0.1:9000/stomp"), "ws://127.0.0.1:9000/stomp");
        assert_eq!(endpoint_url("wss://chat.example.com/ws"), "wss://chat.example.com/ws");
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        assert!(connect("not-a-url").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        assert!(connect("ws://127.0.0.1:1/ws").await.is_err());
    }
}
