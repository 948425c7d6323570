//! Monoio-native WebSocket client
//!
//! RFC 6455 framing over [`TlsStream`]. The transport layer talks to
//! connections through the [`WsConnection`] / [`WsConnector`] seams so the
//! reconnect logic can be driven by an in-memory connector in tests.

use crate::errors::{ExchangeError, Result};
use crate::http::{default_tls_config, find_subsequence, TlsStream};
use omnisync_core::{nanos, next_sequence, PerfTimer};

use async_trait::async_trait;
use base64::Engine;
use monoio::time::Instant;
use rustls::ClientConfig;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// Upper bound for a reassembled message
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// WebSocket opcode constants
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single wire frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Client frames are always masked
    pub fn client(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: Some(generate_mask()),
            payload,
        }
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::client(OpCode::Close, payload)
    }

    fn apply_mask(payload: &mut [u8], mask: &[u8; 4]) {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.payload.len() as u64;
        let mut frame = Vec::with_capacity(self.payload.len() + 14);

        let first_byte = if self.fin { 0x80 } else { 0x00 } | (self.opcode as u8);
        frame.push(first_byte);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            frame.push(mask_bit | len as u8);
        } else if len < 65536 {
            frame.push(mask_bit | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            frame.push(mask_bit | 127);
            frame.extend_from_slice(&len.to_be_bytes());
        }

        let start = frame.len() + if self.mask.is_some() { 4 } else { 0 };
        if let Some(mask) = self.mask {
            frame.extend_from_slice(&mask);
        }
        frame.extend_from_slice(&self.payload);
        if let Some(mask) = &self.mask {
            Self::apply_mask(&mut frame[start..], mask);
        }

        frame
    }

    /// Parse one frame from the front of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
    /// the number of bytes consumed.
    pub fn from_bytes(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let fin = (data[0] & 0x80) != 0;
        let opcode = OpCode::from_u8(data[0] & 0x0f).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("Invalid WebSocket opcode {:#x}", data[0] & 0x0f))
        })?;
        let masked = (data[1] & 0x80) != 0;
        let len_initial = data[1] & 0x7f;

        let mut offset = 2;
        let payload_len = match len_initial {
            0..=125 => len_initial as u64,
            126 => {
                if data.len() < offset + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as u64;
                offset += 2;
                len
            }
            _ => {
                if data.len() < offset + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[offset..offset + 8]);
                offset += 8;
                u64::from_be_bytes(bytes)
            }
        };

        if payload_len as usize > MAX_MESSAGE_BYTES {
            return Err(ExchangeError::InvalidResponse(format!(
                "WebSocket frame too large: {payload_len} bytes"
            )));
        }

        let mask = if masked {
            if data.len() < offset + 4 {
                return Ok(None);
            }
            let mask = [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]];
            offset += 4;
            Some(mask)
        } else {
            None
        };

        let end = offset + payload_len as usize;
        if data.len() < end {
            return Ok(None);
        }

        let mut payload = data[offset..end].to_vec();
        if let Some(mask) = &mask {
            Self::apply_mask(&mut payload, mask);
        }

        Ok(Some((Frame { fin, opcode, mask, payload }, end)))
    }
}

/// Mix the clock with a process sequence so masks differ between frames
fn generate_mask() -> [u8; 4] {
    let seed = nanos() ^ next_sequence().wrapping_mul(0x9e37_79b9_7f4a_7c15);
    let bytes = seed.to_le_bytes();
    [bytes[0] ^ bytes[4], bytes[1] ^ bytes[5], bytes[2] ^ bytes[6], bytes[3] ^ bytes[7]]
}

fn generate_websocket_key() -> String {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&nanos().to_be_bytes());
    key[8..].copy_from_slice(&next_sequence().wrapping_mul(0x2545_f491_4f6c_dd1d).to_be_bytes());
    base64::engine::general_purpose::STANDARD.encode(key)
}

pub fn calculate_accept_key(ws_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ws_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// A complete inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>),
}

/// An established WebSocket session
#[async_trait(?Send)]
pub trait WsConnection {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Next complete message, or `Ok(None)` once `deadline` passes.
    ///
    /// A timeout never discards input: bytes of a half-received message
    /// stay buffered for the next call. An error means the connection is
    /// gone.
    async fn recv_until(&mut self, deadline: Option<Instant>) -> Result<Option<WsMessage>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens WebSocket sessions
#[async_trait(?Send)]
pub trait WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn WsConnection>>;
}

/// wss:// connector backed by [`MonoioWebSocket`]
#[derive(Clone)]
pub struct TlsWsConnector {
    tls_config: Arc<ClientConfig>,
}

impl TlsWsConnector {
    pub fn new() -> Self {
        Self {
            tls_config: default_tls_config(),
        }
    }
}

impl Default for TlsWsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl WsConnector for TlsWsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn WsConnection>> {
        let ws = MonoioWebSocket::connect(self.tls_config.clone(), url).await?;
        Ok(Box::new(ws))
    }
}

/// Monoio-native WebSocket client
pub struct MonoioWebSocket {
    stream: TlsStream,
    connected: bool,
    close_sent: bool,
    buffer: Vec<u8>,
    /// Opcode and payload of a fragmented message in progress
    partial: Option<(OpCode, Vec<u8>)>,
}

impl MonoioWebSocket {
    pub async fn connect(tls_config: Arc<ClientConfig>, url: &Url) -> Result<Self> {
        let _timer = PerfTimer::start("websocket_connect");

        if url.scheme() != "wss" {
            return Err(ExchangeError::InvalidUrl(format!(
                "Unsupported WebSocket scheme: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl("No host in WebSocket URL".to_string()))?;
        let port = url.port().unwrap_or(443);

        info!("🔗 Connecting to WebSocket: {}", url.host_str().unwrap_or_default());
        let stream = TlsStream::connect(tls_config, host, port)
            .await
            .map_err(|e| ExchangeError::ConnectionFailed(format!("{host}:{port}: {e}")))?;
        debug!("✅ TLS established to {}:{}", host, port);

        let mut websocket = Self {
            stream,
            connected: false,
            close_sent: false,
            buffer: Vec::with_capacity(8192),
            partial: None,
        };
        websocket.perform_handshake(url, host).await?;

        info!("✅ WebSocket connection established to {}{}", host, url.path());
        Ok(websocket)
    }

    async fn perform_handshake(&mut self, url: &Url, host: &str) -> Result<()> {
        let ws_key = generate_websocket_key();

        let path = if url.path().is_empty() { "/" } else { url.path() };
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();

        let handshake_request = format!(
            "GET {path}{query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {ws_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        self.stream.write_all(handshake_request.as_bytes()).await?;

        // Frames may arrive in the same read as the response headers
        let mut chunk = vec![0u8; 4096];
        let header_end = loop {
            if let Some(pos) = find_subsequence(&self.buffer, b"\r\n\r\n") {
                break pos;
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ExchangeError::ConnectionFailed(
                    "Connection closed during WebSocket handshake".to_string(),
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        };

        let response = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        self.buffer.drain(..header_end + 4);
        validate_handshake_response(&response, &ws_key)?;

        self.connected = true;
        debug!("✅ WebSocket handshake completed");
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.connected || self.close_sent {
            return Err(ExchangeError::NetworkError("WebSocket not connected".to_string()));
        }

        self.stream.write_all(&frame.to_bytes()).await?;
        if frame.opcode == OpCode::Close {
            self.close_sent = true;
        }
        Ok(())
    }

    async fn next_frame(&mut self, deadline: Option<Instant>) -> Result<Option<Frame>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((frame, consumed)) = Frame::from_bytes(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(Some(frame));
            }

            let Some(n) = self.stream.read_until(&mut chunk, deadline).await? else {
                return Ok(None);
            };
            if n == 0 {
                self.connected = false;
                return Err(ExchangeError::ConnectionFailed(
                    "WebSocket connection closed by peer".to_string(),
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.close_sent
    }
}

fn validate_handshake_response(response: &str, ws_key: &str) -> Result<()> {
    let status_ok = response
        .lines()
        .next()
        .map(|line| line.split_whitespace().nth(1) == Some("101"))
        .unwrap_or(false);
    if !status_ok {
        return Err(ExchangeError::ConnectionFailed(format!(
            "WebSocket upgrade rejected: {}",
            response.lines().next().unwrap_or_default()
        )));
    }

    let expected = calculate_accept_key(ws_key);
    let accepted = response.lines().any(|line| {
        line.split_once(':')
            .map(|(k, v)| k.trim().eq_ignore_ascii_case("sec-websocket-accept") && v.trim() == expected)
            .unwrap_or(false)
    });
    if !accepted {
        return Err(ExchangeError::ConnectionFailed(
            "WebSocket handshake failed: invalid accept key".to_string(),
        ));
    }
    Ok(())
}

#[async_trait(?Send)]
impl WsConnection for MonoioWebSocket {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_frame(Frame::client(OpCode::Text, text.as_bytes().to_vec())).await
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.send_frame(Frame::client(OpCode::Pong, payload)).await
    }

    async fn recv_until(&mut self, deadline: Option<Instant>) -> Result<Option<WsMessage>> {
        if !self.connected {
            return Err(ExchangeError::NetworkError("WebSocket not connected".to_string()));
        }

        loop {
            let Some(frame) = self.next_frame(deadline).await? else {
                return Ok(None);
            };

            if frame.opcode.is_control() {
                return Ok(Some(match frame.opcode {
                    OpCode::Ping => WsMessage::Ping(frame.payload),
                    OpCode::Pong => WsMessage::Pong(frame.payload),
                    _ => {
                        let code = (frame.payload.len() >= 2)
                            .then(|| u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
                        if !self.close_sent {
                            let _ = self.send_frame(Frame::close(1000, "")).await;
                        }
                        self.connected = false;
                        WsMessage::Close(code)
                    }
                }));
            }

            let (opcode, payload) = match (frame.opcode, self.partial.take()) {
                (OpCode::Continuation, Some((opcode, mut data))) => {
                    data.extend_from_slice(&frame.payload);
                    if data.len() > MAX_MESSAGE_BYTES {
                        return Err(ExchangeError::InvalidResponse("Fragmented message too large".to_string()));
                    }
                    (opcode, data)
                }
                (OpCode::Continuation, None) => {
                    return Err(ExchangeError::InvalidResponse("Unexpected continuation frame".to_string()));
                }
                (opcode, _) => (opcode, frame.payload),
            };

            if !frame.fin {
                self.partial = Some((opcode, payload));
                continue;
            }

            return match opcode {
                OpCode::Text => String::from_utf8(payload)
                    .map(|text| Some(WsMessage::Text(text)))
                    .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid UTF-8 in text frame: {e}"))),
                _ => Ok(Some(WsMessage::Binary(payload))),
            };
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connected || self.close_sent {
            return Ok(());
        }

        info!("🔌 Closing WebSocket connection");
        self.send_frame(Frame::close(1000, "Normal closure")).await?;
        self.connected = false;
        Ok(())
    }
}
