//! Monoio-native HTTPS client
//!
//! HTTP/1.1 over rustls on a monoio `TcpStream`. One connection per request
//! (`Connection: close`); responses may be length-delimited, chunked, or
//! delimited by connection close. Every request is bounded by a timeout.

use crate::errors::{ExchangeError, Result};
use omnisync_core::PerfTimer;

use monoio::io::{AsyncReadRent, AsyncWriteRentExt, CancelableAsyncReadRent, Canceller};
use monoio::net::TcpStream;
use monoio::time::Instant;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const READ_CHUNK: usize = 8192;

/// io_uring reports a cancelled op as ECANCELED
const ECANCELED: i32 = 125;

/// Build a client TLS config trusting the webpki roots
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// Monoio-native HTTPS client
#[derive(Clone)]
pub struct MonoioHttpsClient {
    tls_config: Arc<ClientConfig>,
    timeout: Duration,
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl MonoioHttpsClient {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            tls_config: default_tls_config(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        self.request("GET", url, None, headers).await
    }

    /// Send a request and wait at most the configured timeout for the full response
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        match monoio::time::timeout(self.timeout, self.request_inner(method, url, body, headers)).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout(format!(
                "{method} {url} exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn request_inner(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let _timer = PerfTimer::start("https_request");

        let parsed_url = url::Url::parse(url)?;
        let host = parsed_url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl("No host in URL".to_string()))?;
        let port = parsed_url.port().unwrap_or(443);

        let mut path_and_query = parsed_url.path().to_string();
        if path_and_query.is_empty() {
            path_and_query.push('/');
        }
        if let Some(query) = parsed_url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let mut tls_stream = TlsStream::connect(self.tls_config.clone(), host, port).await?;

        let content_length = body.map(|b| b.len()).unwrap_or(0);
        let mut request = format!(
            "{method} {path_and_query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: omnisync/0.1\r\n\
             Accept: application/json\r\n\
             Connection: close\r\n\
             Content-Length: {content_length}\r\n"
        );
        for (key, value) in headers {
            request.push_str(&format!("{key}: {value}\r\n"));
        }
        request.push_str("\r\n");
        if let Some(body) = body {
            request.push_str(body);
        }

        debug!("📡 {} {}", method, parsed_url.path());
        tls_stream.write_all(request.as_bytes()).await?;

        let response_data = tls_stream.read_to_end().await?;
        parse_http_response(&response_data)
    }
}

/// Split a raw HTTP/1.1 response into status, headers and decoded body
pub fn parse_http_response(data: &[u8]) -> Result<HttpResponse> {
    let header_end = find_subsequence(data, b"\r\n\r\n").ok_or_else(|| {
        ExchangeError::NetworkError("Invalid HTTP response: no header terminator".to_string())
    })?;

    let header_part = String::from_utf8_lossy(&data[..header_end]);
    let raw_body = &data[header_end + 4..];

    let mut lines = header_part.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| ExchangeError::NetworkError("Empty response".to_string()))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ExchangeError::NetworkError("Invalid status line".to_string()))?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let chunked = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked")
    });

    let body_bytes = if chunked {
        decode_chunked(raw_body)?
    } else {
        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok());
        match length {
            Some(len) if len <= raw_body.len() => raw_body[..len].to_vec(),
            _ => raw_body.to_vec(),
        }
    };

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body_bytes).into_owned(),
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    loop {
        let line_end = find_subsequence(data, b"\r\n")
            .ok_or_else(|| ExchangeError::NetworkError("Truncated chunk header".to_string()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        // Chunk extensions follow a ';'
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ExchangeError::NetworkError(format!("Invalid chunk size: {size_hex}")))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(ExchangeError::NetworkError("Truncated chunk body".to_string()));
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size..];
        if data.starts_with(b"\r\n") {
            data = &data[2..];
        }
    }
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// rustls client session driven over a monoio TCP stream
pub struct TlsStream {
    stream: TcpStream,
    tls_conn: ClientConnection,
    write_buf: Vec<u8>,
    handshake_complete: bool,
}

impl TlsStream {
    /// Open TCP, then complete the TLS handshake
    pub async fn connect(config: Arc<ClientConfig>, host: &str, port: u16) -> Result<Self> {
        let tcp_stream = TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("TCP connect failed: {e}")))?;
        // Latency over throughput for small JSON frames
        let _ = tcp_stream.set_nodelay(true);

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ExchangeError::NetworkError(format!("Invalid server name: {e:?}")))?;
        let tls_conn = ClientConnection::new(config, server_name)
            .map_err(|e| ExchangeError::NetworkError(format!("TLS setup failed: {e}")))?;

        let mut tls_stream = Self {
            stream: tcp_stream,
            tls_conn,
            write_buf: Vec::with_capacity(READ_CHUNK),
            handshake_complete: false,
        };
        tls_stream.complete_handshake().await?;
        Ok(tls_stream)
    }

    async fn complete_handshake(&mut self) -> Result<()> {
        if self.handshake_complete {
            return Ok(());
        }

        loop {
            self.flush_tls().await?;

            if !self.tls_conn.is_handshaking() {
                self.handshake_complete = true;
                return Ok(());
            }

            if self.tls_conn.wants_read() {
                if self.fill_tls().await? == 0 {
                    return Err(ExchangeError::NetworkError(
                        "Connection closed during handshake".to_string(),
                    ));
                }
            } else if !self.tls_conn.wants_write() {
                return Err(ExchangeError::NetworkError("TLS handshake stalled".to_string()));
            }
        }
    }

    /// Push pending TLS records to the socket
    async fn flush_tls(&mut self) -> Result<()> {
        while self.tls_conn.wants_write() {
            self.write_buf.clear();
            let tls_bytes = self
                .tls_conn
                .write_tls(&mut self.write_buf)
                .map_err(|e| ExchangeError::NetworkError(format!("TLS write failed: {e}")))?;

            if tls_bytes > 0 {
                let buf = std::mem::take(&mut self.write_buf);
                let (result, buf) = self.stream.write_all(buf).await;
                self.write_buf = buf;
                result.map_err(|e| ExchangeError::NetworkError(format!("TCP write failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Read one TCP chunk into the TLS session; returns bytes read (0 on EOF)
    async fn fill_tls(&mut self) -> Result<usize> {
        let buffer = vec![0u8; READ_CHUNK];
        let (result, buf) = self.stream.read(buffer).await;
        let bytes_read =
            result.map_err(|e| ExchangeError::NetworkError(format!("TCP read failed: {e}")))?;
        self.absorb_tls(&buf[..bytes_read]).await?;
        Ok(bytes_read)
    }

    /// `fill_tls` that gives up at `deadline` with `None`
    async fn fill_tls_until(&mut self, deadline: Instant) -> Result<Option<usize>> {
        let chunk = read_chunk_until(&mut self.stream, deadline)
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("TCP read failed: {e}")))?;
        match chunk {
            Some(bytes) => {
                self.absorb_tls(&bytes).await?;
                Ok(Some(bytes.len()))
            }
            None => Ok(None),
        }
    }

    async fn absorb_tls(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let mut cursor = std::io::Cursor::new(bytes);
        while (cursor.position() as usize) < bytes.len() {
            self.tls_conn
                .read_tls(&mut cursor)
                .map_err(|e| ExchangeError::NetworkError(format!("TLS read failed: {e}")))?;
            self.tls_conn
                .process_new_packets()
                .map_err(|e| ExchangeError::NetworkError(format!("TLS process failed: {e}")))?;
        }
        // Key updates and alerts may need an answer
        self.flush_tls().await
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.complete_handshake().await?;

        self.tls_conn
            .writer()
            .write_all(data)
            .map_err(|e| ExchangeError::NetworkError(format!("TLS application write failed: {e}")))?;
        self.flush_tls().await
    }

    /// Read decrypted bytes; `Ok(0)` means the peer closed the connection
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.complete_handshake().await?;

        loop {
            if let Some(n) = self.read_plaintext(buf)? {
                return Ok(n);
            }
            if self.fill_tls().await? == 0 {
                return Ok(0);
            }
        }
    }

    /// `read` bounded by `deadline`; `Ok(None)` once it passes with no
    /// plaintext available. Nothing buffered is lost on timeout.
    pub async fn read_until(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<Option<usize>> {
        let Some(deadline) = deadline else {
            return self.read(buf).await.map(Some);
        };
        self.complete_handshake().await?;

        loop {
            if let Some(n) = self.read_plaintext(buf)? {
                return Ok(Some(n));
            }
            match self.fill_tls_until(deadline).await? {
                None => return Ok(None),
                Some(0) => return Ok(Some(0)),
                Some(_) => {}
            }
        }
    }

    /// Decrypted bytes already held by rustls; `None` when it needs more input
    fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.tls_conn.reader().read(buf) {
            Ok(n) if n > 0 => Ok(Some(n)),
            // close_notify received
            Ok(_) => Ok(Some(0)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Some(0)),
            Err(e) => Err(ExchangeError::NetworkError(format!("TLS read failed: {e}"))),
        }
    }

    async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut response_data = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(response_data);
            }
            response_data.extend_from_slice(&chunk[..n]);
        }
    }
}

/// One socket read bounded by `deadline`; `None` if nothing arrived.
///
/// The read is cancelled through the driver and then awaited to completion,
/// so bytes the kernel handed over before the cancel landed are returned
/// rather than dropped with the op.
async fn read_chunk_until<S: CancelableAsyncReadRent>(
    stream: &mut S,
    deadline: Instant,
) -> std::io::Result<Option<Vec<u8>>> {
    let canceller = Canceller::new();
    let read = stream.cancelable_read(vec![0u8; READ_CHUNK], canceller.handle());
    let mut read = std::pin::pin!(read);
    let timer = monoio::time::sleep_until(deadline);
    let mut timer = std::pin::pin!(timer);

    let (result, mut buf) = monoio::select! {
        done = &mut read => done,
        _ = &mut timer => {
            let _ = canceller.cancel();
            read.await
        }
    };
    match result {
        Ok(n) => {
            buf.truncate(n);
            Ok(Some(buf))
        }
        Err(e) if is_cancelled(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_cancelled(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::Interrupted || err.raw_os_error() == Some(ECANCELED)
}
