// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Webhook HTTP server.
//
// The service exposes exactly two routes — `POST /webhook` and
// `GET /health` — so it runs a deliberately minimal HTTP/1.1 implementation
// directly on TCP rather than pulling in a full web framework. Requests are
// read with a hard size cap, answered with `Connection: close`, and the
// accepted event is handed to the pipeline as a detached task *after* the
// 200 response has been flushed: the caller never waits on (or learns
// about) document processing.

use std::net::SocketAddr;
use std::sync::Arc;

use filigrana_core::error::{FiligranaError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::payload;
use crate::pipeline::Pipeline;

/// Maximum accepted request size (headers + body), matching the JSON body
/// limit the service has always enforced.
const MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;

/// Maximum bytes allowed for the header section alone.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// A parsed inbound request: method, path, body.
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Webhook server with graceful shutdown.
pub struct WebhookServer {
    port: u16,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
}

impl WebhookServer {
    /// Create a server that will bind the given port (0 picks a free one).
    pub fn new(port: u16) -> Self {
        Self {
            port,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
        }
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the actual bound address. Each connection is handled in its
    /// own task; accepted events continue in the background via
    /// [`Pipeline::spawn`].
    pub async fn start(&mut self, pipeline: Arc<Pipeline>) -> Result<SocketAddr> {
        let bind_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| FiligranaError::Config(format!("bind {bind_addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| FiligranaError::Config(format!("local_addr: {e}")))?;

        info!(addr = %local_addr, "webhook server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, pipeline).await;
        });
        self.task_handle = Some(handle);

        Ok(local_addr)
    }

    /// Signal the accept loop to exit and wait for it.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown_signal.notify_one();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| FiligranaError::Config(format!("server task join: {e}")))?;
        }
        info!("webhook server stopped");
        Ok(())
    }

    /// Accept connections until the shutdown signal fires.
    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, pipeline: Arc<Pipeline>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let pipeline = Arc::clone(&pipeline);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, pipeline).await {
                                    warn!(peer = %peer_addr, error = %e, "connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

/// Read one HTTP/1.1 request off the stream: request line, headers,
/// Content-Length body.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<HttpRequest> {
    use std::io::{Error, ErrorKind};

    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    // Read until the end of headers.
    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(Error::new(ErrorKind::InvalidData, "header section too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::new(ErrorKind::UnexpectedEof, "connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = headers.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "missing method"))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "missing path"))?
        .to_string();

    let content_length = lines
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > MAX_REQUEST_BYTES {
        return Err(Error::new(ErrorKind::InvalidData, "body exceeds request limit"));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::new(ErrorKind::UnexpectedEof, "connection closed mid-body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, path, body })
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Write a JSON response and close the connection.
async fn write_json(
    stream: &mut TcpStream,
    status_line: &str,
    body: &serde_json::Value,
) -> std::io::Result<()> {
    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {status_line}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {payload}",
        payload.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Handle one connection: route, respond, detach processing.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
) -> std::io::Result<()> {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "malformed request");
            return write_json(
                &mut stream,
                "400 Bad Request",
                &serde_json::json!({ "error": "malformed request" }),
            )
            .await;
        }
    };

    debug!(peer = %peer_addr, method = %request.method, path = %request.path, "request");

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            write_json(&mut stream, "200 OK", &serde_json::json!({ "ok": true })).await
        }

        ("POST", "/webhook") => match payload::parse_event(&request.body) {
            Ok(event) => {
                // Acknowledge first; the pipeline runs unobserved.
                write_json(
                    &mut stream,
                    "200 OK",
                    &serde_json::json!({ "ok": true, "message": "Procesando en segundo plano." }),
                )
                .await?;
                pipeline.spawn(event);
                Ok(())
            }
            Err(e) => {
                write_json(
                    &mut stream,
                    "400 Bad Request",
                    &serde_json::json!({ "error": e.to_string() }),
                )
                .await
            }
        },

        _ => {
            write_json(
                &mut stream,
                "404 Not Found",
                &serde_json::json!({ "error": "not found" }),
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::RecordingTransport;
    use filigrana_core::config::AppConfig;
    use filigrana_delivery::transport::MailTransport;

    async fn start_test_server() -> (WebhookServer, SocketAddr, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.pipeline.data_dir = tmp.path().join("data");

        let transport: Arc<dyn MailTransport> = Arc::new(RecordingTransport::new());
        let pipeline = Arc::new(Pipeline::new(config, transport).unwrap());

        let mut server = WebhookServer::new(0);
        let addr = server.start(pipeline).await.unwrap();
        (server, addr, tmp)
    }

    async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    fn post(body: &str) -> String {
        format!(
            "POST /webhook HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn health_check_answers_ok() {
        let (mut server, addr, _tmp) = start_test_server().await;

        let response = roundtrip(addr, "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains(r#"{"ok":true}"#));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_fields_get_a_400() {
        let (mut server, addr, _tmp) = start_test_server().await;

        let response = roundtrip(addr, &post(r#"{ "fullName": "Ana Ruiz" }"#)).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(response.contains("error"));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn valid_event_is_acknowledged_immediately() {
        let (mut server, addr, _tmp) = start_test_server().await;

        // Unmapped offer: the 200 arrives even though nothing will ship.
        let body = r#"{ "fullName": "Ana Ruiz", "email": "ana@example.com", "offer": { "title": "Mystery" } }"#;
        let response = roundtrip(addr, &post(body)).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Procesando en segundo plano."));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (mut server, addr, _tmp) = start_test_server().await;

        let response = roundtrip(addr, "GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn array_payload_is_accepted() {
        let (mut server, addr, _tmp) = start_test_server().await;

        let body = r#"[{ "member": { "name": "Bob Vance", "email": "bob@example.com" } }]"#;
        let response = roundtrip(addr, &post(body)).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        server.stop().await.unwrap();
    }
}
