// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Stream server - long-lived chunked HTTP responses backed by the broadcast hub,
//! plus a small JSON API for gate status and sensitivity

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::chunked::ChunkedWriter;
use super::StreamingConfig;
use crate::core::StatusHandle;
use crate::gate::Gate;

/// Upper bound on the request line, headers and body
const MAX_REQUEST_SIZE: u64 = 8 * 1024;

const STREAM_HEADER: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/json\r\n\
Transfer-Encoding: chunked\r\n\r\n";

/// HTTP listener that turns `GET /stream` requests into hub subscribers
pub struct StreamServer {
    listener: TcpListener,
    status: StatusHandle,
    request_timeout: Duration,
}

impl StreamServer {
    pub async fn bind(config: &StreamingConfig, status: StatusHandle) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Unable to listen on {}", addr))?;

        Ok(Self {
            listener,
            status,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Stream server listening on http://{}/stream", self.local_addr()?);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let status = self.status.clone();
                            let request_timeout = self.request_timeout;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, status, request_timeout).await {
                                    debug!("Connection from {} failed: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Stream server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Request {
    method: String,
    path: String,
    query: String,
    body: String,
}

impl Request {
    /// First value of `key` in the urlencoded body, then the query string
    fn form_value(&self, key: &str) -> Option<&str> {
        [self.body.as_str(), self.query.as_str()]
            .into_iter()
            .flat_map(|form| form.split('&'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    status: StatusHandle,
    request_timeout: Duration,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_SIZE));

    let request = match time::timeout(request_timeout, read_request(&mut reader)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => None,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!("No request from {} within {:?}", addr, request_timeout);
            return respond(
                &mut write_half,
                408,
                "Request Timeout",
                json!({"error": "request timeout"}),
            )
            .await;
        }
    };
    let Some(request) = request else {
        return respond(&mut write_half, 400, "Bad Request", json!({"error": "bad request"})).await;
    };
    debug!("{} {} from {}", request.method, request.path, addr);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/stream") => {
            let sink = ChunkedWriter::new(write_half).with_head(STREAM_HEADER);
            match status.hub().subscribe(sink) {
                Ok(id) => {
                    info!("Stream opened for {} (id: {})", addr, id);
                    Ok(())
                }
                Err(sink) => {
                    warn!("Max clients reached, rejecting stream from {}", addr);
                    let mut write_half = sink.into_inner();
                    respond(
                        &mut write_half,
                        503,
                        "Service Unavailable",
                        json!({"error": "too many clients"}),
                    )
                    .await
                }
            }
        }
        ("GET", "/") => respond(&mut write_half, 200, "OK", json!({"hi": true})).await,
        ("GET", "/status") => respond(&mut write_half, 200, "OK", status.state()).await,
        (method, path) => {
            let gate = path
                .strip_prefix("/photogates/")
                .and_then(|name| status.gate(name));

            match (method, gate) {
                ("GET", Some(gate)) => respond(&mut write_half, 200, "OK", gate.status()).await,
                ("PUT", Some(gate)) => update_gate(&mut write_half, gate, &request).await,
                _ => respond(&mut write_half, 404, "Not Found", json!({"error": "not found"})).await,
            }
        }
    }
}

/// Apply a `sensitivity` form value to a gate; a missing value keeps the current one
async fn update_gate<W>(writer: &mut W, gate: &Gate, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let sensitivity = match request.form_value("sensitivity") {
        None | Some("") => gate.sensitivity(),
        Some(value) => match value.trim().parse::<u32>() {
            Ok(sensitivity) => sensitivity,
            Err(_) => {
                return respond(
                    writer,
                    422,
                    "Unprocessable Entity",
                    json!({"errors": {"sensitivity": "is not a number"}}),
                )
                .await;
            }
        },
    };

    match gate.update(sensitivity).await {
        Ok(()) => respond(writer, 200, "OK", json!({"success": true})).await,
        Err(e) => {
            error!("Unable to update gate '{}': {}", gate.name(), e);
            respond(
                writer,
                500,
                "Internal Server Error",
                json!({"success": false, "error": e.to_string()}),
            )
            .await
        }
    }
}

/// Read the request line, headers and any `Content-Length` body.
///
/// Returns `None` for an empty or malformed request.
async fn read_request<R>(reader: &mut R) -> io::Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }

    let mut content_length = 0u64;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 || header.trim_end().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                match value.trim().parse() {
                    Ok(length) => content_length = length,
                    Err(_) => return Ok(None),
                }
            }
        }
    }

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    let mut body = Vec::new();
    (&mut *reader)
        .take(content_length)
        .read_to_end(&mut body)
        .await?;

    Ok(Some(Request {
        method: method.to_string(),
        path: path.to_string(),
        query: query.to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    }))
}

async fn respond<W, T>(writer: &mut W, status: u16, reason: &str, body: T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_string(&body)?;
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await
}
