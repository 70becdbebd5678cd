// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal HTTP/1.1 over tokio TCP streams.
//!
//! Requests and responses are framed by Content-Length; the client does
//! not depend on connection close for EOF. Streaming responses
//! (`/events`) send a head without Content-Length and then one JSON
//! value per line for as long as the connection lives.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on declared body sizes, to bound allocation on a bad peer.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("peer closed the connection")]
    Closed,
}

/// A parsed inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A client-side response: status plus body, errors included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Send one request and read the response, with an overall timeout
/// covering connect + write + read.
pub async fn request(
    addr: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<HttpResponse, HttpError> {
    tokio::time::timeout(REQUEST_TIMEOUT, send_request(addr, method, path, body))
        .await
        .map_err(|_| HttpError::Timeout)?
}

async fn send_request(
    addr: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<HttpResponse, HttpError> {
    let mut stream = connect(addr).await?;

    let request = match body {
        Some(body) => format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            method, path, body.len(), body
        ),
        None => format!("{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, path),
    };
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let (status, content_length) = read_head(&mut reader).await?;
    let body = read_body(&mut reader, content_length).await?;
    Ok(HttpResponse { status, body })
}

async fn connect(addr: &str) -> Result<TcpStream, HttpError> {
    TcpStream::connect(addr)
        .await
        .map_err(|source| HttpError::Connect { addr: addr.to_string(), source })
}

/// A long-lived streaming response delivering one line per event.
pub struct HttpStream {
    reader: BufReader<TcpStream>,
}

impl HttpStream {
    /// The next line from the stream, `None` once the peer closes it.
    pub async fn next_line(&mut self) -> Result<Option<String>, HttpError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }
}

/// Open a streaming GET. Fails unless the server answers 200.
pub async fn open_stream(addr: &str, path: &str) -> Result<HttpStream, HttpError> {
    let open = async {
        let mut stream = connect(addr).await?;
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let (status, _) = read_head(&mut reader).await?;
        if status != 200 {
            return Err(HttpError::Malformed(format!("stream refused with HTTP {}", status)));
        }
        Ok(HttpStream { reader })
    };
    tokio::time::timeout(REQUEST_TIMEOUT, open).await.map_err(|_| HttpError::Timeout)?
}

/// Read one request from an accepted connection.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<HttpRequest, HttpError> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Err(HttpError::Closed);
    }

    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method.to_string(), path.to_string()),
        _ => return Err(HttpError::Malformed(format!("bad request line {:?}", request_line))),
    };

    let content_length = read_headers(reader).await?;
    let body = read_body(reader, content_length).await?;

    Ok(HttpRequest { method, path, body })
}

/// Read a response status line plus headers; returns (status, content-length).
async fn read_head<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<(u16, usize), HttpError> {
    let mut status_line = String::new();
    if reader.read_line(&mut status_line).await? == 0 {
        return Err(HttpError::Closed);
    }

    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| HttpError::Malformed(format!("bad status line {:?}", status_line)))?;

    let content_length = read_headers(reader).await?;
    Ok((status, content_length))
}

/// Consume headers up to the blank line, extracting Content-Length.
async fn read_headers<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<usize, HttpError> {
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(HttpError::Closed);
        }
        if line == "\r\n" || line == "\n" {
            return Ok(content_length);
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
            if content_length > MAX_BODY_BYTES {
                return Err(HttpError::Malformed(format!(
                    "declared body of {} bytes exceeds limit",
                    content_length
                )));
            }
        }
    }
}

async fn read_body<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    content_length: usize,
) -> Result<String, HttpError> {
    if content_length == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; content_length];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| HttpError::Malformed(format!("non-UTF-8 body: {}", e)))
}

/// Write a complete JSON response.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    body: &str,
) -> Result<(), HttpError> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the head of a line-delimited streaming response.
pub async fn write_stream_head<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), HttpError> {
    writer
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\n\r\n")
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Write one event line on a streaming response.
pub async fn write_stream_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> Result<(), HttpError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        418 => "I'm a teapot",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
