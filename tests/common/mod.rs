//! Shared helpers: spawn a server on an ephemeral port, speak raw HTTP/1.1
//! over a TCP socket, and parse what comes back — including torn connections
//! and chunk framing, which a high-level client would paper over.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use trestle::{Env, Error, Server};

/// How long to keep reading once the response head arrived. Responses that
/// never terminate (a 101 with no upgrade driver) fall out here.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Binds an ephemeral port and serves `app` for the rest of the test.
///
/// The explicit bounds (rather than `impl App`) let closure-shaped test
/// apps infer their return type.
pub async fn spawn<F, Fut>(app: F) -> SocketAddr
where
    F: Fn(Env) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    let server = Server::bind("127.0.0.1:0").await.expect("bind");
    let addr = server.local_addr();
    tokio::spawn(server.serve_until(app, std::future::pending()));
    addr
}

/// One `GET path` with `connection: close`.
pub async fn get(addr: SocketAddr, path: &str) -> io::Result<RawResponse> {
    let raw = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
    request(addr, raw.as_bytes()).await
}

/// One `POST path` with a body and `connection: close`.
pub async fn post(addr: SocketAddr, path: &str, body: &str) -> io::Result<RawResponse> {
    let raw = format!(
        "POST {path} HTTP/1.1\r\nhost: localhost\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    request(addr, raw.as_bytes()).await
}

/// Sends raw request bytes and reads until EOF, error, or timeout. An error
/// after some bytes arrived (a reset mid-body) is treated as end of input —
/// the parser decides whether the response was complete.
pub async fn request(addr: SocketAddr, raw: &[u8]) -> io::Result<RawResponse> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(raw).await?;

    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => {
                if collected.is_empty() {
                    return Err(e);
                }
                break;
            }
            Err(_) => break,
        }
    }

    if collected.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no response bytes"));
    }
    parse(&collected)
}

/// A response as it appeared on the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Whether the framing was satisfied: terminal chunk seen, or declared
    /// content-length fully received.
    pub complete: bool,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

fn parse(raw: &[u8]) -> io::Result<RawResponse> {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "incomplete response head"))?;
    let head = String::from_utf8_lossy(&raw[..head_end]);
    let mut lines = head.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing status line"))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("").to_owned();
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad status code"))?;
    let reason = parts.next().unwrap_or("").to_owned();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect();

    let payload = &raw[head_end + 4..];
    let chunked = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked")
    });
    let declared: Option<usize> = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok());

    let (body, complete) = if chunked {
        dechunk(payload)
    } else if let Some(declared) = declared {
        let take = payload.len().min(declared);
        (payload[..take].to_vec(), payload.len() >= declared)
    } else {
        // Delimited by connection close.
        (payload.to_vec(), true)
    };

    Ok(RawResponse {
        version,
        status,
        reason,
        headers,
        body,
        complete,
    })
}

/// Decodes chunked transfer framing. Returns the data seen plus whether the
/// terminal zero-length chunk arrived.
fn dechunk(mut payload: &[u8]) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = payload.windows(2).position(|w| w == b"\r\n") else {
            return (body, false);
        };
        let size_line = String::from_utf8_lossy(&payload[..line_end]);
        let size_token = size_line.split(';').next().unwrap_or("").trim();
        let Ok(size) = usize::from_str_radix(size_token, 16) else {
            return (body, false);
        };
        payload = &payload[line_end + 2..];

        if size == 0 {
            return (body, true);
        }
        if payload.len() < size {
            body.extend_from_slice(payload);
            return (body, false);
        }
        body.extend_from_slice(&payload[..size]);
        payload = &payload[size..];
        // Skip the CRLF after the chunk data, if it arrived.
        if payload.len() >= 2 && &payload[..2] == b"\r\n" {
            payload = &payload[2..];
        } else {
            return (body, false);
        }
    }
}
