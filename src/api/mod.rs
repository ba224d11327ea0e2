//! Minimal HTTP server for the event feed.
//!
//! Routes:
//! - `GET <feed path>`: RSS document
//! - `GET /static/images/<file>`: persisted thumbnails
//! - `GET /health`: JSON status
//!
//! One request per connection. Anything that is not `GET` gets 405.

use crate::sink::{EventSink, IMAGES_ROUTE};
use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("feed server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

pub struct FeedServer {
    addr: String,
    sink: Arc<EventSink>,
}

impl FeedServer {
    pub fn new(addr: impl Into<String>, sink: Arc<EventSink>) -> Self {
        Self {
            addr: addr.into(),
            sink,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("bind address '{}' did not resolve", self.addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let sink = self.sink;
        let feed_path = sink.settings().feed_path.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, &sink, shutdown_thread) {
                log::error!("feed server stopped: {}", err);
            }
        });

        log::info!("feed server listening on http://{}{}", addr, feed_path);
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, sink: &EventSink, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, sink) {
                    log::warn!("feed request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, sink: &EventSink) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_text_response(&mut stream, 405, "method not allowed")?;
        return Ok(());
    }

    let settings = sink.settings();
    if request.path == settings.feed_path {
        match sink.render_feed() {
            Ok(body) => write_response(&mut stream, 200, &settings.content_type, &body)?,
            Err(err) => {
                log::error!("failed to render feed: {:#}", err);
                write_text_response(&mut stream, 500, "internal error")?;
            }
        }
        return Ok(());
    }

    if request.path == "/health" {
        let items = sink.len()?;
        let body = serde_json::json!({
            "status": "ok",
            "items": items,
            "capacity": settings.max_items,
        });
        write_response(
            &mut stream,
            200,
            "application/json",
            &serde_json::to_vec(&body)?,
        )?;
        return Ok(());
    }

    if let Some(name) = request
        .path
        .strip_prefix(IMAGES_ROUTE)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        match read_image(sink, name) {
            Some(bytes) => write_response(&mut stream, 200, "image/jpeg", &bytes)?,
            None => write_text_response(&mut stream, 404, "not found")?,
        }
        return Ok(());
    }

    write_text_response(&mut stream, 404, "not found")?;
    Ok(())
}

/// Only plain file names inside the images directory are served.
fn read_image(sink: &EventSink, name: &str) -> Option<Vec<u8>> {
    if !is_safe_file_name(name) {
        return None;
    }
    std::fs::read(sink.thumbnails().dir().join(name)).ok()
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_text_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "text/plain; charset=utf-8", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
