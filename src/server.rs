use anyhow::{Context, Result, bail};
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::token::{self, Credentials, TokenRequest};

const MAX_REQUEST: usize = 2 * 1024 * 1024;
const PROXY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub dist_dir: PathBuf,
    /// Base URL of the memory API that `/api/*` is forwarded to.
    pub memory_api_url: Option<String>,
    pub credentials: Credentials,
}

struct ServerState {
    config: ServerConfig,
    http: reqwest::Client,
}

/// Run the token / static / proxy HTTP server until Ctrl+C.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    let port = listener.local_addr()?.port();

    if !config.dist_dir.is_dir() {
        warn!(dist = %config.dist_dir.display(), "dist directory missing, static serving disabled");
    }
    info!(port, url = %config.credentials.url, "token server running");
    println!("BMO server running on http://localhost:{}", port);
    println!("Press Ctrl+C to stop.");

    let state = Arc::new(ServerState::new(config)?);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &state).await {
                        warn!(%peer, error = %e, "connection failed");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

impl ServerState {
    fn new(config: ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Request {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Response {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

impl Response {
    fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self::new(status, "text/plain", body)
    }

    fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, "application/json", value.to_string())
    }
}

async fn handle_connection<S>(mut stream: S, state: &ServerState) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    debug!(method = %request.method, uri = %request.target, "request");
    let response = route(state, &request).await;
    send_response(&mut stream, &response).await
}

async fn route(state: &ServerState, req: &Request) -> Response {
    let path = req.path();
    match (req.method.as_str(), path) {
        ("OPTIONS", _) => Response::text(204, ""),
        ("POST", "/getToken") => handle_get_token(state, &req.body),
        _ if path.starts_with("/api/") => proxy(state, req).await,
        ("GET", _) | ("HEAD", _) => serve_static(&state.config.dist_dir, path, req.header("accept")).await,
        _ => Response::text(404, "Not Found"),
    }
}

/// POST /getToken
fn handle_get_token(state: &ServerState, body: &[u8]) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TokenRequest::default()
    } else {
        match serde_json::from_slice::<TokenRequest>(body) {
            Ok(r) => r,
            Err(e) => return Response::json(400, &json!({ "error": e.to_string() })),
        }
    };
    debug!(room = ?request.room_name, identity = ?request.participant_identity, "token request");

    match token::issue(request, &state.config.credentials, SystemTime::now()) {
        Ok(resp) => match serde_json::to_value(&resp) {
            Ok(v) => Response::json(201, &v),
            Err(e) => Response::json(500, &json!({ "error": e.to_string() })),
        },
        Err(e) => {
            warn!(error = %e, "failed to issue token");
            Response::json(500, &json!({ "error": "failed to issue token" }))
        }
    }
}

async fn proxy(state: &ServerState, req: &Request) -> Response {
    let Some(base) = state.config.memory_api_url.as_deref() else {
        return Response::json(
            502,
            &json!({ "error": "memory API unavailable", "detail": "MEMORY_API_URL is not set" }),
        );
    };
    match forward(state, base, req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(uri = %req.target, error = %e, "memory API proxy failed");
            Response::json(
                502,
                &json!({ "error": "memory API unavailable", "detail": format!("{:#}", e) }),
            )
        }
    }
}

async fn forward(state: &ServerState, base: &str, req: &Request) -> Result<Response> {
    let url = format!("{}{}", base.trim_end_matches('/'), req.target);
    let method = reqwest::Method::from_bytes(req.method.as_bytes()).context("invalid method")?;
    let mut upstream = state.http.request(method, &url);
    for name in ["content-type", "accept"] {
        if let Some(value) = req.header(name) {
            upstream = upstream.header(name, value);
        }
    }
    if !req.body.is_empty() {
        upstream = upstream.body(req.body.clone());
    }

    let resp = upstream.send().await.with_context(|| format!("request to {} failed", url))?;
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = resp.bytes().await.context("failed to read upstream body")?;
    Ok(Response::new(status, &content_type, body.to_vec()))
}

/// Map a request path onto a file under `dist`. `None` means the path is
/// malformed or tries to leave the directory.
fn resolve_dist_path(dist: &Path, url_path: &str) -> Option<PathBuf> {
    if !valid_percent_encoding(url_path) {
        return None;
    }
    let decoded = urlencoding::decode(url_path).ok()?;
    let mut pathname = decoded.into_owned();
    if pathname == "/" {
        pathname = "/index.html".to_string();
    }
    if pathname.contains('\0') {
        return None;
    }

    let mut out = dist.to_path_buf();
    for segment in pathname.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => out.push(s),
        }
    }
    Some(out)
}

fn valid_percent_encoding(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            if !hex.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

async fn serve_static(dist: &Path, path: &str, accept: Option<&str>) -> Response {
    let Some(file) = resolve_dist_path(dist, path) else {
        return Response::text(400, "Bad Request");
    };
    if file.is_file() {
        if let Ok(body) = tokio::fs::read(&file).await {
            return Response::new(200, content_type_for(&file), body);
        }
    }

    if accept.is_some_and(|a| a.contains("text/html")) {
        let index = dist.join("index.html");
        if let Ok(body) = tokio::fs::read(&index).await {
            return Response::new(200, "text/html; charset=utf-8", body);
        }
    }
    Response::text(404, "Not Found")
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "json" | "webmanifest" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

// ── HTTP helpers ───────────────────────────────────────────────────────

fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(idx) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((idx, idx + 4));
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|idx| (idx, idx + 2))
}

/// Read one request, waiting for the whole body when Content-Length is set.
async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Request>> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST {
            bail!("request larger than {} bytes", MAX_REQUEST);
        }
        if let Some(request) = parse_request(&buf) {
            let expected = request
                .header("content-length")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.body.len() >= expected {
                return Ok(Some(request));
            }
        }
    }
    if buf.is_empty() {
        return Ok(None);
    }
    parse_request(&buf)
        .map(Some)
        .context("malformed HTTP request")
}

fn parse_request(buf: &[u8]) -> Option<Request> {
    let (head_end, body_start) = find_header_end(buf)?;
    let head = String::from_utf8_lossy(&buf[..head_end]);
    let mut lines = head.lines();
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let headers = lines
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    Some(Request {
        method,
        target,
        headers,
        body: buf[body_start..].to_vec(),
    })
}

/// Write an HTTP response with CORS headers.
async fn send_response<W: AsyncWrite + Unpin>(stream: &mut W, response: &Response) -> Result<()> {
    let status_text = match response.status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let header = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Connection: close\r\n\r\n",
        response.status,
        status_text,
        response.content_type,
        response.body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await?;
    Ok(())
}
