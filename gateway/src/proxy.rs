//! Reverse proxy gate: Basic-Auth in front of an opaque upstream.
//!
//! The gate speaks just enough HTTP to make an access decision. It reads
//! the request preamble (request line plus headers), checks the
//! `Authorization` header against the credential store, and only then
//! opens the upstream connection, replays the preamble bytes verbatim,
//! and degrades into a transparent byte pump. The upstream's protocol
//! quirks are never interpreted.
//!
//! While no credential exists the gate serves its own minimal setup flow
//! and never contacts the upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::error::{GatewayError, Result};
use crate::pages;

/// Upper bound on the request preamble.
const PREAMBLE_BUDGET: usize = 8 * 1024;

/// Idle timeout for the byte pump, covering both directions.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pump buffer size per direction.
const PUMP_BUF: usize = 4096;

/// Parsed request preamble with the raw bytes kept for replay.
#[derive(Debug)]
pub struct Preamble {
    pub method: String,
    pub path: String,
    /// Header names lowercased, values trimmed.
    pub headers: HashMap<String, String>,
    /// Everything read from the client so far, including any body bytes
    /// that arrived with the headers. Forwarded verbatim on success.
    pub raw: Vec<u8>,
    /// Offset of the first byte after the header/body separator.
    body_start: usize,
}

impl Preamble {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Body bytes already read along with the headers.
    fn body(&self) -> &[u8] {
        &self.raw[self.body_start..]
    }
}

/// Reads the preamble from a client stream, up to `PREAMBLE_BUDGET`.
pub async fn read_preamble(stream: &mut TcpStream) -> Result<Preamble> {
    let mut raw = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_separator(&raw) {
            break pos;
        }
        if raw.len() >= PREAMBLE_BUDGET {
            return Err(GatewayError::protocol("request preamble exceeds budget"));
        }

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(GatewayError::protocol(
                "connection closed before preamble completed",
            ));
        }
        raw.extend_from_slice(&buf[..n]);
    };

    let body_start = header_end + 4;
    let head = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| GatewayError::protocol("preamble is not valid utf-8"))?;

    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| GatewayError::protocol("missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| GatewayError::protocol("missing method"))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| GatewayError::protocol("missing request path"))?
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok(Preamble {
        method,
        path,
        headers,
        raw,
        body_start,
    })
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Extracts `username:password` from a `Basic` authorization header value.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ));
    out.into_bytes()
}

fn redirect_response(location: &str) -> Vec<u8> {
    http_response(
        "302 Found",
        &[("Location", location), ("Content-Type", "text/html; charset=utf-8")],
        "",
    )
}

/// Basic-Auth gate in front of a single upstream.
#[derive(Debug)]
pub struct ReverseProxyGate {
    credentials: Arc<CredentialStore>,
    upstream: String,
}

impl ReverseProxyGate {
    pub fn new(credentials: Arc<CredentialStore>, upstream: impl Into<String>) -> Self {
        Self {
            credentials,
            upstream: upstream.into(),
        }
    }

    /// Accept loop. One task per connection; a failed connection never
    /// affects the loop or its siblings.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let gate = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = gate.handle_connection(stream).await {
                            debug!(%peer, error = %err, "proxy connection closed with error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "proxy accept failed"),
            }
        }
    }

    async fn handle_connection(&self, mut client: TcpStream) -> Result<()> {
        let preamble = read_preamble(&mut client).await?;

        if !self.credentials.is_configured() {
            return self.handle_setup(&mut client, preamble).await;
        }

        let authorized = preamble
            .header("authorization")
            .and_then(decode_basic)
            .is_some_and(|(user, pass)| self.credentials.verify(&user, &pass));

        if !authorized {
            debug!(method = %preamble.method, path = %preamble.path, "proxy auth rejected");
            let response = http_response(
                "401 Unauthorized",
                &[
                    ("WWW-Authenticate", "Basic realm=\"GymGate\""),
                    ("Content-Type", "text/plain; charset=utf-8"),
                ],
                "authentication required\n",
            );
            client.write_all(&response).await?;
            return Err(GatewayError::AuthenticationFailure);
        }

        self.forward(client, preamble).await
    }

    /// First-run setup over raw HTTP. The upstream is never contacted.
    async fn handle_setup(&self, client: &mut TcpStream, preamble: Preamble) -> Result<()> {
        if preamble.method == "POST" && preamble.path == "/setup" {
            let body = read_body(client, &preamble).await?;
            match parse_setup_form(&body) {
                Some((username, password)) => {
                    self.credentials.save(&username, &password)?;
                    info!(username = %username, "credential created through proxy setup");
                    client.write_all(&redirect_response("/login")).await?;
                }
                None => {
                    let page = pages::setup_page(Some("username and password are required"));
                    let response = http_response(
                        "400 Bad Request",
                        &[("Content-Type", "text/html; charset=utf-8")],
                        &page,
                    );
                    client.write_all(&response).await?;
                }
            }
            return Ok(());
        }

        // Any other request gets the setup form.
        let response = http_response(
            "200 OK",
            &[("Content-Type", "text/html; charset=utf-8")],
            &pages::setup_page(None),
        );
        client.write_all(&response).await?;
        Ok(())
    }

    /// Connects upstream, replays the preamble, then pumps bytes both
    /// ways until either side closes or the idle timeout fires.
    async fn forward(&self, mut client: TcpStream, preamble: Preamble) -> Result<()> {
        let mut upstream = TcpStream::connect(&self.upstream)
            .await
            .map_err(|err| GatewayError::upstream_connect(self.upstream.clone(), err))?;

        upstream.write_all(&preamble.raw).await?;

        let mut client_buf = [0u8; PUMP_BUF];
        let mut upstream_buf = [0u8; PUMP_BUF];

        loop {
            tokio::select! {
                read = client.read(&mut client_buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    upstream.write_all(&client_buf[..n]).await?;
                }
                read = upstream.read(&mut upstream_buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    client.write_all(&upstream_buf[..n]).await?;
                }
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    debug!("proxy connection idle, closing");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Completes the request body using `content-length`, reusing any bytes
/// already read with the preamble.
async fn read_body(client: &mut TcpStream, preamble: &Preamble) -> Result<Vec<u8>> {
    let length: usize = preamble
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if length > PREAMBLE_BUDGET {
        return Err(GatewayError::protocol("request body exceeds budget"));
    }

    let mut body = preamble.body().to_vec();
    while body.len() < length {
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await?;
        if n == 0 {
            return Err(GatewayError::protocol(
                "connection closed before body completed",
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(length);
    Ok(body)
}

fn parse_setup_form(body: &[u8]) -> Option<(String, String)> {
    let form: HashMap<String, String> = serde_urlencoded::from_bytes(body).ok()?;
    let username = form.get("username")?.trim().to_string();
    let password = form.get("password")?.to_string();
    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some((username, password))
}
