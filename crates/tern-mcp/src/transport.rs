// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Framed JSON-RPC channels.
//!
//! Three wire flavours share one contract:
//! - **stdio** — one JSON value per line on this process's stdin/stdout
//!   (the server side of `tern mcp serve`)
//! - **process** — same framing over a spawned child's piped stdio
//! - **http** — POST per outgoing message, incoming messages read from a
//!   server-sent-event stream (`data:` payloads)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport is closed")]
    Closed,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// A bidirectional framed JSON channel.
///
/// `recv` is single-consumer: the owning client/server drives it from one
/// task. `Ok(None)` means the peer closed the channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &Value) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<Option<Value>, TransportError>;
    async fn close(&self);
}

/// Parse one framed line; non-JSON lines are skipped with a diagnostic.
fn parse_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(line = %trimmed, error = %e, "skipping non-JSON line on transport");
            None
        }
    }
}

// ─── Stdio transport ──────────────────────────────────────────────────────────

/// Line-delimited JSON over this process's stdin/stdout. Stdout carries
/// nothing but JSON-RPC; diagnostics go to stderr via `tracing`.
pub struct StdioTransport {
    stdin: Mutex<BufReader<tokio::io::Stdin>>,
    stdout: Mutex<tokio::io::Stdout>,
    closed: AtomicBool,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
            stdout: Mutex::new(tokio::io::stdout()),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(message)?;
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        let mut stdin = self.stdin.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut line = String::new();
            let n = stdin.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            if let Some(value) = parse_line(&line) {
                return Ok(Some(value));
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ─── Process transport ────────────────────────────────────────────────────────

/// How long to wait for a child to exit after stdin closes, then after a
/// terminate signal, before killing it outright.
const GRACEFUL_EXIT: std::time::Duration = std::time::Duration::from_secs(5);
const TERMINATE_EXIT: std::time::Duration = std::time::Duration::from_secs(2);

/// Spawns a child process and speaks line-delimited JSON over its piped
/// stdio. The child's stderr is inherited so its diagnostics stay visible.
pub struct ProcessTransport {
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    closed: AtomicBool,
}

impl ProcessTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send(&self, message: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(message)?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        let mut stdout = self.stdout.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut line = String::new();
            let n = stdout.read_line(&mut line).await?;
            if n == 0 {
                self.closed.store(true, Ordering::SeqCst);
                return Ok(None);
            }
            if let Some(value) = parse_line(&line) {
                return Ok(Some(value));
            }
        }
    }

    /// Graceful shutdown cascade: close stdin, wait 5s for exit, terminate,
    /// wait 2s, then kill.
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping stdin closes the pipe, which is the polite exit signal.
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        if tokio::time::timeout(GRACEFUL_EXIT, child.wait()).await.is_ok() {
            debug!("child exited after stdin close");
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(TERMINATE_EXIT, child.wait()).await.is_ok() {
                debug!("child exited after SIGTERM");
                return;
            }
        }

        warn!("child did not exit; killing");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill child process");
        }
    }
}

// ─── HTTP + SSE transport ─────────────────────────────────────────────────────

/// HTTP transport: each outgoing message is POSTed as a JSON body; incoming
/// messages arrive on a GET stream of server-sent events, one JSON-RPC
/// message per `data:` payload.
pub struct HttpTransport {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    incoming: Mutex<Option<mpsc::Receiver<Value>>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            url: url.into(),
            headers,
            client: reqwest::Client::new(),
            incoming: Mutex::new(None),
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Start the SSE reader task on first use.
    async fn ensure_reader(&self) {
        let mut reader = self.reader.lock().await;
        if reader.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(64);
        *self.incoming.lock().await = Some(rx);

        let url = self.url.clone();
        let headers = self.headers.clone();
        let client = self.client.clone();
        *reader = Some(tokio::spawn(async move {
            sse_reader(client, url, headers, tx).await;
        }));
    }
}

/// Read the SSE stream and feed decoded `data:` payloads into `tx`.
async fn sse_reader(
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    tx: mpsc::Sender<Value>,
) {
    use futures::StreamExt;

    let mut req = client.get(&url);
    for (name, value) in &headers {
        req = req.header(name.as_str(), value.as_str());
    }
    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "SSE connect failed");
            return;
        }
    };

    let mut buf = String::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(bytes) = chunk else { break };
        buf.push_str(&String::from_utf8_lossy(&bytes));
        while let Some(nl) = buf.find('\n') {
            let line = buf[..nl].trim_end_matches('\r').to_string();
            buf = buf[nl + 1..].to_string();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<Value>(data.trim()) {
                Ok(value) => {
                    if tx.send(value).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(data, error = %e, "failed to decode SSE message"),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut req = self.client.post(&self.url).json(message);
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.ensure_reader().await;
        let mut incoming = self.incoming.lock().await;
        match incoming.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
