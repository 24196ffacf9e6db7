// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::protocol::{
    initialize_params, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolCallResult,
    ToolInfo, ToolsListResult,
};
use crate::transport::{Transport, TransportError};

/// Default timeout for one MCP request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP client: one session with a remote tool server over any [`Transport`].
///
/// Request ids are integers, monotonically increasing per client. A
/// background receive loop matches replies to outstanding requests by id;
/// stray replies are dropped. When the transport closes, every outstanding
/// request fails with a transport error.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    client_name: String,
    client_version: String,
    initialized: AtomicBool,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    receive_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    tools: Mutex<Vec<ToolInfo>>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            client_name: "tern".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
            initialized: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            receive_task: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            tools: Mutex::new(Vec::new()),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Spawn the receive loop if it is not already running.
    async fn ensure_receive_loop(&self) {
        let mut task = self.receive_task.lock().await;
        if task.is_some() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let closed = Arc::clone(&self.closed);
        *task = Some(tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(Some(message)) => {
                        if message.get("id").is_none() {
                            debug!(method = ?message.get("method"), "server notification");
                            continue;
                        }
                        match serde_json::from_value::<JsonRpcResponse>(message.clone()) {
                            Ok(response) => {
                                let sender = pending.lock().await.remove(&response.id);
                                match sender {
                                    Some(tx) => {
                                        let _ = tx.send(response);
                                    }
                                    None => {
                                        debug!(id = response.id, "dropping stray reply");
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "undecodable message from server"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "transport receive failed");
                        break;
                    }
                }
            }
            // Transport closed: mark the session dead, then fail everything
            // still outstanding by dropping the reply senders.
            closed.store(true, Ordering::SeqCst);
            pending.lock().await.clear();
        }));
    }

    /// Send one request and await its reply (30s timeout).
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        self.ensure_receive_loop().await;

        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Closed);
        }

        let request = JsonRpcRequest::new(id, method, params);
        debug!(id, method, "sending MCP request");
        if let Err(e) = self.transport.send(&serde_json::to_value(&request)?).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Receive loop dropped the sender: transport closed.
                return Err(TransportError::Closed);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(TransportError::Timeout);
            }
        };

        response.into_result().map_err(|e| TransportError::Rpc {
            code: e.code,
            message: e.message,
        })
    }

    /// Perform the `initialize` handshake and the `notifications/initialized`
    /// follow-up. Idempotent.
    pub async fn initialize(&self) -> Result<Value, TransportError> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(Value::Null);
        }
        let params = initialize_params(&self.client_name, &self.client_version);
        let result = self
            .send_request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        self.initialized.store(true, Ordering::SeqCst);

        let note = JsonRpcNotification::new("notifications/initialized");
        self.transport.send(&serde_json::to_value(&note)?).await?;
        Ok(result)
    }

    /// List the server's tools. Initializes the session first when needed.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, TransportError> {
        self.initialize().await?;
        let result = self.send_request("tools/list", None).await?;
        let listed: ToolsListResult = serde_json::from_value(result)?;
        *self.tools.lock().await = listed.tools.clone();
        Ok(listed.tools)
    }

    /// Call a remote tool. Returns the joined text content and the remote
    /// `isError` flag.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<(String, bool), TransportError> {
        self.initialize().await?;
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.send_request("tools/call", Some(params)).await?;
        let call_result: ToolCallResult = serde_json::from_value(result)?;
        Ok((call_result.joined_text(), call_result.is_error))
    }

    /// Close the session: stop the receive loop and shut the transport down.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.receive_task.lock().await.take() {
            task.abort();
        }
        self.pending.lock().await.clear();
        self.transport.close().await;
    }
}
