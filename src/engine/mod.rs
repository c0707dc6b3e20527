//! Protocol engine: the request correlator over a supervised worker.
//!
//! The engine owns a long-lived worker subprocess speaking newline-
//! delimited JSON over its stdin/stdout. Requests are multiplexed over
//! that one pipe by correlation id: each `send` registers a oneshot in
//! the pending map, writes one line, and waits with a timeout. Responses
//! are matched strictly by id, never by order. When the worker exits,
//! every pending request receives exactly one synthetic failure and the
//! worker is respawned under the configured backoff policy.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::WireMessage;

/// Timeout for `list_tools` requests.
pub const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Starting,
    Ready,
    Degraded,
    Terminated,
}

/// Restart policy for the supervised worker.
///
/// The default reproduces the reviewed behavior: a fixed five-second
/// delay with no retry cap. Hosts that treat endless restarts as masking
/// a fatal misconfiguration can set `max_restarts`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub mult: f64,
    pub max: Duration,
    pub max_restarts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            mult: 1.0,
            max: Duration::from_secs(5),
            max_restarts: None,
        }
    }
}

impl BackoffPolicy {
    /// Delay before restart attempt `restarts` (zero-based).
    pub fn delay(&self, restarts: u32) -> Duration {
        let ms = self.initial.as_millis() as f64 * self.mult.powi(restarts as i32);
        Duration::from_millis(ms.min(self.max.as_millis() as f64) as u64)
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker binary plus arguments.
    pub worker_cmd: Vec<String>,
    pub backoff: BackoffPolicy,
    /// Timeout for `invoke_tool` requests.
    pub invoke_timeout: Duration,
}

/// Pending-request map. The only mutation points are `register`,
/// `complete`, `discard` and `fail_all`; each id is owned by at most one
/// outstanding request at a time.
pub(crate) struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<WireMessage>>>,
}

impl Correlator {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve an id and hand back the receiver its response will arrive
    /// on. Reusing an id still in flight is a caller error.
    pub(crate) async fn register(&self, id: &str) -> Result<oneshot::Receiver<WireMessage>> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(id) {
            return Err(Error::DuplicateCorrelation(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Deliver a response to the caller waiting on `id`. `false` when the
    /// id is not pending (late response after timeout, or never issued).
    pub(crate) async fn complete(&self, id: &str, msg: WireMessage) -> bool {
        let sender = self.pending.lock().await.remove(id);
        match sender {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Drop a pending id without delivery (timeout path).
    pub(crate) async fn discard(&self, id: &str) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    /// Fail every pending request with a synthetic terminated error.
    /// Returns the number of requests failed.
    pub(crate) async fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (id, tx) in drained {
            let _ = tx.send(WireMessage::terminated_error(id));
        }
        count
    }

    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// The protocol engine. One owned object with an explicit lifecycle:
/// `spawn`, `send`, `shutdown`. No ambient globals.
pub struct Engine {
    correlator: Arc<Correlator>,
    stdin_tx: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    state: Arc<RwLock<EngineState>>,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    invoke_timeout: Duration,
}

impl Engine {
    /// Spawn the worker under supervision and return the engine handle.
    pub fn spawn(config: EngineConfig) -> Self {
        let correlator = Arc::new(Correlator::new());
        let stdin_tx = Arc::new(RwLock::new(None));
        let state = Arc::new(RwLock::new(EngineState::Starting));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());

        let invoke_timeout = config.invoke_timeout;
        let supervisor = tokio::spawn(supervise(
            config,
            correlator.clone(),
            stdin_tx.clone(),
            state.clone(),
            shutdown.clone(),
            stop.clone(),
        ));

        Self {
            correlator,
            stdin_tx,
            state,
            shutdown,
            stop,
            supervisor: Mutex::new(Some(supervisor)),
            invoke_timeout,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Fire-and-forget `init`: sent on spawn already, re-sent on explicit
    /// request. Never waits for `ready`.
    pub async fn init(&self) {
        let guard = self.stdin_tx.read().await;
        match guard.as_ref() {
            Some(tx) => {
                if let Ok(line) = serde_json::to_string(&WireMessage::Init) {
                    if tx.send(line).await.is_err() {
                        warn!("init requested but worker pipe is closed");
                    }
                }
            }
            None => warn!("init requested while worker is down"),
        }
    }

    /// Request the worker's tool catalog.
    pub async fn list_tools(&self) -> Result<WireMessage> {
        self.send(WireMessage::ListTools { id: None }, LIST_TOOLS_TIMEOUT)
            .await
    }

    /// Invoke a tool with the configured invocation timeout.
    pub async fn invoke_tool(&self, tool: String, params: serde_json::Value) -> Result<WireMessage> {
        let msg = WireMessage::InvokeTool {
            id: Uuid::new_v4().to_string(),
            tool,
            params,
        };
        self.send(msg, self.invoke_timeout).await
    }

    /// Send one request over the pipe and await its correlated response.
    ///
    /// Timeouts and worker death are delivered as synthetic `tool_error`
    /// messages carrying `TIMEOUT` / `WORKER_TERMINATED` codes, matching
    /// the wire taxonomy; `Err` is reserved for engine misuse (shutdown,
    /// duplicate id, serialization).
    pub async fn send(&self, mut msg: WireMessage, timeout: Duration) -> Result<WireMessage> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::EngineShutdown);
        }

        if msg.correlation_id().is_none() {
            msg.assign_id(Uuid::new_v4().to_string());
        }
        let id = msg
            .correlation_id()
            .ok_or_else(|| Error::Protocol("message kind cannot carry a correlation id".to_string()))?
            .to_string();

        let rx = self.correlator.register(&id).await?;
        let line = serde_json::to_string(&msg)?;

        let written = {
            let guard = self.stdin_tx.read().await;
            match guard.as_ref() {
                Some(tx) => tx.send(line).await.is_ok(),
                None => false,
            }
        };
        if !written {
            self.correlator.discard(&id).await;
            return Ok(WireMessage::terminated_error(id));
        }

        let issued = Instant::now();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!(
                    id = %id,
                    elapsed_ms = issued.elapsed().as_millis() as u64,
                    "response correlated"
                );
                Ok(reply)
            }
            // Sender dropped without delivery: the pending map was torn
            // down around us; treat as worker death.
            Ok(Err(_)) => Ok(WireMessage::terminated_error(id)),
            Err(_) => {
                self.correlator.discard(&id).await;
                warn!(id = %id, "request timed out; a late response will be discarded");
                Ok(WireMessage::timeout_error(id, timeout.as_secs()))
            }
        }
    }

    /// Dispose the engine: kill the worker, stop supervision, no further
    /// spawns. In-flight requests are not auto-failed by this transition;
    /// the host drains them through its own shutdown sequence.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop.notify_one();
        *self.stdin_tx.write().await = None;
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }
        *self.state.write().await = EngineState::Terminated;
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.correlator.pending_len().await
    }
}

/// Supervision loop: spawn, pump, fail pending on exit, back off, respawn.
async fn supervise(
    config: EngineConfig,
    correlator: Arc<Correlator>,
    stdin_tx: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    state: Arc<RwLock<EngineState>>,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
) {
    if config.worker_cmd.is_empty() {
        error!("engine started with an empty worker command");
        *state.write().await = EngineState::Terminated;
        return;
    }

    let restarts = AtomicU32::new(0);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let attempt = restarts.load(Ordering::SeqCst);
        if let Some(max) = config.backoff.max_restarts {
            if attempt > max {
                error!(attempt, "worker restart limit reached; giving up");
                break;
            }
        }

        let mut child = match Command::new(&config.worker_cmd[0])
            .args(&config.worker_cmd[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("failed to spawn worker {:?}: {}", config.worker_cmd, e);
                restarts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(config.backoff.delay(attempt)).await;
                continue;
            }
        };
        *state.write().await = EngineState::Starting;
        info!(cmd = ?config.worker_cmd, "worker spawned");

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            error!("worker spawned without piped stdio");
            let _ = child.kill().await;
            restarts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(config.backoff.delay(attempt)).await;
            continue;
        };

        let (tx, mut line_rx) = mpsc::channel::<String>(64);
        *stdin_tx.write().await = Some(tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // init on every spawn; ready is advisory, nobody blocks on it.
        if let Ok(line) = serde_json::to_string(&WireMessage::Init) {
            let _ = tx.send(line).await;
        }

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    let _ = child.kill().await;
                    break;
                }
                next = lines.next_line() => match next {
                    Ok(Some(line)) => handle_line(&correlator, &state, &restarts, &line).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("error reading worker stdout: {}", e);
                        break;
                    }
                }
            }
        }

        *stdin_tx.write().await = None;
        writer.abort();
        let status = child.wait().await;

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let failed = correlator.fail_all().await;
        *state.write().await = EngineState::Degraded;
        let attempt = restarts.fetch_add(1, Ordering::SeqCst);
        let delay = config.backoff.delay(attempt);
        warn!(
            exit = ?status,
            failed_requests = failed,
            attempt = attempt + 1,
            "worker exited; respawning in {:?}",
            delay
        );

        tokio::select! {
            _ = stop.notified() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    *state.write().await = EngineState::Terminated;
}

/// Handle one inbound line from the worker. Malformed lines are logged
/// with their raw content and skipped; the engine never crashes on them.
async fn handle_line(
    correlator: &Correlator,
    state: &RwLock<EngineState>,
    restarts: &AtomicU32,
    line: &str,
) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    let msg = match serde_json::from_str::<WireMessage>(trimmed) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(raw = trimmed, "discarding malformed protocol line: {}", e);
            return;
        }
    };

    match msg {
        WireMessage::Ready => {
            *state.write().await = EngineState::Ready;
            restarts.store(0, Ordering::SeqCst);
            info!("worker ready");
        }
        WireMessage::Ping { id } => {
            debug!(id = %id, "worker heartbeat");
        }
        msg @ (WireMessage::Tools { .. }
        | WireMessage::ToolResult { .. }
        | WireMessage::ToolError { .. }) => match msg.correlation_id() {
            Some(id) => {
                let id = id.to_string();
                if !correlator.complete(&id, msg).await {
                    warn!(id = %id, "late or unknown response discarded");
                }
            }
            None => warn!("response without a correlation id ignored"),
        },
        msg @ (WireMessage::Init
        | WireMessage::ListTools { .. }
        | WireMessage::InvokeTool { .. }) => {
            warn!(?msg, "unhandled request-shaped message from worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codes;
    use serde_json::json;

    fn error_code(msg: &WireMessage) -> Option<&str> {
        match msg {
            WireMessage::ToolError { error, .. } => error.code.as_deref(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_correlation_uniqueness_out_of_order() {
        let correlator = Correlator::new();
        let rx_a = correlator.register("a").await.unwrap();
        let rx_b = correlator.register("b").await.unwrap();

        // The second request's response arrives first.
        assert!(
            correlator
                .complete("b", WireMessage::ToolResult { id: "b".into(), result: json!(2) })
                .await
        );
        assert!(
            correlator
                .complete("a", WireMessage::ToolResult { id: "a".into(), result: json!(1) })
                .await
        );

        let got_a = rx_a.await.unwrap();
        let got_b = rx_b.await.unwrap();
        assert_eq!(got_a.correlation_id(), Some("a"));
        assert_eq!(got_b.correlation_id(), Some("b"));
    }

    #[tokio::test]
    async fn test_duplicate_pending_id_rejected() {
        let correlator = Correlator::new();
        let _rx = correlator.register("dup").await.unwrap();
        let err = correlator.register("dup").await.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_CORRELATION");

        // After the response clears it, the id may be reused.
        correlator
            .complete("dup", WireMessage::ToolResult { id: "dup".into(), result: json!(null) })
            .await;
        assert!(correlator.register("dup").await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_single_delivery() {
        let correlator = Correlator::new();
        let rx = correlator.register("slow").await.unwrap();

        // Timer fires first.
        assert!(tokio::time::timeout(Duration::from_millis(10), rx)
            .await
            .is_err());
        assert!(correlator.discard("slow").await);

        // The late response finds no pending id and is dropped.
        assert!(
            !correlator
                .complete("slow", WireMessage::ToolResult { id: "slow".into(), result: json!(1) })
                .await
        );
        assert_eq!(correlator.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_fail_all_delivers_exactly_once_each() {
        let correlator = Correlator::new();
        let mut rxs = Vec::new();
        for i in 0..5 {
            rxs.push(correlator.register(&format!("req-{}", i)).await.unwrap());
        }

        assert_eq!(correlator.fail_all().await, 5);
        assert_eq!(correlator.pending_len().await, 0);

        for rx in rxs {
            let msg = rx.await.unwrap();
            assert_eq!(error_code(&msg), Some(codes::WORKER_TERMINATED));
        }
    }

    #[test]
    fn test_default_backoff_is_fixed_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(7), Duration::from_secs(5));
        assert!(policy.max_restarts.is_none());
    }

    #[test]
    fn test_backoff_growth_caps_at_max() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            mult: 2.0,
            max: Duration::from_millis(300),
            max_restarts: Some(10),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(300));
        assert_eq!(policy.delay(5), Duration::from_millis(300));
    }

    fn test_engine(cmd: &[&str], invoke_timeout: Duration) -> Engine {
        Engine::spawn(EngineConfig {
            worker_cmd: cmd.iter().map(|s| s.to_string()).collect(),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(50),
                mult: 1.0,
                max: Duration::from_millis(50),
                max_restarts: Some(2),
            },
            invoke_timeout,
        })
    }

    #[tokio::test]
    async fn test_engine_reaches_ready_on_advisory_message() {
        let engine = test_engine(
            &["sh", "-c", r#"printf '{"type":"ready"}\n'; sleep 60"#],
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.state().await, EngineState::Ready);
        engine.shutdown().await;
        assert_eq!(engine.state().await, EngineState::Terminated);
    }

    #[tokio::test]
    async fn test_engine_times_out_unresponsive_worker() {
        let engine = test_engine(&["sh", "-c", "sleep 60"], Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reply = engine
            .invoke_tool("get-webdna-stats".to_string(), json!({}))
            .await
            .unwrap();
        assert_eq!(error_code(&reply), Some(codes::TIMEOUT));
        assert_eq!(engine.pending_len().await, 0);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_engine_fails_requests_on_worker_death() {
        // Worker consumes the init line, then exits.
        let engine = test_engine(&["sh", "-c", "read line; exit 1"], Duration::from_secs(2));

        let reply = engine
            .invoke_tool("get-webdna-stats".to_string(), json!({}))
            .await
            .unwrap();
        assert_eq!(error_code(&reply), Some(codes::WORKER_TERMINATED));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_engine_error() {
        let engine = test_engine(&["sh", "-c", "sleep 60"], Duration::from_secs(1));
        engine.shutdown().await;

        let err = engine
            .invoke_tool("get-webdna-stats".to_string(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENGINE_SHUTDOWN");
    }
}
