use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, RwLock};

use super::dispatcher::Dispatcher;
use super::error::McpError;
use super::protocol::{Message, Response};
use super::registry::ToolContext;

/// Connection lifecycle: `Connecting -> Open -> Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// MCP Session state management
#[derive(Debug)]
pub struct McpSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    elevated: bool,
    state: AtomicU8,
    initialized: AtomicBool,
    context: Mutex<HashMap<String, Value>>,
}

impl McpSession {
    pub fn new(elevated: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            elevated,
            state: AtomicU8::new(SessionState::Connecting as u8),
            initialized: AtomicBool::new(false),
            context: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move from `Connecting` to `Open`. Returns false if the session was not connecting.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Returns false if the session was already closed.
    pub fn close(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::SeqCst) != SessionState::Closed as u8
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn elevated(&self) -> bool {
        self.elevated
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.id.clone(), self.elevated)
    }

    /// Store context value
    pub fn set_context(&self, key: String, value: Value) {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// Retrieve context value
    pub fn get_context(&self, key: &str) -> Option<Value> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Mark session as initialized
    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    /// Check if session is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

/// Serialize and queue one frame for a session. The channel is the only writer
/// path to the transport, so frames for one session never interleave.
fn deliver(session: &McpSession, outbound: &mpsc::UnboundedSender<String>, message: &Message) -> bool {
    if !session.is_open() {
        tracing::debug!(session_id = %session.id, "Session closed, dropping outbound frame");
        return false;
    }
    let text = match message.to_json() {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(session_id = %session.id, error = %err, "Failed to serialize outbound message");
            return false;
        }
    };
    if outbound.send(text).is_err() {
        tracing::debug!(session_id = %session.id, "Transport gone, dropping outbound frame");
        return false;
    }
    true
}

/// Inbound payloads a session may have waiting before new ones are refused
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Producer side of one session's bounded inbound queue.
///
/// The outbound channel stays unbounded: its only producers are this session's
/// worker (at most one reply per queued payload) and server-initiated sends.
#[derive(Clone)]
pub struct SessionInbox {
    session: Arc<McpSession>,
    queue: mpsc::Sender<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl SessionInbox {
    /// Queue a payload without waiting. When the queue is full a request is
    /// answered right away with TEMPORARILY_UNAVAILABLE; anything else is dropped.
    pub fn push(&self, payload: String) -> bool {
        if !self.session.is_open() {
            tracing::debug!(session_id = %self.session.id, "Inbound payload for closed session dropped");
            return false;
        }
        match self.queue.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(payload)) => {
                tracing::warn!(session_id = %self.session.id, "Inbound queue full, refusing payload");
                if let Ok(Message::Request(req)) = Message::parse(&payload) {
                    let err = McpError::TemporarilyUnavailable(format!("session {}", self.session.id));
                    let reply: Message = Response::error(req.id, err.to_error_object()).into();
                    deliver(&self.session, &self.outbound, &reply);
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %self.session.id, "Session worker gone, payload dropped");
                false
            }
        }
    }
}

struct SessionHandle {
    session: Arc<McpSession>,
    inbox: SessionInbox,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionStatistics {
    pub active: usize,
    pub opened: u64,
    pub closed: u64,
}

/// Owns the live sessions. Each session gets one worker task that handles its
/// inbound payloads in arrival order; different sessions run concurrently.
pub struct SessionManager {
    dispatcher: Arc<Dispatcher>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    inbound_capacity: usize,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl SessionManager {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_inbound_capacity(dispatcher, DEFAULT_INBOUND_CAPACITY)
    }

    pub fn with_inbound_capacity(dispatcher: Arc<Dispatcher>, inbound_capacity: usize) -> Self {
        Self {
            dispatcher,
            sessions: RwLock::new(HashMap::new()),
            inbound_capacity: inbound_capacity.max(1),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Register a new connection and announce the server on it. Frames for the
    /// client are pushed into `outbound`.
    pub async fn open_session(
        &self,
        outbound: mpsc::UnboundedSender<String>,
        elevated: bool,
    ) -> Arc<McpSession> {
        let session = Arc::new(McpSession::new(elevated));
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity);

        self.sessions.write().await.insert(
            session.id.clone(),
            SessionHandle {
                session: session.clone(),
                inbox: SessionInbox {
                    session: session.clone(),
                    queue: inbound_tx,
                    outbound: outbound.clone(),
                },
                outbound: outbound.clone(),
            },
        );
        session.open();
        self.opened.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            session_id = %session.id,
            elevated,
            "MCP session opened"
        );

        let ready = self.dispatcher.ready_notification(&session);
        deliver(&session, &outbound, &ready);

        tokio::spawn(Self::run_worker(
            self.dispatcher.clone(),
            session.clone(),
            inbound_rx,
            outbound,
        ));

        session
    }

    async fn run_worker(
        dispatcher: Arc<Dispatcher>,
        session: Arc<McpSession>,
        mut inbound: mpsc::Receiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        while let Some(payload) = inbound.recv().await {
            if !session.is_open() {
                break;
            }
            if let Some(reply) = dispatcher.handle_text(&session, &payload).await {
                deliver(&session, &outbound, &reply);
            }
        }
        tracing::debug!(session_id = %session.id, "Session worker stopped");
    }

    /// Queue an inbound payload for the session's worker
    pub async fn submit(&self, session_id: &str, payload: String) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(handle) => handle.inbox.push(payload),
            _ => {
                tracing::debug!(session_id = %session_id, "Inbound payload for unknown session dropped");
                false
            }
        }
    }

    /// Direct handle to the session's inbound queue, for transports that must
    /// enqueue frames synchronously in arrival order.
    pub async fn inbox(&self, session_id: &str) -> Option<SessionInbox> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|handle| handle.inbox.clone())
    }

    /// Send a server-initiated message. Returns false when the session is gone.
    pub async fn send(&self, session_id: &str, message: &Message) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(handle) => deliver(&handle.session, &handle.outbound, message),
            None => {
                tracing::debug!(session_id = %session_id, "Send to unknown session dropped");
                false
            }
        }
    }

    /// Send to every open session, returning how many accepted the frame
    pub async fn broadcast(&self, message: &Message) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|handle| deliver(&handle.session, &handle.outbound, message))
            .count()
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(handle) => {
                handle.session.close();
                self.closed.fetch_add(1, Ordering::SeqCst);
                tracing::info!(
                    session_id = %session_id,
                    lifetime_secs = (Utc::now() - handle.session.created_at).num_seconds(),
                    "MCP session closed"
                );
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<McpSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|handle| handle.session.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            active: self.active_count().await,
            opened: self.opened.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::dispatcher::READY_NOTIFICATION;
    use crate::mcp::mock::MockTool;
    use crate::mcp::protocol::Notification;
    use crate::mcp::{ResilienceConfig, ResilienceLayer, ServerInfo, ToolRegistry};
    use serde_json::{json, Map};
    use std::time::Duration;
    use tokio::time::timeout;

    fn manager() -> SessionManager {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Arc::new(MockTool::new("echo", "execution")))
            .unwrap();
        registry
            .register(Arc::new(
                MockTool::new("slow", "execution").delayed(Duration::from_millis(300)),
            ))
            .unwrap();
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(ResilienceLayer::new(ResilienceConfig::default())),
            ServerInfo {
                name: "toolgate".to_string(),
                version: "0.1.0".to_string(),
            },
            "2024-11-05".to_string(),
        );
        SessionManager::new(Arc::new(dispatcher))
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let text = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_session_state_machine() {
        let session = McpSession::new(false);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.open());
        assert!(!session.open());
        assert!(session.is_open());
        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.open());
    }

    #[test]
    fn test_session_context() {
        let session = McpSession::new(true);
        session.set_context("client".to_string(), json!("inspector"));
        assert_eq!(session.get_context("client"), Some(json!("inspector")));
        assert!(session.get_context("missing").is_none());
        assert!(session.tool_context().elevated);
    }

    #[tokio::test]
    async fn test_open_session_announces_server() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;

        let ready = next_frame(&mut rx).await;
        assert_eq!(ready["method"], READY_NOTIFICATION);
        assert!(ready.get("id").is_none());
        assert_eq!(ready["params"]["toolCount"], 2);
        assert_eq!(ready["params"]["sessionId"], session.id.as_str());
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_responses_keep_request_order() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;
        next_frame(&mut rx).await;

        for id in 0..20 {
            let payload = json!({"jsonrpc": "2.0", "id": id, "method": "ping"}).to_string();
            assert!(manager.submit(&session.id, payload).await);
        }
        for id in 0..20 {
            let frame = next_frame(&mut rx).await;
            assert_eq!(frame["id"], id);
        }
    }

    #[tokio::test]
    async fn test_notifications_produce_no_output() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;
        next_frame(&mut rx).await;

        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        manager.submit(&session.id, note.to_string()).await;
        let ping = json!({"jsonrpc": "2.0", "id": "after", "method": "ping"});
        manager.submit(&session.id, ping.to_string()).await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["id"], "after");
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn test_bad_payload_keeps_session_alive() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;
        next_frame(&mut rx).await;

        manager.submit(&session.id, "{oops".to_string()).await;
        let frame = next_frame(&mut rx).await;
        assert!(frame["id"].is_null());
        assert_eq!(frame["error"]["code"], -32700);

        manager
            .submit(&session.id, json!({"id": 1, "method": "ping"}).to_string())
            .await;
        assert_eq!(next_frame(&mut rx).await["id"], 1);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_sessions_do_not_block_each_other() {
        let manager = manager();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = manager.open_session(tx_a, false).await;
        let b = manager.open_session(tx_b, false).await;
        next_frame(&mut rx_a).await;
        next_frame(&mut rx_b).await;

        let slow = json!({"id": 1, "method": "tools/call", "params": {"name": "slow"}});
        manager.submit(&a.id, slow.to_string()).await;
        manager
            .submit(&b.id, json!({"id": 2, "method": "ping"}).to_string())
            .await;

        let fast = timeout(Duration::from_millis(200), rx_b.recv()).await;
        assert!(fast.is_ok(), "session B waited on session A");
        assert_eq!(next_frame(&mut rx_a).await["id"], 1);
    }

    #[tokio::test]
    async fn test_full_inbound_queue_refuses_requests() {
        let base = manager();
        let manager = SessionManager::with_inbound_capacity(base.dispatcher().clone(), 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;
        next_frame(&mut rx).await;

        let slow = json!({"id": 1, "method": "tools/call", "params": {"name": "slow"}});
        assert!(manager.submit(&session.id, slow.to_string()).await);
        // Let the worker take the slow call off the queue
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ping = |id: u64| json!({"id": id, "method": "ping"}).to_string();
        assert!(manager.submit(&session.id, ping(2)).await);
        assert!(!manager.submit(&session.id, ping(3)).await);
        let note = json!({"method": "notifications/initialized"}).to_string();
        assert!(!manager.submit(&session.id, note).await);

        let refused = next_frame(&mut rx).await;
        assert_eq!(refused["id"], 3);
        assert_eq!(
            refused["error"]["code"],
            crate::mcp::protocol::error_codes::TEMPORARILY_UNAVAILABLE
        );
        assert_eq!(next_frame(&mut rx).await["id"], 1);
        assert_eq!(next_frame(&mut rx).await["id"], 2);
        assert!(!session.is_initialized());
    }

    #[tokio::test]
    async fn test_closed_session_drops_writes() {
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;
        next_frame(&mut rx).await;

        assert!(manager.close_session(&session.id).await);
        assert!(!manager.close_session(&session.id).await);
        assert_eq!(session.state(), SessionState::Closed);

        let note = Message::from(Notification::new("notifications/message", Map::new()));
        assert!(!manager.send(&session.id, &note).await);
        assert!(!manager.submit(&session.id, "{}".to_string()).await);

        let stats = manager.statistics().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn test_send_after_transport_dropped_does_not_fail() {
        let manager = manager();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = manager.open_session(tx, false).await;
        drop(rx);

        let note = Message::from(Notification::new("notifications/message", Map::new()));
        assert!(!manager.send(&session.id, &note).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_open_sessions() {
        let manager = manager();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        manager.open_session(tx_a, false).await;
        let b = manager.open_session(tx_b, false).await;
        next_frame(&mut rx_a).await;
        next_frame(&mut rx_b).await;

        let note = Message::from(Notification::new(
            "notifications/tools/list_changed",
            Map::new(),
        ));
        assert_eq!(manager.broadcast(&note).await, 2);
        assert_eq!(
            next_frame(&mut rx_a).await["method"],
            "notifications/tools/list_changed"
        );

        manager.close_session(&b.id).await;
        assert_eq!(manager.broadcast(&note).await, 1);
    }
}
