use crate::configuration::Settings;
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::session::{McpSession, SessionInbox, SessionManager};

/// MCP WebSocket actor. Owns the transport only; message handling happens on
/// the session worker and replies come back through the outbound stream.
pub struct McpWebSocket {
    manager: Arc<SessionManager>,
    elevated: bool,
    session: Option<Arc<McpSession>>,
    inbox: Option<SessionInbox>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    hb: Instant,
}

impl McpWebSocket {
    pub fn new(
        manager: Arc<SessionManager>,
        elevated: bool,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            elevated,
            session: None,
            inbox: None,
            heartbeat_interval,
            client_timeout,
            hb: Instant::now(),
        }
    }

    /// Start heartbeat process to check connection health
    fn hb(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                tracing::warn!("MCP WebSocket client heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }

    fn session_id(&self) -> &str {
        self.session.as_ref().map(|s| s.id.as_str()).unwrap_or("-")
    }
}

impl Actor for McpWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        ctx.add_stream(UnboundedReceiverStream::new(rx));

        // Hold back incoming frames until the session is registered
        let manager = self.manager.clone();
        let elevated = self.elevated;
        ctx.wait(
            async move {
                let session = manager.open_session(tx, elevated).await;
                let inbox = manager.inbox(&session.id).await;
                (session, inbox)
            }
            .into_actor(self)
            .map(|(session, inbox), act, _ctx| {
                tracing::info!(
                    "MCP WebSocket connection started: session_id={}",
                    session.id
                );
                act.session = Some(session);
                act.inbox = inbox;
            }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            "MCP WebSocket connection closed: session_id={}",
            self.session_id()
        );
        if let Some(session) = self.session.take() {
            session.close();
            let manager = self.manager.clone();
            actix::spawn(async move {
                manager.close_session(&session.id).await;
            });
        }
    }
}

/// Frames produced by the session (responses, notifications)
impl StreamHandler<String> for McpWebSocket {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        tracing::debug!("[MCP] Sending frame: session_id={}", self.session_id());
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("[MCP] Outbound stream finished: session_id={}", self.session_id());
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for McpWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                tracing::debug!("[MCP] Received message: session_id={}", self.session_id());

                // A full queue is answered inside push; only a missing session is logged here
                match &self.inbox {
                    Some(inbox) => {
                        inbox.push(text.to_string());
                    }
                    None => tracing::warn!(
                        "[MCP] Dropping message for inactive session: session_id={}",
                        self.session_id()
                    ),
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported in MCP protocol");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("MCP WebSocket close received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                tracing::warn!("MCP WebSocket protocol error: {}", err);
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// WebSocket route handler - entry point for MCP connections
#[tracing::instrument(name = "MCP WebSocket connection", skip(req, stream, manager, settings))]
pub async fn mcp_websocket(
    req: HttpRequest,
    stream: web::Payload,
    manager: web::Data<Arc<SessionManager>>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, Error> {
    tracing::info!(
        "New MCP WebSocket connection request from {:?}",
        req.peer_addr()
    );

    let ws = McpWebSocket::new(
        manager.get_ref().clone(),
        settings.tools.elevated_privileges,
        Duration::from_secs(settings.server.heartbeat_interval_secs),
        Duration::from_secs(settings.server.client_timeout_secs),
    );

    ws::start(ws, &req, stream)
}
