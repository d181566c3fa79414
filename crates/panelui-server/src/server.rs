//! Control-channel WebSocket server.
//!
//! Connection tasks only decode and forward: every decoded submission is
//! funneled through one mpsc channel into a single processor loop, which
//! dispatches messages strictly one at a time: the cooperative,
//! non-preemptive model the dispatcher and store rely on. The same loop runs
//! the housekeeping cadence: autosave, periodic publish, dead-connection
//! cleanup and the reboot flag.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use panelui_core::{ConfigPersist, PersistError};
use panelui_protocol::{codec::decode_client_message, ClientMessage, Submission};

use crate::dispatch::{Dispatcher, PanelContext, SectionHandler, SectionRegistry};
use crate::frame::{ACK_FRAME_SIZE, UI_FRAME_SIZE};
use crate::hub::{ClientHub, ClientId, Destination};

/// How often the processor loop runs housekeeping.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(300);

/// Configuration for the panel server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name used in logs.
    pub name: String,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Minimum interval between periodic value publishes.
    pub publish_period: Duration,
    /// Minimum dirty time before the store is flushed to storage.
    pub autosave_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "panelui-server".to_string(),
            bind_addr: "0.0.0.0:3000".parse().unwrap(),
            publish_period: Duration::from_secs(10),
            autosave_period: Duration::from_secs(30),
        }
    }
}

/// Events funneled into the processor loop.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client completed the WebSocket handshake.
    Connected(ClientId),
    /// A decoded submission from a client.
    Post { client: ClientId, data: Submission },
}

/// The control-panel server.
pub struct PanelServer {
    config: ServerConfig,
    ctx: PanelContext,
    registry: SectionRegistry,
    main_frame: Option<Box<dyn SectionHandler>>,
    publish: Option<Box<dyn SectionHandler>>,
    storage: Option<Box<dyn ConfigPersist>>,
    event_tx: mpsc::Sender<ServerEvent>,
    event_rx: mpsc::Receiver<ServerEvent>,
}

impl PanelServer {
    pub fn new(config: ServerConfig, ctx: PanelContext) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            config,
            ctx,
            registry: SectionRegistry::new(),
            main_frame: None,
            publish: None,
            storage: None,
            event_tx,
            event_rx,
        }
    }

    pub fn context(&self) -> &PanelContext {
        &self.ctx
    }

    /// Sender for synthetic events (used by tests and providers).
    pub fn event_sender(&self) -> mpsc::Sender<ServerEvent> {
        self.event_tx.clone()
    }

    /// Register a section handler. First registered wins on dispatch.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl SectionHandler + 'static,
    ) -> Result<(), panelui_core::PatternError> {
        self.registry.register(name, handler)
    }

    /// Handler building the full UI description for a newly connected
    /// client. Invoked with an empty submission, targeted at that client
    /// only.
    pub fn set_main_frame(&mut self, handler: impl SectionHandler + 'static) {
        self.main_frame = Some(Box::new(handler));
    }

    /// Handler broadcasting live values on the publish cadence.
    pub fn set_publish(&mut self, handler: impl SectionHandler + 'static) {
        self.publish = Some(Box::new(handler));
    }

    /// Attach persistent storage and load the document store from it.
    ///
    /// A missing document is normal on first boot; a malformed one is
    /// logged and ignored, leaving the declared defaults in place.
    pub fn set_storage(&mut self, storage: impl ConfigPersist + 'static) {
        match storage.load() {
            Ok(raw) => {
                let mut store = self.ctx.store().lock().unwrap();
                if let Err(e) = store.load(&raw) {
                    error!(%e, "persisted config unusable, starting from defaults");
                }
            }
            Err(PersistError::NotFound(path)) => {
                info!(path, "no persisted config, first boot");
            }
            Err(e) => error!(%e, "config load failed"),
        }
        self.storage = Some(Box::new(storage));
    }

    /// Run the server until the reboot flag is raised.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(name = %self.config.name, addr = %self.config.bind_addr, "panel server listening");

        let hub = self.ctx.hub().clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(accept_loop(listener, hub, event_tx));

        let registry = std::mem::take(&mut self.registry);
        let dispatcher = Dispatcher::new(self.ctx.clone(), registry);
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        let mut last_publish = Instant::now();

        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(ServerEvent::Connected(client)) => {
                        self.push_main_frame(&dispatcher, client);
                    }
                    Some(ServerEvent::Post { client, data }) => {
                        dispatcher.dispatch(client, &data);
                    }
                    None => break,
                },

                _ = housekeeping.tick() => {
                    if self.ctx.reboot_requested() {
                        info!("restart requested, shutting down");
                        self.autosave(true);
                        break;
                    }
                    self.autosave(false);
                    self.ctx.hub().cleanup();

                    if last_publish.elapsed() >= self.config.publish_period {
                        last_publish = Instant::now();
                        self.send_publish(&dispatcher);
                    }
                }
            }
        }

        Ok(())
    }

    /// Initial full UI description, pushed to the new client only.
    fn push_main_frame(&self, dispatcher: &Dispatcher, client: ClientId) {
        debug!(client, "pushing main frame");
        let Some(handler) = &self.main_frame else {
            debug!("no main frame handler registered");
            return;
        };
        let mut frame = self
            .ctx
            .frame(Destination::Client(client), UI_FRAME_SIZE);
        if let Err(e) = handler.handle(dispatcher.ctx(), &mut frame, &Submission::new()) {
            warn!(client, %e, "main frame build failed");
        }
    }

    /// Broadcast live values to all clients; skipped when nobody listens.
    fn send_publish(&self, dispatcher: &Dispatcher) {
        let Some(handler) = &self.publish else { return };
        if self.ctx.hub().count() == 0 {
            return;
        }
        let mut frame = self.ctx.frame(Destination::Broadcast, ACK_FRAME_SIZE);
        if let Err(e) = handler.handle(dispatcher.ctx(), &mut frame, &Submission::new()) {
            warn!(%e, "publish frame build failed");
        }
    }

    /// Flush the store to storage when dirty and the interval has elapsed
    /// (or unconditionally on shutdown).
    fn autosave(&self, now: bool) {
        let Some(storage) = &self.storage else { return };
        let due = now || self.ctx.since_last_save() >= self.config.autosave_period;
        let raw = {
            let mut store = self.ctx.store().lock().unwrap();
            if !store.is_dirty() || !due {
                return;
            }
            store.mark_clean();
            store.serialize()
        };
        match storage.save(&raw) {
            Ok(()) => debug!(bytes = raw.len(), "config autosaved"),
            Err(e) => error!(%e, "config save failed"),
        }
        self.ctx.autosave_reset();
    }
}

/// Accept connections and hand each one to its own task.
async fn accept_loop(
    listener: TcpListener,
    hub: std::sync::Arc<ClientHub>,
    event_tx: mpsc::Sender<ServerEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = hub.clone();
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, hub, event_tx).await {
                        error!("Connection error from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a single WebSocket connection.
///
/// The read side decodes envelopes and forwards submissions to the
/// processor; the write side drains this client's outbound queue. Connection
/// lifecycle events are logged and otherwise ignored by the core.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: std::sync::Arc<ClientHub>,
    event_tx: mpsc::Sender<ServerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (client, mut outbound) = hub.register();
    info!(client, %addr, "new connection");

    if event_tx.send(ServerEvent::Connected(client)).await.is_err() {
        hub.unregister(client);
        return Ok(());
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_client_message(&text) {
                        Ok(ClientMessage::Post(data)) => {
                            if event_tx
                                .send(ServerEvent::Post { client, data })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(ClientMessage::Unknown(pkg)) => {
                            debug!(client, pkg, "ignoring unknown package");
                        }
                        Err(e) => {
                            warn!(client, %e, "dropping malformed message");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(client, "client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(client, %e, "websocket error");
                        break;
                    }
                    None => {
                        info!(client, "client disconnected");
                        break;
                    }
                    _ => {} // Ignore other message types
                }
            }

            out = outbound.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            error!(client, %e, "send failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    hub.unregister(client);
    Ok(())
}
