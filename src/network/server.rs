//! WebSocket Round Server
//!
//! Async WebSocket front end for the round coordinator. Each connection
//! gets the current round on attach, then every committed change from the
//! feed, and can issue round commands.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::config::ServerConfig;
use crate::game::error::RoundError;
use crate::game::events::RoundEvent;
use crate::game::round::RoundCoordinator;
use crate::game::state::{PlayerId, Round, RoundId};
use crate::core::geo::GeoPosition;
use crate::network::feed::RoundFeedView;
use crate::network::protocol::{
    ClientMessage, ServerMessage, SubmitRequest, SubmitAck, RoundSnapshot, RoundUpdate,
    ServerError, ErrorCode,
};

/// Attempts for `start_round` when it loses a race.
pub const START_ROUND_ATTEMPTS: usize = 3;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Round coordinator error.
    #[error("Round error: {0}")]
    Round(#[from] RoundError),
}

/// Connected client state.
struct ConnectedClient {
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The round server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Round coordinator.
    coordinator: Arc<RoundCoordinator>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server around a coordinator.
    pub fn new(config: ServerConfig, coordinator: Arc<RoundCoordinator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            coordinator,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Round server listening on {}", listener.local_addr()?);

        // Spawn round timer task
        let tick_handle = tokio::spawn(Self::run_tick_loop(
            self.coordinator.clone(),
            self.config.tick_interval,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = tick_handle.await {
            warn!("Tick loop ended abnormally: {}", e);
        }

        Ok(())
    }

    /// Register and spawn a connection task.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        // Registered before spawning so the limit check sees it
        {
            let now = Instant::now();
            let mut clients = self.clients.write().await;
            clients.insert(addr, ConnectedClient { connected_at: now, last_activity: now });
        }

        let clients = self.clients.clone();
        let coordinator = self.coordinator.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) =
                Self::serve_connection(stream, addr, &clients, &coordinator, &config, shutdown_rx).await
            {
                error!("Connection {} failed: {}", addr, e);
            }

            // Cleanup
            let removed = clients.write().await.remove(&addr);
            if let Some(client) = removed {
                info!(
                    "Client {} cleaned up after {:?}",
                    addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    async fn serve_connection(
        stream: TcpStream,
        addr: SocketAddr,
        clients: &Clients,
        coordinator: &Arc<RoundCoordinator>,
        config: &ServerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        // Subscribe before the snapshot so no change is missed
        let (mut feed_rx, snapshot) = coordinator.attach().await?;
        let mut view = RoundFeedView::from_snapshot(snapshot);
        if msg_tx.send(Self::round_message(coordinator, view.current())).await.is_err() {
            debug!("Client {} gone before attach", addr);
            return Ok(());
        }

        loop {
            let idle_deadline = {
                let clients = clients.read().await;
                clients
                    .get(&addr)
                    .map(|c| c.last_activity)
                    .unwrap_or_else(Instant::now)
                    + config.idle_timeout
            };

            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            // Update activity
                            {
                                let mut clients = clients.write().await;
                                if let Some(client) = clients.get_mut(&addr) {
                                    client.last_activity = Instant::now();
                                }
                            }

                            let reply = match ClientMessage::from_json(&text) {
                                Ok(client_msg) => Self::handle_client_message(coordinator, client_msg).await,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    ServerMessage::Error(ServerError::new(
                                        ErrorCode::InvalidMessage,
                                        "Invalid message format",
                                    ))
                                }
                            };
                            if msg_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }
                event = feed_rx.recv() => {
                    if !Self::forward_feed_event(coordinator, &mut view, event, &msg_tx, addr).await? {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline.into()) => {
                    info!("Dropping idle client {}", addr);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    let notice = ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    };
                    if msg_tx.send(notice).await.is_err() {
                        debug!("Client {} gone before shutdown notice", addr);
                    }
                    break;
                }
            }
        }

        // Let queued messages (shutdown notice) flush
        drop(msg_tx);
        let _ = sender_task.await;
        Ok(())
    }

    /// Push one feed result to a connection.
    ///
    /// Returns `false` when the connection should close: the feed ended or
    /// the writer task is gone.
    async fn forward_feed_event(
        coordinator: &RoundCoordinator,
        view: &mut RoundFeedView,
        event: Result<RoundEvent, broadcast::error::RecvError>,
        msg_tx: &mpsc::Sender<ServerMessage>,
        addr: SocketAddr,
    ) -> Result<bool, GameServerError> {
        let msg = match event {
            Ok(event) => {
                if !view.apply(&event) {
                    return Ok(true);
                }
                ServerMessage::Update(RoundUpdate::from_event(
                    &event,
                    coordinator.clock().now(),
                    coordinator.config().round_duration,
                ))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed updates: resync from a fresh snapshot
                warn!("Client {} lagged by {} updates, resyncing", addr, skipped);
                *view = RoundFeedView::from_snapshot(coordinator.get_current_round().await?);
                Self::round_message(coordinator, view.current())
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(false),
        };
        Ok(msg_tx.send(msg).await.is_ok())
    }

    /// Handle one client command and build the reply.
    pub async fn handle_client_message(
        coordinator: &RoundCoordinator,
        msg: ClientMessage,
    ) -> ServerMessage {
        match msg {
            ClientMessage::StartRound => match Self::start_round_with_retry(coordinator).await {
                Ok(round) => Self::round_message(coordinator, Some(&round)),
                Err(e) => Self::error_message(&e),
            },
            ClientMessage::Submit(req) => Self::handle_submit(coordinator, req).await,
            ClientMessage::GetCurrentRound => match coordinator.get_current_round().await {
                Ok(round) => Self::round_message(coordinator, round.as_ref()),
                Err(e) => Self::error_message(&e),
            },
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: coordinator.clock().now().timestamp_millis().max(0) as u64,
            },
        }
    }

    async fn start_round_with_retry(coordinator: &RoundCoordinator) -> Result<Round, RoundError> {
        let mut attempt = 1;
        loop {
            match coordinator.start_round().await {
                Ok(outcome) => return Ok(outcome.into_round()),
                Err(e) if e.is_retryable() && attempt < START_ROUND_ATTEMPTS => {
                    debug!("start_round attempt {} lost a race: {}", attempt, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_submit(coordinator: &RoundCoordinator, req: SubmitRequest) -> ServerMessage {
        let Some(round_id) = RoundId::from_uuid_str(&req.round_id) else {
            return ServerMessage::Error(ServerError::new(
                ErrorCode::InvalidMessage,
                format!("Invalid round id: {}", req.round_id),
            ));
        };
        if req.player_id.is_empty() {
            return ServerMessage::Error(ServerError::new(
                ErrorCode::InvalidMessage,
                "Missing player id",
            ));
        }

        let position = GeoPosition::new(req.lat, req.lng);
        match coordinator
            .accept_submission(round_id, PlayerId::new(req.player_id), position)
            .await
        {
            Ok(submission) => ServerMessage::SubmitAck(SubmitAck {
                round_id: round_id.to_string(),
                player_id: submission.player_id.to_string(),
                submitted_at: submission.submitted_at.timestamp_millis(),
            }),
            Err(e) => Self::error_message(&e),
        }
    }

    fn round_message(coordinator: &RoundCoordinator, round: Option<&Round>) -> ServerMessage {
        let now = coordinator.clock().now();
        let duration = coordinator.config().round_duration;
        ServerMessage::Round {
            round: round.map(|r| RoundSnapshot::from_round(r, now, duration)),
        }
    }

    fn error_message(err: &RoundError) -> ServerMessage {
        debug!("Command failed: {}", err);
        ServerMessage::Error(ServerError::from(err))
    }

    /// Drive round timers until shutdown.
    async fn run_tick_loop(
        coordinator: Arc<RoundCoordinator>,
        period: std::time::Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = coordinator.tick().await {
                        warn!("Round tick failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// The coordinator this server fronts.
    pub fn coordinator(&self) -> &Arc<RoundCoordinator> {
        &self.coordinator
    }
}
