//! WebSocket Gateway
//!
//! Accepts client connections, streams round events to them and forwards
//! bet intents to the ledger.
//!
//! One fan-out task reads the engine's event stream and writes to every
//! connection's outbound queue in emission order. Each connection has its
//! own task for inbound intents, so a slow ledger call only delays the
//! client that made it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::multiplier::Multiplier;
use crate::game::engine::EngineHandle;
use crate::game::events::{RoundEvent, RoundEventData};
use crate::game::state::RoundPhase;
use crate::network::bets::{BetBook, OpenBet};
use crate::network::protocol::{BetReceipt, ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::network::registry::{short_id, ConnectionId, ConnectionRegistry};
use crate::settlement::{
    CancelBetRequest, CashoutRequest, Ledger, LoseRequest, SettlementError, StartGameRequest,
    WalletType,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            outbound_buffer: 256,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// A connected client as seen by its intent handlers.
struct Client {
    id: ConnectionId,
    token: Option<String>,
}

/// State shared by the accept loop, the fan-out and every connection.
struct Shared<L> {
    engine: EngineHandle,
    ledger: Arc<L>,
    registry: ConnectionRegistry,
    bets: BetBook,
    /// One permit per connection, held from accept until cleanup.
    slots: Arc<Semaphore>,
}

/// The broadcast gateway.
pub struct GatewayServer<L> {
    /// Gateway configuration.
    config: GatewayConfig,
    /// State shared with spawned tasks.
    shared: Arc<Shared<L>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<L: Ledger> GatewayServer<L> {
    /// Create a gateway over a running engine.
    pub fn new(config: GatewayConfig, engine: EngineHandle, ledger: Arc<L>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let slots = Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS)));

        Self {
            config,
            shared: Arc::new(Shared {
                registry: ConnectionRegistry::new(engine.clone()),
                engine,
                ledger,
                bets: BetBook::new(),
                slots,
            }),
            shutdown_tx,
        }
    }

    /// Bind and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Gateway listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Run on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        // Subscribe before the first registration so no event falls between.
        let fanout = tokio::spawn(self.shared.clone().run_fanout(self.shared.engine.events()));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Counted at accept so handshakes in flight take a slot too
                            let Ok(permit) = self.shared.slots.clone().try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
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

        fanout.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let shared = self.shared.clone();
        let buffer = self.config.outbound_buffer.max(4);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let mut token = None;
            let capture_token = |req: &Request, resp: Response| {
                token = auth_token(req.uri().query());
                Ok::<_, ErrorResponse>(resp)
            };

            let ws_stream = match accept_hdr_async(stream, capture_token).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let client = Client {
                id: Uuid::new_v4().into_bytes(),
                token,
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(buffer);

            // Snapshot is queued before the connection becomes visible to fan-out
            let registration = shared.registry.register(client.id, addr, msg_tx.clone()).await;
            info!(
                "Client {} connected from {} (round {} {}, token: {})",
                short_id(&client.id),
                addr,
                registration.snapshot.seq,
                registration.snapshot.phase,
                client.token.is_some()
            );

            // Spawn message sender task
            let mut sender_task = tokio::spawn(async move {
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
                let _ = ws_sender.close().await;
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(intent) => shared.handle_client_message(&client, intent).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", short_id(&client.id), e);
                                        ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format")
                                    }
                                };
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", short_id(&client.id));
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", short_id(&client.id), e);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            _ => {}
                        }
                    }
                    _ = registration.evicted.notified() => {
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup. An open bet stays in the book so the crash still
            // reports it to the ledger.
            shared.registry.unregister(&client.id).await;
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            info!("Client {} cleaned up", short_id(&client.id));
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Get open bet count.
    pub async fn open_bet_count(&self) -> usize {
        self.shared.bets.len().await
    }
}

impl<L: Ledger> Shared<L> {
    /// Forward engine events to every connection and settle crashed rounds.
    async fn run_fanout(self: Arc<Self>, mut events: broadcast::Receiver<RoundEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(message) = ServerMessage::from_round_event(&event) {
                        self.registry.broadcast(event.seq, message).await;
                    }
                    match &event.data {
                        RoundEventData::MultiplierUpdated { value } => {
                            // Only ticks the round survived; the crash tick is
                            // settled against the crash point below.
                            if self.engine.live_multiplier(event.round_seq).await.is_some() {
                                self.settle_auto(event.round_seq, value.saturating_add(1)).await;
                            }
                        }
                        RoundEventData::CrashRevealed { crash_point, final_multiplier } => {
                            self.settle_auto(event.round_seq, *crash_point).await;
                            self.settle_losses(event.round_seq, *final_multiplier).await;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Fan-out fell {} events behind, resyncing clients", missed);
                    self.registry.resync_all().await;
                    self.settle_after_lag().await;
                }
                Err(RecvError::Closed) => {
                    info!("Round engine stopped publishing");
                    return;
                }
            }
        }
    }

    /// Settle the newest crashed round, whose reveal may have been among the
    /// dropped events. Settling twice is harmless: the book hands each bet
    /// out once.
    async fn settle_after_lag(self: &Arc<Self>) {
        if let Some((seq, crash_point, final_multiplier)) = self.engine.revealed_crash().await {
            self.settle_auto(seq, crash_point).await;
            self.settle_losses(seq, final_multiplier).await;
            return;
        }

        let Some(previous) = self.engine.snapshot().await.seq.checked_sub(1) else { return };
        if let Some(final_multiplier) = self.final_multiplier(previous).await {
            self.settle_losses(previous, final_multiplier).await;
        }
    }

    /// Final multiplier of crashed round `seq`, while history still holds it.
    async fn final_multiplier(&self, seq: u64) -> Option<Multiplier> {
        let (snapshot, history, _) = self.engine.snapshot_with_history().await;
        let newest = if snapshot.phase == RoundPhase::Crashed {
            snapshot.seq
        } else {
            snapshot.seq.checked_sub(1)?
        };
        let age = usize::try_from(newest.checked_sub(seq)?).ok()?;
        let entry = history.get(age)?;
        entry.multiplier.parse::<f64>().ok().map(Multiplier::from_f64)
    }

    /// Return a bet to the book after a failed ledger call, or report it lost
    /// if its round was settled while the call was in flight.
    async fn reinstate(&self, id: ConnectionId, bet: OpenBet) {
        if self.bets.restore(id, bet.clone()).await {
            return;
        }
        let final_multiplier = match self.final_multiplier(bet.round_seq).await {
            Some(m) => m,
            None => {
                warn!("Round {} left history before game {} was settled", bet.round_seq, bet.game_id);
                Multiplier::ONE
            }
        };
        self.registry
            .send_to(&id, ServerMessage::BetLost { multiplier: final_multiplier.as_f64() })
            .await;
        self.report_loss(bet, final_multiplier);
    }

    /// Cash out every bet of round `seq` whose automatic target is below
    /// `limit`, at its target.
    async fn settle_auto(self: &Arc<Self>, seq: u64, limit: Multiplier) {
        for (id, bet) in self.bets.drain_auto(seq, limit).await {
            let Some(target) = bet.auto_cash_out else { continue };
            let shared = self.clone();
            tokio::spawn(async move {
                let amount = target.payout(bet.stake);
                let request = CashoutRequest {
                    amount,
                    score: target.as_f64(),
                    game_id: bet.game_id.clone(),
                };
                let reply = match shared.ledger.cashout(&bet.token, request).await {
                    Ok(_) => {
                        info!("Client {} auto cashed out game {} at {}x", short_id(&id), bet.game_id, target);
                        ServerMessage::CashedOut { multiplier: target.as_f64(), amount }
                    }
                    Err(e) => {
                        warn!("Auto cash-out of game {} failed: {}", bet.game_id, e);
                        // Disarmed so the next tick does not retry; the crash settles it.
                        shared.reinstate(id, OpenBet { auto_cash_out: None, ..bet }).await;
                        ServerMessage::Error(settlement_error(e))
                    }
                };
                shared.registry.send_to(&id, reply).await;
            });
        }
    }

    /// Report every bet still open on round `seq` as lost.
    async fn settle_losses(&self, seq: u64, final_multiplier: Multiplier) {
        for (id, bet) in self.bets.drain_round(seq).await {
            self.registry
                .send_to(&id, ServerMessage::BetLost { multiplier: final_multiplier.as_f64() })
                .await;
            self.report_loss(bet, final_multiplier);
        }
    }

    fn report_loss(&self, bet: OpenBet, final_multiplier: Multiplier) {
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            let request = LoseRequest {
                score: final_multiplier.as_f64(),
                game_id: bet.game_id.clone(),
            };
            if let Err(e) = ledger.lose(&bet.token, request).await {
                warn!("Failed to report loss for game {}: {}", bet.game_id, e);
            }
        });
    }

    /// Handle a client message. Every intent gets exactly one reply.
    async fn handle_client_message(&self, client: &Client, msg: ClientMessage) -> ServerMessage {
        let result = match msg {
            ClientMessage::PlaceBet { amount, wallet_type, auto_cash_out, round_seq } => {
                self.handle_place_bet(client, amount, wallet_type, auto_cash_out, round_seq).await
            }
            ClientMessage::CashOut { multiplier, round_seq } => {
                self.handle_cash_out(client, multiplier, round_seq).await
            }
            ClientMessage::CancelBet => self.handle_cancel_bet(client).await,
            ClientMessage::GetBalance => match require_token(client) {
                Ok(token) => self
                    .ledger
                    .balance(token)
                    .await
                    .map(ServerMessage::Balance)
                    .map_err(settlement_error),
                Err(e) => Err(e),
            },
            ClientMessage::GetGames => match require_token(client) {
                Ok(token) => self
                    .ledger
                    .games(token)
                    .await
                    .map(|games| ServerMessage::Games { games })
                    .map_err(settlement_error),
                Err(e) => Err(e),
            },
            ClientMessage::Ping { timestamp } => Ok(ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            }),
        };

        result.unwrap_or_else(ServerMessage::Error)
    }

    /// Handle a bet. The ledger debits; the book records the slot.
    async fn handle_place_bet(
        &self,
        client: &Client,
        amount: f64,
        wallet_type: WalletType,
        auto_cash_out: Option<f64>,
        round_seq: Option<u64>,
    ) -> Result<ServerMessage, ServerError> {
        let token = require_token(client)?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(reject(ErrorCode::InvalidInput, "Stake must be a positive amount"));
        }
        let auto_cash_out = match auto_cash_out {
            Some(target) if !target.is_finite() => {
                return Err(reject(ErrorCode::InvalidInput, "autoCashOut must be a number"));
            }
            Some(target) => Some(Multiplier::from_f64(target)).filter(|m| *m > Multiplier::ONE),
            None => None,
        };

        let snapshot = self.engine.snapshot().await;
        check_round(round_seq, snapshot.seq)?;
        if snapshot.phase != RoundPhase::Betting {
            return Err(reject(ErrorCode::BettingClosed, "Betting is closed for this round"));
        }
        if self.bets.get(&client.id).await.is_some() {
            return Err(reject(ErrorCode::AlreadyBet, "A bet is already open"));
        }

        let response = self
            .ledger
            .start_game(token, StartGameRequest { stake: amount, wallet_type })
            .await
            .map_err(settlement_error)?;

        // The round may have moved on while the ledger was answering.
        let accepted = {
            let mut bets = self.bets.lock().await;
            let now = self.engine.snapshot().await;
            let open = now.seq == snapshot.seq
                && matches!(now.phase, RoundPhase::Betting | RoundPhase::LockBets);
            if open && !bets.contains_key(&client.id) {
                bets.insert(
                    client.id,
                    OpenBet {
                        round_seq: snapshot.seq,
                        game_id: response.game_id.clone(),
                        stake: amount,
                        wallet_type,
                        auto_cash_out,
                        token: token.to_string(),
                    },
                );
            }
            open
        };

        if !accepted {
            warn!(
                "Round {} started before game {} was confirmed, cancelling",
                snapshot.seq, response.game_id
            );
            let cancel = CancelBetRequest { game_id: response.game_id.clone() };
            if let Err(e) = self.ledger.cancel_bet(token, cancel).await {
                warn!("Failed to cancel game {}: {}", response.game_id, e);
            }
            return Err(reject(ErrorCode::BettingClosed, "Betting closed before the bet was confirmed"));
        }

        info!(
            "Client {} bet {} on round {} (game {})",
            short_id(&client.id),
            amount,
            snapshot.seq,
            response.game_id
        );

        Ok(ServerMessage::BetAccepted(BetReceipt {
            round_seq: snapshot.seq,
            game_id: response.game_id,
            amount,
            wallet_type,
            auto_cash_out: auto_cash_out.map(Multiplier::as_f64),
            balances: response.balances,
        }))
    }

    /// Handle a cash-out. The slot is claimed before the ledger call so a
    /// crash racing the request cannot also report a loss.
    async fn handle_cash_out(
        &self,
        client: &Client,
        multiplier: f64,
        round_seq: Option<u64>,
    ) -> Result<ServerMessage, ServerError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(reject(ErrorCode::InvalidMultiplier, "Multiplier must be at least 1.00"));
        }
        let requested = Multiplier::from_f64(multiplier);

        let bet = {
            let mut bets = self.bets.lock().await;
            let current = self.engine.snapshot().await.seq;
            check_round(round_seq, current)?;

            let bet = bets
                .get(&client.id)
                .cloned()
                .ok_or_else(|| reject(ErrorCode::NoOpenBet, "No open bet"))?;
            if bet.round_seq < current {
                return Err(reject(ErrorCode::StaleRound, "That round is over"));
            }

            let live = self
                .engine
                .live_multiplier(bet.round_seq)
                .await
                .ok_or_else(|| reject(ErrorCode::InvalidMultiplier, "Round is not running"))?;
            if requested > live {
                return Err(reject(
                    ErrorCode::InvalidMultiplier,
                    format!("Cannot cash out at {}, round is at {}", requested, live),
                ));
            }

            bets.remove(&client.id);
            bet
        };

        let amount = requested.payout(bet.stake);
        let request = CashoutRequest {
            amount,
            score: requested.as_f64(),
            game_id: bet.game_id.clone(),
        };
        if let Err(e) = self.ledger.cashout(&bet.token, request).await {
            warn!("Cash-out of game {} failed: {}", bet.game_id, e);
            // Still open at the ledger, so the crash must report it.
            self.reinstate(client.id, bet).await;
            return Err(settlement_error(e));
        }

        info!(
            "Client {} cashed out game {} at {}x for {}",
            short_id(&client.id),
            bet.game_id,
            requested,
            amount
        );

        Ok(ServerMessage::CashedOut {
            multiplier: requested.as_f64(),
            amount,
        })
    }

    /// Handle a cancel. Without an open bet this is a no-op.
    async fn handle_cancel_bet(&self, client: &Client) -> Result<ServerMessage, ServerError> {
        let bet = {
            let mut bets = self.bets.lock().await;
            let snapshot = self.engine.snapshot().await;
            match bets.get(&client.id) {
                None => return Ok(ServerMessage::BetCancelled { game_id: None }),
                Some(bet) if bet.round_seq == snapshot.seq && snapshot.phase == RoundPhase::Betting => {}
                Some(_) => {
                    return Err(reject(ErrorCode::BettingClosed, "Bets are locked for this round"));
                }
            }
            bets.remove(&client.id)
        };
        let Some(bet) = bet else {
            return Ok(ServerMessage::BetCancelled { game_id: None });
        };

        let request = CancelBetRequest { game_id: bet.game_id.clone() };
        match self.ledger.cancel_bet(&bet.token, request).await {
            Ok(_) => {
                debug!("Client {} cancelled game {}", short_id(&client.id), bet.game_id);
                Ok(ServerMessage::BetCancelled { game_id: Some(bet.game_id) })
            }
            Err(e) => {
                // Still open at the ledger, so keep it for cash-out or loss.
                self.reinstate(client.id, bet).await;
                Err(settlement_error(e))
            }
        }
    }
}

/// Pull `authToken` out of the upgrade request's query string.
fn auth_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "authToken")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn require_token(client: &Client) -> Result<&str, ServerError> {
    client
        .token
        .as_deref()
        .ok_or_else(|| reject(ErrorCode::NotAuthenticated, "Connect with an authToken to bet"))
}

/// Refuse intents addressed to a round that has already ended.
fn check_round(requested: Option<u64>, current: u64) -> Result<(), ServerError> {
    match requested {
        Some(seq) if seq < current => Err(reject(
            ErrorCode::StaleRound,
            format!("Round {} is over, current round is {}", seq, current),
        )),
        _ => Ok(()),
    }
}

fn reject(code: ErrorCode, message: impl Into<String>) -> ServerError {
    ServerError {
        code,
        message: message.into(),
    }
}

fn settlement_error(e: SettlementError) -> ServerError {
    match e {
        SettlementError::Rejected { message, .. } => reject(ErrorCode::SettlementRejected, message),
        other => {
            warn!("Ledger unavailable: {}", other);
            reject(ErrorCode::SettlementUnavailable, "Settlement service unavailable")
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
