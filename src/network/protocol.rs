//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object tagged by `type`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::events::{RoundEvent, RoundEventData};
use crate::game::history::HistoryEntry;
use crate::game::state::RoundPhase;
use crate::settlement::{Balance, GameId, WalletType};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stake on the current round. Betting only.
    PlaceBet {
        /// Stake amount.
        amount: f64,
        /// Wallet to debit.
        #[serde(default, rename = "walletType")]
        wallet_type: WalletType,
        /// Cash out automatically at this multiplier. Values at or below
        /// 1.00 disable it.
        #[serde(default, rename = "autoCashOut", skip_serializing_if = "Option::is_none")]
        auto_cash_out: Option<f64>,
        /// Round the client believes it is betting on.
        #[serde(default, rename = "roundSeq", skip_serializing_if = "Option::is_none")]
        round_seq: Option<u64>,
    },

    /// Cash out the open bet at `multiplier`. Driving only.
    CashOut {
        /// Multiplier the client saw when it pressed cash-out.
        multiplier: f64,
        /// Round the client believes it is cashing out of.
        #[serde(default, rename = "roundSeq", skip_serializing_if = "Option::is_none")]
        round_seq: Option<u64>,
    },

    /// Withdraw the open bet before the round starts.
    CancelBet,

    /// Request wallet balances.
    GetBalance,

    /// Request recent games.
    GetGames,

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Round phase.
    GameState {
        /// `betting`, `lockbets`, `driving` or `crashed`.
        state: RoundPhase,
        /// Round the phase belongs to.
        #[serde(rename = "roundSeq")]
        round_seq: u64,
    },

    /// Current multiplier.
    Multiplier {
        /// Multiplier to two decimals.
        value: f64,
    },

    /// Crash point, only ever sent once the round has crashed.
    CrashPoint {
        /// Crash point to two decimals.
        value: f64,
    },

    /// Completed rounds, newest first.
    History {
        /// History entries.
        items: Vec<HistoryEntry>,
    },

    /// Bet debited by the ledger.
    BetAccepted(BetReceipt),

    /// Bet cashed out.
    CashedOut {
        /// Multiplier cashed out at.
        multiplier: f64,
        /// Amount credited.
        amount: f64,
    },

    /// Bet lost to the crash.
    BetLost {
        /// Final multiplier of the round.
        multiplier: f64,
    },

    /// Bet withdrawn before the round started.
    BetCancelled {
        /// Ledger game id, if a game had been opened.
        #[serde(skip_serializing_if = "Option::is_none")]
        game_id: Option<GameId>,
    },

    /// Wallet balances.
    Balance(Balance),

    /// Recent games as returned by the ledger.
    Games {
        /// Ledger payload.
        games: serde_json::Value,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in milliseconds since the Unix epoch.
        server_time: u64,
    },

    /// Error.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Confirmation of a placed bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetReceipt {
    /// Round the bet rides on.
    #[serde(rename = "roundSeq")]
    pub round_seq: u64,
    /// Ledger game id.
    pub game_id: GameId,
    /// Stake.
    pub amount: f64,
    /// Debited wallet.
    #[serde(rename = "walletType")]
    pub wallet_type: WalletType,
    /// Automatic cash-out target, if armed.
    #[serde(default, rename = "autoCashOut", skip_serializing_if = "Option::is_none")]
    pub auto_cash_out: Option<f64>,
    /// Balance fields reported by the ledger.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub balances: BTreeMap<String, serde_json::Value>,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Connection carries no auth token.
    NotAuthenticated,
    /// Malformed frame or field.
    InvalidInput,
    /// Bet placed outside Betting.
    BettingClosed,
    /// A bet is already open this round.
    AlreadyBet,
    /// No open bet to cash out or cancel.
    NoOpenBet,
    /// Intent refers to an earlier round.
    StaleRound,
    /// Cash-out outside Driving or above the live multiplier.
    InvalidMultiplier,
    /// Ledger refused the request.
    SettlementRejected,
    /// Ledger unreachable or answered garbage.
    SettlementUnavailable,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }

    /// Client-facing form of a round event; `None` for engine-internal
    /// events.
    pub fn from_round_event(event: &RoundEvent) -> Option<Self> {
        match &event.data {
            RoundEventData::PhaseChanged { phase } => Some(ServerMessage::GameState {
                state: *phase,
                round_seq: event.round_seq,
            }),
            RoundEventData::MultiplierUpdated { value } => Some(ServerMessage::Multiplier {
                value: value.as_f64(),
            }),
            RoundEventData::CrashRevealed { crash_point, .. } => Some(ServerMessage::CrashPoint {
                value: crash_point.as_f64(),
            }),
            RoundEventData::HistoryUpdated { items } => Some(ServerMessage::History {
                items: items.clone(),
            }),
            // Never leaves the process.
            RoundEventData::CrashPointDrawn { .. } => None,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
