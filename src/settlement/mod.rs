//! External Collaborators
//!
//! The settings source polled by the engine and the ledger the gateway
//! forwards bet intents to. Both live behind one HTTP API in production
//! ([`HttpApi`]); tests substitute in-memory implementations.
//!
//! The ledger owns balances, payouts and round-phase validation. Nothing in
//! this crate re-checks affordability.

pub mod http;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::game::settings::Settings;

pub use http::HttpApi;

/// Errors talking to the settings / ledger API.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Network or protocol failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-2xx status.
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, or the raw body.
        message: String,
    },

    /// The API answered 2xx with a body we could not read.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of operator [`Settings`].
pub trait SettingsSource: Send + Sync + 'static {
    /// Fetch the current settings.
    fn fetch(&self) -> impl Future<Output = Result<Settings, SettlementError>> + Send;
}

/// Which wallet a stake is debited from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    /// Main balance.
    #[default]
    Balance,
    /// Withdrawable balance.
    WithBalance,
    /// Bonus balance.
    Bonus,
}

/// Ledger-issued game identifier. The API sends numbers or strings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl<'de> Deserialize<'de> for GameId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => GameId(n.to_string()),
            Raw::Str(s) => GameId(s),
        })
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `POST /start-game` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    /// Stake to debit.
    pub stake: f64,
    /// Wallet to debit from.
    pub wallet_type: WalletType,
}

/// `POST /start-game` response: the game id plus the debited wallet's new
/// balance under the wallet's own key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartGameResponse {
    /// Ledger game id.
    pub game_id: GameId,
    /// Remaining fields, e.g. `{"balance": 90}`.
    #[serde(flatten)]
    pub balances: BTreeMap<String, serde_json::Value>,
}

/// `POST /cashout` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CashoutRequest {
    /// Payout amount (stake × multiplier).
    pub amount: f64,
    /// Multiplier cashed out at.
    pub score: f64,
    /// Ledger game id.
    pub game_id: GameId,
}

/// `POST /lose` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoseRequest {
    /// Multiplier the round crashed at.
    pub score: f64,
    /// Ledger game id.
    pub game_id: GameId,
}

/// `POST /cancel-bet` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelBetRequest {
    /// Ledger game id.
    pub game_id: GameId,
}

/// `GET /get-balance` response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Main balance.
    #[serde(default)]
    pub balance: f64,
    /// Bonus balance.
    #[serde(default)]
    pub bonus: f64,
    /// Withdrawable balance.
    #[serde(default)]
    pub with_balance: f64,
    /// Commission balance.
    #[serde(default)]
    pub commissions: f64,
}

/// Settlement ledger, authenticated per player by bearer token.
pub trait Ledger: Send + Sync + 'static {
    /// Debit a stake and open a game.
    fn start_game(
        &self,
        token: &str,
        request: StartGameRequest,
    ) -> impl Future<Output = Result<StartGameResponse, SettlementError>> + Send;

    /// Credit a cash-out.
    fn cashout(
        &self,
        token: &str,
        request: CashoutRequest,
    ) -> impl Future<Output = Result<serde_json::Value, SettlementError>> + Send;

    /// Record a loss.
    fn lose(
        &self,
        token: &str,
        request: LoseRequest,
    ) -> impl Future<Output = Result<serde_json::Value, SettlementError>> + Send;

    /// Cancel an open game before the round starts.
    fn cancel_bet(
        &self,
        token: &str,
        request: CancelBetRequest,
    ) -> impl Future<Output = Result<serde_json::Value, SettlementError>> + Send;

    /// Wallet balances.
    fn balance(&self, token: &str) -> impl Future<Output = Result<Balance, SettlementError>> + Send;

    /// Recent games, passed through untouched.
    fn games(&self, token: &str) -> impl Future<Output = Result<serde_json::Value, SettlementError>> + Send;
}
