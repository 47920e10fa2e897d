//! Open Bets
//!
//! One bet slot per connection, tagged with the round it rides on. The
//! ledger owns money; this book only tracks which ledger game a connection
//! may still cash out, cancel or lose.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::core::multiplier::Multiplier;
use crate::settlement::{GameId, WalletType};
use crate::network::registry::ConnectionId;

/// A bet the ledger has accepted and not yet settled.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenBet {
    /// Round the bet rides on.
    pub round_seq: u64,
    /// Ledger game id.
    pub game_id: GameId,
    /// Stake.
    pub stake: f64,
    /// Debited wallet.
    pub wallet_type: WalletType,
    /// Automatic cash-out target.
    pub auto_cash_out: Option<Multiplier>,
    /// Bearer token used to open the game; settlement reuses it.
    pub token: String,
}

/// Open bets keyed by connection.
#[derive(Default)]
pub struct BetBook {
    bets: Mutex<BTreeMap<ConnectionId, OpenBet>>,
    /// Highest round whose losses have been drained. Written under `bets`.
    settled_through: AtomicU64,
}

impl BetBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the book. Callers that must check engine state and mutate the
    /// book atomically hold this guard across both.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, BTreeMap<ConnectionId, OpenBet>> {
        self.bets.lock().await
    }

    /// Open bet of a connection, if any.
    pub async fn get(&self, id: &ConnectionId) -> Option<OpenBet> {
        self.bets.lock().await.get(id).cloned()
    }

    /// Put a bet back after a failed ledger call. Returns `false`, leaving
    /// the book unchanged, when the bet's round has already been settled.
    pub async fn restore(&self, id: ConnectionId, bet: OpenBet) -> bool {
        let mut bets = self.bets.lock().await;
        if bet.round_seq <= self.settled_through.load(Ordering::SeqCst) {
            return false;
        }
        bets.entry(id).or_insert(bet);
        true
    }

    /// Remove and return every bet riding on round `seq` or earlier, and
    /// mark those rounds settled.
    pub async fn drain_round(&self, seq: u64) -> Vec<(ConnectionId, OpenBet)> {
        let mut bets = self.bets.lock().await;
        self.settled_through.fetch_max(seq, Ordering::SeqCst);
        take(&mut bets, |bet| bet.round_seq <= seq)
    }

    /// Remove and return the bets of round `seq` whose automatic cash-out
    /// target is below `limit`.
    pub async fn drain_auto(&self, seq: u64, limit: Multiplier) -> Vec<(ConnectionId, OpenBet)> {
        let mut bets = self.bets.lock().await;
        take(&mut bets, |bet| {
            bet.round_seq == seq && matches!(bet.auto_cash_out, Some(target) if target < limit)
        })
    }

    /// Number of open bets.
    pub async fn len(&self) -> usize {
        self.bets.lock().await.len()
    }

    /// Whether the book is empty.
    pub async fn is_empty(&self) -> bool {
        self.bets.lock().await.is_empty()
    }
}

fn take<F>(bets: &mut BTreeMap<ConnectionId, OpenBet>, pred: F) -> Vec<(ConnectionId, OpenBet)>
where
    F: Fn(&OpenBet) -> bool,
{
    let settled: Vec<ConnectionId> = bets
        .iter()
        .filter(|(_, bet)| pred(bet))
        .map(|(id, _)| *id)
        .collect();

    settled
        .into_iter()
        .filter_map(|id| bets.remove(&id).map(|bet| (id, bet)))
        .collect()
}
