//! Network Layer
//!
//! WebSocket gateway between clients, the round engine and the ledger.
//! Nothing here mutates round state; the engine is only read.

pub mod protocol;
pub mod registry;
pub mod bets;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode, BetReceipt};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use bets::{BetBook, OpenBet};
pub use server::{GatewayServer, GatewayConfig, GatewayError};
