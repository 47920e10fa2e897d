//! # Crash Round Server
//!
//! Authoritative round engine and broadcast gateway for a crash betting game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                               │
//! │  ├── multiplier.rs- Fixed-point multiplier (hundredths)      │
//! │  └── rng.rs       - Xorshift128+ PRNG and seed derivation    │
//! │                                                              │
//! │  game/            - Round model and engine                   │
//! │  ├── settings.rs  - Operator settings, override latch        │
//! │  ├── crash_point.rs- Crash-point generator                   │
//! │  ├── state.rs     - Round and phase                          │
//! │  ├── history.rs   - Completed-round ring buffer              │
//! │  ├── tick.rs      - Pure phase transitions                   │
//! │  ├── events.rs    - Sequenced round events                   │
//! │  └── engine.rs    - Scheduled, supervised round loop         │
//! │                                                              │
//! │  settlement/      - Settings source and ledger (HTTP)        │
//! │                                                              │
//! │  network/         - WebSocket gateway                        │
//! │  ├── protocol.rs  - Message types                            │
//! │  ├── registry.rs  - Connections and ordered fan-out          │
//! │  ├── bets.rs      - Open bet per connection                  │
//! │  └── server.rs    - Accept loop and intent forwarding        │
//! │                                                              │
//! │  config.rs        - Environment configuration                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Round Clock
//!
//! Exactly one [`RoundEngine`] runs per process. It advances
//! Betting → LockBets → Driving → Crashed on its own timers whether or not
//! anyone is connected. The gateway only reads it through an
//! [`EngineHandle`] and its event stream.
//!
//! The crash point is drawn when Driving starts and is never sent to a
//! client before the round crashes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod settlement;

pub use config::ServerConfig;
pub use core::rng::DeterministicRng;
pub use game::engine::{EngineConfig, EngineHandle, RoundEngine};
pub use network::server::{GatewayConfig, GatewayServer};
pub use settlement::HttpApi;

/// Server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
