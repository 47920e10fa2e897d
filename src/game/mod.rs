//! Game Logic Module
//!
//! The round model and the engine that drives it.
//!
//! ## Module Structure
//!
//! - `settings`: Operator settings and the one-shot override latch
//! - `crash_point`: Crash-point generator
//! - `state`: Round and phase types
//! - `history`: Completed-round ring buffer
//! - `tick`: Pure phase transitions and multiplier schedule
//! - `events`: Events published by the engine
//! - `engine`: The scheduled, supervised round loop

pub mod settings;
pub mod crash_point;
pub mod state;
pub mod history;
pub mod tick;
pub mod events;
pub mod engine;

// Re-export key types
pub use settings::{Mode, OverrideLatch, Settings};
pub use crash_point::CrashDraw;
pub use state::{Round, RoundPhase, RoundSnapshot};
pub use history::{HistoryEntry, RoundHistory};
pub use tick::{RoundTimings, TickOutcome};
pub use events::{RoundEvent, RoundEventData};
pub use engine::{EngineConfig, EngineHandle, RoundEngine, Subscription};
