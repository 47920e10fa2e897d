//! Operator Settings
//!
//! Process-wide configuration consumed (never owned) by the round engine,
//! refreshed from the settings API at the start of every Betting phase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default upper clamp on crash points when the API omits one.
pub const DEFAULT_MAX_NUMBER: f64 = 50.0;

/// Difficulty / house-edge skew selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    /// Skew toward later crashes, strongly.
    SuperEasy,
    /// Skew toward later crashes.
    Easy,
    /// Mild skew toward earlier crashes.
    #[default]
    Normal,
    /// Skew toward earlier crashes.
    Hard,
    /// Skew toward earlier crashes, strongly.
    SuperHard,
    /// Unrecognised label; base distribution only.
    Unskewed,
}

impl Mode {
    /// Parse an API label. Unknown labels map to [`Mode::Unskewed`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "super_easy" => Mode::SuperEasy,
            "easy" => Mode::Easy,
            "normal" => Mode::Normal,
            "hard" => Mode::Hard,
            "super_hard" => Mode::SuperHard,
            _ => Mode::Unskewed,
        }
    }

    /// API label.
    pub fn label(self) -> &'static str {
        match self {
            Mode::SuperEasy => "super_easy",
            Mode::Easy => "easy",
            Mode::Normal => "normal",
            Mode::Hard => "hard",
            Mode::SuperHard => "super_hard",
            Mode::Unskewed => "none",
        }
    }
}

impl From<String> for Mode {
    fn from(label: String) -> Self {
        Mode::from_label(&label)
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.label().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Settings payload of `GET /settings`.
///
/// Unknown fields are ignored; missing fields fall back to defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Smallest accepted stake.
    #[serde(default)]
    pub min_bet: Option<f64>,
    /// Largest accepted stake.
    #[serde(default)]
    pub max_bet: Option<f64>,
    /// Upper clamp on crash points.
    #[serde(default = "default_max_number")]
    pub max_number: f64,
    /// Skew selector.
    #[serde(default)]
    pub mode: Mode,
    /// One-shot crash point override; neutral when absent or `<= 1`.
    #[serde(default)]
    pub next_round_number: Option<f64>,
}

fn default_max_number() -> f64 {
    DEFAULT_MAX_NUMBER
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_bet: None,
            max_bet: None,
            max_number: DEFAULT_MAX_NUMBER,
            mode: Mode::default(),
            next_round_number: None,
        }
    }
}

impl Settings {
    /// Active override, if one is set to a value above 1.
    pub fn active_override(&self) -> Option<f64> {
        self.next_round_number.filter(|n| *n > 1.0)
    }

    /// `max_number`, never below 1.
    pub fn effective_max(&self) -> f64 {
        if self.max_number.is_nan() || self.max_number < 1.0 {
            1.0
        } else {
            self.max_number
        }
    }
}

/// Tracks a consumed override so polling cannot replay it.
///
/// The settings source has no reset endpoint, so after an override `N` is
/// consumed any refresh still carrying `N` is stale. Seeing a neutral value
/// once re-arms the latch.
#[derive(Clone, Debug, Default)]
pub struct OverrideLatch {
    spent: Option<f64>,
}

impl OverrideLatch {
    /// Record that `value` drove a round.
    pub fn mark_spent(&mut self, value: f64) {
        self.spent = Some(value);
    }

    /// Filter a freshly fetched settings payload in place.
    pub fn filter(&mut self, settings: &mut Settings) {
        match settings.active_override() {
            None => {
                self.spent = None;
                settings.next_round_number = None;
            }
            Some(n) if self.spent == Some(n) => {
                settings.next_round_number = None;
            }
            Some(_) => {}
        }
    }
}
