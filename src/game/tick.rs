//! Round Transitions
//!
//! Pure functions the engine loop is built from. None of these sleep or
//! read a clock; the scheduler in `engine` supplies time.

use std::time::Duration;

use crate::core::multiplier::Multiplier;
use crate::game::state::{Round, RoundPhase};

/// Fixed phase durations and the Driving tick period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundTimings {
    /// Betting window.
    pub betting: Duration,
    /// LockBets window.
    pub lock_bets: Duration,
    /// Driving tick period.
    pub tick: Duration,
    /// Pause after a crash before the next round.
    pub crashed: Duration,
}

impl Default for RoundTimings {
    fn default() -> Self {
        Self {
            betting: Duration::from_millis(6000),
            lock_bets: Duration::from_millis(300),
            tick: Duration::from_millis(50),
            crashed: Duration::from_millis(1500),
        }
    }
}

/// The phase that follows `phase`. Strict cycle.
pub fn next_phase(phase: RoundPhase) -> RoundPhase {
    match phase {
        RoundPhase::Betting => RoundPhase::LockBets,
        RoundPhase::LockBets => RoundPhase::Driving,
        RoundPhase::Driving => RoundPhase::Crashed,
        RoundPhase::Crashed => RoundPhase::Betting,
    }
}

/// Fixed duration of `phase`; `None` for Driving, which ends on crash.
pub fn phase_duration(phase: RoundPhase, timings: &RoundTimings) -> Option<Duration> {
    match phase {
        RoundPhase::Betting => Some(timings.betting),
        RoundPhase::LockBets => Some(timings.lock_bets),
        RoundPhase::Driving => None,
        RoundPhase::Crashed => Some(timings.crashed),
    }
}

/// Per-tick increment in hundredths: 0.02 below 5x, 0.03 below 10x, else 0.05.
pub fn multiplier_increment(multiplier: Multiplier) -> u32 {
    if multiplier < Multiplier::from_hundredths(500) {
        2
    } else if multiplier < Multiplier::from_hundredths(1000) {
        3
    } else {
        5
    }
}

/// Outcome of one Driving tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Multiplier advanced and is still below the crash point.
    Climbing(Multiplier),
    /// Multiplier advanced and reached the crash point on this tick.
    Crashed(Multiplier),
    /// Round is not climbing (wrong phase, no crash point, or already
    /// crashed); nothing changed.
    Idle,
}

/// Advance the multiplier by one tick.
///
/// The increment is applied before the crash check, so even a 1.00 crash
/// point yields one tick. Returns [`TickOutcome::Crashed`] exactly once per
/// round: further calls are [`TickOutcome::Idle`].
pub fn step_driving(round: &mut Round) -> TickOutcome {
    if round.phase != RoundPhase::Driving || round.crash_point.is_none() || round.crashed {
        return TickOutcome::Idle;
    }

    round.multiplier = round.multiplier.saturating_add(multiplier_increment(round.multiplier));

    if round.has_reached_crash() {
        round.crashed = true;
        TickOutcome::Crashed(round.multiplier)
    } else {
        TickOutcome::Climbing(round.multiplier)
    }
}

/// Enter `phase`, applying its entry resets.
///
/// Betting clears the crash point and parks the multiplier; entering Betting
/// from Crashed starts a new round sequence. Driving resets the multiplier
/// and installs `crash_point`.
pub fn enter_phase(round: &mut Round, phase: RoundPhase, crash_point: Option<Multiplier>) {
    match phase {
        RoundPhase::Betting => {
            if round.phase == RoundPhase::Crashed {
                round.seq += 1;
            }
            round.multiplier = Multiplier::ONE;
            round.crash_point = None;
            round.crashed = false;
        }
        RoundPhase::LockBets => {}
        RoundPhase::Driving => {
            round.multiplier = Multiplier::ONE;
            round.crash_point = crash_point;
            round.crashed = false;
        }
        RoundPhase::Crashed => {}
    }
    round.phase = phase;
    round.phase_started_at = chrono::Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driving_round(crash: u32) -> Round {
        let mut round = Round::new(1);
        enter_phase(&mut round, RoundPhase::LockBets, None);
        enter_phase(&mut round, RoundPhase::Driving, Some(Multiplier::from_hundredths(crash)));
        round
    }

    #[test]
    fn test_strict_cycle() {
        let mut phase = RoundPhase::Betting;
        let expected = [
            RoundPhase::LockBets,
            RoundPhase::Driving,
            RoundPhase::Crashed,
            RoundPhase::Betting,
        ];
        for want in expected {
            phase = next_phase(phase);
            assert_eq!(phase, want);
        }
    }

    #[test]
    fn test_phase_durations() {
        let timings = RoundTimings::default();
        assert_eq!(phase_duration(RoundPhase::Betting, &timings), Some(Duration::from_millis(6000)));
        assert_eq!(phase_duration(RoundPhase::LockBets, &timings), Some(Duration::from_millis(300)));
        assert_eq!(phase_duration(RoundPhase::Driving, &timings), None);
        assert_eq!(phase_duration(RoundPhase::Crashed, &timings), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_increment_schedule() {
        assert_eq!(multiplier_increment(Multiplier::ONE), 2);
        assert_eq!(multiplier_increment(Multiplier::from_hundredths(499)), 2);
        assert_eq!(multiplier_increment(Multiplier::from_hundredths(500)), 3);
        assert_eq!(multiplier_increment(Multiplier::from_hundredths(999)), 3);
        assert_eq!(multiplier_increment(Multiplier::from_hundredths(1000)), 5);
    }

    #[test]
    fn test_crash_within_three_ticks() {
        let mut round = driving_round(105);

        assert_eq!(step_driving(&mut round), TickOutcome::Climbing(Multiplier::from_hundredths(102)));
        assert_eq!(step_driving(&mut round), TickOutcome::Climbing(Multiplier::from_hundredths(104)));
        assert_eq!(step_driving(&mut round), TickOutcome::Crashed(Multiplier::from_hundredths(106)));
    }

    #[test]
    fn test_crash_reported_once() {
        let mut round = driving_round(102);
        assert_eq!(step_driving(&mut round), TickOutcome::Crashed(Multiplier::from_hundredths(102)));
        assert_eq!(step_driving(&mut round), TickOutcome::Idle);
        assert_eq!(round.multiplier, Multiplier::from_hundredths(102));
    }

    #[test]
    fn test_crash_point_one_still_ticks() {
        let mut round = driving_round(100);
        assert_eq!(step_driving(&mut round), TickOutcome::Crashed(Multiplier::from_hundredths(102)));
        assert_eq!(step_driving(&mut round), TickOutcome::Idle);
        assert_eq!(round.multiplier, Multiplier::from_hundredths(102));
    }

    #[test]
    fn test_multiplier_non_decreasing() {
        let mut round = driving_round(2500);
        let mut last = round.multiplier;
        loop {
            match step_driving(&mut round) {
                TickOutcome::Climbing(m) => {
                    assert!(m > last);
                    last = m;
                }
                TickOutcome::Crashed(m) => {
                    assert!(m >= Multiplier::from_hundredths(2500));
                    break;
                }
                TickOutcome::Idle => panic!("round went idle before crashing"),
            }
        }
    }

    #[test]
    fn test_crash_point_fixed_during_driving() {
        let mut round = driving_round(300);
        let cp = round.crash_point;
        while let TickOutcome::Climbing(_) = step_driving(&mut round) {
            assert_eq!(round.crash_point, cp);
        }
        assert_eq!(round.crash_point, cp);
    }

    #[test]
    fn test_idle_outside_driving() {
        let mut round = Round::new(1);
        assert_eq!(step_driving(&mut round), TickOutcome::Idle);
        assert_eq!(round.multiplier, Multiplier::ONE);
    }

    #[test]
    fn test_betting_resets_and_advances_seq() {
        let mut round = driving_round(110);
        while let TickOutcome::Climbing(_) = step_driving(&mut round) {}
        enter_phase(&mut round, RoundPhase::Crashed, None);
        enter_phase(&mut round, RoundPhase::Betting, None);

        assert_eq!(round.seq, 2);
        assert_eq!(round.multiplier, Multiplier::ONE);
        assert!(round.crash_point.is_none());
    }
}
