//! Round Engine
//!
//! Owns the single authoritative [`Round`] and drives it through
//! Betting → LockBets → Driving → Crashed on its own clock, independent of
//! any connected client.
//!
//! ## Scheduling
//!
//! One task runs the phase loop. Each phase is entered (state mutated and
//! events published under the write lock), then the task sleeps until the
//! phase deadline. Driving replaces the sleep with a tick interval that is
//! dropped, once, on crash.
//!
//! A supervisor owns that task. If the loop panics it is re-armed at the
//! phase after the one that failed, so the round clock keeps moving.
//!
//! ## Consistency
//!
//! State mutation and event publication happen under one write lock, and
//! [`EngineHandle::subscribe`] takes the read lock while it subscribes. A
//! subscriber therefore sees exactly the events after its snapshot.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::multiplier::Multiplier;
use crate::core::rng::RandomSource;
use crate::game::crash_point::{self, CrashDraw};
use crate::game::events::{RoundEvent, RoundEventData};
use crate::game::history::{HistoryEntry, RoundHistory, DEFAULT_HISTORY_CAPACITY};
use crate::game::settings::{OverrideLatch, Settings};
use crate::game::state::{Round, RoundPhase, RoundSnapshot};
use crate::game::tick::{enter_phase, next_phase, phase_duration, step_driving, RoundTimings, TickOutcome};
use crate::settlement::SettingsSource;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Phase durations and tick period.
    pub timings: RoundTimings,
    /// History ring buffer capacity.
    pub history_capacity: usize,
    /// Settings used until the first successful refresh.
    pub initial_settings: Settings,
    /// Event channel capacity.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timings: RoundTimings::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            initial_settings: Settings::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Round + history + settings: the unit guarded by the engine lock.
struct EngineState {
    round: Round,
    history: RoundHistory,
    settings: Settings,
    latch: OverrideLatch,
    last_event_seq: u64,
}

impl EngineState {
    /// Publish an event. Must be called with the write lock held.
    fn emit(&mut self, events: &broadcast::Sender<RoundEvent>, data: RoundEventData) {
        self.last_event_seq += 1;
        let event = RoundEvent {
            seq: self.last_event_seq,
            round_seq: self.round.seq,
            data,
        };
        // No subscribers is fine; the round runs regardless.
        let _ = events.send(event);
    }
}

struct Shared {
    state: RwLock<EngineState>,
    events: broadcast::Sender<RoundEvent>,
}

/// Snapshot of engine state paired with a live event receiver.
pub struct Subscription {
    /// Events published after the snapshot.
    pub events: broadcast::Receiver<RoundEvent>,
    /// Round at subscription time.
    pub snapshot: RoundSnapshot,
    /// History at subscription time, newest first.
    pub history: Vec<HistoryEntry>,
    /// Sequence of the last event reflected in the snapshot.
    pub as_of: u64,
}

/// Read-only view of the engine, cheap to clone.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Current round view.
    pub async fn snapshot(&self) -> RoundSnapshot {
        self.shared.state.read().await.round.snapshot()
    }

    /// Current round view, history and the last event it reflects.
    pub async fn snapshot_with_history(&self) -> (RoundSnapshot, Vec<HistoryEntry>, u64) {
        let state = self.shared.state.read().await;
        (state.round.snapshot(), state.history.items(), state.last_event_seq)
    }

    /// Completed rounds, newest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.shared.state.read().await.history.items()
    }

    /// Settings currently in force.
    pub async fn settings(&self) -> Settings {
        self.shared.state.read().await.settings.clone()
    }

    /// Multiplier of round `seq` while it is still climbing; `None` once it
    /// has reached its crash point or left Driving.
    pub async fn live_multiplier(&self, seq: u64) -> Option<Multiplier> {
        let state = self.shared.state.read().await;
        let round = &state.round;
        if round.seq == seq && round.phase == RoundPhase::Driving && !round.has_reached_crash() {
            Some(round.multiplier)
        } else {
            None
        }
    }

    /// Round, crash point and final multiplier once the current round has
    /// crashed; `None` in every other phase.
    pub async fn revealed_crash(&self) -> Option<(u64, Multiplier, Multiplier)> {
        let state = self.shared.state.read().await;
        let round = &state.round;
        match (round.phase, round.crash_point) {
            (RoundPhase::Crashed, Some(crash_point)) => Some((round.seq, crash_point, round.multiplier)),
            _ => None,
        }
    }

    /// Raw event receiver without a snapshot. For consumers that track
    /// event sequence numbers themselves.
    pub fn events(&self) -> broadcast::Receiver<RoundEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribe to events together with a consistent snapshot.
    pub async fn subscribe(&self) -> Subscription {
        let state = self.shared.state.read().await;
        let events = self.shared.events.subscribe();
        Subscription {
            events,
            snapshot: state.round.snapshot(),
            history: state.history.items(),
            as_of: state.last_event_seq,
        }
    }
}

/// The round engine.
pub struct RoundEngine<S, R> {
    shared: Arc<Shared>,
    source: Arc<S>,
    rng: Arc<Mutex<R>>,
    timings: RoundTimings,
}

impl<S, R> Clone for RoundEngine<S, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            source: self.source.clone(),
            rng: self.rng.clone(),
            timings: self.timings,
        }
    }
}

impl<S, R> RoundEngine<S, R>
where
    S: SettingsSource,
    R: RandomSource + Send + 'static,
{
    /// Create an engine in Betting of round 1. Nothing runs until
    /// [`RoundEngine::spawn`].
    pub fn new(config: EngineConfig, source: Arc<S>, rng: R) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(16));
        let state = EngineState {
            round: Round::new(1),
            history: RoundHistory::new(config.history_capacity),
            settings: config.initial_settings,
            latch: OverrideLatch::default(),
            last_event_seq: 0,
        };

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                events,
            }),
            source,
            rng: Arc::new(Mutex::new(rng)),
            timings: config.timings,
        }
    }

    /// Read-only handle for the gateway and tests.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start the supervised phase loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.supervise())
    }

    /// Run the phase loop, re-arming it after a panic.
    async fn supervise(self) {
        let mut start = self.shared.state.read().await.round.phase;

        loop {
            let engine = self.clone();
            let cycle = tokio::spawn(async move { engine.run_from(start).await });

            match cycle.await {
                Ok(()) => return,
                Err(e) if e.is_panic() => {
                    let failed = self.shared.state.read().await.round.phase;
                    start = next_phase(failed);
                    error!("round engine panicked in {}, re-arming at {}", failed, start);
                }
                Err(e) => {
                    warn!("round engine cancelled: {}", e);
                    return;
                }
            }
        }
    }

    /// Phase loop. Never returns on its own.
    async fn run_from(&self, mut phase: RoundPhase) {
        loop {
            match phase {
                RoundPhase::Betting => self.run_betting().await,
                RoundPhase::LockBets => self.run_lock_bets().await,
                RoundPhase::Driving => self.run_driving().await,
                RoundPhase::Crashed => self.run_crashed().await,
            }
            phase = next_phase(phase);
        }
    }

    async fn run_betting(&self) {
        let round_seq = {
            let mut state = self.shared.state.write().await;
            enter_phase(&mut state.round, RoundPhase::Betting, None);
            state.emit(&self.shared.events, RoundEventData::PhaseChanged { phase: RoundPhase::Betting });
            state.emit(&self.shared.events, RoundEventData::MultiplierUpdated { value: Multiplier::ONE });
            debug!("round {} betting", state.round.seq);
            state.round.seq
        };

        let deadline = Instant::now() + self.phase_length(RoundPhase::Betting);

        // The refresh may not outlive Betting: a late answer is dropped.
        match time::timeout_at(deadline, self.source.fetch()).await {
            Ok(Ok(fresh)) => self.apply_settings(round_seq, fresh).await,
            Ok(Err(e)) => warn!("settings refresh failed, keeping previous settings: {}", e),
            Err(_) => warn!("settings refresh did not finish before betting closed, keeping previous settings"),
        }

        time::sleep_until(deadline).await;
    }

    async fn apply_settings(&self, round_seq: u64, mut fresh: Settings) {
        let mut state = self.shared.state.write().await;
        if state.round.seq != round_seq || state.round.phase != RoundPhase::Betting {
            debug!("discarding settings fetched for round {}", round_seq);
            return;
        }
        state.latch.filter(&mut fresh);
        if fresh != state.settings {
            info!(
                "settings updated: mode={} max_number={} override={:?}",
                fresh.mode,
                fresh.max_number,
                fresh.active_override()
            );
        }
        state.settings = fresh;
    }

    async fn run_lock_bets(&self) {
        {
            let mut state = self.shared.state.write().await;
            enter_phase(&mut state.round, RoundPhase::LockBets, None);
            state.emit(&self.shared.events, RoundEventData::PhaseChanged { phase: RoundPhase::LockBets });
            debug!("round {} bets locked", state.round.seq);
        }

        time::sleep(self.phase_length(RoundPhase::LockBets)).await;
    }

    async fn run_driving(&self) {
        {
            let mut state = self.shared.state.write().await;
            let draw = self.draw_crash_point(&state.settings);

            if let Some(n) = draw.override_consumed {
                state.latch.mark_spent(n);
                state.settings.next_round_number = None;
                info!("round {} using operator override {}", state.round.seq, n);
            }

            enter_phase(&mut state.round, RoundPhase::Driving, Some(draw.crash_point));
            state.emit(&self.shared.events, RoundEventData::PhaseChanged { phase: RoundPhase::Driving });
            state.emit(
                &self.shared.events,
                RoundEventData::CrashPointDrawn {
                    value: draw.crash_point,
                    forced: draw.override_consumed.is_some(),
                },
            );
            state.emit(&self.shared.events, RoundEventData::MultiplierUpdated { value: Multiplier::ONE });
            debug!("round {} driving", state.round.seq);
        }

        let period = self.timings.tick;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let mut state = self.shared.state.write().await;
            match step_driving(&mut state.round) {
                TickOutcome::Climbing(value) => {
                    state.emit(&self.shared.events, RoundEventData::MultiplierUpdated { value });
                }
                TickOutcome::Crashed(value) => {
                    state.emit(&self.shared.events, RoundEventData::MultiplierUpdated { value });
                    break;
                }
                TickOutcome::Idle => {
                    warn!("round {} driving without a live crash point", state.round.seq);
                    break;
                }
            }
        }
        // ticker dropped here: the tick timer stops exactly once
    }

    fn draw_crash_point(&self, settings: &Settings) -> CrashDraw {
        // A panic elsewhere cannot leave the RNG half-updated.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        crash_point::generate(settings, &mut *rng)
    }

    async fn run_crashed(&self) {
        {
            let mut state = self.shared.state.write().await;
            let final_multiplier = state.round.multiplier;
            let crash_point = state.round.crash_point.unwrap_or(final_multiplier);

            enter_phase(&mut state.round, RoundPhase::Crashed, None);
            state.emit(&self.shared.events, RoundEventData::PhaseChanged { phase: RoundPhase::Crashed });
            state.emit(
                &self.shared.events,
                RoundEventData::CrashRevealed {
                    crash_point,
                    final_multiplier,
                },
            );

            state.history.push(HistoryEntry::crash(final_multiplier));
            let items = state.history.items();
            state.emit(&self.shared.events, RoundEventData::HistoryUpdated { items });

            info!(
                "round {} crashed at {}x (crash point {}x)",
                state.round.seq, final_multiplier, crash_point
            );
        }

        time::sleep(self.phase_length(RoundPhase::Crashed)).await;
    }

    fn phase_length(&self, phase: RoundPhase) -> time::Duration {
        phase_duration(phase, &self.timings).unwrap_or(self.timings.tick)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::SequenceRng;
    use crate::game::settings::Mode;
    use crate::settlement::SettlementError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands out a fixed settings payload, optionally after a delay.
    struct StaticSource {
        settings: Settings,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn new(settings: Settings) -> Arc<Self> {
            Self::delayed(settings, Duration::ZERO)
        }

        fn delayed(settings: Settings, delay: Duration) -> Arc<Self> {
            Arc::new(Self { settings, delay, calls: AtomicUsize::new(0) })
        }
    }

    impl SettingsSource for StaticSource {
        async fn fetch(&self) -> Result<Settings, SettlementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            Ok(self.settings.clone())
        }
    }

    struct FailingSource;

    impl SettingsSource for FailingSource {
        async fn fetch(&self) -> Result<Settings, SettlementError> {
            Err(SettlementError::Rejected { status: 503, message: "down".into() })
        }
    }

    /// Panics on its first fetch only.
    struct PanicOnceSource {
        fired: AtomicBool,
    }

    impl SettingsSource for PanicOnceSource {
        async fn fetch(&self) -> Result<Settings, SettlementError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                panic!("settings source exploded");
            }
            Ok(Settings::default())
        }
    }

    fn forced(n: f64) -> Settings {
        Settings { next_round_number: Some(n), ..Default::default() }
    }

    async fn next(rx: &mut broadcast::Receiver<RoundEvent>) -> RoundEvent {
        rx.recv().await.expect("engine stopped publishing")
    }

    async fn wait_for_phase(rx: &mut broadcast::Receiver<RoundEvent>, want: RoundPhase) -> RoundEvent {
        loop {
            let event = next(rx).await;
            if event.data == (RoundEventData::PhaseChanged { phase: want }) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_in_betting_then_locks_then_drives() {
        let engine = RoundEngine::new(EngineConfig::default(), StaticSource::new(forced(3.0)), SequenceRng::new(vec![0.5]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        assert_eq!(sub.snapshot.phase, RoundPhase::Betting);
        assert_eq!(sub.snapshot.multiplier, Multiplier::ONE);

        let started = Instant::now();
        let task = engine.spawn();

        let first = next(&mut sub.events).await;
        assert_eq!(first.data, RoundEventData::PhaseChanged { phase: RoundPhase::Betting });
        assert_eq!(first.round_seq, 1);
        assert_eq!(
            next(&mut sub.events).await.data,
            RoundEventData::MultiplierUpdated { value: Multiplier::ONE }
        );

        wait_for_phase(&mut sub.events, RoundPhase::LockBets).await;
        assert_eq!(started.elapsed(), Duration::from_millis(6000));

        wait_for_phase(&mut sub.events, RoundPhase::Driving).await;
        assert_eq!(started.elapsed(), Duration::from_millis(6300));

        match next(&mut sub.events).await.data {
            RoundEventData::CrashPointDrawn { value, forced } => {
                assert_eq!(value, Multiplier::from_hundredths(300));
                assert!(forced);
            }
            other => panic!("expected crash point draw, got {:?}", other),
        }
        assert_eq!(
            next(&mut sub.events).await.data,
            RoundEventData::MultiplierUpdated { value: Multiplier::ONE }
        );

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_at_105_records_106() {
        let engine = RoundEngine::new(EngineConfig::default(), StaticSource::new(forced(1.05)), SequenceRng::new(vec![0.5]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        wait_for_phase(&mut sub.events, RoundPhase::Driving).await;
        let driving_at = Instant::now();

        let mut ticks = Vec::new();
        loop {
            match next(&mut sub.events).await.data {
                RoundEventData::MultiplierUpdated { value } => ticks.push(value),
                RoundEventData::PhaseChanged { phase: RoundPhase::Crashed } => break,
                _ => {}
            }
        }
        let hundredths: Vec<u32> = ticks.iter().map(|m| m.hundredths()).collect();
        assert_eq!(hundredths, vec![100, 102, 104, 106]);
        assert_eq!(driving_at.elapsed(), Duration::from_millis(150));

        assert_eq!(
            next(&mut sub.events).await.data,
            RoundEventData::CrashRevealed {
                crash_point: Multiplier::from_hundredths(105),
                final_multiplier: Multiplier::from_hundredths(106),
            }
        );
        match next(&mut sub.events).await.data {
            RoundEventData::HistoryUpdated { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].multiplier, "1.06");
                assert_eq!(items[0].result, "crash");
                assert_eq!(items[0].winnings, 0);
            }
            other => panic!("expected history, got {:?}", other),
        }

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_round_resets_and_increments_seq() {
        let engine = RoundEngine::new(EngineConfig::default(), StaticSource::new(forced(1.02)), SequenceRng::new(vec![0.5]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        wait_for_phase(&mut sub.events, RoundPhase::Crashed).await;
        let crashed_at = Instant::now();
        let betting = wait_for_phase(&mut sub.events, RoundPhase::Betting).await;

        assert_eq!(crashed_at.elapsed(), Duration::from_millis(1500));
        assert_eq!(betting.round_seq, 2);
        assert_eq!(
            next(&mut sub.events).await.data,
            RoundEventData::MultiplierUpdated { value: Multiplier::ONE }
        );

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.seq, 2);
        assert_eq!(snapshot.multiplier, Multiplier::ONE);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_used_for_exactly_one_round() {
        // The source keeps reporting the same override every poll.
        let source = StaticSource::new(Settings { mode: Mode::Unskewed, ..forced(4.0) });
        // u = 0.0 gives a base of 1.00 once the override is spent
        let engine = RoundEngine::new(EngineConfig::default(), source, SequenceRng::new(vec![0.0]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        let mut reveals = Vec::new();
        while reveals.len() < 2 {
            if let RoundEventData::CrashRevealed { crash_point, final_multiplier } = next(&mut sub.events).await.data {
                reveals.push((crash_point, final_multiplier));
            }
        }

        assert_eq!(reveals[0].0, Multiplier::from_hundredths(400));
        // Base of 1.00 still gets its one tick
        assert_eq!(reveals[1], (Multiplier::ONE, Multiplier::from_hundredths(102)));
        assert_eq!(handle.settings().await.active_override(), None);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_point_one_emits_a_tick() {
        let source = StaticSource::new(Settings { mode: Mode::Unskewed, ..Default::default() });
        let engine = RoundEngine::new(EngineConfig::default(), source, SequenceRng::new(vec![0.0]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        wait_for_phase(&mut sub.events, RoundPhase::Driving).await;
        let driving_at = Instant::now();

        let mut ticks = Vec::new();
        loop {
            match next(&mut sub.events).await.data {
                RoundEventData::MultiplierUpdated { value } => ticks.push(value.hundredths()),
                RoundEventData::PhaseChanged { phase: RoundPhase::Crashed } => break,
                _ => {}
            }
        }
        assert_eq!(ticks, vec![100, 102]);
        assert_eq!(driving_at.elapsed(), Duration::from_millis(50));

        assert_eq!(
            next(&mut sub.events).await.data,
            RoundEventData::CrashRevealed {
                crash_point: Multiplier::ONE,
                final_multiplier: Multiplier::from_hundredths(102),
            }
        );
        assert_eq!(handle.history().await[0].multiplier, "1.02");

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refresh_does_not_hold_betting() {
        let slow = Settings { mode: Mode::SuperHard, ..Default::default() };
        let source = StaticSource::delayed(slow, Duration::from_secs(60));
        let engine = RoundEngine::new(EngineConfig::default(), source.clone(), SequenceRng::new(vec![0.5]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let started = Instant::now();
        let task = engine.spawn();

        wait_for_phase(&mut sub.events, RoundPhase::LockBets).await;
        assert_eq!(started.elapsed(), Duration::from_millis(6000));
        assert_eq!(handle.settings().await.mode, Mode::Normal);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_settings() {
        let config = EngineConfig {
            initial_settings: Settings { mode: Mode::Hard, max_number: 12.0, ..Default::default() },
            ..Default::default()
        };
        let engine = RoundEngine::new(config, Arc::new(FailingSource), SequenceRng::new(vec![0.5]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        wait_for_phase(&mut sub.events, RoundPhase::Driving).await;
        let settings = handle.settings().await;
        assert_eq!(settings.mode, Mode::Hard);
        assert_eq!(settings.max_number, 12.0);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_phase_is_re_armed() {
        let source = Arc::new(PanicOnceSource { fired: AtomicBool::new(false) });
        let engine = RoundEngine::new(EngineConfig::default(), source, SequenceRng::new(vec![0.1]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        wait_for_phase(&mut sub.events, RoundPhase::Betting).await;
        wait_for_phase(&mut sub.events, RoundPhase::LockBets).await;
        wait_for_phase(&mut sub.events, RoundPhase::Driving).await;
        wait_for_phase(&mut sub.events, RoundPhase::Crashed).await;
        let next_round = wait_for_phase(&mut sub.events, RoundPhase::Betting).await;
        assert_eq!(next_round.round_seq, 2);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_capacity_respected() {
        let config = EngineConfig { history_capacity: 3, ..Default::default() };
        let engine = RoundEngine::new(config, StaticSource::new(Settings::default()), SequenceRng::new(vec![0.01, 0.99]));
        let handle = engine.handle();
        let mut sub = handle.subscribe().await;
        let task = engine.spawn();

        let mut rounds = 0;
        while rounds < 5 {
            if let RoundEventData::HistoryUpdated { items } = next(&mut sub.events).await.data {
                rounds += 1;
                assert!(items.len() <= 3);
                assert_eq!(items.len(), rounds.min(3));
            }
        }
        assert_eq!(handle.history().await.len(), 3);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_sees_only_later_events() {
        let engine = RoundEngine::new(EngineConfig::default(), StaticSource::new(forced(2.0)), SequenceRng::new(vec![0.5]));
        let handle = engine.handle();
        let mut early = handle.subscribe().await;
        let task = engine.spawn();

        wait_for_phase(&mut early.events, RoundPhase::Driving).await;
        time::sleep(Duration::from_millis(120)).await;

        let mut late = handle.subscribe().await;
        assert_eq!(late.snapshot.phase, RoundPhase::Driving);
        let first = next(&mut late.events).await;
        assert_eq!(first.seq, late.as_of + 1);

        task.abort();
    }
}
