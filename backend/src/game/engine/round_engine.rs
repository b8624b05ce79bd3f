use super::timings::EngineTimings;
use crate::game::core::{GameMode, GamePhase, Player, RoundState, TickOutcome, TouchOutcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const UPDATE_CAPACITY: usize = 256;

/// Receives "game won by player N" events
pub trait WinRecorder: Send + Sync + 'static {
    fn record_win(&self, winner: Player);
}

impl<F> WinRecorder for F
where
    F: Fn(Player) + Send + Sync + 'static,
{
    fn record_win(&self, winner: Player) {
        self(winner)
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Owner of the authoritative `RoundState`.
///
/// Every mutation goes through one lock and is published, in order, to
/// subscribers. Two kinds of timed task run per game: the round sequencer
/// (pre-roll, reveal, timeout, and the grace delay before the next round) and
/// the per-second clock. Both carry the round epoch they were spawned under
/// and give up when it no longer matches, so a stale timeout can never score
/// against a newer round.
#[derive(Clone)]
pub struct RoundEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    core: Mutex<EngineCore>,
    updates: broadcast::Sender<RoundState>,
    timings: EngineTimings,
    recorder: Arc<dyn WinRecorder>,
}

struct EngineCore {
    state: RoundState,
    rng: StdRng,
    epoch: u64,
    sequencer: Option<JoinHandle<()>>,
    clock: Option<JoinHandle<()>>,
}

impl EngineCore {
    fn cancel_tasks(&mut self) {
        if let Some(task) = self.sequencer.take() {
            task.abort();
        }
        if let Some(task) = self.clock.take() {
            task.abort();
        }
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}

impl RoundEngine {
    pub fn new(recorder: impl WinRecorder) -> Self {
        Self::with_timings(recorder, EngineTimings::default())
    }

    pub fn with_timings(recorder: impl WinRecorder, timings: EngineTimings) -> Self {
        Self::build(recorder, timings, StdRng::from_os_rng())
    }

    /// Deterministic color and delay sequence, for tests and replays.
    pub fn seeded(recorder: impl WinRecorder, timings: EngineTimings, seed: u64) -> Self {
        Self::build(recorder, timings, StdRng::seed_from_u64(seed))
    }

    fn build(recorder: impl WinRecorder, timings: EngineTimings, rng: StdRng) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                core: Mutex::new(EngineCore {
                    state: RoundState::default(),
                    rng,
                    epoch: 0,
                    sequencer: None,
                    clock: None,
                }),
                updates,
                timings,
                recorder: Arc::new(recorder),
            }),
        }
    }

    /// Every state change, in mutation order.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundState> {
        self.inner.updates.subscribe()
    }

    /// Current state and a feed of every later change, taken under one lock so
    /// nothing falls between them.
    pub fn subscribe_with_snapshot(&self) -> (RoundState, broadcast::Receiver<RoundState>) {
        let core = self.inner.lock();
        (core.state.clone(), self.inner.updates.subscribe())
    }

    pub fn snapshot(&self) -> RoundState {
        self.inner.lock().state.clone()
    }

    pub fn timings(&self) -> EngineTimings {
        self.inner.timings
    }

    /// Discard the current game and start a fresh one in `mode`.
    pub fn start_game(&self, mode: GameMode) {
        let mut core = self.inner.lock();
        self.inner.start_game(&mut core, mode);
    }

    pub fn reset_current_game(&self) {
        let mut core = self.inner.lock();
        let mode = core.state.mode;
        self.inner.start_game(&mut core, mode);
    }

    pub fn process_touch(&self, player: Player) -> TouchOutcome {
        let mut core = self.inner.lock();
        self.inner.touch(&mut core, player)
    }

    pub fn pause_game(&self) {
        let mut core = self.inner.lock();
        self.inner.pause(&mut core);
    }

    /// Resume from pause. Starts a brand-new round rather than the interrupted one.
    pub fn resume_game(&self) {
        let mut core = self.inner.lock();
        if core.state.phase != GamePhase::Paused {
            debug!(phase = ?core.state.phase, "Resume ignored, game is not paused");
            return;
        }
        info!("Game resumed");
        self.inner.start_round(&mut core);
    }

    /// Pause and return the state to persist.
    pub fn save_snapshot(&self) -> RoundState {
        let mut core = self.inner.lock();
        self.inner.pause(&mut core);
        core.state.clone()
    }

    /// Replace the whole state with a saved one. The loaded game stays paused.
    pub fn load_state(&self, mut state: RoundState) {
        let mut core = self.inner.lock();
        core.cancel_tasks();
        core.epoch += 1;
        state.phase = GamePhase::Paused;
        core.state = state;
        info!(mode = %core.state.mode, scores = ?core.state.scores(), "Saved game loaded");
        self.inner.publish(&core);
    }

    /// Stop all timed tasks without changing the state.
    pub fn shutdown(&self) {
        let mut core = self.inner.lock();
        core.cancel_tasks();
        core.epoch += 1;
    }
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &EngineCore) {
        // No subscribers is fine
        let _ = self.updates.send(core.state.clone());
    }

    fn start_game(self: &Arc<Self>, core: &mut EngineCore, mode: GameMode) {
        core.cancel_tasks();
        core.state = RoundState::new(mode);
        info!(%mode, "Game starting");
        self.publish(core);
        self.start_round(core);
    }

    fn start_round(self: &Arc<Self>, core: &mut EngineCore) {
        core.cancel_tasks();
        core.epoch += 1;
        let epoch = core.epoch;

        let EngineCore { state, rng, .. } = &mut *core;
        state.begin_round(rng);
        let pre_roll = self.pre_roll_delay(rng);

        debug!(
            epoch,
            target = %core.state.target_color,
            text_color = ?core.state.target_text_color,
            ?pre_roll,
            "Round starting"
        );
        self.publish(core);

        core.clock = Some(self.spawn_clock(epoch));
        core.sequencer = Some(self.spawn_sequencer(epoch, pre_roll));
    }

    fn pre_roll_delay(&self, rng: &mut StdRng) -> Duration {
        let min = self.timings.pre_roll_min.as_millis() as u64;
        let max = self.timings.pre_roll_max.as_millis() as u64;
        if max <= min {
            return self.timings.pre_roll_min;
        }
        Duration::from_millis(rng.random_range(min..max))
    }

    fn touch(self: &Arc<Self>, core: &mut EngineCore, player: Player) -> TouchOutcome {
        let outcome = core.state.apply_touch(player, unix_millis());

        match outcome {
            TouchOutcome::Ignored => {
                debug!(?player, phase = ?core.state.phase, "Touch ignored");
                return outcome;
            }
            TouchOutcome::FalseStart => {
                info!(?player, scores = ?core.state.scores(), "False start");
            }
            TouchOutcome::Scored { correct } => {
                info!(?player, correct, scores = ?core.state.scores(), "Touch scored");
            }
            TouchOutcome::GameOver { winner } => {
                info!(?winner, scores = ?core.state.scores(), "Game over");
            }
        }

        core.cancel_tasks();
        self.publish(core);

        if let TouchOutcome::GameOver { winner } = outcome {
            self.recorder.record_win(winner);
        } else if outcome.schedules_next_round() {
            core.sequencer = Some(self.spawn_next_round(core.epoch));
        }
        outcome
    }

    fn pause(&self, core: &mut EngineCore) {
        if matches!(core.state.phase, GamePhase::Paused | GamePhase::GameOver) {
            debug!(phase = ?core.state.phase, "Pause ignored");
            return;
        }
        core.cancel_tasks();
        core.epoch += 1;
        core.state.phase = GamePhase::Paused;
        info!("Game paused");
        self.publish(core);
    }

    fn finish_countdown(&self, core: &mut EngineCore) {
        core.cancel_tasks();
        let winner = core.state.finish_countdown();
        info!(?winner, scores = ?core.state.scores(), "Countdown finished");
        self.publish(core);
        if let Some(winner) = winner {
            self.recorder.record_win(winner);
        }
    }

    fn spawn_sequencer(self: &Arc<Self>, epoch: u64, pre_roll: Duration) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let timeout = self.timings.round_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(pre_roll).await;
            {
                let Some(inner) = engine.upgrade() else { return };
                let mut core = inner.lock();
                if core.epoch != epoch {
                    return;
                }
                let EngineCore { state, rng, .. } = &mut *core;
                if !state.activate(rng) {
                    return;
                }
                debug!(
                    epoch,
                    round_color = %core.state.round_color,
                    true_trial = core.state.is_true_trial(),
                    "Round live"
                );
                inner.publish(&core);
            }

            tokio::time::sleep(timeout).await;
            let Some(inner) = engine.upgrade() else { return };
            let mut core = inner.lock();
            // Only time out the round this task was started for
            if core.epoch != epoch || core.state.phase != GamePhase::Active {
                return;
            }
            info!(epoch, "Round timed out");
            inner.touch(&mut core, Player::Nobody);
        })
    }

    fn spawn_next_round(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let grace = self.timings.grace_delay;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = engine.upgrade() else { return };
            let mut core = inner.lock();
            if core.epoch != epoch || core.state.phase != GamePhase::Processing {
                return;
            }
            inner.start_round(&mut core);
        })
    }

    fn spawn_clock(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        let period = self.timings.tick;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(inner) = engine.upgrade() else { return };
                let mut core = inner.lock();
                if core.epoch != epoch {
                    return;
                }
                match core.state.tick() {
                    TickOutcome::Expired => {
                        inner.finish_countdown(&mut core);
                        return;
                    }
                    TickOutcome::Elapsed(_) | TickOutcome::Remaining(_) => inner.publish(&core),
                }
            }
        })
    }
}
