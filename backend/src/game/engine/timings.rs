use std::time::Duration;

pub const DEFAULT_PRE_ROLL_MIN: Duration = Duration::from_millis(2000);
pub const DEFAULT_PRE_ROLL_MAX: Duration = Duration::from_millis(5000);
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Delays driving the round sequencer and the game clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimings {
    /// Random pre-roll before the round color shows, drawn from `[min, max)`
    pub pre_roll_min: Duration,
    pub pre_roll_max: Duration,
    /// How long a live round waits for a touch
    pub round_timeout: Duration,
    /// Pause after a scored touch before the next round
    pub grace_delay: Duration,
    pub tick: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            pre_roll_min: DEFAULT_PRE_ROLL_MIN,
            pre_roll_max: DEFAULT_PRE_ROLL_MAX,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            grace_delay: DEFAULT_GRACE_DELAY,
            tick: DEFAULT_TICK,
        }
    }
}

impl EngineTimings {
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_pre_roll(mut self, min: Duration, max: Duration) -> Self {
        self.pre_roll_min = min;
        self.pre_roll_max = max;
        self
    }
}
