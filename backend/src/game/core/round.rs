use super::color::Color;
use super::mode::{ClockKind, GameMode};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    /// Target announced, round color not shown yet
    #[default]
    Waiting,
    /// Round color shown, touches are being judged
    Active,
    /// Touch handled, next round pending
    Processing,
    GameOver,
    Paused,
}

/// Who touched. `Nobody` is the synthetic touch produced by a round timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Player {
    Nobody,
    One,
    Two,
}

impl Player {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Player::Nobody),
            1 => Some(Player::One),
            2 => Some(Player::Two),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Player::Nobody => 0,
            Player::One => 1,
            Player::Two => 2,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
            Player::Nobody => Player::Nobody,
        }
    }
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Player::Nobody => f.write_str("nobody"),
            Player::One => f.write_str("Player 1"),
            Player::Two => f.write_str("Player 2"),
        }
    }
}

/// Result of feeding a touch into the round rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Late or duplicate input, nothing changed
    Ignored,
    /// Touched before the round went live
    FalseStart,
    /// Touch judged; `correct` is whether the round was a true trial
    Scored { correct: bool },
    GameOver { winner: Player },
}

impl TouchOutcome {
    pub fn schedules_next_round(self) -> bool {
        matches!(self, TouchOutcome::FalseStart | TouchOutcome::Scored { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Elapsed(u64),
    Remaining(u32),
    /// Countdown hit zero; caller must end the game
    Expired,
}

/// Complete, replicated state of one game (pure logic, no I/O)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    pub score_p1: u32,
    pub score_p2: u32,
    pub phase: GamePhase,
    #[serde(default = "default_target")]
    pub target_color: Color,
    #[serde(default = "default_round_color")]
    pub round_color: Color,
    /// Decoy ink for the target name, confusion mode only
    #[serde(default)]
    pub target_text_color: Option<Color>,
    #[serde(default)]
    pub winner_message: String,
    #[serde(default)]
    pub time_elapsed: u64,
    #[serde(default)]
    pub remaining_time: u32,
    pub mode: GameMode,
    #[serde(default)]
    pub move_history: Vec<String>,
}

fn default_target() -> Color {
    Color::Red
}

fn default_round_color() -> Color {
    Color::Gray
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new(GameMode::default())
    }
}

impl RoundState {
    pub fn new(mode: GameMode) -> Self {
        Self {
            score_p1: 0,
            score_p2: 0,
            phase: GamePhase::Waiting,
            target_color: default_target(),
            round_color: default_round_color(),
            target_text_color: None,
            winner_message: String::new(),
            time_elapsed: 0,
            remaining_time: mode.countdown_secs(),
            mode,
            move_history: Vec::new(),
        }
    }

    pub fn scores(&self) -> (u32, u32) {
        (self.score_p1, self.score_p2)
    }

    /// Color the target name is drawn in: the decoy if there is one, else the target itself.
    pub fn display_text_color(&self) -> Color {
        self.target_text_color.unwrap_or(self.target_color)
    }

    pub fn is_true_trial(&self) -> bool {
        self.round_color == self.target_color
    }

    /// Announce a new target and go back to waiting.
    pub fn begin_round<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let target = Color::random(rng);
        self.target_text_color = self
            .mode
            .uses_decoy_text_color()
            .then(|| Color::random_except(rng, target));
        self.target_color = target;
        self.round_color = Color::Gray;
        self.phase = GamePhase::Waiting;
    }

    /// Reveal the round color. Returns false if the round was preempted.
    pub fn activate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        if self.phase != GamePhase::Waiting {
            return false;
        }
        self.round_color = if rng.random_bool(0.5) {
            self.target_color
        } else {
            Color::random_except(rng, self.target_color)
        };
        self.phase = GamePhase::Active;
        true
    }

    pub fn apply_touch(&mut self, player: Player, at_ms: u64) -> TouchOutcome {
        match self.phase {
            GamePhase::Processing | GamePhase::GameOver | GamePhase::Paused => {
                return TouchOutcome::Ignored;
            }
            GamePhase::Waiting | GamePhase::Active => {}
        }

        self.move_history
            .push(format!("P{} touched at {}", player.index(), at_ms));

        if self.phase == GamePhase::Waiting {
            self.penalize(player);
            self.phase = GamePhase::Processing;
            return TouchOutcome::FalseStart;
        }

        let correct = self.is_true_trial();
        match (player, correct) {
            (Player::Nobody, true) => {
                self.penalize(Player::One);
                self.penalize(Player::Two);
            }
            (Player::Nobody, false) => {}
            (p, true) => self.reward(p),
            (p, false) => self.reward(p.opponent()),
        }

        if let Some(winner) = self.threshold_winner() {
            self.phase = GamePhase::GameOver;
            self.winner_message = format!("{winner} wins!");
            return TouchOutcome::GameOver { winner };
        }

        self.phase = GamePhase::Processing;
        TouchOutcome::Scored { correct }
    }

    /// One second of game clock.
    pub fn tick(&mut self) -> TickOutcome {
        match self.mode.clock() {
            ClockKind::Elapsed => {
                self.time_elapsed += 1;
                TickOutcome::Elapsed(self.time_elapsed)
            }
            ClockKind::Countdown => {
                self.remaining_time = self.remaining_time.saturating_sub(1);
                if self.remaining_time == 0 {
                    TickOutcome::Expired
                } else {
                    TickOutcome::Remaining(self.remaining_time)
                }
            }
        }
    }

    /// End a countdown game on points. Returns the winner, `None` on a tie.
    pub fn finish_countdown(&mut self) -> Option<Player> {
        let winner = match self.score_p1.cmp(&self.score_p2) {
            std::cmp::Ordering::Greater => Some(Player::One),
            std::cmp::Ordering::Less => Some(Player::Two),
            std::cmp::Ordering::Equal => None,
        };
        self.winner_message = match winner {
            Some(p) => format!("{p} wins on points!"),
            None => "It's a tie!".to_string(),
        };
        self.phase = GamePhase::GameOver;
        self.remaining_time = 0;
        winner
    }

    fn threshold_winner(&self) -> Option<Player> {
        let threshold = self.mode.win_threshold()?;
        if self.score_p1 < threshold && self.score_p2 < threshold {
            return None;
        }
        if self.score_p1 > self.score_p2 {
            Some(Player::One)
        } else {
            Some(Player::Two)
        }
    }

    fn reward(&mut self, player: Player) {
        match player {
            Player::One => self.score_p1 += 1,
            Player::Two => self.score_p2 += 1,
            Player::Nobody => {}
        }
    }

    fn penalize(&mut self, player: Player) {
        match player {
            Player::One => self.score_p1 = self.score_p1.saturating_sub(1),
            Player::Two => self.score_p2 = self.score_p2.saturating_sub(1),
            Player::Nobody => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn active(mode: GameMode, scores: (u32, u32), true_trial: bool) -> RoundState {
        let mut state = RoundState::new(mode);
        state.score_p1 = scores.0;
        state.score_p2 = scores.1;
        state.phase = GamePhase::Active;
        state.target_color = Color::Blue;
        state.round_color = if true_trial { Color::Blue } else { Color::Orange };
        state
    }

    #[test]
    fn new_state_starts_waiting_with_full_countdown() {
        let state = RoundState::new(GameMode::TimeAttack);
        assert_eq!(state.phase, GamePhase::Waiting);
        assert_eq!(state.remaining_time, 60);
        assert_eq!(state.scores(), (0, 0));
        assert!(state.move_history.is_empty());
    }

    #[test]
    fn classic_win_on_fifth_point() {
        let mut state = active(GameMode::Classic, (4, 0), true);

        let outcome = state.apply_touch(Player::One, 1);

        assert_eq!(outcome, TouchOutcome::GameOver { winner: Player::One });
        assert_eq!(state.scores(), (5, 0));
        assert_eq!(state.phase, GamePhase::GameOver);
        assert!(state.winner_message.contains("Player 1"));
    }

    #[test]
    fn wrong_touch_rewards_opponent() {
        let mut state = active(GameMode::Classic, (1, 1), false);

        let outcome = state.apply_touch(Player::One, 1);

        assert_eq!(outcome, TouchOutcome::Scored { correct: false });
        assert_eq!(state.scores(), (1, 2));
        assert_eq!(state.phase, GamePhase::Processing);
    }

    #[test]
    fn wrong_touch_can_hand_opponent_the_game() {
        let mut state = active(GameMode::Confusion, (0, 4), false);

        let outcome = state.apply_touch(Player::One, 1);

        assert_eq!(outcome, TouchOutcome::GameOver { winner: Player::Two });
        assert!(state.winner_message.contains("Player 2"));
    }

    #[test]
    fn true_trial_timeout_penalizes_both() {
        let mut state = active(GameMode::Classic, (2, 0), true);

        state.apply_touch(Player::Nobody, 1);

        assert_eq!(state.scores(), (1, 0));
        assert_eq!(state.phase, GamePhase::Processing);
    }

    #[test]
    fn false_trial_timeout_changes_nothing() {
        let mut state = active(GameMode::Classic, (2, 3), false);

        let outcome = state.apply_touch(Player::Nobody, 1);

        assert_eq!(outcome, TouchOutcome::Scored { correct: false });
        assert_eq!(state.scores(), (2, 3));
        assert_eq!(state.move_history.len(), 1);
    }

    #[test]
    fn false_start_decrements_with_floor() {
        let mut state = RoundState::new(GameMode::Classic);
        state.score_p2 = 1;

        assert_eq!(state.apply_touch(Player::Two, 1), TouchOutcome::FalseStart);
        assert_eq!(state.scores(), (0, 0));
        assert_eq!(state.phase, GamePhase::Processing);

        state.phase = GamePhase::Waiting;
        state.apply_touch(Player::Two, 2);
        assert_eq!(state.scores(), (0, 0));
    }

    #[test]
    fn late_touch_is_ignored() {
        for phase in [GamePhase::Processing, GamePhase::GameOver, GamePhase::Paused] {
            let mut state = active(GameMode::Classic, (3, 2), true);
            state.phase = phase;
            let before = state.clone();

            assert_eq!(state.apply_touch(Player::One, 1), TouchOutcome::Ignored);
            assert_eq!(state, before);
        }
    }

    #[test]
    fn time_attack_never_ends_on_score() {
        let mut state = active(GameMode::TimeAttack, (40, 0), true);

        let outcome = state.apply_touch(Player::One, 1);

        assert_eq!(outcome, TouchOutcome::Scored { correct: true });
        assert_eq!(state.score_p1, 41);
        assert_eq!(state.phase, GamePhase::Processing);
    }

    #[test]
    fn history_records_each_processed_touch() {
        let mut state = active(GameMode::Classic, (0, 0), true);
        state.apply_touch(Player::Two, 1234);
        state.apply_touch(Player::One, 1300);

        assert_eq!(state.move_history, vec!["P2 touched at 1234".to_string()]);
    }

    #[test]
    fn countdown_expires_on_zero() {
        let mut state = RoundState::new(GameMode::TimeAttack);
        state.remaining_time = 2;

        assert_eq!(state.tick(), TickOutcome::Remaining(1));
        assert_eq!(state.tick(), TickOutcome::Expired);
        assert_eq!(state.time_elapsed, 0);
    }

    #[test]
    fn elapsed_clock_counts_up() {
        let mut state = RoundState::new(GameMode::Classic);
        state.tick();
        assert_eq!(state.tick(), TickOutcome::Elapsed(2));
        assert_eq!(state.remaining_time, 60);
    }

    #[test]
    fn finish_countdown_picks_higher_score() {
        let mut state = RoundState::new(GameMode::TimeAttack);
        state.score_p1 = 3;
        state.score_p2 = 5;
        state.remaining_time = 1;

        assert_eq!(state.finish_countdown(), Some(Player::Two));
        assert_eq!(state.phase, GamePhase::GameOver);
        assert_eq!(state.remaining_time, 0);
        assert!(state.winner_message.contains("Player 2"));
    }

    #[test]
    fn finish_countdown_reports_tie() {
        let mut state = RoundState::new(GameMode::TimeAttack);
        state.score_p1 = 4;
        state.score_p2 = 4;

        assert_eq!(state.finish_countdown(), None);
        assert_eq!(state.winner_message, "It's a tie!");
    }

    #[test]
    fn confusion_decoy_differs_from_target() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut state = RoundState::new(GameMode::Confusion);
        for _ in 0..200 {
            state.begin_round(&mut rng);
            let decoy = state.target_text_color.expect("confusion has decoy");
            assert_ne!(decoy, state.target_color);
            assert_eq!(state.round_color, Color::Gray);
        }
    }

    #[test]
    fn classic_has_no_decoy() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut state = RoundState::new(GameMode::Classic);
        state.begin_round(&mut rng);
        assert_eq!(state.target_text_color, None);
        assert_eq!(state.display_text_color(), state.target_color);
    }

    #[test]
    fn activate_only_from_waiting() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = RoundState::new(GameMode::Classic);
        state.phase = GamePhase::Paused;
        assert!(!state.activate(&mut rng));
        assert_eq!(state.round_color, Color::Gray);

        state.phase = GamePhase::Waiting;
        assert!(state.activate(&mut rng));
        assert_eq!(state.phase, GamePhase::Active);
        assert_ne!(state.round_color, Color::Gray);
    }

    #[test]
    fn round_color_mix_is_roughly_even() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut state = RoundState::new(GameMode::Classic);
        let mut true_trials = 0;
        for _ in 0..2000 {
            state.begin_round(&mut rng);
            state.activate(&mut rng);
            if state.is_true_trial() {
                true_trials += 1;
            }
        }
        assert!((800..1200).contains(&true_trials), "true trials: {true_trials}");
    }

    #[test]
    fn scores_never_go_negative_under_random_play() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut state = RoundState::new(GameMode::TimeAttack);
        for step in 0..5000u64 {
            if state.phase == GamePhase::Processing {
                state.begin_round(&mut rng);
            }
            if rng.random_bool(0.5) {
                state.activate(&mut rng);
            }
            let player = Player::from_index(rng.random_range(0..3)).unwrap();
            state.apply_touch(player, step);
            assert!(state.score_p1 < 5000 && state.score_p2 < 5000);
        }
    }

    #[test]
    fn snapshot_without_optional_fields_decodes() {
        let json = r#"{"score_p1":1,"score_p2":2,"phase":"ACTIVE","mode":"CLASSIC","extra":true}"#;
        let state: RoundState = serde_json::from_str(json).unwrap();
        assert_eq!(state.scores(), (1, 2));
        assert_eq!(state.round_color, Color::Gray);
        assert!(state.move_history.is_empty());
    }
}
