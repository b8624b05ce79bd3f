use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

const WIN_THRESHOLD: u32 = 5;
const TIME_ATTACK_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// First to five points
    #[default]
    Classic,
    /// Sixty second countdown, higher score wins, ties allowed
    TimeAttack,
    /// Classic rules, target name drawn in a misleading text color
    Confusion,
}

/// Which way the per-second clock runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    Elapsed,
    Countdown,
}

impl GameMode {
    pub const ALL: [GameMode; 3] = [GameMode::Classic, GameMode::TimeAttack, GameMode::Confusion];

    /// Score that ends the game, if any. Time attack only ends on the clock.
    pub fn win_threshold(self) -> Option<u32> {
        match self {
            GameMode::Classic | GameMode::Confusion => Some(WIN_THRESHOLD),
            GameMode::TimeAttack => None,
        }
    }

    pub fn clock(self) -> ClockKind {
        match self {
            GameMode::TimeAttack => ClockKind::Countdown,
            GameMode::Classic | GameMode::Confusion => ClockKind::Elapsed,
        }
    }

    pub fn uses_decoy_text_color(self) -> bool {
        self == GameMode::Confusion
    }

    pub fn allows_tie(self) -> bool {
        self == GameMode::TimeAttack
    }

    pub fn countdown_secs(self) -> u32 {
        TIME_ATTACK_SECS
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Classic => "CLASSIC",
            GameMode::TimeAttack => "TIME_ATTACK",
            GameMode::Confusion => "CONFUSION",
        }
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Error)]
#[error("unknown game mode '{0}' (expected classic, time-attack or confusion)")]
pub struct UnknownMode(pub String);

impl FromStr for GameMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "classic" => Ok(GameMode::Classic),
            "time_attack" => Ok(GameMode::TimeAttack),
            "confusion" => Ok(GameMode::Confusion),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_time_attack_runs_countdown() {
        assert_eq!(GameMode::Classic.clock(), ClockKind::Elapsed);
        assert_eq!(GameMode::Confusion.clock(), ClockKind::Elapsed);
        assert_eq!(GameMode::TimeAttack.clock(), ClockKind::Countdown);
    }

    #[test]
    fn time_attack_has_no_threshold() {
        assert_eq!(GameMode::Classic.win_threshold(), Some(5));
        assert_eq!(GameMode::Confusion.win_threshold(), Some(5));
        assert_eq!(GameMode::TimeAttack.win_threshold(), None);
    }

    #[test]
    fn only_confusion_uses_decoy() {
        let decoys: Vec<_> = GameMode::ALL
            .into_iter()
            .filter(|m| m.uses_decoy_text_color())
            .collect();
        assert_eq!(decoys, vec![GameMode::Confusion]);
    }

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("classic".parse(), Ok(GameMode::Classic));
        assert_eq!("time-attack".parse(), Ok(GameMode::TimeAttack));
        assert_eq!("TIME_ATTACK".parse(), Ok(GameMode::TimeAttack));
        assert_eq!("Confusion".parse(), Ok(GameMode::Confusion));
        assert!("blitz".parse::<GameMode>().is_err());
    }

    #[test]
    fn unknown_mode_names_the_input() {
        let err = "blitz".parse::<GameMode>().unwrap_err();
        assert_eq!(err, UnknownMode("blitz".to_string()));
        assert_eq!(
            err.to_string(),
            "unknown game mode 'blitz' (expected classic, time-attack or confusion)"
        );
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn serializes_screaming_case() {
        let json = serde_json::to_string(&GameMode::TimeAttack).unwrap();
        assert_eq!(json, r#""TIME_ATTACK""#);
    }
}
