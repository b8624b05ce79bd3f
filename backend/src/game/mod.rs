pub mod core;
pub mod engine;

pub use core::{Color, GameMode, GamePhase, Player, RoundState};
pub use engine::{EngineTimings, RoundEngine, WinRecorder};
