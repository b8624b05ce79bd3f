pub mod color;
pub mod mode;
pub mod round;

pub use color::{Color, PALETTE};
pub use mode::{ClockKind, GameMode};
pub use round::{GamePhase, Player, RoundState, TickOutcome, TouchOutcome};
