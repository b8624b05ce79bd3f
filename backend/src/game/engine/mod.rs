mod round_engine;
mod timings;

pub use round_engine::{RoundEngine, WinRecorder, unix_millis};
pub use timings::EngineTimings;
