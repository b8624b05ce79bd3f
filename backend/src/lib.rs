pub mod config;
pub mod game;
pub mod net;
pub mod repository;

pub use config::Config;
