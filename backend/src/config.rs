use crate::net::TcpTransport;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 47800;
pub const DEFAULT_DISCOVERY_PORT: u16 = 47801;
pub const DEFAULT_PLAYER_NAME: &str = "reflex-duel";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://reflex.db?mode=rwc";
pub const DEFAULT_SAVE_DIR: &str = "saves";

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the host listens on
    pub port: u16,
    /// UDP port beacons are sent to and discovered on
    pub discovery_port: u16,
    /// Name advertised to discovering peers
    pub player_name: String,
    pub database_url: String,
    pub save_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: parse_or("PORT", DEFAULT_PORT),
            discovery_port: parse_or("DISCOVERY_PORT", DEFAULT_DISCOVERY_PORT),
            player_name: env::var("PLAYER_NAME").unwrap_or_else(|_| DEFAULT_PLAYER_NAME.into()),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
            save_dir: env::var("SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SAVE_DIR)),
        }
    }

    pub fn addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn transport(&self) -> TcpTransport {
        TcpTransport::new(self.port, self.discovery_port, self.player_name.clone())
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
