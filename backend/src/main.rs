mod console;

use clap::{Parser, Subcommand};
use console::Persistence;
use reflex_duel::Config;
use reflex_duel::game::core::GameMode;
use reflex_duel::game::engine::RoundEngine;
use reflex_duel::net::ConnectionSession;
use reflex_duel::repository::{self, MetadataRepository, SaveRepository, StatsRepository};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "reflex-duel", about = "Two-player color reflex duel")]
struct Args {
    /// SQLite database URL for stats and the save index
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Both players on this keyboard
    Local {
        #[arg(short, long, default_value = "classic")]
        mode: GameMode,
    },
    /// Host a networked game and wait for a player to join
    Host {
        #[arg(short, long, default_value = "classic")]
        mode: GameMode,
    },
    /// Join a host at HOST or HOST:PORT
    Join { address: String },
    /// List hosts announcing themselves on the LAN
    Discover {
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Lifetime win counts
    Stats,
    /// Saved games, favorites first
    Saves {
        #[command(subcommand)]
        action: Option<SavesAction>,
    },
}

#[derive(Subcommand)]
enum SavesAction {
    /// Remove a save file and its index entry
    Delete { file_name: String },
    /// Toggle the favorite mark
    Favorite { file_name: String },
    /// Print a save file as stored
    Export { file_name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let args = Args::parse();
    let database_url = args
        .database_url
        .unwrap_or_else(|| config.database_url.clone());

    match args.command {
        Command::Local { mode } => {
            let pool = repository::connect(&database_url).await?;
            let engine = RoundEngine::new(StatsRepository::new(pool.clone()));
            engine.start_game(mode);
            console::run_local(engine, persistence(&config, pool)).await?;
        }
        Command::Host { mode } => {
            let pool = repository::connect(&database_url).await?;
            let engine = RoundEngine::new(StatsRepository::new(pool.clone()));
            let session = ConnectionSession::new(config.transport());
            session.start_server()?;
            tracing::info!(addr = %config.addr(), name = %config.player_name, "Hosting");
            console::run_host(engine, session, mode, persistence(&config, pool)).await?;
        }
        Command::Join { address } => {
            let session = ConnectionSession::new(config.transport());
            console::run_client(session, &address).await?;
        }
        Command::Discover { seconds } => {
            let session = ConnectionSession::new(config.transport());
            session.start_discovery()?;
            println!("listening for hosts for {seconds}s...");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            session.stop_discovery();

            let peers = session.discovered_peers();
            if peers.is_empty() {
                println!("no hosts found");
            }
            for peer in peers {
                println!("{}\t{}", peer.address, peer.name.as_deref().unwrap_or("-"));
            }
        }
        Command::Stats => {
            let pool = repository::connect(&database_url).await?;
            let stats = StatsRepository::new(pool).stats().await?;
            println!("games played: {}", stats.games_played);
            println!("player 1 wins: {}", stats.player1_wins);
            println!("player 2 wins: {}", stats.player2_wins);
        }
        Command::Saves { action } => {
            let pool = repository::connect(&database_url).await?;
            let persistence = persistence(&config, pool);
            match action {
                None => {
                    for (file_name, meta) in persistence.entries().await? {
                        match meta {
                            Some(meta) => {
                                let star = if meta.is_favorite { "*" } else { " " };
                                println!(
                                    "{star} {file_name}\t{}\t{}-{}\t{}",
                                    meta.game_mode, meta.score_p1, meta.score_p2, meta.timestamp
                                );
                            }
                            None => println!("  {file_name}\t(not indexed)"),
                        }
                    }
                }
                Some(SavesAction::Delete { file_name }) => {
                    if persistence.delete(&file_name).await? {
                        println!("deleted {file_name}");
                    } else {
                        println!("no save named {file_name}");
                    }
                }
                Some(SavesAction::Favorite { file_name }) => {
                    match persistence.toggle_favorite(&file_name).await? {
                        Some(true) => println!("{file_name} marked favorite"),
                        Some(false) => println!("{file_name} unmarked"),
                        None => println!("{file_name} is not indexed"),
                    }
                }
                Some(SavesAction::Export { file_name }) => {
                    print!("{}", persistence.export(&file_name).await?);
                }
            }
        }
    }

    Ok(())
}

fn persistence(config: &Config, pool: sqlx::SqlitePool) -> Persistence {
    Persistence {
        saves: SaveRepository::new(&config.save_dir),
        metadata: MetadataRepository::new(pool),
    }
}
