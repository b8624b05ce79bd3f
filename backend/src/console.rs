use reflex_duel::game::core::{ClockKind, GameMode, GamePhase, Player, RoundState};
use reflex_duel::game::engine::{RoundEngine, unix_millis};
use reflex_duel::net::{ConnectionSession, ConnectionState, LinkEvent, ReplicationLink, Transport};
use reflex_duel::repository::{
    MetadataRepository, SaveFormat, SaveRepository, SavedGameMetadata,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// One line typed at the prompt
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Touch(Player),
    Blank,
    Pause,
    Resume,
    Reset,
    Save { name: String, format: SaveFormat },
    Load { file_name: String },
    Quit,
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Input::Blank;
        };
        match command {
            "1" => Input::Touch(Player::One),
            "2" => Input::Touch(Player::Two),
            "p" => Input::Pause,
            "r" => Input::Resume,
            "n" => Input::Reset,
            "q" => Input::Quit,
            "s" => {
                let Some(name) = words.next() else {
                    return Input::Unknown(line.to_string());
                };
                let format = match words.next() {
                    Some(raw) => match raw.parse() {
                        Ok(format) => format,
                        Err(_) => return Input::Unknown(line.to_string()),
                    },
                    None => SaveFormat::default(),
                };
                Input::Save {
                    name: name.to_string(),
                    format,
                }
            }
            "l" => match words.next() {
                Some(file_name) => Input::Load {
                    file_name: file_name.to_string(),
                },
                None => Input::Unknown(line.to_string()),
            },
            _ => Input::Unknown(line.to_string()),
        }
    }
}

pub fn render(state: &RoundState) -> String {
    let target = match state.target_text_color {
        Some(ink) => format!("{} (ink {ink})", state.target_color),
        None => state.target_color.to_string(),
    };
    let clock = match state.mode.clock() {
        ClockKind::Elapsed => format!("{}s", state.time_elapsed),
        ClockKind::Countdown => format!("{}s left", state.remaining_time),
    };
    let mut line = format!(
        "[{}] P1 {} - {} P2 | {:?} | target {target} | shown {} | {clock}",
        state.mode, state.score_p1, state.score_p2, state.phase, state.round_color
    );
    if state.phase == GamePhase::GameOver {
        line.push_str(" | ");
        line.push_str(&state.winner_message);
    }
    line
}

pub const HELP: &str =
    "1/2 touch, p pause, r resume, n new game, s <name> [json|xml|txt] save, l <file> load, q quit";

pub struct Persistence {
    pub saves: SaveRepository,
    pub metadata: MetadataRepository,
}

impl Persistence {
    async fn save(&self, engine: &RoundEngine, name: &str, format: SaveFormat) {
        let state = engine.save_snapshot();
        let result = async {
            let file_name = self.saves.save(&state, name, format).await?;
            let meta = SavedGameMetadata::for_state(&file_name, &state, unix_millis() as i64);
            self.metadata.insert(&meta).await?;
            anyhow::Ok(file_name)
        }
        .await;
        match result {
            Ok(file_name) => println!("saved {file_name}, r to resume"),
            Err(e) => {
                warn!(error = %e, name, "Save failed");
                println!("save failed: {e}");
            }
        }
    }

    /// Indexed saves (favorites first, then newest), then files with no index row.
    pub async fn entries(&self) -> anyhow::Result<Vec<(String, Option<SavedGameMetadata>)>> {
        let indexed = self.metadata.list().await?;
        let mut entries: Vec<_> = indexed
            .iter()
            .map(|meta| (meta.file_name.clone(), Some(meta.clone())))
            .collect();
        for file_name in self.saves.list().await? {
            if !indexed.iter().any(|meta| meta.file_name == file_name) {
                entries.push((file_name, None));
            }
        }
        Ok(entries)
    }

    /// Removes the file and its index row. Returns whether either existed.
    pub async fn delete(&self, file_name: &str) -> anyhow::Result<bool> {
        let removed_file = self.saves.delete(file_name).await?;
        let removed_row = self.metadata.delete(file_name).await?;
        Ok(removed_file || removed_row)
    }

    /// Flips the favorite mark. `None` when the save is not indexed.
    pub async fn toggle_favorite(&self, file_name: &str) -> anyhow::Result<Option<bool>> {
        let Some(meta) = self.metadata.get(file_name).await? else {
            return Ok(None);
        };
        let favorite = !meta.is_favorite;
        self.metadata.set_favorite(file_name, favorite).await?;
        Ok(Some(favorite))
    }

    pub async fn export(&self, file_name: &str) -> anyhow::Result<String> {
        Ok(self.saves.read_raw(file_name).await?)
    }

    async fn load(&self, engine: &RoundEngine, file_name: &str) {
        match self.saves.load(file_name).await {
            Ok(state) => {
                engine.load_state(state);
                println!("loaded {file_name}, r to resume");
            }
            Err(e) => {
                warn!(error = %e, file_name, "Load failed");
                println!("load failed: {e}");
            }
        }
    }
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

fn spawn_printer(mut updates: broadcast::Receiver<RoundState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(state) => println!("{}", render(&state)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_mirror_printer(mut mirror: watch::Receiver<Option<RoundState>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while mirror.changed().await.is_ok() {
            let rendered = mirror.borrow_and_update().as_ref().map(render);
            if let Some(line) = rendered {
                println!("{line}");
            }
        }
    })
}

/// Commands shared by local and host play. Returns false on quit.
async fn apply_engine_input(
    input: Input,
    engine: &RoundEngine,
    persistence: &Persistence,
    touch: impl Fn(Player),
) -> bool {
    match input {
        Input::Touch(player) => touch(player),
        Input::Blank => {}
        Input::Pause => engine.pause_game(),
        Input::Resume => engine.resume_game(),
        Input::Reset => engine.reset_current_game(),
        Input::Save { name, format } => persistence.save(engine, &name, format).await,
        Input::Load { file_name } => persistence.load(engine, &file_name).await,
        Input::Quit => return false,
        Input::Unknown(line) => println!("unknown command '{line}'. {HELP}"),
    }
    true
}

/// Both players on one keyboard.
pub async fn run_local(engine: RoundEngine, persistence: Persistence) -> anyhow::Result<()> {
    println!("{HELP}");
    let printer = spawn_printer(engine.subscribe());
    println!("{}", render(&engine.snapshot()));

    let mut lines = stdin_lines();
    while let Some(line) = lines.next_line().await? {
        let input = Input::parse(&line);
        let keep_going = apply_engine_input(input, &engine, &persistence, |player| {
            engine.process_touch(player);
        })
        .await;
        if !keep_going {
            break;
        }
    }

    engine.shutdown();
    printer.abort();
    Ok(())
}

async fn wait_for_link(states: &mut watch::Receiver<ConnectionState>) -> bool {
    loop {
        match *states.borrow_and_update() {
            ConnectionState::Connected => return true,
            ConnectionState::Idle => return false,
            ConnectionState::Listening | ConnectionState::Connecting => {}
        }
        if states.changed().await.is_err() {
            return false;
        }
    }
}

/// Local keyboard is player 1, the remote peer is player 2.
pub async fn run_host<T: Transport>(
    engine: RoundEngine,
    session: ConnectionSession<T>,
    mode: GameMode,
    persistence: Persistence,
) -> anyhow::Result<()> {
    let link = ReplicationLink::host(engine.clone(), session.clone());
    let mut events = link.subscribe_events();

    println!("waiting for a player to join...");
    if !wait_for_link(&mut session.subscribe_state()).await {
        println!("hosting failed, see log");
        return Ok(());
    }
    println!("player joined. {HELP}");

    let printer = spawn_printer(engine.subscribe());
    engine.start_game(mode);

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = Input::parse(&line);
                let keep_going = apply_engine_input(input, &engine, &persistence, |player| {
                    link.touch(player);
                })
                .await;
                if !keep_going {
                    break;
                }
            }
            event = events.recv() => {
                if let Ok(LinkEvent::ConnectionLost) = event {
                    println!("connection lost");
                    engine.pause_game();
                    break;
                }
            }
        }
    }

    engine.shutdown();
    session.close_connection();
    printer.abort();
    Ok(())
}

/// Mirror the host's game; any of `1`, `2` or Enter touches.
pub async fn run_client<T: Transport>(
    session: ConnectionSession<T>,
    address: &str,
) -> anyhow::Result<()> {
    let link = ReplicationLink::client(session.clone());
    let mut events = link.subscribe_events();
    let printer = spawn_mirror_printer(link.subscribe_mirror());

    session.connect_to_device(address)?;
    if !wait_for_link(&mut session.subscribe_state()).await {
        println!("could not reach {address}");
        printer.abort();
        return Ok(());
    }
    println!("connected to {address}. Enter touches, q quits");

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Touch(_) | Input::Blank => {
                        link.touch(Player::Two);
                    }
                    Input::Quit => break,
                    _ => println!("only the host controls the game"),
                }
            }
            event = events.recv() => {
                if let Ok(LinkEvent::ConnectionLost) = event {
                    println!("connection lost");
                    break;
                }
            }
        }
    }

    session.close_connection();
    printer.abort();
    Ok(())
}
