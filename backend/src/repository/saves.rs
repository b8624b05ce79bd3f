use crate::game::core::{Color, GameMode, GamePhase, RoundState};
use quick_xml::errors::serialize::{DeError, SeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

const HISTORY_SEPARATOR: &str = ";;";

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid XML save: {0}")]
    Xml(#[from] DeError),
    #[error("could not write XML save: {0}")]
    XmlWrite(#[from] SeError),
    #[error("unknown save format for '{0}'")]
    UnknownFormat(String),
    #[error("malformed save file: {0}")]
    Malformed(String),
    #[error("invalid save name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Json,
    /// One element per field, history as repeated `<move>` elements
    Xml,
    /// `key=value` lines, history joined by `;;`
    Txt,
}

impl SaveFormat {
    pub const ALL: [SaveFormat; 3] = [SaveFormat::Json, SaveFormat::Xml, SaveFormat::Txt];

    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Json => ".json",
            SaveFormat::Xml => ".xml",
            SaveFormat::Txt => ".txt",
        }
    }

    pub fn for_file(file_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| file_name.ends_with(format.extension()))
    }
}

impl FromStr for SaveFormat {
    type Err = SaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_start_matches('.') {
            "json" => Ok(SaveFormat::Json),
            "xml" => Ok(SaveFormat::Xml),
            "txt" => Ok(SaveFormat::Txt),
            _ => Err(SaveError::UnknownFormat(s.to_string())),
        }
    }
}

/// Save files in one directory
#[derive(Debug, Clone)]
pub struct SaveRepository {
    dir: PathBuf,
}

impl SaveRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `state` under `name`, appending the format's extension once.
    /// Returns the file name written.
    pub async fn save(
        &self,
        state: &RoundState,
        name: &str,
        format: SaveFormat,
    ) -> Result<String, SaveError> {
        let stem = name.strip_suffix(format.extension()).unwrap_or(name);
        let file_name = format!("{stem}{}", format.extension());
        let path = self.path_for(&file_name)?;

        let contents = match format {
            SaveFormat::Json => serde_json::to_string_pretty(state)?,
            SaveFormat::Xml => to_xml(state)?,
            SaveFormat::Txt => to_txt(state),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, contents).await?;
        info!(%file_name, "Game saved");
        Ok(file_name)
    }

    pub async fn load(&self, file_name: &str) -> Result<RoundState, SaveError> {
        let format = SaveFormat::for_file(file_name)
            .ok_or_else(|| SaveError::UnknownFormat(file_name.to_string()))?;
        let contents = tokio::fs::read_to_string(self.path_for(file_name)?).await?;

        let state = match format {
            SaveFormat::Json => serde_json::from_str(&contents)?,
            SaveFormat::Xml => from_xml(&contents)?,
            SaveFormat::Txt => from_txt(&contents)?,
        };
        debug!(%file_name, "Game loaded");
        Ok(state)
    }

    /// Save file names, sorted. A missing directory is an empty list.
    pub async fn list(&self) -> Result<Vec<String>, SaveError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if SaveFormat::for_file(&name).is_some() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns whether a file was removed.
    pub async fn delete(&self, file_name: &str) -> Result<bool, SaveError> {
        match tokio::fs::remove_file(self.path_for(file_name)?).await {
            Ok(()) => {
                info!(%file_name, "Save deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(%file_name, "No save to delete");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// File contents as stored, for exporting.
    pub async fn read_raw(&self, file_name: &str) -> Result<String, SaveError> {
        Ok(tokio::fs::read_to_string(self.path_for(file_name)?).await?)
    }

    fn path_for(&self, file_name: &str) -> Result<PathBuf, SaveError> {
        let invalid = file_name.is_empty()
            || file_name.starts_with('.')
            || file_name.contains(['/', '\\'])
            || file_name.contains("..");
        if invalid {
            return Err(SaveError::InvalidName(file_name.to_string()));
        }
        Ok(self.dir.join(file_name))
    }
}

fn to_txt(state: &RoundState) -> String {
    let text_color = state
        .target_text_color
        .map(Color::name)
        .unwrap_or_default();
    let lines = [
        format!("score_p1={}", state.score_p1),
        format!("score_p2={}", state.score_p2),
        format!("phase={}", phase_name(state.phase)),
        format!("mode={}", state.mode),
        format!("target_color={}", state.target_color),
        format!("round_color={}", state.round_color),
        format!("target_text_color={text_color}"),
        format!("time_elapsed={}", state.time_elapsed),
        format!("remaining_time={}", state.remaining_time),
        format!("winner_message={}", state.winner_message),
        format!("move_history={}", state.move_history.join(HISTORY_SEPARATOR)),
    ];
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn phase_name(phase: GamePhase) -> &'static str {
    match phase {
        GamePhase::Waiting => "WAITING",
        GamePhase::Active => "ACTIVE",
        GamePhase::Processing => "PROCESSING",
        GamePhase::GameOver => "GAME_OVER",
        GamePhase::Paused => "PAUSED",
    }
}

fn parse_phase(name: &str) -> Option<GamePhase> {
    [
        GamePhase::Waiting,
        GamePhase::Active,
        GamePhase::Processing,
        GamePhase::GameOver,
        GamePhase::Paused,
    ]
    .into_iter()
    .find(|phase| phase_name(*phase) == name)
}

fn from_txt(contents: &str) -> Result<RoundState, SaveError> {
    let mut values = HashMap::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| SaveError::Malformed(format!("expected key=value, got '{line}'")))?;
        values.insert(key.trim(), value);
    }

    fn number<N: FromStr>(values: &HashMap<&str, &str>, key: &str) -> Result<N, SaveError>
    where
        N: Default,
    {
        match values.get(key) {
            None => Ok(N::default()),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| SaveError::Malformed(format!("{key} is not a number: '{raw}'"))),
        }
    }

    let mode = match values.get("mode") {
        Some(raw) => raw
            .parse::<GameMode>()
            .map_err(|e| SaveError::Malformed(e.to_string()))?,
        None => GameMode::default(),
    };
    let phase = match values.get("phase") {
        Some(raw) => parse_phase(raw)
            .ok_or_else(|| SaveError::Malformed(format!("unknown phase '{raw}'")))?,
        None => GamePhase::Waiting,
    };
    let color = |key: &str, fallback: Color| {
        values
            .get(key)
            .map(|name| Color::from_name(name))
            .unwrap_or(fallback)
    };
    let target_text_color = values
        .get("target_text_color")
        .filter(|name| !name.is_empty())
        .map(|name| Color::from_name(name));
    let move_history = values
        .get("move_history")
        .filter(|joined| !joined.is_empty())
        .map(|joined| joined.split(HISTORY_SEPARATOR).map(str::to_string).collect())
        .unwrap_or_default();

    Ok(RoundState {
        score_p1: number(&values, "score_p1")?,
        score_p2: number(&values, "score_p2")?,
        phase,
        target_color: color("target_color", Color::Red),
        round_color: color("round_color", Color::Gray),
        target_text_color,
        winner_message: values
            .get("winner_message")
            .map(|m| m.to_string())
            .unwrap_or_default(),
        time_elapsed: number(&values, "time_elapsed")?,
        remaining_time: number(&values, "remaining_time")?,
        mode,
        move_history,
    })
}

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "game_state")]
struct XmlSave {
    score_p1: u32,
    score_p2: u32,
    phase: String,
    mode: String,
    target_color: String,
    round_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_text_color: Option<String>,
    #[serde(default)]
    time_elapsed: u64,
    #[serde(default)]
    remaining_time: u32,
    #[serde(default)]
    winner_message: String,
    #[serde(default)]
    move_history: XmlHistory,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct XmlHistory {
    #[serde(default, rename = "move")]
    moves: Vec<String>,
}

fn to_xml(state: &RoundState) -> Result<String, SaveError> {
    let doc = XmlSave {
        score_p1: state.score_p1,
        score_p2: state.score_p2,
        phase: phase_name(state.phase).to_string(),
        mode: state.mode.to_string(),
        target_color: state.target_color.to_string(),
        round_color: state.round_color.to_string(),
        target_text_color: state.target_text_color.map(|c| c.to_string()),
        time_elapsed: state.time_elapsed,
        remaining_time: state.remaining_time,
        winner_message: state.winner_message.clone(),
        move_history: XmlHistory {
            moves: state.move_history.clone(),
        },
    };
    let mut out = XML_DECLARATION.to_string();
    out.push_str(&quick_xml::se::to_string(&doc)?);
    out.push('\n');
    Ok(out)
}

fn from_xml(contents: &str) -> Result<RoundState, SaveError> {
    let doc: XmlSave = quick_xml::de::from_str(contents)?;

    let phase = parse_phase(&doc.phase)
        .ok_or_else(|| SaveError::Malformed(format!("unknown phase '{}'", doc.phase)))?;
    let mode = doc
        .mode
        .parse::<GameMode>()
        .map_err(|e| SaveError::Malformed(e.to_string()))?;

    Ok(RoundState {
        score_p1: doc.score_p1,
        score_p2: doc.score_p2,
        phase,
        target_color: Color::from_name(&doc.target_color),
        round_color: Color::from_name(&doc.round_color),
        target_text_color: doc
            .target_text_color
            .filter(|name| !name.is_empty())
            .map(|name| Color::from_name(&name)),
        winner_message: doc.winner_message,
        time_elapsed: doc.time_elapsed,
        remaining_time: doc.remaining_time,
        mode,
        move_history: doc.move_history.moves,
    })
}
