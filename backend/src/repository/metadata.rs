use crate::game::core::{GameMode, RoundState};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

/// Index entry for one save file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedGameMetadata {
    pub file_name: String,
    pub score_p1: u32,
    pub score_p2: u32,
    pub game_mode: GameMode,
    /// Unix millis of the save
    pub timestamp: i64,
    pub is_favorite: bool,
}

impl SavedGameMetadata {
    pub fn for_state(file_name: impl Into<String>, state: &RoundState, timestamp: i64) -> Self {
        Self {
            file_name: file_name.into(),
            score_p1: state.score_p1,
            score_p2: state.score_p2,
            game_mode: state.mode,
            timestamp,
            is_favorite: false,
        }
    }
}

type MetadataRow = (String, i64, i64, String, i64, bool);

fn from_row((file_name, score_p1, score_p2, game_mode, timestamp, is_favorite): MetadataRow) -> SavedGameMetadata {
    let game_mode = game_mode.parse().unwrap_or_else(|_| {
        warn!(%file_name, %game_mode, "Unknown mode in metadata, assuming classic");
        GameMode::default()
    });
    SavedGameMetadata {
        file_name,
        score_p1: u32::try_from(score_p1).unwrap_or_default(),
        score_p2: u32::try_from(score_p2).unwrap_or_default(),
        game_mode,
        timestamp,
        is_favorite,
    }
}

#[derive(Clone)]
pub struct MetadataRepository {
    pool: SqlitePool,
}

impl MetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert, replacing any entry for the same file.
    pub async fn insert(&self, meta: &SavedGameMetadata) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO saved_game_metadata
                (file_name, score_p1, score_p2, game_mode, timestamp, is_favorite)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&meta.file_name)
        .bind(i64::from(meta.score_p1))
        .bind(i64::from(meta.score_p2))
        .bind(meta.game_mode.as_str())
        .bind(meta.timestamp)
        .bind(meta.is_favorite)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Favorites first, then newest first.
    pub async fn list(&self) -> Result<Vec<SavedGameMetadata>, sqlx::Error> {
        let rows: Vec<MetadataRow> = sqlx::query_as(
            "SELECT file_name, score_p1, score_p2, game_mode, timestamp, is_favorite
             FROM saved_game_metadata
             ORDER BY is_favorite DESC, timestamp DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    pub async fn get(&self, file_name: &str) -> Result<Option<SavedGameMetadata>, sqlx::Error> {
        let row: Option<MetadataRow> = sqlx::query_as(
            "SELECT file_name, score_p1, score_p2, game_mode, timestamp, is_favorite
             FROM saved_game_metadata WHERE file_name = $1",
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(from_row))
    }

    /// Returns false when no entry has that name.
    pub async fn set_favorite(&self, file_name: &str, favorite: bool) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE saved_game_metadata SET is_favorite = $1 WHERE file_name = $2")
                .bind(favorite)
                .bind(file_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, file_name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM saved_game_metadata WHERE file_name = $1")
            .bind(file_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
