use crate::game::core::Player;
use crate::game::engine::WinRecorder;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GameStats {
    pub games_played: i64,
    pub player1_wins: i64,
    pub player2_wins: i64,
}

/// Lifetime win counters, one row for the whole install
#[derive(Clone)]
pub struct StatsRepository {
    pool: SqlitePool,
}

impl StatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn stats(&self) -> Result<GameStats, sqlx::Error> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT games_played, player1_wins, player2_wins FROM game_stats WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(games_played, player1_wins, player2_wins)| GameStats {
                games_played,
                player1_wins,
                player2_wins,
            })
            .unwrap_or_default())
    }

    pub async fn record_game_win(&self, winner: Player) -> Result<(), sqlx::Error> {
        let (p1, p2): (i64, i64) = match winner {
            Player::One => (1, 0),
            Player::Two => (0, 1),
            Player::Nobody => (0, 0),
        };

        sqlx::query(
            "INSERT INTO game_stats (id, games_played, player1_wins, player2_wins)
             VALUES (1, 1, $1, $2)
             ON CONFLICT(id) DO UPDATE SET
                games_played = games_played + 1,
                player1_wins = player1_wins + excluded.player1_wins,
                player2_wins = player2_wins + excluded.player2_wins",
        )
        .bind(p1)
        .bind(p2)
        .execute(&self.pool)
        .await?;

        debug!(%winner, "Recorded game win");
        Ok(())
    }
}

impl WinRecorder for StatsRepository {
    fn record_win(&self, winner: Player) {
        let repo = self.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.record_game_win(winner).await {
                error!(error = %e, %winner, "Failed to record game win");
            }
        });
    }
}
