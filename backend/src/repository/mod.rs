use sqlx::SqlitePool;

mod metadata;
mod saves;
mod stats;

pub use metadata::{MetadataRepository, SavedGameMetadata};
pub use saves::{SaveError, SaveFormat, SaveRepository};
pub use stats::{GameStats, StatsRepository};

/// Open the database and bring the schema up to date.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePool::connect(database_url).await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}
