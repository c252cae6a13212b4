use crate::error::TerminalError;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::Path;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), TerminalError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, TerminalError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(connect_options).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) async fn in_memory_pool() -> SqlitePool {
    // One connection only: every new in-memory connection would otherwise see
    // its own empty database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool should open");
    run_migrations(&pool)
        .await
        .expect("migrations should run on in-memory pool");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unique_db_path() -> PathBuf {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock should be after unix epoch")
            .as_nanos();

        std::env::temp_dir().join(format!("arena-terminal-{timestamp}.db"))
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db_path = unique_db_path();

        let pool = initialize_pool_from_path(&db_path)
            .await
            .expect("pool initialization should succeed");

        run_migrations(&pool)
            .await
            .expect("running migrations multiple times should succeed");

        let cache_rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM warm_cache")
            .fetch_one(&pool)
            .await
            .expect("warm_cache table must exist and be queryable");

        assert_eq!(cache_rows, 0);

        drop(pool);
        let _ = std::fs::remove_file(db_path);
    }
}
