use std::{fs, str::FromStr};

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};

use crate::{barbers, config::SeedBarber, error::AppError, tokens::new_id};

pub async fn connect(db_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to an in-memory database sees its own empty database, so
    // the pool is pinned to one connection that is never recycled.
    if is_memory_url(db_url) {
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await;
    }

    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connect_options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn is_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

/// Starts a transaction that holds SQLite's write lock from its first
/// statement. Reads inside it cannot be invalidated by another connection's
/// commit, and waiting for the lock goes through the busy timeout.
pub(crate) async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

pub async fn seed_defaults(pool: &SqlitePool, seed: &SeedBarber) -> Result<(), AppError> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM barbers")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    if seed.uses_default_password() {
        log::warn!("SEED_BARBER_PASSWORD not set. Using the demo password. Set SEED_BARBER_PASSWORD in production.");
    }

    let barber = barbers::create_barber(pool, &seed.name, &seed.email, &seed.password).await?;
    log::info!("Seeded staff account {} <{}>", barber.name, seed.email);
    Ok(())
}

pub async fn log_activity(pool: &SqlitePool, kind: &str, message: &str, subject_id: Option<&str>) {
    let result = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, subject_id)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now())
    .bind(subject_id)
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("Failed to record activity {kind}: {err}");
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = connect("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
