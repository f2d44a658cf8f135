use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    auth::hash_password,
    error::{AppError, Result},
    models::{BarberRow, BarberSummary},
    tokens::{is_unique_violation, new_id},
};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct NewBarber {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub async fn list_active(pool: &SqlitePool) -> Result<Vec<BarberSummary>> {
    let rows = sqlx::query_as::<_, BarberSummary>(
        "SELECT id, name FROM barbers WHERE is_active = 1 ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub(crate) async fn find_active(conn: &mut SqliteConnection, id: &str) -> Result<Option<BarberSummary>> {
    let row = sqlx::query_as::<_, BarberSummary>(
        "SELECT id, name FROM barbers WHERE id = ? AND is_active = 1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<BarberRow>> {
    let row = sqlx::query_as::<_, BarberRow>(
        r#"SELECT id, name, email, password_hash, is_active, created_at
           FROM barbers
           WHERE email = ? COLLATE NOCASE
           LIMIT 1"#,
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn create_barber(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password: &str,
) -> Result<BarberSummary> {
    let mut errors = Vec::new();
    if name.trim().is_empty() {
        errors.push("Name is required.".to_string());
    }
    if !email.contains('@') {
        errors.push("A valid email is required.".to_string());
    }
    if password.trim().len() < MIN_PASSWORD_LEN {
        errors.push(format!("Password must be at least {MIN_PASSWORD_LEN} characters."));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let password_hash = hash_password(password)?;
    let id = new_id();

    let result = sqlx::query(
        r#"INSERT INTO barbers (id, name, email, password_hash, is_active, created_at)
           VALUES (?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(name.trim())
    .bind(email.trim().to_ascii_lowercase())
    .bind(password_hash)
    .bind(Utc::now())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(BarberSummary {
            id,
            name: name.trim().to_string(),
        }),
        Err(err) if is_unique_violation(&err) => {
            Err(AppError::invalid("A barber with that email already exists."))
        }
        Err(err) => Err(err.into()),
    }
}
