//! Walk-in queue sequencing.
//!
//! Every entry in the `waiting` status carries a position; together those
//! positions always form the sequence `1..=N` in join order (unless staff moved
//! someone by hand), and each estimated wait is `position * base duration`.
//! All writes go through [`QueueEngine`], which holds one async mutex so that a
//! join, a status change, a deletion or a conversion and the renumbering it
//! causes commit as a single SQLite transaction.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use crate::{
    db::{begin_write, log_activity},
    error::{AppError, Result},
    models::{estimated_wait, QueueEntry, QueueStatus, Service},
    tokens::{
        confirmations_exhausted, new_id, normalize_confirmation, random_confirmations,
        retry_on_collision, ConfirmationSource, MAX_CONFIRMATION_ATTEMPTS,
    },
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub service: String,
}

/// Partial staff edit of a queue entry; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueUpdate {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub service: Option<String>,
    pub status: Option<String>,
    pub position: Option<i64>,
}

#[derive(Debug)]
struct ValidJoin {
    customer_name: String,
    customer_phone: String,
    service: Service,
}

#[derive(Debug, Default)]
struct ValidUpdate {
    customer_name: Option<String>,
    customer_phone: Option<String>,
    service: Option<Service>,
    status: Option<QueueStatus>,
    position: Option<i64>,
}

impl JoinRequest {
    fn validate(&self) -> Result<ValidJoin> {
        let mut errors = Vec::new();
        if self.customer_name.trim().is_empty() {
            errors.push("Customer name is required.".to_string());
        }
        if self.customer_phone.trim().is_empty() {
            errors.push("Phone number is required.".to_string());
        }
        let service = if self.service.trim().is_empty() {
            errors.push("Please select a service.".to_string());
            None
        } else {
            match self.service.parse::<Service>() {
                Ok(service) => Some(service),
                Err(err) => {
                    errors.push(format!("Invalid service: {err}."));
                    None
                }
            }
        };

        match service {
            Some(service) if errors.is_empty() => Ok(ValidJoin {
                customer_name: self.customer_name.trim().to_string(),
                customer_phone: self.customer_phone.trim().to_string(),
                service,
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

impl QueueUpdate {
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status: Some(status.as_str().to_string()),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<ValidUpdate> {
        let mut errors = Vec::new();
        let mut valid = ValidUpdate::default();

        if let Some(name) = &self.customer_name {
            if name.trim().is_empty() {
                errors.push("Customer name cannot be empty.".to_string());
            }
            valid.customer_name = Some(name.trim().to_string());
        }
        if let Some(phone) = &self.customer_phone {
            if phone.trim().is_empty() {
                errors.push("Phone number cannot be empty.".to_string());
            }
            valid.customer_phone = Some(phone.trim().to_string());
        }
        if let Some(service) = &self.service {
            match service.parse::<Service>() {
                Ok(service) => valid.service = Some(service),
                Err(err) => errors.push(format!("Invalid service: {err}.")),
            }
        }
        if let Some(status) = &self.status {
            match status.parse::<QueueStatus>() {
                Ok(status) => valid.status = Some(status),
                Err(err) => errors.push(format!("Invalid status: {err}.")),
            }
        }
        if let Some(position) = self.position {
            if position < 1 {
                errors.push("Position must be 1 or greater.".to_string());
            }
            valid.position = Some(position);
        }

        if errors.is_empty() {
            Ok(valid)
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

#[derive(Clone)]
pub struct QueueEngine {
    pub(crate) db: SqlitePool,
    pub(crate) write_lock: Arc<Mutex<()>>,
    pub(crate) confirmations: ConfirmationSource,
}

impl QueueEngine {
    pub fn new(db: SqlitePool) -> Self {
        Self::with_confirmations(db, random_confirmations())
    }

    pub fn with_confirmations(db: SqlitePool, confirmations: ConfirmationSource) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
            confirmations,
        }
    }

    /// Appends a customer to the tail of the waiting set.
    pub async fn join(&self, request: JoinRequest) -> Result<QueueEntry> {
        let join = request.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut tx = begin_write(&self.db).await?;

        let position = count_waiting(&mut tx).await? + 1;
        let id = insert_waiting(&mut tx, &self.confirmations, &join, position).await?;

        let entry = fetch_entry(&mut tx, &id).await?.ok_or(AppError::NotFound("Queue entry"))?;
        tx.commit().await?;
        drop(_guard);

        log::info!(
            "{} joined the queue at position {} ({})",
            entry.customer_name,
            entry.position,
            entry.confirmation_number
        );
        log_activity(
            &self.db,
            "queue_joined",
            &format!(
                "{} joined the queue for {} at position {}.",
                entry.customer_name,
                entry.service.label(),
                entry.position
            ),
            Some(&entry.id),
        )
        .await;

        Ok(entry)
    }

    /// Without a filter, returns the board view: waiting, in-progress and
    /// completed entries.
    pub async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, QueueEntry>(
                    r#"SELECT id, customer_name, customer_phone, service, position, estimated_wait,
                              status, confirmation_number, joined_at, updated_at
                       FROM queue_entries
                       WHERE status = ?
                       ORDER BY position ASC, joined_at ASC"#,
                )
                .bind(status)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, QueueEntry>(
                    r#"SELECT id, customer_name, customer_phone, service, position, estimated_wait,
                              status, confirmation_number, joined_at, updated_at
                       FROM queue_entries
                       WHERE status IN (?, ?, ?)
                       ORDER BY position ASC, joined_at ASC"#,
                )
                .bind(QueueStatus::Waiting)
                .bind(QueueStatus::InProgress)
                .bind(QueueStatus::Completed)
                .fetch_all(&self.db)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<QueueEntry> {
        let mut conn = self.db.acquire().await?;
        fetch_entry(&mut conn, id)
            .await?
            .ok_or(AppError::NotFound("Queue entry"))
    }

    pub async fn find_by_confirmation(&self, number: &str) -> Result<QueueEntry> {
        sqlx::query_as::<_, QueueEntry>(
            r#"SELECT id, customer_name, customer_phone, service, position, estimated_wait,
                      status, confirmation_number, joined_at, updated_at
               FROM queue_entries
               WHERE confirmation_number = ?"#,
        )
        .bind(normalize_confirmation(number))
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound("Queue entry"))
    }

    pub async fn update(&self, id: &str, update: QueueUpdate) -> Result<QueueEntry> {
        let changes = update.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut tx = begin_write(&self.db).await?;
        let entry = apply_update(&mut tx, id, changes).await?;
        tx.commit().await?;
        drop(_guard);

        log::info!("Queue entry {} updated (status {})", entry.id, entry.status);
        log_activity(
            &self.db,
            "queue_updated",
            &format!("Queue entry for {} is now {}.", entry.customer_name, entry.status),
            Some(&entry.id),
        )
        .await;

        Ok(entry)
    }

    /// Takes an entry out of the waiting set as served or walked out.
    pub async fn leave_or_complete(&self, id: &str, status: QueueStatus) -> Result<QueueEntry> {
        if !matches!(status, QueueStatus::Completed | QueueStatus::Left) {
            return Err(AppError::invalid(format!(
                "Status must be completed or left, got {status}."
            )));
        }
        self.update(id, QueueUpdate::status(status)).await
    }

    /// Removes an entry regardless of its status and closes any gap it leaves.
    pub async fn delete(&self, id: &str) -> Result<QueueEntry> {
        let _guard = self.write_lock.lock().await;
        let mut tx = begin_write(&self.db).await?;

        let entry = fetch_entry(&mut tx, id)
            .await?
            .ok_or(AppError::NotFound("Queue entry"))?;

        sqlx::query("DELETE FROM queue_entries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if entry.status == QueueStatus::Waiting {
            reorder_waiting(&mut tx).await?;
        }
        tx.commit().await?;
        drop(_guard);

        log::info!("Queue entry {} deleted", entry.id);
        log_activity(
            &self.db,
            "queue_deleted",
            &format!("{} was removed from the queue.", entry.customer_name),
            Some(&entry.id),
        )
        .await;

        Ok(entry)
    }

    /// Renumbers the waiting set; returns how many entries changed.
    pub async fn reorder(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut tx = begin_write(&self.db).await?;
        let changed = reorder_waiting(&mut tx).await?;
        tx.commit().await?;
        Ok(changed)
    }
}

async fn apply_update(conn: &mut SqliteConnection, id: &str, changes: ValidUpdate) -> Result<QueueEntry> {
    let mut entry = fetch_entry(conn, id)
        .await?
        .ok_or(AppError::NotFound("Queue entry"))?;

    let was_waiting = entry.status == QueueStatus::Waiting;
    if let Some(name) = changes.customer_name {
        entry.customer_name = name;
    }
    if let Some(phone) = changes.customer_phone {
        entry.customer_phone = phone;
    }
    if let Some(service) = changes.service {
        entry.service = service;
    }
    if let Some(status) = changes.status {
        entry.status = status;
    }
    let is_waiting = entry.status == QueueStatus::Waiting;
    let now = Utc::now();

    if changes.position.is_some() && !is_waiting {
        return Err(AppError::invalid("Only waiting entries can be repositioned."));
    }

    if is_waiting && !was_waiting {
        entry.position = count_waiting(conn).await? + 1;
        entry.estimated_wait = estimated_wait(entry.position, entry.service);
    }

    sqlx::query(
        r#"UPDATE queue_entries
           SET customer_name = ?, customer_phone = ?, service = ?, status = ?,
               position = ?, estimated_wait = ?, updated_at = ?,
               completed_at = CASE WHEN ? THEN COALESCE(completed_at, ?) ELSE NULL END
           WHERE id = ?"#,
    )
    .bind(&entry.customer_name)
    .bind(&entry.customer_phone)
    .bind(entry.service)
    .bind(entry.status)
    .bind(entry.position)
    .bind(entry.estimated_wait)
    .bind(now)
    .bind(entry.status == QueueStatus::Completed)
    .bind(now)
    .bind(&entry.id)
    .execute(&mut *conn)
    .await?;

    if was_waiting || is_waiting {
        let mut waiting = waiting_entries(conn).await?;
        if let Some(requested) = changes.position {
            move_to_position(&mut waiting, &entry.id, requested);
        }
        renumber(conn, &waiting).await?;
    }

    fetch_entry(conn, id)
        .await?
        .ok_or(AppError::NotFound("Queue entry"))
}

/// Inserts a waiting entry at `position`, retrying on a confirmation collision.
async fn insert_waiting(
    conn: &mut SqliteConnection,
    confirmations: &ConfirmationSource,
    join: &ValidJoin,
    position: i64,
) -> Result<String> {
    let id = new_id();
    let now = Utc::now();

    for attempt in 1..=MAX_CONFIRMATION_ATTEMPTS {
        let result = sqlx::query(
            r#"INSERT INTO queue_entries
               (id, customer_name, customer_phone, service, position, estimated_wait, status,
                confirmation_number, joined_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&join.customer_name)
        .bind(&join.customer_phone)
        .bind(join.service)
        .bind(position)
        .bind(estimated_wait(position, join.service))
        .bind(QueueStatus::Waiting)
        .bind(confirmations())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => return Ok(id),
            Err(err) => retry_on_collision(err, "queue_entries", attempt)?,
        }
    }

    Err(confirmations_exhausted("queue_entries"))
}

pub(crate) async fn fetch_entry(conn: &mut SqliteConnection, id: &str) -> Result<Option<QueueEntry>> {
    let row = sqlx::query_as::<_, QueueEntry>(
        r#"SELECT id, customer_name, customer_phone, service, position, estimated_wait,
                  status, confirmation_number, joined_at, updated_at
           FROM queue_entries
           WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

async fn count_waiting(conn: &mut SqliteConnection) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queue_entries WHERE status = ?")
        .bind(QueueStatus::Waiting)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

async fn waiting_entries(conn: &mut SqliteConnection) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query_as::<_, QueueEntry>(
        r#"SELECT id, customer_name, customer_phone, service, position, estimated_wait,
                  status, confirmation_number, joined_at, updated_at
           FROM queue_entries
           WHERE status = ?
           ORDER BY position ASC, joined_at ASC"#,
    )
    .bind(QueueStatus::Waiting)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub(crate) async fn reorder_waiting(conn: &mut SqliteConnection) -> Result<usize> {
    let waiting = waiting_entries(conn).await?;
    renumber(conn, &waiting).await
}

/// Moves `id` to the 1-based slot `requested`, clamped to the queue length.
fn move_to_position(waiting: &mut Vec<QueueEntry>, id: &str, requested: i64) {
    let Some(current) = waiting.iter().position(|entry| entry.id == id) else {
        return;
    };
    let entry = waiting.remove(current);
    let slot = usize::try_from(requested.saturating_sub(1))
        .unwrap_or(0)
        .min(waiting.len());
    waiting.insert(slot, entry);
}

/// Writes positions `1..=N` in slice order, touching only rows that differ.
async fn renumber(conn: &mut SqliteConnection, ordered: &[QueueEntry]) -> Result<usize> {
    let mut changed = 0;
    let now = Utc::now();
    for (index, entry) in ordered.iter().enumerate() {
        let position = index as i64 + 1;
        let wait = estimated_wait(position, entry.service);
        if entry.position == position && entry.estimated_wait == wait {
            continue;
        }
        sqlx::query(
            "UPDATE queue_entries SET position = ?, estimated_wait = ?, updated_at = ? WHERE id = ?",
        )
        .bind(position)
        .bind(wait)
        .bind(now)
        .bind(&entry.id)
        .execute(&mut *conn)
        .await?;
        changed += 1;
    }

    if changed > 0 {
        log::info!("Renumbered {changed} of {} waiting entries", ordered.len());
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn engine() -> QueueEngine {
        QueueEngine::new(test_pool().await)
    }

    fn join_request(name: &str, service: &str) -> JoinRequest {
        JoinRequest {
            customer_name: name.to_string(),
            customer_phone: "555-0100".to_string(),
            service: service.to_string(),
        }
    }

    async fn waiting(engine: &QueueEngine) -> Vec<(String, i64, i64)> {
        engine
            .list(Some(QueueStatus::Waiting))
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.customer_name, entry.position, entry.estimated_wait))
            .collect()
    }

    #[tokio::test]
    async fn joins_append_in_order() {
        let engine = engine().await;
        for name in ["Ana", "Bo", "Cy"] {
            engine.join(join_request(name, "haircut")).await.unwrap();
        }

        assert_eq!(
            waiting(&engine).await,
            vec![
                ("Ana".to_string(), 1, 30),
                ("Bo".to_string(), 2, 60),
                ("Cy".to_string(), 3, 90),
            ]
        );
    }

    #[tokio::test]
    async fn join_uses_the_service_duration() {
        let engine = engine().await;
        engine.join(join_request("Ana", "haircut")).await.unwrap();
        let entry = engine.join(join_request("Bo", "haircut-beard")).await.unwrap();
        assert_eq!(entry.position, 2);
        assert_eq!(entry.estimated_wait, 90);
        assert_eq!(entry.status, QueueStatus::Waiting);
        assert_eq!(entry.confirmation_number.len(), 8);
    }

    #[tokio::test]
    async fn join_rejects_missing_fields_without_writing() {
        let engine = engine().await;
        let mut request = join_request("Ana", "haircut");
        request.customer_phone = "  ".to_string();

        let err = engine.join(request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(engine.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn join_rejects_unknown_service() {
        let engine = engine().await;
        let err = engine.join(join_request("Ana", "perm")).await.unwrap_err();
        match err {
            AppError::Validation(messages) => assert!(messages[0].contains("perm")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn leaving_closes_the_gap() {
        let engine = engine().await;
        let first = engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.join(join_request("Bo", "haircut")).await.unwrap();
        engine.join(join_request("Cy", "haircut")).await.unwrap();

        let left = engine.leave_or_complete(&first.id, QueueStatus::Left).await.unwrap();
        assert_eq!(left.status, QueueStatus::Left);

        assert_eq!(
            waiting(&engine).await,
            vec![("Bo".to_string(), 1, 30), ("Cy".to_string(), 2, 60)]
        );
    }

    #[tokio::test]
    async fn completing_from_the_middle_keeps_join_order() {
        let engine = engine().await;
        engine.join(join_request("Ana", "shave")).await.unwrap();
        let middle = engine.join(join_request("Bo", "haircut")).await.unwrap();
        engine.join(join_request("Cy", "styling")).await.unwrap();

        engine
            .leave_or_complete(&middle.id, QueueStatus::Completed)
            .await
            .unwrap();

        assert_eq!(
            waiting(&engine).await,
            vec![("Ana".to_string(), 1, 25), ("Cy".to_string(), 2, 70)]
        );
    }

    #[tokio::test]
    async fn leave_or_complete_rejects_other_statuses() {
        let engine = engine().await;
        let entry = engine.join(join_request("Ana", "haircut")).await.unwrap();
        let err = engine
            .leave_or_complete(&entry.id, QueueStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let engine = engine().await;
        engine.join(join_request("Ana", "haircut")).await.unwrap();

        assert!(matches!(engine.delete("missing").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            engine.update("missing", QueueUpdate::default()).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(waiting(&engine).await.len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_waiting_entry_renumbers() {
        let engine = engine().await;
        let first = engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.join(join_request("Bo", "beard-trim")).await.unwrap();

        let deleted = engine.delete(&first.id).await.unwrap();
        assert_eq!(deleted.customer_name, "Ana");
        assert_eq!(waiting(&engine).await, vec![("Bo".to_string(), 1, 20)]);
    }

    #[tokio::test]
    async fn rejoining_waiting_goes_to_the_tail() {
        let engine = engine().await;
        let first = engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.join(join_request("Bo", "haircut")).await.unwrap();

        engine.leave_or_complete(&first.id, QueueStatus::Left).await.unwrap();
        let back = engine
            .update(&first.id, QueueUpdate::status(QueueStatus::Waiting))
            .await
            .unwrap();

        assert_eq!(back.position, 2);
        assert_eq!(
            waiting(&engine).await,
            vec![("Bo".to_string(), 1, 30), ("Ana".to_string(), 2, 60)]
        );
    }

    #[tokio::test]
    async fn manual_position_moves_the_entry() {
        let engine = engine().await;
        engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.join(join_request("Bo", "haircut")).await.unwrap();
        let last = engine.join(join_request("Cy", "haircut")).await.unwrap();

        let moved = engine
            .update(
                &last.id,
                QueueUpdate {
                    position: Some(1),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.position, 1);

        let names: Vec<String> = waiting(&engine).await.into_iter().map(|(name, _, _)| name).collect();
        assert_eq!(names, vec!["Cy", "Ana", "Bo"]);

        engine
            .update(
                &last.id,
                QueueUpdate {
                    position: Some(99),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap();
        let positions: Vec<i64> = waiting(&engine).await.into_iter().map(|(_, pos, _)| pos).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn repositioning_a_finished_entry_is_rejected() {
        let engine = engine().await;
        let entry = engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.leave_or_complete(&entry.id, QueueStatus::Completed).await.unwrap();

        let err = engine
            .update(
                &entry.id,
                QueueUpdate {
                    position: Some(1),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn service_change_recomputes_wait() {
        let engine = engine().await;
        engine.join(join_request("Ana", "haircut")).await.unwrap();
        let second = engine.join(join_request("Bo", "haircut")).await.unwrap();

        let updated = engine
            .update(
                &second.id,
                QueueUpdate {
                    service: Some("shave".to_string()),
                    customer_name: Some("Bo B.".to_string()),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.customer_name, "Bo B.");
        assert_eq!(updated.service, Service::Shave);
        assert_eq!(updated.estimated_wait, 50);
    }

    #[tokio::test]
    async fn update_rejects_blank_fields() {
        let engine = engine().await;
        let entry = engine.join(join_request("Ana", "haircut")).await.unwrap();
        let err = engine
            .update(
                &entry.id,
                QueueUpdate {
                    customer_name: Some(" ".to_string()),
                    status: Some("gone".to_string()),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap_err();
        match err {
            AppError::Validation(messages) => assert_eq!(messages.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reorder_repairs_gaps_and_collisions() {
        let engine = engine().await;
        engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.join(join_request("Bo", "haircut")).await.unwrap();
        engine.join(join_request("Cy", "haircut")).await.unwrap();

        sqlx::query("UPDATE queue_entries SET position = 7 WHERE customer_name = 'Bo'")
            .execute(&engine.db)
            .await
            .unwrap();
        sqlx::query("UPDATE queue_entries SET position = 7 WHERE customer_name = 'Cy'")
            .execute(&engine.db)
            .await
            .unwrap();

        let changed = engine.reorder().await.unwrap();
        assert_eq!(changed, 2);
        assert_eq!(
            waiting(&engine).await,
            vec![
                ("Ana".to_string(), 1, 30),
                ("Bo".to_string(), 2, 60),
                ("Cy".to_string(), 3, 90),
            ]
        );
        assert_eq!(engine.reorder().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_joins_get_distinct_positions() {
        let engine = engine().await;
        let mut handles = Vec::new();
        for i in 0..12 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .join(join_request(&format!("Customer {i}"), "beard-trim"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let positions: Vec<i64> = waiting(&engine).await.into_iter().map(|(_, pos, _)| pos).collect();
        assert_eq!(positions, (1..=12).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn confirmation_lookup_is_case_insensitive() {
        let engine = engine().await;
        let entry = engine.join(join_request("Ana", "haircut")).await.unwrap();

        let found = engine
            .find_by_confirmation(&entry.confirmation_number.to_ascii_lowercase())
            .await
            .unwrap();
        assert_eq!(found.id, entry.id);
        assert!(matches!(
            engine.find_by_confirmation("NOPE0000").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn board_view_hides_customers_who_left() {
        let engine = engine().await;
        let gone = engine.join(join_request("Ana", "haircut")).await.unwrap();
        engine.join(join_request("Bo", "haircut")).await.unwrap();
        engine.leave_or_complete(&gone.id, QueueStatus::Left).await.unwrap();

        let board = engine.list(None).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].customer_name, "Bo");
        assert_eq!(engine.list(Some(QueueStatus::Left)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_retries_after_a_confirmation_collision() {
        let engine = QueueEngine::with_confirmations(
            test_pool().await,
            crate::tokens::scripted_confirmations(&["AAAA1111", "AAAA1111", "BBBB2222"]),
        );
        let first = engine.join(join_request("Ana", "haircut")).await.unwrap();
        let second = engine.join(join_request("Bo", "haircut")).await.unwrap();

        assert_eq!(first.confirmation_number, "AAAA1111");
        assert_eq!(second.confirmation_number, "BBBB2222");
        assert_eq!(second.position, 2);
    }

    #[tokio::test]
    async fn join_gives_up_when_every_confirmation_collides() {
        let engine = QueueEngine::with_confirmations(
            test_pool().await,
            Arc::new(|| "AAAA1111".to_string()),
        );
        engine.join(join_request("Ana", "haircut")).await.unwrap();

        let err = engine.join(join_request("Bo", "haircut")).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(waiting(&engine).await, vec![("Ana".to_string(), 1, 30)]);

        let stored = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(&engine.db)
            .await
            .unwrap();
        assert_eq!(stored, 1);
    }

    async fn completed_at(engine: &QueueEngine, id: &str) -> Option<chrono::DateTime<Utc>> {
        sqlx::query_scalar("SELECT completed_at FROM queue_entries WHERE id = ?")
            .bind(id)
            .fetch_one(&engine.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completion_time_survives_later_edits() {
        let engine = engine().await;
        let entry = engine.join(join_request("Ana", "haircut")).await.unwrap();
        assert_eq!(completed_at(&engine, &entry.id).await, None);

        engine
            .leave_or_complete(&entry.id, QueueStatus::Completed)
            .await
            .unwrap();
        let finished = completed_at(&engine, &entry.id).await.unwrap();

        engine
            .update(
                &entry.id,
                QueueUpdate {
                    customer_name: Some("Ana Maria".to_string()),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed_at(&engine, &entry.id).await, Some(finished));

        engine
            .update(&entry.id, QueueUpdate::status(QueueStatus::Waiting))
            .await
            .unwrap();
        assert_eq!(completed_at(&engine, &entry.id).await, None);
    }
}
