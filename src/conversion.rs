//! Starting service for a walk-in: the queue entry becomes a confirmed
//! appointment and leaves the waiting set.

use chrono::{Local, Utc};
use serde::Serialize;

use crate::{
    appointments::{fetch_appointment, insert_appointment, NewAppointment},
    db::{begin_write, log_activity},
    error::{AppError, Result},
    models::{Appointment, AppointmentStatus, QueueEntry, QueueStatus},
    queue::{fetch_entry, reorder_waiting, QueueEngine},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub appointment: Appointment,
    pub queue_entry: QueueEntry,
}

pub fn conversion_note(queue_confirmation: &str) -> String {
    format!("Converted from queue entry #{queue_confirmation}")
}

impl QueueEngine {
    /// Creates a confirmed appointment for the entry, marks the entry
    /// in-progress and renumbers whoever is still waiting.
    ///
    /// Entries that are not waiting may still be converted; this is logged.
    pub async fn convert_to_appointment(&self, queue_id: &str) -> Result<Conversion> {
        let _guard = self.write_lock.lock().await;
        let mut tx = begin_write(&self.db).await?;

        let entry = fetch_entry(&mut tx, queue_id)
            .await?
            .ok_or(AppError::NotFound("Queue entry"))?;
        if entry.status != QueueStatus::Waiting {
            log::warn!(
                "Converting queue entry {} which is already {}",
                entry.confirmation_number,
                entry.status
            );
        }

        let now = Local::now();
        let appointment_id = insert_appointment(
            &mut tx,
            &self.confirmations,
            NewAppointment {
                customer_name: entry.customer_name.clone(),
                customer_phone: entry.customer_phone.clone(),
                service: entry.service,
                barber_id: None,
                date: now.date_naive(),
                time: now.format("%H:%M").to_string(),
                status: AppointmentStatus::Confirmed,
                notes: conversion_note(&entry.confirmation_number),
            },
        )
        .await?;

        sqlx::query(
            "UPDATE queue_entries SET status = ?, updated_at = ?, completed_at = NULL WHERE id = ?",
        )
        .bind(QueueStatus::InProgress)
        .bind(Utc::now())
        .bind(&entry.id)
        .execute(&mut *tx)
        .await?;

        if entry.status == QueueStatus::Waiting {
            reorder_waiting(&mut tx).await?;
        }

        let appointment = fetch_appointment(&mut tx, &appointment_id)
            .await?
            .ok_or(AppError::NotFound("Appointment"))?;
        let queue_entry = fetch_entry(&mut tx, queue_id)
            .await?
            .ok_or(AppError::NotFound("Queue entry"))?;
        tx.commit().await?;
        drop(_guard);

        log::info!(
            "Queue entry {} converted to appointment {}",
            queue_entry.confirmation_number,
            appointment.confirmation_number
        );
        log_activity(
            &self.db,
            "queue_converted",
            &format!(
                "Started service for {} (appointment #{}).",
                queue_entry.customer_name, appointment.confirmation_number
            ),
            Some(&queue_entry.id),
        )
        .await;

        Ok(Conversion {
            appointment,
            queue_entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        models::Service,
        queue::{JoinRequest, QueueUpdate},
    };

    async fn engine_with(names: &[&str]) -> (QueueEngine, Vec<QueueEntry>) {
        let engine = QueueEngine::new(test_pool().await);
        let mut entries = Vec::new();
        for name in names {
            let entry = engine
                .join(JoinRequest {
                    customer_name: name.to_string(),
                    customer_phone: "555-0100".to_string(),
                    service: "haircut-beard".to_string(),
                })
                .await
                .unwrap();
            entries.push(entry);
        }
        (engine, entries)
    }

    #[tokio::test]
    async fn converts_the_head_of_the_queue() {
        let (engine, entries) = engine_with(&["Ana", "Bo"]).await;

        let conversion = engine.convert_to_appointment(&entries[0].id).await.unwrap();

        let appointment = &conversion.appointment;
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
        assert_eq!(appointment.service, Service::HaircutBeard);
        assert_eq!(appointment.customer_name, "Ana");
        assert_eq!(appointment.customer_phone, "555-0100");
        assert_eq!(appointment.barber_id, None);
        assert_ne!(appointment.confirmation_number, entries[0].confirmation_number);
        assert_eq!(
            appointment.notes,
            format!("Converted from queue entry #{}", entries[0].confirmation_number)
        );
        assert_eq!(appointment.time.len(), 5);

        assert_eq!(conversion.queue_entry.status, QueueStatus::InProgress);
        assert_eq!(conversion.queue_entry.id, entries[0].id);
    }

    #[tokio::test]
    async fn conversion_renumbers_the_waiting_set() {
        let (engine, entries) = engine_with(&["Ana", "Bo", "Cy"]).await;

        engine.convert_to_appointment(&entries[0].id).await.unwrap();

        let waiting = engine.list(Some(QueueStatus::Waiting)).await.unwrap();
        let summary: Vec<(String, i64, i64)> = waiting
            .into_iter()
            .map(|entry| (entry.customer_name, entry.position, entry.estimated_wait))
            .collect();
        assert_eq!(
            summary,
            vec![("Bo".to_string(), 1, 45), ("Cy".to_string(), 2, 90)]
        );
    }

    #[tokio::test]
    async fn unknown_queue_id_is_not_found() {
        let (engine, _) = engine_with(&["Ana"]).await;
        let err = engine.convert_to_appointment("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments")
            .fetch_one(&engine.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn finished_entries_can_still_be_converted() {
        let (engine, entries) = engine_with(&["Ana", "Bo"]).await;
        engine
            .update(&entries[0].id, QueueUpdate::status(QueueStatus::Left))
            .await
            .unwrap();

        let first = engine.convert_to_appointment(&entries[0].id).await.unwrap();
        let second = engine.convert_to_appointment(&entries[0].id).await.unwrap();
        assert_eq!(first.queue_entry.status, QueueStatus::InProgress);
        assert_ne!(
            first.appointment.confirmation_number,
            second.appointment.confirmation_number
        );

        let waiting = engine.list(Some(QueueStatus::Waiting)).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].position, 1);
    }
}
