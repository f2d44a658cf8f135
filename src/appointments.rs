use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    barbers,
    db::{begin_write, log_activity},
    error::{AppError, Result},
    models::{Appointment, AppointmentStatus, Service},
    tokens::{
        confirmations_exhausted, new_id, normalize_confirmation, random_confirmations,
        retry_on_collision, ConfirmationSource, MAX_CONFIRMATION_ATTEMPTS,
    },
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    pub barber_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdate {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub service: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    /// An empty string unassigns the barber.
    pub barber_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRange {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Row ready to be written to the appointments table.
#[derive(Debug, Clone)]
pub(crate) struct NewAppointment {
    pub customer_name: String,
    pub customer_phone: String,
    pub service: Service,
    pub barber_id: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub status: AppointmentStatus,
    pub notes: String,
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// Accepts `14:30` or `2:30 PM` and returns the 24-hour `HH:MM` form.
pub(crate) fn normalize_time(raw: &str) -> Option<String> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw.to_ascii_uppercase(), "%I:%M %p"))
        .ok()
        .map(|time| time.format("%H:%M").to_string())
}

#[derive(Clone)]
pub struct AppointmentBook {
    db: SqlitePool,
    confirmations: ConfirmationSource,
}

impl AppointmentBook {
    pub fn new(db: SqlitePool) -> Self {
        Self::with_confirmations(db, random_confirmations())
    }

    pub fn with_confirmations(db: SqlitePool, confirmations: ConfirmationSource) -> Self {
        Self { db, confirmations }
    }

    pub async fn book(&self, request: BookingRequest) -> Result<Appointment> {
        let mut errors = Vec::new();
        if request.customer_name.trim().is_empty() {
            errors.push("Customer name is required.".to_string());
        }
        if request.customer_phone.trim().is_empty() {
            errors.push("Phone number is required.".to_string());
        }
        let service = match request.service.trim() {
            "" => {
                errors.push("Please select a service.".to_string());
                None
            }
            raw => raw
                .parse::<Service>()
                .map_err(|err| errors.push(format!("Invalid service: {err}.")))
                .ok(),
        };
        let date = parse_date(&request.date);
        if date.is_none() {
            errors.push("Please pick a valid date.".to_string());
        }
        let time = normalize_time(&request.time);
        if time.is_none() {
            errors.push("Please pick a valid time.".to_string());
        }

        let (Some(service), Some(date), Some(time)) = (service, date, time) else {
            return Err(AppError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let barber_id = request
            .barber_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut tx = begin_write(&self.db).await?;
        if let Some(barber_id) = &barber_id {
            if barbers::find_active(&mut tx, barber_id).await?.is_none() {
                return Err(AppError::invalid("The selected barber is not available."));
            }
        }

        let id = insert_appointment(
            &mut tx,
            &self.confirmations,
            NewAppointment {
                customer_name: request.customer_name.trim().to_string(),
                customer_phone: request.customer_phone.trim().to_string(),
                service,
                barber_id,
                date,
                time,
                status: AppointmentStatus::Pending,
                notes: request.notes.unwrap_or_default().trim().to_string(),
            },
        )
        .await?;
        let appointment = fetch_appointment(&mut tx, &id)
            .await?
            .ok_or(AppError::NotFound("Appointment"))?;
        tx.commit().await?;

        log::info!(
            "Appointment {} booked for {} on {} at {}",
            appointment.confirmation_number,
            appointment.customer_name,
            appointment.date,
            appointment.time
        );
        log_activity(
            &self.db,
            "appointment_booked",
            &format!(
                "{} booked {} for {} at {}.",
                appointment.customer_name,
                appointment.service.label(),
                appointment.date,
                appointment.time
            ),
            Some(&appointment.id),
        )
        .await;

        Ok(appointment)
    }

    /// Pending and confirmed appointments from `today` onwards, soonest first.
    pub async fn upcoming(&self, today: NaiveDate) -> Result<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(
            r#"SELECT a.id, a.customer_name, a.customer_phone, a.service, a.barber_id,
                      b.name AS barber_name, a.date, a.time, a.status, a.confirmation_number,
                      a.notes, a.created_at, a.updated_at
               FROM appointments a
               LEFT JOIN barbers b ON a.barber_id = b.id
               WHERE a.date >= ? AND a.status IN (?, ?)
               ORDER BY a.date ASC, a.time ASC"#,
        )
        .bind(today)
        .bind(AppointmentStatus::Pending)
        .bind(AppointmentStatus::Confirmed)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Completed appointments, newest first, optionally within `start <= date < end`.
    pub async fn completed(&self, range: CompletedRange) -> Result<Vec<Appointment>> {
        let rows = match (range.start_date, range.end_date) {
            (Some(start), Some(end)) => {
                sqlx::query_as::<_, Appointment>(
                    r#"SELECT a.id, a.customer_name, a.customer_phone, a.service, a.barber_id,
                              b.name AS barber_name, a.date, a.time, a.status, a.confirmation_number,
                              a.notes, a.created_at, a.updated_at
                       FROM appointments a
                       LEFT JOIN barbers b ON a.barber_id = b.id
                       WHERE a.status = ? AND a.date >= ? AND a.date < ?
                       ORDER BY a.date DESC, a.time DESC"#,
                )
                .bind(AppointmentStatus::Completed)
                .bind(start)
                .bind(end)
                .fetch_all(&self.db)
                .await?
            }
            _ => {
                sqlx::query_as::<_, Appointment>(
                    r#"SELECT a.id, a.customer_name, a.customer_phone, a.service, a.barber_id,
                              b.name AS barber_name, a.date, a.time, a.status, a.confirmation_number,
                              a.notes, a.created_at, a.updated_at
                       FROM appointments a
                       LEFT JOIN barbers b ON a.barber_id = b.id
                       WHERE a.status = ?
                       ORDER BY a.date DESC, a.time DESC"#,
                )
                .bind(AppointmentStatus::Completed)
                .fetch_all(&self.db)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Appointment> {
        let mut conn = self.db.acquire().await?;
        fetch_appointment(&mut conn, id)
            .await?
            .ok_or(AppError::NotFound("Appointment"))
    }

    pub async fn find_by_confirmation(&self, number: &str) -> Result<Appointment> {
        sqlx::query_as::<_, Appointment>(
            r#"SELECT a.id, a.customer_name, a.customer_phone, a.service, a.barber_id,
                      b.name AS barber_name, a.date, a.time, a.status, a.confirmation_number,
                      a.notes, a.created_at, a.updated_at
               FROM appointments a
               LEFT JOIN barbers b ON a.barber_id = b.id
               WHERE a.confirmation_number = ?"#,
        )
        .bind(normalize_confirmation(number))
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound("Appointment"))
    }

    pub async fn update(&self, id: &str, update: AppointmentUpdate) -> Result<Appointment> {
        let mut tx = begin_write(&self.db).await?;
        let mut current = fetch_appointment(&mut tx, id)
            .await?
            .ok_or(AppError::NotFound("Appointment"))?;

        let mut errors = Vec::new();
        if let Some(name) = update.customer_name {
            if name.trim().is_empty() {
                errors.push("Customer name cannot be empty.".to_string());
            }
            current.customer_name = name.trim().to_string();
        }
        if let Some(phone) = update.customer_phone {
            if phone.trim().is_empty() {
                errors.push("Phone number cannot be empty.".to_string());
            }
            current.customer_phone = phone.trim().to_string();
        }
        if let Some(service) = update.service {
            match service.parse::<Service>() {
                Ok(service) => current.service = service,
                Err(err) => errors.push(format!("Invalid service: {err}.")),
            }
        }
        if let Some(date) = update.date {
            match parse_date(&date) {
                Some(date) => current.date = date,
                None => errors.push("Please pick a valid date.".to_string()),
            }
        }
        if let Some(time) = update.time {
            match normalize_time(&time) {
                Some(time) => current.time = time,
                None => errors.push("Please pick a valid time.".to_string()),
            }
        }
        if let Some(status) = update.status {
            match status.parse::<AppointmentStatus>() {
                Ok(status) => current.status = status,
                Err(err) => errors.push(format!("Invalid status: {err}.")),
            }
        }
        if let Some(notes) = update.notes {
            current.notes = notes.trim().to_string();
        }
        if let Some(barber_id) = update.barber_id {
            let barber_id = barber_id.trim();
            if barber_id.is_empty() {
                current.barber_id = None;
            } else if barbers::find_active(&mut tx, barber_id).await?.is_some() {
                current.barber_id = Some(barber_id.to_string());
            } else {
                errors.push("The selected barber is not available.".to_string());
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        sqlx::query(
            r#"UPDATE appointments
               SET customer_name = ?, customer_phone = ?, service = ?, barber_id = ?, date = ?,
                   time = ?, status = ?, notes = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&current.customer_name)
        .bind(&current.customer_phone)
        .bind(current.service)
        .bind(&current.barber_id)
        .bind(current.date)
        .bind(&current.time)
        .bind(current.status)
        .bind(&current.notes)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let appointment = fetch_appointment(&mut tx, id)
            .await?
            .ok_or(AppError::NotFound("Appointment"))?;
        tx.commit().await?;

        log_activity(
            &self.db,
            "appointment_updated",
            &format!(
                "Appointment {} is now {}.",
                appointment.confirmation_number, appointment.status
            ),
            Some(&appointment.id),
        )
        .await;

        Ok(appointment)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Appointment"));
        }

        log_activity(&self.db, "appointment_deleted", "An appointment was deleted.", Some(id)).await;
        Ok(())
    }
}

/// Inserts with a fresh confirmation number, retrying on the rare collision.
pub(crate) async fn insert_appointment(
    conn: &mut SqliteConnection,
    confirmations: &ConfirmationSource,
    new: NewAppointment,
) -> Result<String> {
    let id = new_id();
    let now = Utc::now();

    for attempt in 1..=MAX_CONFIRMATION_ATTEMPTS {
        let result = sqlx::query(
            r#"INSERT INTO appointments
               (id, customer_name, customer_phone, service, barber_id, date, time, status,
                confirmation_number, notes, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&new.customer_name)
        .bind(&new.customer_phone)
        .bind(new.service)
        .bind(&new.barber_id)
        .bind(new.date)
        .bind(&new.time)
        .bind(new.status)
        .bind(confirmations())
        .bind(&new.notes)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => return Ok(id),
            Err(err) => retry_on_collision(err, "appointments", attempt)?,
        }
    }

    Err(confirmations_exhausted("appointments"))
}

pub(crate) async fn fetch_appointment(conn: &mut SqliteConnection, id: &str) -> Result<Option<Appointment>> {
    let row = sqlx::query_as::<_, Appointment>(
        r#"SELECT a.id, a.customer_name, a.customer_phone, a.service, a.barber_id,
                  b.name AS barber_name, a.date, a.time, a.status, a.confirmation_number,
                  a.notes, a.created_at, a.updated_at
           FROM appointments a
           LEFT JOIN barbers b ON a.barber_id = b.id
           WHERE a.id = ?"#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}
