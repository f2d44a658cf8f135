use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum Service {
    Haircut,
    BeardTrim,
    HaircutBeard,
    Shave,
    Styling,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Haircut,
        Service::BeardTrim,
        Service::HaircutBeard,
        Service::Shave,
        Service::Styling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Haircut => "haircut",
            Service::BeardTrim => "beard-trim",
            Service::HaircutBeard => "haircut-beard",
            Service::Shave => "shave",
            Service::Styling => "styling",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Service::Haircut => "Classic Haircut",
            Service::BeardTrim => "Beard Trim",
            Service::HaircutBeard => "Haircut + Beard",
            Service::Shave => "Hot Towel Shave",
            Service::Styling => "Hair Styling",
        }
    }

    /// Minutes one customer occupies a chair for this service.
    pub fn base_minutes(self) -> i64 {
        match self {
            Service::Haircut => 30,
            Service::BeardTrim => 20,
            Service::HaircutBeard => 45,
            Service::Shave => 25,
            Service::Styling => 35,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Service::ALL
            .into_iter()
            .find(|service| service.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownValue {
                kind: "service",
                value: value.to_string(),
            })
    }
}

/// Estimated minutes until a waiting customer is served.
pub fn estimated_wait(position: i64, service: Service) -> i64 {
    position * service.base_minutes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum QueueStatus {
    Waiting,
    InProgress,
    Completed,
    Left,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Waiting,
        QueueStatus::InProgress,
        QueueStatus::Completed,
        QueueStatus::Left,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::InProgress => "in-progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Left => "left",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        QueueStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownValue {
                kind: "queue status",
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownValue {
                kind: "appointment status",
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub service: Service,
    pub position: i64,
    pub estimated_wait: i64,
    pub status: QueueStatus,
    pub confirmation_number: String,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub service: Service,
    pub barber_id: Option<String>,
    pub barber_name: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub status: AppointmentStatus,
    pub confirmation_number: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BarberRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BarberSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOption {
    pub id: &'static str,
    pub name: &'static str,
    pub duration_minutes: i64,
}

pub fn service_catalog() -> Vec<ServiceOption> {
    Service::ALL
        .into_iter()
        .map(|service| ServiceOption {
            id: service.as_str(),
            name: service.label(),
            duration_minutes: service.base_minutes(),
        })
        .collect()
}
