use sqlx::SqlitePool;

use crate::{appointments::AppointmentBook, queue::QueueEngine};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub queue: QueueEngine,
    pub appointments: AppointmentBook,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            queue: QueueEngine::new(db.clone()),
            appointments: AppointmentBook::new(db.clone()),
            db,
        }
    }
}
