use actix_web::{http::header::ContentType, HttpResponse};
use askama::Template;

use crate::{
    error::{AppError, Result},
    models::QueueEntry,
};

pub const BOARD_REFRESH_SECONDS: u32 = 30;

/// Renders an HTML page; a template failure surfaces as an internal error.
pub fn render_html(template: &impl Template) -> Result<HttpResponse> {
    let body = template
        .render()
        .map_err(|err| AppError::Internal(format!("template render failed: {err}")))?;
    Ok(HttpResponse::Ok().content_type(ContentType::html()).body(body))
}

#[derive(Clone, Debug)]
pub struct BoardRow {
    pub position: i64,
    pub first_name: String,
    pub service: &'static str,
    pub wait: String,
}

impl From<&QueueEntry> for BoardRow {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            position: entry.position,
            first_name: entry
                .customer_name
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
            service: entry.service.label(),
            wait: format_wait(entry.estimated_wait),
        }
    }
}

#[derive(Template)]
#[template(path = "queue_board.html")]
pub struct QueueBoardTemplate {
    pub waiting: Vec<BoardRow>,
    pub serving: Vec<BoardRow>,
    pub refresh_seconds: u32,
}

/// `45 min`, `1h 30m`, `2h`.
pub fn format_wait(minutes: i64) -> String {
    if minutes < 60 {
        return format!("{minutes} min");
    }
    let hours = minutes / 60;
    let mins = minutes % 60;
    if mins > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{hours}h")
    }
}
