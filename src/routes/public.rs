use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::{
    appointments::BookingRequest,
    barbers,
    error::{AppError, Result},
    models::{service_catalog, QueueStatus},
    queue::JoinRequest,
    state::AppState,
    templates::{render_html, BoardRow, QueueBoardTemplate, BOARD_REFRESH_SECONDS},
};

#[derive(Deserialize)]
pub struct QueueFilter {
    pub status: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/queue").route(web::get().to(queue_board)))
        .service(web::resource("/api/services").route(web::get().to(list_services)))
        .service(
            web::resource("/api/queue")
                .route(web::get().to(list_queue))
                .route(web::post().to(join_queue)),
        )
        .service(
            web::resource("/api/queue/confirmation/{number}")
                .route(web::get().to(queue_by_confirmation)),
        )
        .service(web::resource("/api/appointments").route(web::post().to(book_appointment)))
        .service(
            web::resource("/api/appointments/confirmation/{number}")
                .route(web::get().to(appointment_by_confirmation)),
        )
        .service(web::resource("/api/barbers").route(web::get().to(list_barbers)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn queue_board(state: web::Data<AppState>) -> Result<HttpResponse> {
    let entries = state.queue.list(None).await?;
    let waiting = entries
        .iter()
        .filter(|entry| entry.status == QueueStatus::Waiting)
        .map(BoardRow::from)
        .collect();
    let serving = entries
        .iter()
        .filter(|entry| entry.status == QueueStatus::InProgress)
        .map(BoardRow::from)
        .collect();

    render_html(&QueueBoardTemplate {
        waiting,
        serving,
        refresh_seconds: BOARD_REFRESH_SECONDS,
    })
}

async fn list_services() -> HttpResponse {
    HttpResponse::Ok().json(service_catalog())
}

async fn join_queue(
    state: web::Data<AppState>,
    payload: web::Json<JoinRequest>,
) -> Result<HttpResponse> {
    let entry = state.queue.join(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(entry))
}

async fn list_queue(
    state: web::Data<AppState>,
    query: web::Query<QueueFilter>,
) -> Result<HttpResponse> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<QueueStatus>()
                .map_err(|err| AppError::invalid(format!("Invalid status filter: {err}.")))?,
        ),
    };
    let entries = state.queue.list(status).await?;
    Ok(HttpResponse::Ok().json(entries))
}

async fn queue_by_confirmation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let entry = state.queue.find_by_confirmation(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(entry))
}

async fn book_appointment(
    state: web::Data<AppState>,
    payload: web::Json<BookingRequest>,
) -> Result<HttpResponse> {
    let appointment = state.appointments.book(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(appointment))
}

async fn appointment_by_confirmation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment = state
        .appointments
        .find_by_confirmation(&path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(appointment))
}

async fn list_barbers(state: web::Data<AppState>) -> Result<HttpResponse> {
    let barbers = barbers::list_active(&state.db).await?;
    Ok(HttpResponse::Ok().json(barbers))
}
