use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    appointments::{AppointmentUpdate, CompletedRange},
    auth::{staff_validator, StaffUser},
    barbers::{self, NewBarber},
    error::{AppError, Result},
    models::{AppointmentStatus, QueueStatus},
    queue::QueueUpdate,
    state::AppState,
};

#[derive(Deserialize)]
struct StatusChange {
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardSummary {
    staff_name: String,
    waiting: i64,
    in_progress: i64,
    completed_today: i64,
    upcoming_appointments: i64,
    completed_appointments: i64,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/staff")
            .wrap(HttpAuthentication::basic(staff_validator))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/queue/reorder").route(web::post().to(reorder_queue)))
            .service(
                web::resource("/queue/{id}")
                    .route(web::get().to(queue_entry_detail))
                    .route(web::put().to(update_queue_entry))
                    .route(web::delete().to(delete_queue_entry)),
            )
            .service(web::resource("/queue/{id}/status").route(web::post().to(set_queue_status)))
            .service(web::resource("/queue/{id}/convert").route(web::post().to(convert_queue_entry)))
            .service(web::resource("/appointments").route(web::get().to(upcoming_appointments)))
            .service(
                web::resource("/appointments/completed")
                    .route(web::get().to(completed_appointments)),
            )
            .service(
                web::resource("/appointments/{id}")
                    .route(web::get().to(appointment_detail))
                    .route(web::put().to(update_appointment))
                    .route(web::delete().to(delete_appointment)),
            )
            .service(web::resource("/barbers").route(web::post().to(create_barber))),
    );
}

async fn dashboard(state: web::Data<AppState>, auth: web::ReqData<StaffUser>) -> Result<HttpResponse> {
    let today = Local::now().date_naive();
    let start_of_day = local_midnight(today);

    let waiting = count_queue(&state.db, QueueStatus::Waiting).await?;
    let in_progress = count_queue(&state.db, QueueStatus::InProgress).await?;
    let completed_today = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM queue_entries WHERE status = ? AND completed_at >= ?",
    )
    .bind(QueueStatus::Completed)
    .bind(start_of_day)
    .fetch_one(&state.db)
    .await?;
    let upcoming_appointments = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM appointments WHERE date >= ? AND status IN (?, ?)",
    )
    .bind(today)
    .bind(AppointmentStatus::Pending)
    .bind(AppointmentStatus::Confirmed)
    .fetch_one(&state.db)
    .await?;
    let completed_appointments =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments WHERE status = ?")
            .bind(AppointmentStatus::Completed)
            .fetch_one(&state.db)
            .await?;

    Ok(HttpResponse::Ok().json(DashboardSummary {
        staff_name: auth.name.clone(),
        waiting,
        in_progress,
        completed_today,
        upcoming_appointments,
        completed_appointments,
    }))
}

/// Start of the shop's local day, as a UTC instant.
fn local_midnight(today: NaiveDate) -> DateTime<Utc> {
    let midnight = today.and_time(NaiveTime::MIN);
    midnight
        .and_local_timezone(Local)
        .earliest()
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

async fn count_queue(pool: &SqlitePool, status: QueueStatus) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM queue_entries WHERE status = ?")
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn queue_entry_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let entry = state.queue.get(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(entry))
}

async fn update_queue_entry(
    state: web::Data<AppState>,
    auth: web::ReqData<StaffUser>,
    path: web::Path<String>,
    payload: web::Json<QueueUpdate>,
) -> Result<HttpResponse> {
    let entry = state.queue.update(&path.into_inner(), payload.into_inner()).await?;
    log::info!("{} edited queue entry {}", auth.name, entry.confirmation_number);
    Ok(HttpResponse::Ok().json(entry))
}

async fn delete_queue_entry(
    state: web::Data<AppState>,
    auth: web::ReqData<StaffUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let entry = state.queue.delete(&path.into_inner()).await?;
    log::info!("{} removed queue entry {}", auth.name, entry.confirmation_number);
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "id": entry.id })))
}

async fn set_queue_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StatusChange>,
) -> Result<HttpResponse> {
    let status = payload
        .status
        .parse::<QueueStatus>()
        .map_err(|err| AppError::invalid(format!("Invalid status: {err}.")))?;
    let entry = state.queue.leave_or_complete(&path.into_inner(), status).await?;
    Ok(HttpResponse::Ok().json(entry))
}

async fn convert_queue_entry(
    state: web::Data<AppState>,
    auth: web::ReqData<StaffUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let conversion = state.queue.convert_to_appointment(&path.into_inner()).await?;
    log::info!(
        "{} started service for {}",
        auth.name,
        conversion.queue_entry.customer_name
    );
    Ok(HttpResponse::Ok().json(conversion))
}

async fn reorder_queue(state: web::Data<AppState>) -> Result<HttpResponse> {
    let renumbered = state.queue.reorder().await?;
    Ok(HttpResponse::Ok().json(json!({ "renumbered": renumbered })))
}

async fn upcoming_appointments(state: web::Data<AppState>) -> Result<HttpResponse> {
    let appointments = state.appointments.upcoming(Local::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(appointments))
}

async fn completed_appointments(
    state: web::Data<AppState>,
    query: web::Query<CompletedRange>,
) -> Result<HttpResponse> {
    let appointments = state.appointments.completed(query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(appointments))
}

async fn appointment_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment = state.appointments.get(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

async fn update_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<StaffUser>,
    path: web::Path<String>,
    payload: web::Json<AppointmentUpdate>,
) -> Result<HttpResponse> {
    let appointment = state
        .appointments
        .update(&path.into_inner(), payload.into_inner())
        .await?;
    log::info!(
        "{} updated appointment {}",
        auth.name,
        appointment.confirmation_number
    );
    Ok(HttpResponse::Ok().json(appointment))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<StaffUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    state.appointments.delete(&appointment_id).await?;
    log::info!("{} deleted appointment {}", auth.name, appointment_id);
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "id": appointment_id })))
}

async fn create_barber(
    state: web::Data<AppState>,
    auth: web::ReqData<StaffUser>,
    payload: web::Json<NewBarber>,
) -> Result<HttpResponse> {
    let payload = payload.into_inner();
    let barber =
        barbers::create_barber(&state.db, &payload.name, &payload.email, &payload.password).await?;
    log::info!("{} added barber {}", auth.name, barber.name);
    Ok(HttpResponse::Created().json(barber))
}
