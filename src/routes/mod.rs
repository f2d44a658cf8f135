use actix_web::web;
use actix_web_httpauth::extractors::basic;

use crate::{auth::AUTH_REALM, error::AppError};

pub mod public;
pub mod staff;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::invalid(format!("Invalid request body: {err}.")).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::invalid(format!("Invalid query: {err}.")).into()
    }))
    .app_data(basic::Config::default().realm(AUTH_REALM))
    .configure(public::configure)
    .configure(staff::configure);
}
