//! Walk-in queue and appointment service for a barbershop.

pub mod appointments;
pub mod auth;
pub mod barbers;
pub mod config;
pub mod conversion;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod routes;
pub mod state;
pub mod templates;
pub mod tokens;
