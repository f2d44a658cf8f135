use actix_web::{dev::ServiceRequest, error::ErrorUnauthorized, web, Error, HttpMessage};
use actix_web_httpauth::extractors::basic::BasicAuth;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;

use crate::{barbers, error::AppError, state::AppState};

pub const AUTH_REALM: &str = "Kings Barber Staff";

/// Barber signed in through HTTP Basic credentials.
#[derive(Clone, Debug)]
pub struct StaffUser {
    pub id: String,
    pub name: String,
}

/// PHC-format Argon2id hash with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(format!("password hash failed: {err}")))
}

/// A stored hash that fails to parse never matches.
fn password_matches(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

pub async fn authenticate_credentials(
    state: &AppState,
    email: &str,
    password: &str,
) -> Option<StaffUser> {
    let barber = match barbers::find_by_email(&state.db, email).await {
        Ok(Some(barber)) if barber.is_active => barber,
        Ok(_) => return None,
        Err(err) => {
            log::error!("Staff lookup failed: {err}");
            return None;
        }
    };

    if !password_matches(password, &barber.password_hash) {
        return None;
    }

    Some(StaffUser {
        id: barber.id,
        name: barber.name,
    })
}

pub async fn staff_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        return Err((ErrorUnauthorized("Unauthorized"), req));
    };
    let password = credentials.password().unwrap_or_default();

    match authenticate_credentials(&state, credentials.user_id(), password).await {
        Some(user) => {
            req.extensions_mut().insert(user);
            Ok(req)
        }
        None => Err((ErrorUnauthorized("Staff access required"), req)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("demo123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(password_matches("demo123", &hash));
        assert!(!password_matches("demo124", &hash));
        assert!(!password_matches("demo123", "not-a-hash"));
    }
}
