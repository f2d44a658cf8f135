use std::sync::Arc;

use rand_core::{OsRng, RngCore};
use uuid::Uuid;

use crate::error::AppError;

pub const CONFIRMATION_LEN: usize = 8;

const CONFIRMATION_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Insert attempts before giving up on finding an unused confirmation number.
pub const MAX_CONFIRMATION_ATTEMPTS: usize = 5;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Random upper-case alphanumeric token shown to customers.
pub fn confirmation_number() -> String {
    // Largest multiple of the alphabet size that fits in a byte; higher bytes are
    // rejected so every symbol is equally likely.
    let limit = (u8::MAX as usize + 1) / CONFIRMATION_ALPHABET.len() * CONFIRMATION_ALPHABET.len();
    let mut token = String::with_capacity(CONFIRMATION_LEN);
    let mut buf = [0u8; 16];
    while token.len() < CONFIRMATION_LEN {
        OsRng.fill_bytes(&mut buf);
        for byte in buf {
            if (byte as usize) >= limit {
                continue;
            }
            token.push(CONFIRMATION_ALPHABET[byte as usize % CONFIRMATION_ALPHABET.len()] as char);
            if token.len() == CONFIRMATION_LEN {
                break;
            }
        }
    }
    token
}

/// Produces confirmation numbers for new rows.
pub type ConfirmationSource = Arc<dyn Fn() -> String + Send + Sync>;

pub fn random_confirmations() -> ConfirmationSource {
    Arc::new(confirmation_number)
}

/// Canonical form used for lookups by customers, who may type lower case.
pub fn normalize_confirmation(raw: &str) -> String {
    raw.trim().trim_start_matches('#').to_ascii_uppercase()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Handles a failed insert inside a confirmation retry loop: a collision is
/// logged and retried, anything else is returned.
pub(crate) fn retry_on_collision(err: sqlx::Error, table: &str, attempt: usize) -> Result<(), AppError> {
    if is_unique_violation(&err) {
        log::warn!("Confirmation number collision in {table} (attempt {attempt} of {MAX_CONFIRMATION_ATTEMPTS})");
        Ok(())
    } else {
        Err(err.into())
    }
}

pub(crate) fn confirmations_exhausted(table: &str) -> AppError {
    AppError::Internal(format!("could not allocate a unique confirmation number for {table}"))
}

/// Hands out `tokens` in order, then falls back to random ones.
#[cfg(test)]
pub(crate) fn scripted_confirmations(tokens: &[&str]) -> ConfirmationSource {
    let queue = std::sync::Mutex::new(
        tokens
            .iter()
            .map(|token| token.to_string())
            .collect::<std::collections::VecDeque<_>>(),
    );
    Arc::new(move || {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(confirmation_number)
    })
}
