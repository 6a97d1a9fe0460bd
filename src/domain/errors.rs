//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Non-member tried to spend more credits than the account holds.
    #[error("Insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Repository error: {0}")]
    Repo(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Credential probe failed: {0}")]
    Probe(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("UI error: {0}")]
    Ui(String),

    #[error("Export failed: {0}")]
    Export(String),
}

impl DomainError {
    /// HTTP status an outer API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DomainError::NotFound(_) => 404,
            DomainError::Validation(_) => 422,
            DomainError::InsufficientCredits { .. } => 400,
            DomainError::Conflict(_) => 409,
            DomainError::InvalidState(_) => 400,
            DomainError::Forbidden(_) => 403,
            DomainError::Probe(_) => 502,
            DomainError::Repo(_)
            | DomainError::Crypto(_)
            | DomainError::Config(_)
            | DomainError::Ui(_)
            | DomainError::Export(_) => 500,
        }
    }

    /// True for errors caused by the caller's input or the entity state, as opposed to infrastructure.
    pub fn is_business(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DomainError::NotFound("order".into()).status_code(), 404);
        assert_eq!(
            DomainError::InsufficientCredits {
                balance: 3,
                required: 10
            }
            .status_code(),
            400
        );
        assert_eq!(DomainError::Repo("io".into()).status_code(), 500);
        assert!(DomainError::Conflict("dup".into()).is_business());
        assert!(!DomainError::Crypto("bad key".into()).is_business());
    }

    #[test]
    fn test_insufficient_message() {
        let e = DomainError::InsufficientCredits {
            balance: 5,
            required: 20,
        };
        assert_eq!(e.to_string(), "Insufficient credits: balance 5, required 20");
    }
}
