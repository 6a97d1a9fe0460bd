//! Inbound port. UI (adapter) calls into the application.

use crate::domain::DomainError;

/// Input port: the operator console drives the use cases through this.
#[async_trait::async_trait]
pub trait InputPort: Send + Sync {
    /// Main menu loop. Returns when the operator exits.
    async fn run(&self) -> Result<(), DomainError>;
}
