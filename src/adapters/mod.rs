//! Infrastructure adapters. Implement outbound ports.
//!
//! libsql stores, Fernet credential cipher, HTTP session probe, CSV export, console UI.
//! Map errors to DomainError.

pub mod crypto;
pub mod export;
pub mod persistence;
pub mod probe;
pub mod ui;
