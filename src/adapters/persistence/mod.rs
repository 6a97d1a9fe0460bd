//! libsql persistence. `SqliteRepo` implements every store port; the impls are split by concern.

mod oauth_store;
mod operation_store;
mod order_store;
pub mod sqlite_repo;

pub use sqlite_repo::SqliteRepo;
