//! creditops: credit ledger, membership orders, growth operations and an encrypted
//! OAuth account store, laid out as a hexagon around libsql.

#[macro_use]
pub mod domain;

pub mod adapters;
pub mod ports;
pub mod schemas;
pub mod shared;
pub mod usecases;
