//! Ledger export. Uses the `csv` crate for quoting and escaping.

use crate::domain::{CreditTransaction, DomainError};
use std::io::Write;
use std::path::Path;
use tracing::info;

const HEADER: [&str; 9] = [
    "id",
    "created_at",
    "type",
    "amount",
    "balance_before",
    "balance_after",
    "description",
    "related_type",
    "related_id",
];

fn export_err(e: impl std::fmt::Display) -> DomainError {
    DomainError::Export(e.to_string())
}

/// Writes the header and one row per transaction to any writer.
pub fn write_transactions_csv<W: Write>(
    transactions: &[CreditTransaction],
    writer: W,
) -> Result<(), DomainError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(HEADER).map_err(export_err)?;
    for t in transactions {
        wtr.write_record([
            t.id.to_string(),
            t.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            t.transaction_type.as_str().to_string(),
            t.amount.to_string(),
            t.balance_before.to_string(),
            t.balance_after.to_string(),
            // one line per record
            t.description.as_deref().unwrap_or("").replace(['\n', '\r'], " "),
            t.related_type.clone().unwrap_or_default(),
            t.related_id.map(|id| id.to_string()).unwrap_or_default(),
        ])
        .map_err(export_err)?;
    }
    wtr.flush().map_err(export_err)
}

/// Writes the ledger to `path`, creating parent directories. Returns the row count.
pub fn export_transactions_csv(
    transactions: &[CreditTransaction],
    path: &Path,
) -> Result<usize, DomainError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(export_err)?;
    }
    let file = std::fs::File::create(path).map_err(export_err)?;
    write_transactions_csv(transactions, file)?;
    info!(path = %path.display(), rows = transactions.len(), "ledger exported");
    Ok(transactions.len())
}
