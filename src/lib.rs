pub mod clock;
pub mod concurrent_desk;
pub mod config;
pub mod desk;
pub mod error;
pub mod limits;
pub mod market;
pub mod models;
pub mod otp;
pub mod pricing;
pub mod store;

use std::io::Write;

pub use concurrent_desk::ShardedDesk;
pub use config::DeskConfig;
pub use desk::ExchangeDesk;
pub use error::{DeskError, Result};
pub use models::LedgerEntry;

/// Write ledger entries to CSV, ordered by entry id
pub fn export_ledger<W: Write>(entries: &[LedgerEntry], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut entries: Vec<&LedgerEntry> = entries.iter().collect();
    // Sort by id for consistent output
    entries.sort_by_key(|e| e.id);

    for entry in entries {
        csv_writer.serialize(entry)?;
    }

    csv_writer.flush()?;
    Ok(())
}
