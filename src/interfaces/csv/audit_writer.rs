use crate::domain::wallet::WalletAudit;
use crate::error::Result;
use std::io::Write;

/// Writes wallet audit results as CSV.
///
/// One row per wallet with the cached balance next to the sum of its
/// completed transactions.
pub struct AuditWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AuditWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes every audit row and flushes. Returns how many rows disagree
    /// with their ledger.
    pub fn write_audits<'a>(
        &mut self,
        audits: impl IntoIterator<Item = &'a WalletAudit>,
    ) -> Result<usize> {
        let mut inconsistent = 0;
        for audit in audits {
            if !audit.consistent {
                inconsistent += 1;
            }
            self.writer.serialize(audit)?;
        }
        self.writer.flush()?;
        Ok(inconsistent)
    }
}
