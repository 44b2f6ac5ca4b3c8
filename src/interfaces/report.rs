use crate::domain::ledger::LedgerEntry;
use crate::domain::request::WithdrawalRequest;
use crate::error::Result;
use std::io::Write;

/// Writes the final state as JSON lines: ledger entries first (sorted by
/// user), then withdrawal requests (sorted by creation time).
pub struct ReportWriter<W: Write> {
    writer: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_report(
        &mut self,
        mut entries: Vec<LedgerEntry>,
        mut requests: Vec<WithdrawalRequest>,
    ) -> Result<()> {
        entries.sort_by_key(|e| e.user);
        requests.sort_by_key(|r| (r.created_at, r.id));

        for entry in &entries {
            serde_json::to_writer(&mut self.writer, entry)?;
            writeln!(self.writer)?;
        }
        for request in &requests {
            serde_json::to_writer(&mut self.writer, request)?;
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
