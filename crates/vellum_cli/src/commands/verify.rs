//! Verify the structure of a redo log file.

use super::{load_source, CommandResult, RecordCollector};
use std::collections::HashSet;
use std::path::Path;
use vellum_core::TxnId;
use vellum_repl::RedoDecoder;

/// Scans `file`, validating record structure, and prints statistics.
pub fn run(file: &Path, terminators: bool) -> CommandResult {
    let source = load_source(file)?;

    let mut collector = RecordCollector::default();
    let mut decoder = RedoDecoder::with_terminators(source, TxnId::NONE, terminators);

    let mut record_count = 0u64;
    loop {
        match decoder.decode_one(&mut collector) {
            Ok(true) => break,
            Ok(false) => record_count += 1,
            Err(err) => {
                return Err(format!(
                    "corrupt record at position {}: {err}",
                    decoder.position()
                )
                .into());
            }
        }
    }

    let transactions: HashSet<i64> = collector
        .records
        .iter()
        .filter_map(|record| record.txn_id)
        .collect();
    let indexes: HashSet<u64> = collector
        .records
        .iter()
        .filter_map(|record| record.index_id)
        .collect();

    println!("{}: ok", file.display());
    println!("  records:      {record_count}");
    println!("  bytes:        {}", decoder.position());
    println!("  transactions: {}", transactions.len());
    println!("  indexes:      {}", indexes.len());

    Ok(())
}
