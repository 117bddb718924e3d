//! Dump the decoded records of a redo log file.

use super::{load_source, CommandResult, RecordCollector};
use std::path::Path;
use tracing::debug;
use vellum_core::TxnId;
use vellum_repl::RedoDecoder;

/// Decodes `file` and prints one line per record.
pub fn run(file: &Path, format: &str, terminators: bool) -> CommandResult {
    let source = load_source(file)?;
    debug!(file = %file.display(), "dumping redo log");

    let mut collector = RecordCollector::default();
    let mut decoder = RedoDecoder::with_terminators(source, TxnId::NONE, terminators);

    loop {
        let position = decoder.position();
        let before = collector.records.len();
        if decoder.decode_one(&mut collector)? {
            break;
        }
        // Padding records produce no output line.
        if collector.records.len() > before {
            if let Some(last) = collector.records.last_mut() {
                last.position = position;
            }
        }
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&collector.records)?);
        }
        "text" => {
            for record in &collector.records {
                println!("{}", record.to_text());
            }
        }
        other => return Err(format!("unknown output format: {other}").into()),
    }

    Ok(())
}
