//! Command execution.

use crate::config::Config;
use crate::{BackupCommand, Commands, ConfigCommand, JournalCommand, MetaCommand};
use colored::Colorize;
use quill_backup::{BackupIdentifierWildcard, BackupStore, FileSystemBackupStore};
use quill_journal::segment::SegmentScanner;
use quill_journal::{
    repair_journal, verify_journal, BinaryJournalSerializer, PersistedJournalRecord,
    RecoveryResult, Segment,
};
use quill_logstreams::LoggedEvent;
use quill_raft::{MetaStore, MetaStoreConfig};
use serde_json::{json, Value};
use std::path::Path;

/// Bytes of record data shown by `journal dump`.
const DUMP_PREVIEW_BYTES: usize = 32;

/// Executes a command and returns the formatted output.
pub fn execute(config: &Config, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Journal(JournalCommand::Verify) => {
            let dir = config.journal_dir();
            if !dir.exists() {
                return Ok(no_journal(&dir));
            }
            let result = verify_journal(&dir)?;
            Ok(format_recovery(&dir, &result, false))
        }

        Commands::Journal(JournalCommand::Repair) => {
            let dir = config.journal_dir();
            if !dir.exists() {
                return Ok(no_journal(&dir));
            }
            let result = repair_journal(&dir)?;
            Ok(format_recovery(&dir, &result, true))
        }

        Commands::Journal(JournalCommand::Dump {
            from,
            limit,
            events,
        }) => {
            let dir = config.journal_dir();
            if !dir.exists() {
                return Ok(no_journal(&dir));
            }
            let records = read_records(&dir, from, limit)?;
            if records.is_empty() {
                return Ok("No records".yellow().to_string());
            }

            let mut output = String::new();
            for record in &records {
                output.push_str(&format_record(record));
                if events {
                    output.push_str(&format_events(record));
                }
            }
            Ok(output)
        }

        Commands::Meta(MetaCommand::Show) => {
            let meta_config = MetaStoreConfig::new(config.meta_dir(), config.meta_store_name())
                .with_storage_level(config.storage.storage_level);
            if !meta_config.meta_path().exists() {
                return Ok(format!(
                    "{} at {}",
                    "No metadata store".yellow(),
                    meta_config.meta_path().display()
                ));
            }

            let store = MetaStore::open(meta_config)?;
            let term = store.load_term()?;
            let vote = store.load_vote()?;
            let configuration = store.load_configuration()?;
            store.close()?;

            let value = json!({
                "term": term,
                "vote": vote,
                "configuration": configuration,
            });
            Ok(format_json(&value))
        }

        Commands::Config(ConfigCommand::Show) => Ok(config.to_yaml()?),

        Commands::Backup(BackupCommand::List {
            all_partitions,
            node,
            checkpoint,
        }) => {
            let dir = config.backup_dir();
            if !dir.exists() {
                return Ok(format!(
                    "{} at {}",
                    "No backup store".yellow(),
                    dir.display()
                ));
            }

            let store = FileSystemBackupStore::open(&dir)?;
            let wildcard = BackupIdentifierWildcard {
                node_id: node,
                partition_id: (!all_partitions).then_some(config.node.partition_id),
                checkpoint_id: checkpoint,
            };
            let statuses = store.list(&wildcard)?;
            if statuses.is_empty() {
                return Ok("No backups".yellow().to_string());
            }

            let mut output = String::new();
            for status in statuses {
                let position = status
                    .descriptor
                    .as_ref()
                    .map(|d| d.checkpoint_position.to_string())
                    .unwrap_or_else(|| "-".to_string());
                output.push_str(&format!(
                    "  {} {} (checkpoint position: {})\n",
                    status.id.to_string().cyan(),
                    status.code,
                    position
                ));
                if let Some(reason) = status.failure_reason {
                    output.push_str(&format!("    reason: {}\n", reason.red()));
                }
            }
            Ok(output)
        }
    }
}

fn no_journal(dir: &Path) -> String {
    format!("{} at {}", "No journal".yellow(), dir.display())
}

/// Reads valid records without repairing anything.
///
/// Stops at the first corruption or at a segment that does not continue the log.
fn read_records(
    dir: &Path,
    from: Option<u64>,
    limit: Option<usize>,
) -> Result<Vec<PersistedJournalRecord>, Box<dyn std::error::Error>> {
    let serializer = BinaryJournalSerializer;
    let limit = limit.unwrap_or(usize::MAX);
    let from = from.unwrap_or(0);
    let mut records = Vec::new();
    let mut expected_first: Option<u64> = None;

    for id in SegmentScanner::list_segments(dir)? {
        let segment = Segment::open(dir, id)?;
        if expected_first.is_some_and(|expected| segment.first_index() != expected) {
            break;
        }

        let scan = segment.read_records(&serializer)?;
        let next_index = segment.first_index() + scan.records.len() as u64;
        for (_, record) in scan.records {
            if records.len() >= limit {
                return Ok(records);
            }
            if record.index() >= from {
                records.push(record);
            }
        }
        if scan.corruption.is_some() {
            break;
        }
        expected_first = Some(next_index);
    }

    Ok(records)
}

fn format_recovery(dir: &Path, result: &RecoveryResult, repaired: bool) -> String {
    let mut output = format!("{}\n", format!("Journal {}", dir.display()).bold());

    let range = match (result.first_index, result.last_index) {
        (Some(first), Some(last)) => format!("{}..={}", first, last),
        _ => "empty".to_string(),
    };
    output.push_str(&format!("  Records: {} ({})\n", result.valid_records, range));
    output.push_str(&format!("  Last asqn: {}\n", result.last_asqn));

    if result.is_clean() {
        output.push_str(&format!("  {}\n", "OK".green()));
        return output;
    }

    let verb = if repaired { "Removed" } else { "Would remove" };
    if result.invalid_records > 0 {
        output.push_str(&format!(
            "  {}: {}\n",
            "Corrupted records".red(),
            result.invalid_records
        ));
    }
    if result.bytes_truncated > 0 {
        output.push_str(&format!(
            "  {} {} trailing bytes from segments {:?}\n",
            verb, result.bytes_truncated, result.segments_recovered
        ));
    }
    for (id, reason) in &result.segments_with_errors {
        output.push_str(&format!("  {} {}: {}\n", "Segment".red(), id, reason));
    }
    if !result.segments_discarded.is_empty() {
        output.push_str(&format!(
            "  {} segments {:?}\n",
            verb, result.segments_discarded
        ));
    }
    if !repaired {
        output.push_str(&format!(
            "  {}\n",
            "Run `quill journal repair` to drop the invalid tail".yellow()
        ));
    }
    output
}

fn format_record(record: &PersistedJournalRecord) -> String {
    let data = record.data();
    let preview = &data[..data.len().min(DUMP_PREVIEW_BYTES)];
    let ellipsis = if data.len() > DUMP_PREVIEW_BYTES {
        "..."
    } else {
        ""
    };
    format!(
        "{} asqn={} checksum={:08x} len={} data={}{}\n",
        format!("#{}", record.index()).cyan(),
        record.asqn(),
        record.checksum(),
        data.len(),
        hex::encode(preview),
        ellipsis
    )
}

/// Decodes record data as log stream entries.
fn format_events(record: &PersistedJournalRecord) -> String {
    let mut output = String::new();
    for event in LoggedEvent::iter(record.data()) {
        match event {
            Ok(event) => {
                let kind = match event.read_metadata() {
                    Ok(metadata) => format!(
                        "{:?} {:?} intent={}",
                        metadata.record_type, metadata.value_type, metadata.intent
                    ),
                    Err(e) => format!("<metadata: {}>", e),
                };
                output.push_str(&format!(
                    "    position={} source={} key={} ts={} {}{}\n",
                    event.position(),
                    event.source_event_position(),
                    event.key(),
                    event.timestamp(),
                    kind,
                    if event.should_skip_processing() {
                        " (skip)"
                    } else {
                        ""
                    }
                ));
            }
            Err(e) => {
                output.push_str(&format!("    {}: {}\n", "not a log entry".red(), e));
            }
        }
    }
    output
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
