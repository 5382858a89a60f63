//! Inspect command implementation.

use crate::commands::CliError;
use idstore_storage::{FileProvider, Record, SessionProvider};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Total number of records.
    pub record_count: usize,
    /// Per-type statistics.
    pub types: Vec<TypeStats>,
    /// Every record (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordSummary>>,
}

/// Statistics for one object type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Object type.
    pub object_type: String,
    /// Number of records.
    pub records: usize,
    /// Highest revision.
    pub max_revision: i64,
    /// Most recent modification time.
    pub last_updated: u64,
    /// Total payload size in bytes.
    pub payload_bytes: usize,
}

/// One record without its payload.
#[derive(Debug, Serialize)]
pub struct RecordSummary {
    /// Object type.
    pub object_type: String,
    /// Key.
    pub key: i64,
    /// Name, if any.
    pub name: Option<String>,
    /// Revision.
    pub revision: i64,
    /// Payload size in bytes.
    pub size: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_records: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format != "text" && format != "json" {
        return Err(CliError::UnknownFormat(format.to_string()).into());
    }
    if !path.is_dir() {
        return Err(CliError::NoStore(path.to_path_buf()).into());
    }

    let provider = FileProvider::open(path)?;
    let result = inspect(&provider, show_records)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text(&result);
    }
    Ok(())
}

fn inspect(
    provider: &FileProvider,
    show_records: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut session = provider.acquire(false)?;
    let mut by_type: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    let scanned = session.object_types().and_then(|types| {
        for object_type in types {
            let records = session.scan(&object_type)?;
            by_type.insert(object_type, records);
        }
        Ok(())
    });
    provider.release(session)?;
    scanned?;

    let types = by_type
        .iter()
        .map(|(object_type, records)| TypeStats {
            object_type: object_type.clone(),
            records: records.len(),
            max_revision: records.iter().map(|r| r.revision).max().unwrap_or(0),
            last_updated: records.iter().map(|r| r.updated_at).max().unwrap_or(0),
            payload_bytes: records.iter().map(|r| r.contents.len()).sum(),
        })
        .collect();
    let records = show_records.then(|| {
        by_type
            .values()
            .flatten()
            .map(|r| RecordSummary {
                object_type: r.object_type.clone(),
                key: r.key,
                name: r.name.clone(),
                revision: r.revision,
                size: r.contents.len(),
            })
            .collect()
    });

    Ok(InspectResult {
        path: provider.path().display().to_string(),
        record_count: by_type.values().map(Vec::len).sum(),
        types,
        records,
    })
}

fn print_text(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("Records: {}", result.record_count);
    println!();
    println!("{:<32} {:>8} {:>10} {:>12}", "TYPE", "RECORDS", "MAX REV", "BYTES");
    for t in &result.types {
        println!(
            "{:<32} {:>8} {:>10} {:>12}",
            t.object_type, t.records, t.max_revision, t.payload_bytes
        );
    }
    if let Some(records) = &result.records {
        println!();
        for r in records {
            println!(
                "{} #{} {} rev {} ({} bytes)",
                r.object_type,
                r.key,
                r.name.as_deref().unwrap_or("-"),
                r.revision,
                r.size
            );
        }
    }
}
