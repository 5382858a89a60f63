//! Import command implementation.

use crate::commands::{open_registry, priority_for, register_stored_types, PriorityArg};
use idstore_core::export::UNKNOWN_TYPE_PRIORITY;
use idstore_core::{Config, ImportOptions, StoreRegistry};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Runs the import command.
pub fn run(
    path: &Path,
    input: &Path,
    merge: bool,
    priorities: &[PriorityArg],
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(input)?;
    let registry = open_registry(path, true, Config::default())?;
    register_dump_types(&registry, &bytes, priorities)?;

    let options = if merge {
        ImportOptions::default().merge()
    } else {
        ImportOptions::default()
    };
    let summary = registry.import_export().import(bytes.as_slice(), &options)?;

    println!(
        "Imported {} records of {} types from {} (format v{})",
        summary.records,
        summary.types,
        input.display(),
        summary.source_version
    );
    if summary.cleared > 0 {
        println!("Replaced {} existing records", summary.cleared);
    }
    Ok(())
}

/// Registers the types found in the dump and in the store.
///
/// Dumps in the current format carry their priorities; legacy dumps do not,
/// so their types fall back to the command line values or 0.
fn register_dump_types(
    registry: &StoreRegistry,
    bytes: &[u8],
    priorities: &[PriorityArg],
) -> Result<(), Box<dyn std::error::Error>> {
    // types already in the store take part in clearing
    register_stored_types(registry, priorities)?;

    let info = registry.import_export().verify_document(bytes)?;
    for entry in info.entries {
        let fallback = if entry.priority == UNKNOWN_TYPE_PRIORITY {
            warn!(object_type = %entry.object_type, "no priority known for legacy type, using 0");
            0
        } else {
            entry.priority
        };
        let priority = priority_for(&entry.object_type, priorities, fallback);
        registry.register_raw_type(entry.object_type, priority);
    }
    Ok(())
}
