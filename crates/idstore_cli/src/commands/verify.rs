//! Verify command implementation.

use idstore_core::{Config, StoreRegistry};
use idstore_storage::InMemoryProvider;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Runs the verify command.
///
/// Parses the dump, upgrades it if it is in an older format and checks its
/// checksum. Nothing is written anywhere.
pub fn run(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let registry = StoreRegistry::new(Arc::new(InMemoryProvider::new()), Config::default());
    let reader = BufReader::new(File::open(input)?);
    let info = registry.import_export().verify_document(reader)?;

    println!("Dump: {}", input.display());
    println!("Format version: {}", info.source_version);
    println!("Exported at: {}", info.exported_at);
    println!(
        "Checksum: {}",
        if info.checksummed { "ok" } else { "absent" }
    );
    println!();
    println!("{:<32} {:>10} {:>8}", "TYPE", "PRIORITY", "RECORDS");
    for entry in &info.entries {
        println!(
            "{:<32} {:>10} {:>8}",
            entry.object_type, entry.priority, entry.records
        );
    }
    Ok(())
}
