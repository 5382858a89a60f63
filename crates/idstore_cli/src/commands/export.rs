//! Export command implementation.

use crate::commands::{open_registry, register_stored_types, PriorityArg};
use idstore_core::export::ExportSummary;
use idstore_core::{Config, ExportConfig, ExportSelection, StoreRegistry};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Runs the export command.
pub fn run(
    path: &Path,
    output: Option<&Path>,
    types: &[String],
    priorities: &[PriorityArg],
    compact: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default().export(ExportConfig { pretty: !compact });
    let registry = open_registry(path, false, config)?;
    register_stored_types(&registry, priorities)?;

    match output {
        Some(output) => {
            let summary = export_to(&registry, types, BufWriter::new(File::create(output)?))?;
            println!(
                "Exported {} records of {} types to {}",
                summary.records,
                summary.types,
                output.display()
            );
            println!("Checksum: {}", summary.checksum);
        }
        None => {
            export_to(&registry, types, io::stdout().lock())?;
        }
    }
    Ok(())
}

fn export_to<W: Write>(
    registry: &StoreRegistry,
    types: &[String],
    mut writer: W,
) -> Result<ExportSummary, Box<dyn std::error::Error>> {
    let selection = if types.is_empty() {
        ExportSelection::All
    } else {
        ExportSelection::only(types.iter().cloned())
    };
    let summary = registry.import_export().export(&mut writer, &selection)?;
    writer.flush()?;
    Ok(summary)
}
