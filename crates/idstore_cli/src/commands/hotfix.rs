//! Hotfix command implementation.

use crate::commands::open_registry;
use idstore_core::{Config, HotfixOptions, ScalarToArrayFix};
use std::path::Path;

/// Runs the hotfix command.
pub fn run(
    path: &Path,
    object_type: &str,
    field: &str,
    tolerant: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = open_registry(path, false, Config::default())?;
    let fix = ScalarToArrayFix::new(object_type, field);
    let options = if tolerant {
        HotfixOptions::tolerant()
    } else {
        HotfixOptions::default()
    };

    let report = registry.import_export().apply_hotfix(&fix, options)?;
    println!(
        "{}: examined {}, changed {}, skipped {}",
        report.object_type, report.examined, report.changed, report.skipped
    );
    Ok(())
}
