//! The import/export engine.

use crate::config::ExportConfig;
use crate::error::{CoreError, CoreResult};
use crate::export::document::{ExportDocument, ExportEntry, ExportedRecord};
use crate::export::hotfix::{HotfixOptions, HotfixReport, RecordFix};
use crate::export::update::{upgrade, version_of, DumpUpdate, LegacyLayoutUpdate, UpdateContext};
use crate::export::{
    DumpInfo, EntryInfo, ExportSelection, ExportSummary, Exporter, ImportOptions, ImportSummary,
};
use crate::hooks::ReferentialHookRegistry;
use crate::store::CacheRegistry;
use crate::transaction::{Transaction, TransactionRunner};
use idstore_codec::{json_to_payload, payload_to_json};
use idstore_storage::{now_millis, Record};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dumps and restores registered object types.
///
/// Cheap to clone; clones share exporter and update registrations.
#[derive(Clone)]
pub struct ImportExportEngine {
    runner: TransactionRunner,
    hooks: ReferentialHookRegistry,
    caches: CacheRegistry,
    exporters: Arc<RwLock<BTreeMap<String, Arc<dyn Exporter>>>>,
    updates: Arc<RwLock<Vec<Arc<dyn DumpUpdate>>>>,
    config: ExportConfig,
}

impl ImportExportEngine {
    /// Creates an engine with the legacy layout update preinstalled.
    #[must_use]
    pub fn new(
        runner: TransactionRunner,
        hooks: ReferentialHookRegistry,
        caches: CacheRegistry,
        config: ExportConfig,
    ) -> Self {
        let updates: Vec<Arc<dyn DumpUpdate>> = vec![Arc::new(LegacyLayoutUpdate)];
        Self {
            runner,
            hooks,
            caches,
            exporters: Arc::new(RwLock::new(BTreeMap::new())),
            updates: Arc::new(RwLock::new(updates)),
            config,
        }
    }

    /// Registers an exporter, replacing any previous one for the same type.
    pub fn register_exporter(&self, exporter: Arc<dyn Exporter>) {
        let object_type = exporter.object_type().to_string();
        debug!(object_type, priority = exporter.priority(), "exporter registered");
        if self.exporters.write().insert(object_type.clone(), exporter).is_some() {
            warn!(object_type, "exporter replaced");
        }
    }

    /// Registers a dump update. Updates for a version already handled take precedence.
    pub fn register_update(&self, update: Arc<dyn DumpUpdate>) {
        self.updates.write().insert(0, update);
    }

    /// Registered object types and their priorities in restore order.
    #[must_use]
    pub fn exporters(&self) -> Vec<(String, i32)> {
        self.ordered()
            .iter()
            .map(|e| (e.object_type().to_string(), e.priority()))
            .collect()
    }

    /// Returns true if `object_type` has an exporter.
    #[must_use]
    pub fn is_registered(&self, object_type: &str) -> bool {
        self.exporters.read().contains_key(object_type)
    }

    fn ordered(&self) -> Vec<Arc<dyn Exporter>> {
        let mut exporters: Vec<_> = self.exporters.read().values().cloned().collect();
        exporters.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.object_type().cmp(b.object_type()))
        });
        exporters
    }

    fn exporter(&self, object_type: &str) -> Option<Arc<dyn Exporter>> {
        self.exporters.read().get(object_type).cloned()
    }

    fn update_context(&self) -> UpdateContext {
        UpdateContext::new(
            self.exporters
                .read()
                .iter()
                .map(|(t, e)| (t.clone(), e.priority()))
                .collect(),
        )
    }

    /// Builds a sealed dump of the selected types.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the selection names an unregistered type,
    /// `Serialization` if a stored payload is not JSON.
    pub fn export_document(&self, selection: &ExportSelection) -> CoreResult<ExportDocument> {
        if let ExportSelection::Only(types) = selection {
            if let Some(unknown) = types.iter().find(|t| !self.is_registered(t)) {
                return Err(CoreError::invalid_operation(format!(
                    "cannot export unregistered object type '{unknown}'"
                )));
            }
        }

        let exporters: Vec<_> = self
            .ordered()
            .into_iter()
            .filter(|e| selection.includes(e.object_type()))
            .collect();

        let entries = self.runner.run_in_separate_transaction(|tx| {
            exporters
                .iter()
                .map(|exporter| export_entry(tx, exporter.as_ref()))
                .collect::<CoreResult<Vec<_>>>()
        })?;
        ExportDocument::sealed(now_millis(), entries)
    }

    /// Writes a dump of the selected types to `writer`.
    pub fn export<W: Write>(
        &self,
        writer: W,
        selection: &ExportSelection,
    ) -> CoreResult<ExportSummary> {
        let document = self.export_document(selection)?;
        if self.config.pretty {
            serde_json::to_writer_pretty(writer, &document)?;
        } else {
            serde_json::to_writer(writer, &document)?;
        }

        let summary = ExportSummary {
            types: document.entries.len(),
            records: document.record_count(),
            checksum: document.checksum.unwrap_or_default(),
        };
        info!(
            types = summary.types,
            records = summary.records,
            checksum = %summary.checksum,
            "export finished"
        );
        Ok(summary)
    }

    /// Parses and upgrades a dump, verifying its checksum.
    ///
    /// Returns the version found in the input together with the upgraded document.
    pub fn read_document<R: Read>(&self, reader: R) -> CoreResult<(u32, ExportDocument)> {
        let raw: Value = serde_json::from_reader(reader)?;
        let source_version = version_of(&raw)?;
        let updates = self.updates.read().clone();
        let document = upgrade(raw, &updates, &self.update_context())?;
        document.verify_checksum()?;
        Ok((source_version, document))
    }

    /// Checks a dump without importing it.
    ///
    /// # Errors
    ///
    /// `Serialization` if the dump is malformed or its checksum does not match,
    /// `UnsupportedFormat` if it is newer than this build.
    pub fn verify_document<R: Read>(&self, reader: R) -> CoreResult<DumpInfo> {
        let (source_version, mut document) = self.read_document(reader)?;
        document.sort_entries();
        let entries = document
            .entries
            .iter()
            .map(|entry| EntryInfo {
                object_type: entry.object_type.clone(),
                priority: entry.priority,
                records: entry.records.len(),
                registered: self.is_registered(&entry.object_type),
            })
            .collect();
        Ok(DumpInfo {
            source_version,
            exported_at: document.exported_at,
            checksummed: document.checksum.is_some(),
            entries,
        })
    }

    /// Restores a dump read from `reader`.
    pub fn import<R: Read>(&self, reader: R, options: &ImportOptions) -> CoreResult<ImportSummary> {
        let (source_version, document) = self.read_document(reader)?;
        let mut summary = self.import_document(document, options)?;
        summary.source_version = source_version;
        Ok(summary)
    }

    /// Restores an already parsed dump.
    ///
    /// Runs in its own transaction: either the whole dump is loaded or nothing
    /// changes. Records keep their key, name, revision and modification time.
    /// Create hooks of the restored types are consulted, so a record whose
    /// references are missing fails the import.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for unregistered types (unless ignored),
    /// `Serialization` for a checksum mismatch or an undecodable payload,
    /// `DuplicateKey` when merging onto colliding data.
    pub fn import_document(
        &self,
        mut document: ExportDocument,
        options: &ImportOptions,
    ) -> CoreResult<ImportSummary> {
        document.verify_checksum()?;
        document.sort_entries();

        let mut skipped_types = Vec::new();
        let mut entries = Vec::new();
        for entry in document.entries {
            match self.exporter(&entry.object_type) {
                Some(exporter) => entries.push((exporter, entry)),
                None if options.ignore_unknown_types => {
                    warn!(
                        object_type = entry.object_type,
                        records = entry.records.len(),
                        "skipping unregistered object type"
                    );
                    skipped_types.push(entry.object_type);
                }
                None => {
                    return Err(CoreError::invalid_operation(format!(
                        "dump contains unregistered object type '{}'",
                        entry.object_type
                    )))
                }
            }
        }

        let (cleared, records) = self.runner.run_in_separate_transaction(|tx| {
            let cleared = if options.clear_existing {
                self.clear_registered(tx)?
            } else {
                0
            };
            let mut records = 0;
            for (exporter, entry) in &entries {
                for exported in &entry.records {
                    let record = imported_record(&entry.object_type, exported)?;
                    exporter.validate(&record)?;
                    self.hooks.check_create(tx, &record)?;
                    tx.with_session(|s| s.insert(record))?;
                    records += 1;
                }
                debug!(
                    object_type = entry.object_type,
                    records = entry.records.len(),
                    "entry restored"
                );
            }
            Ok((cleared, records))
        })?;
        self.caches.invalidate_all();

        let summary = ImportSummary {
            source_version: document.format_version,
            types: entries.len(),
            records,
            cleared,
            skipped_types,
        };
        info!(
            types = summary.types,
            records = summary.records,
            cleared = summary.cleared,
            skipped = summary.skipped_types.len(),
            "import finished"
        );
        Ok(summary)
    }

    /// Rewrites the payloads of one object type.
    ///
    /// Changed records are stored with the next revision. Running the same
    /// fix twice changes nothing the second time.
    ///
    /// # Errors
    ///
    /// `Serialization` for a malformed payload unless
    /// [`HotfixOptions::tolerate_malformed`] is set.
    pub fn apply_hotfix(
        &self,
        fix: &dyn RecordFix,
        options: HotfixOptions,
    ) -> CoreResult<HotfixReport> {
        let object_type = fix.object_type().to_string();
        info!(object_type, fix = %fix.description(), "applying hotfix");

        let report = self.runner.run_in_separate_transaction(|tx| {
            let mut report = HotfixReport {
                object_type: object_type.clone(),
                ..HotfixReport::default()
            };
            for record in tx.with_session(|s| s.scan(&object_type))? {
                report.examined += 1;
                let fixed = payload_to_json(&record.contents)
                    .map_err(CoreError::from)
                    .and_then(|mut value| Ok(fix.apply(&mut value)?.then_some(value)));
                match fixed {
                    Ok(None) => {}
                    Ok(Some(value)) => {
                        let updated =
                            record.next_revision(record.name.clone(), json_to_payload(&value)?);
                        tx.with_session(|s| s.update(updated))?;
                        report.changed += 1;
                    }
                    Err(e) if options.tolerate_malformed => {
                        warn!(object_type, key = record.key, error = %e, "skipping malformed record");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        return Err(CoreError::serialization(format!(
                            "{object_type} #{}: {e}",
                            record.key
                        )))
                    }
                }
            }
            Ok(report)
        })?;

        if report.changed > 0 {
            self.caches.invalidate_all();
        }
        info!(
            object_type,
            examined = report.examined,
            changed = report.changed,
            skipped = report.skipped,
            "hotfix finished"
        );
        Ok(report)
    }

    /// Deletes every registered type in descending priority.
    pub(crate) fn clear_registered(&self, tx: &Transaction) -> CoreResult<u64> {
        let mut removed = 0;
        for exporter in self.ordered().iter().rev() {
            removed += tx.with_session(|s| s.delete_all(exporter.object_type()))?;
        }
        debug!(removed, "registered types cleared");
        Ok(removed)
    }
}

impl std::fmt::Debug for ImportExportEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportExportEngine")
            .field("exporters", &self.exporters())
            .field("updates", &self.updates.read().len())
            .field("config", &self.config)
            .finish()
    }
}

fn export_entry(tx: &Transaction, exporter: &dyn Exporter) -> CoreResult<ExportEntry> {
    let object_type = exporter.object_type();
    let records = tx
        .with_session(|s| s.scan(object_type))?
        .into_iter()
        .map(|record| {
            let contents = payload_to_json(&record.contents).map_err(|e| {
                CoreError::serialization(format!("{object_type} #{}: {e}", record.key))
            })?;
            Ok(ExportedRecord {
                key: record.key,
                name: record.name,
                revision: record.revision,
                updated_at: record.updated_at,
                contents,
            })
        })
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(ExportEntry {
        object_type: object_type.to_string(),
        priority: exporter.priority(),
        records,
    })
}

fn imported_record(object_type: &str, exported: &ExportedRecord) -> CoreResult<Record> {
    let mut record = Record::new(
        object_type,
        exported.key,
        exported.name.clone(),
        json_to_payload(&exported.contents)?,
    );
    record.revision = exported.revision;
    record.updated_at = exported.updated_at;
    Ok(record)
}
