//! In-memory session provider with optimistic concurrency control.

use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::session::{Session, SessionId, SessionProvider};
use crate::stats::{ProviderCounters, ProviderStats};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Committed rows, grouped by object type, plus a per-type name index.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    rows: BTreeMap<String, BTreeMap<i64, Record>>,
    names: HashMap<String, HashMap<String, i64>>,
}

impl Tables {
    pub(crate) fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut tables = Self::default();
        for record in records {
            tables.put(record);
        }
        tables
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &Record> {
        self.rows.values().flat_map(|rows| rows.values())
    }

    pub(crate) fn max_key(&self) -> i64 {
        self.records().map(|r| r.key).max().unwrap_or(0)
    }

    fn get(&self, object_type: &str, key: i64) -> Option<&Record> {
        self.rows.get(object_type).and_then(|rows| rows.get(&key))
    }

    fn key_for_name(&self, object_type: &str, name: &str) -> Option<i64> {
        self.names
            .get(object_type)
            .and_then(|names| names.get(name))
            .copied()
    }

    fn revision(&self, object_type: &str, key: i64) -> Option<i64> {
        self.get(object_type, key).map(|r| r.revision)
    }

    fn put(&mut self, record: Record) {
        if let Some(name) = &record.name {
            self.names
                .entry(record.object_type.clone())
                .or_default()
                .insert(name.clone(), record.key);
        }
        self.rows
            .entry(record.object_type.clone())
            .or_default()
            .insert(record.key, record);
    }

    fn remove(&mut self, object_type: &str, key: i64) {
        let Some(rows) = self.rows.get_mut(object_type) else {
            return;
        };
        if let Some(old) = rows.remove(&key) {
            if let Some(name) = old.name {
                if let Some(names) = self.names.get_mut(object_type) {
                    if names.get(&name) == Some(&key) {
                        names.remove(&name);
                    }
                }
            }
        }
        if rows.is_empty() {
            self.rows.remove(object_type);
            self.names.remove(object_type);
        }
    }
}

/// Persists the committed tables after every successful commit.
pub(crate) type PersistFn = Box<dyn Fn(&Tables, i64) -> StorageResult<()> + Send + Sync>;

/// State shared between a provider and all of its sessions.
pub(crate) struct SharedState {
    tables: RwLock<Tables>,
    next_key: AtomicI64,
    open: Mutex<HashSet<SessionId>>,
    counters: ProviderCounters,
    failing_commits: AtomicU32,
    persist: Option<PersistFn>,
}

impl SharedState {
    pub(crate) fn new(tables: Tables, persist: Option<PersistFn>) -> Self {
        let next_key = tables.max_key().saturating_add(1);
        Self {
            tables: RwLock::new(tables),
            next_key: AtomicI64::new(next_key),
            open: Mutex::new(HashSet::new()),
            counters: ProviderCounters::default(),
            failing_commits: AtomicU32::new(0),
            persist,
        }
    }

    pub(crate) fn with_next_key(self, next_key: i64) -> Self {
        self.next_key.fetch_max(next_key, Ordering::SeqCst);
        self
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("next_key", &self.next_key.load(Ordering::SeqCst))
            .field("open_sessions", &self.open.lock().len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Put(Record),
    Delete,
}

/// A session over an [`InMemoryProvider`].
///
/// Pending writes are kept per `(object_type, key)`; for every row the session
/// touches it remembers the committed revision it first observed. Commit fails
/// with a conflict if any written row changed since then.
pub struct MemorySession {
    id: SessionId,
    transactional: bool,
    shared: Arc<SharedState>,
    pending: BTreeMap<(String, i64), Pending>,
    observed: HashMap<(String, i64), Option<i64>>,
}

impl MemorySession {
    fn new(shared: Arc<SharedState>, transactional: bool) -> Self {
        Self {
            id: SessionId::new(),
            transactional,
            shared,
            pending: BTreeMap::new(),
            observed: HashMap::new(),
        }
    }

    fn observe(&mut self, tables: &Tables, object_type: &str, key: i64) {
        self.observed
            .entry((object_type.to_string(), key))
            .or_insert_with(|| tables.revision(object_type, key));
    }

    fn visible(&mut self, object_type: &str, key: i64) -> Option<Record> {
        if let Some(pending) = self.pending.get(&(object_type.to_string(), key)) {
            return match pending {
                Pending::Put(record) => Some(record.clone()),
                Pending::Delete => None,
            };
        }
        let shared = Arc::clone(&self.shared);
        let tables = shared.tables.read();
        self.observe(&tables, object_type, key);
        tables.get(object_type, key).cloned()
    }

    fn visible_by_name(&mut self, object_type: &str, name: &str) -> Option<Record> {
        let pending_match = self.pending.iter().find_map(|((t, _), p)| match p {
            Pending::Put(r) if t == object_type && r.name.as_deref() == Some(name) => {
                Some(r.clone())
            }
            _ => None,
        });
        if pending_match.is_some() {
            return pending_match;
        }

        let shared = Arc::clone(&self.shared);
        let tables = shared.tables.read();
        let key = tables.key_for_name(object_type, name)?;
        if self.pending.contains_key(&(object_type.to_string(), key)) {
            // renamed or deleted in this session
            return None;
        }
        self.observe(&tables, object_type, key);
        tables.get(object_type, key).cloned()
    }

    fn write(&mut self, object_type: &str, key: i64, pending: Pending) -> StorageResult<()> {
        {
            let shared = Arc::clone(&self.shared);
            let tables = shared.tables.read();
            self.observe(&tables, object_type, key);
        }
        self.pending.insert((object_type.to_string(), key), pending);
        if !self.transactional {
            self.commit()?;
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.observed.clear();
    }

    fn validate(&self, tables: &Tables) -> StorageResult<()> {
        if self.shared.failing_commits.load(Ordering::SeqCst) > 0 {
            self.shared.failing_commits.fetch_sub(1, Ordering::SeqCst);
            let ((object_type, key), _) = self
                .pending
                .iter()
                .next()
                .ok_or_else(|| StorageError::Corrupted("validating empty commit".into()))?;
            return Err(StorageError::conflict(
                object_type.clone(),
                *key,
                "injected commit failure",
            ));
        }

        for ((object_type, key), pending) in &self.pending {
            let expected = self
                .observed
                .get(&(object_type.clone(), *key))
                .copied()
                .flatten();
            let current = tables.revision(object_type, *key);
            if current != expected {
                return Err(StorageError::conflict(
                    object_type.clone(),
                    *key,
                    format!("revision changed from {expected:?} to {current:?}"),
                ));
            }

            if let Pending::Put(record) = pending {
                let Some(name) = &record.name else { continue };
                if let Some(holder) = tables.key_for_name(object_type, name) {
                    let released_here = self
                        .pending
                        .contains_key(&(object_type.clone(), holder));
                    if holder != *key && !released_here {
                        return Err(StorageError::conflict(
                            object_type.clone(),
                            *key,
                            format!("name '{name}' was taken concurrently"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&self, tables: &mut Tables) {
        for (object_type, key) in self.pending.keys() {
            tables.remove(object_type, *key);
        }
        for pending in self.pending.values() {
            if let Pending::Put(record) = pending {
                tables.put(record.clone());
            }
        }
    }
}

impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }

    fn allocate_key(&mut self) -> StorageResult<i64> {
        self.shared
            .next_key
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next < i64::MAX).then_some(next + 1)
            })
            .map_err(|_| StorageError::KeysExhausted)
    }

    fn insert(&mut self, record: Record) -> StorageResult<()> {
        if self.visible(&record.object_type, record.key).is_some() {
            return Err(StorageError::DuplicateKey {
                object_type: record.object_type,
                key: record.key,
            });
        }
        if let Some(name) = &record.name {
            if self.visible_by_name(&record.object_type, name).is_some() {
                return Err(StorageError::DuplicateName {
                    object_type: record.object_type.clone(),
                    name: name.clone(),
                });
            }
        }
        // keys restored with explicit ids must not be handed out again
        self.shared
            .next_key
            .fetch_max(record.key.saturating_add(1), Ordering::SeqCst);
        let (object_type, key) = (record.object_type.clone(), record.key);
        self.write(&object_type, key, Pending::Put(record))
    }

    fn get(&mut self, object_type: &str, key: i64) -> StorageResult<Option<Record>> {
        Ok(self.visible(object_type, key))
    }

    fn get_by_name(&mut self, object_type: &str, name: &str) -> StorageResult<Option<Record>> {
        Ok(self.visible_by_name(object_type, name))
    }

    fn update(&mut self, record: Record) -> StorageResult<()> {
        if self.visible(&record.object_type, record.key).is_none() {
            return Err(StorageError::NotFound {
                object_type: record.object_type,
                key: record.key,
            });
        }
        if let Some(name) = &record.name {
            if let Some(holder) = self.visible_by_name(&record.object_type, name) {
                if holder.key != record.key {
                    return Err(StorageError::DuplicateName {
                        object_type: record.object_type.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        let (object_type, key) = (record.object_type.clone(), record.key);
        self.write(&object_type, key, Pending::Put(record))
    }

    fn delete(&mut self, object_type: &str, key: i64) -> StorageResult<bool> {
        if self.visible(object_type, key).is_none() {
            return Ok(false);
        }
        self.write(object_type, key, Pending::Delete)?;
        Ok(true)
    }

    fn scan(&mut self, object_type: &str) -> StorageResult<Vec<Record>> {
        let mut merged: BTreeMap<i64, Record> = self
            .shared
            .tables
            .read()
            .rows
            .get(object_type)
            .cloned()
            .unwrap_or_default();
        for ((t, key), pending) in &self.pending {
            if t != object_type {
                continue;
            }
            match pending {
                Pending::Put(record) => {
                    merged.insert(*key, record.clone());
                }
                Pending::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    fn count(&mut self, object_type: &str) -> StorageResult<u64> {
        let tables = self.shared.tables.read();
        let committed = tables.rows.get(object_type);
        let exists = |key: &i64| committed.is_some_and(|rows| rows.contains_key(key));

        let (mut added, mut removed) = (0usize, 0usize);
        let first = (object_type.to_string(), i64::MIN);
        let last = (object_type.to_string(), i64::MAX);
        for ((_, key), pending) in self.pending.range(first..=last) {
            match pending {
                Pending::Put(_) if !exists(key) => added += 1,
                Pending::Delete if exists(key) => removed += 1,
                _ => {}
            }
        }
        let base = committed.map_or(0, BTreeMap::len);
        Ok((base + added - removed) as u64)
    }

    fn delete_all(&mut self, object_type: &str) -> StorageResult<u64> {
        let keys: Vec<i64> = self.scan(object_type)?.iter().map(|r| r.key).collect();
        let transactional = self.transactional;
        // one commit for the whole batch in auto-commit mode
        self.transactional = true;
        let mut result = Ok(());
        for key in &keys {
            if let Err(e) = self.write(object_type, *key, Pending::Delete) {
                result = Err(e);
                break;
            }
        }
        self.transactional = transactional;
        result?;
        if !transactional {
            self.commit()?;
        }
        Ok(keys.len() as u64)
    }

    fn object_types(&mut self) -> StorageResult<Vec<String>> {
        let mut candidates: BTreeSet<String> =
            self.shared.tables.read().rows.keys().cloned().collect();
        candidates.extend(self.pending.keys().map(|(t, _)| t.clone()));

        let mut types = Vec::new();
        for object_type in candidates {
            if self.count(&object_type)? > 0 {
                types.push(object_type);
            }
        }
        Ok(types)
    }

    fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    fn commit(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            self.observed.clear();
            self.shared.counters.record_commit(true);
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let mut tables = shared.tables.write();
        if let Err(e) = self.validate(&tables) {
            drop(tables);
            debug!(session = %self.id, error = %e, "commit rejected");
            shared.counters.record_conflict();
            self.discard();
            return Err(e);
        }

        match &shared.persist {
            Some(persist) => {
                let mut next = tables.clone();
                self.apply(&mut next);
                if let Err(e) = persist(&next, shared.next_key.load(Ordering::SeqCst)) {
                    drop(tables);
                    self.discard();
                    return Err(e);
                }
                *tables = next;
            }
            None => self.apply(&mut tables),
        }
        drop(tables);

        debug!(session = %self.id, writes = self.pending.len(), "session committed");
        shared.counters.record_commit(false);
        self.discard();
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        if !self.pending.is_empty() {
            debug!(session = %self.id, writes = self.pending.len(), "session rolled back");
            self.shared.counters.record_rollback();
        }
        self.discard();
        Ok(())
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("transactional", &self.transactional)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// A session provider that keeps all data in memory.
///
/// Suitable for tests and for embedded deployments that do not need
/// durability. Clones share the same underlying data.
///
/// # Example
///
/// ```rust
/// use idstore_storage::{InMemoryProvider, Record, SessionProvider};
///
/// let provider = InMemoryProvider::new();
/// let mut session = provider.acquire(true).unwrap();
/// let key = session.allocate_key().unwrap();
/// session
///     .insert(Record::new("credential", key, Some("password".into()), b"{}".to_vec()))
///     .unwrap();
/// session.commit().unwrap();
/// provider.release(session).unwrap();
/// assert_eq!(provider.committed("credential").len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    shared: Arc<SharedState>,
}

impl InMemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::from_shared(SharedState::new(Tables::default(), None))
    }

    /// Creates a provider pre-populated with committed records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self::from_shared(SharedState::new(Tables::from_records(records), None))
    }

    pub(crate) fn from_shared(shared: SharedState) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Returns the committed rows of a type, bypassing any session.
    #[must_use]
    pub fn committed(&self, object_type: &str) -> Vec<Record> {
        self.shared
            .tables
            .read()
            .rows
            .get(object_type)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every committed row.
    #[must_use]
    pub fn committed_all(&self) -> Vec<Record> {
        self.shared.tables.read().records().cloned().collect()
    }

    /// Returns the number of sessions currently handed out.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.shared.open.lock().len()
    }

    /// Makes the next `count` non-empty commits fail with a conflict.
    ///
    /// Used to exercise retry paths without racing real threads.
    pub fn fail_next_commits(&self, count: u32) {
        self.shared.failing_commits.store(count, Ordering::SeqCst);
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for InMemoryProvider {
    fn acquire(&self, transactional: bool) -> StorageResult<Box<dyn Session>> {
        let session = MemorySession::new(Arc::clone(&self.shared), transactional);
        self.shared.open.lock().insert(session.id());
        self.shared.counters.record_acquire();
        Ok(Box::new(session))
    }

    fn release(&self, mut session: Box<dyn Session>) -> StorageResult<()> {
        let id = session.id();
        if !self.shared.open.lock().remove(&id) {
            return Err(StorageError::UnknownSession(id));
        }
        if session.is_dirty() {
            warn!(session = %id, "released session with uncommitted writes, discarding them");
            session.rollback()?;
        }
        self.shared.counters.record_release();
        Ok(())
    }

    fn stats(&self) -> ProviderStats {
        self.shared.counters.snapshot(self.open_sessions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(key: i64, name: &str, body: &str) -> Record {
        Record::new("credential", key, Some(name.into()), body.as_bytes().to_vec())
    }

    fn insert_committed(provider: &InMemoryProvider, name: &str) -> i64 {
        let mut session = provider.acquire(true).unwrap();
        let key = session.allocate_key().unwrap();
        session.insert(record(key, name, "{}")).unwrap();
        session.commit().unwrap();
        provider.release(session).unwrap();
        key
    }

    #[test]
    fn uncommitted_writes_are_private() {
        let provider = InMemoryProvider::new();
        let mut writer = provider.acquire(true).unwrap();
        let key = writer.allocate_key().unwrap();
        writer.insert(record(key, "a", "{}")).unwrap();

        let mut reader = provider.acquire(true).unwrap();
        assert!(reader.get("credential", key).unwrap().is_none());
        assert!(writer.get("credential", key).unwrap().is_some());

        writer.commit().unwrap();
        assert!(reader.get("credential", key).unwrap().is_some());
    }

    #[test]
    fn rollback_discards_writes() {
        let provider = InMemoryProvider::new();
        let mut session = provider.acquire(true).unwrap();
        let key = session.allocate_key().unwrap();
        session.insert(record(key, "a", "{}")).unwrap();
        session.rollback().unwrap();
        session.commit().unwrap();
        assert!(provider.committed("credential").is_empty());
        assert_eq!(provider.stats().rollbacks, 1);
    }

    #[test]
    fn duplicate_name_rejected_at_insert() {
        let provider = InMemoryProvider::new();
        insert_committed(&provider, "a");

        let mut session = provider.acquire(true).unwrap();
        let key = session.allocate_key().unwrap();
        let err = session.insert(record(key, "a", "{}")).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateName { .. }));
    }

    #[test]
    fn duplicate_key_rejected_at_insert() {
        let provider = InMemoryProvider::new();
        let key = insert_committed(&provider, "a");

        let mut session = provider.acquire(true).unwrap();
        let err = session.insert(record(key, "b", "{}")).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
    }

    #[test]
    fn concurrent_update_conflicts() {
        let provider = InMemoryProvider::new();
        let key = insert_committed(&provider, "a");

        let mut first = provider.acquire(true).unwrap();
        let mut second = provider.acquire(true).unwrap();
        let base1 = first.get("credential", key).unwrap().unwrap();
        let base2 = second.get("credential", key).unwrap().unwrap();

        first
            .update(base1.next_revision(base1.name.clone(), b"1".to_vec()))
            .unwrap();
        second
            .update(base2.next_revision(base2.name.clone(), b"2".to_vec()))
            .unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_conflict());
        assert!(!second.is_dirty());
        assert_eq!(provider.committed("credential")[0].contents, b"1".to_vec());
        assert_eq!(provider.stats().conflicts, 1);
    }

    #[test]
    fn concurrent_insert_of_same_name_conflicts() {
        let provider = InMemoryProvider::new();
        let mut first = provider.acquire(true).unwrap();
        let mut second = provider.acquire(true).unwrap();
        let k1 = first.allocate_key().unwrap();
        let k2 = second.allocate_key().unwrap();
        first.insert(record(k1, "same", "{}")).unwrap();
        second.insert(record(k2, "same", "{}")).unwrap();

        first.commit().unwrap();
        assert!(second.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn rename_frees_old_name_within_session() {
        let provider = InMemoryProvider::new();
        let key = insert_committed(&provider, "old");

        let mut session = provider.acquire(true).unwrap();
        let current = session.get("credential", key).unwrap().unwrap();
        session
            .update(current.next_revision(Some("new".into()), b"{}".to_vec()))
            .unwrap();
        assert!(session.get_by_name("credential", "old").unwrap().is_none());

        let other = session.allocate_key().unwrap();
        session.insert(record(other, "old", "{}")).unwrap();
        session.commit().unwrap();

        let names: Vec<_> = provider
            .committed("credential")
            .into_iter()
            .filter_map(|r| r.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"old".to_string()));
        assert!(names.contains(&"new".to_string()));
    }

    #[test]
    fn scan_merges_pending_writes() {
        let provider = InMemoryProvider::new();
        let a = insert_committed(&provider, "a");
        insert_committed(&provider, "b");

        let mut session = provider.acquire(true).unwrap();
        session.delete("credential", a).unwrap();
        let c = session.allocate_key().unwrap();
        session.insert(record(c, "c", "{}")).unwrap();

        let names: Vec<_> = session
            .scan("credential")
            .unwrap()
            .into_iter()
            .filter_map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(session.count("credential").unwrap(), 2);
    }

    #[test]
    fn count_tracks_pending_writes() {
        let provider = InMemoryProvider::new();
        let a = insert_committed(&provider, "a");
        let b = insert_committed(&provider, "b");

        let mut session = provider.acquire(true).unwrap();
        let current = session.get("credential", a).unwrap().unwrap();
        session
            .update(current.next_revision(Some("a2".into()), b"{}".to_vec()))
            .unwrap();
        session.delete("credential", b).unwrap();
        let c = session.allocate_key().unwrap();
        session.insert(record(c, "c", "{}")).unwrap();
        let d = session.allocate_key().unwrap();
        session.insert(record(d, "d", "{}")).unwrap();
        session.delete("credential", d).unwrap();

        assert_eq!(session.count("credential").unwrap(), 2);
        assert_eq!(
            session.count("credential").unwrap(),
            session.scan("credential").unwrap().len() as u64
        );
        assert_eq!(session.count("group").unwrap(), 0);
        assert_eq!(session.object_types().unwrap(), vec!["credential".to_string()]);
    }

    #[test]
    fn delete_all_removes_every_row() {
        let provider = InMemoryProvider::new();
        insert_committed(&provider, "a");
        insert_committed(&provider, "b");

        let mut session = provider.acquire(false).unwrap();
        assert_eq!(session.delete_all("credential").unwrap(), 2);
        assert!(provider.committed("credential").is_empty());
        assert!(session.object_types().unwrap().is_empty());
    }

    #[test]
    fn non_transactional_session_commits_each_write() {
        let provider = InMemoryProvider::new();
        let mut session = provider.acquire(false).unwrap();
        let key = session.allocate_key().unwrap();
        session.insert(record(key, "a", "{}")).unwrap();
        assert!(!session.is_dirty());
        assert_eq!(provider.committed("credential").len(), 1);
    }

    #[test]
    fn release_is_exactly_once() {
        let provider = InMemoryProvider::new();
        let session = provider.acquire(true).unwrap();
        let id = session.id();
        assert_eq!(provider.open_sessions(), 1);
        provider.release(session).unwrap();
        assert_eq!(provider.open_sessions(), 0);

        let foreign = InMemoryProvider::new().acquire(true).unwrap();
        let err = provider.release(foreign).unwrap_err();
        assert!(matches!(err, StorageError::UnknownSession(_)));
        assert_ne!(id, SessionId::new());
    }

    #[test]
    fn release_discards_dirty_session() {
        let provider = InMemoryProvider::new();
        let mut session = provider.acquire(true).unwrap();
        let key = session.allocate_key().unwrap();
        session.insert(record(key, "a", "{}")).unwrap();
        provider.release(session).unwrap();
        assert!(provider.committed("credential").is_empty());
    }

    #[test]
    fn injected_failures_surface_as_conflicts() {
        let provider = InMemoryProvider::new();
        provider.fail_next_commits(1);

        let mut session = provider.acquire(true).unwrap();
        let key = session.allocate_key().unwrap();
        session.insert(record(key, "a", "{}")).unwrap();
        assert!(session.commit().unwrap_err().is_conflict());

        session.insert(record(key, "a", "{}")).unwrap();
        session.commit().unwrap();
        assert_eq!(provider.committed("credential").len(), 1);
    }

    proptest! {
        #[test]
        fn auto_commit_session_matches_model(ops in prop::collection::vec((0u8..3, 1i64..9), 1..40)) {
            let provider = InMemoryProvider::new();
            let mut session = provider.acquire(false).unwrap();
            let mut model: BTreeMap<i64, String> = BTreeMap::new();
            for (op, key) in ops {
                match op {
                    0 => {
                        let name = format!("n{key}");
                        let inserted = session.insert(record(key, &name, "{}")).is_ok();
                        prop_assert_eq!(inserted, !model.contains_key(&key));
                        model.entry(key).or_insert(name);
                    }
                    1 => {
                        let existed = session.delete("credential", key).unwrap();
                        prop_assert_eq!(existed, model.remove(&key).is_some());
                    }
                    _ => {
                        let found = session.get("credential", key).unwrap().is_some();
                        prop_assert_eq!(found, model.contains_key(&key));
                    }
                }
            }
            let keys: Vec<i64> = provider.committed("credential").iter().map(|r| r.key).collect();
            prop_assert_eq!(keys, model.keys().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn explicit_keys_advance_allocator() {
        let provider = InMemoryProvider::new();
        let mut session = provider.acquire(false).unwrap();
        session.insert(record(100, "restored", "{}")).unwrap();
        assert!(session.allocate_key().unwrap() > 100);
    }

    #[test]
    fn largest_explicit_key_exhausts_allocator() {
        let provider = InMemoryProvider::new();
        let mut session = provider.acquire(false).unwrap();
        session.insert(record(i64::MAX, "last", "{}")).unwrap();
        assert_eq!(provider.committed("credential")[0].key, i64::MAX);

        let err = session.allocate_key().unwrap_err();
        assert!(matches!(err, StorageError::KeysExhausted));
        assert!(matches!(
            session.allocate_key().unwrap_err(),
            StorageError::KeysExhausted
        ));
    }

    #[test]
    fn snapshot_with_largest_key_loads() {
        let provider = InMemoryProvider::with_records([record(i64::MAX, "last", "{}")]);
        let mut session = provider.acquire(true).unwrap();
        assert!(session.get("credential", i64::MAX).unwrap().is_some());
        assert!(matches!(
            session.allocate_key().unwrap_err(),
            StorageError::KeysExhausted
        ));
    }
}
