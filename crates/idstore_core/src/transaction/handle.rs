//! Physical transactions and the handle passed to units of work.

use crate::error::{CoreError, CoreResult};
use crate::transaction::{Completion, Propagation};
use idstore_storage::{Session, SessionId, StorageResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

type CompletionCallback = Box<dyn FnOnce(Completion) + Send>;

/// One storage session shared by an owning frame and every frame that joined it.
pub(crate) struct PhysicalTransaction {
    session_id: SessionId,
    session: Mutex<Option<Box<dyn Session>>>,
    rollback_only: AtomicBool,
    callbacks: Mutex<Vec<CompletionCallback>>,
}

impl PhysicalTransaction {
    pub(crate) fn new(session: Box<dyn Session>) -> Self {
        Self {
            session_id: session.id(),
            session: Mutex::new(Some(session)),
            rollback_only: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub(crate) fn with_session<R>(
        &self,
        f: impl FnOnce(&mut dyn Session) -> StorageResult<R>,
    ) -> CoreResult<R> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or_else(|| {
            CoreError::invalid_operation(format!("session {} already released", self.session_id))
        })?;
        Ok(f(session.as_mut())?)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.session.lock().as_ref().is_some_and(|s| s.is_dirty())
    }

    pub(crate) fn mark_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    pub(crate) fn on_completion(&self, callback: CompletionCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Commits the session, or rolls it back if the transaction is rollback-only.
    pub(crate) fn commit(&self) -> CoreResult<()> {
        if self.is_rollback_only() {
            self.rollback()?;
            return Err(CoreError::RollbackOnly);
        }

        let result = {
            let mut guard = self.session.lock();
            match guard.as_mut() {
                Some(session) => session.commit().map_err(CoreError::from_commit_error),
                None => Err(CoreError::invalid_operation(format!(
                    "session {} already released",
                    self.session_id
                ))),
            }
        };
        match &result {
            Ok(()) => {
                debug!(session = %self.session_id, "transaction committed");
                self.complete(Completion::Committed);
            }
            Err(e) => {
                debug!(session = %self.session_id, error = %e, "commit failed");
                self.complete(Completion::RolledBack);
            }
        }
        result
    }

    pub(crate) fn rollback(&self) -> CoreResult<()> {
        let result = {
            let mut guard = self.session.lock();
            match guard.as_mut() {
                Some(session) => session.rollback().map_err(CoreError::from),
                None => Ok(()),
            }
        };
        self.complete(Completion::RolledBack);
        result
    }

    pub(crate) fn take_session(&self) -> Option<Box<dyn Session>> {
        self.session.lock().take()
    }

    fn complete(&self, completion: Completion) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(completion);
        }
    }
}

/// The transaction a unit of work runs in.
///
/// Passed by reference to the work closure and from there to every store
/// call; stores use its session for all reads and writes.
pub struct Transaction {
    physical: Arc<PhysicalTransaction>,
    propagation: Propagation,
    owns_session: bool,
    depth: usize,
}

impl Transaction {
    pub(crate) fn new(
        physical: Arc<PhysicalTransaction>,
        propagation: Propagation,
        owns_session: bool,
        depth: usize,
    ) -> Self {
        Self {
            physical,
            propagation,
            owns_session,
            depth,
        }
    }

    /// Returns the id of the underlying storage session.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.physical.session_id()
    }

    /// Returns the propagation mode this frame was started with.
    #[must_use]
    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// Returns true if this frame owns the session and decides on commit.
    #[must_use]
    pub fn owns_session(&self) -> bool {
        self.owns_session
    }

    /// Returns the depth of this frame in the thread's transaction stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns true if this frame is nested inside another frame.
    #[must_use]
    pub fn is_subtransaction(&self) -> bool {
        self.depth > 1
    }

    /// Returns true if the session holds uncommitted writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.physical.is_dirty()
    }

    /// Commits the writes made so far.
    ///
    /// Meant for units of work started with `auto_commit` disabled.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when called from a frame that joined another
    /// frame's transaction, `RollbackOnly` if a nested frame failed, or a
    /// conflict if the commit lost a race.
    pub fn commit(&self) -> CoreResult<()> {
        self.require_owner("commit")?;
        self.physical.commit()
    }

    /// Discards the writes made so far.
    pub fn rollback(&self) -> CoreResult<()> {
        self.require_owner("roll back")?;
        self.physical.rollback()
    }

    /// Marks the transaction so that the owning frame rolls back instead of committing.
    pub fn set_rollback_only(&self) {
        self.physical.mark_rollback_only();
    }

    /// Returns true if the transaction can no longer commit.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.physical.is_rollback_only()
    }

    /// Registers a callback that runs once the physical transaction commits
    /// or rolls back.
    pub fn on_completion(&self, callback: impl FnOnce(Completion) + Send + 'static) {
        self.physical.on_completion(Box::new(callback));
    }

    /// Runs a storage operation against this transaction's session.
    pub(crate) fn with_session<R>(
        &self,
        f: impl FnOnce(&mut dyn Session) -> StorageResult<R>,
    ) -> CoreResult<R> {
        self.physical.with_session(f)
    }

    fn require_owner(&self, action: &str) -> CoreResult<()> {
        if self.owns_session {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "cannot {action} from a nested frame that joined its caller's transaction"
            )))
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("session", &self.session_id())
            .field("propagation", &self.propagation)
            .field("owns_session", &self.owns_session)
            .field("depth", &self.depth)
            .finish()
    }
}
