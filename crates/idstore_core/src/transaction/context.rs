//! Per-thread transaction frame stacks.
//!
//! Each thread keeps one stack per runner. Stacks are created lazily on the
//! first push and dropped as soon as they empty, so an idle thread holds no
//! transaction state.

use crate::transaction::handle::PhysicalTransaction;
use crate::transaction::Propagation;
use idstore_storage::SessionId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

thread_local! {
    static STACKS: RefCell<HashMap<u64, TransactionContext>> = RefCell::new(HashMap::new());
}

/// One entry in a transaction stack.
pub struct TransactionFrame {
    propagation: Propagation,
    physical: Arc<PhysicalTransaction>,
    owns_session: bool,
}

impl TransactionFrame {
    pub(crate) fn new(
        propagation: Propagation,
        physical: Arc<PhysicalTransaction>,
        owns_session: bool,
    ) -> Self {
        Self {
            propagation,
            physical,
            owns_session,
        }
    }

    /// Propagation mode the frame was started with.
    #[must_use]
    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// True if this frame acquired the session and will release it.
    #[must_use]
    pub fn owns_session(&self) -> bool {
        self.owns_session
    }

    /// Id of the session bound to this frame.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.physical.session_id()
    }

    pub(crate) fn physical(&self) -> &Arc<PhysicalTransaction> {
        &self.physical
    }
}

impl std::fmt::Debug for TransactionFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFrame")
            .field("propagation", &self.propagation)
            .field("session", &self.session_id())
            .field("owns_session", &self.owns_session)
            .finish()
    }
}

/// A stack of transaction frames.
///
/// `is_subtransaction()` is true exactly when more than one frame is pushed.
#[derive(Debug, Default)]
pub struct TransactionContext {
    frames: Vec<TransactionFrame>,
}

impl TransactionContext {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a frame, returning the new depth.
    pub fn push(&mut self, frame: TransactionFrame) -> usize {
        self.frames.push(frame);
        self.frames.len()
    }

    /// Pops the innermost frame.
    pub fn pop(&mut self) -> Option<TransactionFrame> {
        self.frames.pop()
    }

    /// Returns the innermost frame.
    #[must_use]
    pub fn current(&self) -> Option<&TransactionFrame> {
        self.frames.last()
    }

    /// Returns true when no frame is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns true when the innermost frame is nested in another.
    #[must_use]
    pub fn is_subtransaction(&self) -> bool {
        self.frames.len() > 1
    }

    /// Number of active frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Pushes a frame onto the calling thread's stack for `runner`.
pub(crate) fn push_frame(runner: u64, frame: TransactionFrame) -> usize {
    STACKS.with(|stacks| stacks.borrow_mut().entry(runner).or_default().push(frame))
}

/// Pops the innermost frame, dropping the stack once it is empty.
pub(crate) fn pop_frame(runner: u64) -> Option<TransactionFrame> {
    STACKS.with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        let stack = stacks.get_mut(&runner)?;
        let frame = stack.pop();
        if stack.is_empty() {
            stacks.remove(&runner);
        }
        frame
    })
}

/// Returns the physical transaction of the innermost frame.
pub(crate) fn current_physical(runner: u64) -> Option<Arc<PhysicalTransaction>> {
    STACKS.with(|stacks| {
        stacks
            .borrow()
            .get(&runner)
            .and_then(|stack| stack.current())
            .map(|frame| Arc::clone(frame.physical()))
    })
}

/// Returns the depth of the calling thread's stack for `runner`.
pub(crate) fn depth(runner: u64) -> usize {
    STACKS.with(|stacks| stacks.borrow().get(&runner).map_or(0, TransactionContext::depth))
}

/// Returns true if the calling thread holds a stack for `runner`.
pub(crate) fn has_stack(runner: u64) -> bool {
    STACKS.with(|stacks| stacks.borrow().contains_key(&runner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use idstore_storage::{InMemoryProvider, SessionProvider};
    use std::thread;

    fn frame(provider: &InMemoryProvider, owns: bool) -> TransactionFrame {
        let physical = Arc::new(PhysicalTransaction::new(provider.acquire(true).unwrap()));
        TransactionFrame::new(Propagation::Required, physical, owns)
    }

    #[test]
    fn subtransaction_iff_depth_above_one() {
        let provider = InMemoryProvider::new();
        let mut ctx = TransactionContext::new();
        assert!(ctx.is_empty());
        assert!(!ctx.is_subtransaction());

        ctx.push(frame(&provider, true));
        assert!(!ctx.is_subtransaction());
        ctx.push(frame(&provider, false));
        assert!(ctx.is_subtransaction());
        assert!(!ctx.current().unwrap().owns_session());

        ctx.pop();
        assert!(!ctx.is_subtransaction());
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn stack_is_dropped_when_empty() {
        let provider = InMemoryProvider::new();
        assert_eq!(push_frame(900, frame(&provider, true)), 1);
        assert!(has_stack(900));
        assert!(pop_frame(900).is_some());
        assert!(!has_stack(900));
        assert!(pop_frame(900).is_none());
    }

    #[test]
    fn stacks_are_per_thread_and_per_runner() {
        let provider = InMemoryProvider::new();
        push_frame(901, frame(&provider, true));
        assert_eq!(depth(902), 0);

        let other = thread::spawn(|| depth(901)).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(depth(901), 1);
        pop_frame(901);
    }
}
