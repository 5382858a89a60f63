//! Referential-integrity hooks.
//!
//! A store that references objects of another type registers a hook against
//! that type. Before the referenced object is removed (or, with update and
//! create hooks, changed or added) the owning store runs every hook inside
//! the same transaction; the first hook that blocks aborts the operation with
//! [`CoreError::ReferentialViolation`].

use crate::error::{CoreError, CoreResult, ObjectRef};
use crate::transaction::Transaction;
use idstore_storage::Record;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Verdict of a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// The operation may proceed.
    Allow,
    /// The operation must not proceed, with a human-readable reason.
    Block(String),
}

impl HookOutcome {
    /// Blocks with `reason`.
    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block(reason.into())
    }

    /// Returns true if this outcome blocks the operation.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block(_))
    }
}

type RecordCheck = Arc<dyn Fn(&Transaction, &Record) -> CoreResult<HookOutcome> + Send + Sync>;
type ChangeCheck =
    Arc<dyn Fn(&Transaction, &Record, &Record) -> CoreResult<HookOutcome> + Send + Sync>;

/// A before-delete check registered by `owner_type`.
#[derive(Clone)]
pub struct ReferentialHook {
    owner_type: String,
    check: RecordCheck,
}

impl ReferentialHook {
    /// Creates a hook; `check` receives the record about to be removed.
    pub fn new<F>(owner_type: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Transaction, &Record) -> CoreResult<HookOutcome> + Send + Sync + 'static,
    {
        Self {
            owner_type: owner_type.into(),
            check: Arc::new(check),
        }
    }

    /// Object type of the store that registered the hook.
    #[must_use]
    pub fn owner_type(&self) -> &str {
        &self.owner_type
    }
}

/// A before-update check; receives the current and the new record.
#[derive(Clone)]
pub struct UpdateHook {
    owner_type: String,
    check: ChangeCheck,
}

impl UpdateHook {
    /// Creates an update hook.
    pub fn new<F>(owner_type: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Transaction, &Record, &Record) -> CoreResult<HookOutcome> + Send + Sync + 'static,
    {
        Self {
            owner_type: owner_type.into(),
            check: Arc::new(check),
        }
    }
}

/// A before-create check; receives the record about to be inserted.
#[derive(Clone)]
pub struct CreateHook {
    owner_type: String,
    check: RecordCheck,
}

impl CreateHook {
    /// Creates a create hook.
    pub fn new<F>(owner_type: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Transaction, &Record) -> CoreResult<HookOutcome> + Send + Sync + 'static,
    {
        Self {
            owner_type: owner_type.into(),
            check: Arc::new(check),
        }
    }
}

#[derive(Default)]
struct Hooks {
    removal: HashMap<String, Vec<ReferentialHook>>,
    update: HashMap<String, Vec<UpdateHook>>,
    create: HashMap<String, Vec<CreateHook>>,
}

/// Hooks keyed by the object type they protect.
///
/// Cheap to clone; clones share registrations. Hooks are evaluated in
/// registration order without holding the registry lock, so a hook may
/// itself read other stores.
#[derive(Clone, Default)]
pub struct ReferentialHookRegistry {
    hooks: Arc<RwLock<Hooks>>,
}

impl ReferentialHookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a before-delete hook for objects of `target_type`.
    pub fn register(&self, target_type: impl Into<String>, hook: ReferentialHook) {
        self.hooks
            .write()
            .removal
            .entry(target_type.into())
            .or_default()
            .push(hook);
    }

    /// Registers a before-update hook for objects of `target_type`.
    pub fn register_update(&self, target_type: impl Into<String>, hook: UpdateHook) {
        self.hooks
            .write()
            .update
            .entry(target_type.into())
            .or_default()
            .push(hook);
    }

    /// Registers a before-create hook for objects of `target_type`.
    pub fn register_create(&self, target_type: impl Into<String>, hook: CreateHook) {
        self.hooks
            .write()
            .create
            .entry(target_type.into())
            .or_default()
            .push(hook);
    }

    /// Number of removal hooks protecting `target_type`.
    #[must_use]
    pub fn removal_hook_count(&self, target_type: &str) -> usize {
        self.hooks
            .read()
            .removal
            .get(target_type)
            .map_or(0, Vec::len)
    }

    /// Runs the removal hooks for `record`.
    ///
    /// # Errors
    ///
    /// `ReferentialViolation` naming the first blocking owner, or the hook's
    /// own error.
    pub fn check_removal(&self, tx: &Transaction, record: &Record) -> CoreResult<()> {
        let hooks = self
            .hooks
            .read()
            .removal
            .get(&record.object_type)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            let outcome = (hook.check)(tx, record)?;
            verdict(record, &hook.owner_type, outcome)?;
        }
        Ok(())
    }

    /// Runs the update hooks for a change from `current` to `updated`.
    pub fn check_update(
        &self,
        tx: &Transaction,
        current: &Record,
        updated: &Record,
    ) -> CoreResult<()> {
        let hooks = self
            .hooks
            .read()
            .update
            .get(&current.object_type)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            let outcome = (hook.check)(tx, current, updated)?;
            verdict(current, &hook.owner_type, outcome)?;
        }
        Ok(())
    }

    /// Runs the create hooks for `record`.
    pub fn check_create(&self, tx: &Transaction, record: &Record) -> CoreResult<()> {
        let hooks = self
            .hooks
            .read()
            .create
            .get(&record.object_type)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            let outcome = (hook.check)(tx, record)?;
            verdict(record, &hook.owner_type, outcome)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReferentialHookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read();
        f.debug_struct("ReferentialHookRegistry")
            .field("removal", &hooks.removal.keys().collect::<Vec<_>>())
            .field("update", &hooks.update.keys().collect::<Vec<_>>())
            .field("create", &hooks.create.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn verdict(record: &Record, owner_type: &str, outcome: HookOutcome) -> CoreResult<()> {
    match outcome {
        HookOutcome::Allow => Ok(()),
        HookOutcome::Block(reason) => {
            let object = match &record.name {
                Some(name) => ObjectRef::Name(name.clone()),
                None => ObjectRef::Key(record.key),
            };
            debug!(object_type = %record.object_type, %object, owner_type, "blocked by hook");
            Err(CoreError::referential_violation(
                record.object_type.clone(),
                object,
                owner_type,
                reason,
            ))
        }
    }
}
