//! Fixture types and test environments.
//!
//! The fixture types mirror a small slice of an identity server schema:
//! credentials, credential requirements listing credentials, and
//! registration forms pointing at a requirement. Their stores are wired with
//! the same referential hooks a real deployment would register, so tests
//! exercise blocked removals and ordered restores.

use idstore_codec::{from_json_bytes, to_json_bytes, CodecResult};
use idstore_core::{
    CachingDecorator, Config, CoreResult, GenericRecordStore, HookOutcome, ImportExportEngine,
    ObjectStore, StoreRegistry, Stored, StoredObject, Transaction, TransactionRunner,
};
use idstore_storage::{FileProvider, InMemoryProvider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Restore priority of [`Counter`].
pub const COUNTER_PRIORITY: i32 = 0;
/// Restore priority of [`Credential`].
pub const CREDENTIAL_PRIORITY: i32 = 10;
/// Restore priority of [`CredentialRequirement`].
pub const REQUIREMENT_PRIORITY: i32 = 20;
/// Restore priority of [`RegistrationForm`].
pub const FORM_PRIORITY: i32 = 30;

macro_rules! json_object {
    ($ty:ty, $object_type:literal) => {
        impl StoredObject for $ty {
            const OBJECT_TYPE: &'static str = $object_type;

            fn name(&self) -> Option<&str> {
                Some(&self.name)
            }

            fn encode(&self) -> CodecResult<Vec<u8>> {
                to_json_bytes(self)
            }

            fn decode(bytes: &[u8]) -> CodecResult<Self> {
                from_json_bytes(bytes)
            }
        }
    };
}

/// A credential definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Unique name.
    pub name: String,
    /// Verificator type, e.g. `password`.
    pub type_id: String,
    /// Verificator configuration.
    pub configuration: String,
}

impl Credential {
    /// A credential with an empty configuration.
    pub fn new(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id: type_id.into(),
            configuration: String::new(),
        }
    }
}

json_object!(Credential, "credential");

/// A named set of credentials an entity must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequirement {
    /// Unique name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Names of required credentials.
    pub credentials: Vec<String>,
}

impl CredentialRequirement {
    /// A requirement listing `credentials`.
    pub fn new<I, S>(name: impl Into<String>, credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            credentials: credentials.into_iter().map(Into::into).collect(),
        }
    }
}

json_object!(CredentialRequirement, "credentialRequirement");

/// A self-registration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    /// Unique name.
    pub name: String,
    /// Requirement assigned to registered entities.
    pub default_credential_requirement: String,
    /// Credentials collected by the form.
    pub credential_params: Vec<String>,
    /// Groups the entity is offered.
    pub group_params: Vec<String>,
}

impl RegistrationForm {
    /// A form using `requirement` and collecting `credentials`.
    pub fn new<I, S>(name: impl Into<String>, requirement: impl Into<String>, credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            default_credential_requirement: requirement.into(),
            credential_params: credentials.into_iter().map(Into::into).collect(),
            group_params: Vec::new(),
        }
    }
}

json_object!(RegistrationForm, "registrationForm");

/// A named integer, used by concurrency tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Unique name.
    pub name: String,
    /// Current value.
    pub value: i64,
}

json_object!(Counter, "counter");

/// The fixture stores, with their hooks installed.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Cached credential store.
    pub credentials: CachingDecorator<Credential>,
    /// Cached credential requirement store.
    pub requirements: CachingDecorator<CredentialRequirement>,
    /// Uncached registration form store.
    pub forms: GenericRecordStore<RegistrationForm>,
    /// Uncached counter store.
    pub counters: GenericRecordStore<Counter>,
}

impl Stores {
    /// Creates the fixture stores in `registry` and registers their hooks.
    pub fn install(registry: &StoreRegistry) -> Self {
        let stores = Self {
            credentials: registry.cached_store(CREDENTIAL_PRIORITY),
            requirements: registry.cached_store(REQUIREMENT_PRIORITY),
            forms: registry.generic_store(FORM_PRIORITY),
            counters: registry.generic_store(COUNTER_PRIORITY),
        };
        stores.install_hooks();
        stores
    }

    fn install_hooks(&self) {
        let requirements = self.requirements.clone();
        self.credentials.add_removal_handler(
            CredentialRequirement::OBJECT_TYPE,
            Box::new(move |tx: &Transaction, credential: &Stored<Credential>| {
                for requirement in requirements.get_all(tx)? {
                    if requirement.value.credentials.contains(&credential.value.name) {
                        return Ok(HookOutcome::block(format!(
                            "the credential is used by credential requirement {}",
                            requirement.value.name
                        )));
                    }
                }
                Ok(HookOutcome::Allow)
            }),
        );

        let forms = self.forms.clone();
        self.credentials.add_removal_handler(
            RegistrationForm::OBJECT_TYPE,
            Box::new(move |tx: &Transaction, credential: &Stored<Credential>| {
                for form in forms.get_all(tx)? {
                    if form.value.credential_params.contains(&credential.value.name) {
                        return Ok(HookOutcome::block(format!(
                            "the credential is used by registration form {}",
                            form.value.name
                        )));
                    }
                }
                Ok(HookOutcome::Allow)
            }),
        );

        let forms = self.forms.clone();
        self.requirements.add_removal_handler(
            RegistrationForm::OBJECT_TYPE,
            Box::new(move |tx: &Transaction, requirement: &Stored<CredentialRequirement>| {
                for form in forms.get_all(tx)? {
                    if form.value.default_credential_requirement == requirement.value.name {
                        return Ok(HookOutcome::block(format!(
                            "the credential requirement is used by registration form {}",
                            form.value.name
                        )));
                    }
                }
                Ok(HookOutcome::Allow)
            }),
        );

        let forms = self.forms.clone();
        self.requirements.add_update_handler(
            RegistrationForm::OBJECT_TYPE,
            Box::new(
                move |tx: &Transaction,
                      current: &Stored<CredentialRequirement>,
                      updated: &CredentialRequirement| {
                    if current.value.name == updated.name {
                        return Ok(HookOutcome::Allow);
                    }
                    let used = forms
                        .get_all(tx)?
                        .iter()
                        .any(|f| f.value.default_credential_requirement == current.value.name);
                    Ok(if used {
                        HookOutcome::block(
                            "a credential requirement used by a form cannot be renamed",
                        )
                    } else {
                        HookOutcome::Allow
                    })
                },
            ),
        );

        let credentials = self.credentials.clone();
        self.requirements.add_create_handler(
            CredentialRequirement::OBJECT_TYPE,
            Box::new(move |tx: &Transaction, requirement: &CredentialRequirement| {
                for name in &requirement.credentials {
                    if !credentials.exists(tx, name)? {
                        return Ok(HookOutcome::block(format!("unknown credential {name}")));
                    }
                }
                Ok(HookOutcome::Allow)
            }),
        );

        let requirements = self.requirements.clone();
        self.forms.add_create_handler(
            RegistrationForm::OBJECT_TYPE,
            Box::new(move |tx: &Transaction, form: &RegistrationForm| {
                Ok(
                    if requirements.exists(tx, &form.default_credential_requirement)? {
                        HookOutcome::Allow
                    } else {
                        HookOutcome::block(format!(
                            "unknown credential requirement {}",
                            form.default_credential_requirement
                        ))
                    },
                )
            }),
        );
    }
}

/// Configuration used by test environments: default settings with a short
/// back-off so conflict tests stay fast.
pub fn test_config() -> Config {
    Config::default().retry_base_delay(Duration::from_millis(1))
}

/// An in-memory store with the fixture stores installed.
#[derive(Debug)]
pub struct TestEnv {
    /// The registry.
    pub registry: StoreRegistry,
    /// The provider, for inspecting committed state and counters.
    pub provider: InMemoryProvider,
    /// The fixture stores.
    pub stores: Stores,
}

impl TestEnv {
    /// Creates an environment with [`test_config`].
    pub fn memory() -> Self {
        Self::with_config(test_config())
    }

    /// Creates an environment with explicit settings.
    pub fn with_config(config: Config) -> Self {
        let provider = InMemoryProvider::new();
        let registry = StoreRegistry::new(Arc::new(provider.clone()), config);
        let stores = Stores::install(&registry);
        Self {
            registry,
            provider,
            stores,
        }
    }

    /// The transaction runner.
    pub fn runner(&self) -> &TransactionRunner {
        self.registry.runner()
    }

    /// The import/export engine.
    pub fn engine(&self) -> &ImportExportEngine {
        self.registry.import_export()
    }

    /// Stores a small consistent data set: two credentials, one requirement
    /// and one form.
    pub fn populate(&self) -> CoreResult<()> {
        populate(self.runner(), &self.stores)
    }
}

impl std::ops::Deref for TestEnv {
    type Target = Stores;

    fn deref(&self) -> &Self::Target {
        &self.stores
    }
}

/// Stores the sample data set through `runner`.
pub fn populate(runner: &TransactionRunner, stores: &Stores) -> CoreResult<()> {
    runner.run_in_transaction(|tx| {
        stores
            .credentials
            .create(tx, &Credential::new("password", "password"))?;
        stores
            .credentials
            .create(tx, &Credential::new("otp", "totp"))?;
        stores.requirements.create(
            tx,
            &CredentialRequirement::new("default", ["password"]),
        )?;
        stores.forms.create(
            tx,
            &RegistrationForm::new("signup", "default", ["password"]),
        )?;
        Ok(())
    })
}

/// A temporary directory for file-backed stores.
#[derive(Debug)]
pub struct TempStore {
    dir: TempDir,
}

impl TempStore {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// The store directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens the directory with [`test_config`] and installs the fixture stores.
    ///
    /// Dropping the returned registry (and the stores) releases the directory lock.
    pub fn open(&self) -> (StoreRegistry, Stores) {
        let provider = FileProvider::open(self.path()).expect("Failed to open file store");
        let registry = StoreRegistry::new(Arc::new(provider), test_config());
        let stores = Stores::install(&registry);
        (registry, stores)
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idstore_core::CoreError;

    #[test]
    fn populate_creates_consistent_data() {
        let env = TestEnv::memory();
        env.populate().unwrap();
        assert_eq!(env.provider.committed_all().len(), 4);
    }

    #[test]
    fn form_needs_existing_requirement() {
        let env = TestEnv::memory();
        let err = env
            .runner()
            .run_in_transaction(|tx| {
                env.forms
                    .create(tx, &RegistrationForm::new("f", "missing", Vec::<String>::new()))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::ReferentialViolation { .. }));
    }
}
