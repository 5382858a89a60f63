//! Object stores, referential hooks and cache coherence.

use idstore_core::{CoreError, HookOutcome, ObjectRef, ObjectStore, Stored, Transaction};
use idstore_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

#[test]
fn objecting_hook_blocks_delete_and_keeps_record() {
    let env = TestEnv::memory();
    let key = env
        .runner()
        .run_in_transaction_ret(|tx| {
            env.credentials
                .create(tx, &Credential::new("password", "password"))
        })
        .unwrap();
    env.credentials.add_removal_handler(
        "audit",
        Box::new(|_: &Transaction, _: &Stored<Credential>| {
            Ok(HookOutcome::block("always objects"))
        }),
    );

    let err = env
        .runner()
        .run_in_transaction(|tx| env.credentials.delete_by_key(tx, key))
        .unwrap_err();
    match err {
        CoreError::ReferentialViolation {
            object_type,
            object,
            referenced_by,
            reason,
        } => {
            assert_eq!(object_type, "credential");
            assert_eq!(object, ObjectRef::Name("password".into()));
            assert_eq!(referenced_by, "audit");
            assert_eq!(reason, "always objects");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let found = env
        .runner()
        .run_in_transaction_ret(|tx| env.credentials.get_by_key(tx, key))
        .unwrap();
    assert_eq!(found.value.name, "password");
}

#[test]
fn referenced_objects_cannot_be_removed() {
    let env = TestEnv::memory();
    env.populate().unwrap();

    let err = env
        .runner()
        .run_in_transaction(|tx| env.requirements.delete_by_name(tx, "default"))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::ReferentialViolation { ref referenced_by, .. } if referenced_by == "registrationForm"
    ));

    let err = env
        .runner()
        .run_in_transaction(|tx| env.credentials.delete_by_name(tx, "password"))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::ReferentialViolation { ref referenced_by, .. } if referenced_by == "credentialRequirement"
    ));

    // unreferenced credential goes away
    env.runner()
        .run_in_transaction(|tx| env.credentials.delete_by_name(tx, "otp"))
        .unwrap();
}

#[test]
fn removal_hooks_see_the_current_transaction() {
    let env = TestEnv::memory();
    env.populate().unwrap();

    // dropping the form first in the same unit of work frees the requirement
    env.runner()
        .run_in_transaction(|tx| {
            env.forms.delete_by_name(tx, "signup")?;
            env.requirements.delete_by_name(tx, "default")?;
            env.credentials.delete_by_name(tx, "password")
        })
        .unwrap();
    assert_eq!(env.provider.committed_all().len(), 1);
}

#[test]
fn renaming_a_used_requirement_is_blocked() {
    let env = TestEnv::memory();
    env.populate().unwrap();

    let err = env
        .runner()
        .run_in_transaction(|tx| {
            env.requirements.update_by_name(
                tx,
                "default",
                &CredentialRequirement::new("renamed", ["password"]),
            )
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::ReferentialViolation { .. }));

    // content changes without a rename are fine
    env.runner()
        .run_in_transaction(|tx| {
            env.requirements.update_by_name(
                tx,
                "default",
                &CredentialRequirement::new("default", ["password", "otp"]),
            )
        })
        .unwrap();
}

#[test]
fn duplicate_names_are_rejected() {
    let env = TestEnv::memory();
    env.populate().unwrap();

    let err = env
        .runner()
        .run_in_transaction(|tx| {
            env.credentials
                .create(tx, &Credential::new("password", "password"))
                .map(|_| ())
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { .. }));
}

#[test]
fn updates_bump_the_revision() {
    let env = TestEnv::memory();
    env.populate().unwrap();

    let before = env
        .runner()
        .run_in_transaction_ret(|tx| env.credentials.get_by_name(tx, "otp"))
        .unwrap();
    let mut changed = before.value.clone();
    changed.configuration = "digits=8".into();
    env.runner()
        .run_in_transaction(|tx| env.credentials.update_by_key(tx, before.key, &changed))
        .unwrap();

    let after = env
        .runner()
        .run_in_transaction_ret(|tx| env.credentials.get_by_name(tx, "otp"))
        .unwrap();
    assert_eq!(after.revision, before.revision + 1);
    assert_eq!(after.value, changed);
}

#[test]
fn cached_reads_never_go_back_in_time() {
    const WRITES: usize = 200;
    let env = TestEnv::memory();
    env.runner()
        .run_in_transaction(|tx| {
            env.credentials.create(
                tx,
                &Credential {
                    name: "password".into(),
                    type_id: "password".into(),
                    configuration: "0".into(),
                },
            )?;
            Ok(())
        })
        .unwrap();

    let published = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let floor = published.load(Ordering::SeqCst);
                    let seen: usize = env
                        .runner()
                        .run_in_transaction_ret(|tx| {
                            Ok(env.credentials.get_by_name(tx, "password")?.value)
                        })
                        .unwrap()
                        .configuration
                        .parse()
                        .unwrap();
                    assert!(seen >= floor, "read version {seen} after {floor} was published");
                }
            });
        }

        for version in 1..=WRITES {
            env.runner()
                .run_in_transaction(|tx| {
                    let mut credential = env.credentials.get_by_name(tx, "password")?.value;
                    credential.configuration = version.to_string();
                    env.credentials.update_by_name(tx, "password", &credential)
                })
                .unwrap();
            published.store(version, Ordering::SeqCst);
        }
        done.store(true, Ordering::SeqCst);
    });

    assert!(env.credentials.stats().hits > 0);
}

#[test]
fn rolled_back_writes_do_not_reach_the_cache() {
    let env = TestEnv::memory();
    env.populate().unwrap();

    let _ = env.runner().run_in_transaction(|tx| {
        let mut otp = env.credentials.get_by_name(tx, "otp")?.value;
        otp.configuration = "uncommitted".into();
        env.credentials.update_by_name(tx, "otp", &otp)?;
        Err(CoreError::aborted("discard"))
    });

    let otp = env
        .runner()
        .run_in_transaction_ret(|tx| env.credentials.get_by_name(tx, "otp"))
        .unwrap();
    assert_eq!(otp.value.configuration, "");
}
