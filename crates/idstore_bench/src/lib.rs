//! Benchmark utilities.

#![warn(missing_docs)]

use idstore_core::{CacheConfig, ObjectStore};
use idstore_testkit::{test_config, Credential, TestEnv};

/// Name of the `i`-th generated credential.
pub fn credential_name(i: usize) -> String {
    format!("credential-{i:05}")
}

/// Creates an in-memory environment holding `count` credentials.
pub fn populated_env(count: usize, cached: bool) -> TestEnv {
    let config = if cached {
        test_config()
    } else {
        test_config().cache(CacheConfig::disabled())
    };
    let env = TestEnv::with_config(config);
    env.runner()
        .run_in_transaction(|tx| {
            for i in 0..count {
                let mut credential = Credential::new(credential_name(i), "password");
                credential.configuration = "x".repeat(128);
                env.credentials.create(tx, &credential)?;
            }
            Ok(())
        })
        .expect("Failed to populate benchmark store");
    env
}
