//! Property-based test generators using proptest.

use crate::fixtures::{Credential, CredentialRequirement};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Strategy for object names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for credentials with arbitrary names.
pub fn credential_strategy() -> impl Strategy<Value = Credential> {
    (
        name_strategy(),
        prop::sample::select(vec!["password", "totp", "certificate", "sms"]),
        "[ -~]{0,32}",
    )
        .prop_map(|(name, type_id, configuration)| Credential {
            name,
            type_id: type_id.to_string(),
            configuration,
        })
}

/// Strategy for up to `max` credentials with distinct names.
pub fn unique_credentials(max: usize) -> impl Strategy<Value = Vec<Credential>> {
    prop::collection::vec(credential_strategy(), 0..=max).prop_map(|credentials| {
        let mut seen = BTreeSet::new();
        credentials
            .into_iter()
            .filter(|c| seen.insert(c.name.clone()))
            .collect()
    })
}

/// Strategy for a set of credentials together with requirements that only
/// reference those credentials.
pub fn consistent_schema(
    max_credentials: usize,
    max_requirements: usize,
) -> impl Strategy<Value = (Vec<Credential>, Vec<CredentialRequirement>)> {
    unique_credentials(max_credentials).prop_flat_map(move |credentials| {
        let names: Vec<String> = credentials.iter().map(|c| c.name.clone()).collect();
        let requirement = (
            name_strategy(),
            prop::sample::subsequence(names.clone(), 0..=names.len()),
        )
            .prop_map(|(name, credentials)| CredentialRequirement::new(name, credentials));
        (
            Just(credentials),
            prop::collection::vec(requirement, 0..=max_requirements).prop_map(|requirements| {
                let mut seen = BTreeSet::new();
                requirements
                    .into_iter()
                    .filter(|r| seen.insert(r.name.clone()))
                    .collect::<Vec<_>>()
            }),
        )
    })
}

/// Strategy for JSON objects of bounded depth, as found in record payloads.
pub fn json_object_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::String),
    ];
    let value = leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    });
    prop::collection::btree_map("[a-z]{1,8}", value, 0..6)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>()))
}
