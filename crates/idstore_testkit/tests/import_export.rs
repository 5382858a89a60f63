//! Dumps: round trips, restore order, legacy upgrades, checksums and hotfixes.

use idstore_core::{
    CoreError, ExportSelection, HotfixOptions, ImportOptions, ObjectStore, ScalarToArrayFix,
};
use idstore_testkit::prelude::*;
use idstore_codec::payload_to_json;
use proptest::prelude::*;
use serde_json::{json, Value};

fn export(env: &TestEnv) -> Vec<u8> {
    let mut out = Vec::new();
    env.engine().export(&mut out, &ExportSelection::All).unwrap();
    out
}

type Row = (String, i64, Option<String>, i64, u64, Value);

/// Committed rows with payloads compared as JSON, since a restore re-encodes them.
fn snapshot(env: &TestEnv) -> Vec<Row> {
    let mut rows: Vec<Row> = env
        .provider
        .committed_all()
        .into_iter()
        .map(|r| {
            let contents = payload_to_json(&r.contents).unwrap();
            (r.object_type, r.key, r.name, r.revision, r.updated_at, contents)
        })
        .collect();
    rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
    rows
}

#[test]
fn round_trip_into_empty_store() {
    let source = TestEnv::memory();
    source.populate().unwrap();
    // give one record a non-zero revision
    source
        .runner()
        .run_in_transaction(|tx| {
            let mut otp = source.credentials.get_by_name(tx, "otp")?.value;
            otp.configuration = "digits=6".into();
            source.credentials.update_by_name(tx, "otp", &otp)
        })
        .unwrap();

    let dump = export(&source);
    let target = TestEnv::memory();
    let summary = target
        .engine()
        .import(dump.as_slice(), &ImportOptions::default())
        .unwrap();

    assert_eq!(summary.records, 4);
    assert_eq!(snapshot(&source), snapshot(&target));

    let forms = target
        .runner()
        .run_in_transaction_ret(|tx| target.forms.get_all(tx))
        .unwrap();
    assert_eq!(forms[0].value.default_credential_requirement, "default");
}

#[test]
fn dump_lists_types_in_priority_order() {
    let env = TestEnv::memory();
    env.populate().unwrap();
    let dump: Value = serde_json::from_slice(&export(&env)).unwrap();

    let types: Vec<_> = dump["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["objectType"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        types,
        ["counter", "credential", "credentialRequirement", "registrationForm"]
    );
    assert_eq!(dump["formatVersion"], 1);
    assert!(dump["checksum"].is_string());
}

#[test]
fn selective_export_contains_only_selected_types() {
    let env = TestEnv::memory();
    env.populate().unwrap();
    let document = env
        .engine()
        .export_document(&ExportSelection::only(["credential"]))
        .unwrap();
    assert_eq!(document.entries.len(), 1);
    assert_eq!(document.record_count(), 2);
}

#[test]
fn referencing_types_restore_after_referenced_ones() {
    let env = TestEnv::memory();
    // entries deliberately listed with the referencing types first
    let dump = json!({
        "formatVersion": 1,
        "exportedAt": 0,
        "entries": [
            { "objectType": "registrationForm", "priority": 30, "records": [
                { "key": 4, "name": "signup", "contents": {
                    "name": "signup", "defaultCredentialRequirement": "default",
                    "credentialParams": ["password"], "groupParams": [] } }
            ]},
            { "objectType": "credentialRequirement", "priority": 20, "records": [
                { "key": 3, "name": "default", "contents": {
                    "name": "default", "description": "", "credentials": ["password"] } }
            ]},
            { "objectType": "credential", "priority": 10, "records": [
                { "key": 1, "name": "password", "contents": {
                    "name": "password", "typeId": "password", "configuration": "" } }
            ]}
        ]
    });
    let bytes = serde_json::to_vec(&dump).unwrap();

    let summary = env
        .engine()
        .import(bytes.as_slice(), &ImportOptions::default())
        .unwrap();
    assert_eq!(summary.records, 3);
}

#[test]
fn dangling_reference_fails_the_whole_import() {
    let env = TestEnv::memory();
    env.populate().unwrap();
    let before = snapshot(&env);

    let dump = json!({
        "formatVersion": 1,
        "exportedAt": 0,
        "entries": [
            { "objectType": "credentialRequirement", "priority": 20, "records": [
                { "key": 3, "name": "default", "contents": {
                    "name": "default", "description": "", "credentials": ["missing"] } }
            ]}
        ]
    });
    let bytes = serde_json::to_vec(&dump).unwrap();
    let err = env
        .engine()
        .import(bytes.as_slice(), &ImportOptions::default())
        .unwrap_err();

    assert!(matches!(err, CoreError::ReferentialViolation { .. }));
    assert_eq!(snapshot(&env), before);
}

#[test]
fn checksum_mismatch_is_a_serialization_error() {
    let env = TestEnv::memory();
    env.populate().unwrap();
    let mut dump: Value = serde_json::from_slice(&export(&env)).unwrap();
    dump["entries"][1]["records"][0]["name"] = json!("tampered");
    let bytes = serde_json::to_vec(&dump).unwrap();

    let target = TestEnv::memory();
    let err = target
        .engine()
        .import(bytes.as_slice(), &ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err, CoreError::Serialization { .. }));
    assert!(target.provider.committed_all().is_empty());
}

const AWKWARD_FLOATS: [f64; 5] = [
    1.0715660391465826e-75,
    -1.81996730402717e-179,
    -1.603964615428183e+143,
    0.1,
    2.2250738585072014e-308,
];

#[test]
fn float_payloads_survive_export_and_restore() {
    let source = TestEnv::memory();
    source.registry.register_raw_type("metric", 40);
    let records: Vec<Value> = AWKWARD_FLOATS
        .iter()
        .enumerate()
        .map(|(i, v)| json!({ "key": i + 1, "name": format!("m{i}"), "contents": { "v": v } }))
        .collect();
    let seed = json!({
        "formatVersion": 1,
        "exportedAt": 0,
        "entries": [{ "objectType": "metric", "priority": 40, "records": records }]
    });
    source
        .engine()
        .import(serde_json::to_vec(&seed).unwrap().as_slice(), &ImportOptions::default())
        .unwrap();

    let dump = export(&source);
    let info = source.engine().verify_document(dump.as_slice()).unwrap();
    assert!(info.checksummed);

    let target = TestEnv::memory();
    target.registry.register_raw_type("metric", 40);
    target
        .engine()
        .import(dump.as_slice(), &ImportOptions::default())
        .unwrap();
    assert_eq!(snapshot(&source), snapshot(&target));

    let restored: Vec<f64> = target
        .provider
        .committed("metric")
        .iter()
        .map(|r| payload_to_json(&r.contents).unwrap()["v"].as_f64().unwrap())
        .collect();
    assert_eq!(restored, AWKWARD_FLOATS.to_vec());
}

#[test]
fn largest_key_imports_without_overflow() {
    let env = TestEnv::memory();
    env.registry.register_raw_type("metric", 40);
    let dump = json!({
        "formatVersion": 1,
        "exportedAt": 0,
        "entries": [{ "objectType": "metric", "priority": 40, "records": [
            { "key": i64::MAX, "name": "last", "contents": {} }
        ]}]
    });
    env.engine()
        .import(serde_json::to_vec(&dump).unwrap().as_slice(), &ImportOptions::default())
        .unwrap();
    assert_eq!(env.provider.committed("metric")[0].key, i64::MAX);

    let err = env
        .runner()
        .run_in_transaction(|tx| {
            env.counters.create(tx, &Counter { name: "c".into(), value: 0 })?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Storage(idstore_storage::StorageError::KeysExhausted)
    ));
}

#[test]
fn newer_dump_format_is_rejected() {
    let env = TestEnv::memory();
    let bytes = br#"{"formatVersion": 7, "exportedAt": 0, "entries": []}"#;
    let err = env
        .engine()
        .import(&bytes[..], &ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedFormat { found: 7, .. }));
}

#[test]
fn legacy_dump_imports_after_upgrade() {
    let env = TestEnv::memory();
    let legacy = json!({
        "versionMajor": 1,
        "versionMinor": 9,
        "timestamp": 1400000000000u64,
        "contents": { "genericObjects": [
            { "type": "registrationForm", "name": "signup", "id": 12,
              "contents": "{\"name\":\"signup\",\"defaultCredentialRequirement\":\"default\",\"credentialParams\":[],\"groupParams\":[]}" },
            { "type": "credential", "name": "password", "id": 10,
              "contents": {"name": "password", "typeId": "password", "configuration": ""} },
            { "type": "credentialRequirement", "name": "default", "id": 11,
              "contents": {"name": "default", "description": "", "credentials": ["password"]} }
        ]}
    });
    let bytes = serde_json::to_vec(&legacy).unwrap();

    let info = env.engine().verify_document(bytes.as_slice()).unwrap();
    assert_eq!(info.source_version, 0);
    assert_eq!(info.exported_at, 1_400_000_000_000);
    assert!(info.entries.iter().all(|e| e.registered));

    let summary = env
        .engine()
        .import(bytes.as_slice(), &ImportOptions::default())
        .unwrap();
    assert_eq!(summary.source_version, 0);
    assert_eq!(summary.records, 3);

    let form = env
        .runner()
        .run_in_transaction_ret(|tx| env.forms.get_by_key(tx, 12))
        .unwrap();
    assert_eq!(form.value.name, "signup");
}

#[test]
fn hotfix_wraps_legacy_scalars_once() {
    let env = TestEnv::memory();
    env.registry.register_raw_type("legacyRequirement", 25);
    let dump = json!({
        "formatVersion": 1,
        "exportedAt": 0,
        "entries": [
            { "objectType": "legacyRequirement", "priority": 25, "records": [
                { "key": 1, "name": "a", "contents": {"credentials": "password"} },
                { "key": 2, "name": "b", "contents": {"credentials": ["otp"]} }
            ]}
        ]
    });
    let bytes = serde_json::to_vec(&dump).unwrap();
    env.engine()
        .import(bytes.as_slice(), &ImportOptions::default())
        .unwrap();

    let fix = ScalarToArrayFix::new("legacyRequirement", "credentials");
    let first = env.engine().apply_hotfix(&fix, HotfixOptions::default()).unwrap();
    assert_eq!((first.examined, first.changed), (2, 1));
    let after_first = snapshot(&env);

    let second = env.engine().apply_hotfix(&fix, HotfixOptions::default()).unwrap();
    assert_eq!(second.changed, 0);
    assert_eq!(snapshot(&env), after_first);

    let document = env
        .engine()
        .export_document(&ExportSelection::only(["legacyRequirement"]))
        .unwrap();
    assert_eq!(
        document.entries[0].records[0].contents,
        json!({"credentials": ["password"]})
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_consistent_schema_round_trips((credentials, requirements) in consistent_schema(6, 4)) {
        let source = TestEnv::memory();
        source.runner().run_in_transaction(|tx| {
            for credential in &credentials {
                source.credentials.create(tx, credential)?;
            }
            for requirement in &requirements {
                source.requirements.create(tx, requirement)?;
            }
            Ok(())
        }).unwrap();

        let dump = export(&source);
        let target = TestEnv::memory();
        target.engine().import(dump.as_slice(), &ImportOptions::default()).unwrap();

        prop_assert_eq!(snapshot(&source), snapshot(&target));
    }
}
