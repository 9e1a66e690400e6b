//! Evidence round-trip properties
//!
//! verify(build(F), F) passes for any F, and flipping one byte of one file
//! fails exactly that file.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use roster_evidence::{build_manifest, verify, verify_signed, EvidenceManifest, EvidenceSigner};

fn signer() -> EvidenceSigner {
    EvidenceSigner::new(b"evidence-test-signing-key-000001").unwrap()
}

fn file_set() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(".{1,16}", prop::collection::vec(any::<u8>(), 0..64), 1..6)
}

proptest! {
    #[test]
    fn prop_built_manifest_always_verifies(files in file_set()) {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 4, 30, 0).unwrap();
        let manifest = build_manifest("pack", &files, &signer(), at).unwrap();
        let report = verify_signed(&manifest, &files, &signer());
        prop_assert!(report.passed);
        prop_assert!(report.failures.is_empty());
    }

    #[test]
    fn prop_single_byte_flip_fails_exactly_that_file(
        files in file_set(),
        pick in any::<prop::sample::Index>(),
        offset in any::<prop::sample::Index>(),
    ) {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 4, 30, 0).unwrap();
        let manifest = build_manifest("pack", &files, &signer(), at).unwrap();

        let mut tampered = files.clone();
        let name = tampered.keys().nth(pick.index(tampered.len())).unwrap().clone();
        let bytes = tampered.get_mut(&name).unwrap();
        if bytes.is_empty() {
            bytes.push(0);
        } else {
            let i = offset.index(bytes.len());
            bytes[i] ^= 0x01;
        }

        let report = verify(&manifest, &tampered);
        prop_assert!(!report.passed);
        prop_assert_eq!(report.failures, vec![name]);
    }
}

#[test]
fn timestamped_file_name_round_trips() {
    let mut files = BTreeMap::new();
    files.insert("roster_2026-03-02T06:00.json".to_string(), b"[1,2]".to_vec());
    files.insert("a:b:c".to_string(), b"x".to_vec());
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
    let manifest = build_manifest("pack-ts", &files, &signer(), at).unwrap();

    let parsed = EvidenceManifest::from_json(&manifest.to_json_pretty().unwrap()).unwrap();
    let report = verify_signed(&parsed, &files, &signer());
    assert!(report.passed, "{report:?}");
    assert_eq!(report.overall_hash_valid, Some(true));
}

#[test]
fn manifest_json_shape_round_trips() {
    let mut files = BTreeMap::new();
    files.insert("snapshot.json".to_string(), b"{\"id\":1}".to_vec());
    let at = Utc.with_ymd_and_hms(2026, 1, 5, 4, 30, 0).unwrap();
    let manifest = build_manifest("pack-9", &files, &signer(), at).unwrap();

    let json = manifest.to_json_pretty().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    for expected in ["pack_id", "generated_at", "files", "overall_hash", "signature"] {
        assert!(keys.contains(&expected), "missing {expected}");
    }
    assert_eq!(keys.len(), 5);

    let parsed = EvidenceManifest::from_json(&json).unwrap();
    assert_eq!(parsed, manifest);
    assert!(verify_signed(&parsed, &files, &signer()).passed);
}
