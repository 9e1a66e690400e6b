//! Evidence packs, audit export and the hash-chained trail

use pretty_assertions::assert_eq;
use roster_core::prelude::*;
use roster_core::{run_scenarios, verify_chain, AuditRecord, SnapshotStatus, AUDIT_PACK_FILES};
use roster_evidence::Sha256Digest;
use roster_test_utils::{
    approver, ctx_for, dispatcher, engine, seeded_plan, standard_units, test_signer,
};

#[test]
fn publish_seals_an_evidence_pack() {
    let (engine, _) = engine();
    let ctx = dispatcher();
    let v1 = seeded_plan(&engine, &ctx, standard_units());
    let snapshot = engine.publish(&ctx, v1.id, Some("K-1"), None).unwrap();

    let pack = engine.snapshot_evidence(&ctx, snapshot.id).unwrap();
    assert_eq!(snapshot.evidence_ref.as_deref(), Some(pack.manifest.pack_id.as_str()));
    assert_eq!(snapshot.hashes.evidence.to_hex(), pack.manifest.overall_hash);
    assert_eq!(
        pack.files.keys().cloned().collect::<Vec<_>>(),
        vec!["input.json", "matrix.json", "output.json"]
    );

    let output: Vec<ScheduleUnit> = serde_json::from_slice(&pack.files["output.json"]).unwrap();
    assert_eq!(output, engine.plan_units(&ctx, v1.id).unwrap());
    assert_eq!(
        snapshot.hashes.output,
        Sha256Digest::compute_json(&output).unwrap()
    );

    let report = engine.verify_evidence(&pack.manifest, &pack.files);
    assert!(report.passed, "{report:?}");
    assert_eq!(report.signature_valid, Some(true));
}

#[test]
fn audit_pack_exports_and_verifies() {
    let (engine, _) = engine();
    let ctx = dispatcher();
    let v1 = seeded_plan(&engine, &ctx, standard_units());
    let snapshot = engine.publish(&ctx, v1.id, Some("K-1"), None).unwrap();

    let err = engine.export_audit_pack(&ctx, snapshot.id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let pack = engine.export_audit_pack(&approver(), snapshot.id).unwrap();
    let mut names: Vec<&str> = pack.files.keys().map(String::as_str).collect();
    let mut expected = AUDIT_PACK_FILES.to_vec();
    names.sort_unstable();
    expected.sort_unstable();
    assert_eq!(names, expected);

    let report = engine.verify_evidence(&pack.manifest, &pack.files);
    assert!(report.passed);
    assert!(report.failures.is_empty());

    let exported: roster_core::Snapshot =
        serde_json::from_slice(&pack.files["snapshot.json"]).unwrap();
    assert_eq!(exported.id, snapshot.id);
    assert_eq!(exported.status, SnapshotStatus::Active);

    let trail = engine.audit_trail(&ctx).unwrap();
    assert_eq!(trail.last().unwrap().action, "evidence.exported");
}

#[test]
fn tampered_file_is_named() {
    let (engine, _) = engine();
    let ctx = dispatcher();
    let v1 = seeded_plan(&engine, &ctx, standard_units());
    let snapshot = engine.publish(&ctx, v1.id, Some("K-1"), None).unwrap();
    let mut pack = engine.export_audit_pack(&approver(), snapshot.id).unwrap();

    pack.files
        .insert("assignments.json".to_string(), b"[]".to_vec());
    let report = engine.verify_evidence(&pack.manifest, &pack.files);
    assert!(!report.passed);
    assert_eq!(report.failures, vec!["assignments.json".to_string()]);

    pack.files.remove("anomalies.json");
    let report = engine.verify_evidence(&pack.manifest, &pack.files);
    assert_eq!(report.failures.len(), 2);
}

#[test]
fn foreign_key_fails_signature() {
    let (engine, _) = engine();
    let ctx = dispatcher();
    let v1 = seeded_plan(&engine, &ctx, standard_units());
    let snapshot = engine.publish(&ctx, v1.id, Some("K-1"), None).unwrap();
    let pack = engine.snapshot_evidence(&ctx, snapshot.id).unwrap();

    let other = RosterEngine::new(
        EngineConfig::default(),
        roster_evidence::EvidenceSigner::new(&[1u8; 32]).unwrap(),
    );
    let report = other.verify_evidence(&pack.manifest, &pack.files);
    assert!(!report.passed);
    assert_eq!(report.signature_valid, Some(false));
    assert!(report.failures.is_empty());

    assert!(pack.verify(&test_signer()).passed);
}

#[test]
fn audit_trail_chains_every_mutation() {
    let (engine, _) = engine();
    let ctx = dispatcher();
    let v1 = seeded_plan(&engine, &ctx, standard_units());
    engine.publish(&ctx, v1.id, Some("K-1"), None).unwrap();
    engine.lock_plan(&approver(), v1.id, "approved", true).unwrap();

    let trail = engine.audit_trail(&ctx).unwrap();
    let actions: Vec<&str> = trail.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(actions.first(), Some(&"plan.created"));
    assert!(actions.contains(&"snapshot.published"));
    assert_eq!(actions.last(), Some(&"plan.locked"));
    for pair in trail.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }

    engine.verify_audit_chain(&approver()).unwrap();
    let err = engine.verify_audit_chain(&ctx).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

#[test]
fn exported_audit_log_verifies_on_its_own() {
    let (engine, _) = engine();
    let acme = ctx_for("acme", "depot-1", Role::Dispatcher);
    let rival = ctx_for("rival", "depot-1", Role::Dispatcher);

    // interleave two tenants so their rows alternate in time
    let pa = seeded_plan(&engine, &acme, standard_units());
    let pb = seeded_plan(&engine, &rival, standard_units());
    let snapshot = engine.publish(&acme, pa.id, Some("K-1"), None).unwrap();
    engine.publish(&rival, pb.id, Some("K-1"), None).unwrap();
    engine
        .assign_driver(&rival, pb.id, &"T-005".into(), &"d9".into())
        .unwrap();
    engine.create_plan(&acme, Some(pa.id)).unwrap();

    let pack = engine
        .export_audit_pack(&ctx_for("acme", "depot-1", Role::Approver), snapshot.id)
        .unwrap();
    let exported: Vec<AuditRecord> = serde_json::from_slice(&pack.files["audit_log.json"]).unwrap();
    assert!(exported.iter().all(|r| r.tenant_id.as_str() == "acme"));
    assert_eq!(exported.first().map(|r| r.seq), Some(0));
    verify_chain(&exported).unwrap();

    let mut edited = exported.clone();
    edited[1].actor = "mallory".into();
    assert!(verify_chain(&edited).is_err());
    assert!(verify_chain(&exported[1..]).is_err());
}

#[test]
fn failed_call_leaves_no_audit_record() {
    let (engine, _) = engine();
    let ctx = dispatcher();
    let plan = seeded_plan(
        &engine,
        &ctx,
        vec![ScheduleUnit::new("T-003", 2).with_driver("d7")],
    );
    let before = engine.audit_trail(&ctx).unwrap().len();
    engine.publish(&ctx, plan.id, Some("K-1"), None).unwrap_err();
    assert_eq!(engine.audit_trail(&ctx).unwrap().len(), before);
}

#[test]
fn simulation_passes() {
    let report = run_scenarios(&EngineConfig::default(), test_signer()).unwrap();
    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.outcomes.len(), 4);
    assert!(report.generate_text().contains("=== Result: PASS ==="));
}
