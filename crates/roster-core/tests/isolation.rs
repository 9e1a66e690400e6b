//! Tenant and site scoping

use std::sync::Arc;
use std::thread;

use roster_core::prelude::*;
use roster_test_utils::{ctx_for, engine, seeded_plan, standard_units};

#[test]
fn other_tenant_sees_nothing() {
    let (engine, _) = engine();
    let acme = ctx_for("acme", "depot-1", Role::Dispatcher);
    let rival = ctx_for("rival", "depot-1", Role::Admin);
    let v1 = seeded_plan(&engine, &acme, standard_units());
    let snapshot = engine.publish(&acme, v1.id, Some("K-1"), None).unwrap();

    assert_eq!(engine.plan(&rival, v1.id).unwrap_err().code(), ErrorCode::NotFound);
    assert_eq!(
        engine.snapshot(&rival, snapshot.id).unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(
        engine
            .assign_driver(&rival, v1.id, &"T-001".into(), &"d9".into())
            .unwrap_err()
            .code(),
        ErrorCode::NotFound
    );
    assert!(engine.plans(&rival).unwrap().is_empty());
    assert!(engine.audit_trail(&rival).unwrap().is_empty());
}

#[test]
fn sites_are_scoped_within_a_tenant() {
    let (engine, _) = engine();
    let north = ctx_for("acme", "north", Role::Dispatcher);
    let south = ctx_for("acme", "south", Role::Dispatcher);
    let v1 = seeded_plan(&engine, &north, standard_units());
    let session = engine
        .create_repair_session(&north, v1.id, Some("S-1"))
        .unwrap();

    assert_eq!(
        engine.repair_session(&south, session.id).unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(
        engine
            .create_repair_session(&south, v1.id, Some("S-1"))
            .unwrap_err()
            .code(),
        ErrorCode::NotFound
    );

    let own = seeded_plan(&engine, &south, standard_units());
    assert_eq!(own.version_number, 1);
}

#[test]
fn idempotency_keys_are_scoped_per_tenant() {
    let (engine, _) = engine();
    let a = ctx_for("acme", "depot-1", Role::Dispatcher);
    let b = ctx_for("globex", "depot-1", Role::Dispatcher);
    let pa = seeded_plan(&engine, &a, standard_units());
    let pb = seeded_plan(&engine, &b, standard_units());

    let sa = engine.publish(&a, pa.id, Some("SAME"), None).unwrap();
    let sb = engine.publish(&b, pb.id, Some("SAME"), None).unwrap();
    assert_ne!(sa.id, sb.id);
}

#[test]
fn blank_context_is_rejected() {
    let err = RequestContext::new("", "depot-1", Actor::new("dana", Role::Admin)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let (engine, _) = engine();
    let forged = RequestContext {
        tenant_id: "acme".into(),
        site_id: " ".into(),
        actor: Actor::new("dana", Role::Admin),
    };
    assert_eq!(
        engine.plans(&forged).unwrap_err().code(),
        ErrorCode::ValidationError
    );
}

#[test]
fn tenants_work_concurrently() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let workers: Vec<_> = ["acme", "globex", "initech", "umbrella"]
        .into_iter()
        .map(|tenant| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let ctx = ctx_for(tenant, "depot-1", Role::Dispatcher);
                let mut versions = Vec::new();
                for i in 0..5 {
                    let plan = seeded_plan(&engine, &ctx, standard_units());
                    engine
                        .publish(&ctx, plan.id, Some(format!("K-{i}").as_str()), None)
                        .unwrap();
                    versions.push(plan.version_number);
                }
                versions
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), vec![1, 2, 3, 4, 5]);
    }
    let acme = ctx_for("acme", "depot-1", Role::Dispatcher);
    assert_eq!(engine.plans(&acme).unwrap().len(), 5);
}
