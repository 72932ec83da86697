//! Integration test: JSON snapshots of a planned model.
//!
//! Serializes query snapshots with serde_json and checks that field flags
//! hold: empty and default fields are left out, plan-only fields appear
//! only when asked for.

use meridian_core::query::SnapshotMode;
use meridian_core::test_utils::{Fixture, day};
use meridian_core::time::Duration;
use serde_json::{Value, json};

fn planned() -> Fixture {
    let mut f = Fixture::new();
    let wood = f.buffer("wood");
    let table = f.buffer("table");
    let saw = f.resource("saw", 1.0);
    let build = f.fixed_op("build table", Duration::days(2));
    f.consume(build, wood, 4.0);
    f.produce(build, table, 1.0);
    f.load(build, saw, 1.0);
    let d = f.demand("order", table, 2.0, day(10));
    f.place(build, 2.0, day(8));
    f.deliver(d, 2.0, day(10));
    f
}

#[test]
fn base_snapshot_leaves_out_plan_fields() {
    let f = planned();
    let snap = f.plan.snapshot(SnapshotMode::Base).unwrap();
    let v = serde_json::to_value(&snap).unwrap();

    assert!(v.get("problems").is_none());
    let buffers = v["buffers"].as_array().unwrap();
    assert!(buffers.iter().all(|b| b.get("flowplans").is_none()));

    let op = &v["operationplans"][0];
    assert_eq!(op["operation"], json!("build table"));
    assert_eq!(op["start"], json!("2024-01-06T00:00:00"));
    assert_eq!(op["end"], json!("2024-01-08T00:00:00"));
    assert!(op.get("status").is_none());
    assert!(op.get("feasible").is_none());
    assert!(op.get("criticality").is_none());
    assert!(op.get("demand").is_none());
}

#[test]
fn plan_snapshot_adds_timelines_and_problems() {
    let f = planned();
    let snap = f.plan.snapshot(SnapshotMode::Plan).unwrap();
    let v = serde_json::to_value(&snap).unwrap();

    let wood = v["buffers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["item"] == json!("wood"))
        .unwrap();
    let rows = wood["flowplans"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quantity"], json!(-8.0));
    assert_eq!(rows[0]["onhand"], json!(-8.0));

    let saw = &v["resources"][0];
    assert_eq!(saw["loadplans"].as_array().unwrap().len(), 2);

    let order = &v["demands"][0];
    assert_eq!(order["deliveries"].as_array().unwrap().len(), 1);

    let problems = v["problems"].as_array().unwrap();
    assert!(problems.iter().any(|p| p["kind"] == json!("material shortage")
        && p["owner"] == json!("wood @ plant")));
    assert!(!problems.iter().any(|p| p["owner"] == json!("order")));

    let delivery = v["operationplans"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["demand"] == json!("order"))
        .unwrap();
    assert_eq!(delivery["criticality"], json!(0.0));
    assert_eq!(delivery["delay_days"], json!(0.0));
}

#[test]
fn snapshot_is_stable_across_builds() {
    let a = serde_json::to_string(&planned().plan.snapshot(SnapshotMode::Plan).unwrap()).unwrap();
    let b = serde_json::to_string(&planned().plan.snapshot(SnapshotMode::Plan).unwrap()).unwrap();
    assert_eq!(a, b);
    let parsed: Value = serde_json::from_str(&a).unwrap();
    assert_eq!(parsed["name"], json!("plan"));
}
