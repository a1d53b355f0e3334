//! Physical entity verification integration tests
//!
//! Run the verifier over the reference platform, then break STATE_DB or
//! the snapshot and check the exact identifiers reported.

use std::time::Duration;

use pretty_assertions::assert_eq;
use sonic_dut_common::{record, DbId, DutError};
use sonic_dut_test::{
    load_platform, platform_snapshot, MockDut, MockPsuController, ASIC_THERMAL_ID, DRAWER1_ID,
    FAN1_ID, FAN1_TACH_ID, FAN2_ID, PSU1_ID, PSU2_ID, TRANSCEIVER_ID,
};
use sonic_platform_verify::config::{PsuConfig, VerifyConfig};
use sonic_platform_verify::{
    power_off_and_verify_retraction, EntityTable, EntityVerifier, VerificationReport,
};

fn platform() -> MockDut {
    let dut = MockDut::default();
    load_platform(&dut);
    dut
}

fn mismatch_ids(report: &VerificationReport) -> Vec<(i64, &'static str)> {
    report.mismatches.iter().map(|m| (m.id, m.field)).collect()
}

#[tokio::test]
async fn test_reference_platform_verifies() {
    let dut = platform();
    let report = EntityVerifier::new(&dut, &dut)
        .verify_all()
        .await
        .expect("verification failed");

    assert!(report.is_ok(), "unexpected findings: {:?}", report);
    assert_eq!(report.verified, EntityTable::ALL.to_vec());
    assert!(report.skipped.is_empty());
    // 2 drawers, 3 fans, 2 PSUs, 2 thermals, 1 transceiver.
    assert_eq!(report.entities, 10);
    // Drawers 2, fans 3 + 2 tachometers, PSUs 2 x 5, ASIC thermal 1,
    // transceiver 1 + 14 DOM sensors.
    assert_eq!(report.checked, 2 + 5 + 10 + 1 + 15);
    report.into_result().expect("report should pass");
}

#[tokio::test]
async fn test_field_mismatches_are_reported_by_identifier() {
    let dut = platform();
    let mut snapshot = platform_snapshot();
    if let Some(row) = snapshot.get_mut(&FAN1_ID) {
        row.serial = "FAN999".to_string();
        row.parent_rel_pos = 2;
    }
    if let Some(row) = snapshot.get_mut(&ASIC_THERMAL_ID) {
        row.class = 1;
    }
    snapshot.remove(&FAN1_TACH_ID);
    dut.set_snapshot(snapshot);

    let report = EntityVerifier::new(&dut, &dut).verify_all().await.unwrap();
    let mut ids = mismatch_ids(&report);
    ids.sort();
    assert_eq!(
        ids,
        vec![
            (ASIC_THERMAL_ID, "entPhysClass"),
            (FAN1_ID, "entPhyParentRelPos"),
            (FAN1_ID, "entPhysSerialNum"),
            (FAN1_TACH_ID, "row"),
        ]
    );

    let err = report.into_result().unwrap_err();
    let DutError::EntityMismatch { mismatches } = err else {
        panic!("expected an entity mismatch");
    };
    assert_eq!(mismatches.len(), 4);
    assert!(mismatches
        .iter()
        .any(|m| m == "fan1 [501020020]: entPhysSerialNum expected 'FAN001', got 'FAN999'"));
}

/// Moving the PSU base moves every PSU, PSU sensor, PSU fan and PSU fan
/// tachometer identifier with it.
#[tokio::test]
async fn test_configured_numbering_shifts_psu_identifiers() {
    const SHIFT: i64 = 100_000_000;
    let in_psu_range = |id: i64| (600_000_000..700_000_000).contains(&id);

    let dut = platform();
    let shifted = platform_snapshot()
        .into_iter()
        .map(|(id, mut row)| {
            if in_psu_range(row.contained_in) {
                row.contained_in += SHIFT;
            }
            let id = if in_psu_range(id) { id + SHIFT } else { id };
            (id, row)
        })
        .collect();
    dut.set_snapshot(shifted);

    let mut config = VerifyConfig::default();
    config.numbering.psu_base = 700_000_000;
    let report = EntityVerifier::from_config(&dut, &dut, &config)
        .verify_all()
        .await
        .unwrap();
    assert!(report.is_ok(), "unexpected findings: {:?}", report);

    // The stock scheme no longer finds the PSU rows.
    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Psu])
        .await
        .unwrap();
    let ids = mismatch_ids(&report);
    assert!(ids.contains(&(PSU1_ID, "row")));
    assert!(ids.contains(&(PSU2_ID, "row")));
    assert!(report.mismatches.iter().all(|m| m.actual == "missing"));
}

/// Only the requested tables are checked, but parents in other tables
/// still resolve.
#[tokio::test]
async fn test_verify_selected_tables() {
    let dut = platform();
    let mut snapshot = platform_snapshot();
    snapshot.remove(&DRAWER1_ID);
    dut.set_snapshot(snapshot);

    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Fan])
        .await
        .unwrap();
    assert!(report.is_ok(), "unexpected findings: {:?}", report);
    assert_eq!(report.verified, vec![EntityTable::Fan]);
    assert_eq!(report.entities, 3);
}

#[tokio::test]
async fn test_empty_table_is_skipped() {
    let dut = platform();
    dut.remove_key(DbId::StateDb, "TRANSCEIVER_INFO|Ethernet0");

    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Transceiver, EntityTable::FanDrawer])
        .await
        .unwrap();
    assert_eq!(report.skipped, vec![EntityTable::Transceiver]);
    assert_eq!(report.verified, vec![EntityTable::FanDrawer]);
    assert!(report.is_ok());
}

/// An absent PSU must have no rows at all.
#[tokio::test]
async fn test_absent_psu_rows_must_be_gone() {
    let dut = platform();
    dut.set_field(DbId::StateDb, "PSU_INFO|PSU 2", "presence", "false");

    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Psu])
        .await
        .unwrap();
    let ids: Vec<i64> = report.mismatches.iter().map(|m| m.id).collect();
    // The voltage row was never there.
    assert_eq!(ids, vec![PSU2_ID, PSU2_ID + 1_000, PSU2_ID + 2_000, PSU2_ID + 3_000]);
    assert!(report
        .mismatches
        .iter()
        .all(|m| m.field == "row" && m.actual == "present"));

    let mut snapshot = platform_snapshot();
    snapshot.retain(|id, _| !(PSU2_ID..PSU2_ID + 5_000).contains(id));
    dut.set_snapshot(snapshot);
    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Psu])
        .await
        .unwrap();
    assert!(report.is_ok(), "unexpected findings: {:?}", report);
}

#[tokio::test]
async fn test_transceiver_missing_from_snapshot() {
    let dut = platform();
    let mut snapshot = platform_snapshot();
    snapshot.remove(&TRANSCEIVER_ID);
    dut.set_snapshot(snapshot);

    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Transceiver])
        .await
        .unwrap();
    assert_eq!(mismatch_ids(&report), vec![(0, "row")]);
    assert_eq!(report.mismatches[0].owner, "Ethernet0");
}

/// A fan without a resolvable parent is reported and the rest of the
/// inventory is still verified.
#[tokio::test]
async fn test_unresolvable_parent_is_isolated() {
    let dut = platform();
    dut.set_field(DbId::StateDb, "PHYSICAL_ENTITY_INFO|fan2", "parent_name", "drawer9");

    let report = EntityVerifier::new(&dut, &dut).verify_all().await.unwrap();
    assert!(report.mismatches.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        &report.errors[0],
        DutError::InconsistentHierarchy { entity, .. } if entity == "fan2"
    ));
    assert_eq!(report.checked, 2 + 4 + 10 + 1 + 15);
}

/// Two fans claiming the same slot collide; neither is checked.
#[tokio::test]
async fn test_identifier_collision_is_reported() {
    let dut = platform();
    dut.set_field(DbId::StateDb, "PHYSICAL_ENTITY_INFO|fan2", "parent_name", "drawer1");
    let mut snapshot = platform_snapshot();
    snapshot.remove(&FAN2_ID);
    dut.set_snapshot(snapshot);

    let report = EntityVerifier::new(&dut, &dut)
        .verify(&[EntityTable::Fan])
        .await
        .unwrap();
    assert!(report.mismatches.is_empty());
    assert_eq!(report.errors.len(), 1);
    let message = report.errors[0].to_string();
    assert!(message.contains("fan1, fan2"), "{}", message);
    assert!(message.contains(&FAN1_ID.to_string()), "{}", message);
}

#[tokio::test]
async fn test_snapshot_failure_propagates() {
    let dut = platform();
    dut.fail_snapshot("timeout walking entPhysicalTable");

    let err = EntityVerifier::new(&dut, &dut).verify_all().await.unwrap_err();
    assert!(matches!(err, DutError::Snapshot { .. }));
}

/// Powering a PSU off withdraws its sensor rows while its own row stays.
#[tokio::test(start_paused = true)]
async fn test_psu_power_off_retracts_sensors() {
    let dut = platform();
    let mut retracted = platform_snapshot();
    for slot in 1..=4 {
        retracted.remove(&(PSU1_ID + slot * 1_000));
    }
    dut.then_snapshot(platform_snapshot());
    dut.then_snapshot(retracted);

    let pdu = MockPsuController::new(2)
        .attached_to(&dut)
        .with_power("2", false);
    let verifier = EntityVerifier::new(&dut, &dut);

    let outcome = power_off_and_verify_retraction(&pdu, &verifier, &PsuConfig::default())
        .await
        .expect("scenario failed");
    assert_eq!(outcome.psu_id, "1");
    assert_eq!(outcome.powered_on, vec!["2".to_string()]);
    // Retracted on the third poll.
    assert_eq!(dut.snapshot_fetches(), 3);
}

/// An empty slot and an unreadable PSU record do not stop the wait for
/// the powered-off PSU.
#[tokio::test(start_paused = true)]
async fn test_psu_retraction_judges_only_powered_off_psu() {
    let dut = platform();
    dut.set_record(
        DbId::StateDb,
        "PSU_INFO|PSU 3",
        record! { "presence" => "false", "status" => "false" },
    );
    dut.set_record(
        DbId::StateDb,
        "PHYSICAL_ENTITY_INFO|PSU 3",
        record! { "position_in_parent" => "3", "parent_name" => "chassis 1" },
    );
    dut.set_record(
        DbId::StateDb,
        "PSU_INFO|PSU 4",
        record! { "presence" => "true", "status" => "true" },
    );
    dut.set_record(
        DbId::StateDb,
        "PHYSICAL_ENTITY_INFO|PSU 4",
        record! { "position_in_parent" => "four", "parent_name" => "chassis 1" },
    );

    let mut retracted = platform_snapshot();
    for slot in 1..=4 {
        retracted.remove(&(PSU1_ID + slot * 1_000));
    }
    dut.then_snapshot(platform_snapshot());
    dut.then_snapshot(retracted);

    let pdu = MockPsuController::new(2).attached_to(&dut);
    let verifier = EntityVerifier::new(&dut, &dut);
    let outcome = power_off_and_verify_retraction(&pdu, &verifier, &PsuConfig::default())
        .await
        .expect("scenario failed");
    assert_eq!(outcome.psu_id, "1");
    assert_eq!(dut.snapshot_fetches(), 3);
}

/// A powered-off PSU that loses its own row fails at once.
#[tokio::test(start_paused = true)]
async fn test_psu_power_off_losing_base_row_fails() {
    let dut = platform();
    let mut snapshot = platform_snapshot();
    snapshot.remove(&PSU1_ID);
    dut.set_snapshot(snapshot);

    let pdu = MockPsuController::new(2).attached_to(&dut);
    let verifier = EntityVerifier::new(&dut, &dut);

    let err = power_off_and_verify_retraction(&pdu, &verifier, &PsuConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DutError::EntityMismatch { .. }));
    assert_eq!(dut.snapshot_fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_psu_sensors_never_retracted_times_out() {
    let dut = platform();
    let pdu = MockPsuController::new(2).attached_to(&dut);
    let verifier = EntityVerifier::new(&dut, &dut);
    let config = PsuConfig {
        retraction_timeout_secs: 40,
        ..PsuConfig::default()
    };

    let err = power_off_and_verify_retraction(&pdu, &verifier, &config)
        .await
        .unwrap_err();
    let DutError::ConvergenceTimeout { what, timeout, .. } = err else {
        panic!("expected a convergence timeout");
    };
    assert_eq!(what, "PSU sensor retraction");
    assert_eq!(timeout, Duration::from_secs(40));
}
