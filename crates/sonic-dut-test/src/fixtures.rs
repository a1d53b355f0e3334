//! Test fixtures for platform verification
//!
//! A small reference platform: two fan drawers, two PSUs (one with its own
//! fan), chassis and PSU thermals, and one transceiver. The STATE_DB
//! contents and the entity MIB snapshot the agent would expose for them
//! are kept side by side so a test can break either one.

use sonic_dut_common::{record, table_key, DbId, EntityMibRecord, EntitySnapshot, Record};

use crate::MockDut;

/// Identifier the reference snapshot assigns to the transceiver.
pub const TRANSCEIVER_ID: i64 = 1_000;

pub const DRAWER1_ID: i64 = 501_000_000;
pub const DRAWER2_ID: i64 = 502_000_000;
pub const FAN1_ID: i64 = 501_020_020;
pub const FAN1_TACH_ID: i64 = 501_030_020;
pub const FAN2_ID: i64 = 502_020_020;
pub const PSU1_ID: i64 = 601_000_000;
pub const PSU2_ID: i64 = 602_000_000;
pub const PSU1_FAN_ID: i64 = 601_020_020;
pub const PSU1_FAN_TACH_ID: i64 = 601_030_020;
pub const ASIC_THERMAL_ID: i64 = 200_100_001;

/// Ports named `Ethernet0`, `Ethernet4`, ...
pub fn port_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Ethernet{}", i * 4)).collect()
}

fn entity_info(parent: &str, position: u32) -> Record {
    record! {
        "parent_name" => parent,
        "position_in_parent" => position,
    }
}

/// STATE_DB rows of the reference platform.
pub fn platform_state_db() -> Vec<(String, Record)> {
    let mut rows = vec![
        (
            table_key("FAN_DRAWER_INFO", "drawer1"),
            record! { "serial" => "DRW001", "model" => "MTEF-FANF-A", "is_replaceable" => "True" },
        ),
        (
            table_key("FAN_DRAWER_INFO", "drawer2"),
            record! { "serial" => "N/A", "model" => "N/A", "is_replaceable" => "True" },
        ),
        (
            table_key("FAN_INFO", "fan1"),
            record! { "speed" => "60", "serial" => "FAN001", "model" => "None", "is_replaceable" => "False" },
        ),
        (
            table_key("FAN_INFO", "fan2"),
            record! { "speed" => "N/A", "is_replaceable" => "False" },
        ),
        (
            table_key("FAN_INFO", "psu1_fan1"),
            record! { "speed" => "45", "is_replaceable" => "False" },
        ),
        (
            table_key("PSU_INFO", "PSU 1"),
            record! {
                "presence" => "true",
                "status" => "true",
                "serial" => "PSU001",
                "model" => "MTEF-PSF-AC-A",
                "is_replaceable" => "True",
                "temp" => "31.5",
                "power" => "102.4",
                "current" => "8.5",
                "voltage" => "12.1",
            },
        ),
        (
            table_key("PSU_INFO", "PSU 2"),
            record! {
                "presence" => "true",
                "status" => "true",
                "serial" => "PSU002",
                "model" => "MTEF-PSF-AC-A",
                "is_replaceable" => "True",
                "temp" => "30.0",
                "power" => "98.0",
                "current" => "8.1",
                "voltage" => "N/A",
            },
        ),
        (
            table_key("TEMPERATURE_INFO", "ASIC"),
            record! { "temperature" => "45.0" },
        ),
        (
            table_key("TEMPERATURE_INFO", "PSU 1 Temp"),
            record! { "temperature" => "31.5" },
        ),
        (
            table_key("TEMPERATURE_INFO", "Gearbox"),
            record! { "temperature" => "40.0" },
        ),
        (
            table_key("TRANSCEIVER_INFO", "Ethernet0"),
            record! {
                "serial" => "MT1234FT00001",
                "model" => "MFA1A00-C003",
                "hardware_rev" => "A2",
                "manufacturer" => "Mellanox",
                "is_replaceable" => "True",
            },
        ),
    ];

    // Gearbox has no PHYSICAL_ENTITY_INFO row and is not exposed.
    let placement = [
        ("drawer1", "chassis 1", 1),
        ("drawer2", "chassis 1", 2),
        ("fan1", "drawer1", 1),
        ("fan2", "drawer2", 1),
        ("psu1_fan1", "PSU 1", 1),
        ("PSU 1", "chassis 1", 1),
        ("PSU 2", "chassis 1", 2),
        ("ASIC", "chassis 1", 1),
        ("PSU 1 Temp", "PSU 1", 1),
    ];
    for (name, parent, position) in placement {
        rows.push((
            table_key("PHYSICAL_ENTITY_INFO", name),
            entity_info(parent, position),
        ));
    }
    rows
}

/// A unit row (drawer, fan, PSU) with empty version and vendor fields.
pub fn unit_row(
    name: &str,
    contained_in: i64,
    class: i64,
    parent_rel_pos: i64,
    serial: &str,
    model: &str,
    is_fru: i64,
) -> EntityMibRecord {
    EntityMibRecord {
        descr: name.to_string(),
        contained_in,
        class,
        parent_rel_pos,
        name: name.to_string(),
        serial: serial.to_string(),
        model_name: model.to_string(),
        is_fru,
        ..Default::default()
    }
}

/// A sensor row: class 8, not replaceable.
pub fn sensor_row(name: &str, contained_in: i64, parent_rel_pos: i64) -> EntityMibRecord {
    EntityMibRecord {
        descr: name.to_string(),
        contained_in,
        class: 8,
        parent_rel_pos,
        name: name.to_string(),
        is_fru: 2,
        ..Default::default()
    }
}

/// The entity MIB snapshot matching [`platform_state_db`].
pub fn platform_snapshot() -> EntitySnapshot {
    let mut snapshot = EntitySnapshot::new();
    snapshot.insert(
        1,
        EntityMibRecord {
            descr: "MSN2700".to_string(),
            contained_in: 0,
            class: 3,
            parent_rel_pos: -1,
            name: "chassis 1".to_string(),
            is_fru: 2,
            ..Default::default()
        },
    );

    snapshot.insert(DRAWER1_ID, unit_row("drawer1", 1, 5, 1, "DRW001", "MTEF-FANF-A", 1));
    snapshot.insert(DRAWER2_ID, unit_row("drawer2", 1, 5, 2, "", "", 1));
    snapshot.insert(FAN1_ID, unit_row("fan1", DRAWER1_ID, 7, 1, "FAN001", "", 2));
    snapshot.insert(FAN1_TACH_ID, sensor_row("tachometers for fan1", FAN1_ID, 1));
    snapshot.insert(FAN2_ID, unit_row("fan2", DRAWER2_ID, 7, 1, "", "", 2));

    snapshot.insert(PSU1_ID, unit_row("PSU 1", 1, 6, 1, "PSU001", "MTEF-PSF-AC-A", 1));
    snapshot.insert(PSU1_FAN_ID, unit_row("psu1_fan1", PSU1_ID, 7, 1, "", "", 2));
    snapshot.insert(
        PSU1_FAN_TACH_ID,
        sensor_row("tachometers for psu1_fan1", PSU1_FAN_ID, 1),
    );
    for (slot, label) in [(1, "Temperature"), (2, "Power"), (3, "Current"), (4, "Voltage")] {
        snapshot.insert(
            PSU1_ID + slot * 1_000,
            sensor_row(&format!("{} for PSU 1", label), PSU1_ID, slot),
        );
    }

    snapshot.insert(PSU2_ID, unit_row("PSU 2", 1, 6, 2, "PSU002", "MTEF-PSF-AC-A", 1));
    // PSU 2 reports no voltage.
    for (slot, label) in [(1, "Temperature"), (2, "Power"), (3, "Current")] {
        snapshot.insert(
            PSU2_ID + slot * 1_000,
            sensor_row(&format!("{} for PSU 2", label), PSU2_ID, slot),
        );
    }

    snapshot.insert(ASIC_THERMAL_ID, sensor_row("ASIC", 200_000_000, 1));

    snapshot.insert(
        TRANSCEIVER_ID,
        EntityMibRecord {
            descr: "QSFP28 Passive Copper Cable".to_string(),
            contained_in: 1,
            class: 10,
            parent_rel_pos: -1,
            name: "Ethernet0".to_string(),
            hw_ver: "A2".to_string(),
            serial: "MT1234FT00001".to_string(),
            mfg_name: "Mellanox".to_string(),
            model_name: "MFA1A00-C003".to_string(),
            is_fru: 1,
            ..Default::default()
        },
    );
    let offsets = [1, 2, 11, 21, 31, 41, 12, 22, 32, 42, 13, 23, 33, 43];
    for (i, offset) in offsets.iter().enumerate() {
        snapshot.insert(
            TRANSCEIVER_ID + offset,
            sensor_row(
                &format!("DOM sensor {} for Ethernet0", offset),
                TRANSCEIVER_ID,
                i as i64 + 1,
            ),
        );
    }
    snapshot
}

/// Loads the reference platform into `dut`: STATE_DB rows and a snapshot
/// that matches them.
pub fn load_platform(dut: &MockDut) {
    for (key, record) in platform_state_db() {
        dut.set_record(DbId::StateDb, &key, record);
    }
    dut.set_snapshot(platform_snapshot());
}

/// Sets the STATE_DB `supported_speeds` of `port`.
pub fn set_supported_speeds(dut: &MockDut, port: &str, speeds: &[&str]) {
    dut.set_field(
        DbId::StateDb,
        &table_key("PORT_TABLE", port),
        "supported_speeds",
        &speeds.join(","),
    );
}
