//! Physical entity identifier derivation.
//!
//! The SNMP agent assigns every physical entity a sub-identifier computed
//! from its class, its position among siblings and its parent's
//! identifier. [`NumberingScheme`] holds the constants of that scheme and
//! the functions here compute, for one STATE_DB entity, the exact entity
//! MIB rows the agent is expected to expose (or to have withdrawn).
//!
//! Derivation is pure: it reads the [`EntityTree`] and never touches a
//! device.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use sonic_dut_common::{DutError, DutResult};

use crate::entity::{
    snmp_string, EntityKind, EntityTree, FruStatus, PhysicalClass, PhysicalEntity, PsuReadings,
};

/// Numbering constants of the entity MIB sub-identifier scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingScheme {
    /// Identifier of the chassis itself.
    pub chassis_id: i64,
    /// Container of chassis-level sensors.
    pub chassis_mgmt_id: i64,
    /// Offset of chassis thermals below `chassis_mgmt_id`.
    pub chassis_thermal_offset: i64,
    pub fan_drawer_base: i64,
    pub fan_drawer_multiplier: i64,
    pub fan_multiplier: i64,
    /// Offset of a fan's tachometer below the fan.
    pub tachometer_offset: i64,
    pub psu_base: i64,
    pub psu_multiplier: i64,
    pub psu_sensor_multiplier: i64,
    /// Offsets of transceiver DOM sensors below the transceiver, in
    /// sibling order.
    pub transceiver_sensor_offsets: Vec<i64>,
}

impl Default for NumberingScheme {
    fn default() -> Self {
        Self {
            chassis_id: 1,
            chassis_mgmt_id: 200_000_000,
            chassis_thermal_offset: 100_000,
            fan_drawer_base: 500_000_000,
            fan_drawer_multiplier: 1_000_000,
            fan_multiplier: 20_020,
            tachometer_offset: 10_000,
            psu_base: 600_000_000,
            psu_multiplier: 1_000_000,
            psu_sensor_multiplier: 1_000,
            transceiver_sensor_offsets: vec![1, 2, 11, 21, 31, 41, 12, 22, 32, 42, 13, 23, 33, 43],
        }
    }
}

/// The four PSU sensors, each with a fixed label and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PsuSensor {
    Temperature,
    Power,
    Current,
    Voltage,
}

impl PsuSensor {
    pub const ALL: [PsuSensor; 4] = [
        PsuSensor::Temperature,
        PsuSensor::Power,
        PsuSensor::Current,
        PsuSensor::Voltage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PsuSensor::Temperature => "Temperature",
            PsuSensor::Power => "Power",
            PsuSensor::Current => "Current",
            PsuSensor::Voltage => "Voltage",
        }
    }

    /// Slot below the PSU identifier; also the sibling position.
    pub fn slot(self) -> i64 {
        match self {
            PsuSensor::Temperature => 1,
            PsuSensor::Power => 2,
            PsuSensor::Current => 3,
            PsuSensor::Voltage => 4,
        }
    }

    /// Returns this sensor's reading.
    pub fn reading(self, readings: &PsuReadings) -> Option<&str> {
        match self {
            PsuSensor::Temperature => readings.temp.as_deref(),
            PsuSensor::Power => readings.power.as_deref(),
            PsuSensor::Current => readings.current.as_deref(),
            PsuSensor::Voltage => readings.voltage.as_deref(),
        }
    }
}

impl NumberingScheme {
    pub fn fan_drawer_id(&self, position: u32) -> i64 {
        self.fan_drawer_base + i64::from(position) * self.fan_drawer_multiplier
    }

    pub fn psu_id(&self, position: u32) -> i64 {
        self.psu_base + i64::from(position) * self.psu_multiplier
    }

    /// Identifier of a fan at `position` inside a container with id
    /// `container_id`.
    pub fn fan_id(&self, container_id: i64, position: u32) -> i64 {
        container_id + i64::from(position) * self.fan_multiplier
    }

    pub fn tachometer_id(&self, fan_id: i64) -> i64 {
        fan_id + self.tachometer_offset
    }

    pub fn psu_sensor_id(&self, psu_id: i64, sensor: PsuSensor) -> i64 {
        psu_id + sensor.slot() * self.psu_sensor_multiplier
    }

    pub fn chassis_thermal_id(&self, position: u32) -> i64 {
        self.chassis_mgmt_id + self.chassis_thermal_offset + i64::from(position)
    }

    /// DOM sensor identifiers of a transceiver, paired with their 1-based
    /// sibling position.
    pub fn transceiver_sensor_ids(&self, transceiver_id: i64) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.transceiver_sensor_offsets
            .iter()
            .enumerate()
            .map(move |(i, offset)| (i as i64 + 1, transceiver_id + offset))
    }
}

/// An entity MIB row the agent must expose, field by field.
///
/// `name` and `descr` are `None` where any non-empty value is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedEntity {
    pub id: i64,
    /// STATE_DB entity this row belongs to.
    pub owner: String,
    pub contained_in: i64,
    pub class: PhysicalClass,
    pub parent_rel_pos: i64,
    pub name: Option<String>,
    pub descr: Option<String>,
    pub hw_ver: String,
    pub fw_ver: String,
    pub sw_ver: String,
    pub serial: String,
    pub mfg_name: String,
    pub model_name: String,
    pub fru: FruStatus,
}

impl ExpectedEntity {
    /// A sensor row: no version, serial or vendor data, never replaceable.
    fn sensor(owner: &str, id: i64, contained_in: i64, parent_rel_pos: i64, name: Option<String>) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            contained_in,
            class: PhysicalClass::Sensor,
            parent_rel_pos,
            descr: name.clone(),
            name,
            hw_ver: String::new(),
            fw_ver: String::new(),
            sw_ver: String::new(),
            serial: String::new(),
            mfg_name: String::new(),
            model_name: String::new(),
            fru: FruStatus::NotReplaceable,
        }
    }

    /// A drawer, fan or PSU row carrying the entity's serial and model.
    fn unit(entity: &PhysicalEntity, id: i64, contained_in: i64, class: PhysicalClass, position: u32) -> Self {
        Self {
            id,
            owner: entity.name.clone(),
            contained_in,
            class,
            parent_rel_pos: i64::from(position),
            name: Some(entity.name.clone()),
            descr: Some(entity.name.clone()),
            hw_ver: String::new(),
            fw_ver: String::new(),
            sw_ver: String::new(),
            serial: snmp_string(entity.serial.as_deref()),
            mfg_name: String::new(),
            model_name: snmp_string(entity.model.as_deref()),
            fru: entity.fru,
        }
    }
}

/// What the entity MIB must contain at one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Present(ExpectedEntity),
    /// No row may exist at `id`.
    Absent {
        id: i64,
        owner: String,
        reason: String,
    },
}

impl Expectation {
    pub fn id(&self) -> i64 {
        match self {
            Expectation::Present(e) => e.id,
            Expectation::Absent { id, .. } => *id,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Expectation::Present(e) => &e.owner,
            Expectation::Absent { owner, .. } => owner,
        }
    }
}

/// Returns the identifier derived for `entity`.
///
/// `Ok(None)` means the entity has no positional identifier: transceivers
/// are matched by name and thermals off the chassis are not exposed.
pub fn expected_id(
    entity: &PhysicalEntity,
    tree: &EntityTree,
    scheme: &NumberingScheme,
) -> DutResult<Option<i64>> {
    let id = match &entity.kind {
        EntityKind::Chassis => scheme.chassis_id,
        EntityKind::FanDrawer => scheme.fan_drawer_id(entity.require_position()?),
        EntityKind::PowerSupply { .. } => scheme.psu_id(entity.require_position()?),
        EntityKind::Fan { .. } => fan_placement(entity, tree, scheme)?.0,
        EntityKind::Thermal if entity.on_chassis() => {
            scheme.chassis_thermal_id(entity.require_position()?)
        }
        EntityKind::Thermal | EntityKind::Transceiver { .. } => return Ok(None),
    };
    Ok(Some(id))
}

/// Returns `(fan_id, contained_in)`.
///
/// A fan directly on the chassis sits in a virtual drawer numbered by the
/// fan's own position but is reported as contained in the chassis.
fn fan_placement(
    fan: &PhysicalEntity,
    tree: &EntityTree,
    scheme: &NumberingScheme,
) -> DutResult<(i64, i64)> {
    let position = fan.require_position()?;
    let parent = tree.parent_of(fan)?;
    match parent.kind {
        EntityKind::Chassis => {
            let virtual_drawer = scheme.fan_drawer_id(position);
            Ok((scheme.fan_id(virtual_drawer, position), scheme.chassis_id))
        }
        EntityKind::FanDrawer => {
            let drawer = scheme.fan_drawer_id(parent.require_position()?);
            Ok((scheme.fan_id(drawer, position), drawer))
        }
        EntityKind::PowerSupply { .. } => {
            let psu = scheme.psu_id(parent.require_position()?);
            Ok((scheme.fan_id(psu, position), psu))
        }
        _ => Err(DutError::inconsistent_hierarchy(
            &fan.name,
            format!("fan parent '{}' is a {}", parent.name, parent.kind.label()),
        )),
    }
}

/// Derives every entity MIB expectation for one STATE_DB entity.
///
/// The chassis row and transceivers yield nothing here: the chassis row is
/// owned by the chassis MIB and transceiver identifiers come from the
/// snapshot, see [`derive_transceiver`].
pub fn derive(
    entity: &PhysicalEntity,
    tree: &EntityTree,
    scheme: &NumberingScheme,
) -> DutResult<Vec<Expectation>> {
    let mut out = Vec::new();
    match &entity.kind {
        EntityKind::Chassis | EntityKind::Transceiver { .. } => {}
        EntityKind::FanDrawer => {
            let position = entity.require_position()?;
            out.push(Expectation::Present(ExpectedEntity::unit(
                entity,
                scheme.fan_drawer_id(position),
                scheme.chassis_id,
                PhysicalClass::Container,
                position,
            )));
        }
        EntityKind::Fan { speed } => {
            let position = entity.require_position()?;
            let (fan_id, contained_in) = fan_placement(entity, tree, scheme)?;
            out.push(Expectation::Present(ExpectedEntity::unit(
                entity,
                fan_id,
                contained_in,
                PhysicalClass::Fan,
                position,
            )));
            if speed.is_some() {
                out.push(Expectation::Present(ExpectedEntity::sensor(
                    &entity.name,
                    scheme.tachometer_id(fan_id),
                    fan_id,
                    1,
                    Some(format!("tachometers for {}", entity.name)),
                )));
            }
        }
        EntityKind::PowerSupply {
            present, readings, ..
        } => {
            let position = entity.require_position()?;
            let psu_id = scheme.psu_id(position);
            if !present {
                out.push(Expectation::Absent {
                    id: psu_id,
                    owner: entity.name.clone(),
                    reason: "PSU not present".to_string(),
                });
                for sensor in PsuSensor::ALL {
                    out.push(Expectation::Absent {
                        id: scheme.psu_sensor_id(psu_id, sensor),
                        owner: entity.name.clone(),
                        reason: "PSU not present".to_string(),
                    });
                }
                return Ok(out);
            }
            out.push(Expectation::Present(ExpectedEntity::unit(
                entity,
                psu_id,
                scheme.chassis_id,
                PhysicalClass::PowerSupply,
                position,
            )));
            for sensor in PsuSensor::ALL {
                let id = scheme.psu_sensor_id(psu_id, sensor);
                if sensor.reading(readings).is_some() {
                    out.push(Expectation::Present(ExpectedEntity::sensor(
                        &entity.name,
                        id,
                        psu_id,
                        sensor.slot(),
                        Some(format!("{} for {}", sensor.label(), entity.name)),
                    )));
                } else {
                    out.push(Expectation::Absent {
                        id,
                        owner: entity.name.clone(),
                        reason: format!("{} reading is null", sensor.label()),
                    });
                }
            }
        }
        EntityKind::Thermal => {
            if !entity.on_chassis() {
                return Ok(out);
            }
            let position = entity.require_position()?;
            out.push(Expectation::Present(ExpectedEntity::sensor(
                &entity.name,
                scheme.chassis_thermal_id(position),
                scheme.chassis_mgmt_id,
                i64::from(position),
                Some(entity.name.clone()),
            )));
        }
    }
    Ok(out)
}

/// Derives the rows of a transceiver found at `transceiver_id` in the
/// snapshot, followed by its DOM sensors.
pub fn derive_transceiver(
    entity: &PhysicalEntity,
    transceiver_id: i64,
    scheme: &NumberingScheme,
) -> Vec<Expectation> {
    let (hardware_rev, manufacturer) = match &entity.kind {
        EntityKind::Transceiver {
            hardware_rev,
            manufacturer,
        } => (hardware_rev.clone(), manufacturer.clone()),
        _ => return Vec::new(),
    };

    let mut out = vec![Expectation::Present(ExpectedEntity {
        id: transceiver_id,
        owner: entity.name.clone(),
        contained_in: scheme.chassis_id,
        class: PhysicalClass::Port,
        parent_rel_pos: -1,
        name: Some(entity.name.clone()),
        descr: None,
        hw_ver: hardware_rev,
        fw_ver: String::new(),
        sw_ver: String::new(),
        serial: entity.serial.clone().unwrap_or_default(),
        mfg_name: manufacturer,
        model_name: entity.model.clone().unwrap_or_default(),
        fru: entity.fru,
    })];

    for (position, id) in scheme.transceiver_sensor_ids(transceiver_id) {
        out.push(Expectation::Present(ExpectedEntity::sensor(
            &entity.name,
            id,
            transceiver_id,
            position,
            None,
        )));
    }
    out
}

/// Finds identifiers claimed by more than one entity.
///
/// Returns each colliding identifier with the names of the entities that
/// derived it.
pub fn find_collisions(expectations: &[Expectation]) -> BTreeMap<i64, BTreeSet<String>> {
    let mut owners: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for exp in expectations {
        owners
            .entry(exp.id())
            .or_default()
            .insert(exp.owner().to_string());
    }
    owners.retain(|_, names| names.len() > 1);
    owners
}
