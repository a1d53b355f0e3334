//! Physical entity inventory read from STATE_DB.
//!
//! pmon publishes one record per fan drawer, fan, PSU, thermal and
//! transceiver, plus a `PHYSICAL_ENTITY_INFO|<name>` record holding the
//! entity's parent name and position among its siblings. [`EntityTree`]
//! collects those records into a name-keyed map. Parents are resolved by
//! lookup in that map; children never hold a reference to their parent.

use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use sonic_dut_common::{
    key_name, table_key, DbId, DutError, DutResult, Record, RecordExt, StateStore,
};

use crate::tables::{self, fields};

/// Name of the chassis entity, the root of the hierarchy.
pub const CHASSIS_NAME: &str = "chassis 1";

/// RFC 2737 `PhysicalClass` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhysicalClass {
    Other = 1,
    Unknown = 2,
    Chassis = 3,
    Backplane = 4,
    Container = 5,
    PowerSupply = 6,
    Fan = 7,
    Sensor = 8,
    Module = 9,
    Port = 10,
    Stack = 11,
}

impl PhysicalClass {
    /// Returns the `entPhysClass` value.
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Maps an `entPhysClass` value back to a class.
    pub fn from_code(code: i64) -> Option<Self> {
        let class = match code {
            1 => PhysicalClass::Other,
            2 => PhysicalClass::Unknown,
            3 => PhysicalClass::Chassis,
            4 => PhysicalClass::Backplane,
            5 => PhysicalClass::Container,
            6 => PhysicalClass::PowerSupply,
            7 => PhysicalClass::Fan,
            8 => PhysicalClass::Sensor,
            9 => PhysicalClass::Module,
            10 => PhysicalClass::Port,
            11 => PhysicalClass::Stack,
            _ => return None,
        };
        Some(class)
    }
}

/// `entPhysIsFRU` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FruStatus {
    Replaceable = 1,
    NotReplaceable = 2,
}

impl FruStatus {
    /// Returns the `entPhysIsFRU` value.
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Interprets a STATE_DB `is_replaceable` field. Only the literal
    /// `"True"` marks a field-replaceable unit.
    pub fn from_db(value: Option<&str>) -> Self {
        if value == Some("True") {
            FruStatus::Replaceable
        } else {
            FruStatus::NotReplaceable
        }
    }
}

/// Returns true for the values pmon writes when a reading or attribute is
/// unavailable: a missing field, the empty string, `"None"` and `"N/A"`.
pub fn is_null_str(value: Option<&str>) -> bool {
    matches!(value, None | Some("") | Some("None") | Some("N/A"))
}

/// Renders a STATE_DB value the way the SNMP agent exposes it: null values
/// become the empty string, anything else is passed through.
pub fn snmp_string(value: Option<&str>) -> String {
    if is_null_str(value) {
        String::new()
    } else {
        value.unwrap_or_default().to_string()
    }
}

fn non_null(value: Option<&str>) -> Option<String> {
    if is_null_str(value) {
        None
    } else {
        value.map(str::to_string)
    }
}

/// PSU sensor readings, `None` where the reading is null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsuReadings {
    pub temp: Option<String>,
    pub power: Option<String>,
    pub current: Option<String>,
    pub voltage: Option<String>,
}

impl PsuReadings {
    fn from_record(info: &Record) -> Self {
        Self {
            temp: non_null(info.get_field(fields::TEMP)),
            power: non_null(info.get_field(fields::POWER)),
            current: non_null(info.get_field(fields::CURRENT)),
            voltage: non_null(info.get_field(fields::VOLTAGE)),
        }
    }
}

/// Entity class with the attributes only that class carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Chassis,
    FanDrawer,
    Fan {
        /// Speed reading, `None` when null. A fan with a reading exposes a
        /// tachometer sensor.
        speed: Option<String>,
    },
    PowerSupply {
        present: bool,
        powered: bool,
        readings: PsuReadings,
    },
    Thermal,
    Transceiver {
        hardware_rev: String,
        manufacturer: String,
    },
}

impl EntityKind {
    /// Human readable class name for reports.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Chassis => "chassis",
            EntityKind::FanDrawer => "fan drawer",
            EntityKind::Fan { .. } => "fan",
            EntityKind::PowerSupply { .. } => "PSU",
            EntityKind::Thermal => "thermal",
            EntityKind::Transceiver { .. } => "transceiver",
        }
    }
}

/// One physical entity as described by STATE_DB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalEntity {
    /// Unique within the device's entity namespace.
    pub name: String,
    pub kind: EntityKind,
    /// Parent name; `None` only for the chassis.
    pub parent: Option<String>,
    /// Position among siblings; transceivers carry none.
    pub position: Option<u32>,
    /// Raw serial field; `None` when the field is missing.
    pub serial: Option<String>,
    /// Raw model field; `None` when the field is missing.
    pub model: Option<String>,
    pub fru: FruStatus,
}

impl PhysicalEntity {
    /// The chassis root entity.
    pub fn chassis() -> Self {
        Self {
            name: CHASSIS_NAME.to_string(),
            kind: EntityKind::Chassis,
            parent: None,
            position: None,
            serial: None,
            model: None,
            fru: FruStatus::NotReplaceable,
        }
    }

    /// Returns the position, or an error naming the entity when STATE_DB
    /// did not provide one.
    pub fn require_position(&self) -> DutResult<u32> {
        self.position.ok_or_else(|| {
            DutError::inconsistent_hierarchy(&self.name, "no position_in_parent")
        })
    }

    /// Returns true if this entity is attached directly to the chassis.
    pub fn on_chassis(&self) -> bool {
        self.parent.as_deref() == Some(CHASSIS_NAME)
    }
}

/// STATE_DB tables that describe physical entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityTable {
    FanDrawer,
    Psu,
    Fan,
    Thermal,
    Transceiver,
}

impl EntityTable {
    /// Load order: containers before the entities they contain.
    pub const ALL: [EntityTable; 5] = [
        EntityTable::FanDrawer,
        EntityTable::Psu,
        EntityTable::Fan,
        EntityTable::Thermal,
        EntityTable::Transceiver,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            EntityTable::FanDrawer => tables::STATE_FAN_DRAWER_INFO_TABLE_NAME,
            EntityTable::Psu => tables::STATE_PSU_INFO_TABLE_NAME,
            EntityTable::Fan => tables::STATE_FAN_INFO_TABLE_NAME,
            EntityTable::Thermal => tables::STATE_TEMPERATURE_INFO_TABLE_NAME,
            EntityTable::Transceiver => tables::STATE_TRANSCEIVER_INFO_TABLE_NAME,
        }
    }

    /// Returns true if entities of `kind` are loaded from this table.
    pub fn holds(self, kind: &EntityKind) -> bool {
        matches!(
            (self, kind),
            (EntityTable::FanDrawer, EntityKind::FanDrawer)
                | (EntityTable::Psu, EntityKind::PowerSupply { .. })
                | (EntityTable::Fan, EntityKind::Fan { .. })
                | (EntityTable::Thermal, EntityKind::Thermal)
                | (EntityTable::Transceiver, EntityKind::Transceiver { .. })
        )
    }
}

/// Entities keyed by name, always containing the chassis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTree {
    entities: BTreeMap<String, PhysicalEntity>,
}

impl Default for EntityTree {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityTree {
    /// Creates a tree holding only the chassis.
    pub fn new() -> Self {
        let chassis = PhysicalEntity::chassis();
        let mut entities = BTreeMap::new();
        entities.insert(chassis.name.clone(), chassis);
        Self { entities }
    }

    /// Adds an entity. A second entity with an existing name is rejected.
    pub fn insert(&mut self, entity: PhysicalEntity) -> DutResult<()> {
        if self.entities.contains_key(&entity.name) {
            return Err(DutError::inconsistent_hierarchy(
                &entity.name,
                "duplicate entity name",
            ));
        }
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PhysicalEntity> {
        self.entities.get(name)
    }

    /// Resolves the parent of `entity` by name.
    pub fn parent_of(&self, entity: &PhysicalEntity) -> DutResult<&PhysicalEntity> {
        let parent = entity
            .parent
            .as_deref()
            .ok_or_else(|| DutError::inconsistent_hierarchy(&entity.name, "no parent_name"))?;
        self.entities.get(parent).ok_or_else(|| {
            DutError::inconsistent_hierarchy(
                &entity.name,
                format!("parent '{}' not found", parent),
            )
        })
    }

    /// Iterates every entity in name order, chassis included.
    pub fn entities(&self) -> impl Iterator<Item = &PhysicalEntity> {
        self.entities.values()
    }

    /// Iterates the entities loaded from `table`.
    pub fn of_table(&self, table: EntityTable) -> impl Iterator<Item = &PhysicalEntity> {
        self.entities.values().filter(move |e| table.holds(&e.kind))
    }

    /// Number of entities, chassis included.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Reads `tables` from STATE_DB.
    ///
    /// Store failures abort the load. A record that cannot be turned into
    /// an entity is reported in the returned error list and skipped so the
    /// rest of the inventory can still be verified.
    #[instrument(skip(store))]
    pub async fn load<S>(store: &S, tables: &[EntityTable]) -> DutResult<(Self, Vec<DutError>)>
    where
        S: StateStore + ?Sized,
    {
        let mut tree = Self::new();
        let mut errors = Vec::new();

        for table in EntityTable::ALL.iter().filter(|t| tables.contains(t)) {
            let pattern = tables::all_keys_pattern(table.table_name());
            let keys = store.list_keys(DbId::StateDb, &pattern).await?;
            debug!("Found {} keys for {}", keys.len(), pattern);

            for key in keys {
                let name = key_name(&key).to_string();
                let info = store.get_record(DbId::StateDb, &key).await?;
                let entity_info = match table {
                    EntityTable::Transceiver => Record::new(),
                    _ => {
                        let entity_key =
                            table_key(tables::STATE_PHYSICAL_ENTITY_INFO_TABLE_NAME, &name);
                        store.get_record(DbId::StateDb, &entity_key).await?
                    }
                };

                if *table == EntityTable::Thermal && entity_info.is_empty() {
                    debug!("Skipping thermal {} without entity info", name);
                    continue;
                }

                let loaded = parse_entity(*table, &key, name, &info, &entity_info)
                    .and_then(|entity| tree.insert(entity));
                if let Err(e) = loaded {
                    warn!("Failed to load {}: {}", key, e);
                    errors.push(e);
                }
            }
        }

        Ok((tree, errors))
    }
}

fn parse_position(key: &str, entity_info: &Record) -> DutResult<Option<u32>> {
    match entity_info.get_field(fields::POSITION_IN_PARENT) {
        None => Ok(None),
        Some(value) => value.trim().parse::<u32>().map(Some).map_err(|_| {
            DutError::invalid_record(
                key,
                fields::POSITION_IN_PARENT,
                format!("'{}' is not a non-negative integer", value),
            )
        }),
    }
}

fn parse_entity(
    table: EntityTable,
    key: &str,
    name: String,
    info: &Record,
    entity_info: &Record,
) -> DutResult<PhysicalEntity> {
    let kind = match table {
        EntityTable::FanDrawer => EntityKind::FanDrawer,
        EntityTable::Fan => EntityKind::Fan {
            speed: non_null(info.get_field(fields::SPEED)),
        },
        EntityTable::Psu => EntityKind::PowerSupply {
            present: info.get_field(fields::PRESENCE) == Some("true"),
            powered: info.get_field(fields::STATUS) == Some("true"),
            readings: PsuReadings::from_record(info),
        },
        EntityTable::Thermal => EntityKind::Thermal,
        EntityTable::Transceiver => EntityKind::Transceiver {
            hardware_rev: info.get_field_or(fields::HARDWARE_REV, "").to_string(),
            manufacturer: info.get_field_or(fields::MANUFACTURER, "").to_string(),
        },
    };

    let (parent, position) = match table {
        EntityTable::Transceiver => (Some(CHASSIS_NAME.to_string()), None),
        _ => (
            entity_info
                .get_field(fields::PARENT_NAME)
                .map(str::to_string),
            parse_position(key, entity_info)?,
        ),
    };

    Ok(PhysicalEntity {
        name,
        kind,
        parent,
        position,
        serial: info.get_field(fields::SERIAL).map(str::to_string),
        model: info.get_field(fields::MODEL).map(str::to_string),
        fru: FruStatus::from_db(info.get_field(fields::IS_REPLACEABLE)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sonic_dut_common::record;
    use std::collections::HashMap;

    /// Minimal STATE_DB backed by a map.
    struct MapStore(HashMap<String, Record>);

    #[async_trait]
    impl StateStore for MapStore {
        async fn get_record(&self, _db: DbId, key: &str) -> DutResult<Record> {
            Ok(self.0.get(key).cloned().unwrap_or_default())
        }

        async fn list_keys(&self, _db: DbId, pattern: &str) -> DutResult<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            let mut keys: Vec<String> = self
                .0
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        }
    }

    #[test]
    fn test_is_null_str() {
        assert!(is_null_str(None));
        assert!(is_null_str(Some("None")));
        assert!(is_null_str(Some("N/A")));
        assert!(is_null_str(Some("")));
        assert!(!is_null_str(Some("0")));
        assert!(!is_null_str(Some("none")));
    }

    #[test]
    fn test_snmp_string() {
        assert_eq!(snmp_string(Some("N/A")), "");
        assert_eq!(snmp_string(None), "");
        assert_eq!(snmp_string(Some("SN123")), "SN123");
    }

    #[test]
    fn test_fru_status_from_db() {
        assert_eq!(FruStatus::from_db(Some("True")), FruStatus::Replaceable);
        assert_eq!(FruStatus::from_db(Some("true")), FruStatus::NotReplaceable);
        assert_eq!(FruStatus::from_db(None), FruStatus::NotReplaceable);
        assert_eq!(FruStatus::Replaceable.code(), 1);
        assert_eq!(FruStatus::NotReplaceable.code(), 2);
    }

    #[test]
    fn test_physical_class_codes() {
        assert_eq!(PhysicalClass::PowerSupply.code(), 6);
        assert_eq!(PhysicalClass::Sensor.code(), 8);
        assert_eq!(PhysicalClass::from_code(10), Some(PhysicalClass::Port));
        assert_eq!(PhysicalClass::from_code(12), None);
    }

    #[test]
    fn test_tree_rejects_duplicate_names() {
        let mut tree = EntityTree::new();
        let err = tree.insert(PhysicalEntity::chassis()).unwrap_err();
        assert!(matches!(err, DutError::InconsistentHierarchy { .. }));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_parent_lookup() {
        let mut tree = EntityTree::new();
        let fan = PhysicalEntity {
            name: "fan1".to_string(),
            kind: EntityKind::Fan { speed: None },
            parent: Some("drawer9".to_string()),
            position: Some(1),
            serial: None,
            model: None,
            fru: FruStatus::NotReplaceable,
        };
        tree.insert(fan.clone()).unwrap();

        let err = tree.parent_of(&fan).unwrap_err();
        assert!(err.to_string().contains("drawer9"));

        let chassis = tree.get(CHASSIS_NAME).unwrap().clone();
        assert!(tree.parent_of(&chassis).is_err());
    }

    #[tokio::test]
    async fn test_load_inventory() {
        let mut db = HashMap::new();
        db.insert(
            "FAN_DRAWER_INFO|drawer1".to_string(),
            record! { "serial" => "N/A", "model" => "M1", "is_replaceable" => "True" },
        );
        db.insert(
            "PHYSICAL_ENTITY_INFO|drawer1".to_string(),
            record! { "position_in_parent" => "1", "parent_name" => CHASSIS_NAME },
        );
        db.insert(
            "PSU_INFO|PSU 1".to_string(),
            record! {
                "presence" => "true", "status" => "false",
                "temp" => "30.5", "power" => "N/A", "current" => "", "voltage" => "12.1",
            },
        );
        db.insert(
            "PHYSICAL_ENTITY_INFO|PSU 1".to_string(),
            record! { "position_in_parent" => "1", "parent_name" => CHASSIS_NAME },
        );
        // No entity info: skipped silently.
        db.insert("TEMPERATURE_INFO|ASIC".to_string(), record! { "temperature" => "40" });
        db.insert(
            "TRANSCEIVER_INFO|Ethernet0".to_string(),
            record! { "hardware_rev" => "A0", "manufacturer" => "ACME", "serial" => "X1" },
        );
        let store = MapStore(db);

        let (tree, errors) = EntityTree::load(&store, &EntityTable::ALL).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(tree.len(), 4);

        let drawer = tree.get("drawer1").unwrap();
        assert_eq!(drawer.position, Some(1));
        assert_eq!(drawer.fru, FruStatus::Replaceable);
        assert_eq!(drawer.serial.as_deref(), Some("N/A"));
        assert!(drawer.on_chassis());

        let psu = tree.get("PSU 1").unwrap();
        assert_eq!(
            psu.kind,
            EntityKind::PowerSupply {
                present: true,
                powered: false,
                readings: PsuReadings {
                    temp: Some("30.5".to_string()),
                    power: None,
                    current: None,
                    voltage: Some("12.1".to_string()),
                },
            }
        );

        let xcvr = tree.get("Ethernet0").unwrap();
        assert_eq!(xcvr.position, None);
        assert!(xcvr.on_chassis());
        assert_eq!(tree.of_table(EntityTable::Transceiver).count(), 1);
        assert_eq!(tree.of_table(EntityTable::Thermal).count(), 0);
    }

    #[tokio::test]
    async fn test_load_reports_bad_position() {
        let mut db = HashMap::new();
        db.insert("FAN_INFO|fan1".to_string(), record! { "speed" => "50" });
        db.insert(
            "PHYSICAL_ENTITY_INFO|fan1".to_string(),
            record! { "position_in_parent" => "first", "parent_name" => CHASSIS_NAME },
        );
        db.insert("FAN_INFO|fan2".to_string(), record! { "speed" => "N/A" });
        db.insert(
            "PHYSICAL_ENTITY_INFO|fan2".to_string(),
            record! { "position_in_parent" => "2", "parent_name" => CHASSIS_NAME },
        );
        let store = MapStore(db);

        let (tree, errors) = EntityTree::load(&store, &[EntityTable::Fan]).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], DutError::InvalidRecord { .. }));
        assert!(tree.get("fan1").is_none());
        assert_eq!(tree.get("fan2").unwrap().kind, EntityKind::Fan { speed: None });
    }
}
