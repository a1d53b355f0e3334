//! Collaborator interfaces for reading and driving a device.
//!
//! The verification core never talks to a transport directly. It calls
//! these narrow traits, which are implemented by the command-backed host
//! adapters in this crate and by in-memory doubles in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::DutResult;
use crate::shell::ExecResult;

/// Database identifiers in the SONiC redis instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbId {
    /// Application database (APPL_DB).
    ApplDb,
    /// Configuration database (CONFIG_DB).
    ConfigDb,
    /// State database (STATE_DB) - operational state tracking.
    StateDb,
}

impl DbId {
    /// Returns the database name as used by `sonic-db-cli`.
    pub fn name(&self) -> &'static str {
        match self {
            DbId::ApplDb => "APPL_DB",
            DbId::ConfigDb => "CONFIG_DB",
            DbId::StateDb => "STATE_DB",
        }
    }

    /// Returns the redis database number.
    pub fn id(&self) -> u32 {
        match self {
            DbId::ApplDb => 0,
            DbId::ConfigDb => 4,
            DbId::StateDb => 6,
        }
    }
}

/// Separator between table name and entry name in state store keys.
pub const TABLE_NAME_SEPARATOR_VBAR: char = '|';

/// Builds a `<Table>|<name>` key.
pub fn table_key(table: &str, name: &str) -> String {
    format!("{}{}{}", table, TABLE_NAME_SEPARATOR_VBAR, name)
}

/// Returns the entry name of a `<Table>|<name>` key (the last segment).
pub fn key_name(key: &str) -> &str {
    key.rsplit(TABLE_NAME_SEPARATOR_VBAR).next().unwrap_or(key)
}

/// Flat field-name to value mapping read from a state source.
///
/// Field order is not significant; equality is field by field.
pub type Record = HashMap<String, String>;

/// Helper trait for working with records.
pub trait RecordExt {
    /// Gets the value for a field, if present.
    fn get_field(&self, field: &str) -> Option<&str>;

    /// Gets the value for a field, returning the default if not present.
    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str;

    /// Checks if a field exists.
    fn has_field(&self, field: &str) -> bool;
}

impl RecordExt for Record {
    fn get_field(&self, field: &str) -> Option<&str> {
        self.get(field).map(String::as_str)
    }

    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get_field(field).unwrap_or(default)
    }

    fn has_field(&self, field: &str) -> bool {
        self.contains_key(field)
    }
}

/// Builds a [`Record`] from field/value pairs.
#[macro_export]
macro_rules! record {
    ($($field:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut record = $crate::device::Record::new();
        $(record.insert($field.to_string(), $value.to_string());)*
        record
    }};
}

/// Administrative port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Administratively enabled.
    Up,
    /// Administratively disabled.
    Down,
}

impl AdminState {
    /// Returns the state as written to CONFIG_DB.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminState::Up => "up",
            AdminState::Down => "down",
        }
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent sources of port link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatusView {
    /// Kernel interface facts (netdev operational state).
    InterfaceFacts,
    /// The `show interfaces status` table, backed by APPL_DB.
    ShowInterfaceStatus,
}

/// Static facts about a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFacts {
    /// ASIC vendor class, e.g. "mellanox", "broadcom", "vs".
    pub asic_type: String,
    /// Hardware SKU.
    pub hwsku: String,
}

impl DeviceFacts {
    /// Creates facts for the given ASIC type and SKU.
    pub fn new(asic_type: impl Into<String>, hwsku: impl Into<String>) -> Self {
        Self {
            asic_type: asic_type.into(),
            hwsku: hwsku.into(),
        }
    }
}

/// Runs commands on a device.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns the device hostname (for logging and error reports).
    fn hostname(&self) -> &str;

    /// Runs a command and returns its output, whatever the exit code.
    ///
    /// Errors are reserved for transport failures.
    async fn run(&self, command: &str) -> DutResult<ExecResult>;
}

/// Administrative writes to ports. Both writes are fire-and-forget: their
/// effect is only visible through subsequent reads.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PortControl: Send + Sync {
    /// Sets the admin state of a batch of ports in a single remote call.
    async fn set_admin_state(&self, ports: &[String], state: AdminState) -> DutResult<()>;

    /// Sets the (forced) speed of a port, in the device's own speed unit.
    async fn set_speed(&self, port: &str, speed: &str) -> DutResult<()>;
}

/// Key-value state store lookups.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns every field of `key`, or an empty record if the key is absent.
    async fn get_record(&self, db: DbId, key: &str) -> DutResult<Record>;

    /// Returns keys matching a glob pattern, empty if none match.
    async fn list_keys(&self, db: DbId, pattern: &str) -> DutResult<Vec<String>>;
}

/// Port link status reporting.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LinkStatusSource: Send + Sync {
    /// Returns the subset of `ports` the given view reports as not up.
    async fn down_ports(&self, view: LinkStatusView, ports: &[String])
        -> DutResult<BTreeSet<String>>;
}

/// Link peer speed capability reporting.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeedCapabilities: Send + Sync {
    /// Returns the speeds `port` supports in the device's own unit, or
    /// `None` when the device does not report any.
    async fn supported_speeds(&self, port: &str) -> DutResult<Option<Vec<String>>>;
}

/// Power state of one PSU as reported by an out-of-band power controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsuStatus {
    /// Controller-side PSU identifier.
    pub psu_id: String,
    /// True when the PSU is powered.
    pub psu_on: bool,
}

/// Out-of-band PSU power controller (PDU).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PsuController: Send + Sync {
    /// Returns the status of every PSU, in controller order.
    async fn psu_status(&self) -> DutResult<Vec<PsuStatus>>;

    /// Powers a PSU on.
    async fn turn_on_psu(&self, psu_id: &str) -> DutResult<()>;

    /// Powers a PSU off.
    async fn turn_off_psu(&self, psu_id: &str) -> DutResult<()>;
}

/// Credentials for the management-protocol agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpCredentials {
    /// SNMP protocol version, e.g. "v2c".
    pub version: String,
    /// Read-only community string.
    pub community: String,
}

impl Default for SnmpCredentials {
    fn default() -> Self {
        Self {
            version: "v2c".to_string(),
            community: "public".to_string(),
        }
    }
}

/// One row of the physical entity MIB, keyed by RFC 2737 column names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMibRecord {
    #[serde(rename = "entPhysDescr", default)]
    pub descr: String,
    #[serde(rename = "entPhysContainedIn")]
    pub contained_in: i64,
    #[serde(rename = "entPhysClass")]
    pub class: i64,
    #[serde(rename = "entPhyParentRelPos")]
    pub parent_rel_pos: i64,
    #[serde(rename = "entPhysName", default)]
    pub name: String,
    #[serde(rename = "entPhysHwVer", default)]
    pub hw_ver: String,
    #[serde(rename = "entPhysFwVer", default)]
    pub fw_ver: String,
    #[serde(rename = "entPhysSwVer", default)]
    pub sw_ver: String,
    #[serde(rename = "entPhysSerialNum", default)]
    pub serial: String,
    #[serde(rename = "entPhysMfgName", default)]
    pub mfg_name: String,
    #[serde(rename = "entPhysModelName", default)]
    pub model_name: String,
    #[serde(rename = "entPhysIsFRU")]
    pub is_fru: i64,
}

/// Physical entity MIB snapshot: identifier to row.
pub type EntitySnapshot = BTreeMap<i64, EntityMibRecord>;

/// Structured management-protocol snapshot source.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntityMibSource: Send + Sync {
    /// Walks the physical entity table of the device.
    async fn get_snapshot(&self, credentials: &SnmpCredentials) -> DutResult<EntitySnapshot>;
}
