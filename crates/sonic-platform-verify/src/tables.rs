//! Table name constants for the platform state verified against the
//! entity MIB.
//!
//! These match the STATE_DB schema written by pmon (thermalctld, psud,
//! xcvrd) and the CONFIG_DB port table.

/// CONFIG_DB table for port configuration.
pub const CFG_PORT_TABLE_NAME: &str = "PORT";

/// STATE_DB table for port state (capabilities).
pub const STATE_PORT_TABLE_NAME: &str = "PORT_TABLE";

/// STATE_DB table for fan drawers.
pub const STATE_FAN_DRAWER_INFO_TABLE_NAME: &str = "FAN_DRAWER_INFO";

/// STATE_DB table for fans.
pub const STATE_FAN_INFO_TABLE_NAME: &str = "FAN_INFO";

/// STATE_DB table for power supplies.
pub const STATE_PSU_INFO_TABLE_NAME: &str = "PSU_INFO";

/// STATE_DB table for thermal sensors.
pub const STATE_TEMPERATURE_INFO_TABLE_NAME: &str = "TEMPERATURE_INFO";

/// STATE_DB table with the parent/position of every physical entity.
pub const STATE_PHYSICAL_ENTITY_INFO_TABLE_NAME: &str = "PHYSICAL_ENTITY_INFO";

/// STATE_DB table for transceiver inventory.
pub const STATE_TRANSCEIVER_INFO_TABLE_NAME: &str = "TRANSCEIVER_INFO";

/// STATE_DB table for transceiver DOM sensors.
pub const STATE_TRANSCEIVER_DOM_SENSOR_TABLE_NAME: &str = "TRANSCEIVER_DOM_SENSOR";

/// Returns the glob pattern matching every key of `table`.
pub fn all_keys_pattern(table: &str) -> String {
    format!("{}|*", table)
}

/// Field names used in platform tables.
pub mod fields {
    /// PORT_TABLE supported speed list (comma separated).
    pub const SUPPORTED_SPEEDS: &str = "supported_speeds";

    /// PHYSICAL_ENTITY_INFO position among siblings.
    pub const POSITION_IN_PARENT: &str = "position_in_parent";

    /// PHYSICAL_ENTITY_INFO parent entity name.
    pub const PARENT_NAME: &str = "parent_name";

    pub const SERIAL: &str = "serial";
    pub const MODEL: &str = "model";
    pub const IS_REPLACEABLE: &str = "is_replaceable";

    /// FAN_INFO speed reading.
    pub const SPEED: &str = "speed";

    /// PSU_INFO presence flag.
    pub const PRESENCE: &str = "presence";

    /// PSU_INFO power status flag.
    pub const STATUS: &str = "status";

    pub const TEMP: &str = "temp";
    pub const POWER: &str = "power";
    pub const CURRENT: &str = "current";
    pub const VOLTAGE: &str = "voltage";

    /// TRANSCEIVER_INFO hardware revision.
    pub const HARDWARE_REV: &str = "hardware_rev";

    /// TRANSCEIVER_INFO vendor name.
    pub const MANUFACTURER: &str = "manufacturer";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_keys_pattern() {
        assert_eq!(all_keys_pattern(STATE_PSU_INFO_TABLE_NAME), "PSU_INFO|*");
        assert_eq!(all_keys_pattern(CFG_PORT_TABLE_NAME), "PORT|*");
    }
}
