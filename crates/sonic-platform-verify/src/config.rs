//! Verification configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty or
//! missing file yields the stock SONiC timings and numbering scheme.
//! Default location: /etc/sonic/platform-verify.toml

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use sonic_dut_common::{DutError, DutResult, SnmpCredentials};

use crate::entity_id::NumberingScheme;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/platform-verify.toml";

/// Port toggle timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortToggleConfig {
    /// Bring-down timeout at the reference port count, in seconds
    #[serde(default = "default_down_timeout")]
    pub down_timeout_secs: u64,

    /// Bring-up timeout at the reference port count, in seconds
    #[serde(default = "default_up_timeout")]
    pub up_timeout_secs: u64,

    /// Port count the base timeouts were tuned for
    #[serde(default = "default_reference_port_count")]
    pub reference_port_count: usize,

    /// ASIC types whose timeouts scale with the port count
    #[serde(default = "default_scaled_asic_types")]
    pub scaled_asic_types: Vec<String>,

    /// Link status poll interval in seconds
    #[serde(default = "default_toggle_poll_interval")]
    pub poll_interval_secs: u64,

    /// Stabilization delay after all ports are up, in seconds
    #[serde(default = "default_wait_after_ports_up")]
    pub wait_after_ports_up_secs: u64,

    /// Log memory and CPU usage after the bring-down command
    #[serde(default)]
    pub watch: bool,
}

/// PSU power-off scenario timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsuConfig {
    /// Delay after powering a PSU on, in seconds
    #[serde(default = "default_psu_settle")]
    pub settle_secs: u64,

    /// Timeout for the controller to report a PSU off, in seconds
    #[serde(default = "default_power_state_timeout")]
    pub power_state_timeout_secs: u64,

    #[serde(default = "default_power_state_interval")]
    pub power_state_interval_secs: u64,

    /// Timeout for the SNMP agent to drop the sensors of a powered-off
    /// PSU, in seconds
    #[serde(default = "default_retraction_timeout")]
    pub retraction_timeout_secs: u64,

    #[serde(default = "default_retraction_interval")]
    pub retraction_interval_secs: u64,
}

/// Thermal control checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalConfig {
    /// Timeout for the cooling level to reach a target, in seconds
    #[serde(default = "default_cooling_timeout")]
    pub cooling_timeout_secs: u64,

    #[serde(default = "default_cooling_interval")]
    pub cooling_interval_secs: u64,

    /// Accepted relative deviation of PSU fan speed ratios
    #[serde(default = "default_psu_speed_tolerance")]
    pub psu_speed_tolerance: f64,

    /// Cooling level at which fans run at full speed
    #[serde(default = "default_full_cooling_level")]
    pub full_cooling_level: i64,
}

/// Complete verification configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default)]
    pub numbering: NumberingScheme,

    #[serde(default)]
    pub port_toggle: PortToggleConfig,

    #[serde(default)]
    pub psu: PsuConfig,

    #[serde(default)]
    pub thermal: ThermalConfig,

    #[serde(default)]
    pub snmp: SnmpCredentials,
}

// Default functions
fn default_down_timeout() -> u64 {
    120
}

fn default_up_timeout() -> u64 {
    180
}

fn default_reference_port_count() -> usize {
    28
}

fn default_scaled_asic_types() -> Vec<String> {
    vec!["mellanox".to_string()]
}

fn default_toggle_poll_interval() -> u64 {
    5
}

fn default_wait_after_ports_up() -> u64 {
    60
}

fn default_psu_settle() -> u64 {
    5
}

fn default_power_state_timeout() -> u64 {
    30
}

fn default_power_state_interval() -> u64 {
    5
}

fn default_retraction_timeout() -> u64 {
    120
}

fn default_retraction_interval() -> u64 {
    20
}

fn default_cooling_timeout() -> u64 {
    65
}

fn default_cooling_interval() -> u64 {
    5
}

fn default_psu_speed_tolerance() -> f64 {
    0.15
}

fn default_full_cooling_level() -> i64 {
    10
}

impl Default for PortToggleConfig {
    fn default() -> Self {
        Self {
            down_timeout_secs: default_down_timeout(),
            up_timeout_secs: default_up_timeout(),
            reference_port_count: default_reference_port_count(),
            scaled_asic_types: default_scaled_asic_types(),
            poll_interval_secs: default_toggle_poll_interval(),
            wait_after_ports_up_secs: default_wait_after_ports_up(),
            watch: false,
        }
    }
}

impl Default for PsuConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_psu_settle(),
            power_state_timeout_secs: default_power_state_timeout(),
            power_state_interval_secs: default_power_state_interval(),
            retraction_timeout_secs: default_retraction_timeout(),
            retraction_interval_secs: default_retraction_interval(),
        }
    }
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            cooling_timeout_secs: default_cooling_timeout(),
            cooling_interval_secs: default_cooling_interval(),
            psu_speed_tolerance: default_psu_speed_tolerance(),
            full_cooling_level: default_full_cooling_level(),
        }
    }
}

impl PortToggleConfig {
    pub fn down_timeout(&self) -> Duration {
        Duration::from_secs(self.down_timeout_secs)
    }

    pub fn up_timeout(&self) -> Duration {
        Duration::from_secs(self.up_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_after_ports_up(&self) -> Duration {
        Duration::from_secs(self.wait_after_ports_up_secs)
    }
}

impl PsuConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn power_state_timeout(&self) -> Duration {
        Duration::from_secs(self.power_state_timeout_secs)
    }

    pub fn power_state_interval(&self) -> Duration {
        Duration::from_secs(self.power_state_interval_secs)
    }

    pub fn retraction_timeout(&self) -> Duration {
        Duration::from_secs(self.retraction_timeout_secs)
    }

    pub fn retraction_interval(&self) -> Duration {
        Duration::from_secs(self.retraction_interval_secs)
    }
}

impl ThermalConfig {
    pub fn cooling_timeout(&self) -> Duration {
        Duration::from_secs(self.cooling_timeout_secs)
    }

    pub fn cooling_interval(&self) -> Duration {
        Duration::from_secs(self.cooling_interval_secs)
    }
}

impl VerifyConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> DutResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    DutError::invalid_config(
                        path.display().to_string(),
                        format!("failed to parse: {}", e),
                    )
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(DutError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> DutResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> DutResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            DutError::invalid_config("config", format!("failed to serialize: {}", e))
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> DutResult<()> {
        let toggle = &self.port_toggle;
        if toggle.reference_port_count == 0 {
            return Err(DutError::invalid_config(
                "port_toggle.reference_port_count",
                "must be > 0",
            ));
        }
        if toggle.poll_interval_secs == 0 {
            return Err(DutError::invalid_config(
                "port_toggle.poll_interval_secs",
                "must be > 0",
            ));
        }
        if toggle.down_timeout_secs == 0 || toggle.up_timeout_secs == 0 {
            return Err(DutError::invalid_config(
                "port_toggle.timeouts",
                "timeouts must be > 0",
            ));
        }

        if self.psu.power_state_interval_secs == 0 || self.psu.retraction_interval_secs == 0 {
            return Err(DutError::invalid_config("psu", "poll intervals must be > 0"));
        }

        if self.thermal.cooling_interval_secs == 0 {
            return Err(DutError::invalid_config(
                "thermal.cooling_interval_secs",
                "must be > 0",
            ));
        }
        if !(0.0..1.0).contains(&self.thermal.psu_speed_tolerance) {
            return Err(DutError::invalid_config(
                "thermal.psu_speed_tolerance",
                "must be in [0, 1)",
            ));
        }
        if self.thermal.full_cooling_level <= 0 {
            return Err(DutError::invalid_config(
                "thermal.full_cooling_level",
                "must be > 0",
            ));
        }

        if self.numbering.fan_multiplier <= 0
            || self.numbering.fan_drawer_multiplier <= self.numbering.fan_multiplier
            || self.numbering.psu_multiplier <= 0
        {
            return Err(DutError::invalid_config(
                "numbering",
                "multipliers must be positive and nest (drawer > fan)",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = VerifyConfig::default();
        assert_eq!(config.port_toggle.down_timeout(), Duration::from_secs(120));
        assert_eq!(config.port_toggle.up_timeout(), Duration::from_secs(180));
        assert_eq!(config.port_toggle.reference_port_count, 28);
        assert_eq!(config.port_toggle.scaled_asic_types, vec!["mellanox"]);
        assert_eq!(config.psu.retraction_timeout(), Duration::from_secs(120));
        assert_eq!(config.psu.retraction_interval(), Duration::from_secs(20));
        assert_eq!(config.thermal.cooling_timeout(), Duration::from_secs(65));
        assert_eq!(config.snmp.community, "public");
        assert_eq!(config.numbering.psu_base, 600_000_000);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(VerifyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = VerifyConfig::default();
        config.port_toggle.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tolerance() {
        let mut config = VerifyConfig::default();
        config.thermal.psu_speed_tolerance = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DutError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate_numbering_nesting() {
        let mut config = VerifyConfig::default();
        config.numbering.fan_drawer_multiplier = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[port_toggle]
down_timeout_secs = 60
scaled_asic_types = ["mellanox", "nvidia-bluefield"]

[numbering]
psu_base = 700000000

[snmp]
community = "private"
"#;
        let config: VerifyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port_toggle.down_timeout_secs, 60);
        assert_eq!(config.port_toggle.scaled_asic_types.len(), 2);
        assert_eq!(config.numbering.psu_base, 700_000_000);
        assert_eq!(config.snmp.community, "private");
        // Unspecified values should use defaults
        assert_eq!(config.port_toggle.up_timeout_secs, 180);
        assert_eq!(config.numbering.chassis_id, 1);
        assert_eq!(config.snmp.version, "v2c");
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = VerifyConfig::load_or_default("/nonexistent/path.toml").unwrap();
        assert_eq!(config, VerifyConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[psu]\nsettle_secs = 10").unwrap();

        let config = VerifyConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.psu.settle(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[thermal]\nfull_cooling_level = 0").unwrap();
        assert!(VerifyConfig::load_or_default(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not toml at all [").unwrap();
        assert!(VerifyConfig::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = VerifyConfig::default();
        config.port_toggle.watch = true;
        config.save(file.path()).unwrap();

        let loaded = VerifyConfig::load_or_default(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
