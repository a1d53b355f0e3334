//! Platform verification scenarios for SONiC devices under test.
//!
//! This crate drives a DUT through port, negotiation and platform
//! scenarios and cross-checks what the device reports through different
//! channels.
//!
//! # Responsibilities
//!
//! - Toggle ports down and up and wait for both link-status views to agree
//! - Negotiate a common speed with the fanout peer of each DUT port
//! - Derive the entity MIB identifier every physical entity should carry
//! - Compare the derived expectations with an SNMP entity MIB snapshot
//! - Power a PSU off and wait for its sensors to leave the entity MIB
//! - Check that PSU fan speeds follow the thermal cooling level
//!
//! # Tables
//!
//! | Database | Table | Purpose |
//! |----------|-------|---------|
//! | CONFIG_DB | PORT | Configured ports, admin status |
//! | STATE_DB | PORT_TABLE | Supported speeds per port |
//! | STATE_DB | FAN_DRAWER_INFO | Fan drawer inventory |
//! | STATE_DB | FAN_INFO | Fan inventory and speed |
//! | STATE_DB | PSU_INFO | PSU inventory, presence, readings |
//! | STATE_DB | TEMPERATURE_INFO | Thermal sensors |
//! | STATE_DB | PHYSICAL_ENTITY_INFO | Parent and position of each entity |
//! | STATE_DB | TRANSCEIVER_INFO | Transceiver inventory |
//! | STATE_DB | TRANSCEIVER_DOM_SENSOR | Transceiver DOM sensors |
//!
//! # Example
//!
//! ```ignore
//! use sonic_platform_verify::{EntityVerifier, PortToggle};
//!
//! PortToggle::new(&dut, facts).toggle(&[]).await?;
//! EntityVerifier::new(&dut, &dut).verify_all().await?.into_result()?;
//! ```

pub mod autoneg;
pub mod config;
pub mod entity;
pub mod entity_id;
pub mod entity_verify;
pub mod logging;
pub mod port_toggle;
pub mod psu_power;
pub mod tables;
pub mod thermal;

pub use autoneg::{run_auto_negotiation, NegotiationOutcome, SkipReason};
pub use config::VerifyConfig;
pub use entity::{EntityKind, EntityTable, EntityTree, PhysicalClass, PhysicalEntity};
pub use entity_id::{derive, Expectation, ExpectedEntity, NumberingScheme};
pub use entity_verify::{EntityVerifier, VerificationReport};
pub use logging::init_logging;
pub use port_toggle::{PortToggle, ToggleReport, ToggleTimeouts};
pub use psu_power::{power_off_and_verify_retraction, PowerOffOutcome};
pub use tables::*;
pub use thermal::{check_psu_fan_speed, CoolingCmp, FanPresenceMocker, PsuFanSpeedReport};
