//! Common infrastructure for driving and reading SONiC devices under test.
//!
//! This crate provides the pieces shared by every verification scenario:
//!
//! - [`device`]: Narrow collaborator traits (command execution, state store,
//!   link status, port control, entity MIB snapshot, PSU power)
//! - [`poll`]: Bounded convergence polling
//! - [`shell`]: Command quoting and local execution
//! - [`SonicHost`] / [`OnyxHost`]: Command-backed adapters for a SONiC DUT
//!   and an ONYX fanout
//! - [`error`]: Error taxonomy for DUT operations
//!
//! # Example
//!
//! ```ignore
//! use sonic_dut_common::{poll, DbId, StateStore};
//!
//! let converged = poll::wait_until(timeout, interval, || async {
//!     let rec = dut.get_record(DbId::StateDb, "PSU_INFO|PSU 1").await?;
//!     Ok::<_, DutError>(rec.get("status").map(String::as_str) == Some("false"))
//! })
//! .await?;
//! ```

pub mod device;
pub mod error;
pub mod onyx;
pub mod poll;
pub mod shell;
pub mod sonic_host;

// Re-export commonly used items at crate root
pub use device::{
    key_name, table_key, AdminState, CommandRunner, DbId, DeviceFacts,
    EntityMibRecord, EntityMibSource, EntitySnapshot, LinkStatusSource,
    LinkStatusView, PortControl, PsuController, PsuStatus, Record, RecordExt, SnmpCredentials,
    SpeedCapabilities, StateStore,
};
pub use error::{DutError, DutResult};
pub use onyx::OnyxHost;
pub use poll::{poll_convergence, wait_until, ConvergencePollResult};
pub use shell::{ExecResult, LocalShell};
pub use sonic_host::SonicHost;
