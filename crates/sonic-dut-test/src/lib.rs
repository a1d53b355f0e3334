//! Test infrastructure for SONiC platform verification
//!
//! Provides:
//! - In-memory DUT with CONFIG_DB/STATE_DB, lagging link-status views and a
//!   scripted entity MIB snapshot
//! - Fanout and PDU doubles
//! - A reference platform (STATE_DB rows plus the matching snapshot)
//! - Command and record verification helpers

pub mod fixtures;
mod mock_dut;
mod verification;

pub use fixtures::*;
pub use mock_dut::{glob_match, FanoutOp, MockDut, MockFanout, MockPsuController};
pub use verification::*;
