//! Verification helpers for scenario tests
//!
//! Assertions over the commands a double captured and the records it holds.

use sonic_dut_common::{DbId, RecordExt};
use thiserror::Error;

use crate::MockDut;

/// Verification error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Expected key '{key}' not found in {db}")]
    KeyNotFound { db: &'static str, key: String },

    #[error("Value mismatch for {key}:{field}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        key: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Command containing '{expected}' was not executed; executed: {executed:?}")]
    CommandNotExecuted {
        expected: String,
        executed: Vec<String>,
    },

    #[error("Command containing '{unexpected}' was executed")]
    UnexpectedCommand { unexpected: String },

    #[error("Commands out of order: expected '{first}' before '{second}'")]
    CommandOrder { first: String, second: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Record verifier over a [`MockDut`]
pub struct StateVerifier<'a> {
    dut: &'a MockDut,
}

impl<'a> StateVerifier<'a> {
    pub fn new(dut: &'a MockDut) -> Self {
        Self { dut }
    }

    /// Verify that a hash field has a specific value
    pub fn assert_field_value(
        &self,
        db: DbId,
        key: &str,
        field: &str,
        expected: &str,
    ) -> VerifyResult<()> {
        let record = self
            .dut
            .record(db, key)
            .ok_or_else(|| VerificationError::KeyNotFound {
                db: db.name(),
                key: key.to_string(),
            })?;
        let actual = record.get_field_or(field, "");
        if actual == expected {
            Ok(())
        } else {
            Err(VerificationError::ValueMismatch {
                key: key.to_string(),
                field: field.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

/// Command execution verifier
pub struct CommandVerifier {
    captured_commands: Vec<String>,
}

impl CommandVerifier {
    /// Create a new command verifier
    pub fn new(captured_commands: Vec<String>) -> Self {
        Self { captured_commands }
    }

    fn position(&self, expected: &str) -> Option<usize> {
        self.captured_commands
            .iter()
            .position(|cmd| cmd.contains(expected))
    }

    /// Verify that a specific command was executed
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        match self.position(expected) {
            Some(_) => Ok(()),
            None => Err(VerificationError::CommandNotExecuted {
                expected: expected.to_string(),
                executed: self.captured_commands.clone(),
            }),
        }
    }

    /// Verify that a command was NOT executed
    pub fn assert_command_not_executed(&self, unexpected: &str) -> VerifyResult<()> {
        match self.position(unexpected) {
            Some(_) => Err(VerificationError::UnexpectedCommand {
                unexpected: unexpected.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Verify that the first command containing `first` ran before the
    /// first command containing `second`
    pub fn assert_command_order(&self, first: &str, second: &str) -> VerifyResult<()> {
        let a = self
            .position(first)
            .ok_or_else(|| VerificationError::CommandNotExecuted {
                expected: first.to_string(),
                executed: self.captured_commands.clone(),
            })?;
        let b = self
            .position(second)
            .ok_or_else(|| VerificationError::CommandNotExecuted {
                expected: second.to_string(),
                executed: self.captured_commands.clone(),
            })?;
        if a < b {
            Ok(())
        } else {
            Err(VerificationError::CommandOrder {
                first: first.to_string(),
                second: second.to_string(),
            })
        }
    }

    /// Count commands containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.captured_commands
            .iter()
            .filter(|cmd| cmd.contains(pattern))
            .count()
    }
}
