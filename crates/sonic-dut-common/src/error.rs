//! Error types for device-under-test operations.
//!
//! This module defines the error taxonomy shared by every crate that drives
//! or reads a DUT. All errors implement `std::error::Error` via `thiserror`.

use std::collections::BTreeSet;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for DUT operations.
pub type DutResult<T> = Result<T, DutError>;

/// Errors that can occur while driving or verifying a device.
#[derive(Debug, Error)]
pub enum DutError {
    /// Failed to spawn a local shell command.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned a non-zero exit code.
    #[error("Command failed on {host}: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// Host the command ran on.
        host: String,
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The remote transport itself failed (connection, session, timeout).
    #[error("Transport failure on {host}: {message}")]
    Transport {
        /// Host the operation targeted.
        host: String,
        /// Error message.
        message: String,
    },

    /// State store lookup failed.
    #[error("Database operation failed: {operation}: {message}")]
    Database {
        /// The operation that failed (e.g., "hgetall", "keys").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Management-protocol snapshot could not be fetched or decoded.
    #[error("Entity MIB snapshot failed: {message}")]
    Snapshot {
        /// Error message.
        message: String,
    },

    /// A record is missing a field or holds an unparsable value.
    #[error("Invalid record {key}: field '{field}': {message}")]
    InvalidRecord {
        /// The record key.
        key: String,
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A bounded poll ran out of time before state converged.
    #[error("{what} did not converge within {timeout:?}: {}", format_set(.mismatched))]
    ConvergenceTimeout {
        /// What was being waited for.
        what: String,
        /// The timeout that was exhausted.
        timeout: Duration,
        /// Identifiers or ports still not in the target state.
        mismatched: BTreeSet<String>,
    },

    /// Entity parent could not be resolved, or two entities collide.
    #[error("Inconsistent entity hierarchy at '{entity}': {reason}")]
    InconsistentHierarchy {
        /// The entity being resolved.
        entity: String,
        /// Why the hierarchy is inconsistent.
        reason: String,
    },

    /// Expected and observed physical entity views disagree.
    #[error("{} physical entity mismatch(es): {}", .mismatches.len(), .mismatches.join("; "))]
    EntityMismatch {
        /// Human readable mismatch lines, each naming the identifier.
        mismatches: Vec<String>,
    },

    /// Port toggle failed in one or both phases.
    #[error("Port toggle failed: {}", format_failures(.failures))]
    PortToggle {
        /// Bring-down and/or bring-up failures, in phase order.
        failures: Vec<DutError>,
    },

    /// PSU fans did not follow the cooling level.
    #[error("PSU fan speed does not follow cooling level {cooling_level}: PSU {}", format_indices(.psus))]
    PsuFanSpeed {
        /// Cooling level the speeds were measured at.
        cooling_level: i64,
        /// 1-based numbers of the offending PSUs.
        psus: Vec<usize>,
    },

    /// The scenario cannot run on this device.
    #[error("Precondition not met: {message}")]
    Precondition {
        /// Error message.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

fn format_indices(indices: &[usize]) -> String {
    let items: Vec<String> = indices.iter().map(ToString::to_string).collect();
    items.join(", ")
}

fn format_set(set: &BTreeSet<String>) -> String {
    let items: Vec<&str> = set.iter().map(String::as_str).collect();
    format!("{{{}}}", items.join(", "))
}

fn format_failures(failures: &[DutError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DutError {
    /// Creates a transport error.
    pub fn transport(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a database error.
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(
        key: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRecord {
            key: key.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a convergence timeout error.
    pub fn convergence_timeout(
        what: impl Into<String>,
        timeout: Duration,
        mismatched: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::ConvergenceTimeout {
            what: what.into(),
            timeout,
            mismatched: mismatched.into_iter().collect(),
        }
    }

    /// Creates an inconsistent hierarchy error.
    pub fn inconsistent_hierarchy(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentHierarchy {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Creates a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the remote execution or fetch failed outright,
    /// as opposed to the device reporting a state mismatch.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DutError::ShellExec { .. }
                | DutError::Transport { .. }
                | DutError::Snapshot { .. }
                | DutError::Io(_)
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DutError::Transport { .. }
                | DutError::Database { .. }
                | DutError::Snapshot { .. }
                | DutError::CommandFailed { .. }
        )
    }
}
