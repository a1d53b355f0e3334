//! Fanout adapter for ONYX switches.
//!
//! The fanout sits on the far side of each DUT link. Only the operations
//! needed to drive a link peer are modelled: admin state, forced speed and
//! the advertised capability list.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::device::{AdminState, CommandRunner, PortControl, SpeedCapabilities};
use crate::error::DutResult;
use crate::shell::{self, ExecResult};

/// An ONYX fanout reached through a command transport that accepts
/// configuration-mode lines.
#[derive(Debug, Clone)]
pub struct OnyxHost<R> {
    runner: R,
}

impl<R: CommandRunner> OnyxHost<R> {
    /// Wraps a transport.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Runs configuration `lines` under the `parents` context.
    async fn config(&self, parents: &str, lines: &[&str]) -> DutResult<()> {
        for line in lines {
            let cmd = format!("{} {}", parents, line);
            shell::run_checked(&self.runner, &cmd).await?;
        }
        Ok(())
    }
}

/// Parses a capability line such as `Speed : 1G,10G,25G,auto`.
pub fn parse_capability_speeds(line: &str) -> Option<Vec<String>> {
    let items: Vec<&str> = line.trim().split(':').collect();
    if items.len() != 2 {
        return None;
    }
    let speeds: Vec<String> = items[1]
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "auto")
        .map(str::to_string)
        .collect();
    if speeds.is_empty() {
        None
    } else {
        Some(speeds)
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for OnyxHost<R> {
    fn hostname(&self) -> &str {
        self.runner.hostname()
    }

    async fn run(&self, command: &str) -> DutResult<ExecResult> {
        self.runner.run(command).await
    }
}

#[async_trait]
impl<R: CommandRunner> PortControl for OnyxHost<R> {
    async fn set_admin_state(&self, ports: &[String], state: AdminState) -> DutResult<()> {
        let line = match state {
            AdminState::Up => "no shutdown",
            AdminState::Down => "shutdown",
        };
        for port in ports {
            self.config(&format!("interface ethernet {}", port), &[line])
                .await?;
            info!("{} interface [{}]", line, port);
        }
        Ok(())
    }

    async fn set_speed(&self, port: &str, speed: &str) -> DutResult<()> {
        let line = format!("speed {} force", speed);
        self.config(&format!("interface ethernet {}", port), &[&line])
            .await?;
        debug!("Set force speed {} for port {} on onyx", speed, port);
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> SpeedCapabilities for OnyxHost<R> {
    /// Speeds are reported in ONYX units ("25G") without the "auto" entry.
    #[instrument(skip(self), fields(host = %self.runner.hostname()))]
    async fn supported_speeds(&self, port: &str) -> DutResult<Option<Vec<String>>> {
        let cmd = format!("show interfaces {} capabilities | include Speed", port);
        let result = self.runner.run(&cmd).await?;
        debug!(
            "Get supported speeds for port {} from onyx: {}",
            port, result.stdout
        );
        Ok(parse_capability_speeds(&result.stdout))
    }
}
