//! Port admin toggle with convergence checks.
//!
//! A toggle shuts a batch of ports, waits until both link status views
//! agree every port is down, brings the batch back up and waits until
//! neither view reports any port down. Both phases always run; their
//! failures are collected and raised together.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{info, instrument, warn};

use sonic_dut_common::{
    key_name, poll, shell, AdminState, CommandRunner, ConvergencePollResult, DbId, DeviceFacts,
    DutError, DutResult, LinkStatusSource, LinkStatusView, PortControl, StateStore,
};

use crate::config::PortToggleConfig;
use crate::tables;

/// Commands logged in watch mode after the bring-down command.
pub const WATCH_COMMANDS: [&str; 3] = [
    "show system-memory",
    "show processes cpu | grep orchagent | awk '{print $9}'",
    "redis-cli info memory | grep used_memory_human",
];

/// Bring-down and bring-up timeouts for one toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleTimeouts {
    pub down: Duration,
    pub up: Duration,
}

/// Chooses toggle timeouts for a device and port count.
///
/// Any `Fn(&DeviceFacts, usize) -> ToggleTimeouts` closure is a policy.
pub trait ToggleWaitPolicy: Send + Sync {
    fn timeouts(&self, facts: &DeviceFacts, port_count: usize) -> ToggleTimeouts;
}

impl<F> ToggleWaitPolicy for F
where
    F: Fn(&DeviceFacts, usize) -> ToggleTimeouts + Send + Sync,
{
    fn timeouts(&self, facts: &DeviceFacts, port_count: usize) -> ToggleTimeouts {
        self(facts, port_count)
    }
}

/// Scales `base` by `max(port_count, reference) / reference`, truncated to
/// whole seconds.
pub fn scaled_timeout(base: Duration, port_count: usize, reference: usize) -> Duration {
    if reference == 0 {
        return base;
    }
    let factor = port_count.max(reference) as f64 / reference as f64;
    Duration::from_secs((base.as_secs_f64() * factor) as u64)
}

/// Base timeouts, scaled by port count on the configured ASIC types.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultWaitPolicy {
    pub base: ToggleTimeouts,
    pub reference_port_count: usize,
    pub scaled_asic_types: Vec<String>,
}

impl Default for DefaultWaitPolicy {
    fn default() -> Self {
        Self::from_config(&PortToggleConfig::default())
    }
}

impl DefaultWaitPolicy {
    pub fn from_config(config: &PortToggleConfig) -> Self {
        Self {
            base: ToggleTimeouts {
                down: config.down_timeout(),
                up: config.up_timeout(),
            },
            reference_port_count: config.reference_port_count,
            scaled_asic_types: config.scaled_asic_types.clone(),
        }
    }
}

impl ToggleWaitPolicy for DefaultWaitPolicy {
    fn timeouts(&self, facts: &DeviceFacts, port_count: usize) -> ToggleTimeouts {
        if !self.scaled_asic_types.iter().any(|t| *t == facts.asic_type) {
            return self.base;
        }
        ToggleTimeouts {
            down: scaled_timeout(self.base.down, port_count, self.reference_port_count),
            up: scaled_timeout(self.base.up, port_count, self.reference_port_count),
        }
    }
}

/// Requested ports not yet reported down by both views.
pub fn ports_still_up(
    requested: &BTreeSet<String>,
    facts_down: &BTreeSet<String>,
    status_down: &BTreeSet<String>,
) -> BTreeSet<String> {
    let both_down: BTreeSet<&String> = facts_down.intersection(status_down).collect();
    requested
        .iter()
        .filter(|p| !both_down.contains(p))
        .cloned()
        .collect()
}

/// Requested ports reported down by either view.
pub fn ports_still_down(
    requested: &BTreeSet<String>,
    facts_down: &BTreeSet<String>,
    status_down: &BTreeSet<String>,
) -> BTreeSet<String> {
    facts_down
        .union(status_down)
        .filter(|p| requested.contains(*p))
        .cloned()
        .collect()
}

/// Outcome of a successful toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleReport {
    pub ports: Vec<String>,
    pub timeouts: ToggleTimeouts,
    pub down: ConvergencePollResult,
    pub up: ConvergencePollResult,
}

/// Drives admin down/up toggles on a DUT.
pub struct PortToggle<'a, D: ?Sized> {
    dut: &'a D,
    facts: DeviceFacts,
    policy: Box<dyn ToggleWaitPolicy + 'a>,
    poll_interval: Duration,
    wait_after_ports_up: Duration,
    watch: bool,
}

impl<'a, D> PortToggle<'a, D>
where
    D: PortControl + LinkStatusSource + StateStore + CommandRunner + ?Sized,
{
    /// Creates a toggle with the default timings and wait policy.
    pub fn new(dut: &'a D, facts: DeviceFacts) -> Self {
        Self::from_config(dut, facts, &PortToggleConfig::default())
    }

    pub fn from_config(dut: &'a D, facts: DeviceFacts, config: &PortToggleConfig) -> Self {
        Self {
            dut,
            facts,
            policy: Box::new(DefaultWaitPolicy::from_config(config)),
            poll_interval: config.poll_interval(),
            wait_after_ports_up: config.wait_after_ports_up(),
            watch: config.watch,
        }
    }

    pub fn with_wait_policy(mut self, policy: impl ToggleWaitPolicy + 'a) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the delay applied after a successful toggle.
    pub fn with_wait_after_ports_up(mut self, delay: Duration) -> Self {
        self.wait_after_ports_up = delay;
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Timeouts the configured policy picks for `port_count` ports.
    pub fn timeouts_for(&self, port_count: usize) -> ToggleTimeouts {
        self.policy.timeouts(&self.facts, port_count)
    }

    /// Ports configured in CONFIG_DB, sorted.
    pub async fn configured_ports(&self) -> DutResult<Vec<String>> {
        let pattern = tables::all_keys_pattern(tables::CFG_PORT_TABLE_NAME);
        let keys = self.dut.list_keys(DbId::ConfigDb, &pattern).await?;
        let ports: BTreeSet<String> = keys.iter().map(|k| key_name(k).to_string()).collect();
        Ok(ports.into_iter().collect())
    }

    /// Toggles `ports` (every configured port if empty) with timeouts from
    /// the wait policy.
    pub async fn toggle(&self, ports: &[String]) -> DutResult<ToggleReport> {
        let ports = self.resolve_ports(ports).await?;
        let timeouts = self.timeouts_for(ports.len());
        self.toggle_ports(ports, timeouts).await
    }

    /// Toggles `ports` (every configured port if empty) with explicit
    /// timeouts.
    pub async fn toggle_with_timeouts(
        &self,
        ports: &[String],
        timeouts: ToggleTimeouts,
    ) -> DutResult<ToggleReport> {
        let ports = self.resolve_ports(ports).await?;
        self.toggle_ports(ports, timeouts).await
    }

    async fn resolve_ports(&self, ports: &[String]) -> DutResult<Vec<String>> {
        let ports = if ports.is_empty() {
            self.configured_ports().await?
        } else {
            let mut seen = BTreeSet::new();
            ports
                .iter()
                .filter(|p| seen.insert(p.as_str()))
                .cloned()
                .collect()
        };
        if ports.is_empty() {
            return Err(DutError::precondition("no ports to toggle"));
        }
        Ok(ports)
    }

    #[instrument(skip(self, ports), fields(host = %self.dut.hostname(), count = ports.len()))]
    async fn toggle_ports(
        &self,
        ports: Vec<String>,
        timeouts: ToggleTimeouts,
    ) -> DutResult<ToggleReport> {
        let requested: BTreeSet<String> = ports.iter().cloned().collect();
        let mut failures = Vec::new();

        info!(
            "Toggling {} ports (down timeout {:?}, up timeout {:?})",
            ports.len(),
            timeouts.down,
            timeouts.up
        );

        let down = match self.bring_down(&ports, &requested, timeouts.down).await {
            Ok(result) => {
                if !result.converged {
                    failures.push(DutError::convergence_timeout(
                        "ports down",
                        timeouts.down,
                        result.last_mismatch.iter().cloned(),
                    ));
                }
                Some(result)
            }
            Err(e) => {
                warn!("Bring-down failed: {}", e);
                failures.push(e);
                None
            }
        };

        let up = match self.bring_up(&ports, &requested, timeouts.up).await {
            Ok(result) => {
                if !result.converged {
                    failures.push(DutError::convergence_timeout(
                        "ports up",
                        timeouts.up,
                        result.last_mismatch.iter().cloned(),
                    ));
                }
                Some(result)
            }
            Err(e) => {
                warn!("Bring-up failed: {}", e);
                failures.push(e);
                None
            }
        };

        let (Some(down), Some(up)) = (down, up) else {
            return Err(DutError::PortToggle { failures });
        };
        if !failures.is_empty() {
            return Err(DutError::PortToggle { failures });
        }

        info!(
            "All ports up, waiting {:?} for the control plane to settle",
            self.wait_after_ports_up
        );
        tokio::time::sleep(self.wait_after_ports_up).await;

        Ok(ToggleReport {
            ports,
            timeouts,
            down,
            up,
        })
    }

    async fn bring_down(
        &self,
        ports: &[String],
        requested: &BTreeSet<String>,
        timeout: Duration,
    ) -> DutResult<ConvergencePollResult> {
        info!("Shutting down {} ports", ports.len());
        self.dut.set_admin_state(ports, AdminState::Down).await?;

        if self.watch {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.log_system_resources().await;
        }

        let result = poll::poll_convergence(timeout, self.poll_interval, move || async move {
            let (facts_down, status_down) = self.down_sets(ports).await?;
            Ok::<_, DutError>(ports_still_up(requested, &facts_down, &status_down))
        })
        .await?;

        if result.converged {
            info!("All {} ports down after {:?}", ports.len(), result.elapsed);
        } else {
            warn!("Ports still up: {:?}", result.last_mismatch);
        }
        Ok(result)
    }

    async fn bring_up(
        &self,
        ports: &[String],
        requested: &BTreeSet<String>,
        timeout: Duration,
    ) -> DutResult<ConvergencePollResult> {
        info!("Bringing up {} ports", ports.len());
        self.dut.set_admin_state(ports, AdminState::Up).await?;

        let result = poll::poll_convergence(timeout, self.poll_interval, move || async move {
            let (facts_down, status_down) = self.down_sets(ports).await?;
            Ok::<_, DutError>(ports_still_down(requested, &facts_down, &status_down))
        })
        .await?;

        if result.converged {
            info!("All {} ports up after {:?}", ports.len(), result.elapsed);
        } else {
            warn!("Ports still down: {:?}", result.last_mismatch);
        }
        Ok(result)
    }

    async fn down_sets(
        &self,
        ports: &[String],
    ) -> DutResult<(BTreeSet<String>, BTreeSet<String>)> {
        let facts_down = self
            .dut
            .down_ports(LinkStatusView::InterfaceFacts, ports)
            .await?;
        let status_down = self
            .dut
            .down_ports(LinkStatusView::ShowInterfaceStatus, ports)
            .await?;
        Ok((facts_down, status_down))
    }

    async fn log_system_resources(&self) {
        for cmd in WATCH_COMMANDS {
            match shell::run_checked(self.dut, cmd).await {
                Ok(output) => info!("{}:\n{}", cmd, output.trim_end()),
                Err(e) => warn!("Failed to collect '{}': {}", cmd, e),
            }
        }
    }
}
