//! SONiC host adapter built on a [`CommandRunner`].
//!
//! Every collaborator interface the verification core needs from a SONiC
//! DUT is expressed as CLI commands run through the underlying transport:
//!
//! | Interface | Command |
//! |-----------|---------|
//! | [`StateStore::get_record`] | `redis-cli --raw -n <db> HGETALL <key>` |
//! | [`StateStore::list_keys`] | `redis-cli --raw -n <db> KEYS <pattern>` |
//! | [`PortControl::set_admin_state`] | `sonic-cfggen -a '<json>' --write-to-db` |
//! | [`PortControl::set_speed`] | `config interface speed <port> <speed>` |
//! | [`LinkStatusView::InterfaceFacts`] | `ip -br link show` |
//! | [`LinkStatusView::ShowInterfaceStatus`] | `show interfaces status` |

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::device::{
    AdminState, CommandRunner, DbId, DeviceFacts, LinkStatusSource, LinkStatusView, PortControl,
    Record, StateStore,
};
use crate::error::{DutError, DutResult};
use crate::shell::{self, shellquote, single_quote, ExecResult};

/// Column separator in `show` tables: two or more spaces.
static COLUMN_SEP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s{2,}").expect("Invalid regex pattern"));

/// A SONiC DUT reached through a command transport.
#[derive(Debug, Clone)]
pub struct SonicHost<R> {
    runner: R,
    facts: DeviceFacts,
}

impl<R: CommandRunner> SonicHost<R> {
    /// Wraps a transport with the device's static facts.
    pub fn new(runner: R, facts: DeviceFacts) -> Self {
        Self { runner, facts }
    }

    /// Returns the device facts.
    pub fn facts(&self) -> &DeviceFacts {
        &self.facts
    }

    /// Returns the underlying transport.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn redis_cmd(db: DbId, op: &str, arg: &str) -> String {
        format!(
            "{} --raw -n {} {} {}",
            shell::REDIS_CLI,
            db.id(),
            op,
            shellquote(arg)
        )
    }

    async fn db_query(&self, operation: &str, cmd: &str) -> DutResult<String> {
        shell::run_checked(&self.runner, cmd)
            .await
            .map_err(|e| match e {
                DutError::CommandFailed { output, .. } => DutError::database(operation, output),
                other => other,
            })
    }
}

/// Parses `redis-cli --raw HGETALL` output: field and value on
/// alternating lines. A trailing field without a value maps to "".
pub fn parse_hgetall(output: &str) -> Record {
    let content = output.trim_end_matches(['\n', '\r']);
    if content.trim().is_empty() {
        return Record::new();
    }
    let lines: Vec<&str> = content.lines().collect();
    lines
        .chunks(2)
        .map(|pair| {
            let value = pair.get(1).copied().unwrap_or_default();
            (pair[0].to_string(), value.to_string())
        })
        .collect()
}

/// Parses `redis-cli --raw KEYS` output, one key per line.
pub fn parse_keys(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `ip -br link show` into interface name to operational state.
pub fn parse_ip_brief(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let state = cols.next()?;
            let name = name.split('@').next().unwrap_or(name);
            Some((name.to_string(), state.to_string()))
        })
        .collect()
}

/// Parses `show interfaces status` into interface name to `Oper` column.
///
/// The column is located from the header row, so extra or reordered
/// columns do not matter.
pub fn parse_interface_status(output: &str) -> DutResult<BTreeMap<String, String>> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| DutError::internal("empty 'show interfaces status' output"))?;
    let columns: Vec<&str> = COLUMN_SEP_RE.split(header.trim()).collect();
    let name_idx = columns
        .iter()
        .position(|c| *c == "Interface")
        .ok_or_else(|| DutError::internal("no 'Interface' column in interface status"))?;
    let oper_idx = columns
        .iter()
        .position(|c| *c == "Oper")
        .ok_or_else(|| DutError::internal("no 'Oper' column in interface status"))?;

    let mut status = BTreeMap::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with('-') {
            continue;
        }
        let cells: Vec<&str> = COLUMN_SEP_RE.split(trimmed).collect();
        if let (Some(name), Some(oper)) = (cells.get(name_idx), cells.get(oper_idx)) {
            status.insert(name.to_string(), oper.to_string());
        }
    }
    Ok(status)
}

fn down_among(ports: &[String], states: &BTreeMap<String, String>, up: &str) -> BTreeSet<String> {
    ports
        .iter()
        .filter(|p| {
            states
                .get(p.as_str())
                .map(|s| !s.eq_ignore_ascii_case(up))
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for SonicHost<R> {
    fn hostname(&self) -> &str {
        self.runner.hostname()
    }

    async fn run(&self, command: &str) -> DutResult<ExecResult> {
        self.runner.run(command).await
    }
}

#[async_trait]
impl<R: CommandRunner> StateStore for SonicHost<R> {
    #[instrument(skip(self), fields(host = %self.runner.hostname()))]
    async fn get_record(&self, db: DbId, key: &str) -> DutResult<Record> {
        let cmd = Self::redis_cmd(db, "HGETALL", key);
        debug!("HGETALL from redis by command: {}", cmd);
        let stdout = self.db_query("hgetall", &cmd).await?;
        Ok(parse_hgetall(&stdout))
    }

    #[instrument(skip(self), fields(host = %self.runner.hostname()))]
    async fn list_keys(&self, db: DbId, pattern: &str) -> DutResult<Vec<String>> {
        let cmd = Self::redis_cmd(db, "KEYS", pattern);
        debug!("Getting keys from redis by command: {}", cmd);
        let stdout = self.db_query("keys", &cmd).await?;
        Ok(parse_keys(&stdout))
    }
}

#[async_trait]
impl<R: CommandRunner> PortControl for SonicHost<R> {
    #[instrument(skip(self, ports), fields(host = %self.runner.hostname(), count = ports.len()))]
    async fn set_admin_state(&self, ports: &[String], state: AdminState) -> DutResult<()> {
        let entries: serde_json::Map<String, serde_json::Value> = ports
            .iter()
            .map(|p| (p.clone(), json!({ "admin_status": state.as_str() })))
            .collect();
        let doc = json!({ "PORT": entries });
        let cmd = format!(
            "{} -a {} --write-to-db",
            shell::SONIC_CFGGEN_CMD,
            single_quote(&doc.to_string())
        );
        shell::run_checked(&self.runner, &cmd).await?;
        info!("Set admin status of {} ports to {}", ports.len(), state);
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.runner.hostname()))]
    async fn set_speed(&self, port: &str, speed: &str) -> DutResult<()> {
        let cmd = format!(
            "{} interface speed {} {}",
            shell::CONFIG_CMD,
            shellquote(port),
            shellquote(speed)
        );
        shell::run_checked(&self.runner, &cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> LinkStatusSource for SonicHost<R> {
    async fn down_ports(
        &self,
        view: LinkStatusView,
        ports: &[String],
    ) -> DutResult<BTreeSet<String>> {
        let down = match view {
            LinkStatusView::InterfaceFacts => {
                let cmd = format!("{} -br link show", shell::IP_CMD);
                let stdout = shell::run_checked(&self.runner, &cmd).await?;
                down_among(ports, &parse_ip_brief(&stdout), "UP")
            }
            LinkStatusView::ShowInterfaceStatus => {
                let cmd = format!("{} interfaces status", shell::SHOW_CMD);
                let stdout = shell::run_checked(&self.runner, &cmd).await?;
                down_among(ports, &parse_interface_status(&stdout)?, "up")
            }
        };
        debug!(?view, down = down.len(), "Observed down ports");
        Ok(down)
    }
}
