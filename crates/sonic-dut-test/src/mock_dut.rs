//! In-memory device doubles
//!
//! [`MockDut`] keeps CONFIG_DB/STATE_DB contents, per-view link state and an
//! entity MIB snapshot script behind a single lock, so a test can mutate
//! the device while a scenario polls it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use sonic_dut_common::{
    table_key, AdminState, CommandRunner, DbId, DutError, DutResult, EntityMibSource,
    EntitySnapshot, ExecResult, LinkStatusSource, LinkStatusView, PortControl, PsuController,
    PsuStatus, Record, SnmpCredentials, SpeedCapabilities, StateStore,
};

/// Matches `text` against a redis-style glob (`*` and `?`). `?` matches
/// one character, not one byte.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn view_index(view: LinkStatusView) -> usize {
    match view {
        LinkStatusView::InterfaceFacts => 0,
        LinkStatusView::ShowInterfaceStatus => 1,
    }
}

#[derive(Debug, Clone)]
struct PortLink {
    admin: AdminState,
    /// Operational state last reported by each view.
    oper: [bool; 2],
    /// Reads left before each view reflects the admin state.
    pending: [usize; 2],
}

impl PortLink {
    fn up() -> Self {
        Self {
            admin: AdminState::Up,
            oper: [true; 2],
            pending: [0; 2],
        }
    }
}

#[derive(Default)]
struct DutState {
    dbs: HashMap<DbId, BTreeMap<String, Record>>,
    commands: Vec<String>,
    responses: Vec<(String, ExecResult)>,
    links: BTreeMap<String, PortLink>,
    link_delay: [usize; 2],
    stuck: HashMap<String, bool>,
    failing_admin: Vec<AdminState>,
    admin_writes: Vec<(Vec<String>, AdminState)>,
    speed_writes: Vec<(String, String)>,
    snapshots: Vec<EntitySnapshot>,
    snapshot_fetches: usize,
    snapshot_error: Option<String>,
}

/// In-memory SONiC DUT.
pub struct MockDut {
    hostname: String,
    state: Mutex<DutState>,
}

impl Default for MockDut {
    fn default() -> Self {
        Self::new("dut")
    }
}

impl MockDut {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            state: Mutex::new(DutState::default()),
        }
    }

    /// Adds ports that are configured, admin up and link up.
    pub fn with_ports<S: AsRef<str>>(self, ports: &[S]) -> Self {
        for port in ports {
            self.add_port(port.as_ref());
        }
        self
    }

    pub fn add_port(&self, port: &str) {
        let mut state = self.state.lock();
        state
            .dbs
            .entry(DbId::ConfigDb)
            .or_default()
            .entry(table_key("PORT", port))
            .or_default()
            .insert("admin_status".to_string(), "up".to_string());
        state.links.insert(port.to_string(), PortLink::up());
    }

    /// Replaces a whole record.
    pub fn set_record(&self, db: DbId, key: &str, record: Record) {
        self.state
            .lock()
            .dbs
            .entry(db)
            .or_default()
            .insert(key.to_string(), record);
    }

    pub fn set_field(&self, db: DbId, key: &str, field: &str, value: &str) {
        self.state
            .lock()
            .dbs
            .entry(db)
            .or_default()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn remove_key(&self, db: DbId, key: &str) {
        if let Some(table) = self.state.lock().dbs.get_mut(&db) {
            table.remove(key);
        }
    }

    pub fn record(&self, db: DbId, key: &str) -> Option<Record> {
        self.state
            .lock()
            .dbs
            .get(&db)
            .and_then(|t| t.get(key))
            .cloned()
    }

    /// Number of reads each view lags behind an admin change.
    pub fn set_link_delay(&self, interface_facts: usize, interface_status: usize) {
        self.state.lock().link_delay = [interface_facts, interface_status];
    }

    /// Pins the operational state of `port` regardless of admin changes.
    pub fn set_stuck(&self, port: &str, oper_up: bool) {
        self.state.lock().stuck.insert(port.to_string(), oper_up);
    }

    /// Makes admin writes of `state` fail with a transport error.
    pub fn fail_admin_state(&self, state: AdminState) {
        self.state.lock().failing_admin.push(state);
    }

    /// Returns `result` for commands starting with `prefix`.
    pub fn respond(&self, prefix: &str, result: ExecResult) {
        self.state
            .lock()
            .responses
            .push((prefix.to_string(), result));
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn admin_writes(&self) -> Vec<(Vec<String>, AdminState)> {
        self.state.lock().admin_writes.clone()
    }

    pub fn speed_writes(&self) -> Vec<(String, String)> {
        self.state.lock().speed_writes.clone()
    }

    /// Replaces the snapshot script with a single snapshot.
    pub fn set_snapshot(&self, snapshot: EntitySnapshot) {
        let mut state = self.state.lock();
        state.snapshots = vec![snapshot];
        state.snapshot_fetches = 0;
    }

    /// Appends a snapshot returned once every earlier one was fetched. The
    /// last snapshot repeats.
    pub fn then_snapshot(&self, snapshot: EntitySnapshot) {
        self.state.lock().snapshots.push(snapshot);
    }

    pub fn fail_snapshot(&self, message: &str) {
        self.state.lock().snapshot_error = Some(message.to_string());
    }

    pub fn snapshot_fetches(&self) -> usize {
        self.state.lock().snapshot_fetches
    }
}

#[async_trait]
impl CommandRunner for MockDut {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn run(&self, command: &str) -> DutResult<ExecResult> {
        let mut state = self.state.lock();
        state.commands.push(command.to_string());
        debug!("[{}] {}", self.hostname, command);
        Ok(state
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PortControl for MockDut {
    async fn set_admin_state(&self, ports: &[String], admin: AdminState) -> DutResult<()> {
        let mut state = self.state.lock();
        if state.failing_admin.contains(&admin) {
            return Err(DutError::transport(
                &self.hostname,
                format!("connection lost while setting ports {}", admin),
            ));
        }
        state.admin_writes.push((ports.to_vec(), admin));

        let delay = state.link_delay;
        for port in ports {
            state
                .dbs
                .entry(DbId::ConfigDb)
                .or_default()
                .entry(table_key("PORT", port))
                .or_default()
                .insert("admin_status".to_string(), admin.as_str().to_string());
            let link = state
                .links
                .entry(port.clone())
                .or_insert_with(PortLink::up);
            link.admin = admin;
            link.pending = delay;
        }
        Ok(())
    }

    async fn set_speed(&self, port: &str, speed: &str) -> DutResult<()> {
        let mut state = self.state.lock();
        state
            .speed_writes
            .push((port.to_string(), speed.to_string()));
        state
            .dbs
            .entry(DbId::ConfigDb)
            .or_default()
            .entry(table_key("PORT", port))
            .or_default()
            .insert("speed".to_string(), speed.to_string());
        Ok(())
    }
}

#[async_trait]
impl StateStore for MockDut {
    async fn get_record(&self, db: DbId, key: &str) -> DutResult<Record> {
        Ok(self.record(db, key).unwrap_or_default())
    }

    async fn list_keys(&self, db: DbId, pattern: &str) -> DutResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .dbs
            .get(&db)
            .map(|table| {
                table
                    .keys()
                    .filter(|k| glob_match(pattern, k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl LinkStatusSource for MockDut {
    async fn down_ports(
        &self,
        view: LinkStatusView,
        ports: &[String],
    ) -> DutResult<BTreeSet<String>> {
        let idx = view_index(view);
        let mut state = self.state.lock();
        let DutState { links, stuck, .. } = &mut *state;

        let mut down = BTreeSet::new();
        for port in ports {
            let Some(link) = links.get_mut(port) else {
                down.insert(port.clone());
                continue;
            };
            if link.pending[idx] > 0 {
                link.pending[idx] -= 1;
            } else {
                link.oper[idx] = stuck
                    .get(port)
                    .copied()
                    .unwrap_or(link.admin == AdminState::Up);
            }
            if !link.oper[idx] {
                down.insert(port.clone());
            }
        }
        Ok(down)
    }
}

#[async_trait]
impl EntityMibSource for MockDut {
    async fn get_snapshot(&self, _credentials: &SnmpCredentials) -> DutResult<EntitySnapshot> {
        let mut state = self.state.lock();
        if let Some(message) = &state.snapshot_error {
            return Err(DutError::snapshot(message.clone()));
        }
        let index = state
            .snapshot_fetches
            .min(state.snapshots.len().saturating_sub(1));
        state.snapshot_fetches += 1;
        Ok(state.snapshots.get(index).cloned().unwrap_or_default())
    }
}

/// Operation observed on a [`MockFanout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOp {
    AdminState(String, AdminState),
    Speed(String, String),
}

/// In-memory fanout switch.
#[derive(Default)]
pub struct MockFanout {
    speeds: Mutex<HashMap<String, Vec<String>>>,
    ops: Mutex<Vec<FanoutOp>>,
}

impl MockFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capability list of `port`, in the fanout's own unit.
    pub fn with_speeds(self, port: &str, speeds: &[&str]) -> Self {
        self.speeds.lock().insert(
            port.to_string(),
            speeds.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn ops(&self) -> Vec<FanoutOp> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl PortControl for MockFanout {
    async fn set_admin_state(&self, ports: &[String], state: AdminState) -> DutResult<()> {
        let mut ops = self.ops.lock();
        for port in ports {
            ops.push(FanoutOp::AdminState(port.clone(), state));
        }
        Ok(())
    }

    async fn set_speed(&self, port: &str, speed: &str) -> DutResult<()> {
        self.ops
            .lock()
            .push(FanoutOp::Speed(port.to_string(), speed.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SpeedCapabilities for MockFanout {
    async fn supported_speeds(&self, port: &str) -> DutResult<Option<Vec<String>>> {
        Ok(self.speeds.lock().get(port).cloned())
    }
}

/// In-memory PDU.
///
/// Each controller PSU `<id>` powers STATE_DB `PSU_INFO|PSU <id>` of the
/// attached DUT, if any.
pub struct MockPsuController<'a> {
    psus: Mutex<Vec<PsuStatus>>,
    /// PSUs that ignore power-on requests.
    dead: BTreeSet<String>,
    dut: Option<&'a MockDut>,
}

impl<'a> MockPsuController<'a> {
    /// A controller with PSUs `1..=count`, all powered.
    pub fn new(count: usize) -> Self {
        let psus = (1..=count)
            .map(|i| PsuStatus {
                psu_id: i.to_string(),
                psu_on: true,
            })
            .collect();
        Self {
            psus: Mutex::new(psus),
            dead: BTreeSet::new(),
            dut: None,
        }
    }

    pub fn attached_to(mut self, dut: &'a MockDut) -> Self {
        self.dut = Some(dut);
        self
    }

    pub fn with_power(self, psu_id: &str, on: bool) -> Self {
        self.apply(psu_id, on);
        self
    }

    pub fn with_dead_psu(mut self, psu_id: &str) -> Self {
        self.dead.insert(psu_id.to_string());
        self
    }

    fn apply(&self, psu_id: &str, on: bool) {
        for psu in self.psus.lock().iter_mut().filter(|p| p.psu_id == psu_id) {
            psu.psu_on = on;
        }
        if let Some(dut) = self.dut {
            dut.set_field(
                DbId::StateDb,
                &table_key("PSU_INFO", &format!("PSU {}", psu_id)),
                "status",
                if on { "true" } else { "false" },
            );
        }
    }
}

#[async_trait]
impl PsuController for MockPsuController<'_> {
    async fn psu_status(&self) -> DutResult<Vec<PsuStatus>> {
        Ok(self.psus.lock().clone())
    }

    async fn turn_on_psu(&self, psu_id: &str) -> DutResult<()> {
        if !self.dead.contains(psu_id) {
            self.apply(psu_id, true);
        }
        Ok(())
    }

    async fn turn_off_psu(&self, psu_id: &str) -> DutResult<()> {
        self.apply(psu_id, false);
        Ok(())
    }
}
