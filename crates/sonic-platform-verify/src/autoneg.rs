//! Auto-negotiation between DUT ports and their fanout peers.
//!
//! For each link the DUT advertises exactly one speed that the fanout is
//! forced to. The speed is the first entry of the fanout's capability list
//! that the DUT also supports.

use tracing::{info, instrument, warn};

use sonic_dut_common::{
    shell, table_key, AdminState, CommandRunner, DbId, DutError, DutResult, PortControl,
    RecordExt, SpeedCapabilities, StateStore,
};

use crate::tables::{self, fields};

/// Converts a fanout speed ("25G") to the DUT unit ("25000").
pub fn peer_speed_to_local(speed: &str) -> Option<String> {
    let gbps = speed.strip_suffix('G')?;
    if gbps.is_empty() || !gbps.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}000", gbps))
}

/// A speed both ends support, in each end's unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedMatch {
    pub peer: String,
    pub local: String,
}

/// Returns the first peer speed, in peer order, whose local equivalent is
/// in `local`.
pub fn select_speed(local: &[String], peer: &[String]) -> Option<SpeedMatch> {
    peer.iter().find_map(|p| {
        let converted = peer_speed_to_local(p)?;
        local.contains(&converted).then(|| SpeedMatch {
            peer: p.clone(),
            local: converted,
        })
    })
}

/// Why a link was not configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// STATE_DB has no supported speed list for the DUT port.
    NoLocalSpeeds,
    /// The fanout reported no capabilities.
    NoPeerSpeeds,
    NoCommonSpeed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Configured {
        dut_port: String,
        fanout_port: String,
        speed: SpeedMatch,
    },
    Skipped {
        dut_port: String,
        fanout_port: String,
        reason: SkipReason,
    },
}

impl NegotiationOutcome {
    pub fn is_configured(&self) -> bool {
        matches!(self, NegotiationOutcome::Configured { .. })
    }
}

/// Reads the supported speeds of a DUT port from STATE_DB.
pub async fn local_supported_speeds<S>(dut: &S, port: &str) -> DutResult<Option<Vec<String>>>
where
    S: StateStore + ?Sized,
{
    let key = table_key(tables::STATE_PORT_TABLE_NAME, port);
    let record = dut.get_record(DbId::StateDb, &key).await?;
    let speeds: Vec<String> = record
        .get_field_or(fields::SUPPORTED_SPEEDS, "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok(if speeds.is_empty() { None } else { Some(speeds) })
}

/// Configures one DUT/fanout link for auto-negotiation.
///
/// Order matters: autoneg on, peer down, peer speed, peer up, then the DUT
/// advertisement.
#[instrument(skip(dut, fanout))]
pub async fn negotiate_pair<D, F>(
    dut: &D,
    fanout: &F,
    dut_port: &str,
    fanout_port: &str,
) -> DutResult<NegotiationOutcome>
where
    D: CommandRunner + StateStore + ?Sized,
    F: PortControl + SpeedCapabilities + ?Sized,
{
    let skipped = |reason| {
        warn!(
            "Skipping {} <-> {}: {:?}",
            dut_port, fanout_port, reason
        );
        Ok(NegotiationOutcome::Skipped {
            dut_port: dut_port.to_string(),
            fanout_port: fanout_port.to_string(),
            reason,
        })
    };

    let Some(local) = local_supported_speeds(dut, dut_port).await? else {
        return skipped(SkipReason::NoLocalSpeeds);
    };
    let Some(peer) = fanout.supported_speeds(fanout_port).await? else {
        return skipped(SkipReason::NoPeerSpeeds);
    };
    let Some(speed) = select_speed(&local, &peer) else {
        return skipped(SkipReason::NoCommonSpeed);
    };

    shell::run_checked(
        dut,
        &format!("config interface autoneg {} enabled", dut_port),
    )
    .await?;

    let peer_ports = [fanout_port.to_string()];
    fanout.set_admin_state(&peer_ports, AdminState::Down).await?;
    fanout.set_speed(fanout_port, &speed.peer).await?;
    fanout.set_admin_state(&peer_ports, AdminState::Up).await?;

    shell::run_checked(
        dut,
        &format!(
            "config interface advertised-speeds {} {}",
            dut_port, speed.local
        ),
    )
    .await?;

    info!(
        "Port {} advertises {} (fanout {} forced to {})",
        dut_port, speed.local, fanout_port, speed.peer
    );
    Ok(NegotiationOutcome::Configured {
        dut_port: dut_port.to_string(),
        fanout_port: fanout_port.to_string(),
        speed,
    })
}

/// Negotiates every `(dut_port, fanout_port)` candidate in order.
pub async fn run_auto_negotiation<D, F>(
    dut: &D,
    fanout: &F,
    candidates: &[(String, String)],
) -> DutResult<Vec<NegotiationOutcome>>
where
    D: CommandRunner + StateStore + ?Sized,
    F: PortControl + SpeedCapabilities + ?Sized,
{
    if candidates.is_empty() {
        return Err(DutError::precondition(
            "no port supports auto-negotiation",
        ));
    }

    let mut outcomes = Vec::with_capacity(candidates.len());
    for (dut_port, fanout_port) in candidates {
        outcomes.push(negotiate_pair(dut, fanout, dut_port, fanout_port).await?);
    }

    let configured = outcomes.iter().filter(|o| o.is_configured()).count();
    info!(
        "Configured {} of {} candidate links",
        configured,
        outcomes.len()
    );
    Ok(outcomes)
}
