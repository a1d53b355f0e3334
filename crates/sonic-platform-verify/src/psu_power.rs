//! PSU power-off scenario.
//!
//! Cuts power to one PSU through an external controller and checks that
//! the SNMP agent withdraws that PSU's sensor rows while keeping the PSU
//! row itself.

use tracing::{info, instrument};

use sonic_dut_common::{
    poll, DutError, DutResult, EntityMibSource, PsuController, PsuStatus, StateStore,
};

use crate::config::PsuConfig;
use crate::entity_verify::EntityVerifier;

/// What the scenario did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerOffOutcome {
    /// Controller identifier of the PSU that was powered off.
    pub psu_id: String,
    /// PSUs that had to be powered on first.
    pub powered_on: Vec<String>,
}

async fn psu_is_on<C>(controller: &C, psu_id: &str) -> DutResult<Option<bool>>
where
    C: PsuController + ?Sized,
{
    let status = controller.psu_status().await?;
    Ok(status
        .iter()
        .find(|s| s.psu_id == psu_id)
        .map(|s| s.psu_on))
}

/// Powers every PSU on, then powers the first one off and waits for the
/// entity MIB to retract its sensors.
///
/// Fails with [`DutError::Precondition`] when fewer than two PSUs are
/// controllable or not all of them can be powered on.
#[instrument(skip_all)]
pub async fn power_off_and_verify_retraction<C, S, M>(
    controller: &C,
    verifier: &EntityVerifier<'_, S, M>,
    config: &PsuConfig,
) -> DutResult<PowerOffOutcome>
where
    C: PsuController + ?Sized,
    S: StateStore + ?Sized,
    M: EntityMibSource + ?Sized,
{
    let status = controller.psu_status().await?;
    if status.len() < 2 {
        return Err(DutError::precondition(format!(
            "at least 2 PSUs required, found {}",
            status.len()
        )));
    }

    let mut powered_on = Vec::new();
    for psu in status.iter().filter(|s| !s.psu_on) {
        info!("Powering on PSU {}", psu.psu_id);
        controller.turn_on_psu(&psu.psu_id).await?;
        powered_on.push(psu.psu_id.clone());
        tokio::time::sleep(config.settle()).await;
    }

    let status = controller.psu_status().await?;
    let off: Vec<&PsuStatus> = status.iter().filter(|s| !s.psu_on).collect();
    if !off.is_empty() {
        return Err(DutError::precondition(format!(
            "PSUs not powered on: {}",
            off.iter()
                .map(|s| s.psu_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    let Some(first) = status.first() else {
        return Err(DutError::precondition("no PSUs reported"));
    };
    let psu_id = first.psu_id.clone();

    info!("Powering off PSU {}", psu_id);
    controller.turn_off_psu(&psu_id).await?;

    let target = psu_id.as_str();
    let powered_off = poll::wait_until(
        config.power_state_timeout(),
        config.power_state_interval(),
        move || async move { Ok::<_, DutError>(psu_is_on(controller, target).await? == Some(false)) },
    )
    .await?;
    if !powered_off {
        return Err(DutError::convergence_timeout(
            "PSU power off",
            config.power_state_timeout(),
            [psu_id],
        ));
    }

    let retracted = verifier
        .wait_psu_sensor_retraction(config.retraction_timeout(), config.retraction_interval())
        .await?;
    if !retracted {
        return Err(DutError::convergence_timeout(
            "PSU sensor retraction",
            config.retraction_timeout(),
            [psu_id],
        ));
    }

    info!("Sensors of powered-off PSU {} retracted", psu_id);
    Ok(PowerOffOutcome { psu_id, powered_on })
}
