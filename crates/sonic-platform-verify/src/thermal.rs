//! Thermal control checks on Mellanox platforms.
//!
//! hw-management exposes the current cooling level and each PSU fan's
//! speed under `/run/hw-management/thermal/`. When thermal control lowers
//! the cooling level from full, PSU fans must slow down in proportion.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument, warn};

use sonic_dut_common::{poll, shell, CommandRunner, DutError, DutResult};

use crate::config::ThermalConfig;

pub const COOLING_CUR_STATE_PATH: &str = "/run/hw-management/thermal/cooling_cur_state";

/// Path of the fan speed of PSU `index` (1-based).
pub fn psu_speed_path(index: usize) -> String {
    format!("/run/hw-management/thermal/psu{}_fan1_speed_get", index)
}

/// How the cooling level is compared with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoolingCmp {
    Eq,
    Ne,
}

impl CoolingCmp {
    pub fn matches(self, actual: i64, expected: i64) -> bool {
        match self {
            CoolingCmp::Eq => actual == expected,
            CoolingCmp::Ne => actual != expected,
        }
    }
}

async fn read_int<R>(dut: &R, path: &str) -> DutResult<i64>
where
    R: CommandRunner + ?Sized,
{
    let output = shell::run_checked(dut, &format!("cat {}", path)).await?;
    output.trim().parse::<i64>().map_err(|e| {
        DutError::invalid_record(path, "content", format!("bad content '{}': {}", output.trim(), e))
    })
}

/// Reads the current cooling level.
pub async fn cooling_cur_state<R>(dut: &R) -> DutResult<i64>
where
    R: CommandRunner + ?Sized,
{
    read_int(dut, COOLING_CUR_STATE_PATH).await
}

/// Reads the fan speed of PSU `index` (0-based); `None` when the PSU
/// exposes no speed file.
pub async fn psu_fan_speed<R>(dut: &R, index: usize) -> DutResult<Option<i64>>
where
    R: CommandRunner + ?Sized,
{
    let path = psu_speed_path(index + 1);
    let exists = dut.run(&format!("test -f {}", path)).await?;
    if !exists.success() {
        debug!("{} does not exist", path);
        return Ok(None);
    }
    read_int(dut, &path).await.map(Some)
}

/// Reads the fan speed of the first `count` PSUs.
pub async fn psu_fan_speeds<R>(dut: &R, count: usize) -> DutResult<Vec<Option<i64>>>
where
    R: CommandRunner + ?Sized,
{
    let mut speeds = Vec::with_capacity(count);
    for index in 0..count {
        speeds.push(psu_fan_speed(dut, index).await?);
    }
    Ok(speeds)
}

/// Polls until the cooling level compares to `expected` as `cmp` asks.
pub async fn wait_for_cooling_state<R>(
    dut: &R,
    cmp: CoolingCmp,
    expected: i64,
    timeout: Duration,
    interval: Duration,
) -> DutResult<bool>
where
    R: CommandRunner + ?Sized,
{
    poll::wait_until(timeout, interval, move || async move {
        let actual = cooling_cur_state(dut).await?;
        debug!("Cooling level {} ({:?} {})", actual, cmp, expected);
        Ok::<_, DutError>(cmp.matches(actual, expected))
    })
    .await
}

/// Returns the indices of PSUs whose full/current speed ratio is outside
/// `tolerance` of `full_level / cooling_level`.
///
/// PSUs with a missing or zero reading on either side are skipped.
pub fn check_psu_fan_speed_ratio(
    full: &[Option<i64>],
    current: &[Option<i64>],
    cooling_level: i64,
    full_level: i64,
    tolerance: f64,
) -> DutResult<Vec<usize>> {
    if cooling_level <= 0 {
        return Err(DutError::invalid_record(
            COOLING_CUR_STATE_PATH,
            "content",
            format!("cooling level {} is not positive", cooling_level),
        ));
    }
    let expect = full_level as f64 / cooling_level as f64;

    let mut offending = Vec::new();
    for (index, (full_speed, current_speed)) in full.iter().zip(current).enumerate() {
        let (Some(f), Some(c)) = (full_speed, current_speed) else {
            continue;
        };
        if *f == 0 || *c == 0 {
            continue;
        }
        let actual = *f as f64 / *c as f64;
        let ok = if expect > actual {
            actual > expect * (1.0 - tolerance)
        } else if expect < actual {
            actual < expect * (1.0 + tolerance)
        } else {
            true
        };
        if !ok {
            debug!(
                "PSU {} speed ratio {:.3} outside {:.3} +/- {}",
                index, actual, expect, tolerance
            );
            offending.push(index);
        }
    }
    Ok(offending)
}

/// Forces thermal control to full cooling and back.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FanPresenceMocker: Send + Sync {
    /// Makes one fan appear absent so thermal control goes to full speed.
    async fn mock_absence(&self) -> DutResult<()>;

    /// Restores the fan.
    async fn mock_presence(&self) -> DutResult<()>;
}

/// Measurements of a passing PSU fan speed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsuFanSpeedReport {
    pub cooling_level: i64,
    pub full_speeds: Vec<Option<i64>>,
    pub current_speeds: Vec<Option<i64>>,
}

/// Waits for full cooling and samples the PSU fan speeds there.
async fn sample_full_speeds<R>(
    dut: &R,
    psu_count: usize,
    config: &ThermalConfig,
) -> DutResult<Vec<Option<i64>>>
where
    R: CommandRunner + ?Sized,
{
    let at_full = wait_for_cooling_state(
        dut,
        CoolingCmp::Eq,
        config.full_cooling_level,
        config.cooling_timeout(),
        config.cooling_interval(),
    )
    .await?;
    if !at_full {
        return Err(DutError::convergence_timeout(
            "cooling level at full",
            config.cooling_timeout(),
            [COOLING_CUR_STATE_PATH.to_string()],
        ));
    }
    tokio::time::sleep(config.cooling_interval()).await;
    psu_fan_speeds(dut, psu_count).await
}

/// Checks that PSU fan speeds follow the cooling level.
///
/// Speeds are sampled at full cooling (one fan mocked absent) and again
/// after thermal control lowers the level. The fan is restored whether or
/// not the full-speed sample succeeds. PSUs whose speed ratio is out of
/// tolerance fail the check with [`DutError::PsuFanSpeed`].
#[instrument(skip(dut, mocker, config))]
pub async fn check_psu_fan_speed<R, K>(
    dut: &R,
    mocker: &K,
    psu_count: usize,
    config: &ThermalConfig,
) -> DutResult<PsuFanSpeedReport>
where
    R: CommandRunner + ?Sized,
    K: FanPresenceMocker + ?Sized,
{
    let full_level = config.full_cooling_level;

    info!("Mock FAN absence");
    mocker.mock_absence().await?;
    let sampled = sample_full_speeds(dut, psu_count, config).await;

    info!("Mock FAN presence");
    let restored = mocker.mock_presence().await;
    let full_speeds = match (sampled, restored) {
        (Ok(speeds), Ok(())) => speeds,
        (Ok(_), Err(e)) => return Err(e),
        (Err(e), restored) => {
            if let Err(restore_err) = restored {
                warn!("Failed to restore FAN presence: {}", restore_err);
            }
            return Err(e);
        }
    };
    info!("Full speed={:?}", full_speeds);

    let lowered = wait_for_cooling_state(
        dut,
        CoolingCmp::Ne,
        full_level,
        config.cooling_timeout(),
        config.cooling_interval(),
    )
    .await?;
    if !lowered {
        return Err(DutError::convergence_timeout(
            "cooling level below full",
            config.cooling_timeout(),
            [COOLING_CUR_STATE_PATH.to_string()],
        ));
    }
    let cooling_level = cooling_cur_state(dut).await?;
    info!("Cooling level changed to {}", cooling_level);
    let current_speeds = psu_fan_speeds(dut, psu_count).await?;
    info!("Current speed={:?}", current_speeds);

    let offending = check_psu_fan_speed_ratio(
        &full_speeds,
        &current_speeds,
        cooling_level,
        full_level,
        config.psu_speed_tolerance,
    )?;
    if !offending.is_empty() {
        return Err(DutError::PsuFanSpeed {
            cooling_level,
            psus: offending.iter().map(|i| i + 1).collect(),
        });
    }

    Ok(PsuFanSpeedReport {
        cooling_level,
        full_speeds,
        current_speeds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use sonic_dut_common::ExecResult;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    mock! {
        Dut {}

        #[async_trait]
        impl CommandRunner for Dut {
            fn hostname(&self) -> &str;
            async fn run(&self, command: &str) -> DutResult<ExecResult>;
        }
    }

    #[test]
    fn test_psu_speed_path() {
        assert_eq!(
            psu_speed_path(2),
            "/run/hw-management/thermal/psu2_fan1_speed_get"
        );
    }

    #[test]
    fn test_ratio_within_tolerance() {
        // Level 5 of 10: fans should run at half speed.
        let full = [Some(20000), Some(20000)];
        let current = [Some(10500), Some(9600)];
        assert_eq!(
            check_psu_fan_speed_ratio(&full, &current, 5, 10, 0.15).unwrap(),
            Vec::<usize>::new()
        );
    }

    #[test]
    fn test_ratio_outside_tolerance() {
        let full = [Some(20000), Some(20000), Some(20000)];
        // Ratios 1.0, 2.0 and 4.0 against an expected 2.0.
        let current = [Some(20000), Some(10000), Some(5000)];
        assert_eq!(
            check_psu_fan_speed_ratio(&full, &current, 5, 10, 0.15).unwrap(),
            vec![0, 2]
        );
    }

    #[test]
    fn test_ratio_skips_missing_readings() {
        let full = [None, Some(20000), Some(0)];
        let current = [Some(1), None, Some(1)];
        assert!(check_psu_fan_speed_ratio(&full, &current, 5, 10, 0.15)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_ratio_rejects_zero_cooling_level() {
        assert!(check_psu_fan_speed_ratio(&[], &[], 0, 10, 0.15).is_err());
    }

    #[tokio::test]
    async fn test_psu_fan_speed_reads() {
        let mut dut = MockDut::new();
        dut.expect_hostname().return_const("dut".to_string());
        dut.expect_run()
            .withf(|cmd: &str| cmd.starts_with("test -f"))
            .returning(|cmd| {
                if cmd.contains("psu1_") {
                    Ok(ExecResult::ok(""))
                } else {
                    Ok(ExecResult::failed(1, ""))
                }
            });
        dut.expect_run()
            .withf(|cmd: &str| cmd == "cat /run/hw-management/thermal/psu1_fan1_speed_get")
            .returning(|_| Ok(ExecResult::ok("14500\n")));

        let speeds = psu_fan_speeds(&dut, 2).await.unwrap();
        assert_eq!(speeds, vec![Some(14500), None]);
    }

    #[tokio::test]
    async fn test_bad_content_is_invalid_record() {
        let mut dut = MockDut::new();
        dut.expect_hostname().return_const("dut".to_string());
        dut.expect_run()
            .returning(|_| Ok(ExecResult::ok("garbage")));

        let err = cooling_cur_state(&dut).await.unwrap_err();
        assert!(matches!(err, DutError::InvalidRecord { .. }));
    }

    /// A DUT whose cooling level is 10 while a fan is mocked absent and
    /// `lowered` otherwise. PSU speeds are 20000 at full and `current[i]`
    /// after the level drops.
    fn thermal_dut(
        absent: Arc<AtomicBool>,
        lowered: &'static str,
        current: Vec<&'static str>,
    ) -> MockDut {
        let mut dut = MockDut::new();
        dut.expect_hostname().return_const("dut".to_string());
        dut.expect_run().returning(move |cmd| {
            let full = absent.load(Ordering::SeqCst);
            let out = if cmd.starts_with("test -f") {
                ""
            } else if cmd.contains("cooling_cur_state") {
                if full {
                    "10"
                } else {
                    lowered
                }
            } else if full {
                "20000"
            } else if cmd.contains("psu2_") {
                current[1]
            } else {
                current[0]
            };
            Ok(ExecResult::ok(out))
        });
        dut
    }

    fn presence_mocker(absent: &Arc<AtomicBool>) -> MockFanPresenceMocker {
        let mut mocker = MockFanPresenceMocker::new();
        let flag = absent.clone();
        mocker.expect_mock_absence().times(1).returning(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        let flag = absent.clone();
        mocker.expect_mock_presence().times(1).returning(move || {
            flag.store(false, Ordering::SeqCst);
            Ok(())
        });
        mocker
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_psu_fan_speed_scenario() {
        let absent = Arc::new(AtomicBool::new(false));
        let mocker = presence_mocker(&absent);
        let dut = thermal_dut(absent, "5", vec!["10000", "10000"]);

        let report = check_psu_fan_speed(&dut, &mocker, 2, &ThermalConfig::default())
            .await
            .unwrap();
        assert_eq!(report.cooling_level, 5);
        assert_eq!(report.full_speeds, vec![Some(20000), Some(20000)]);
        assert_eq!(report.current_speeds, vec![Some(10000), Some(10000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_psu_fan_out_of_tolerance_fails() {
        let absent = Arc::new(AtomicBool::new(false));
        let mocker = presence_mocker(&absent);
        // PSU 2 runs at a quarter of full speed instead of half.
        let dut = thermal_dut(absent, "5", vec!["10000", "5000"]);

        let err = check_psu_fan_speed(&dut, &mocker, 2, &ThermalConfig::default())
            .await
            .unwrap_err();
        let DutError::PsuFanSpeed { cooling_level, psus } = err else {
            panic!("expected a PSU fan speed failure");
        };
        assert_eq!(cooling_level, 5);
        assert_eq!(psus, vec![2]);
    }

    /// The fan is restored even when full cooling is never reached.
    #[tokio::test(start_paused = true)]
    async fn test_presence_restored_when_full_cooling_times_out() {
        let mut mocker = MockFanPresenceMocker::new();
        mocker.expect_mock_absence().times(1).returning(|| Ok(()));
        mocker.expect_mock_presence().times(1).returning(|| Ok(()));

        let mut dut = MockDut::new();
        dut.expect_hostname().return_const("dut".to_string());
        dut.expect_run()
            .withf(|cmd: &str| cmd.contains("cooling_cur_state"))
            .returning(|_| Ok(ExecResult::ok("5")));

        let err = check_psu_fan_speed(&dut, &mocker, 2, &ThermalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DutError::ConvergenceTimeout { ref what, .. } if what == "cooling level at full"
        ));
    }

    /// A failed full-speed read still restores the fan.
    #[tokio::test(start_paused = true)]
    async fn test_presence_restored_when_speed_read_fails() {
        let mut mocker = MockFanPresenceMocker::new();
        mocker.expect_mock_absence().times(1).returning(|| Ok(()));
        mocker
            .expect_mock_presence()
            .times(1)
            .returning(|| Err(DutError::transport("dut", "connection reset")));

        let mut dut = MockDut::new();
        dut.expect_hostname().return_const("dut".to_string());
        dut.expect_run().returning(|cmd| {
            if cmd.contains("cooling_cur_state") {
                Ok(ExecResult::ok("10"))
            } else {
                Err(DutError::transport("dut", "session closed"))
            }
        });

        let err = check_psu_fan_speed(&dut, &mocker, 2, &ThermalConfig::default())
            .await
            .unwrap_err();
        // The sampling error wins over the restore error.
        assert!(err.to_string().contains("session closed"));
    }
}
