//! DAG manager configuration.
//!
//! Defaults match the service's long-standing operational values; an
//! environment overlay with strict validation is available for hosts that
//! configure through the process environment.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::plan::FailureOption;

const ENV_NUM_THREADS: &str = "WEFT_DAG_MANAGER_NUM_THREADS";
const ENV_POLLING_INTERVAL_SECS: &str = "WEFT_DAG_MANAGER_POLLING_INTERVAL_SECS";
const ENV_JOB_START_SLA_SECS: &str = "WEFT_DAG_MANAGER_JOB_START_SLA_SECS";
const ENV_DEFAULT_FLOW_SLA_SECS: &str = "WEFT_DAG_MANAGER_DEFAULT_FLOW_SLA_SECS";
const ENV_FAILED_DAG_RETENTION_SECS: &str = "WEFT_DAG_MANAGER_FAILED_DAG_RETENTION_SECS";
const ENV_RETENTION_POLLING_MINUTES: &str = "WEFT_DAG_MANAGER_RETENTION_POLLING_MINUTES";
const ENV_FLOW_STATUS_TOLERANCE_SECS: &str = "WEFT_DAG_MANAGER_FLOW_STATUS_TOLERANCE_SECS";
const ENV_FAILURE_OPTION: &str = "WEFT_DAG_MANAGER_FAILURE_OPTION";

const DEFAULT_NUM_THREADS: usize = 3;
const DEFAULT_POLLING_INTERVAL_SECS: u64 = 10;
const DEFAULT_JOB_START_SLA_SECS: u64 = 10 * 60;
const DEFAULT_FLOW_SLA_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FAILED_DAG_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_RETENTION_POLLING_MINUTES: u64 = 60;
const DEFAULT_FLOW_STATUS_TOLERANCE_SECS: u64 = 5 * 60;
const DEFAULT_TERMINATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HOUSEKEEPING_INITIAL_DELAY_MINUTES: u64 = 2;
const DEFAULT_HOUSEKEEPING_MAX_DELAY_MINUTES: u64 = 180;
const DEFAULT_STOP_DAG_EXECUTION_LIMIT: usize = 10;

/// Configuration of the DAG execution manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagManagerConfig {
    /// Number of worker shards.
    pub num_threads: usize,
    /// Cadence of each worker shard's pass.
    pub polling_interval: Duration,
    /// Default deadline for a job to leave `ORCHESTRATED`.
    pub job_start_sla: Duration,
    /// Default flow deadline when a spec carries none.
    pub default_flow_sla: Duration,
    /// How long failed DAGs are kept for resume. Zero disables the sweep.
    pub failed_dag_retention: Duration,
    /// Cadence of the failed-dag retention sweep.
    pub retention_polling_interval: Duration,
    /// How long to wait for the status store to confirm a terminal flow
    /// status before re-emitting the flow event.
    pub flow_status_tolerance: Duration,
    /// Bound on waiting for worker shards to stop on deactivation.
    pub termination_timeout: Duration,
    /// First delay of the housekeeping re-sync schedule.
    pub housekeeping_initial_delay: Duration,
    /// Upper bound of the doubling housekeeping delays.
    pub housekeeping_max_delay: Duration,
    /// Failure option applied to DAGs that carry none.
    pub default_failure_option: FailureOption,
    /// How many recent executions a stop-flow request fans out to.
    pub stop_dag_execution_limit: usize,
}

impl Default for DagManagerConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_NUM_THREADS,
            polling_interval: Duration::from_secs(DEFAULT_POLLING_INTERVAL_SECS),
            job_start_sla: Duration::from_secs(DEFAULT_JOB_START_SLA_SECS),
            default_flow_sla: Duration::from_secs(DEFAULT_FLOW_SLA_SECS),
            failed_dag_retention: Duration::from_secs(DEFAULT_FAILED_DAG_RETENTION_SECS),
            retention_polling_interval: Duration::from_secs(
                DEFAULT_RETENTION_POLLING_MINUTES * 60,
            ),
            flow_status_tolerance: Duration::from_secs(DEFAULT_FLOW_STATUS_TOLERANCE_SECS),
            termination_timeout: Duration::from_secs(DEFAULT_TERMINATION_TIMEOUT_SECS),
            housekeeping_initial_delay: Duration::from_secs(
                DEFAULT_HOUSEKEEPING_INITIAL_DELAY_MINUTES * 60,
            ),
            housekeeping_max_delay: Duration::from_secs(
                DEFAULT_HOUSEKEEPING_MAX_DELAY_MINUTES * 60,
            ),
            default_failure_option: FailureOption::default(),
            stop_dag_execution_limit: DEFAULT_STOP_DAG_EXECUTION_LIMIT,
        }
    }
}

impl DagManagerConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value fails
    /// validation.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is not a positive integer
    /// (retention alone accepts zero, meaning disabled) or names an unknown
    /// failure option.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let num_threads = parse_positive_u64_env(
            &get_env,
            ENV_NUM_THREADS,
            defaults.num_threads as u64,
        )?;
        let polling_interval_secs = parse_positive_u64_env(
            &get_env,
            ENV_POLLING_INTERVAL_SECS,
            DEFAULT_POLLING_INTERVAL_SECS,
        )?;
        let job_start_sla_secs = parse_positive_u64_env(
            &get_env,
            ENV_JOB_START_SLA_SECS,
            DEFAULT_JOB_START_SLA_SECS,
        )?;
        let default_flow_sla_secs =
            parse_positive_u64_env(&get_env, ENV_DEFAULT_FLOW_SLA_SECS, DEFAULT_FLOW_SLA_SECS)?;
        let retention_secs = parse_u64_env(
            &get_env,
            ENV_FAILED_DAG_RETENTION_SECS,
            DEFAULT_FAILED_DAG_RETENTION_SECS,
        )?;
        let retention_polling_minutes = parse_positive_u64_env(
            &get_env,
            ENV_RETENTION_POLLING_MINUTES,
            DEFAULT_RETENTION_POLLING_MINUTES,
        )?;
        let flow_status_tolerance_secs = parse_positive_u64_env(
            &get_env,
            ENV_FLOW_STATUS_TOLERANCE_SECS,
            DEFAULT_FLOW_STATUS_TOLERANCE_SECS,
        )?;
        let default_failure_option = match get_env(ENV_FAILURE_OPTION) {
            None => defaults.default_failure_option,
            Some(raw) => FailureOption::parse(&raw).ok_or_else(|| {
                Error::configuration(format!("{ENV_FAILURE_OPTION} has unknown value '{raw}'"))
            })?,
        };

        Ok(Self {
            num_threads: usize::try_from(num_threads).map_err(|_| {
                Error::configuration(format!("{ENV_NUM_THREADS} exceeds supported range"))
            })?,
            polling_interval: Duration::from_secs(polling_interval_secs),
            job_start_sla: Duration::from_secs(job_start_sla_secs),
            default_flow_sla: Duration::from_secs(default_flow_sla_secs),
            failed_dag_retention: Duration::from_secs(retention_secs),
            retention_polling_interval: Duration::from_secs(retention_polling_minutes * 60),
            flow_status_tolerance: Duration::from_secs(flow_status_tolerance_secs),
            default_failure_option,
            ..defaults
        })
    }
}

fn parse_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    raw.parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a non-negative integer, got '{raw}'"))
    })
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = parse_u64_env(get_env, key, default)?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operational_values() {
        let config = DagManagerConfig::default();
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.polling_interval, Duration::from_secs(10));
        assert_eq!(config.job_start_sla, Duration::from_secs(600));
        assert_eq!(
            config.failed_dag_retention,
            Duration::from_secs(7 * 24 * 60 * 60)
        );
        assert_eq!(
            config.retention_polling_interval,
            Duration::from_secs(60 * 60)
        );
        assert_eq!(config.flow_status_tolerance, Duration::from_secs(300));
        assert_eq!(config.termination_timeout, Duration::from_secs(30));
        assert_eq!(
            config.default_failure_option,
            FailureOption::FinishAllPossible
        );
        assert_eq!(config.stop_dag_execution_limit, 10);
    }

    #[test]
    fn env_overlay_overrides_values() {
        let config = DagManagerConfig::from_env_with(|key| match key {
            ENV_NUM_THREADS => Some("5".to_string()),
            ENV_POLLING_INTERVAL_SECS => Some("2".to_string()),
            ENV_FAILURE_OPTION => Some("FINISH_RUNNING".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.num_threads, 5);
        assert_eq!(config.polling_interval, Duration::from_secs(2));
        assert_eq!(config.default_failure_option, FailureOption::FinishRunning);
    }

    #[test]
    fn zero_retention_is_accepted_but_zero_threads_is_not() {
        let config = DagManagerConfig::from_env_with(|key| {
            (key == ENV_FAILED_DAG_RETENTION_SECS).then(|| "0".to_string())
        })
        .unwrap();
        assert_eq!(config.failed_dag_retention, Duration::ZERO);

        let error = DagManagerConfig::from_env_with(|key| {
            (key == ENV_NUM_THREADS).then(|| "0".to_string())
        });
        assert!(error.is_err());
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(DagManagerConfig::from_env_with(|key| {
            (key == ENV_POLLING_INTERVAL_SECS).then(|| "ten".to_string())
        })
        .is_err());
        assert!(DagManagerConfig::from_env_with(|key| {
            (key == ENV_FAILURE_OPTION).then(|| "GIVE_UP".to_string())
        })
        .is_err());
    }
}
