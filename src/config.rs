use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Whether dispatch spacing is shared by every account or tracked per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    #[default]
    Global,
    PerAccount,
}

/// What to do with a job whose account is already running another job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait behind the running job.
    #[default]
    Queue,
    /// Fail the new job immediately.
    Reject,
}

/// Configuration for the external browser driver.
///
/// Each action launches `program` once; credentials travel in environment
/// variables, never on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Driver executable (looked up on `PATH` when not absolute)
    pub program: PathBuf,
    /// Arguments placed before the action arguments
    pub extra_args: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("fleet-driver"),
            extra_args: Vec::new(),
        }
    }
}

/// Runtime configuration, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Run the browser driver without a visible window
    pub headless_mode: bool,
    /// Upper bound on jobs running at once, across all accounts
    pub max_workers: usize,
    /// Minimum spacing between dispatched actions; zero disables throttling
    pub min_interval_ms: u64,
    pub rate_scope: RateScope,
    pub busy_policy: BusyPolicy,
    /// Jobs accepted but not yet picked up by the dispatcher
    pub queue_capacity: usize,
    /// Events a slow subscriber may fall behind before the oldest are dropped.
    /// The broadcast ring rounds this up to the next power of two, so the
    /// effective limit can be larger than configured.
    pub status_buffer: usize,
    /// Job records kept for lookup; finished records nobody is waiting on are
    /// pruned once the ledger fills up
    pub ledger_capacity: usize,
    /// Log in through the driver before every non-login action
    pub login_before_action: bool,
    /// Random pause after each action while the account stays locked
    pub cooldown_min_ms: u64,
    pub cooldown_max_ms: u64,
    /// Per-call bound on the driver; `None` waits indefinitely
    pub action_timeout_ms: Option<u64>,
    /// Time in-flight actions get to finish after cancellation
    pub shutdown_grace_ms: u64,
    pub driver: DriverConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            headless_mode: false,
            max_workers: 4,
            min_interval_ms: 2_000,
            rate_scope: RateScope::Global,
            busy_policy: BusyPolicy::Queue,
            queue_capacity: 1_024,
            status_buffer: 1_024,
            ledger_capacity: 10_000,
            login_before_action: true,
            cooldown_min_ms: 0,
            cooldown_max_ms: 0,
            action_timeout_ms: None,
            shutdown_grace_ms: 5_000,
            driver: DriverConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Cool-down bounds, or `None` when no pause is configured.
    pub fn cooldown_range(&self) -> Option<(Duration, Duration)> {
        if self.cooldown_max_ms == 0 {
            return None;
        }
        let min = self.cooldown_min_ms.min(self.cooldown_max_ms);
        Some((
            Duration::from_millis(min),
            Duration::from_millis(self.cooldown_max_ms),
        ))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(FleetError::Config("max_workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(FleetError::Config("queue_capacity must be at least 1".into()));
        }
        if self.status_buffer == 0 {
            return Err(FleetError::Config("status_buffer must be at least 1".into()));
        }
        if self.ledger_capacity == 0 {
            return Err(FleetError::Config("ledger_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Read and validate a config file. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| FleetError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load the config, never failing.
    ///
    /// A missing file is replaced by the defaults, which are written back.
    /// A malformed file is logged and left untouched; defaults are used.
    pub fn load_or_init(path: &Path) -> Self {
        match Self::load(path) {
            Ok(Some(config)) => config,
            Ok(None) => {
                let config = Self::default();
                match config.save(path) {
                    Ok(()) => tracing::info!(path = %path.display(), "Wrote default config"),
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to persist default config"
                    ),
                }
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Config unreadable, falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_default() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.headless_mode);
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.min_interval(), Duration::from_secs(2));
        assert_eq!(cfg.rate_scope, RateScope::Global);
        assert_eq!(cfg.busy_policy, BusyPolicy::Queue);
        assert!(cfg.login_before_action);
        assert!(cfg.cooldown_range().is_none());
        assert!(cfg.action_timeout().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn driver_config_default() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.program, PathBuf::from("fleet-driver"));
        assert!(cfg.extra_args.is_empty());
    }

    #[test]
    fn builders_override_fields() {
        let cfg = RuntimeConfig::default()
            .with_max_workers(8)
            .with_min_interval(Duration::from_millis(250));
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.min_interval_ms, 250);
    }

    #[test]
    fn huge_interval_saturates() {
        let cfg = RuntimeConfig::default().with_min_interval(Duration::MAX);
        assert_eq!(cfg.min_interval_ms, u64::MAX);
    }

    #[test]
    fn zero_ledger_capacity_is_invalid() {
        let cfg = RuntimeConfig {
            ledger_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn zero_workers_is_invalid() {
        let cfg = RuntimeConfig::default().with_max_workers(0);
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn cooldown_range_orders_bounds() {
        let cfg = RuntimeConfig {
            cooldown_min_ms: 3_000,
            cooldown_max_ms: 1_000,
            ..RuntimeConfig::default()
        };
        let (min, max) = cfg.cooldown_range().unwrap();
        assert_eq!(min, Duration::from_millis(1_000));
        assert_eq!(max, Duration::from_millis(1_000));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"headless_mode": true, "max_workers": 2}"#).unwrap();
        assert!(cfg.headless_mode);
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.min_interval_ms, 2_000);
        assert_eq!(cfg.driver, DriverConfig::default());
    }

    #[test]
    fn scope_and_policy_use_snake_case() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"rate_scope": "per_account", "busy_policy": "reject"}"#)
                .unwrap();
        assert_eq!(cfg.rate_scope, RateScope::PerAccount);
        assert_eq!(cfg.busy_policy, BusyPolicy::Reject);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let cfg = RuntimeConfig::load_or_init(&path);
        assert_eq!(cfg, RuntimeConfig::default());
        assert!(path.exists());

        let reloaded = RuntimeConfig::load(&path).unwrap().unwrap();
        assert_eq!(reloaded, cfg);
    }

    #[test]
    fn malformed_file_falls_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(FleetError::Config(_))
        ));
        let cfg = RuntimeConfig::load_or_init(&path);
        assert_eq!(cfg, RuntimeConfig::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn invalid_values_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_workers": 0}"#).unwrap();

        let cfg = RuntimeConfig::load_or_init(&path);
        assert_eq!(cfg.max_workers, 4);
    }

    #[test]
    fn save_round_trips_custom_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = RuntimeConfig {
            headless_mode: true,
            action_timeout_ms: Some(30_000),
            ..RuntimeConfig::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap(), Some(cfg));
    }
}
