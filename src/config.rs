//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_OPENSTACK_BIN: &str = "openstack";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_QUERY_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
const MAX_WAIT_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS);
/// Default bound on a single wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS);
/// Default number of query attempts per poll cycle.
pub const DEFAULT_QUERY_ATTEMPTS: u32 = 3;
/// Default pause between failed query attempts within one cycle.
pub const DEFAULT_QUERY_RETRY_DELAY: Duration =
    Duration::from_millis(DEFAULT_QUERY_RETRY_DELAY_MS);
/// Default bound on one invocation of the `openstack` client.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS);
/// Longest accepted wait, poll interval, retry delay or command timeout.
pub const MAX_WAIT_TIMEOUT: Duration = Duration::from_secs(MAX_WAIT_TIMEOUT_SECS);

/// Coordinator and OpenStack CLI settings derived from environment variables
/// and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CINDER_ATTACH",
    discovery(
        app_name = "cinder-attach",
        env_var = "CINDER_ATTACH_CONFIG_PATH",
        config_file_name = "cinder-attach.toml",
        dotfile_name = ".cinder-attach.toml",
        project_file_name = "cinder-attach.toml"
    )
)]
pub struct CoordinatorConfig {
    /// Path to the `openstack` executable.
    #[ortho_config(default = DEFAULT_OPENSTACK_BIN.to_owned())]
    pub openstack_bin: String,
    /// Named cloud from `clouds.yaml`. When absent the client falls back to
    /// the `OS_*` environment variables.
    pub os_cloud: Option<String>,
    /// Seconds to sleep between status polls.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,
    /// Seconds to wait for an attachment to settle before giving up.
    #[ortho_config(default = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub wait_timeout_secs: u64,
    /// Status query attempts per poll cycle before the backend is reported
    /// unavailable.
    #[ortho_config(default = DEFAULT_QUERY_ATTEMPTS)]
    pub query_attempts: u32,
    /// Milliseconds to pause between failed query attempts.
    #[ortho_config(default = DEFAULT_QUERY_RETRY_DELAY_MS)]
    pub query_retry_delay_ms: u64,
    /// Seconds one `openstack` invocation may run before it is killed.
    #[ortho_config(default = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            openstack_bin: DEFAULT_OPENSTACK_BIN.to_owned(),
            os_cloud: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            query_attempts: DEFAULT_QUERY_ATTEMPTS,
            query_retry_delay_ms: DEFAULT_QUERY_RETRY_DELAY_MS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl CoordinatorConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cinder-attach")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is empty, zero, or longer
    /// than [`MAX_WAIT_TIMEOUT`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openstack_bin.trim().is_empty() {
            return Err(ConfigError::invalid("openstack_bin", "must not be empty"));
        }
        if self
            .os_cloud
            .as_deref()
            .is_some_and(|cloud| cloud.trim().is_empty())
        {
            return Err(ConfigError::invalid("os_cloud", "must not be blank when set"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "poll_interval_secs",
                "must be at least 1",
            ));
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::invalid("wait_timeout_secs", "must be at least 1"));
        }
        if self.query_attempts == 0 {
            return Err(ConfigError::invalid("query_attempts", "must be at least 1"));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "command_timeout_secs",
                "must be at least 1",
            ));
        }
        let too_long = [
            ("poll_interval_secs", Duration::from_secs(self.poll_interval_secs)),
            ("wait_timeout_secs", Duration::from_secs(self.wait_timeout_secs)),
            (
                "query_retry_delay_ms",
                Duration::from_millis(self.query_retry_delay_ms),
            ),
            (
                "command_timeout_secs",
                Duration::from_secs(self.command_timeout_secs),
            ),
        ]
        .into_iter()
        .find(|(_, value)| *value > MAX_WAIT_TIMEOUT);
        if let Some((field, _)) = too_long {
            return Err(ConfigError::invalid(
                field,
                &format!("must not exceed {MAX_WAIT_TIMEOUT_SECS} seconds"),
            ));
        }
        Ok(())
    }

    /// Bound on one invocation of the `openstack` client.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Builds the poll policy described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when validation fails.
    pub fn poll_policy(&self) -> Result<PollPolicy, ConfigError> {
        self.validate()?;
        Ok(PollPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            query_attempts: self.query_attempts,
            query_retry_delay: Duration::from_millis(self.query_retry_delay_ms),
        })
    }
}

/// Timing and retry bounds applied by the coordinator's polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Sleep between status polls.
    pub poll_interval: Duration,
    /// Bound on a whole wait, measured from call entry. Values above
    /// [`MAX_WAIT_TIMEOUT`] are clamped.
    pub wait_timeout: Duration,
    /// Query attempts per poll cycle; values below one are treated as one.
    pub query_attempts: u32,
    /// Pause between failed query attempts within a cycle.
    pub query_retry_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            query_attempts: DEFAULT_QUERY_ATTEMPTS,
            query_retry_delay: DEFAULT_QUERY_RETRY_DELAY,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A value is present but unusable.
    #[error(
        "invalid {field}: {reason}; set CINDER_ATTACH_{env_suffix} or {field} in cinder-attach.toml",
        env_suffix = field.to_uppercase()
    )]
    Invalid {
        /// Configuration key that failed validation.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &str, reason: &str) -> Self {
        Self::Invalid {
            field: field.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn valid_config() -> CoordinatorConfig {
        CoordinatorConfig::default()
    }

    #[rstest]
    fn default_config_yields_default_policy(valid_config: CoordinatorConfig) {
        let policy = valid_config
            .poll_policy()
            .unwrap_or_else(|err| panic!("default config should be valid: {err}"));
        assert_eq!(policy, PollPolicy::default());
    }

    #[rstest]
    fn zero_poll_interval_is_rejected_with_actionable_error(valid_config: CoordinatorConfig) {
        let cfg = CoordinatorConfig {
            poll_interval_secs: 0,
            ..valid_config
        };
        let message = cfg
            .validate()
            .expect_err("zero interval should be rejected")
            .to_string();
        assert!(
            message.contains("CINDER_ATTACH_POLL_INTERVAL_SECS"),
            "error should mention env var: {message}"
        );
        assert!(
            message.contains("cinder-attach.toml"),
            "error should mention config file: {message}"
        );
    }

    #[rstest]
    fn blank_cloud_name_is_rejected(valid_config: CoordinatorConfig) {
        let cfg = CoordinatorConfig {
            os_cloud: Some(String::from("  ")),
            ..valid_config
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "os_cloud"
        ));
    }

    #[rstest]
    fn policy_converts_units(valid_config: CoordinatorConfig) {
        let cfg = CoordinatorConfig {
            poll_interval_secs: 2,
            wait_timeout_secs: 30,
            query_attempts: 5,
            query_retry_delay_ms: 250,
            ..valid_config
        };
        let policy = cfg
            .poll_policy()
            .unwrap_or_else(|err| panic!("config should be valid: {err}"));
        assert_eq!(policy.poll_interval, Duration::from_secs(2));
        assert_eq!(policy.wait_timeout, Duration::from_secs(30));
        assert_eq!(policy.query_attempts, 5);
        assert_eq!(policy.query_retry_delay, Duration::from_millis(250));
    }

    #[rstest]
    #[case("wait_timeout_secs", "CINDER_ATTACH_WAIT_TIMEOUT_SECS")]
    #[case("poll_interval_secs", "CINDER_ATTACH_POLL_INTERVAL_SECS")]
    #[case("query_retry_delay_ms", "CINDER_ATTACH_QUERY_RETRY_DELAY_MS")]
    #[case("command_timeout_secs", "CINDER_ATTACH_COMMAND_TIMEOUT_SECS")]
    fn oversized_durations_are_rejected(
        valid_config: CoordinatorConfig,
        #[case] field: &str,
        #[case] env_var: &str,
    ) {
        let mut cfg = valid_config;
        match field {
            "wait_timeout_secs" => cfg.wait_timeout_secs = u64::MAX,
            "poll_interval_secs" => cfg.poll_interval_secs = u64::MAX,
            "query_retry_delay_ms" => cfg.query_retry_delay_ms = u64::MAX,
            _ => cfg.command_timeout_secs = u64::MAX,
        }
        let err = cfg
            .poll_policy()
            .expect_err("oversized duration should be rejected");
        assert!(
            matches!(err, ConfigError::Invalid { field: ref rejected, .. } if rejected == field),
            "unexpected error: {err}"
        );
        assert!(err.to_string().contains(env_var), "message: {err}");
    }

    #[rstest]
    fn longest_accepted_wait_is_valid(valid_config: CoordinatorConfig) {
        let cfg = CoordinatorConfig {
            wait_timeout_secs: MAX_WAIT_TIMEOUT.as_secs(),
            ..valid_config
        };
        let policy = cfg
            .poll_policy()
            .unwrap_or_else(|err| panic!("maximum wait should be accepted: {err}"));
        assert_eq!(policy.wait_timeout, MAX_WAIT_TIMEOUT);
    }

    #[rstest]
    fn defaults_match_published_constants(valid_config: CoordinatorConfig) {
        assert_eq!(valid_config.openstack_bin, "openstack");
        assert_eq!(
            Duration::from_millis(valid_config.query_retry_delay_ms),
            DEFAULT_QUERY_RETRY_DELAY
        );
        assert_eq!(valid_config.command_timeout(), DEFAULT_COMMAND_TIMEOUT);
    }
}
