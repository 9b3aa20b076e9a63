//! Harness configuration.
//!
//! Everything the harness reads from the environment is parsed once into an
//! immutable [`HarnessConfig`] which is then passed to sessions, waits and
//! scenarios explicitly.

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::errors::{CookError, Result};
use crate::users::UserIdRange;
use std::time::Duration;

pub const DEFAULT_SCHEDULER_URL: &str = "http://localhost:12321";

/// Immutable configuration for one harness process.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub scheduler_url: String,
    /// Default budget for `wait_*` helpers.
    pub default_timeout: Duration,
    /// Default spacing between poll attempts.
    pub wait_interval: Duration,
    /// Ceiling for a whole scenario.
    pub test_timeout: Duration,
    /// Budget for the initial connectivity wait.
    pub connect_timeout: Duration,
    /// Per-request timeout on the HTTP agent.
    pub request_timeout: Duration,
    /// Distinct test users per worker; 0 disables partitioning.
    pub max_test_users: u64,
    pub worker: Option<String>,
    pub user_prefix: Option<String>,
    pub docker_image: Option<String>,
    pub kerberos_auth_cmd: Option<String>,
    pub default_user: String,
    pub admin_user: String,
    pub impersonator_user: String,
    pub default_job_cpus: f64,
    pub default_job_mem_mb: u64,
    pub ephemeral_hosts: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scheduler_url: DEFAULT_SCHEDULER_URL.to_string(),
            default_timeout: Duration::from_millis(120_000),
            wait_interval: Duration::from_millis(1_000),
            test_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_millis(240_000),
            request_timeout: Duration::from_millis(30_000),
            max_test_users: 0,
            worker: None,
            user_prefix: None,
            docker_image: None,
            kerberos_auth_cmd: None,
            default_user: "root".to_string(),
            admin_user: "root".to_string(),
            impersonator_user: "poser".to_string(),
            default_job_cpus: 1.0,
            default_job_mem_mb: 256,
            ephemeral_hosts: false,
        }
    }
}

impl HarnessConfig {
    /// Read the configuration from the environment, recording bad values on the parser.
    pub fn from_parser(parser: &mut EnvParser) -> Self {
        let defaults = Self::default();
        let login_user = std::env::var("USER")
            .ok()
            .filter(|user| !user.trim().is_empty())
            .unwrap_or(defaults.default_user);

        let millis = |parser: &mut EnvParser, name: &str, default: Duration| {
            Duration::from_millis(parser.get_u64_range(
                name,
                default.as_millis() as u64,
                1,
                24 * 60 * 60 * 1000,
            ))
        };

        Self {
            scheduler_url: parser
                .get_string("SCHEDULER_URL", &defaults.scheduler_url)
                .trim_end_matches('/')
                .to_string(),
            default_timeout: millis(parser, "TEST_DEFAULT_TIMEOUT_MS", defaults.default_timeout),
            wait_interval: millis(
                parser,
                "TEST_DEFAULT_WAIT_INTERVAL_MS",
                defaults.wait_interval,
            ),
            test_timeout: Duration::from_secs(parser.get_u64_range(
                "TEST_DEFAULT_TEST_TIMEOUT_SECS",
                defaults.test_timeout.as_secs(),
                1,
                24 * 60 * 60,
            )),
            connect_timeout: millis(parser, "TEST_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            request_timeout: millis(parser, "TEST_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            max_test_users: parser.get_u64_range("MAX_TEST_USERS", 0, 0, 1_000_000),
            worker: parser.get_optional_string("TEST_WORKER"),
            user_prefix: parser.get_optional_string("TEST_USER_PREFIX"),
            docker_image: parser.get_optional_string("TEST_DOCKER_IMAGE"),
            kerberos_auth_cmd: parser.get_optional_string("KERBEROS_TEST_AUTH_CMD"),
            default_user: parser.get_string("DEFAULT_USER_NAME", &login_user),
            admin_user: parser.get_string("ADMIN_USER_NAME", &defaults.admin_user),
            impersonator_user: parser
                .get_string("IMPERSONATOR_USER_NAME", &defaults.impersonator_user),
            default_job_cpus: parser.get_f64_range(
                "DEFAULT_JOB_CPUS",
                defaults.default_job_cpus,
                0.01,
                1024.0,
            ),
            default_job_mem_mb: parser.get_u64_range(
                "DEFAULT_JOB_MEM_MB",
                defaults.default_job_mem_mb,
                1,
                1 << 20,
            ),
            ephemeral_hosts: parser.get_bool("TEST_EPHEMERAL_HOSTS", false),
        }
    }

    /// Read the configuration from the environment, logging and ignoring invalid variables.
    pub fn from_env() -> Self {
        let mut parser = EnvParser::new();
        let config = Self::from_parser(&mut parser);
        for err in parser.take_errors() {
            tracing::warn!(error = %err, "Ignoring invalid environment variable");
        }
        config
    }

    /// Read the configuration from the environment, failing on any invalid variable.
    pub fn load() -> Result<Self> {
        let mut parser = EnvParser::new();
        let config = Self::from_parser(&mut parser);
        if parser.has_errors() {
            let messages: Vec<String> = parser.errors().iter().map(ToString::to_string).collect();
            return Err(CookError::Config(messages.join("; ")));
        }
        tracing::info!(scheduler_url = %config.scheduler_url, "Loaded harness configuration");
        Ok(config)
    }

    #[must_use]
    pub fn with_scheduler_url(mut self, url: impl Into<String>) -> Self {
        self.scheduler_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Test-user id range owned by this worker.
    pub fn user_id_range(&self) -> UserIdRange {
        UserIdRange::for_worker(self.worker.as_deref(), self.max_test_users)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
