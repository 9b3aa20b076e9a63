//! Job and group payloads sent to the scheduler, and the views read back.
//!
//! Views only model what the harness predicates look at; every other field
//! the scheduler returns is kept in `extra` so nothing is lost when a view
//! is logged or re-serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::HarnessConfig;

pub const DEFAULT_JOB_COMMAND: &str = "echo Default Test Command";
pub const DEFAULT_JOB_NAME: &str = "default_test_job";
pub const DEFAULT_GROUP_NAME: &str = "default_test_group";

/// Anything that carries a scheduler uuid.
///
/// Lets client functions accept raw ids as well as specs and views.
pub trait HasUuid {
    fn uuid(&self) -> &str;
}

impl HasUuid for str {
    fn uuid(&self) -> &str {
        self
    }
}

impl HasUuid for String {
    fn uuid(&self) -> &str {
        self
    }
}

impl<T: HasUuid + ?Sized> HasUuid for &T {
    fn uuid(&self) -> &str {
        (**self).uuid()
    }
}

/// Collect the uuids of `items` as owned strings.
pub fn uuids_of<I: HasUuid>(items: &[I]) -> Vec<String> {
    items.iter().map(|item| item.uuid().to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerSpec {
    pub image: String,
    pub network: String,
    #[serde(rename = "force-pull-image")]
    pub force_pull_image: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub docker: DockerSpec,
}

impl ContainerSpec {
    pub fn docker(image: impl Into<String>) -> Self {
        Self {
            kind: "docker".to_string(),
            docker: DockerSpec {
                image: image.into(),
                network: "HOST".to_string(),
                force_pull_image: false,
            },
        }
    }
}

/// Job submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub uuid: String,
    pub command: String,
    pub cpus: f64,
    pub mem: u64,
    pub max_retries: u32,
    pub name: String,
    pub priority: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec {
    /// The smallest job the scheduler accepts, sized from `config`.
    pub fn minimal(config: &HarnessConfig) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            command: DEFAULT_JOB_COMMAND.to_string(),
            cpus: config.default_job_cpus,
            mem: config.default_job_mem_mb,
            max_retries: 1,
            name: DEFAULT_JOB_NAME.to_string(),
            priority: 1,
            group: None,
            container: config.docker_image.as_deref().map(ContainerSpec::docker),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_group<G: HasUuid + ?Sized>(mut self, group: &G) -> Self {
        self.group = Some(group.uuid().to_string());
        self
    }

    /// Set an arbitrary extra field (`env`, `labels`, `pool`, ...).
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl HasUuid for JobSpec {
    fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// `count` minimal jobs sharing the same command.
pub fn minimal_jobs(config: &HarnessConfig, count: usize, command: &str) -> Vec<JobSpec> {
    (0..count)
        .map(|_| JobSpec::minimal(config).with_command(command))
        .collect()
}

/// How the scheduler should treat slow members of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StragglerHandling {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl StragglerHandling {
    pub fn none() -> Self {
        Self {
            kind: "none".to_string(),
            parameters: Map::new(),
        }
    }

    /// Kill members running longer than `multiplier` times the `quantile` runtime.
    pub fn quantile_deviation(quantile: f64, multiplier: f64) -> Self {
        let mut parameters = Map::new();
        parameters.insert("quantile".to_string(), Value::from(quantile));
        parameters.insert("multiplier".to_string(), Value::from(multiplier));
        Self {
            kind: "quantile-deviation".to_string(),
            parameters,
        }
    }
}

/// Group submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub uuid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub straggler_handling: Option<StragglerHandling>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GroupSpec {
    pub fn minimal() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: DEFAULT_GROUP_NAME.to_string(),
            straggler_handling: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_straggler_handling(mut self, policy: StragglerHandling) -> Self {
        self.straggler_handling = Some(policy);
        self
    }
}

impl HasUuid for GroupSpec {
    fn uuid(&self) -> &str {
        &self.uuid
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Running,
    Completed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Running,
    Success,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Success,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// One execution attempt of a job, as reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    pub task_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub sandbox_directory: Option<String>,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub preempted: bool,
    #[serde(default)]
    pub backfilled: bool,
    #[serde(default)]
    pub reason_code: Option<i64>,
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HasUuid for InstanceView {
    fn uuid(&self) -> &str {
        &self.task_id
    }
}

/// A job as returned by `/jobs` or `/rawscheduler`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub uuid: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub instances: Vec<InstanceView>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retries_remaining: u32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub submit_time: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobView {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn instance(&self, task_id: &str) -> Option<&InstanceView> {
        self.instances.iter().find(|i| i.task_id == task_id)
    }

    /// Instance with the latest start time.
    pub fn latest_instance(&self) -> Option<&InstanceView> {
        self.instances.iter().max_by_key(|i| i.start_time.unwrap_or(0))
    }
}

impl HasUuid for JobView {
    fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// A group from `/group`; counts are only present on detailed queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupView {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub waiting: Option<u64>,
    #[serde(default)]
    pub running: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub straggler_handling: Option<StragglerHandling>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GroupView {
    /// Whether the per-status counts add up to the member count.
    pub fn counts_consistent(&self) -> bool {
        match (self.waiting, self.running, self.completed) {
            (Some(w), Some(r), Some(c)) => w + r + c == self.jobs.len() as u64,
            _ => false,
        }
    }
}

impl HasUuid for GroupView {
    fn uuid(&self) -> &str {
        &self.uuid
    }
}
