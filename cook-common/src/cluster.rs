//! Cluster facts fetched once per run.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::client;
use crate::errors::Result;
use crate::transport::Transport;
use crate::users::AuthScheme;

/// Immutable snapshot of what the scheduler under test is configured for.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    #[serde(serialize_with = "serialize_scheme")]
    pub auth_scheme: AuthScheme,
    pub executor: Option<Value>,
    pub default_pool: Option<String>,
    pub preemption_enabled: bool,
    pub active_pools: usize,
    #[serde(skip)]
    pub settings: Value,
}

fn serialize_scheme<S: serde::Serializer>(
    scheme: &AuthScheme,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(scheme)
}

impl ClusterInfo {
    /// Build from the `/info` and `/settings` documents and the active pool count.
    pub fn from_parts(info: &Value, settings: Value, active_pools: usize) -> Self {
        let auth_scheme = AuthScheme::parse(
            info.get("authentication-scheme")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        let executor = settings.get("executor").filter(|v| !v.is_null()).cloned();
        let default_pool = settings
            .pointer("/pools/default")
            .and_then(Value::as_str)
            .filter(|pool| !pool.is_empty())
            .map(str::to_string);
        let preemption_enabled = settings
            .pointer("/rebalancer/max-preemption")
            .is_some_and(|v| !v.is_null());
        Self {
            auth_scheme,
            executor,
            default_pool,
            preemption_enabled,
            active_pools,
            settings,
        }
    }

    /// Query the scheduler. `/info` is read anonymously; `/settings` and
    /// `/pools` use the transport's current session.
    pub fn fetch(transport: &Transport) -> Result<Self> {
        let info = client::scheduler_info(transport)?;
        let settings = client::settings(transport)?;
        let active_pools = client::active_pools(transport)?.len();
        let cluster = Self::from_parts(&info, settings, active_pools);
        info!(
            auth_scheme = %cluster.auth_scheme,
            default_pool = cluster.default_pool.as_deref().unwrap_or("none"),
            preemption = cluster.preemption_enabled,
            active_pools = cluster.active_pools,
            "Cluster info loaded"
        );
        Ok(cluster)
    }

    pub fn pools_enabled(&self) -> bool {
        self.active_pools > 1
    }

    /// Whether the scheduler has a custom executor command configured.
    pub fn cook_executor_configured(&self) -> bool {
        self.executor
            .as_ref()
            .and_then(|executor| executor.get("command"))
            .and_then(Value::as_str)
            .is_some_and(|command| !command.trim().is_empty())
    }

    /// Jobs run under the cook executor only when it is configured and no docker image is set.
    pub fn cook_executor_in_use(&self, docker_image: Option<&str>) -> bool {
        self.cook_executor_configured() && docker_image.is_none()
    }

    /// Look up a value in the settings document by JSON pointer.
    pub fn setting(&self, pointer: &str) -> Option<&Value> {
        self.settings.pointer(pointer)
    }
}
