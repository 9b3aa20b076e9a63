//! Per-scenario state: configuration, transport, cluster facts and users.

use std::sync::Arc;

use cook_common::client;
use cook_common::poller::{PollBudget, wait_for_scheduler};
use cook_common::{
    AuthScheme, ClusterInfo, CookError, HarnessConfig, JobSpec, SessionFactory, TicketIssuer,
    Transport,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("skipped: {0}")]
    Skipped(String),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error(transparent)]
    Cook(#[from] CookError),
}

pub type ScenarioResult<T = ()> = std::result::Result<T, ScenarioError>;

/// Fail the scenario with `message` unless `condition` holds.
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> ScenarioResult {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Assertion(message()))
    }
}

/// Everything one scenario needs, owned by that scenario.
pub struct ScenarioContext {
    pub name: String,
    pub config: HarnessConfig,
    pub transport: Transport,
    pub cluster: ClusterInfo,
    /// `None` when the cluster's auth scheme has only one user.
    pub users: Option<SessionFactory>,
}

impl ScenarioContext {
    pub fn connect(config: HarnessConfig, name: &str) -> ScenarioResult<Self> {
        let tickets = Arc::new(TicketIssuer::from_config(&config));
        Self::connect_with_tickets(config, name, tickets)
    }

    /// Connect, sharing a ticket cache with other scenarios of the same run.
    pub fn connect_with_tickets(
        config: HarnessConfig,
        name: &str,
        tickets: Arc<TicketIssuer>,
    ) -> ScenarioResult<Self> {
        let mut transport = Transport::from_config(&config);
        wait_for_scheduler(&transport, PollBudget::connectivity(&config))?;

        let scheduler_info = client::scheduler_info(&transport)?;
        let scheme = AuthScheme::parse(
            scheduler_info
                .get("authentication-scheme")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        info!(scenario = %name, auth_scheme = %scheme, "Connected to scheduler");

        let users = match SessionFactory::new(scheme.clone(), &config, name) {
            Ok(factory) => Some(factory.with_ticket_issuer(tickets)),
            Err(CookError::UnsupportedAuthScheme(scheme)) => {
                warn!(%scheme, "Multi-user scenarios disabled for this auth scheme");
                None
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(users) = &users {
            transport.set_base_session(&users.default_user()?);
        }

        let settings = client::settings(&transport)?;
        let active_pools = client::active_pools(&transport)?.len();
        let cluster = ClusterInfo::from_parts(&scheduler_info, settings, active_pools);

        Ok(Self {
            name: name.to_string(),
            config,
            transport,
            cluster,
            users,
        })
    }

    /// Default poll budget from the configuration.
    pub fn budget(&self) -> PollBudget {
        PollBudget::from_config(&self.config)
    }

    /// A minimal job sized from the configuration.
    pub fn job(&self) -> JobSpec {
        JobSpec::minimal(&self.config)
    }

    /// The session factory, or `Skipped` on single-user clusters.
    pub fn users(&self) -> ScenarioResult<&SessionFactory> {
        self.users.as_ref().ok_or_else(|| {
            ScenarioError::Skipped(format!(
                "auth scheme {} does not support multiple users",
                self.cluster.auth_scheme
            ))
        })
    }
}
