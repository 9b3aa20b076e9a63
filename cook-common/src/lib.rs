//! Shared building blocks for Cook scheduler integration tests.
//!
//! Scenarios mutate scheduler state through [`client`], then hand a
//! query/predicate pair to [`poller::wait_until`] until the scheduler
//! catches up. Identities are [`session::Session`] values activated on a
//! [`transport::Transport`] for a lexical scope.

pub mod assertions;
pub mod client;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod logging;
pub mod poller;
pub mod session;
pub mod transport;
pub mod users;
pub mod util;
pub mod views;

pub use cluster::ClusterInfo;
pub use config::HarnessConfig;
pub use errors::{CookError, Result, TransportError, TransportErrorKind};
pub use logging::{LogConfig, LogFormat, init_logging, init_test_logging};
pub use poller::{ConditionTimeout, LastObserved, PollBudget, WaitError, wait_until};
pub use session::{Credential, CredentialKind, Session, SessionScope, TicketIssuer};
pub use transport::{Response, Transport};
pub use users::{AuthScheme, SessionFactory, UserIdRange};
pub use views::{GroupSpec, GroupView, HasUuid, InstanceView, JobSpec, JobStatus, JobView};
