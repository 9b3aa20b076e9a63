//! Test-user naming and session construction.
//!
//! Parallel workers draw user ids from disjoint ranges so that no two
//! workers ever submit as the same user; no coordination is needed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::HarnessConfig;
use crate::errors::{CookError, Result};
use crate::session::{Session, TicketIssuer};

/// Ids available when user partitioning is off.
pub const UNPARTITIONED_USER_IDS: u64 = 1_000_000;

/// Half-open range of numeric user suffixes owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdRange {
    start: u64,
    end: u64,
}

impl UserIdRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Range for `worker` when each worker owns `max_test_users` ids.
    ///
    /// Worker `k` owns `[k * max, k * max + max)`. Without a worker index or
    /// with `max_test_users == 0`, the whole unpartitioned range is used.
    pub fn for_worker(worker: Option<&str>, max_test_users: u64) -> Self {
        match worker.and_then(parse_worker_index) {
            Some(index) if max_test_users > 0 => {
                let start = max_test_users.saturating_mul(index);
                Self::new(start, start.saturating_add(max_test_users))
            }
            _ => Self::new(0, UNPARTITIONED_USER_IDS),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, id: u64) -> bool {
        (self.start..self.end).contains(&id)
    }
}

/// Parse a worker index such as `4` or `gw4`.
pub fn parse_worker_index(worker: &str) -> Option<u64> {
    let digits = worker.trim().trim_start_matches(|c: char| c.is_ascii_alphabetic());
    digits.parse().ok()
}

/// Authentication scheme advertised by the scheduler's `/info` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    HttpBasic,
    Kerberos,
    Other(String),
}

impl AuthScheme {
    pub fn parse(name: &str) -> Self {
        match name {
            "http-basic" => Self::HttpBasic,
            "kerberos" => Self::Kerberos,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether distinct test users can be authenticated.
    pub fn supports_multiple_users(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpBasic => f.write_str("http-basic"),
            Self::Kerberos => f.write_str("kerberos"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Creates sessions with unique user names for one scenario.
pub struct SessionFactory {
    scheme: AuthScheme,
    prefix: String,
    ids: UserIdRange,
    next_id: AtomicU64,
    default_user: String,
    admin_user: String,
    impersonator_user: String,
    tickets: Arc<TicketIssuer>,
}

impl SessionFactory {
    /// Factory for users named `{prefix}{id}`.
    ///
    /// `COOK_TEST_USER_PREFIX` (via `config.user_prefix`) wins over
    /// `scenario_prefix`.
    pub fn new(scheme: AuthScheme, config: &HarnessConfig, scenario_prefix: &str) -> Result<Self> {
        if !scheme.supports_multiple_users() {
            return Err(CookError::UnsupportedAuthScheme(scheme.to_string()));
        }
        let ids = config.user_id_range();
        let prefix = config
            .user_prefix
            .clone()
            .unwrap_or_else(|| scenario_prefix.to_lowercase());
        Ok(Self {
            scheme,
            prefix,
            ids,
            next_id: AtomicU64::new(ids.start()),
            default_user: config.default_user.clone(),
            admin_user: config.admin_user.clone(),
            impersonator_user: config.impersonator_user.clone(),
            tickets: Arc::new(TicketIssuer::from_config(config)),
        })
    }

    /// Share one ticket cache across factories.
    #[must_use]
    pub fn with_ticket_issuer(mut self, tickets: Arc<TicketIssuer>) -> Self {
        self.tickets = tickets;
        self
    }

    pub fn scheme(&self) -> &AuthScheme {
        &self.scheme
    }

    fn session_for(&self, name: &str) -> Result<Session> {
        match self.scheme {
            AuthScheme::HttpBasic => Ok(Session::basic(name)),
            AuthScheme::Kerberos => self.tickets.session(name),
            AuthScheme::Other(ref other) => Err(CookError::UnsupportedAuthScheme(other.clone())),
        }
    }

    fn next_name(&self) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if !self.ids.contains(id) {
            return Err(CookError::InvalidArgument(format!(
                "test user ids exhausted for prefix {} (range {}..{})",
                self.prefix,
                self.ids.start(),
                self.ids.end()
            )));
        }
        Ok(format!("{}{}", self.prefix, id))
    }

    /// A fresh, never-before-used user.
    pub fn new_user(&self) -> Result<Session> {
        let name = self.next_name()?;
        self.session_for(&name)
    }

    pub fn new_users(&self, count: usize) -> Result<Vec<Session>> {
        (0..count).map(|_| self.new_user()).collect()
    }

    pub fn default_user(&self) -> Result<Session> {
        self.session_for(&self.default_user)
    }

    pub fn admin(&self) -> Result<Session> {
        self.session_for(&self.admin_user)
    }

    pub fn impersonator(&self) -> Result<Session> {
        self.session_for(&self.impersonator_user)
    }
}
