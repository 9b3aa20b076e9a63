//! Authenticated test identities and scoped activation.
//!
//! A [`Session`] is a principal plus one [`Credential`] and an optional
//! impersonation target. Activating it on a [`Transport`] returns a
//! [`SessionScope`] guard that restores the transport's previous
//! authentication state when dropped:
//!
//! ```ignore
//! let mut admin_scope = transport.activate(&admin);
//! {
//!     let alice_scope = admin_scope.activate(&alice);
//!     client::submit_job(&alice_scope, &spec, true)?;
//! } // alice deactivated, admin active again
//! ```
//!
//! The inner scope borrows the outer one mutably, so scopes can only be
//! released in reverse activation order.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::process::Command;
use std::sync::Mutex;

use base64::Engine;
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::errors::{CookError, Result};
use crate::transport::{AuthState, Transport};
use crate::util::mask_token;

/// Placeholder for the principal in the ticket command template.
pub const USER_PLACEHOLDER: &str = "{{COOK_USER}}";
/// Placeholder for the scheduler URL in the ticket command template.
pub const URL_PLACEHOLDER: &str = "{{COOK_SCHEDULER_URL}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Basic,
    Bearer,
}

/// Secret material for one session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// HTTP basic credentials for the session's principal.
    Basic { secret: String },
    /// Pre-obtained ticket, sent verbatim as the `Authorization` value.
    Bearer { token: String },
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Basic { .. } => CredentialKind::Basic,
            Self::Bearer { .. } => CredentialKind::Bearer,
        }
    }

    fn header_value(&self, principal: &str) -> String {
        match self {
            Self::Basic { secret } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{principal}:{secret}"));
                format!("Basic {encoded}")
            }
            Self::Bearer { token } => token.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { .. } => f.write_str("Basic(***)"),
            Self::Bearer { .. } => f.write_str("Bearer(***)"),
        }
    }
}

/// Anything that names a principal: a user name or a session.
pub trait AsPrincipal {
    fn principal_name(&self) -> &str;
}

impl AsPrincipal for str {
    fn principal_name(&self) -> &str {
        self
    }
}

impl AsPrincipal for String {
    fn principal_name(&self) -> &str {
        self
    }
}

impl AsPrincipal for Session {
    fn principal_name(&self) -> &str {
        &self.principal
    }
}

/// One logical test user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    principal: String,
    credential: Credential,
    impersonatee: Option<String>,
}

impl Session {
    /// Basic-auth session with an empty secret, as test clusters expect.
    pub fn basic(principal: impl Into<String>) -> Self {
        Self::basic_with_secret(principal, "")
    }

    pub fn basic_with_secret(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            credential: Credential::Basic {
                secret: secret.into(),
            },
            impersonatee: None,
        }
    }

    pub fn bearer(principal: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            credential: Credential::Bearer {
                token: token.into(),
            },
            impersonatee: None,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn kind(&self) -> CredentialKind {
        self.credential.kind()
    }

    pub fn impersonatee(&self) -> Option<&str> {
        self.impersonatee.as_deref()
    }

    /// Same credentials, acting on behalf of `target`.
    ///
    /// Fails if `target` is this session's own principal.
    pub fn impersonating<P: AsPrincipal + ?Sized>(&self, target: &P) -> Result<Session> {
        let target = target.principal_name();
        if target == self.principal {
            return Err(CookError::InvalidArgument(format!(
                "{} cannot impersonate itself",
                self.principal
            )));
        }
        Ok(Self {
            principal: self.principal.clone(),
            credential: self.credential.clone(),
            impersonatee: Some(target.to_string()),
        })
    }

    /// Authentication state after activating this session on top of `current`.
    ///
    /// A session without an impersonation target keeps whatever
    /// impersonation header is already in place.
    pub(crate) fn layered_on(&self, current: &AuthState) -> AuthState {
        AuthState {
            authorization: Some(self.credential.header_value(&self.principal)),
            impersonate: self
                .impersonatee
                .clone()
                .or_else(|| current.impersonate.clone()),
        }
    }
}

/// Guard returned by [`Transport::activate`]; restores the previous state on drop.
pub struct SessionScope<'t> {
    transport: &'t mut Transport,
    previous: AuthState,
    principal: String,
}

impl SessionScope<'_> {
    pub fn principal(&self) -> &str {
        &self.principal
    }
}

impl Deref for SessionScope<'_> {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        self.transport
    }
}

impl DerefMut for SessionScope<'_> {
    fn deref_mut(&mut self) -> &mut Transport {
        self.transport
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        debug!(user = %self.principal, "Switching back from user");
        self.transport.auth = std::mem::take(&mut self.previous);
    }
}

impl Transport {
    /// Activate `session` until the returned scope is dropped.
    pub fn activate(&mut self, session: &Session) -> SessionScope<'_> {
        debug!(
            user = %session.principal(),
            impersonating = session.impersonatee().unwrap_or(""),
            "Switching to user"
        );
        let next = session.layered_on(&self.auth);
        let previous = std::mem::replace(&mut self.auth, next);
        SessionScope {
            transport: self,
            previous,
            principal: session.principal().to_string(),
        }
    }

    /// Make `session` the baseline identity of this transport (no scope).
    pub fn set_base_session(&mut self, session: &Session) {
        info!(user = %session.principal(), "Using base session");
        self.auth = session.layered_on(&AuthState::default());
    }
}

/// Obtains and caches tickets from an external command.
///
/// Each principal's ticket is fetched at most once per issuer.
pub struct TicketIssuer {
    command_template: Option<String>,
    scheduler_url: String,
    cache: Mutex<HashMap<String, String>>,
}

impl TicketIssuer {
    pub fn new(command_template: Option<String>, scheduler_url: impl Into<String>) -> Self {
        Self {
            command_template,
            scheduler_url: scheduler_url.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.kerberos_auth_cmd.clone(), config.scheduler_url.clone())
    }

    /// Render the command for `principal`, shell-quoting substituted values.
    pub fn render_command(&self, principal: &str) -> Option<String> {
        let template = self.command_template.as_ref()?;
        let user = shell_escape::escape(Cow::Borrowed(principal));
        let url = shell_escape::escape(Cow::Borrowed(self.scheduler_url.as_str()));
        Some(
            template
                .replace(USER_PLACEHOLDER, &user)
                .replace(URL_PLACEHOLDER, &url),
        )
    }

    /// Ticket for `principal`, running the command on first use.
    pub fn ticket_for(&self, principal: &str) -> Result<String> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(ticket) = cache.get(principal) {
            return Ok(ticket.clone());
        }

        let failure = |reason: String| CookError::CredentialAcquisition {
            principal: principal.to_string(),
            reason,
        };
        let command = self
            .render_command(principal)
            .ok_or_else(|| failure("COOK_KERBEROS_TEST_AUTH_CMD is not set".to_string()))?;

        debug!(user = %principal, "Acquiring ticket");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .map_err(|err| failure(format!("failed to run ticket command: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "ticket command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let ticket = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if ticket.is_empty() {
            return Err(failure("ticket command produced no output".to_string()));
        }
        info!(user = %principal, ticket = %mask_token(&ticket), "Acquired ticket");
        cache.insert(principal.to_string(), ticket.clone());
        Ok(ticket)
    }

    /// Bearer session for `principal`.
    pub fn session(&self, principal: &str) -> Result<Session> {
        Ok(Session::bearer(principal, self.ticket_for(principal)?))
    }
}
