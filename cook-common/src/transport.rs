//! HTTP transport to the scheduler.
//!
//! A [`Transport`] owns its connection agent, the scheduler base URL and the
//! authentication state applied to every authenticated request. Sessions are
//! activated on a transport value (see [`crate::session`]), so two scenarios
//! holding two transports never share credential state.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::errors::{CookError, Result};

/// Custom header carrying the impersonated principal.
pub const IMPERSONATION_HEADER: &str = "X-Cook-Impersonate";

const USER_AGENT: &str = concat!("cook-itest/", env!("CARGO_PKG_VERSION"));

/// Credential and impersonation headers currently applied by a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub(crate) authorization: Option<String>,
    pub(crate) impersonate: Option<String>,
}

impl AuthState {
    /// Value sent in the `Authorization` header, if any.
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Principal sent in the impersonation header, if any.
    pub fn impersonating(&self) -> Option<&str> {
        self.impersonate.as_deref()
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Method and path, for error messages (e.g. `DELETE /rawscheduler`).
    pub operation: String,
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|source| CookError::Decode {
            what: format!("{} response body", self.operation),
            source,
        })
    }

    /// Fail with `UnexpectedStatus` unless the status is in `expected`.
    pub fn expect_status(self, expected: &[u16]) -> Result<Self> {
        if expected.contains(&self.status) {
            Ok(self)
        } else {
            Err(CookError::UnexpectedStatus {
                operation: self.operation,
                status: self.status,
                expected: expected.to_vec(),
                body: self.body,
            })
        }
    }

    /// Apply [`Response::expect_status`] only when `assert_response` is set.
    pub fn check(self, assert_response: bool, expected: &[u16]) -> Result<Self> {
        if assert_response {
            self.expect_status(expected)
        } else {
            Ok(self)
        }
    }
}

/// Query-string pairs; keys may repeat (`job=a&job=b`).
pub type QueryPairs = Vec<(String, String)>;

/// Connection to one scheduler with its own authentication state.
#[derive(Clone)]
pub struct Transport {
    agent: ureq::Agent,
    base_url: String,
    pub(crate) auth: AuthState,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.auth.authorization.is_some())
            .field("impersonating", &self.auth.impersonate)
            .finish()
    }
}

impl Transport {
    /// Create an unauthenticated transport.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(request_timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: AuthState::default(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.scheduler_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Absolute URL for a path relative to the scheduler root.
    pub fn url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let mut request = request.header("User-Agent", USER_AGENT);
        if let Some(value) = &self.auth.authorization {
            request = request.header("Authorization", value.as_str());
        }
        if let Some(principal) = &self.auth.impersonate {
            request = request.header(IMPERSONATION_HEADER, principal.as_str());
        }
        request
    }

    fn with_query<B>(
        request: ureq::RequestBuilder<B>,
        query: &[(String, String)],
    ) -> ureq::RequestBuilder<B> {
        query
            .iter()
            .fold(request, |request, (key, value)| request.query(key, value))
    }

    fn finish(
        operation: String,
        result: std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<Response> {
        let mut response = result.map_err(|err| CookError::transport(operation.clone(), err))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|err| CookError::transport(operation.clone(), err))?;
        debug!(%operation, status, body_len = body.len(), "Scheduler responded");
        Ok(Response {
            operation,
            status,
            body,
        })
    }

    /// Authenticated GET.
    pub fn get(&self, path: &str, query: &[(String, String)]) -> Result<Response> {
        let operation = format!("GET /{}", path.trim_start_matches('/'));
        let request = Self::with_query(self.authorize(self.agent.get(self.url(path))), query);
        Self::finish(operation, request.call())
    }

    /// GET without credential or impersonation headers.
    pub fn get_anonymous(&self, path: &str) -> Result<Response> {
        let operation = format!("GET /{}", path.trim_start_matches('/'));
        let request = self
            .agent
            .get(self.url(path))
            .header("User-Agent", USER_AGENT);
        Self::finish(operation, request.call())
    }

    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let operation = format!("POST /{}", path.trim_start_matches('/'));
        let request = self.authorize(self.agent.post(self.url(path)));
        Self::finish(operation, request.send_json(body))
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let operation = format!("PUT /{}", path.trim_start_matches('/'));
        let request = self.authorize(self.agent.put(self.url(path)));
        Self::finish(operation, request.send_json(body))
    }

    pub fn delete(&self, path: &str, query: &[(String, String)]) -> Result<Response> {
        let operation = format!("DELETE /{}", path.trim_start_matches('/'));
        let request = Self::with_query(self.authorize(self.agent.delete(self.url(path))), query);
        Self::finish(operation, request.call())
    }
}
