//! Resource client for the scheduler REST API.
//!
//! Every function takes the [`Transport`] to talk through and uses whatever
//! session is active on it. Mutations are sent exactly once; only the
//! poller re-issues queries.

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::errors::{CookError, Result};
use crate::transport::{QueryPairs, Response, Transport};
use crate::views::{GroupSpec, GroupView, HasUuid, InstanceView, JobSpec, JobView};

/// Maximum ids per kill request.
pub const KILL_CHUNK_SIZE: usize = 100;

fn repeated<I: HasUuid>(key: &str, ids: &[I]) -> QueryPairs {
    ids.iter()
        .map(|id| (key.to_string(), id.uuid().to_string()))
        .collect()
}

fn pair(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub pool: Option<String>,
    pub groups: Vec<GroupSpec>,
}

impl SubmitOptions {
    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.groups.push(group);
        self
    }
}

/// `POST /jobs`. Expects 201.
pub fn submit_jobs(
    transport: &Transport,
    jobs: &[JobSpec],
    options: &SubmitOptions,
    assert_response: bool,
) -> Result<Response> {
    let mut body = Map::new();
    body.insert("jobs".to_string(), serde_json::to_value(jobs).map_err(|source| CookError::Decode {
        what: "job specs".to_string(),
        source,
    })?);
    if !options.groups.is_empty() {
        let groups = serde_json::to_value(&options.groups).map_err(|source| CookError::Decode {
            what: "group specs".to_string(),
            source,
        })?;
        body.insert("groups".to_string(), groups);
    }
    if let Some(pool) = &options.pool {
        body.insert("pool".to_string(), Value::from(pool.as_str()));
    }

    let response = transport.post_json("jobs", &Value::Object(body))?;
    info!(
        jobs = jobs.len(),
        groups = options.groups.len(),
        status = response.status,
        "Submitted jobs"
    );
    response.check(assert_response, &[201])
}

pub fn submit_job(transport: &Transport, job: &JobSpec, assert_response: bool) -> Result<Response> {
    submit_jobs(
        transport,
        std::slice::from_ref(job),
        &SubmitOptions::default(),
        assert_response,
    )
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// `GET /jobs?uuid=..`. With `partial`, unknown uuids are skipped instead of failing.
pub fn query_jobs<I: HasUuid>(transport: &Transport, ids: &[I], partial: bool) -> Result<Response> {
    let mut query = repeated("uuid", ids);
    if partial {
        query.push(pair("partial", true));
    }
    transport.get("jobs", &query)
}

pub fn load_jobs<I: HasUuid>(transport: &Transport, ids: &[I]) -> Result<Vec<JobView>> {
    query_jobs(transport, ids, false)?
        .expect_status(&[200])?
        .json()
}

/// `GET /jobs/{uuid}`.
pub fn load_job<I: HasUuid + ?Sized>(transport: &Transport, id: &I) -> Result<JobView> {
    transport
        .get(&format!("jobs/{}", id.uuid()), &[])?
        .expect_status(&[200])?
        .json()
}

pub fn query_instances<I: HasUuid>(transport: &Transport, ids: &[I]) -> Result<Response> {
    transport.get("instances", &repeated("uuid", ids))
}

/// `GET /instances/{uuid}`.
pub fn load_instance<I: HasUuid + ?Sized>(transport: &Transport, id: &I) -> Result<InstanceView> {
    transport
        .get(&format!("instances/{}", id.uuid()), &[])?
        .expect_status(&[200])?
        .json()
}

pub fn query_groups<I: HasUuid>(transport: &Transport, ids: &[I]) -> Result<Response> {
    transport.get("group", &repeated("uuid", ids))
}

/// Group query including per-status counts.
pub fn group_detail_query<I: HasUuid>(transport: &Transport, ids: &[I]) -> Result<Response> {
    let mut query = repeated("uuid", ids);
    query.push(pair("detailed", true));
    transport.get("group", &query)
}

pub fn load_group<I: HasUuid + ?Sized>(transport: &Transport, id: &I) -> Result<GroupView> {
    let groups: Vec<GroupView> = group_detail_query(transport, &[id.uuid()])?
        .expect_status(&[200])?
        .json()?;
    groups
        .into_iter()
        .find(|group| group.uuid == id.uuid())
        .ok_or_else(|| CookError::InvalidArgument(format!("group {} not found", id.uuid())))
}

/// `GET /rawscheduler?job=..&instance=..`.
pub fn query_rawscheduler<J: HasUuid, I: HasUuid>(
    transport: &Transport,
    jobs: &[J],
    instances: &[I],
) -> Result<Response> {
    let mut query = repeated("job", jobs);
    query.extend(repeated("instance", instances));
    transport.get("rawscheduler", &query)
}

/// Filter for `GET /list`. Time bounds are exclusive and sent verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub user: String,
    pub states: Vec<String>,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub limit: Option<u32>,
    pub name: Option<String>,
}

impl ListFilter {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_states<S: Into<String>>(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.states = states.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn between(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.start_ms = Some(start_ms);
        self.end_ms = Some(end_ms);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn to_query(&self) -> QueryPairs {
        let mut query = vec![pair("user", &self.user)];
        if !self.states.is_empty() {
            query.push(pair("state", self.states.join("+")));
        }
        if let Some(start) = self.start_ms {
            query.push(pair("start-ms", start));
        }
        if let Some(end) = self.end_ms {
            query.push(pair("end-ms", end));
        }
        if let Some(limit) = self.limit {
            query.push(pair("limit", limit));
        }
        if let Some(name) = &self.name {
            query.push(pair("name", name));
        }
        query
    }
}

pub fn list_jobs(transport: &Transport, filter: &ListFilter) -> Result<Response> {
    transport.get("list", &filter.to_query())
}

pub fn list_job_views(transport: &Transport, filter: &ListFilter) -> Result<Vec<JobView>> {
    list_jobs(transport, filter)?.expect_status(&[200])?.json()
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAmount {
    /// Set the retry budget to this many.
    Retries(u32),
    /// Add this many to the current budget.
    Increment(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMethod {
    #[default]
    Put,
    /// The older `POST /retry` form.
    DeprecatedPost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub jobs: Vec<String>,
    pub groups: Vec<String>,
    pub amount: RetryAmount,
    pub failed_only: Option<bool>,
}

impl RetryRequest {
    pub fn jobs<I: HasUuid>(ids: &[I], amount: RetryAmount) -> Self {
        Self {
            jobs: ids.iter().map(|id| id.uuid().to_string()).collect(),
            groups: Vec::new(),
            amount,
            failed_only: None,
        }
    }

    pub fn groups<I: HasUuid>(ids: &[I], amount: RetryAmount) -> Self {
        Self {
            jobs: Vec::new(),
            groups: ids.iter().map(|id| id.uuid().to_string()).collect(),
            amount,
            failed_only: None,
        }
    }

    #[must_use]
    pub fn failed_only(mut self, failed_only: bool) -> Self {
        self.failed_only = Some(failed_only);
        self
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        if !self.jobs.is_empty() {
            body.insert("jobs".to_string(), json!(self.jobs));
        }
        if !self.groups.is_empty() {
            body.insert("groups".to_string(), json!(self.groups));
        }
        match self.amount {
            RetryAmount::Retries(n) => body.insert("retries".to_string(), json!(n)),
            RetryAmount::Increment(n) => body.insert("increment".to_string(), json!(n)),
        };
        if let Some(failed_only) = self.failed_only {
            body.insert("failed_only".to_string(), json!(failed_only));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub response: Response,
    /// Number of jobs whose budget changed, when the response was well formed.
    pub retried: Option<u64>,
}

/// Interpret a retry response: 200 carries a zero count, 201 a positive one.
pub fn interpret_retry_response(operation: &str, status: u16, body: &str) -> Result<u64> {
    let unexpected = |expected: u16| CookError::UnexpectedStatus {
        operation: operation.to_string(),
        status,
        expected: vec![expected],
        body: body.to_string(),
    };
    let count = || {
        serde_json::from_str::<u64>(body.trim()).map_err(|source| CookError::Decode {
            what: format!("{operation} retried-job count"),
            source,
        })
    };
    match status {
        200 => match count()? {
            0 => Ok(0),
            _ => Err(unexpected(201)),
        },
        201 => match count()? {
            0 => Err(unexpected(200)),
            n => Ok(n),
        },
        _ => Err(CookError::UnexpectedStatus {
            operation: operation.to_string(),
            status,
            expected: vec![200, 201],
            body: body.to_string(),
        }),
    }
}

pub fn retry_jobs(
    transport: &Transport,
    request: &RetryRequest,
    method: RetryMethod,
    assert_response: bool,
) -> Result<RetryOutcome> {
    let body = request.body();
    let response = match method {
        RetryMethod::Put => transport.put_json("retry", &body)?,
        RetryMethod::DeprecatedPost => transport.post_json("retry", &body)?,
    };
    let interpreted =
        interpret_retry_response(&response.operation, response.status, &response.body);
    info!(
        jobs = request.jobs.len(),
        groups = request.groups.len(),
        status = response.status,
        "Retry request sent"
    );
    let retried = match interpreted {
        Ok(count) => Some(count),
        Err(err) if assert_response => return Err(err),
        Err(err) => {
            debug!(error = %err, "Retry response not in the expected shape");
            None
        }
    };
    Ok(RetryOutcome { response, retried })
}

// ---------------------------------------------------------------------------
// Kill
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillOutcome {
    pub responses: Vec<Response>,
    /// True only if every chunk returned the expected status.
    pub all_succeeded: bool,
}

/// Send `ids` in batches of at most `chunk_size` through `send`.
///
/// With `assert_response`, the first batch answered with anything other
/// than `expected` aborts the remaining batches.
pub fn kill_in_chunks<F>(
    ids: &[String],
    chunk_size: usize,
    expected: u16,
    assert_response: bool,
    mut send: F,
) -> Result<KillOutcome>
where
    F: FnMut(&[String]) -> Result<Response>,
{
    if chunk_size == 0 {
        return Err(CookError::InvalidArgument(
            "kill chunk size must be greater than zero".to_string(),
        ));
    }
    let mut responses = Vec::with_capacity(ids.len().div_ceil(chunk_size));
    let mut all_succeeded = true;
    for (index, chunk) in ids.chunks(chunk_size).enumerate() {
        let response = send(chunk)?;
        if response.status != expected {
            warn!(
                chunk = index,
                ids = chunk.len(),
                status = response.status,
                "Kill chunk failed"
            );
            all_succeeded = false;
            if assert_response {
                return Err(CookError::UnexpectedStatus {
                    operation: response.operation,
                    status: response.status,
                    expected: vec![expected],
                    body: response.body,
                });
            }
        }
        responses.push(response);
    }
    Ok(KillOutcome {
        responses,
        all_succeeded,
    })
}

fn kill_rawscheduler<I: HasUuid>(
    transport: &Transport,
    key: &str,
    ids: &[I],
    assert_response: bool,
) -> Result<KillOutcome> {
    let ids: Vec<String> = ids.iter().map(|id| id.uuid().to_string()).collect();
    let outcome = kill_in_chunks(&ids, KILL_CHUNK_SIZE, 204, assert_response, |chunk| {
        transport.delete("rawscheduler", &repeated(key, chunk))
    })?;
    info!(
        kind = key,
        ids = ids.len(),
        requests = outcome.responses.len(),
        ok = outcome.all_succeeded,
        "Kill requested"
    );
    Ok(outcome)
}

/// `DELETE /rawscheduler?job=..`, chunked.
pub fn kill_jobs<I: HasUuid>(
    transport: &Transport,
    ids: &[I],
    assert_response: bool,
) -> Result<KillOutcome> {
    kill_rawscheduler(transport, "job", ids, assert_response)
}

/// `DELETE /rawscheduler?instance=..`, chunked.
pub fn kill_instances<I: HasUuid>(
    transport: &Transport,
    ids: &[I],
    assert_response: bool,
) -> Result<KillOutcome> {
    kill_rawscheduler(transport, "instance", ids, assert_response)
}

pub fn kill_groups<I: HasUuid>(
    transport: &Transport,
    ids: &[I],
    assert_response: bool,
) -> Result<Response> {
    let response = transport.delete("group", &repeated("uuid", ids))?;
    info!(groups = ids.len(), status = response.status, "Group kill requested");
    response.check(assert_response, &[204])
}

// ---------------------------------------------------------------------------
// Share and quota
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Share,
    Quota,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Share => "share",
            Self::Quota => "quota",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Limits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

fn user_and_pool(user: &str, pool: Option<&str>) -> QueryPairs {
    let mut query = vec![pair("user", user)];
    if let Some(pool) = pool {
        query.push(pair("pool", pool));
    }
    query
}

pub fn get_limit(
    transport: &Transport,
    kind: LimitKind,
    user: &str,
    pool: Option<&str>,
) -> Result<Response> {
    transport.get(kind.as_str(), &user_and_pool(user, pool))
}

/// `POST /share` or `POST /quota`. Expects 201.
pub fn set_limit(
    transport: &Transport,
    kind: LimitKind,
    user: &str,
    limits: &Limits,
    reason: &str,
    pool: Option<&str>,
    assert_response: bool,
) -> Result<Response> {
    let mut body = Map::new();
    body.insert("user".to_string(), json!(user));
    body.insert(kind.as_str().to_string(), json!(limits));
    body.insert("reason".to_string(), json!(reason));
    if let Some(pool) = pool {
        body.insert("pool".to_string(), json!(pool));
    }
    let response = transport.post_json(kind.as_str(), &Value::Object(body))?;
    info!(kind = kind.as_str(), %user, status = response.status, "Limit set");
    response.check(assert_response, &[201])
}

/// `DELETE /share` or `DELETE /quota`. Expects 204.
pub fn reset_limit(
    transport: &Transport,
    kind: LimitKind,
    user: &str,
    reason: &str,
    pool: Option<&str>,
    assert_response: bool,
) -> Result<Response> {
    let mut query = user_and_pool(user, pool);
    query.push(pair("reason", reason));
    let response = transport.delete(kind.as_str(), &query)?;
    info!(kind = kind.as_str(), %user, status = response.status, "Limit reset");
    response.check(assert_response, &[204])
}

// ---------------------------------------------------------------------------
// Cluster and usage
// ---------------------------------------------------------------------------

pub fn settings(transport: &Transport) -> Result<Value> {
    transport.get("settings", &[])?.expect_status(&[200])?.json()
}

/// `GET /info`, sent without credentials.
pub fn scheduler_info(transport: &Transport) -> Result<Value> {
    transport.get_anonymous("info")?.expect_status(&[200])?.json()
}

pub fn user_usage(transport: &Transport, user: &str, group_breakdown: bool) -> Result<Response> {
    let mut query = vec![pair("user", user)];
    if group_breakdown {
        query.push(pair("group_breakdown", true));
    }
    transport.get("usage", &query)
}

pub fn query_queue(transport: &Transport) -> Result<Response> {
    transport.get("queue", &[])
}

pub fn instance_stats(
    transport: &Transport,
    status: &str,
    start: &str,
    end: &str,
) -> Result<Response> {
    transport.get(
        "stats/instances",
        &[pair("status", status), pair("start", start), pair("end", end)],
    )
}

pub fn all_pools(transport: &Transport) -> Result<Vec<Value>> {
    transport.get("pools", &[])?.expect_status(&[200])?.json()
}

/// Pools whose `state` is `active`.
pub fn active_pools(transport: &Transport) -> Result<Vec<Value>> {
    Ok(all_pools(transport)?
        .into_iter()
        .filter(|pool| pool.get("state").and_then(Value::as_str) == Some("active"))
        .collect())
}

pub fn unscheduled_jobs<I: HasUuid>(transport: &Transport, ids: &[I]) -> Result<Response> {
    transport.get("unscheduled_jobs", &repeated("job", ids))
}
