//! In-process mock of the Cook scheduler REST API.
//!
//! The mock keeps a tiny simulated world. Every authenticated state query
//! (job, instance, group and list reads) is answered first and then advances
//! the world by one tick, so pollers observe progress the way they would on a
//! real cluster. Commands map to runtimes: `sleep N` runs N ticks, `exit N`
//! runs one tick and exits with N, anything else succeeds after one tick.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use base64::Engine;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;

pub const ADMIN_USER: &str = "root";
pub const IMPERSONATOR_USER: &str = "poser";
pub const DEFAULT_POOL: &str = "mock-pool";
const HOSTNAME: &str = "mock-host-1";

const REASON_NONZERO_EXIT: i64 = 1003;
const REASON_KILLED_BY_USER: i64 = 1004;
const REASON_MAX_RUNTIME: i64 = 2003;
const REASON_STRAGGLER: i64 = 2004;

/// One request as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub authorization: Option<String>,
    pub impersonate: Option<String>,
}

impl RecordedRequest {
    pub fn query_values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Running,
    Completed,
}

#[derive(Debug, Clone)]
struct MockInstance {
    task_id: String,
    status: &'static str,
    start_time: u64,
    end_time: Option<u64>,
    exit_code: Option<i64>,
    reason_code: Option<i64>,
    ticks: u64,
}

#[derive(Debug, Clone)]
struct MockJob {
    uuid: String,
    user: String,
    name: String,
    command: String,
    cpus: f64,
    mem: f64,
    priority: i64,
    max_retries: u64,
    max_runtime_ms: Option<u64>,
    group: Option<String>,
    pool: String,
    submit_time: u64,
    phase: Phase,
    instances: Vec<MockInstance>,
}

impl MockJob {
    /// (ticks to run, exit code).
    fn behaviour(&self) -> (u64, i64) {
        let command = self.command.trim();
        if let Some(secs) = command.strip_prefix("sleep ") {
            (secs.trim().parse::<u64>().unwrap_or(1).max(1), 0)
        } else if let Some(code) = command.strip_prefix("exit ") {
            (1, code.trim().parse::<i64>().unwrap_or(1))
        } else {
            (1, 0)
        }
    }

    fn state(&self) -> &'static str {
        match self.phase {
            Phase::Waiting => "waiting",
            Phase::Running => "running",
            Phase::Completed => match self.instances.last() {
                Some(instance) if instance.status == "success" => "success",
                _ => "failed",
            },
        }
    }

    fn status(&self) -> &'static str {
        match self.phase {
            Phase::Waiting => "waiting",
            Phase::Running => "running",
            Phase::Completed => "completed",
        }
    }

    fn running_instance(&mut self) -> Option<&mut MockInstance> {
        self.instances.iter_mut().find(|i| i.status == "running")
    }

    /// End the running instance; requeue the job if it has retries left.
    fn finish(
        &mut self,
        now: u64,
        status: &'static str,
        exit: Option<i64>,
        reason: Option<i64>,
        retryable: bool,
    ) {
        if let Some(instance) = self.running_instance() {
            instance.status = status;
            instance.end_time = Some(now);
            instance.exit_code = exit;
            instance.reason_code = reason;
        }
        let retries_left = (self.instances.len() as u64) < self.max_retries;
        self.phase = if status == "failed" && retryable && retries_left {
            Phase::Waiting
        } else {
            Phase::Completed
        };
    }

    fn kill(&mut self, now: u64) {
        match self.phase {
            Phase::Running => self.finish(now, "failed", None, Some(REASON_KILLED_BY_USER), false),
            Phase::Waiting => self.phase = Phase::Completed,
            Phase::Completed => {}
        }
    }

    fn instance_json(&self, instance: &MockInstance) -> Value {
        let sandbox = format!("/var/lib/mock/sandbox/{}", instance.task_id);
        let mut value = json!({
            "task_id": instance.task_id,
            "hostname": HOSTNAME,
            "status": instance.status,
            "start_time": instance.start_time,
            "preempted": false,
            "backfilled": false,
            "executor": "cook",
            "sandbox_directory": sandbox,
            "output_url": format!("http://{HOSTNAME}:5051/files/read?path={sandbox}"),
            "ports": [],
        });
        if let Value::Object(map) = &mut value {
            if let Some(end) = instance.end_time {
                map.insert("end_time".to_string(), json!(end));
            }
            if let Some(exit) = instance.exit_code {
                map.insert("exit_code".to_string(), json!(exit));
            }
            if let Some(reason) = instance.reason_code {
                map.insert("reason_code".to_string(), json!(reason));
            }
        }
        value
    }

    fn to_json(&self) -> Value {
        let mut value = json!({
            "uuid": self.uuid,
            "user": self.user,
            "name": self.name,
            "command": self.command,
            "cpus": self.cpus,
            "mem": self.mem,
            "priority": self.priority,
            "pool": self.pool,
            "max_retries": self.max_retries,
            "retries_remaining": self.max_retries.saturating_sub(self.instances.len() as u64),
            "submit_time": self.submit_time,
            "status": self.status(),
            "state": self.state(),
            "groups": self.group.iter().collect::<Vec<_>>(),
            "instances": self.instances.iter().map(|i| self.instance_json(i)).collect::<Vec<_>>(),
        });
        if let (Value::Object(map), Some(runtime)) = (&mut value, self.max_runtime_ms) {
            map.insert("max_runtime".to_string(), json!(runtime));
        }
        value
    }
}

#[derive(Debug, Clone)]
struct MockGroup {
    uuid: String,
    name: String,
    straggler_handling: Value,
}

impl MockGroup {
    /// (quantile, multiplier) when the group uses quantile-deviation.
    fn quantile_deviation(&self) -> Option<(f64, f64)> {
        let kind = self.straggler_handling.get("type").and_then(Value::as_str);
        if kind != Some("quantile-deviation") {
            return None;
        }
        let parameters = self.straggler_handling.get("parameters")?;
        Some((
            parameters.get("quantile")?.as_f64()?,
            parameters.get("multiplier")?.as_f64()?,
        ))
    }
}

/// Simulated scheduler state.
#[derive(Debug, Default)]
pub struct World {
    jobs: Vec<MockJob>,
    groups: Vec<MockGroup>,
    limits: HashMap<(String, String, String), Value>,
    last_time: u64,
    kill_requests: usize,
    /// 1-based index of a `DELETE /rawscheduler` request to fail with 500.
    fail_kill_request: Option<usize>,
    requests: Vec<RecordedRequest>,
}

impl World {
    /// Wall-clock millis, strictly increasing across calls.
    fn now(&mut self) -> u64 {
        let wall = cook_common::util::current_millis();
        self.last_time = wall.max(self.last_time + 1);
        self.last_time
    }

    fn job_mut(&mut self, uuid: &str) -> Option<&mut MockJob> {
        self.jobs.iter_mut().find(|job| job.uuid == uuid)
    }

    fn job(&self, uuid: &str) -> Option<&MockJob> {
        self.jobs.iter().find(|job| job.uuid == uuid)
    }

    fn group_members(&self, group: &str) -> Vec<&MockJob> {
        self.jobs
            .iter()
            .filter(|job| job.group.as_deref() == Some(group))
            .collect()
    }

    fn tick(&mut self) {
        let now = self.now();
        for job in &mut self.jobs {
            match job.phase {
                Phase::Waiting => {
                    let task_id = format!("{}-{}", job.uuid, job.instances.len());
                    job.instances.push(MockInstance {
                        task_id,
                        status: "running",
                        start_time: now,
                        end_time: None,
                        exit_code: None,
                        reason_code: None,
                        ticks: 0,
                    });
                    job.phase = Phase::Running;
                }
                Phase::Running => {
                    let (duration, exit) = job.behaviour();
                    let limit = job.max_runtime_ms.map(|ms| (ms / 1000).max(1));
                    let Some(instance) = job.running_instance() else {
                        continue;
                    };
                    instance.ticks += 1;
                    let ticks = instance.ticks;
                    if limit.is_some_and(|limit| ticks >= limit && ticks < duration) {
                        job.finish(now, "failed", None, Some(REASON_MAX_RUNTIME), true);
                    } else if ticks >= duration {
                        if exit == 0 {
                            job.finish(now, "success", Some(0), None, true);
                        } else {
                            job.finish(now, "failed", Some(exit), Some(REASON_NONZERO_EXIT), true);
                        }
                    }
                }
                Phase::Completed => {}
            }
        }
        self.handle_stragglers(now);
    }

    fn handle_stragglers(&mut self, now: u64) {
        let policies: Vec<(String, f64, f64)> = self
            .groups
            .iter()
            .filter_map(|g| g.quantile_deviation().map(|(q, m)| (g.uuid.clone(), q, m)))
            .collect();
        for (group, quantile, multiplier) in policies {
            let members = self.group_members(&group);
            let mut runtimes: Vec<u64> = members
                .iter()
                .flat_map(|job| job.instances.iter())
                .filter(|instance| instance.status == "success")
                .map(|instance| instance.ticks)
                .collect();
            runtimes.sort_unstable();
            let needed = (quantile * members.len() as f64).ceil() as usize;
            if needed == 0 || runtimes.len() < needed {
                continue;
            }
            let threshold = runtimes[needed - 1] as f64 * multiplier;
            for job in self.jobs.iter_mut().filter(|j| j.group.as_deref() == Some(group.as_str())) {
                let straggling = job
                    .running_instance()
                    .is_some_and(|instance| instance.ticks as f64 > threshold);
                if straggling {
                    job.finish(now, "failed", None, Some(REASON_STRAGGLER), true);
                }
            }
        }
    }

    fn group_json(&self, group: &MockGroup, detailed: bool) -> Value {
        let members = self.group_members(&group.uuid);
        let mut value = json!({
            "uuid": group.uuid,
            "name": group.name,
            "jobs": members.iter().map(|job| job.uuid.clone()).collect::<Vec<_>>(),
            "straggler_handling": group.straggler_handling,
            "host_placement": {"type": "all"},
        });
        if detailed && let Value::Object(map) = &mut value {
            for (key, phase) in [
                ("waiting", Phase::Waiting),
                ("running", Phase::Running),
                ("completed", Phase::Completed),
            ] {
                let count = members.iter().filter(|job| job.phase == phase).count();
                map.insert(key.to_string(), json!(count));
            }
        }
        value
    }
}

/// Handle to a running mock scheduler. Shuts the server down when dropped.
pub struct MockScheduler {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

struct MockState {
    auth_scheme: String,
    world: Mutex<World>,
}

impl MockState {
    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MockScheduler {
    /// Start a mock using HTTP basic authentication.
    pub fn start() -> Self {
        Self::with_auth_scheme("http-basic")
    }

    pub fn with_auth_scheme(scheme: &str) -> Self {
        let state = Arc::new(MockState {
            auth_scheme: scheme.to_string(),
            world: Mutex::new(World::default()),
        });
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock scheduler");
        listener.set_nonblocking(true).expect("non-blocking listener");
        let addr = listener.local_addr().expect("mock scheduler address");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let router = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("mock scheduler runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                let _ = axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.world().requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.world().requests.clear();
    }

    /// Answer the `n`th (1-based) `DELETE /rawscheduler` with HTTP 500.
    pub fn fail_kill_request(&self, n: usize) {
        self.state.world().fail_kill_request = Some(n);
    }

    pub fn job_count(&self) -> usize {
        self.state.world().jobs.len()
    }

    /// Advance the simulated world by `n` ticks without a request.
    pub fn advance(&self, n: usize) {
        let mut world = self.state.world();
        for _ in 0..n {
            world.tick();
        }
    }
}

impl Drop for MockScheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn values<'a>(query: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    query
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

fn value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    values(query, key).into_iter().next()
}

fn flag(query: &[(String, String)], key: &str) -> bool {
    value(query, key) == Some("true")
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Principal named by an `Authorization` header.
pub fn principal_from(authorization: &str) -> Option<String> {
    if let Some(encoded) = authorization.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, _secret) = decoded.split_once(':')?;
        return Some(user.to_string());
    }
    let mut words = authorization.split_whitespace();
    match (words.next(), words.next()) {
        (Some("Negotiate"), Some(user)) => Some(user.to_string()),
        _ => None,
    }
}

/// Effective user for a request, or the rejection to send.
fn authenticate(
    scheme: &str,
    authorization: Option<&str>,
    impersonate: Option<&str>,
) -> Result<String, Response> {
    let user = match scheme {
        "http-basic" | "kerberos" => {
            let Some(authorization) = authorization else {
                return Err(error(StatusCode::UNAUTHORIZED, "authentication required"));
            };
            principal_from(authorization)
                .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "unrecognised credentials"))?
        }
        _ => ADMIN_USER.to_string(),
    };
    match impersonate {
        None => Ok(user),
        Some(_) if user != IMPERSONATOR_USER => Err(error(
            StatusCode::FORBIDDEN,
            format!("{user} is not allowed to impersonate"),
        )),
        Some(target) => Ok(target.to_string()),
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let path = uri.path().trim_end_matches('/').to_string();
    let authorization = header(&headers, "authorization");
    let impersonate = header(&headers, cook_common::transport::IMPERSONATION_HEADER);

    let mut world = state.world();
    world.requests.push(RecordedRequest {
        method: method.to_string(),
        path: if path.is_empty() { "/".to_string() } else { path.clone() },
        query: query.clone(),
        authorization: authorization.clone(),
        impersonate: impersonate.clone(),
    });

    // Unauthenticated endpoints.
    match (&method, path.as_str()) {
        (&Method::GET, "") => {
            return Json(json!({"message": "mock cook scheduler"})).into_response();
        }
        (&Method::GET, "/info") => {
            return Json(json!({
                "authentication-scheme": state.auth_scheme,
                "version": "mock",
                "commit": "0000000",
                "start-time": world.last_time,
            }))
            .into_response();
        }
        _ => {}
    }

    let authenticated = authenticate(
        &state.auth_scheme,
        authorization.as_deref(),
        impersonate.as_deref(),
    );
    let user = match authenticated {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(err) => return error(StatusCode::BAD_REQUEST, format!("malformed JSON: {err}")),
        }
    };

    let response = route(&mut world, &method, &path, &query, &user, &body);
    let advances = method == Method::GET && !matches!(path.as_str(), "/settings" | "/pools");
    if advances {
        world.tick();
    }
    response
}

fn route(
    world: &mut World,
    method: &Method,
    path: &str,
    query: &[(String, String)],
    user: &str,
    body: &Value,
) -> Response {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method.clone(), segments.as_slice()) {
        (Method::GET, ["settings"]) => Json(settings()).into_response(),
        (Method::GET, ["pools"]) => Json(json!([
            {"name": DEFAULT_POOL, "purpose": "test", "state": "active"},
            {"name": "legacy-pool", "purpose": "retired", "state": "inactive"},
        ]))
        .into_response(),

        (Method::POST, ["jobs"]) | (Method::POST, ["rawscheduler"]) => submit(world, user, body),
        (Method::GET, ["jobs"]) => get_jobs(world, &values(query, "uuid"), flag(query, "partial")),
        (Method::GET, ["jobs", uuid]) => match world.job(uuid) {
            Some(job) => Json(job.to_json()).into_response(),
            None => error(StatusCode::NOT_FOUND, format!("job {uuid} not found")),
        },
        (Method::GET, ["rawscheduler"]) => {
            rawscheduler(world, &values(query, "job"), &values(query, "instance"))
        }
        (Method::DELETE, ["rawscheduler"]) => {
            kill(world, &values(query, "job"), &values(query, "instance"))
        }
        (Method::GET, ["instances"]) => instances(world, &values(query, "uuid")),
        (Method::GET, ["instances", task]) => match instances_json(world, &[*task]).pop() {
            Some(instance) => Json(instance).into_response(),
            None => error(StatusCode::NOT_FOUND, format!("instance {task} not found")),
        },

        (Method::GET, ["group"]) => {
            get_groups(world, &values(query, "uuid"), flag(query, "detailed"))
        }
        (Method::DELETE, ["group"]) => kill_groups(world, &values(query, "uuid")),
        (Method::GET, ["list"]) => list(world, query),
        (Method::PUT, ["retry"]) | (Method::POST, ["retry"]) => retry(world, body),

        (Method::GET, [kind @ ("share" | "quota")]) => get_limit(world, kind, query),
        (Method::POST, [kind @ ("share" | "quota")]) => set_limit(world, kind, user, body),
        (Method::DELETE, [kind @ ("share" | "quota")]) => reset_limit(world, kind, user, query),

        (Method::GET, ["usage"]) => usage(
            world,
            value(query, "user").unwrap_or(user),
            flag(query, "group_breakdown"),
        ),
        (Method::GET, ["queue"]) => queue(world),
        (Method::GET, ["stats", "instances"]) => {
            stats(world, value(query, "status").unwrap_or("success"))
        }
        (Method::GET, ["unscheduled_jobs"]) => unscheduled(world, &values(query, "job")),

        _ => error(StatusCode::NOT_FOUND, format!("no route for {method} {path}")),
    }
}

fn settings() -> Value {
    json!({
        "pools": {"default": DEFAULT_POOL},
        "agent-query-cache": {"ttl-ms": 5},
        "sandbox-syncer": {"sync-interval-ms": 10},
        "executor": {"command": "./cook-executor", "portion": 0.5},
        "rebalancer": {"max-preemption": 64.0},
    })
}

fn submit(world: &mut World, user: &str, body: &Value) -> Response {
    let Some(specs) = body.get("jobs").and_then(Value::as_array) else {
        return error(StatusCode::BAD_REQUEST, "missing jobs");
    };
    let pool = body
        .get("pool")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_POOL)
        .to_string();

    let mut jobs = Vec::with_capacity(specs.len());
    for spec in specs {
        let (Some(uuid), Some(command)) = (
            spec.get("uuid").and_then(Value::as_str),
            spec.get("command").and_then(Value::as_str),
        ) else {
            return error(StatusCode::BAD_REQUEST, "every job needs a uuid and a command");
        };
        if world.job(uuid).is_some() {
            return error(StatusCode::BAD_REQUEST, format!("job {uuid} already exists"));
        }
        jobs.push(MockJob {
            uuid: uuid.to_string(),
            user: user.to_string(),
            name: spec.get("name").and_then(Value::as_str).unwrap_or("cookjob").to_string(),
            command: command.to_string(),
            cpus: spec.get("cpus").and_then(Value::as_f64).unwrap_or(1.0),
            mem: spec.get("mem").and_then(Value::as_f64).unwrap_or(128.0),
            priority: spec.get("priority").and_then(Value::as_i64).unwrap_or(50),
            max_retries: spec.get("max_retries").and_then(Value::as_u64).unwrap_or(1),
            max_runtime_ms: spec.get("max_runtime").and_then(Value::as_u64),
            group: spec.get("group").and_then(Value::as_str).map(str::to_string),
            pool: pool.clone(),
            submit_time: 0,
            phase: Phase::Waiting,
            instances: Vec::new(),
        });
    }

    for group in body.get("groups").and_then(Value::as_array).into_iter().flatten() {
        let Some(uuid) = group.get("uuid").and_then(Value::as_str) else {
            return error(StatusCode::BAD_REQUEST, "group without uuid");
        };
        world.groups.retain(|g| g.uuid != uuid);
        world.groups.push(MockGroup {
            uuid: uuid.to_string(),
            name: group.get("name").and_then(Value::as_str).unwrap_or("cookgroup").to_string(),
            straggler_handling: group
                .get("straggler_handling")
                .cloned()
                .unwrap_or_else(|| json!({"type": "none", "parameters": {}})),
        });
    }
    // Groups referenced only by jobs are created implicitly.
    for job in &jobs {
        if let Some(group) = &job.group
            && !world.groups.iter().any(|g| &g.uuid == group)
        {
            world.groups.push(MockGroup {
                uuid: group.clone(),
                name: "cookgroup".to_string(),
                straggler_handling: json!({"type": "none", "parameters": {}}),
            });
        }
    }

    let uuids: Vec<String> = jobs.iter().map(|job| job.uuid.clone()).collect();
    for mut job in jobs {
        job.submit_time = world.now();
        world.jobs.push(job);
    }
    (StatusCode::CREATED, Json(json!({ "jobs": uuids }))).into_response()
}

fn get_jobs(world: &World, uuids: &[&str], partial: bool) -> Response {
    let mut found = Vec::new();
    for uuid in uuids {
        match world.job(uuid) {
            Some(job) => found.push(job.to_json()),
            None if partial => {}
            None => return error(StatusCode::NOT_FOUND, format!("job {uuid} not found")),
        }
    }
    Json(found).into_response()
}

fn rawscheduler(world: &World, jobs: &[&str], instances: &[&str]) -> Response {
    let mut found: Vec<&MockJob> = jobs.iter().filter_map(|uuid| world.job(uuid)).collect();
    for task in instances {
        if let Some(job) = world
            .jobs
            .iter()
            .find(|job| job.instances.iter().any(|i| i.task_id == *task))
            && !found.iter().any(|f| f.uuid == job.uuid)
        {
            found.push(job);
        }
    }
    Json(found.iter().map(|job| job.to_json()).collect::<Vec<_>>()).into_response()
}

fn instances_json(world: &World, tasks: &[&str]) -> Vec<Value> {
    let mut found = Vec::new();
    for task in tasks {
        for job in &world.jobs {
            if let Some(instance) = job.instances.iter().find(|i| i.task_id == *task) {
                let mut value = job.instance_json(instance);
                if let Value::Object(map) = &mut value {
                    let owner = json!({"uuid": job.uuid, "name": job.name, "status": job.status()});
                    map.insert("job".to_string(), owner);
                }
                found.push(value);
            }
        }
    }
    found
}

fn instances(world: &World, tasks: &[&str]) -> Response {
    let found = instances_json(world, tasks);
    if found.len() < tasks.len() {
        return error(StatusCode::NOT_FOUND, "unknown instance");
    }
    Json(found).into_response()
}

fn kill(world: &mut World, jobs: &[&str], instances: &[&str]) -> Response {
    world.kill_requests += 1;
    if world.fail_kill_request == Some(world.kill_requests) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "injected kill failure");
    }
    let now = world.now();
    for uuid in jobs {
        if let Some(job) = world.job_mut(uuid) {
            job.kill(now);
        }
    }
    for task in instances {
        for job in &mut world.jobs {
            let running = job
                .instances
                .iter()
                .any(|i| i.task_id == *task && i.status == "running");
            if running {
                job.finish(now, "failed", None, Some(REASON_KILLED_BY_USER), true);
            }
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

fn get_groups(world: &World, uuids: &[&str], detailed: bool) -> Response {
    let groups: Vec<Value> = uuids
        .iter()
        .filter_map(|uuid| world.groups.iter().find(|g| g.uuid == *uuid))
        .map(|group| world.group_json(group, detailed))
        .collect();
    Json(groups).into_response()
}

fn kill_groups(world: &mut World, uuids: &[&str]) -> Response {
    let now = world.now();
    for job in &mut world.jobs {
        if job.group.as_deref().is_some_and(|g| uuids.contains(&g)) {
            job.kill(now);
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

fn list(world: &World, query: &[(String, String)]) -> Response {
    let Some(user) = value(query, "user") else {
        return error(StatusCode::BAD_REQUEST, "user is required");
    };
    let states: Vec<&str> = value(query, "state")
        .map(|s| s.split(['+', ' ']).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let bound = |key: &str| value(query, key).and_then(|v| v.parse::<u64>().ok());
    let (start, end) = (bound("start-ms"), bound("end-ms"));
    let limit = value(query, "limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    let name = value(query, "name");

    let mut matching: Vec<&MockJob> = world
        .jobs
        .iter()
        .filter(|job| job.user == user)
        .filter(|job| {
            states.is_empty() || states.iter().any(|s| *s == job.status() || *s == job.state())
        })
        .filter(|job| start.is_none_or(|start| job.submit_time > start))
        .filter(|job| end.is_none_or(|end| job.submit_time < end))
        .filter(|job| name.is_none_or(|name| name == job.name))
        .collect();
    matching.sort_by(|a, b| b.submit_time.cmp(&a.submit_time));
    matching.truncate(limit);
    Json(matching.iter().map(|job| job.to_json()).collect::<Vec<_>>()).into_response()
}

fn retry(world: &mut World, body: &Value) -> Response {
    let ids = |key: &str| -> Vec<String> {
        body.get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    let (job_ids, group_ids) = (ids("jobs"), ids("groups"));
    let retries = body.get("retries").and_then(Value::as_u64);
    let increment = body.get("increment").and_then(Value::as_u64);
    let failed_only = body.get("failed_only").and_then(Value::as_bool).unwrap_or(false);
    if retries.is_some() == increment.is_some() {
        return error(StatusCode::BAD_REQUEST, "exactly one of retries or increment is required");
    }

    let mut retried = 0u64;
    for job in &mut world.jobs {
        let selected = job_ids.contains(&job.uuid)
            || job.group.as_ref().is_some_and(|g| group_ids.contains(g));
        if !selected || (failed_only && job.state() != "failed") {
            continue;
        }
        let new_max = retries.unwrap_or_else(|| job.max_retries + increment.unwrap_or(0));
        if new_max == job.max_retries && job.phase != Phase::Completed {
            continue;
        }
        job.max_retries = new_max;
        if job.phase == Phase::Completed && (job.instances.len() as u64) < new_max {
            job.phase = Phase::Waiting;
        }
        retried += 1;
    }
    if retried == 0 {
        (StatusCode::OK, "0").into_response()
    } else {
        (StatusCode::CREATED, retried.to_string()).into_response()
    }
}

fn limit_key(kind: &str, user: &str, pool: Option<&str>) -> (String, String, String) {
    (
        kind.to_string(),
        user.to_string(),
        pool.unwrap_or(DEFAULT_POOL).to_string(),
    )
}

fn get_limit(world: &World, kind: &str, query: &[(String, String)]) -> Response {
    let Some(user) = value(query, "user") else {
        return error(StatusCode::BAD_REQUEST, "user is required");
    };
    let stored = world.limits.get(&limit_key(kind, user, value(query, "pool")));
    let defaults = json!({"cpus": 1.0, "mem": 1024.0, "gpus": 1.0, "count": 100});
    Json(stored.cloned().unwrap_or(defaults)).into_response()
}

fn set_limit(world: &mut World, kind: &str, user: &str, body: &Value) -> Response {
    if user != ADMIN_USER {
        return error(StatusCode::FORBIDDEN, format!("{user} is not an admin"));
    }
    let (Some(target), Some(limits), Some(_reason)) = (
        body.get("user").and_then(Value::as_str),
        body.get(kind).and_then(Value::as_object),
        body.get("reason").and_then(Value::as_str),
    ) else {
        return error(StatusCode::BAD_REQUEST, format!("user, {kind} and reason are required"));
    };
    let pool = body.get("pool").and_then(Value::as_str);
    let key = limit_key(kind, target, pool);
    let mut merged: Map<String, Value> = world
        .limits
        .get(&key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    merged.extend(limits.clone());
    let merged = Value::Object(merged);
    world.limits.insert(key, merged.clone());
    (StatusCode::CREATED, Json(merged)).into_response()
}

fn reset_limit(world: &mut World, kind: &str, user: &str, query: &[(String, String)]) -> Response {
    if user != ADMIN_USER {
        return error(StatusCode::FORBIDDEN, format!("{user} is not an admin"));
    }
    let (Some(target), Some(_reason)) = (value(query, "user"), value(query, "reason")) else {
        return error(StatusCode::BAD_REQUEST, "user and reason are required");
    };
    world.limits.remove(&limit_key(kind, target, value(query, "pool")));
    StatusCode::NO_CONTENT.into_response()
}

fn usage(world: &World, user: &str, group_breakdown: bool) -> Response {
    let running: Vec<&MockJob> = world
        .jobs
        .iter()
        .filter(|job| job.user == user && job.phase == Phase::Running)
        .collect();
    let total = |jobs: &[&MockJob]| {
        json!({
            "cpus": jobs.iter().map(|j| j.cpus).sum::<f64>(),
            "mem": jobs.iter().map(|j| j.mem).sum::<f64>(),
            "gpus": 0.0,
            "jobs": jobs.len(),
        })
    };
    let mut value = json!({ "total_usage": total(&running) });
    if group_breakdown && let Value::Object(map) = &mut value {
        let (grouped, ungrouped): (Vec<&MockJob>, Vec<&MockJob>) =
            running.iter().copied().partition(|j| j.group.is_some());
        map.insert("ungrouped".to_string(), json!({"usage": total(&ungrouped)}));
        map.insert("grouped".to_string(), json!([{"usage": total(&grouped)}]));
    }
    Json(value).into_response()
}

fn queue(world: &World) -> Response {
    let waiting: Vec<Value> = world
        .jobs
        .iter()
        .filter(|job| job.phase == Phase::Waiting)
        .map(MockJob::to_json)
        .collect();
    Json(json!({ DEFAULT_POOL: waiting })).into_response()
}

fn stats(world: &World, status: &str) -> Response {
    let count = world
        .jobs
        .iter()
        .flat_map(|job| job.instances.iter())
        .filter(|instance| instance.status == status)
        .count();
    Json(json!({
        "overall": {"count": count},
        "by-reason": {},
        "by-user-and-reason": {},
    }))
    .into_response()
}

fn unscheduled(world: &World, uuids: &[&str]) -> Response {
    let reasons: Vec<Value> = uuids
        .iter()
        .filter_map(|uuid| world.job(uuid))
        .map(|job| {
            let reasons = if job.phase == Phase::Waiting {
                json!([{"reason": "The job is now under investigation.", "data": {}}])
            } else {
                json!([])
            };
            json!({"uuid": job.uuid, "reasons": reasons})
        })
        .collect();
    Json(reasons).into_response()
}
