//! End-to-end scenarios run against a live (or mock) scheduler.
//!
//! Each scenario submits work, waits for the scheduler to converge and
//! checks the observed state. Scenarios that leave long-running jobs behind
//! kill them on every exit path through [`KillGroupOnDrop`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cook_common::assertions::{self, Outcome};
use cook_common::client::{
    self, LimitKind, Limits, ListFilter, RetryAmount, RetryMethod, RetryRequest, SubmitOptions,
};
use cook_common::poller::poll_until;
use cook_common::views::{GroupSpec, InstanceStatus, JobState, StragglerHandling};
use cook_common::{
    CookError, HarnessConfig, HasUuid, JobSpec, JobStatus, JobView, TicketIssuer, Transport,
};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::context::{ScenarioContext, ScenarioError, ScenarioResult, ensure};

pub type ScenarioFn = fn(&mut ScenarioContext) -> ScenarioResult;

/// Every runnable scenario, in run order.
pub const SCENARIOS: &[(&str, ScenarioFn)] = &[
    ("basic_submit", basic_submit),
    ("failing_submit", failing_submit),
    ("max_runtime_exceeded", max_runtime_exceeded),
    ("get_job", get_job),
    ("list_jobs_by_state", list_jobs_by_state),
    ("list_jobs_by_time", list_jobs_by_time),
    ("cancel_job", cancel_job),
    ("change_retries", change_retries),
    ("cancel_instance", cancel_instance),
    ("implicit_group", implicit_group),
    ("explicit_group", explicit_group),
    ("straggler_handling", straggler_handling),
    ("group_kill_retry", group_kill_retry),
    ("group_kill_retry_failed_only", group_kill_retry_failed_only),
    ("group_submit_retry", group_submit_retry),
    ("impersonated_submit", impersonated_submit),
    ("share_limits", share_limits),
];

pub fn find(name: &str) -> Option<ScenarioFn> {
    SCENARIOS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, scenario)| *scenario)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    SCENARIOS.iter().map(|(name, _)| *name)
}

/// Kills a group's jobs when dropped.
struct KillGroupOnDrop<'t> {
    transport: &'t Transport,
    group: String,
}

impl Drop for KillGroupOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(err) = client::kill_groups(self.transport, &[self.group.as_str()], false) {
            warn!(group = %self.group, error = %err, "Failed to clean up group");
        }
    }
}

fn rawscheduler_jobs<I: HasUuid>(transport: &Transport, ids: &[I]) -> ScenarioResult<Vec<JobView>> {
    let no_instances: &[String] = &[];
    Ok(client::query_rawscheduler(transport, ids, no_instances)?
        .expect_status(&[200])?
        .json()?)
}

fn rawscheduler_job<I: HasUuid + ?Sized>(transport: &Transport, id: &I) -> ScenarioResult<JobView> {
    rawscheduler_jobs(transport, &[id.uuid()])?
        .into_iter()
        .next()
        .ok_or_else(|| ScenarioError::Assertion(format!("job {} not returned", id.uuid())))
}

fn find_job<'a>(jobs: &'a [JobView], id: &str) -> ScenarioResult<&'a JobView> {
    jobs.iter()
        .find(|job| job.uuid == id)
        .ok_or_else(|| ScenarioError::Assertion(format!("job {id} missing from response")))
}

fn expect_single_instance(job: &JobView, status: InstanceStatus) -> ScenarioResult {
    ensure(job.instances.len() == 1, || {
        format!("job {} has {} instances, expected 1", job.uuid, job.instances.len())
    })?;
    let actual = job.instances[0].status;
    ensure(actual == status, || {
        format!("job {} instance is {actual:?}, expected {status:?}", job.uuid)
    })
}

fn expect_state(job: &JobView, state: JobState) -> ScenarioResult {
    ensure(job.state == state, || {
        format!("job {} is {:?}, expected {state:?}", job.uuid, job.state)
    })
}

// ---------------------------------------------------------------------------
// Single jobs
// ---------------------------------------------------------------------------

pub fn basic_submit(ctx: &mut ScenarioContext) -> ScenarioResult {
    let job = ctx.job().with_command("echo hello");
    client::submit_job(&ctx.transport, &job, true)?;
    let view = assertions::wait_for_job(&ctx.transport, &job, JobStatus::Completed, ctx.budget())?;
    expect_single_instance(&view, InstanceStatus::Success)?;
    expect_state(&view, JobState::Success)
}

pub fn failing_submit(ctx: &mut ScenarioContext) -> ScenarioResult {
    let job = ctx.job().with_command("exit 1");
    client::submit_job(&ctx.transport, &job, true)?;
    let view = assertions::wait_for_job(&ctx.transport, &job, JobStatus::Completed, ctx.budget())?;
    expect_single_instance(&view, InstanceStatus::Failed)?;
    expect_state(&view, JobState::Failed)
}

pub fn max_runtime_exceeded(ctx: &mut ScenarioContext) -> ScenarioResult {
    let job = ctx
        .job()
        .with_command("sleep 60")
        .with_field("max_runtime", json!(5000));
    client::submit_job(&ctx.transport, &job, true)?;
    let view = assertions::wait_for_job(&ctx.transport, &job, JobStatus::Completed, ctx.budget())?;
    expect_single_instance(&view, InstanceStatus::Failed)?;
    let reason = view.instances[0].reason_code;
    ensure(reason == Some(2003), || format!("reason code {reason:?}, expected 2003"))
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

pub fn get_job(ctx: &mut ScenarioContext) -> ScenarioResult {
    let spec = ctx.job().with_command("echo hello");
    client::submit_job(&ctx.transport, &spec, true)?;
    let job = assertions::wait_for_job(&ctx.transport, &spec, JobStatus::Completed, ctx.budget())?;

    ensure(job.uuid == spec.uuid, || "uuid mismatch".to_string())?;
    ensure(job.name == spec.name, || format!("name {} != {}", job.name, spec.name))?;
    ensure(job.max_retries == spec.max_retries, || "max_retries mismatch".to_string())?;
    ensure(number(job.extra.get("mem")) == Some(spec.mem as f64), || {
        format!("mem {:?} != {}", job.extra.get("mem"), spec.mem)
    })?;
    ensure(number(job.extra.get("cpus")) == Some(spec.cpus), || {
        format!("cpus {:?} != {}", job.extra.get("cpus"), spec.cpus)
    })?;
    ensure(number(job.extra.get("priority")) == Some(f64::from(spec.priority)), || {
        "priority mismatch".to_string()
    })?;
    ensure(job.submit_time.is_some(), || "submit_time missing".to_string())?;
    expect_state(&job, JobState::Success)?;

    let instance = job
        .instances
        .first()
        .ok_or_else(|| ScenarioError::Assertion("completed job has no instance".to_string()))?;
    ensure(instance.start_time.is_some(), || "instance start_time missing".to_string())?;
    ensure(instance.end_time.is_some(), || "instance end_time missing".to_string())?;
    ensure(!instance.hostname.is_empty(), || "instance hostname missing".to_string())
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

pub fn list_jobs_by_state(ctx: &mut ScenarioContext) -> ScenarioResult {
    let jobs: Vec<JobSpec> = (1..=5)
        .map(|i| ctx.job().with_command(format!("sleep {}", i * 10)))
        .collect();
    client::submit_jobs(&ctx.transport, &jobs, &SubmitOptions::default(), true)?;
    let result = (|| -> ScenarioResult {
        assertions::wait_for_running_instance(&ctx.transport, &jobs[0], ctx.budget())?;
        let user = client::load_job(&ctx.transport, &jobs[0])?.user;
        for (name, status) in [
            ("waiting", JobStatus::Waiting),
            ("running", JobStatus::Running),
            ("completed", JobStatus::Completed),
        ] {
            let filter = ListFilter::for_user(&user).with_states([name]);
            let listed = client::list_job_views(&ctx.transport, &filter)?;
            for job in &listed {
                ensure(job.status == status, || {
                    format!("list state={name} returned job {} with {:?}", job.uuid, job.status)
                })?;
            }
        }
        Ok(())
    })();
    client::kill_jobs(&ctx.transport, &jobs, false)?;
    result
}

pub fn list_jobs_by_time(ctx: &mut ScenarioContext) -> ScenarioResult {
    let first = ctx.job();
    let second = ctx.job();
    client::submit_job(&ctx.transport, &first, true)?;
    thread::sleep(ctx.config.wait_interval);
    client::submit_job(&ctx.transport, &second, true)?;

    let first_view = client::load_job(&ctx.transport, &first)?;
    let second_view = client::load_job(&ctx.transport, &second)?;
    let (Some(t0), Some(t1)) = (first_view.submit_time, second_view.submit_time) else {
        return Err(ScenarioError::Assertion("submit_time missing".to_string()));
    };
    ensure(t0 < t1, || format!("submit times not increasing: {t0} >= {t1}"))?;
    let user = first_view.user;

    // Bounds are exclusive on both ends.
    let windows = [
        (t0 - 1, t1 + 1, true, true),
        (t0 - 1, t1, true, false),
        (t0, t1 + 1, false, true),
        (t0, t1, false, false),
    ];
    for (start, end, expect_first, expect_second) in windows {
        let filter = ListFilter::for_user(&user)
            .with_states(["waiting", "running", "completed"])
            .between(start, end);
        let listed = client::list_job_views(&ctx.transport, &filter)?;
        let has = |id: &str| listed.iter().any(|job| job.uuid == id);
        ensure(has(&first.uuid) == expect_first, || {
            format!("window ({start}, {end}): first job listed = {}", has(&first.uuid))
        })?;
        ensure(has(&second.uuid) == expect_second, || {
            format!("window ({start}, {end}): second job listed = {}", has(&second.uuid))
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Kill and retry
// ---------------------------------------------------------------------------

pub fn cancel_job(ctx: &mut ScenarioContext) -> ScenarioResult {
    let job = ctx.job().with_command("sleep 300");
    client::submit_job(&ctx.transport, &job, true)?;
    assertions::wait_for_job(&ctx.transport, &job, JobStatus::Running, ctx.budget())?;
    client::kill_jobs(&ctx.transport, &[&job], true)?;
    let view = rawscheduler_job(&ctx.transport, &job)?;
    expect_state(&view, JobState::Failed)
}

pub fn change_retries(ctx: &mut ScenarioContext) -> ScenarioResult {
    let job = ctx.job().with_command("sleep 10");
    client::submit_job(&ctx.transport, &job, true)?;
    assertions::wait_for_job(&ctx.transport, &job, JobStatus::Running, ctx.budget())?;
    client::kill_jobs(&ctx.transport, &[&job], true)?;
    expect_state(&rawscheduler_job(&ctx.transport, &job)?, JobState::Failed)?;

    let request = RetryRequest::jobs(&[&job], RetryAmount::Retries(2));
    let outcome = client::retry_jobs(&ctx.transport, &request, RetryMethod::Put, true)?;
    ensure(outcome.retried == Some(1), || format!("retried {:?}, expected 1", outcome.retried))?;

    let view = rawscheduler_job(&ctx.transport, &job)?;
    ensure(view.status == JobStatus::Waiting, || {
        format!("retried job is {:?}, expected waiting", view.status)
    })?;
    let view = assertions::wait_for_job(&ctx.transport, &job, JobStatus::Completed, ctx.budget())?;
    expect_state(&view, JobState::Success)
}

pub fn cancel_instance(ctx: &mut ScenarioContext) -> ScenarioResult {
    let job = ctx.job().with_command("sleep 10").with_max_retries(2);
    client::submit_job(&ctx.transport, &job, true)?;
    let running = assertions::wait_for_job(&ctx.transport, &job, JobStatus::Running, ctx.budget())?;
    let task_id = running
        .instances
        .first()
        .map(|instance| instance.task_id.clone())
        .ok_or_else(|| ScenarioError::Assertion("running job has no instance".to_string()))?;
    client::kill_instances(&ctx.transport, &[task_id], true)?;
    let view = assertions::wait_for_job(&ctx.transport, &job, JobStatus::Completed, ctx.budget())?;
    expect_state(&view, JobState::Success)
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

fn expect_group_membership(
    transport: &Transport,
    jobs: &[&JobSpec],
    group: &str,
) -> ScenarioResult {
    let views = rawscheduler_jobs(transport, jobs)?;
    for spec in jobs {
        let view = find_job(&views, &spec.uuid)?;
        ensure(view.groups.first().map(String::as_str) == Some(group), || {
            format!("job {} groups {:?}, expected {group}", view.uuid, view.groups)
        })?;
    }
    Ok(())
}

pub fn implicit_group(ctx: &mut ScenarioContext) -> ScenarioResult {
    let group = GroupSpec::minimal().uuid;
    let job_a = ctx.job().with_group(group.as_str());
    let job_b = ctx.job().with_group(group.as_str());
    client::submit_jobs(
        &ctx.transport,
        &[job_a.clone(), job_b.clone()],
        &SubmitOptions::default(),
        true,
    )?;
    expect_group_membership(&ctx.transport, &[&job_a, &job_b], &group)?;
    let both = [&job_a, &job_b];
    assertions::wait_for_jobs(&ctx.transport, &both, JobStatus::Completed, ctx.budget())?;
    Ok(())
}

pub fn explicit_group(ctx: &mut ScenarioContext) -> ScenarioResult {
    let group = GroupSpec::minimal();
    let job_a = ctx.job().with_group(&group);
    let job_b = ctx.job().with_group(&group);
    let options = SubmitOptions::default().with_group(group.clone());
    client::submit_jobs(&ctx.transport, &[job_a.clone(), job_b.clone()], &options, true)?;
    expect_group_membership(&ctx.transport, &[&job_a, &job_b], &group.uuid)?;
    let both = [&job_a, &job_b];
    assertions::wait_for_jobs(&ctx.transport, &both, JobStatus::Completed, ctx.budget())?;

    let view = client::load_group(&ctx.transport, &group)?;
    ensure(view.counts_consistent(), || format!("inconsistent group counts: {view:?}"))
}

pub fn straggler_handling(ctx: &mut ScenarioContext) -> ScenarioResult {
    let group = GroupSpec::minimal()
        .with_straggler_handling(StragglerHandling::quantile_deviation(0.5, 2.0));
    let fast = ctx.job().with_group(&group);
    let slow = ctx.job().with_group(&group).with_command("sleep 120");
    let options = SubmitOptions::default().with_group(group.clone());
    client::submit_jobs(&ctx.transport, &[fast.clone(), slow.clone()], &options, true)?;
    let _cleanup = KillGroupOnDrop {
        transport: &ctx.transport,
        group: group.uuid.clone(),
    };

    assertions::wait_for_job(&ctx.transport, &fast, JobStatus::Completed, ctx.budget())?;
    assertions::wait_for_job(&ctx.transport, &slow, JobStatus::Completed, ctx.budget())?;
    let views = rawscheduler_jobs(&ctx.transport, &[&fast, &slow])?;
    expect_state(find_job(&views, &fast.uuid)?, JobState::Success)?;
    let slow_view = find_job(&views, &slow.uuid)?;
    expect_state(slow_view, JobState::Failed)?;
    let reason = slow_view.instances.first().and_then(|i| i.reason_code);
    ensure(reason == Some(2004), || format!("straggler reason code {reason:?}, expected 2004"))
}

/// Submit a group, kill it once a member runs, retry it and wait for a member to run again.
fn group_submit_kill_retry(
    ctx: &mut ScenarioContext,
    failed_only: bool,
) -> ScenarioResult<Vec<JobView>> {
    let group = GroupSpec::minimal();
    let jobs: Vec<JobSpec> = (0..10)
        .map(|_| ctx.job().with_group(&group).with_command("sleep 30"))
        .collect();
    let options = SubmitOptions::default().with_group(group.clone());
    let budget = ctx.budget();
    client::submit_jobs(&ctx.transport, &jobs, &options, true)?;
    let _cleanup = KillGroupOnDrop {
        transport: &ctx.transport,
        group: group.uuid.clone(),
    };

    assertions::wait_for_group_running(&ctx.transport, &group, budget)?;
    info!(group = %group.uuid, "Killing all jobs in group");
    client::kill_groups(&ctx.transport, &[&group], true)?;
    let killed = assertions::wait_for_all_done(&ctx.transport, &jobs, Outcome::ANY, budget)?;
    for job in &killed {
        info!(job = %job.uuid, state = ?job.state, instances = job.instances.len(), "Job details");
    }

    let request = RetryRequest::groups(&[&group], RetryAmount::Retries(2)).failed_only(failed_only);
    client::retry_jobs(&ctx.transport, &request, RetryMethod::Put, true)?;
    assertions::wait_for_group_running(&ctx.transport, &group, budget)?;
    Ok(client::load_jobs(&ctx.transport, &jobs)?)
}

fn check_group_retried(jobs: &[JobView]) -> ScenarioResult {
    for job in jobs {
        ensure(job.max_retries == 2, || {
            format!("job {} has max_retries {}, expected 2", job.uuid, job.max_retries)
        })?;
    }
    ensure(jobs.iter().any(|job| job.status != JobStatus::Completed), || {
        "no job was restarted by the retry".to_string()
    })
}

pub fn group_kill_retry(ctx: &mut ScenarioContext) -> ScenarioResult {
    let jobs = group_submit_kill_retry(ctx, false)?;
    check_group_retried(&jobs)
}

pub fn group_kill_retry_failed_only(ctx: &mut ScenarioContext) -> ScenarioResult {
    let jobs = group_submit_kill_retry(ctx, true)?;
    check_group_retried(&jobs)
}

pub fn group_submit_retry(ctx: &mut ScenarioContext) -> ScenarioResult {
    const JOB_COUNT: u64 = 5;
    let group = GroupSpec::minimal();
    let jobs: Vec<JobSpec> = (0..JOB_COUNT)
        .map(|_| ctx.job().with_group(&group).with_command("exit 1").with_max_retries(1))
        .collect();
    let options = SubmitOptions::default().with_group(group.clone());
    let budget = ctx.budget();
    client::submit_jobs(&ctx.transport, &jobs, &options, true)?;
    let _cleanup = KillGroupOnDrop {
        transport: &ctx.transport,
        group: group.uuid.clone(),
    };

    let all_completed = |g: &cook_common::GroupView| {
        let not_all_waiting = g.waiting != Some(JOB_COUNT);
        not_all_waiting && g.completed == Some(JOB_COUNT)
    };
    poll_until(budget, || client::load_group(&ctx.transport, &group), all_completed)
        .map_err(CookError::from)?;

    let request = RetryRequest::groups(&[&group], RetryAmount::Increment(1)).failed_only(true);
    let outcome = client::retry_jobs(&ctx.transport, &request, RetryMethod::Put, true)?;
    ensure(outcome.retried == Some(JOB_COUNT), || {
        format!("retried {:?}, expected {JOB_COUNT}", outcome.retried)
    })?;
    // Wait until the retried jobs have actually left the waiting state and finished again.
    poll_until(
        budget,
        || client::load_jobs(&ctx.transport, &jobs),
        |views| views.iter().all(|job| job.is_completed() && job.instances.len() == 2),
    )
    .map_err(CookError::from)?;
    poll_until(budget, || client::load_group(&ctx.transport, &group), all_completed)
        .map_err(CookError::from)?;

    for job in client::load_jobs(&ctx.transport, &jobs)? {
        ensure(job.instances.len() == 2, || {
            format!("job {} has {} instances, expected 2", job.uuid, job.instances.len())
        })?;
        ensure(job.instances.iter().all(|i| i.status == InstanceStatus::Failed), || {
            format!("job {} has a non-failed instance", job.uuid)
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Multi-user
// ---------------------------------------------------------------------------

pub fn impersonated_submit(ctx: &mut ScenarioContext) -> ScenarioResult {
    let (target, poser) = {
        let users = ctx.users()?;
        let target = users.new_user()?;
        let poser = users.impersonator()?.impersonating(&target)?;
        (target, poser)
    };
    let job = ctx.job();
    {
        let scope = ctx.transport.activate(&poser);
        client::submit_job(&scope, &job, true)?;
        let view = client::load_job(&scope, &job)?;
        ensure(view.user == target.principal(), || {
            format!("job submitted as {}, expected {}", view.user, target.principal())
        })?;
        client::kill_jobs(&scope, &[&job], false)?;
    }
    ensure(ctx.transport.auth().impersonating().is_none(), || {
        "impersonation header leaked out of its scope".to_string()
    })
}

pub fn share_limits(ctx: &mut ScenarioContext) -> ScenarioResult {
    let (admin, user) = {
        let users = ctx.users()?;
        (users.admin()?, users.new_user()?)
    };
    let pool = ctx.cluster.default_pool.clone();
    let scope = ctx.transport.activate(&admin);
    let limits = Limits {
        cpus: Some(10.0),
        mem: Some(2048.0),
        ..Limits::default()
    };
    let user = user.principal();

    client::set_limit(&scope, LimitKind::Share, user, &limits, "testing", pool.as_deref(), true)?;
    let share: Value = client::get_limit(&scope, LimitKind::Share, user, pool.as_deref())?
        .expect_status(&[200])?
        .json()?;
    ensure(number(share.get("cpus")) == Some(10.0), || format!("share after set: {share}"))?;

    client::reset_limit(&scope, LimitKind::Share, user, "testing", pool.as_deref(), true)?;
    let share: Value = client::get_limit(&scope, LimitKind::Share, user, pool.as_deref())?
        .expect_status(&[200])?
        .json()?;
    ensure(number(share.get("cpus")) != Some(10.0), || format!("share after reset: {share}"))
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: ScenarioOutcome,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Failed(_))
    }
}

/// Run one scenario in a fresh context.
pub fn run_scenario(
    config: &HarnessConfig,
    name: &str,
    tickets: Arc<TicketIssuer>,
) -> ScenarioReport {
    let start = Instant::now();
    let result = match find(name) {
        Some(scenario) => ScenarioContext::connect_with_tickets(config.clone(), name, tickets)
            .and_then(|mut ctx| scenario(&mut ctx)),
        None => Err(ScenarioError::UnknownScenario(name.to_string())),
    };
    let elapsed = start.elapsed();

    let outcome = match result {
        Ok(()) if elapsed > config.test_timeout => ScenarioOutcome::Failed(format!(
            "exceeded the {}s scenario timeout",
            config.test_timeout.as_secs()
        )),
        Ok(()) => ScenarioOutcome::Passed,
        Err(ScenarioError::Skipped(reason)) => ScenarioOutcome::Skipped(reason),
        Err(err) => ScenarioOutcome::Failed(err.to_string()),
    };
    match &outcome {
        ScenarioOutcome::Passed => {
            info!(scenario = name, elapsed_ms = elapsed.as_millis() as u64, "Scenario passed")
        }
        ScenarioOutcome::Skipped(reason) => info!(scenario = name, %reason, "Scenario skipped"),
        ScenarioOutcome::Failed(reason) => error!(scenario = name, %reason, "Scenario failed"),
    }
    ScenarioReport {
        name: name.to_string(),
        outcome,
        elapsed,
    }
}

/// Run `names` (all scenarios when empty) sequentially.
pub fn run_scenarios(
    config: &HarnessConfig,
    names: &[String],
) -> ScenarioResult<Vec<ScenarioReport>> {
    let selected: Vec<String> = if names.is_empty() {
        self::names().map(str::to_string).collect()
    } else {
        names.to_vec()
    };
    if let Some(unknown) = selected.iter().find(|name| find(name).is_none()) {
        return Err(ScenarioError::UnknownScenario(unknown.clone()));
    }

    let tickets = Arc::new(TicketIssuer::from_config(config));
    Ok(selected
        .iter()
        .map(|name| run_scenario(config, name, Arc::clone(&tickets)))
        .collect())
}
