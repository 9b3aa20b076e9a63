//! Scenario predicates and named waits.
//!
//! Each `wait_for_*` function is a query from [`crate::client`] paired with a
//! predicate and handed to [`crate::poller::poll_until`].

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::client;
use crate::errors::{CookError, Result};
use crate::poller::{PollBudget, poll_until};
use crate::transport::Transport;
use crate::views::{GroupView, HasUuid, InstanceStatus, InstanceView, JobState, JobStatus, JobView};

const SANDBOX_WAIT_CEILING: Duration = Duration::from_secs(4 * 60);
const SANDBOX_WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// Terminal result a job and its instances may end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub const ANY: &'static [Outcome] = &[Outcome::Success, Outcome::Failed];
    pub const KILLED: &'static [Outcome] = &[Outcome::Failed];

    fn matches_job(self, state: JobState) -> bool {
        matches!(
            (self, state),
            (Self::Success, JobState::Success) | (Self::Failed, JobState::Failed)
        )
    }

    fn matches_instance(self, status: InstanceStatus) -> bool {
        matches!(
            (self, status),
            (Self::Success, InstanceStatus::Success) | (Self::Failed, InstanceStatus::Failed)
        )
    }
}

/// Every job, and every instance of every job, ended in one of `accepted`.
pub fn all_instances_done(jobs: &[JobView], accepted: &[Outcome]) -> bool {
    jobs.iter().all(|job| {
        if !accepted.iter().any(|o| o.matches_job(job.state)) {
            return false;
        }
        job.instances.iter().all(|instance| {
            let done = accepted.iter().any(|o| o.matches_instance(instance.status));
            if !done {
                info!(
                    job = %job.uuid,
                    instance = %instance.task_id,
                    status = ?instance.status,
                    "Instance has unaccepted status"
                );
            }
            done
        })
    })
}

pub fn all_instances_killed(jobs: &[JobView]) -> bool {
    all_instances_done(jobs, Outcome::KILLED)
}

pub fn jobs_have_status(jobs: &[JobView], status: JobStatus) -> bool {
    for job in jobs {
        info!(job = %job.uuid, current = ?job.status, expected = ?status, "Job status");
    }
    jobs.iter().all(|job| job.status == status)
}

pub fn group_some_job_started(group: &GroupView) -> bool {
    let running = group.running.unwrap_or(0);
    info!(group = %group.uuid, running, "Jobs running in group");
    running > 0
}

pub fn group_some_job_done(group: &GroupView) -> bool {
    let completed = group.completed.unwrap_or(0);
    info!(group = %group.uuid, completed, "Jobs completed in group");
    completed > 0
}

pub fn group_all_jobs_done(group: &GroupView) -> bool {
    group.completed.is_some_and(|c| c == group.jobs.len() as u64)
}

fn settings_millis(settings: &Value, pointer: &str) -> Result<u64> {
    settings
        .pointer(pointer)
        .and_then(Value::as_u64)
        .ok_or_else(|| CookError::InvalidArgument(format!("settings have no numeric {pointer}")))
}

/// Budget for sandbox discovery: four agent-cache or syncer periods, at most four minutes.
pub fn sandbox_wait_budget(settings: &Value) -> Result<PollBudget> {
    let cache_ttl = settings_millis(settings, "/agent-query-cache/ttl-ms")?;
    let sync_interval = settings_millis(settings, "/sandbox-syncer/sync-interval-ms")?;
    let max_wait = Duration::from_millis(cache_ttl.max(sync_interval).saturating_mul(4))
        .min(SANDBOX_WAIT_CEILING);
    PollBudget::new(max_wait.max(SANDBOX_WAIT_INTERVAL), SANDBOX_WAIT_INTERVAL)
}

/// Whether the scheduler is expected to publish a sandbox directory for `instance`.
///
/// On clusters with ephemeral hosts only the cook executor reports one.
pub fn should_expect_sandbox_directory(instance: &InstanceView, ephemeral_hosts: bool) -> bool {
    !ephemeral_hosts || instance.executor.as_deref() == Some("cook")
}

fn load_one<I: HasUuid + ?Sized>(transport: &Transport, id: &I) -> Result<JobView> {
    let jobs = client::load_jobs(transport, &[id.uuid()])?;
    jobs.into_iter()
        .next()
        .ok_or_else(|| CookError::InvalidArgument(format!("job {} not found", id.uuid())))
}

fn first_instance_where<F>(job: &JobView, what: &str, has: F) -> Option<InstanceView>
where
    F: Fn(&InstanceView) -> bool,
{
    if job.instances.is_empty() {
        debug!(job = %job.uuid, "Job has no instances");
        return None;
    }
    let found = job.instances.iter().find(|i| has(i)).cloned();
    if found.is_none() {
        debug!(job = %job.uuid, "No instance has {what} yet");
    }
    found
}

/// Wait until every job reports `status`. Polls at twice the budget interval.
///
/// Ids the scheduler does not know yet keep the wait going.
pub fn wait_for_jobs<I: HasUuid>(
    transport: &Transport,
    ids: &[I],
    status: JobStatus,
    budget: PollBudget,
) -> Result<Vec<JobView>> {
    let budget = budget.with_interval(budget.interval() * 2);
    let jobs = poll_until(
        budget,
        || {
            client::query_jobs(transport, ids, true)?
                .expect_status(&[200])?
                .json::<Vec<JobView>>()
        },
        |jobs| all_present(jobs, ids) && jobs_have_status(jobs, status),
    )?;
    Ok(jobs)
}

/// Whether every requested id appears in `jobs`.
pub fn all_present<I: HasUuid>(jobs: &[JobView], ids: &[I]) -> bool {
    let seen: HashSet<&str> = jobs.iter().map(|job| job.uuid.as_str()).collect();
    let missing: Vec<&str> = ids
        .iter()
        .map(|id| id.uuid())
        .filter(|uuid| !seen.contains(uuid))
        .collect();
    if !missing.is_empty() {
        debug!(?missing, "Jobs not visible yet");
    }
    missing.is_empty()
}

pub fn wait_for_job<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    status: JobStatus,
    budget: PollBudget,
) -> Result<JobView> {
    let jobs = wait_for_jobs(transport, &[id.uuid()], status, budget)?;
    jobs.into_iter()
        .next()
        .ok_or_else(|| CookError::InvalidArgument(format!("job {} not found", id.uuid())))
}

/// Wait for an instance reporting an exit code, and return it.
pub fn wait_for_exit_code<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<InstanceView> {
    let job = poll_until(
        budget,
        || load_one(transport, id),
        |job| first_instance_where(job, "an exit code", |i| i.exit_code.is_some()).is_some(),
    )?;
    first_instance_where(&job, "an exit code", |i| i.exit_code.is_some())
        .ok_or_else(|| CookError::InvalidArgument(format!("job {} lost its exit code", job.uuid)))
}

/// Wait for an instance with a sandbox directory, budgeted from the scheduler settings.
pub fn wait_for_sandbox_directory<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
) -> Result<InstanceView> {
    let budget = sandbox_wait_budget(&client::settings(transport)?)?;
    let has_sandbox = |i: &InstanceView| i.sandbox_directory.is_some();
    let job = poll_until(
        budget,
        || load_one(transport, id),
        |job| first_instance_where(job, "a sandbox directory", has_sandbox).is_some(),
    )?;
    first_instance_where(&job, "a sandbox directory", has_sandbox)
        .ok_or_else(|| CookError::InvalidArgument(format!("job {} lost its sandbox", job.uuid)))
}

/// Wait until the first instance has an end time.
pub fn wait_for_end_time<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<JobView> {
    let job = poll_until(
        budget,
        || load_one(transport, id),
        |job| match job.instances.first() {
            Some(instance) => instance.end_time.is_some(),
            None => {
                debug!(job = %job.uuid, "Job has no instances");
                false
            }
        },
    )?;
    Ok(job)
}

/// Wait until the first instance is running, and return it.
pub fn wait_for_running_instance<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<InstanceView> {
    let job = poll_until(
        budget,
        || load_one(transport, id),
        |job| {
            job.instances.first().is_some_and(|instance| {
                info!(
                    job = %job.uuid,
                    instance = %instance.task_id,
                    status = ?instance.status,
                    "Waiting for running instance"
                );
                instance.status == InstanceStatus::Running
            })
        },
    )?;
    job.instances
        .into_iter()
        .next()
        .ok_or_else(|| CookError::InvalidArgument("running instance disappeared".to_string()))
}

/// Wait for an instance with an output URL, and return it.
pub fn wait_for_output_url<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<InstanceView> {
    let has_url = |i: &InstanceView| i.output_url.is_some();
    let job = poll_until(
        budget,
        || client::load_job(transport, id),
        |job| first_instance_where(job, "an output url", has_url).is_some(),
    )?;
    first_instance_where(&job, "an output url", has_url)
        .ok_or_else(|| CookError::InvalidArgument(format!("job {} lost its output url", job.uuid)))
}

/// Wait until the job has exactly one instance; returns the job and that instance.
pub fn wait_for_instance<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<(JobView, InstanceView)> {
    let job = poll_until(
        budget,
        || client::load_job(transport, id),
        |job| job.instances.len() == 1,
    )?;
    let instance = job
        .instances
        .first()
        .cloned()
        .ok_or_else(|| CookError::InvalidArgument(format!("job {} has no instance", job.uuid)))?;
    Ok((job, instance))
}

fn wait_for_group<I, P>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
    predicate: P,
) -> Result<GroupView>
where
    I: HasUuid + ?Sized,
    P: Fn(&GroupView) -> bool,
{
    Ok(poll_until(budget, || client::load_group(transport, id), predicate)?)
}

/// Wait until at least one member job is running.
pub fn wait_for_group_running<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<GroupView> {
    wait_for_group(transport, id, budget, group_some_job_started)
}

/// Wait until at least one member job has completed.
pub fn wait_for_group_some_done<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<GroupView> {
    wait_for_group(transport, id, budget, group_some_job_done)
}

/// Wait until every member job has completed.
pub fn wait_for_group_completed<I: HasUuid + ?Sized>(
    transport: &Transport,
    id: &I,
    budget: PollBudget,
) -> Result<GroupView> {
    wait_for_group(transport, id, budget, group_all_jobs_done)
}

/// Wait until every job and instance ended in one of `accepted`.
pub fn wait_for_all_done<I: HasUuid>(
    transport: &Transport,
    ids: &[I],
    accepted: &[Outcome],
    budget: PollBudget,
) -> Result<Vec<JobView>> {
    Ok(poll_until(
        budget,
        || client::load_jobs(transport, ids),
        |jobs| all_instances_done(jobs, accepted),
    )?)
}

pub fn wait_for_all_killed<I: HasUuid>(
    transport: &Transport,
    ids: &[I],
    budget: PollBudget,
) -> Result<Vec<JobView>> {
    wait_for_all_done(transport, ids, Outcome::KILLED, budget)
}
