//! Dependency-graph job scheduling.
//!
//! This module decides *when* a job may touch chunk memory. It is the only
//! synchronisation for column data: chunks take no locks, so two jobs with
//! conflicting access must never run at the same time.
//!
//! ## Dependency rules
//!
//! The scheduler keeps, per component type, the set of in-flight readers and
//! the last writer. For each declared `(component, mode)` of a new job, with
//! write superseding read on the same component:
//!
//! * **Read**: depend on `last_writer[c]` if it is still incomplete, then join
//!   `readers[c]`.
//! * **Write**: depend on every incomplete job in `readers[c]` and on
//!   `last_writer[c]`, then become `last_writer[c]` and clear `readers[c]`.
//!   The absorbed readers stay ordered through this writer.
//!
//! Readers never order against each other. At most one writer per component
//! is current at any time.
//!
//! ## Execution model
//!
//! All bookkeeping lives on the orchestrating thread. A job is dispatched to
//! the [`WorkerPool`] only once every dependency has completed, and
//! completion is only observed while pumping responses (in
//! [`JobHandle::complete`], [`JobScheduler::complete_all`],
//! [`JobScheduler::fence_all`] and [`JobScheduler::complete_writers_of`]).
//! Completing a job dispatches every dependee whose dependency set becomes
//! empty.
//!
//! A job failure is kept until a handle covering that job is completed.
//! Fences only wait; they leave failures for their owners.
//!
//! Without a pool every job runs inline at schedule time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::engine::commands::Commands;
use crate::engine::component::ComponentRegistry;
use crate::engine::error::{BuildError, ECSError, ECSResult, ExecutionError, TaskError};
use crate::engine::query::SystemQuery;
use crate::engine::store::{EntityStore, MatchedChunk};
use crate::engine::types::{normalize_access, Access, AccessMode, ComponentID, JobID, TaskID};
use crate::engine::view::ChunkView;
use crate::engine::worker::{TaskOutput, TaskParams, TaskRunner, WorkerPool};


/// Body of a job, invoked once per matched chunk.
pub type JobBody = Arc<dyn Fn(&ChunkView, &mut Commands) -> ECSResult<()> + Send + Sync>;

/// Work shipped to a worker: a set of chunk views and the body to run on them.
struct ChunkTask {
    views: Vec<ChunkView>,
    body: JobBody,
}

/// What a worker returns for one [`ChunkTask`].
struct ChunkTaskOutcome {
    commands: Commands,
    error: Option<String>,
}

fn execute_chunk_task(task: ChunkTask) -> ChunkTaskOutcome {
    let ChunkTask { views, body } = task;
    let mut commands = Commands::new();
    let mut error = None;
    for view in &views {
        if let Err(e) = body(view, &mut commands) {
            error = Some(e.to_string());
            break;
        }
    }
    // Views hold `Arc<Chunk>`s; release them before the response is sent.
    drop(views);
    ChunkTaskOutcome { commands, error }
}

/// How a scheduled job is split into worker tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dispatch {
    /// One task over every chunk.
    Single,
    /// One task per chunk.
    PerChunk,
}

struct Payload {
    views: Vec<ChunkView>,
    body: JobBody,
    dispatch: Dispatch,
}

struct JobState {
    access: Arc<[Access]>,
    declared_dependencies: Vec<JobID>,
    waiting_on: BTreeSet<JobID>,
    payload: Option<Payload>,
    outstanding: usize,
    error: Option<ExecutionError>,
}

/// Set of jobs that can be waited on together.
///
/// An id that the scheduler no longer tracks counts as complete.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobHandle {
    jobs: Vec<JobID>,
}

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self {
        Self::default()
    }

    fn single(job: JobID) -> Self {
        Self { jobs: vec![job] }
    }

    /// Job ids covered by this handle.
    pub fn jobs(&self) -> &[JobID] {
        &self.jobs
    }

    /// Adds every job of `other` to this handle.
    pub fn merge(&mut self, other: &JobHandle) {
        for &job in &other.jobs {
            if !self.jobs.contains(&job) {
                self.jobs.push(job);
            }
        }
    }

    /// Returns `true` if every covered job has finished.
    pub fn is_complete(&self, scheduler: &JobScheduler) -> bool {
        self.jobs.iter().all(|&job| scheduler.is_complete(job))
    }

    /// Blocks until every covered job has finished.
    ///
    /// Returns the first job failure, if any. Calling it again afterwards is
    /// a no-op.
    pub fn complete(&mut self, scheduler: &mut JobScheduler) -> ECSResult<()> {
        let result = scheduler.complete_jobs(&self.jobs);
        self.jobs.clear();
        result
    }
}

/// Dependency-tracking job scheduler.

pub struct JobScheduler {
    registry: Arc<ComponentRegistry>,
    pool: Option<WorkerPool>,
    runner: Option<TaskRunner>,
    readers: HashMap<ComponentID, BTreeSet<JobID>>,
    last_writer: HashMap<ComponentID, JobID>,
    job_to_dependees: HashMap<JobID, BTreeSet<JobID>>,
    jobs: HashMap<JobID, JobState>,
    task_to_job: HashMap<TaskID, JobID>,
    failures: HashMap<JobID, ExecutionError>,
    commands: Commands,
    next_job: JobID,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("pool", &self.pool)
            .field("jobs", &self.jobs.len())
            .field("pending_commands", &self.commands.len())
            .finish()
    }
}

impl JobScheduler {
    /// Creates a scheduler backed by `threads` workers; `0` runs every job inline.

    pub fn new(registry: Arc<ComponentRegistry>, threads: usize) -> Result<Self, BuildError> {
        let (pool, runner) = if threads == 0 {
            (None, None)
        } else {
            let mut pool = WorkerPool::new(threads)?;
            let runner = pool.create_task(|params: TaskParams| {
                let task = params
                    .downcast::<ChunkTask>()
                    .map_err(|_| TaskError::BadParams)?;
                Ok(Box::new(execute_chunk_task(*task)) as TaskOutput)
            });
            (Some(pool), Some(runner))
        };

        Ok(Self {
            registry,
            pool,
            runner,
            readers: HashMap::new(),
            last_writer: HashMap::new(),
            job_to_dependees: HashMap::new(),
            jobs: HashMap::new(),
            task_to_job: HashMap::new(),
            failures: HashMap::new(),
            commands: Commands::new(),
            next_job: 0,
        })
    }

    /// Number of worker threads (0 when running inline).
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.threads())
    }

    /// Returns `true` once `job` has finished (or was never tracked).
    pub fn is_complete(&self, job: JobID) -> bool {
        !self.jobs.contains_key(&job)
    }

    /// Number of jobs not yet complete.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    /// Dependencies computed for `job` when it was scheduled.
    ///
    /// Returns `None` once the job has completed.
    pub fn dependencies_of(&self, job: JobID) -> Option<&[JobID]> {
        self.jobs.get(&job).map(|state| state.declared_dependencies.as_slice())
    }

    /// Deferred commands emitted by completed jobs since the last call.
    pub fn take_commands(&mut self) -> Commands {
        std::mem::take(&mut self.commands)
    }

    fn views_for(&self, chunks: Vec<MatchedChunk>, access: &Arc<[Access]>) -> Vec<ChunkView> {
        chunks
            .into_iter()
            .map(|m| {
                ChunkView::new(
                    m.chunk,
                    m.archetype,
                    m.index,
                    m.signature,
                    Arc::clone(access),
                    Arc::clone(&self.registry),
                )
            })
            .collect()
    }

    /// Records `job` in the reader / writer maps and returns its dependencies.
    fn register_dependencies(&mut self, job: JobID, access: &[Access]) -> BTreeSet<JobID> {
        let mut dependencies = BTreeSet::new();
        for entry in access {
            let component = entry.component;
            match entry.mode {
                AccessMode::Read => {
                    if let Some(&writer) = self.last_writer.get(&component) {
                        if self.jobs.contains_key(&writer) {
                            dependencies.insert(writer);
                        }
                    }
                    self.readers.entry(component).or_default().insert(job);
                }
                AccessMode::Write => {
                    if let Some(readers) = self.readers.remove(&component) {
                        dependencies.extend(
                            readers.into_iter().filter(|r| *r != job && self.jobs.contains_key(r)),
                        );
                    }
                    if let Some(&writer) = self.last_writer.get(&component) {
                        if self.jobs.contains_key(&writer) {
                            dependencies.insert(writer);
                        }
                    }
                    self.last_writer.insert(component, job);
                }
            }
        }
        for &dependency in &dependencies {
            self.job_to_dependees.entry(dependency).or_default().insert(job);
        }
        dependencies
    }

    fn create_job(&mut self, access: Arc<[Access]>, payload: Option<Payload>) -> JobID {
        let job = self.next_job;
        self.next_job += 1;

        let waiting_on = self.register_dependencies(job, &access);
        tracing::debug!(job, dependencies = ?waiting_on, "scheduled job");
        self.jobs.insert(
            job,
            JobState {
                access,
                declared_dependencies: waiting_on.iter().copied().collect(),
                waiting_on,
                payload,
                outstanding: 0,
                error: None,
            },
        );
        job
    }

    fn schedule_with(&mut self, store: &EntityStore, query: &SystemQuery, body: JobBody, dispatch: Dispatch) -> JobHandle {
        let chunks = store.matching_chunks(query.id);
        if chunks.is_empty() {
            return JobHandle::completed();
        }
        let access: Arc<[Access]> = normalize_access(&query.access).into();
        let views = self.views_for(chunks, &access);
        let job = self.create_job(access, Some(Payload { views, body, dispatch }));
        if self.jobs.get(&job).is_some_and(|s| s.waiting_on.is_empty()) {
            self.dispatch(job);
        }
        JobHandle::single(job)
    }

    /// Schedules one task covering every chunk matched by `query`.
    ///
    /// `body` runs once per chunk, sequentially, on a single worker.
    pub fn schedule<F>(&mut self, store: &EntityStore, query: &SystemQuery, body: F) -> JobHandle
    where
        F: Fn(&ChunkView, &mut Commands) -> ECSResult<()> + Send + Sync + 'static,
    {
        self.schedule_with(store, query, Arc::new(body), Dispatch::Single)
    }

    /// Schedules one task per matched chunk; the job completes when all do.
    pub fn schedule_parallel<F>(&mut self, store: &EntityStore, query: &SystemQuery, body: F) -> JobHandle
    where
        F: Fn(&ChunkView, &mut Commands) -> ECSResult<()> + Send + Sync + 'static,
    {
        self.schedule_with(store, query, Arc::new(body), Dispatch::PerChunk)
    }

    /// Runs `body` on the calling thread once the job's dependencies have completed.
    ///
    /// Later jobs are ordered after this one exactly as if it had been
    /// scheduled. Commands emitted by `body` are queued for the next flush.

    pub fn run<F>(&mut self, store: &EntityStore, query: &SystemQuery, mut body: F) -> ECSResult<()>
    where
        F: FnMut(&ChunkView, &mut Commands) -> ECSResult<()>,
    {
        let chunks = store.matching_chunks(query.id);
        if chunks.is_empty() {
            return Ok(());
        }
        let access: Arc<[Access]> = normalize_access(&query.access).into();
        let views = self.views_for(chunks, &access);
        let job = self.create_job(access, None);

        while self.jobs.get(&job).is_some_and(|s| !s.waiting_on.is_empty()) {
            if !self.pump_one() {
                panic!("job graph stalled while job {job} waited for its dependencies");
            }
        }

        let mut commands = Commands::new();
        let mut result = Ok(());
        for view in &views {
            result = body(view, &mut commands);
            if result.is_err() {
                break;
            }
        }
        drop(views);
        self.commands.append(&mut commands);
        self.mark_as_complete(job);
        result
    }

    fn dispatch(&mut self, job: JobID) {
        let Some(payload) = self.jobs.get_mut(&job).and_then(|s| s.payload.take()) else { return };
        let Payload { views, body, dispatch } = payload;

        let (Some(pool), Some(runner)) = (self.pool.as_mut(), self.runner) else {
            let outcome = execute_chunk_task(ChunkTask { views, body });
            self.absorb_outcome(job, outcome);
            self.mark_as_complete(job);
            return;
        };

        let tasks: Vec<ChunkTask> = match dispatch {
            Dispatch::Single => vec![ChunkTask { views, body }],
            Dispatch::PerChunk => views
                .into_iter()
                .map(|view| ChunkTask { views: vec![view], body: Arc::clone(&body) })
                .collect(),
        };
        let count = tasks.len();
        for task in tasks {
            let task_id = runner.run(pool, task);
            self.task_to_job.insert(task_id, job);
        }
        if let Some(state) = self.jobs.get_mut(&job) {
            state.outstanding = count;
        }
        tracing::debug!(job, tasks = count, "dispatched job");
    }

    fn absorb_outcome(&mut self, job: JobID, mut outcome: ChunkTaskOutcome) {
        self.commands.append(&mut outcome.commands);
        if let Some(message) = outcome.error {
            if let Some(state) = self.jobs.get_mut(&job) {
                state.error.get_or_insert(ExecutionError::JobFailed { job, message });
            }
        }
    }

    /// Handles one worker response. Returns `false` if nothing was pending.
    fn pump_one(&mut self) -> bool {
        let Some(pool) = self.pool.as_mut() else { return false };
        let Some((task, result)) = pool.next_finished() else { return false };
        let Some(job) = self.task_to_job.remove(&task) else { return true };

        match result {
            Ok(output) => match output.downcast::<ChunkTaskOutcome>() {
                Ok(outcome) => self.absorb_outcome(job, *outcome),
                Err(_) => self.record_task_error(job, task, TaskError::BadResult),
            },
            Err(error) => self.record_task_error(job, task, error),
        }

        let finished = match self.jobs.get_mut(&job) {
            Some(state) => {
                state.outstanding = state.outstanding.saturating_sub(1);
                state.outstanding == 0
            }
            None => false,
        };
        if finished {
            self.mark_as_complete(job);
        }
        true
    }

    fn record_task_error(&mut self, job: JobID, task: TaskID, source: TaskError) {
        if let Some(state) = self.jobs.get_mut(&job) {
            state.error.get_or_insert(ExecutionError::Task { task, source });
        }
    }

    /// Retires `job` and dispatches every dependee that became ready.
    fn mark_as_complete(&mut self, job: JobID) {
        let Some(state) = self.jobs.remove(&job) else { return };

        for entry in state.access.iter() {
            if let Some(readers) = self.readers.get_mut(&entry.component) {
                readers.remove(&job);
                if readers.is_empty() {
                    self.readers.remove(&entry.component);
                }
            }
            if self.last_writer.get(&entry.component) == Some(&job) {
                self.last_writer.remove(&entry.component);
            }
        }
        if let Some(error) = state.error {
            self.failures.insert(job, error);
        }

        let dependees = self.job_to_dependees.remove(&job).unwrap_or_default();
        for dependee in dependees {
            let ready = match self.jobs.get_mut(&dependee) {
                Some(dependent) => {
                    dependent.waiting_on.remove(&job);
                    dependent.waiting_on.is_empty()
                }
                None => false,
            };
            if ready {
                self.dispatch(dependee);
            }
        }
    }

    /// Pumps worker responses until none of `jobs` is in flight.
    fn fence(&mut self, jobs: &[JobID]) {
        while jobs.iter().any(|job| self.jobs.contains_key(job)) {
            if !self.pump_one() {
                panic!("job graph stalled: {} jobs incomplete with no task in flight", self.jobs.len());
            }
        }
    }

    /// Pumps until every job in `jobs` has completed; returns the first failure.
    ///
    /// Failures of the covered jobs are consumed. Other jobs keep theirs.
    pub fn complete_jobs(&mut self, jobs: &[JobID]) -> ECSResult<()> {
        self.fence(jobs);
        let mut first: Option<ECSError> = None;
        for job in jobs {
            if let Some(error) = self.failures.remove(job) {
                first.get_or_insert(error.into());
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Waits for every in-flight job without consuming failures.
    ///
    /// A failed job still reports through its own [`JobHandle`].
    pub fn fence_all(&mut self) {
        let jobs: Vec<JobID> = self.jobs.keys().copied().collect();
        self.fence(&jobs);
    }

    /// Fences every in-flight job and reports the earliest failure not yet
    /// claimed through a handle.
    pub fn complete_all(&mut self) -> ECSResult<()> {
        self.fence_all();
        let mut failures: Vec<(JobID, ExecutionError)> = self.failures.drain().collect();
        failures.sort_by_key(|(job, _)| *job);
        match failures.into_iter().next() {
            Some((_, error)) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Fences every job that may write `component`, and whatever they wait on.
    ///
    /// Failures stay with the jobs' handles.
    pub fn complete_writers_of(&mut self, component: ComponentID) {
        let writers: Vec<JobID> = self
            .jobs
            .iter()
            .filter(|(_, state)| {
                state.access.iter().any(|a| a.component == component && a.mode == AccessMode::Write)
            })
            .map(|(&job, _)| job)
            .collect();
        self.fence(&writers);
    }

    /// Failures recorded for finished jobs whose handles have not claimed them.
    pub fn unclaimed_failures(&self) -> usize {
        self.failures.len()
    }

    /// Drops all bookkeeping and joins the pool. Callers fence first.
    pub fn dispose(&mut self) {
        self.readers.clear();
        self.last_writer.clear();
        self.job_to_dependees.clear();
        self.jobs.clear();
        self.task_to_job.clear();
        self.failures.clear();
        self.runner = None;
        if let Some(pool) = self.pool.take() {
            pool.dispose();
        }
    }
}
