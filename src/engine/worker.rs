//! Fixed-size worker thread pool.
//!
//! ## Design
//! - `N` OS threads named `ecs-worker-{i}` are spawned at construction.
//! - Each worker owns a request channel; all workers share one response
//!   channel back to the orchestrating thread.
//! - Entry points are registered with [`WorkerPool::create_task`] and looked
//!   up by [`TaskTag`] on the worker. Only data and a tag cross the channel.
//! - The orchestrator keeps a stack of idle workers and a FIFO backlog.
//!   Handling a response marks its worker idle and drains the backlog; that
//!   is the only dispatch point, and there is no work stealing.
//!
//! ## Wire protocol
//! ```text
//! request  { id: TaskID, tag: TaskTag, params: Box<dyn Any + Send> }
//! response { id: TaskID, result: Ok(Box<dyn Any + Send>) | Err(TaskError) }
//! ```
//!
//! ## Failure isolation
//! A panic inside a task is caught on the worker and reported as
//! [`TaskError::Panicked`] for that task only. The worker keeps serving.
//!
//! ## Ownership
//! A task's parameters are consumed by the entry point and dropped on the
//! worker before the response is sent, so any `Arc` they carry has been
//! released by the time the orchestrator observes completion.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use crate::engine::error::{BuildError, TaskError};
use crate::engine::types::{TaskID, TaskTag};


/// Boxed task input.
pub type TaskParams = Box<dyn Any + Send>;
/// Boxed task output.
pub type TaskOutput = Box<dyn Any + Send>;
/// Outcome of one task.
pub type TaskResult = Result<TaskOutput, TaskError>;

type EntryPoint = Arc<dyn Fn(TaskParams) -> TaskResult + Send + Sync>;

struct Request {
    id: TaskID,
    tag: TaskTag,
    params: TaskParams,
}

struct Response {
    worker: usize,
    id: TaskID,
    result: TaskResult,
}

struct Worker {
    requests: Option<Sender<Request>>,
    thread: Option<JoinHandle<()>>,
}

/// Handle to an entry point registered with a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskRunner {
    tag: TaskTag,
}

impl TaskRunner {
    #[inline]
    pub fn tag(&self) -> TaskTag {
        self.tag
    }

    /// Enqueues one invocation and returns its id.
    pub fn run<P: Any + Send>(&self, pool: &mut WorkerPool, params: P) -> TaskID {
        pool.submit(self.tag, Box::new(params))
    }
}

/// Thread pool driven from a single orchestrating thread.

pub struct WorkerPool {
    workers: Vec<Worker>,
    responses: Receiver<Response>,
    entry_points: Arc<RwLock<Vec<EntryPoint>>>,
    idle: Vec<usize>,
    backlog: VecDeque<Request>,
    pending: HashSet<TaskID>,
    results: HashMap<TaskID, TaskResult>,
    finished: VecDeque<TaskID>,
    next_id: TaskID,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .field("idle", &self.idle.len())
            .field("backlog", &self.backlog.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `threads` workers.
    ///
    /// ## Errors
    /// `InvalidConfig` for zero threads, `ThreadSpawn` if the OS refuses a thread.

    pub fn new(threads: usize) -> Result<Self, BuildError> {
        if threads == 0 {
            return Err(BuildError::InvalidConfig("worker pool needs at least one thread".into()));
        }

        let (response_tx, responses) = crossbeam_channel::unbounded::<Response>();
        let entry_points: Arc<RwLock<Vec<EntryPoint>>> = Arc::new(RwLock::new(Vec::new()));
        let mut workers = Vec::with_capacity(threads);

        for index in 0..threads {
            let (request_tx, request_rx) = crossbeam_channel::unbounded::<Request>();
            let response_tx = response_tx.clone();
            let entry_points = Arc::clone(&entry_points);
            let thread = thread::Builder::new()
                .name(format!("ecs-worker-{index}"))
                .spawn(move || worker_loop(index, request_rx, response_tx, entry_points))
                .map_err(|e| BuildError::ThreadSpawn(e.to_string()))?;
            workers.push(Worker { requests: Some(request_tx), thread: Some(thread) });
        }

        tracing::debug!(threads, "worker pool started");
        Ok(Self {
            workers,
            responses,
            entry_points,
            idle: (0..threads).rev().collect(),
            backlog: VecDeque::new(),
            pending: HashSet::new(),
            results: HashMap::new(),
            finished: VecDeque::new(),
            next_id: 0,
        })
    }

    /// Number of worker threads.
    #[inline]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Registers an entry point and returns a runner bound to it.
    pub fn create_task<F>(&mut self, entry: F) -> TaskRunner
    where
        F: Fn(TaskParams) -> TaskResult + Send + Sync + 'static,
    {
        let mut entry_points = self.entry_points.write();
        let tag = entry_points.len() as TaskTag;
        entry_points.push(Arc::new(entry));
        TaskRunner { tag }
    }

    /// Registers a typed entry point. Parameters of the wrong type fail the
    /// task with [`TaskError::BadParams`].
    pub fn create_typed_task<P, R, F>(&mut self, entry: F) -> TaskRunner
    where
        P: Any + Send,
        R: Any + Send,
        F: Fn(P) -> R + Send + Sync + 'static,
    {
        self.create_task(move |params: TaskParams| {
            let params = params.downcast::<P>().map_err(|_| TaskError::BadParams)?;
            Ok(Box::new(entry(*params)) as TaskOutput)
        })
    }

    /// Enqueues a request for entry point `tag`.
    pub fn submit(&mut self, tag: TaskTag, params: TaskParams) -> TaskID {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id);
        self.backlog.push_back(Request { id, tag, params });
        self.drain_backlog();
        id
    }

    fn drain_backlog(&mut self) {
        while !self.backlog.is_empty() {
            let Some(worker) = self.idle.pop() else { break };
            let Some(request) = self.backlog.pop_front() else { break };
            let id = request.id;
            let sent = self.workers[worker]
                .requests
                .as_ref()
                .map(|tx| tx.send(request).is_ok())
                .unwrap_or(false);
            if sent {
                tracing::trace!(task = id, worker, "dispatched task");
            } else {
                self.complete(id, Err(TaskError::Disconnected));
            }
        }
    }

    fn complete(&mut self, id: TaskID, result: TaskResult) {
        if let Err(error) = &result {
            tracing::error!(task = id, %error, "task failed");
        }
        self.pending.remove(&id);
        self.results.insert(id, result);
        self.finished.push_back(id);
    }

    /// Handles one response. Returns `false` if none could be received.
    fn pump(&mut self, block: bool) -> bool {
        let response = if block { self.responses.recv().ok() } else { self.responses.try_recv().ok() };
        let Some(Response { worker, id, result }) = response else { return false };
        self.idle.push(worker);
        self.complete(id, result);
        self.drain_backlog();
        true
    }

    /// Returns `true` if `id` was submitted and has not produced a result yet.
    #[inline]
    pub fn is_pending(&self, id: TaskID) -> bool {
        self.pending.contains(&id)
    }

    /// Number of submitted tasks without a result.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Blocks until task `id` finishes and takes its result.
    ///
    /// Returns `Disconnected` for an id that is neither pending nor finished.
    pub fn wait(&mut self, id: TaskID) -> TaskResult {
        loop {
            if let Some(result) = self.take(id) {
                return result;
            }
            if !self.pending.contains(&id) || !self.pump(true) {
                return Err(TaskError::Disconnected);
            }
        }
    }

    /// Takes the result of task `id` if it has already finished.
    pub fn try_take(&mut self, id: TaskID) -> Option<TaskResult> {
        while self.pump(false) {}
        self.take(id)
    }

    fn take(&mut self, id: TaskID) -> Option<TaskResult> {
        let result = self.results.remove(&id)?;
        self.finished.retain(|&finished| finished != id);
        Some(result)
    }

    /// Blocks for the next finished task, in completion order.
    ///
    /// Returns `None` once nothing is pending and every result was taken.
    pub fn next_finished(&mut self) -> Option<(TaskID, TaskResult)> {
        loop {
            if let Some(id) = self.finished.pop_front() {
                if let Some(result) = self.results.remove(&id) {
                    return Some((id, result));
                }
                continue;
            }
            if self.pending.is_empty() || !self.pump(true) {
                return None;
            }
        }
    }

    fn shutdown(&mut self) {
        self.backlog.clear();
        for worker in &mut self.workers {
            worker.requests.take();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
        self.idle.clear();
        self.pending.clear();
        self.results.clear();
        self.finished.clear();
    }

    /// Closes the request channels and joins every worker.
    ///
    /// Tasks already running finish first; backlogged tasks are dropped.
    pub fn dispose(mut self) {
        self.shutdown();
        tracing::debug!("worker pool disposed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    requests: Receiver<Request>,
    responses: Sender<Response>,
    entry_points: Arc<RwLock<Vec<EntryPoint>>>,
) {
    while let Ok(Request { id, tag, params }) = requests.recv() {
        let entry = entry_points.read().get(tag as usize).cloned();
        let result = match entry {
            Some(entry) => catch_unwind(AssertUnwindSafe(move || entry(params)))
                .unwrap_or_else(|payload| Err(TaskError::Panicked { message: panic_message(&*payload) })),
            None => {
                drop(params);
                Err(TaskError::UnknownTag(tag))
            }
        };
        if responses.send(Response { worker: index, id, result }).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
