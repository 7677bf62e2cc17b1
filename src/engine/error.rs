//! Error types for the ECS runtime.
//!
//! Each error type models one failure family and carries enough structure to
//! be actionable in logs. Lower-level errors convert into the aggregate
//! [`ECSError`] through `From`, so orchestration code can use `?` throughout.
//!
//! ## Recoverable vs. fatal
//! Only conditions a caller can react to are modelled here: entity capacity
//! exhaustion, invalid access from a job, worker task failure, build and
//! configuration problems. Programmer errors (operating on a dead entity,
//! malformed tags, registering a query outside of a system's init phase)
//! are assertions and panic at the call site.
//!
//! ## Display vs. Debug
//! * `Display` is short and suitable for operator logs.
//! * `Debug` (derived) retains full structure for diagnostics.

use thiserror::Error;

use crate::engine::types::{AccessMode, ComponentID, JobID, TaskID};


/// Returned when the entity table cannot hold another entity.
///
/// Surfaced to the caller of `spawn` / `create_entity`.

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("entity limit reached ({entities_needed} needed; capacity {capacity})")]
pub struct CapacityError {
    /// Total entities the operation attempted to allocate.
    pub entities_needed: u64,

    /// Current capacity limiting the operation.
    pub capacity: u64,
}

/// High-level error for entity creation and structural changes.

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// Entity creation failed due to insufficient capacity.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// A Rust type was used as a component without being registered.
    #[error("component `{name}` is not registered")]
    UnregisteredComponent {
        /// Rust type name of the component.
        name: &'static str,
    },

    /// A component id that the registry never issued.
    #[error("component id {0} is not registered")]
    UnknownComponentId(ComponentID),

    /// An initializer addressed a field the component schema does not declare.
    #[error("component `{component}` has no field `{field}`")]
    UnknownField {
        /// Component name.
        component: &'static str,
        /// Requested field name.
        field: String,
    },

    /// An initializer wrote a field with a value of the wrong type.
    #[error("field `{component}.{field}` is not of type `{provided}`")]
    FieldType {
        /// Component name.
        component: &'static str,
        /// Field name.
        field: String,
        /// Rust type name of the provided value.
        provided: &'static str,
    },

    /// An initializer addressed a component outside the entity's type.
    #[error("component `{component}` is not part of the entity type")]
    MissingComponent {
        /// Component name.
        component: &'static str,
    },

    /// An initializer wrote a value whose byte size does not match the target.
    #[error("size mismatch writing `{component}`: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Component name.
        component: &'static str,
        /// Size declared by the schema.
        expected: usize,
        /// Size of the provided value.
        actual: usize,
    },
}

/// Errors raised while executing jobs and systems.

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A job touched a component it did not declare, or wrote one it only reads.
    #[error("job accessed component `{component}` as {requested:?} without declaring it")]
    UndeclaredAccess {
        /// Component name.
        component: &'static str,
        /// Requested access mode.
        requested: AccessMode,
    },

    /// The chunk does not store a column for the requested component.
    ///
    /// Happens for tags (zero-size) and for `some` filters that did not match.
    #[error("chunk has no column for component `{component}`")]
    MissingColumn {
        /// Component name.
        component: &'static str,
    },

    /// Two overlapping borrows of the same column inside one job.
    #[error("column `{component}` is already borrowed incompatibly")]
    BorrowConflict {
        /// Component name.
        component: &'static str,
    },

    /// A worker task failed.
    #[error("task {task} failed: {source}")]
    Task {
        /// Task identifier.
        task: TaskID,
        /// Failure detail.
        #[source]
        source: TaskError,
    },

    /// A job body returned an error.
    #[error("job {job} failed: {message}")]
    JobFailed {
        /// Job identifier.
        job: JobID,
        /// Rendered error from the job body.
        message: String,
    },
}

/// Failure of a single task on the worker pool.
///
/// Failures are isolated to the task; the pool keeps serving other tasks.

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task panicked on the worker thread.
    #[error("task panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// The worker channel closed before a response arrived.
    #[error("worker disconnected")]
    Disconnected,

    /// No entry point is registered under the requested tag.
    #[error("no task registered under tag {0}")]
    UnknownTag(u32),

    /// The entry point rejected its parameters.
    #[error("task parameters had an unexpected type")]
    BadParams,

    /// The task returned a value of an unexpected type.
    #[error("task result had an unexpected type")]
    BadResult,
}

/// Errors detected while building a world.

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A before/after declaration names a label that does not exist.
    #[error("`{owner}` references unknown label `{label}`")]
    UnknownLabel {
        /// Declaring system or group.
        owner: String,
        /// Missing label.
        label: String,
    },

    /// Explicit before/after declarations form a cycle.
    #[error("ordering cycle in group `{group}` among {members:?}")]
    OrderingCycle {
        /// Group in which the cycle was found.
        group: String,
        /// Members participating in the cycle.
        members: Vec<String>,
    },

    /// Group nesting forms a cycle.
    #[error("group `{0}` is nested inside itself")]
    GroupCycle(String),

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An OS thread could not be spawned for the worker pool.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
}

/// Errors while loading a configuration file.

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`crate::WorldConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Aggregate error type for the runtime.

#[derive(Debug, Error)]
pub enum ECSError {
    /// Entity creation or structural change failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Job or system execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// World build failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Configuration loading failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Application-defined failure raised from a system or job body.
    #[error("{0}")]
    Custom(String),
}

impl ECSError {
    /// Wraps an application-defined message.
    pub fn custom(message: impl Into<String>) -> Self {
        ECSError::Custom(message.into())
    }
}

impl From<CapacityError> for ECSError {
    fn from(e: CapacityError) -> Self {
        ECSError::Spawn(SpawnError::Capacity(e))
    }
}

/// Result alias used throughout the crate.
pub type ECSResult<T> = Result<T, ECSError>;
