//! Typed errors for the library layers.
//!
//! The command line and session boundary wrap these in `anyhow` with context.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::EntityHandle;

/// Errors raised by the instruction program model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Unknown mnemonic while reading a module image.
    #[error("unknown opcode mnemonic {0:?}")]
    UnknownOpCode(String),

    /// A module image could not be read from disk.
    #[error("failed to read module image {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A module image could not be written to disk.
    #[error("failed to write module image {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A module image is not valid JSON for the module schema.
    #[error("malformed module image: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Evaluation-stack analysis failed for an instruction.
    #[error("stack error at instruction {index}: {reason}")]
    Stack { index: usize, reason: String },

    /// The reference evaluator hit a fault (an exception, in program terms).
    #[error("evaluation of {method} failed: {reason}")]
    Eval { method: String, reason: String },

    /// The reference evaluator ran out of steps; treated like a hang.
    #[error("evaluation exceeded {0} steps")]
    StepLimit(u64),
}

/// Errors raised while applying or reverting a mutation.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("mutation is already applied")]
    AlreadyApplied,

    #[error("mutation is not applied")]
    NotApplied,

    #[error("entity {0} not found in module")]
    EntityNotFound(EntityHandle),

    #[error("method {0} has no body")]
    MissingBody(EntityHandle),

    #[error("instruction {index} of {entity} does not match the analyzed instruction")]
    InstructionMismatch { entity: EntityHandle, index: usize },

    /// The edit point uses a pattern the mutation cannot rewrite safely.
    #[error("unsupported pattern in {entity} at instruction {index}: {reason}")]
    Unsupported {
        entity: EntityHandle,
        index: usize,
        reason: String,
    },
}

/// Errors raised while reading or writing coverage snapshots and result artifacts.
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt binary artifact: {0}")]
    Corrupt(#[from] bincode::Error),

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

/// Errors raised by a test host invocation.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to start test host `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for test host: {0}")]
    Wait(#[source] std::io::Error),

    /// The host exited but left no usable result artifact behind.
    #[error("test host produced no usable result artifact at {path:?}: {reason}")]
    MissingArtifact { path: PathBuf, reason: String },

    #[error("coverage run failed with exit code {code:?}: {stderr}")]
    CoverageRun { code: Option<i32>, stderr: String },

    #[error(transparent)]
    Coverage(#[from] CoverageError),
}

/// Session-wide conditions that abort a mutation session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "found 0 test coverage entries; either the tests do not exercise the target modules \
         or the test host is not instrumented (check that it writes IL_MUTANT_COVERAGE)"
    )]
    NoCoverage,

    #[error("coverage pass failed: {0}. Make sure every test passes before mutation testing")]
    CoverageFailed(#[source] HostError),

    #[error("module {path:?} could not be loaded from the project: {source}. Check the --module paths")]
    ModuleLoad {
        path: PathBuf,
        #[source]
        source: ModelError,
    },

    #[error("failed to duplicate the project for parallel runs: {0}")]
    Duplication(#[source] std::io::Error),
}

/// Errors that end one mutation test run; the session contains them.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no module image for assembly {0:?} in the project copy")]
    UnknownAssembly(String),

    #[error(transparent)]
    Image(#[from] ModelError),

    #[error(transparent)]
    Host(#[from] HostError),
}
