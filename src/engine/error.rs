//! The error taxonomy: usage errors, operator/worker/remote exceptions, the
//! pickleable exception envelope, and the process-wide handler slots.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use super::identity::WorkerIdentity;
use super::value::Tuple;

/// Typed errors raised by the engine's core components.
///
/// This sits above `spawn::SpawnError`/`io::Error` (the subprocess layer, which keeps its
/// own error type close to the syscalls it wraps) and below `anyhow::Error`, which is
/// used only at the outermost CLI boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A flag, arity, or argument-type problem at the command line. Never propagates as
    /// data; the caller must print usage text and exit non-zero.
    #[error("usage error: {0}")]
    Usage(String),

    /// `thread_gen` named a non-cluster source while remote dispatch was required.
    #[error("remote execution requires a cluster, got: {0}")]
    RemoteRequired(String),

    /// A named cluster has no `remote.<name>` configuration.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// A malformed or unreadable configuration source.
    #[error("configuration error: {0}")]
    Config(String),

    /// A malformed function-value text specification.
    #[error("invalid function expression {source:?}: {detail}")]
    FunctionParse {
        /// The offending source text.
        source: String,
        /// Human-readable detail from the expression evaluator.
        detail: String,
    },

    /// A merge source received a tuple whose key is smaller than a previously-received
    /// key on the same source.
    #[error("ordering violation on source {source}: {offending} arrived after {previous}")]
    MergeOrdering {
        /// Index of the offending worker/source.
        source: usize,
        /// String form of the out-of-order tuple.
        offending: String,
        /// String form of the previously-seen tuple that it should not have followed.
        previous: String,
    },

    /// A reconstructed remote exception (see [`PickleableException`]).
    #[error("{type_name}: {message}")]
    Remote {
        /// Qualified type name of the original exception, as reported by the remote side.
        type_name: String,
        /// The original exception's message.
        message: String,
    },

    /// A handler itself raised while processing another error; this is always fatal.
    #[error("fatal: error handler failed: {0}")]
    HandlerFailed(String),

    /// Wraps an I/O failure from the spawn framework.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A serializable description of a failed operator invocation, usable to reconstruct an
/// equivalent exception on the receiving side of a remote dispatch.
///
/// Reconstruction is best-effort: only the handful of type names the engine itself
/// raises are mapped back to a typed [`EngineError`]; anything else falls back to
/// [`EngineError::Remote`], which is still a faithful carrier of type name and message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickleableException {
    /// A human-readable description of the command that failed, e.g. an operator name.
    pub source_description: String,
    /// String form of the input tuple that triggered the failure, if any.
    pub input: Option<String>,
    /// The exception class's qualified type name.
    pub type_name: String,
    /// The constructor arguments used to build the original exception, as strings.
    pub args: Vec<String>,
    /// The exception's message.
    pub message: String,
}

impl PickleableException {
    /// Build an envelope from an [`EngineError`] observed on the remote side.
    pub fn capture(source_description: impl Into<String>, input: Option<&Tuple>, err: &EngineError) -> Self {
        let type_name = match err {
            EngineError::Usage(_) => "UsageError",
            EngineError::RemoteRequired(_) => "RemoteRequiredError",
            EngineError::UnknownCluster(_) => "UnknownClusterError",
            EngineError::Config(_) => "ConfigError",
            EngineError::FunctionParse { .. } => "FunctionParseError",
            EngineError::MergeOrdering { .. } => "PriorityQueueInputOrderingException",
            EngineError::Remote { .. } => "RemoteError",
            EngineError::HandlerFailed(_) => "FatalHandlerError",
            EngineError::Io(_) => "IoError",
        };
        PickleableException {
            source_description: source_description.into(),
            input: input.map(|t| t.to_string()),
            type_name: type_name.to_string(),
            args: vec![err.to_string()],
            message: err.to_string(),
        }
    }

    /// Reconstruct an equivalent [`EngineError`] on the receiving side. Falls back to
    /// [`EngineError::Remote`] when the type name is not one of the engine's own.
    pub fn reconstruct(&self) -> EngineError {
        match self.type_name.as_str() {
            "PriorityQueueInputOrderingException" => EngineError::MergeOrdering {
                source: 0,
                offending: self.input.clone().unwrap_or_default(),
                previous: String::new(),
            },
            _ => EngineError::Remote {
                type_name: self.type_name.clone(),
                message: self.message.clone(),
            },
        }
    }
}

impl fmt::Display for PickleableException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.type_name, self.source_description, self.message)
    }
}

/// The context passed to an exception or stderr handler: which operator (or description)
/// raised it, the input tuple in play, and the worker identity if the failure happened
/// inside a fork worker or remote host.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Description of the operator or command that produced the event.
    pub operator: String,
    /// The input tuple being processed when the event occurred, if any.
    pub input: Option<Tuple>,
    /// The worker (or remote host) identity tagged to the event, if any.
    pub worker: Option<WorkerIdentity>,
}

/// A process-wide exception handler.
pub type ExceptionHandler = dyn Fn(&EngineError, &HandlerContext) + Send + Sync;
/// A process-wide stderr-line handler.
pub type StderrHandler = dyn Fn(&str, &HandlerContext) + Send + Sync;

fn default_exception_handler(err: &EngineError, ctx: &HandlerContext) {
    error!(operator = %ctx.operator, worker = ?ctx.worker, "{err}");
}

fn default_stderr_handler(line: &str, ctx: &HandlerContext) {
    warn!(operator = %ctx.operator, worker = ?ctx.worker, "{line}");
}

static EXCEPTION_HANDLER: OnceLock<RwLock<Arc<ExceptionHandler>>> = OnceLock::new();
static STDERR_HANDLER: OnceLock<RwLock<Arc<StderrHandler>>> = OnceLock::new();

fn exception_slot() -> &'static RwLock<Arc<ExceptionHandler>> {
    EXCEPTION_HANDLER.get_or_init(|| RwLock::new(Arc::new(default_exception_handler)))
}

fn stderr_slot() -> &'static RwLock<Arc<StderrHandler>> {
    STDERR_HANDLER.get_or_init(|| RwLock::new(Arc::new(default_stderr_handler)))
}

/// Invoke the current process-wide exception handler.
///
/// A panic from the configured handler is itself fatal: it is swallowed here only to the
/// extent of converting it into a terse [`EngineError::HandlerFailed`], which callers are
/// expected to propagate and unwind the command with.
pub fn handle_exception(err: &EngineError, ctx: HandlerContext) -> Result<(), EngineError> {
    let handler = exception_slot().read().unwrap().clone();
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(err, &ctx))) {
        Ok(()) => Ok(()),
        Err(_) => Err(EngineError::HandlerFailed(format!(
            "exception handler panicked while handling {err}"
        ))),
    }
}

/// Invoke the current process-wide stderr-line handler.
pub fn handle_stderr_line(line: &str, ctx: HandlerContext) -> Result<(), EngineError> {
    let handler = stderr_slot().read().unwrap().clone();
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(line, &ctx))) {
        Ok(()) => Ok(()),
        Err(_) => Err(EngineError::HandlerFailed(format!(
            "stderr handler panicked while handling line {line:?}"
        ))),
    }
}

/// Replace the process-wide exception handler.
pub fn set_exception_handler(handler: impl Fn(&EngineError, &HandlerContext) + Send + Sync + 'static) {
    *exception_slot().write().unwrap() = Arc::new(handler);
}

/// Replace the process-wide stderr handler.
pub fn set_stderr_handler(handler: impl Fn(&str, &HandlerContext) + Send + Sync + 'static) {
    *stderr_slot().write().unwrap() = Arc::new(handler);
}

/// Swap both handlers for silent no-ops, used by the interrupt handler during cancellation
/// so that the flood of "broken pipe" style errors produced by killing every
/// subprocess at once does not spam the terminal.
pub fn silence_handlers() {
    set_exception_handler(|_, _| {});
    set_stderr_handler(|_, _| {});
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_known_type() {
        let err = EngineError::MergeOrdering {
            source: 1,
            offending: "(1,)".into(),
            previous: "(3,)".into(),
        };
        let envelope = PickleableException::capture("merge", None, &err);
        let reconstructed = envelope.reconstruct();
        assert!(matches!(reconstructed, EngineError::MergeOrdering { .. }));
    }

    #[test]
    fn unknown_type_falls_back_to_remote() {
        let envelope = PickleableException {
            source_description: "remote op".into(),
            input: None,
            type_name: "ZeroDivisionError".into(),
            args: vec![],
            message: "division by zero".into(),
        };
        match envelope.reconstruct() {
            EngineError::Remote { type_name, message } => {
                assert_eq!(type_name, "ZeroDivisionError");
                assert_eq!(message, "division by zero");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
