//! The streaming object-pipeline engine: operators, fork/merge fan-out, the subprocess
//! spawn framework, and secure-shell remote dispatch.
//!
//! This module is layered on top of the crate's OS-level process primitives
//! ([`crate::Exec`]/[`crate::Job`]): [`spawn`] wraps them with object-stream framing and a
//! portable completion monitor, and [`remote`] uses `spawn` to ship a pipeline to a
//! cluster host over `ssh`. Everything above `spawn` - the operator/pipeline model,
//! worker identities, cloning, the callable and error taxonomies - has no OS dependency
//! of its own.

pub mod attach_identity;
pub mod binder;
pub mod cloner;
pub mod config;
pub mod demo_ops;
pub mod error;
pub mod fd;
pub mod fork;
pub mod function;
pub mod identity;
pub mod merge;
pub mod operator;
pub mod process_info;
pub mod remote;
pub mod spawn;
pub mod value;
pub mod wire;

pub use attach_identity::AttachIdentity;
pub use binder::{ArgBinder, BoundArg, FlagSpec};
pub use config::Config;
pub use demo_ops::{Apply, Gen, Replay};
pub use error::{EngineError, HandlerContext, PickleableException};
pub use fd::FileEntry;
pub use fork::{Fork, ThreadGen};
pub use function::FunctionValue;
pub use identity::{Cluster, HostDescriptor, WorkerIdentity};
pub use merge::Merge;
pub use operator::{ChainReceiver, CollectingReceiver, NullReceiver, Operator, OperatorContext, Pipeline, Receiver};
pub use process_info::ProcessInfo;
pub use remote::Remote;
pub use value::{Tuple, Value};
pub use wire::{OperatorWire, PipelineWire, RemoteFrame};
