//! The fork operator: run N clones of a sub-pipeline on separate OS threads (or, for
//! a cluster `thread_gen`, on separate remote hosts), recombining their tagged output
//! through [`Merge`](super::merge::Merge).
//!
//! Two construction modes cover the two scenarios the literal examples exercise:
//! [`Fork::new`] builds a root/generator fork, where the sub-pipeline itself produces
//! output with no input (e.g. `gen 3`); [`Fork::new_broadcast`] builds a mid-pipeline
//! transformer fork, which buffers every tuple it receives from upstream and replays the
//! whole buffer into each worker once upstream completes. Rust's `Operator` trait gives an
//! instance no generic way to ask "am I the pipeline's root operator", so the mode is
//! chosen once, at construction, rather than detected at run time.

use std::sync::Arc;
use std::thread;

use super::attach_identity::AttachIdentity;
use super::cloner;
use super::config::Config;
use super::demo_ops::Replay;
use super::error::{self, EngineError, HandlerContext};
use super::function::FunctionValue;
use super::identity::{Cluster, WorkerIdentity};
use super::merge::{self, Merge, MergeState};
use super::operator::{NullReceiver, Operator, OperatorContext, Pipeline, Receiver};
use super::remote::Remote;
use super::value::Tuple;

/// How fork resolves the set of workers to run.
#[derive(Debug, Clone)]
pub enum ThreadGen {
    /// A fixed worker count; workers are tagged `WorkerIdentity::Index(0..count)`.
    Count(u32),
    /// A fixed, ordered set of labels; workers are tagged `WorkerIdentity::Label`.
    Labels(Vec<String>),
    /// A configured cluster, optionally filtered by a substring pattern
    /// (`name` or `name:pattern` in the `thread_gen` grammar). Workers are tagged
    /// `WorkerIdentity::Host` and dispatched through [`Remote`].
    Cluster {
        /// Cluster name, resolved against `remote.<name>` in configuration.
        name: String,
        /// Optional substring filter over host name/address.
        pattern: Option<String>,
    },
}

impl ThreadGen {
    fn resolve(&self, config: &Config) -> Result<Vec<WorkerIdentity>, EngineError> {
        match self {
            ThreadGen::Count(n) => Ok((0..*n).map(WorkerIdentity::Index).collect()),
            ThreadGen::Labels(labels) => Ok(labels.iter().cloned().map(WorkerIdentity::Label).collect()),
            ThreadGen::Cluster { name, pattern } => {
                let cluster = Cluster::resolve(config, name)?;
                Ok(cluster.matching(pattern.as_deref()).into_iter().map(WorkerIdentity::Host).collect())
            }
        }
    }
}

/// Marks a worker's merge source done when dropped, regardless of whether its thread
/// closure returned normally, returned an error, or unwound from a panic.
struct MarkSourceDone {
    shared: Arc<MergeState>,
    index: usize,
}

impl Drop for MarkSourceDone {
    fn drop(&mut self) {
        self.shared.mark_source_done(self.index);
    }
}

/// Fan a pipeline out across N workers and merge their tagged output back into one stream.
pub struct Fork {
    thread_gen: ThreadGen,
    sub_pipeline: Pipeline,
    merge_key: Option<FunctionValue>,
    /// `None` in root/generator mode; `Some(buffer)` in broadcast/transformer mode, where
    /// it accumulates every tuple received from upstream until `receive_complete`.
    buffer: Option<Vec<Tuple>>,
    config: Option<Arc<Config>>,
}

impl Fork {
    /// Build a root-mode fork: `sub_pipeline` is itself a generator, run once per worker
    /// with no outside input (the `gen N ^ fork ...` shape).
    pub fn new(thread_gen: ThreadGen, sub_pipeline: Pipeline, merge_key: Option<FunctionValue>) -> Fork {
        Fork { thread_gen, sub_pipeline, merge_key, buffer: None, config: None }
    }

    /// Build a broadcast-mode fork: every tuple received from upstream is replayed into
    /// every worker's clone of `sub_pipeline` once upstream signals completion.
    pub fn new_broadcast(thread_gen: ThreadGen, sub_pipeline: Pipeline, merge_key: Option<FunctionValue>) -> Fork {
        Fork { thread_gen, sub_pipeline, merge_key, buffer: Some(Vec::new()), config: None }
    }

    fn run_workers(&mut self, seed: Option<Vec<Tuple>>, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let config = self
            .config
            .clone()
            .expect("Fork.execute/receive_complete called before setup assigned configuration");
        let identities = self.thread_gen.resolve(&config)?;
        if identities.is_empty() {
            return out.receive_complete();
        }
        let hosts = matches!(identities[0], WorkerIdentity::Host(_));
        if hosts && !self.sub_pipeline.run_local() {
            return Err(EngineError::Usage(format!(
                "fork's sub-pipeline {:?} contains a nested fork or remote operator and cannot be dispatched to a cluster host",
                self.sub_pipeline.name()
            )));
        }
        let remote = hosts;

        let mut template = Pipeline::new(format!("{}-fork", self.sub_pipeline.name()));
        if remote {
            let mut inner = Pipeline::new(self.sub_pipeline.name().to_string());
            if let Some(seed) = &seed {
                inner.append(Box::new(Replay::new(seed.clone())));
            }
            for op in self.sub_pipeline.operators() {
                inner.append(op.box_clone());
            }
            template.append(Box::new(Remote::new(inner)));
        } else {
            if let Some(seed) = &seed {
                template.append(Box::new(Replay::new(seed.clone())));
            }
            for op in self.sub_pipeline.operators() {
                template.append(op.box_clone());
            }
        }
        template.append(Box::new(AttachIdentity::new()));
        template.append(Box::new(Merge::new(self.merge_key.clone())));

        let shared_state = template.create_shared_state(&identities);
        let merge_shared: Arc<MergeState> = shared_state
            .last()
            .cloned()
            .flatten()
            .and_then(|s| s.downcast::<MergeState>().ok())
            .expect("fork template's last operator must be Merge and must produce shared state");

        let mut handles = Vec::with_capacity(identities.len());
        for (index, identity) in identities.iter().enumerate() {
            let mut worker = cloner::clone_pipeline(&mut template)?;
            worker.install_shared_state(&shared_state);
            let ctx = OperatorContext { identity: Some(identity.clone()), config: config.clone() };
            let identity_for_report = identity.clone();
            let merge_for_worker = merge_shared.clone();
            let handle = thread::spawn(move || -> Result<(), EngineError> {
                // Guarantees this worker's merge source is marked done on every exit path -
                // success, a propagated error, or a panic - so a worker that terminates by
                // error can never leave fork's concurrent drain loop waiting forever on a
                // buffer whose `receive_complete` was skipped.
                let _done_guard = MarkSourceDone { shared: merge_for_worker, index };
                worker.setup(&ctx)?;
                let mut sink = NullReceiver;
                worker.execute(&mut sink)
            });
            handles.push((identity_for_report, handle));
        }

        merge::drain(&merge_shared, out)?;

        for (identity, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error::handle_exception(
                        &err,
                        HandlerContext {
                            operator: self.sub_pipeline.name().to_string(),
                            input: None,
                            worker: Some(identity),
                        },
                    )?;
                }
                Err(_) => {
                    error::handle_exception(
                        &EngineError::HandlerFailed(format!("worker {identity} panicked")),
                        HandlerContext {
                            operator: self.sub_pipeline.name().to_string(),
                            input: None,
                            worker: Some(identity),
                        },
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl Operator for Fork {
    fn name(&self) -> &str {
        "fork"
    }

    fn run_local(&self) -> bool {
        // Nesting fork inside a fork-dispatched remote pipeline is not supported (open
        // question, resolved in the design notes): a fork always runs in the process that
        // owns it.
        false
    }

    fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
        self.config = Some(ctx.config.clone());
        Ok(())
    }

    fn receive(&mut self, tuple: Tuple, _out: &mut dyn Receiver) -> Result<(), EngineError> {
        match &mut self.buffer {
            Some(buf) => {
                buf.push(tuple);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn receive_complete(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let seed = self.buffer.take().unwrap_or_default();
        self.run_workers(Some(seed), out)
    }

    fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        self.run_workers(None, out)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Fork {
            thread_gen: self.thread_gen.clone(),
            sub_pipeline: self.sub_pipeline.box_clone(),
            merge_key: self.merge_key.clone(),
            buffer: self.buffer.clone(),
            config: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::engine::demo_ops::{Apply, Gen};
    use crate::engine::operator::CollectingReceiver;
    use crate::engine::value::Value;

    fn ctx() -> OperatorContext {
        OperatorContext { identity: None, config: Arc::new(Config::default()) }
    }

    /// A generator whose sequence depends on the worker index it is set up with: worker 0
    /// emits ascending values (never violates a merge key's ordering check), every other
    /// worker emits a sequence that decreases partway through, tripping
    /// `SourceBuffer::add`'s ordering check inside `Merge::receive`.
    struct OrderViolatingGen {
        identity: Option<WorkerIdentity>,
    }

    impl Operator for OrderViolatingGen {
        fn name(&self) -> &str {
            "order-violating-gen"
        }

        fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
            self.identity = ctx.identity.clone();
            Ok(())
        }

        fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
            let sequence: &[i64] =
                if matches!(self.identity, Some(WorkerIdentity::Index(0))) { &[1, 2, 3] } else { &[3, 1] };
            for v in sequence {
                out.receive(Tuple::from_scalar(*v))?;
            }
            out.receive_complete()
        }

        fn box_clone(&self) -> Box<dyn Operator> {
            Box::new(OrderViolatingGen { identity: self.identity.clone() })
        }
    }

    #[test]
    fn worker_ordering_violation_is_reported_and_the_call_returns() {
        let reports: Arc<Mutex<Vec<(String, Option<WorkerIdentity>)>>> = Arc::new(Mutex::new(Vec::new()));
        let reports_for_handler = reports.clone();
        error::set_exception_handler(move |err, handler_ctx| {
            reports_for_handler.lock().unwrap().push((err.to_string(), handler_ctx.worker.clone()));
        });

        let mut sub = Pipeline::new("order-violating-gen");
        sub.append(Box::new(OrderViolatingGen { identity: None }));
        let key = FunctionValue::parse("t: t").unwrap();
        let mut fork = Fork::new(ThreadGen::Count(2), sub, Some(key));
        fork.setup(&ctx()).unwrap();

        let mut out = CollectingReceiver::default();
        // Must return promptly rather than hang: the failing worker's merge source gets
        // marked done even though its pipeline never reaches `Merge::receive_complete`.
        fork.execute(&mut out).unwrap();
        assert!(out.completed);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1, "expected exactly one reported exception, got {reports:?}");
        assert!(reports[0].0.contains("ordering violation"));
        assert_eq!(reports[0].1, Some(WorkerIdentity::Index(1)));
    }

    #[test]
    fn root_mode_fork_tags_each_worker_and_merges_unordered() {
        let mut sub = Pipeline::new("gen");
        sub.append(Box::new(Gen::new(2)));
        let mut fork = Fork::new(ThreadGen::Count(3), sub, None);
        fork.setup(&ctx()).unwrap();

        let mut out = CollectingReceiver::default();
        fork.execute(&mut out).unwrap();

        assert!(out.completed);
        assert_eq!(out.collected.len(), 6);
        let workers: std::collections::BTreeSet<i64> = out
            .collected
            .iter()
            .map(|t| match &t.elements()[0] {
                Value::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(workers, [0, 1, 2].into_iter().collect());
    }

    #[test]
    fn broadcast_mode_fork_replays_upstream_into_every_worker() {
        let mut sub = Pipeline::new("double");
        sub.append(Box::new(Apply::new(FunctionValue::parse("x: x * 2").unwrap())));
        let mut fork = Fork::new_broadcast(ThreadGen::Labels(vec!["a".into(), "b".into()]), sub, None);
        fork.setup(&ctx()).unwrap();

        let mut sink = NullReceiver;
        fork.receive(Tuple::from_scalar(1i64), &mut sink).unwrap();
        fork.receive(Tuple::from_scalar(2i64), &mut sink).unwrap();

        let mut out = CollectingReceiver::default();
        fork.receive_complete(&mut out).unwrap();

        assert!(out.completed);
        // Each of the 2 workers replays both input tuples, doubled: 4 output tuples total.
        assert_eq!(out.collected.len(), 4);
    }

    #[test]
    fn empty_worker_set_completes_immediately() {
        let mut sub = Pipeline::new("gen");
        sub.append(Box::new(Gen::new(1)));
        let mut fork = Fork::new(ThreadGen::Labels(Vec::new()), sub, None);
        fork.setup(&ctx()).unwrap();
        let mut out = CollectingReceiver::default();
        fork.execute(&mut out).unwrap();
        assert!(out.completed);
        assert!(out.collected.is_empty());
    }
}
