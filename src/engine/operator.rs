//! The operator/pipeline object model: push-style streaming, wiring, and the shared
//! command state slot fork/merge use to coordinate across worker clones.
//!
//! The source models "receiver" as a field every operator holds (a pointer to the next
//! operator, or the pipeline's external receiver). Rust's ownership rules make that
//! layout awkward for a tree of boxed trait objects that must also be split apart and
//! moved onto worker threads, so this port represents the same invariant structurally
//! instead: [`ChainReceiver`] is built fresh for each top-level `execute`/`receive` call
//! and recursively borrows the remaining operator slice plus the pipeline's terminal
//! receiver. The observable behavior — "an operator's receiver is either the next
//! operator or the pipeline's terminal receiver, never both" — is unchanged; only the
//! representation moved from a stored pointer to a transient borrow.

use std::any::Any;
use std::sync::Arc;

use super::config::Config;
use super::error::EngineError;
use super::identity::WorkerIdentity;
use super::value::Tuple;

/// Everything downstream of an operator: "receive a tuple" and "receive completion".
pub trait Receiver {
    /// Accept one tuple.
    fn receive(&mut self, tuple: Tuple) -> Result<(), EngineError>;
    /// Signal that no more tuples will arrive. Idempotent per chain: a second call is a
    /// no-op left to the receiver's own discretion (operators that forward downstream
    /// exactly once naturally satisfy this).
    fn receive_complete(&mut self) -> Result<(), EngineError>;
}

/// Context available to an operator at `setup` time: its worker identity (absent for the
/// template pipeline's pre-fork setup call, present once per cloned worker pipeline) and
/// the configuration namespace.
#[derive(Clone)]
pub struct OperatorContext {
    /// The pipeline's attached thread identity, if this setup call follows a fork clone.
    pub identity: Option<WorkerIdentity>,
    /// Shared configuration namespace.
    pub config: Arc<Config>,
}

/// A unit of work in the streaming graph.
///
/// An operator is either a **generator** (implements `execute`, produces output with no
/// input) or a **transformer** (implements `receive`, produces output only while
/// receiving). `setup` may run twice per the design: once on the fork template to create
/// shared state, once per cloned worker pipeline; implementations must be idempotent with
/// respect to shared-state creation (the default `create_shared_state`/`set_shared_state`
/// pair already satisfies this by doing nothing unless overridden).
pub trait Operator: Send {
    /// Name derived from the operator's type, used in diagnostics and error envelopes.
    fn name(&self) -> &str;

    /// Whether this operator may be shipped to a remote host. A pipeline is `run_local`
    /// iff every operator in it is.
    fn run_local(&self) -> bool {
        true
    }

    /// One-time preparation; see the idempotence note above.
    fn setup(&mut self, _ctx: &OperatorContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Accept a tuple from upstream, emitting zero or more tuples to `out`.
    fn receive(&mut self, tuple: Tuple, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let _ = tuple;
        out.receive_complete()
    }

    /// Forward completion downstream. The default simply forwards; stateful operators
    /// (merge, window-style aggregations) override this to flush first.
    fn receive_complete(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        out.receive_complete()
    }

    /// Produce output with no input (generators and pipeline roots). The default is a
    /// no-op immediately followed by completion, appropriate for transformers that are
    /// never run as a root.
    fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        out.receive_complete()
    }

    /// Called once per operator position on the fork template, before workers are
    /// created, to build the one piece of state every worker's clone of this operator
    /// will share (see merge). Most operators have none.
    fn create_shared_state(&self, _workers: &[WorkerIdentity]) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }

    /// Install shared state produced by `create_shared_state` on a cloned worker's
    /// operator instance.
    fn set_shared_state(&mut self, _state: Arc<dyn Any + Send + Sync>) {}

    /// Deep-copy this operator for a fork worker clone. Rust's `Clone` already makes this
    /// safe to implement directly (unlike the source, nothing here needs serialization to
    /// duplicate a callable in the same process); see [`super::cloner`] for the
    /// handle-substitution dance still performed on top of this, which exists to satisfy
    /// the clone-round-trip invariant and to share code with the remote-shipment path.
    fn box_clone(&self) -> Box<dyn Operator>;

    /// Operators that embed a function value override this to expose it to the cloner.
    /// Most operators have no callables and use the default `None`.
    fn as_callable_carrier(&mut self) -> Option<&mut dyn super::cloner::CallableCarrier> {
        None
    }

    /// This operator's wire form, if it has one. The default `None` marks an operator as
    /// unshippable: a pipeline containing it fails fast ([`super::wire::to_wire`]) rather
    /// than silently dropping state on the way to a remote host.
    fn to_wire(&self) -> Option<super::wire::OperatorWire> {
        None
    }
}

/// A recursive `Receiver` over the remainder of a pipeline's operator slice, terminating
/// in the pipeline's actual external receiver. See the module docs for why this replaces
/// a stored "next" pointer.
pub struct ChainReceiver<'a> {
    ops: &'a mut [Box<dyn Operator>],
    terminal: &'a mut dyn Receiver,
}

impl<'a> Receiver for ChainReceiver<'a> {
    fn receive(&mut self, tuple: Tuple) -> Result<(), EngineError> {
        match self.ops.split_first_mut() {
            None => self.terminal.receive(tuple),
            Some((head, tail)) => {
                let mut next = ChainReceiver { ops: tail, terminal: self.terminal };
                head.receive(tuple, &mut next)
            }
        }
    }

    fn receive_complete(&mut self) -> Result<(), EngineError> {
        match self.ops.split_first_mut() {
            None => self.terminal.receive_complete(),
            Some((head, tail)) => {
                let mut next = ChainReceiver { ops: tail, terminal: self.terminal };
                head.receive_complete(&mut next)
            }
        }
    }
}

/// A no-op terminal receiver, useful for tests and for draining a pipeline whose output
/// is not observed.
pub struct NullReceiver;

impl Receiver for NullReceiver {
    fn receive(&mut self, _tuple: Tuple) -> Result<(), EngineError> {
        Ok(())
    }
    fn receive_complete(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A receiver that collects every tuple it sees, used by tests and the `osh` demo binary.
#[derive(Default)]
pub struct CollectingReceiver {
    /// Tuples received so far, in arrival order.
    pub collected: Vec<Tuple>,
    /// Whether `receive_complete` has been called.
    pub completed: bool,
}

impl Receiver for CollectingReceiver {
    fn receive(&mut self, tuple: Tuple) -> Result<(), EngineError> {
        self.collected.push(tuple);
        Ok(())
    }
    fn receive_complete(&mut self) -> Result<(), EngineError> {
        self.completed = true;
        Ok(())
    }
}

/// An ordered, non-empty sequence of operators. Behaves as an operator itself: `receive`
/// forwards to the head, `execute` runs the head as a root, and `receive_complete`
/// forwards to the head so it can flush before the completion signal reaches whatever is
/// downstream of this pipeline.
pub struct Pipeline {
    name: String,
    operators: Vec<Box<dyn Operator>>,
}

impl Pipeline {
    /// Start an empty, named pipeline. Use [`Self::append`] to populate it; a pipeline
    /// must be non-empty before `setup`/`execute` are called.
    pub fn new(name: impl Into<String>) -> Pipeline {
        Pipeline { name: name.into(), operators: Vec::new() }
    }

    /// Append an operator to the end of the pipeline.
    pub fn append(&mut self, op: Box<dyn Operator>) -> &mut Self {
        self.operators.push(op);
        self
    }

    /// Prepend an operator to the front of the pipeline.
    pub fn prepend(&mut self, op: Box<dyn Operator>) -> &mut Self {
        self.operators.insert(0, op);
        self
    }

    /// The pipeline's name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// True if the pipeline has no operators.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Borrow the operators in order, e.g. for the cloner or for fork's shared-state pass.
    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    /// Mutably borrow the operators in order.
    pub fn operators_mut(&mut self) -> &mut [Box<dyn Operator>] {
        &mut self.operators
    }

    /// A pipeline is `run_local` iff every operator it contains is.
    pub fn run_local(&self) -> bool {
        self.operators.iter().all(|op| op.run_local())
    }

    /// Run `setup` on every operator, in order.
    pub fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
        for op in &mut self.operators {
            op.setup(ctx)?;
        }
        Ok(())
    }

    /// Create shared state for every operator position, to be distributed position-wise
    /// to every worker's clone (see the fork operator).
    pub fn create_shared_state(&self, workers: &[WorkerIdentity]) -> Vec<Option<Arc<dyn Any + Send + Sync>>> {
        self.operators.iter().map(|op| op.create_shared_state(workers)).collect()
    }

    /// Install a previously-created shared-state vector onto this pipeline's operators,
    /// position-wise.
    pub fn install_shared_state(&mut self, state: &[Option<Arc<dyn Any + Send + Sync>>]) {
        for (op, slot) in self.operators.iter_mut().zip(state.iter()) {
            if let Some(s) = slot {
                op.set_shared_state(s.clone());
            }
        }
    }

    /// Run the pipeline as a root: execute the head, chaining through the remaining
    /// operators into `downstream`.
    pub fn execute(&mut self, downstream: &mut dyn Receiver) -> Result<(), EngineError> {
        let (head, tail) = self.operators.split_first_mut().expect("pipeline must be non-empty");
        let mut chain = ChainReceiver { ops: tail, terminal: downstream };
        head.execute(&mut chain)
    }

    /// Feed one tuple into the pipeline's head, chaining through to `downstream`. Used
    /// when this pipeline is embedded inside another (nesting).
    pub fn feed(&mut self, tuple: Tuple, downstream: &mut dyn Receiver) -> Result<(), EngineError> {
        let (head, tail) = self.operators.split_first_mut().expect("pipeline must be non-empty");
        let mut chain = ChainReceiver { ops: tail, terminal: downstream };
        head.receive(tuple, &mut chain)
    }

    /// Forward completion into the pipeline's head.
    pub fn finish(&mut self, downstream: &mut dyn Receiver) -> Result<(), EngineError> {
        let (head, tail) = self.operators.split_first_mut().expect("pipeline must be non-empty");
        let mut chain = ChainReceiver { ops: tail, terminal: downstream };
        head.receive_complete(&mut chain)
    }

    /// Deep-copy this pipeline by cloning every operator. Used directly for pipelines
    /// that contain no function values (nothing to substitute); the fork operator goes
    /// through [`super::cloner::clone_pipeline`] instead so that callables survive.
    pub fn box_clone(&self) -> Pipeline {
        Pipeline {
            name: self.name.clone(),
            operators: self.operators.iter().map(|op| op.box_clone()).collect(),
        }
    }
}

impl Operator for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_local(&self) -> bool {
        Pipeline::run_local(self)
    }

    fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
        Pipeline::setup(self, ctx)
    }

    fn receive(&mut self, tuple: Tuple, out: &mut dyn Receiver) -> Result<(), EngineError> {
        self.feed(tuple, out)
    }

    fn receive_complete(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        self.finish(out)
    }

    fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        Pipeline::execute(self, out)
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Pipeline::box_clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::demo_ops::{Apply, Gen};
    use crate::engine::function::FunctionValue;

    #[test]
    fn identity_pass_through_matches_scenario_one() {
        let mut pipeline = Pipeline::new("gen|f");
        pipeline.append(Box::new(Gen::new(3)));
        pipeline.append(Box::new(Apply::new(FunctionValue::parse("x: x").unwrap())));
        let ctx = OperatorContext { identity: None, config: Arc::new(Config::default()) };
        pipeline.setup(&ctx).unwrap();
        let mut out = CollectingReceiver::default();
        pipeline.execute(&mut out).unwrap();
        assert_eq!(
            out.collected,
            vec![
                Tuple::from_scalar(0i64),
                Tuple::from_scalar(1i64),
                Tuple::from_scalar(2i64),
            ]
        );
        assert!(out.completed);
    }

    #[test]
    fn empty_generator_width_completes_immediately() {
        let mut pipeline = Pipeline::new("gen0");
        pipeline.append(Box::new(Gen::new(0)));
        let ctx = OperatorContext { identity: None, config: Arc::new(Config::default()) };
        pipeline.setup(&ctx).unwrap();
        let mut out = CollectingReceiver::default();
        pipeline.execute(&mut out).unwrap();
        assert!(out.collected.is_empty());
        assert!(out.completed);
    }
}
