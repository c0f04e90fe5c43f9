//! The operator fork appends to every worker's cloned sub-pipeline, tagging each emitted
//! tuple with the worker's identity.

use super::error::EngineError;
use super::identity::WorkerIdentity;
use super::operator::{Operator, OperatorContext, Receiver};
use super::value::Tuple;

/// Prepends the worker's identity to every tuple it receives. The identity is captured
/// at `setup` time from the [`OperatorContext`] that fork's per-clone setup call
/// supplies; it is absent (and this operator is inert) during the template's pre-fork
/// setup pass.
pub struct AttachIdentity {
    identity: Option<WorkerIdentity>,
}

impl AttachIdentity {
    /// Construct an unattached instance; `setup` fills in the identity.
    pub fn new() -> AttachIdentity {
        AttachIdentity { identity: None }
    }
}

impl Default for AttachIdentity {
    fn default() -> Self {
        AttachIdentity::new()
    }
}

impl Operator for AttachIdentity {
    fn name(&self) -> &str {
        "attach-identity"
    }

    fn run_local(&self) -> bool {
        true
    }

    fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
        self.identity = ctx.identity.clone();
        Ok(())
    }

    fn receive(&mut self, tuple: Tuple, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let identity = self
            .identity
            .clone()
            .expect("AttachIdentity.receive called before setup assigned a worker identity");
        out.receive(tuple.with_prefix(identity.into()))
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(AttachIdentity { identity: self.identity.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::Config;
    use crate::engine::operator::CollectingReceiver;
    use crate::engine::value::Value;
    use std::sync::Arc;

    #[test]
    fn prepends_identity() {
        let mut op = AttachIdentity::new();
        let ctx = OperatorContext { identity: Some(WorkerIdentity::Index(2)), config: Arc::new(Config::default()) };
        op.setup(&ctx).unwrap();
        let mut out = CollectingReceiver::default();
        op.receive(Tuple::from_scalar(5i64), &mut out).unwrap();
        assert_eq!(out.collected[0].elements(), &[Value::Int(2), Value::Int(5)]);
    }
}
