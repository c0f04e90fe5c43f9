//! Pipeline cloning with function-handle substitution.
//!
//! In the source, a direct deep-copy of a pipeline fails because it contains callables
//! that cannot be pickled; the fix is to walk the pipeline swapping every callable for an
//! integer handle, deep-copy the now-serializable structure, then walk both the original
//! and the copy restoring the real callables from the handle table.
//!
//! Rust's `Clone` makes an in-process deep copy of a callable (a [`FunctionValue`]) safe
//! on its own — there is no serialization step to fail. This module still performs the
//! substitute/copy/restore dance on top of `Operator::box_clone`, for two reasons: it is
//! the same code path the remote operator uses to build a pipeline's wire form (where the
//! handle *is* load-bearing, since a native callable genuinely cannot cross a process
//! boundary), and it is what the clone round-trip tests exercise.

use super::error::EngineError;
use super::function::{FunctionStore, FunctionValue, FunctionWire};
use super::operator::Pipeline;

/// Implemented by operators that embed a [`FunctionValue`], so the cloner can find and
/// substitute it without knowing the operator's concrete type.
pub trait CallableCarrier {
    /// Replace this operator's callable with a handle registered in `store`, returning
    /// the wire form to restore later. Returns `None` if the callable is already a
    /// placeholder (defensive; should not happen in practice).
    fn substitute_callables_with_handles(&mut self, store: &mut FunctionStore) -> Option<FunctionWire>;

    /// Reverse of `substitute_callables_with_handles`: resolve the handle back to a real
    /// callable, either from `store` (same-process clone) or by re-parsing the wire's
    /// source text (used identically on the remote side, which has no access to `store`).
    fn restore_callables(&mut self, wire: &FunctionWire, store: &FunctionStore) -> Result<(), EngineError>;
}

/// Deep-clone `template` into a fresh [`Pipeline`] for one fork worker, round-tripping
/// every embedded callable through a handle so that, after this call, neither `template`
/// nor the returned clone contains a dangling handle.
pub fn clone_pipeline(template: &mut Pipeline) -> Result<Pipeline, EngineError> {
    let mut store = FunctionStore::new();
    let wires: Vec<Option<FunctionWire>> = template
        .operators_mut()
        .iter_mut()
        .map(|op| op.as_callable_carrier().and_then(|c| c.substitute_callables_with_handles(&mut store)))
        .collect();

    let mut copy = template.box_clone();

    restore_all(template, &wires, &store)?;
    restore_all(&mut copy, &wires, &store)?;

    Ok(copy)
}

fn restore_all(pipeline: &mut Pipeline, wires: &[Option<FunctionWire>], store: &FunctionStore) -> Result<(), EngineError> {
    for (op, wire) in pipeline.operators_mut().iter_mut().zip(wires.iter()) {
        if let (Some(carrier), Some(wire)) = (op.as_callable_carrier(), wire) {
            carrier.restore_callables(wire, store)?;
        }
    }
    Ok(())
}

/// Resolve a [`FunctionValue`] that may currently be an unresolved handle placeholder,
/// preferring the local store and falling back to re-parsing the wire's textual source.
/// Shared by every `CallableCarrier::restore_callables` implementation.
pub fn resolve(wire: &FunctionWire, store: &FunctionStore) -> Result<FunctionValue, EngineError> {
    match store.resolve(wire.handle) {
        Some(f) => Ok(f),
        None => FunctionStore::resolve_wire(wire),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::demo_ops::Apply;
    use crate::engine::operator::{CollectingReceiver, OperatorContext, Receiver};
    use crate::engine::value::Tuple;
    use std::sync::Arc;

    #[test]
    fn clone_round_trips_callable() {
        let mut template = Pipeline::new("apply");
        template.append(Box::new(Apply::new(FunctionValue::parse("x: x + 1").unwrap())));

        let mut clone = clone_pipeline(&mut template).expect("clone succeeds");

        let ctx = OperatorContext { identity: None, config: Arc::new(super::super::config::Config::default()) };
        template.setup(&ctx).unwrap();
        clone.setup(&ctx).unwrap();

        let mut out = CollectingReceiver::default();
        template.feed(Tuple::from_scalar(1i64), &mut out).unwrap();
        clone.feed(Tuple::from_scalar(1i64), &mut out).unwrap();
        assert_eq!(out.collected, vec![Tuple::from_scalar(2i64), Tuple::from_scalar(2i64)]);
    }
}
