//! A couple of minimal operators used to exercise the core engine end to end in tests
//! and in the `osh` demo binary.
//!
//! The real transform operators (`filter`, `map`, `reduce`, `sort`, `sql`, `ls`, `ps`,
//! `sh`, …) and the command-line grammar that names them are out of scope; these
//! two exist only so the fork/merge/spawn core has something concrete to replicate and
//! tag in a demonstrable pipeline, matching scenarios like (`gen 3 ^ f 'x:
//! x'`).

use super::cloner::{self, CallableCarrier};
use super::error::EngineError;
use super::function::{FunctionStore, FunctionValue, FunctionWire};
use super::operator::{Operator, Receiver};
use super::value::{Tuple, Value};

/// Generates the integers `0..count` as 1-tuples, then completes. A generator (root)
/// operator: it implements `execute`, not `receive`.
pub struct Gen {
    count: i64,
}

impl Gen {
    /// Build a generator that emits `0..count`.
    pub fn new(count: i64) -> Gen {
        Gen { count }
    }
}

impl Operator for Gen {
    fn name(&self) -> &str {
        "gen"
    }

    fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        for i in 0..self.count {
            out.receive(Tuple::from_scalar(i))?;
        }
        out.receive_complete()
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Gen { count: self.count })
    }

    fn to_wire(&self) -> Option<super::wire::OperatorWire> {
        Some(super::wire::OperatorWire::Gen { count: self.count })
    }
}

/// Applies a function value to every received tuple, emitting its result. A transformer:
/// one input tuple produces exactly one output value, wrapped to a tuple if it is a
/// scalar result (per the invariant that a scalar emission and a 1-tuple emission of the
/// same value are indistinguishable downstream).
pub struct Apply {
    function: FunctionValue,
}

impl Apply {
    /// Build an apply operator around `function`.
    pub fn new(function: FunctionValue) -> Apply {
        Apply { function }
    }
}

impl Operator for Apply {
    fn name(&self) -> &str {
        "f"
    }

    fn receive(&mut self, tuple: Tuple, out: &mut dyn Receiver) -> Result<(), EngineError> {
        let result = self.function.call_tuple(&tuple)?;
        let emitted = match result {
            Value::Tuple(items) => Tuple::new(items),
            scalar => Tuple::from_scalar(scalar),
        };
        out.receive(emitted)
    }

    fn receive_complete(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        out.receive_complete()
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Apply { function: self.function.clone() })
    }

    fn as_callable_carrier(&mut self) -> Option<&mut dyn CallableCarrier> {
        Some(self)
    }

    fn to_wire(&self) -> Option<super::wire::OperatorWire> {
        let function_source = self.function.source_text()?.to_string();
        Some(super::wire::OperatorWire::Apply { function_source })
    }
}

impl CallableCarrier for Apply {
    fn substitute_callables_with_handles(&mut self, store: &mut FunctionStore) -> Option<FunctionWire> {
        let wire = store.register(&self.function)?;
        self.function = FunctionValue::handle_placeholder(wire.handle);
        Some(wire)
    }

    fn restore_callables(&mut self, wire: &FunctionWire, store: &FunctionStore) -> Result<(), EngineError> {
        debug_assert_eq!(self.function.as_handle(), Some(wire.handle));
        self.function = cloner::resolve(wire, store)?;
        Ok(())
    }
}

/// Re-emits every tuple it receives unchanged, replaying a fixed input sequence as a
/// generator. Used to give a forked sub-pipeline something to receive from in tests
/// without a real upstream operator.
pub struct Replay {
    items: Vec<Tuple>,
}

impl Replay {
    /// Build a replay generator over a fixed sequence of tuples.
    pub fn new(items: Vec<Tuple>) -> Replay {
        Replay { items }
    }
}

impl Operator for Replay {
    fn name(&self) -> &str {
        "replay"
    }

    fn execute(&mut self, out: &mut dyn Receiver) -> Result<(), EngineError> {
        for item in self.items.drain(..) {
            out.receive(item)?;
        }
        out.receive_complete()
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Replay { items: self.items.clone() })
    }

    fn to_wire(&self) -> Option<super::wire::OperatorWire> {
        Some(super::wire::OperatorWire::Replay { items: self.items.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::operator::CollectingReceiver;

    #[test]
    fn gen_emits_the_half_open_range_and_completes() {
        let mut gen = Gen::new(3);
        let mut out = CollectingReceiver::default();
        gen.execute(&mut out).unwrap();
        assert_eq!(out.collected, vec![Tuple::from_scalar(0i64), Tuple::from_scalar(1i64), Tuple::from_scalar(2i64)]);
        assert!(out.completed);
    }

    #[test]
    fn apply_wraps_a_scalar_result_as_a_one_tuple() {
        let mut apply = Apply::new(FunctionValue::parse("x: x + 1").unwrap());
        let mut out = CollectingReceiver::default();
        apply.receive(Tuple::from_scalar(4i64), &mut out).unwrap();
        assert_eq!(out.collected, vec![Tuple::from_scalar(5i64)]);
    }

    #[test]
    fn apply_passes_through_a_tuple_result_unwrapped() {
        let mut apply = Apply::new(FunctionValue::parse("x: (x, x * 10)").unwrap());
        let mut out = CollectingReceiver::default();
        apply.receive(Tuple::from_scalar(2i64), &mut out).unwrap();
        assert_eq!(out.collected, vec![Tuple::new(vec![Value::Int(2), Value::Int(20)])]);
    }

    #[test]
    fn replay_re_emits_its_fixed_sequence_once() {
        let items = vec![Tuple::from_scalar(7i64), Tuple::from_scalar(8i64)];
        let mut replay = Replay::new(items.clone());
        let mut out = CollectingReceiver::default();
        replay.execute(&mut out).unwrap();
        assert_eq!(out.collected, items);
        assert!(out.completed);
    }
}

