//! Serializable IR for the subset of operators that may cross the wire (cloning,
//! remote dispatch, and callable serialization all route through it).
//!
//! Rust trait objects are not generically serializable, so each operator exposes an
//! optional [`Operator::to_wire`] hook instead of deriving `Serialize` on `Box<dyn
//! Operator>` directly. Shipping a sub-pipeline to a cluster host fails fast with a usage
//! error if any operator in it has no wire form - matching the design note that a pipeline
//! destined for remote execution must carry only text-backed, reconstructible state.

use serde::{Deserialize, Serialize};

use super::demo_ops::{Apply, Gen, Replay};
use super::error::EngineError;
use super::function::FunctionValue;
use super::operator::{Operator, Pipeline};
use super::value::{Tuple, Value};

/// The wire form of one operator. Only the demonstration operators (the real
/// transform operators - `filter`, `map`, `sql`, `ls`, `ps`, `sh`, etc. - are external
/// collaborators out of scope for the core) have a case here; a real deployment would
/// extend this enum alongside each new operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorWire {
    /// See [`Gen`].
    Gen {
        /// Count passed to [`Gen::new`].
        count: i64,
    },
    /// See [`Apply`]. Only the textual source crosses the wire (a native callable
    /// cannot cross a process boundary; the binder already refuses to register one).
    Apply {
        /// Textual function specification, re-parsed by [`FunctionValue::parse`] on
        /// the receiving side.
        function_source: String,
    },
    /// See [`Replay`].
    Replay {
        /// The fixed tuple sequence to re-emit.
        items: Vec<Tuple>,
    },
}

/// The wire form of a whole pipeline: its name plus the wire form of every operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineWire {
    /// The pipeline's name, for diagnostics on the receiving side.
    pub name: String,
    /// Wire form of each operator, in pipeline order.
    pub operators: Vec<OperatorWire>,
}

/// One line of the remote dispatch protocol's output stream: the `remoteosh`
/// worker binary writes one of these per line to its stdout, and [`super::remote::Remote`]
/// reads them back on the dispatching side.
#[derive(Debug, Serialize, Deserialize)]
pub enum RemoteFrame {
    /// One tuple emitted by the remote pipeline.
    Tuple(Vec<Value>),
    /// The remote pipeline raised; carries enough of the original exception to
    /// reconstruct an equivalent [`EngineError`](super::error::EngineError) locally.
    Error(super::error::PickleableException),
}

/// Convert a pipeline to its wire form, failing if any operator has no wire
/// representation (the wire/serialization boundary the remote operator ships across).
pub fn to_wire(pipeline: &Pipeline) -> Result<PipelineWire, EngineError> {
    let mut operators = Vec::with_capacity(pipeline.operators().len());
    for op in pipeline.operators() {
        let wire = op.to_wire().ok_or_else(|| {
            EngineError::Usage(format!(
                "operator {:?} has no wire form and cannot be shipped to a remote host",
                op.name()
            ))
        })?;
        operators.push(wire);
    }
    Ok(PipelineWire { name: pipeline.name().to_string(), operators })
}

/// Reconstruct a pipeline from its wire form, the remote worker's side of the handshake.
pub fn from_wire(wire: &PipelineWire) -> Result<Pipeline, EngineError> {
    let mut pipeline = Pipeline::new(wire.name.clone());
    for op in &wire.operators {
        let boxed: Box<dyn Operator> = match op {
            OperatorWire::Gen { count } => Box::new(Gen::new(*count)),
            OperatorWire::Apply { function_source } => Box::new(Apply::new(FunctionValue::parse(function_source)?)),
            OperatorWire::Replay { items } => Box::new(Replay::new(items.clone())),
        };
        pipeline.append(boxed);
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::operator::{CollectingReceiver, OperatorContext};
    use crate::engine::value::Value;
    use std::sync::Arc;

    #[test]
    fn round_trips_gen_and_apply_through_wire_form() {
        let mut pipeline = Pipeline::new("p");
        pipeline.append(Box::new(Gen::new(3)));
        pipeline.append(Box::new(Apply::new(FunctionValue::parse("x: x + 1").unwrap())));

        let wire = to_wire(&pipeline).expect("wire form");
        let json = serde_json::to_string(&wire).unwrap();
        let wire_back: PipelineWire = serde_json::from_str(&json).unwrap();

        let mut reconstructed = from_wire(&wire_back).expect("reconstruct");
        let ctx = OperatorContext { identity: None, config: Arc::new(super::super::config::Config::default()) };
        reconstructed.setup(&ctx).unwrap();
        let mut out = CollectingReceiver::default();
        reconstructed.execute(&mut out).unwrap();
        assert_eq!(out.collected, vec![Tuple::from_scalar(1i64), Tuple::from_scalar(2i64), Tuple::from_scalar(3i64)]);
        let _ = Value::None;
    }
}
