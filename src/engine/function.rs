//! Function values: invocables built from source text, an operator shorthand, or a
//! native Rust callable, plus the handle table used to carry them through a pipeline
//! clone or across the wire to a remote host.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use evalexpr::{ContextWithMutableVariables, HashMapContext, Node, Value as EvalValue};
use serde::{Deserialize, Serialize};

use super::error::EngineError;
use super::value::Value;

type NativeFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// An invocable built either from a native Rust closure or from a parsed textual
/// specification (`"x,y: x+y"`, `"lambda x,y: x+y"`, or a bare zero-arg expression).
#[derive(Clone)]
pub struct FunctionValue {
    inner: FunctionInner,
}

#[derive(Clone)]
enum FunctionInner {
    Native(NativeFn),
    Text { source: String, params: Vec<String>, expr: Arc<Node> },
    /// A transient placeholder installed by [`FunctionStore::register`] in place of the
    /// real callable while a pipeline clone's deep-copy step is in flight. Never valid to
    /// call; [`super::cloner`] must restore every handle before the clone is used.
    Handle(u32),
}

impl FunctionValue {
    /// Wrap a native Rust closure.
    pub fn native(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> FunctionValue {
        FunctionValue { inner: FunctionInner::Native(Arc::new(f)) }
    }

    /// Parse a textual function specification.
    ///
    /// Accepts `ARGS: EXPR`, `lambda ARGS: EXPR`, or a bare expression (zero
    /// parameters), and the fixed operator-shorthand table (`+ * ^ & | and or max min`),
    /// which resolves to a two-argument native function over `a, b`.
    pub fn parse(source: &str) -> Result<FunctionValue, EngineError> {
        if let Some(shorthand) = shorthand_function(source.trim()) {
            return Ok(shorthand);
        }
        let trimmed = source.trim();
        let body = trimmed.strip_prefix("lambda ").unwrap_or(trimmed);
        let (params, expr_text) = match body.split_once(':') {
            Some((args, expr)) if looks_like_param_list(args) => {
                let params = args.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
                (params, expr.trim())
            }
            _ => (Vec::new(), body),
        };
        let node = evalexpr::build_operator_tree(expr_text)
            .map_err(|e| EngineError::FunctionParse { source: source.to_string(), detail: e.to_string() })?;
        Ok(FunctionValue {
            inner: FunctionInner::Text { source: source.to_string(), params, expr: Arc::new(node) },
        })
    }

    /// Evaluate the function with `args` spread as positional parameters.
    pub fn call(&self, args: &[Value]) -> Result<Value, EngineError> {
        match &self.inner {
            FunctionInner::Handle(h) => Err(EngineError::FunctionParse {
                source: format!("<unresolved handle {h}>"),
                detail: "function handle was never restored after cloning".to_string(),
            }),
            FunctionInner::Native(f) => Ok(f(args)),
            FunctionInner::Text { source, params, expr } => {
                let mut ctx = HashMapContext::new();
                for (name, value) in params.iter().zip(args.iter()) {
                    ctx.set_value(name.clone(), to_eval(value))
                        .map_err(|e| EngineError::FunctionParse { source: source.clone(), detail: e.to_string() })?;
                }
                let result = expr
                    .eval_with_context(&ctx)
                    .map_err(|e| EngineError::FunctionParse { source: source.clone(), detail: e.to_string() })?;
                Ok(from_eval(result))
            }
        }
    }

    /// Invoke the function over a whole tuple, spreading its elements as positional args.
    pub fn call_tuple(&self, tuple: &super::value::Tuple) -> Result<Value, EngineError> {
        self.call(tuple.elements())
    }

    /// The original textual source, if this was built from text. Native closures have no
    /// textual representation and so cannot be restored on a remote host; a pipeline that
    /// is going to be shipped remotely must only use text-backed function values (the
    /// binder enforces this in `substitute_callables_with_handles`, see [`super::binder`]).
    pub fn source_text(&self) -> Option<&str> {
        match &self.inner {
            FunctionInner::Text { source, .. } => Some(source),
            FunctionInner::Native(_) | FunctionInner::Handle(_) => None,
        }
    }

    /// Build the transient handle placeholder described on [`FunctionInner::Handle`].
    pub(crate) fn handle_placeholder(handle: u32) -> FunctionValue {
        FunctionValue { inner: FunctionInner::Handle(handle) }
    }

    /// The handle this value stands in for, if it is currently an unresolved placeholder.
    pub(crate) fn as_handle(&self) -> Option<u32> {
        match &self.inner {
            FunctionInner::Handle(h) => Some(*h),
            _ => None,
        }
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            FunctionInner::Native(_) => write!(f, "FunctionValue::Native"),
            FunctionInner::Text { source, .. } => write!(f, "FunctionValue::Text({source:?})"),
            FunctionInner::Handle(h) => write!(f, "FunctionValue::Handle({h})"),
        }
    }
}

fn looks_like_param_list(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .split(',')
            .all(|p| {
                let p = p.trim();
                !p.is_empty() && p.chars().all(|c| c.is_alphanumeric() || c == '_')
            })
}

fn shorthand_function(source: &str) -> Option<FunctionValue> {
    let op: fn(&Value, &Value) -> Value = match source {
        "+" => |a, b| arith(a, b, |x, y| x + y, |x, y| x + y),
        "*" => |a, b| arith(a, b, |x, y| x * y, |x, y| x * y),
        "^" => |a, b| arith(a, b, |x, y| x ^ y, |x, y| x.powf(y)),
        "&" => |a, b| bool_op(a, b, |x, y| x && y),
        "|" => |a, b| bool_op(a, b, |x, y| x || y),
        "and" => |a, b| bool_op(a, b, |x, y| x && y),
        "or" => |a, b| bool_op(a, b, |x, y| x || y),
        "max" => |a, b| if a.partial_compare(b) == Some(std::cmp::Ordering::Less) { b.clone() } else { a.clone() },
        "min" => |a, b| if a.partial_compare(b) == Some(std::cmp::Ordering::Greater) { b.clone() } else { a.clone() },
        _ => return None,
    };
    Some(FunctionValue::native(move |args: &[Value]| {
        let a = args.first().cloned().unwrap_or(Value::None);
        let b = args.get(1).cloned().unwrap_or(Value::None);
        op(&a, &b)
    }))
}

fn arith(a: &Value, b: &Value, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(int_op(*x, *y)),
        (Value::Float(x), Value::Float(y)) => Value::Float(float_op(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Value::Float(float_op(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Value::Float(float_op(*x, *y as f64)),
        _ => Value::None,
    }
}

fn bool_op(a: &Value, b: &Value, op: fn(bool, bool) -> bool) -> Value {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(op(*x, *y)),
        _ => Value::None,
    }
}

fn to_eval(value: &Value) -> EvalValue {
    match value {
        Value::None => EvalValue::Empty,
        Value::Bool(b) => EvalValue::Boolean(*b),
        Value::Int(i) => EvalValue::Int(*i),
        Value::Float(f) => EvalValue::Float(*f),
        Value::Str(s) => EvalValue::String(s.clone()),
        Value::Host(h) => EvalValue::String(h.to_string()),
        Value::Tuple(items) => EvalValue::Tuple(items.iter().map(to_eval).collect()),
    }
}

fn from_eval(value: EvalValue) -> Value {
    match value {
        EvalValue::Empty => Value::None,
        EvalValue::Boolean(b) => Value::Bool(b),
        EvalValue::Int(i) => Value::Int(i),
        EvalValue::Float(f) => Value::Float(f),
        EvalValue::String(s) => Value::Str(s),
        EvalValue::Tuple(items) => Value::Tuple(items.into_iter().map(from_eval).collect()),
    }
}

/// The wire form of a function value: always carries the textual source (per the design
/// a bare integer handle cannot be resolved across a process boundary) plus
/// the handle assigned to it in the originating clone/shipment, so the receiving side and
/// the sending side agree on which occurrences refer to the same underlying callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionWire {
    /// Handle assigned by the sender's [`FunctionStore`].
    pub handle: u32,
    /// Original textual source, re-parsed on the receiving side.
    pub source: String,
}

/// Per-clone table mapping integer handles to local callables, used by the pipeline
/// cloner to substitute non-serializable function values before a deep copy and
/// restore them afterward.
#[derive(Default)]
pub struct FunctionStore {
    handles: HashMap<u32, FunctionValue>,
    next: u32,
}

impl FunctionStore {
    /// Create an empty store.
    pub fn new() -> FunctionStore {
        FunctionStore::default()
    }

    /// Register a function value, returning its wire form (handle + source text).
    ///
    /// Returns `None` for native (non-textual) callables, matching the design decision
    /// that only text-backed functions can survive a clone/shipment; a native callable
    /// used inside a forked sub-pipeline is a configuration error the fork operator
    /// surfaces as [`EngineError::Usage`].
    pub fn register(&mut self, function: &FunctionValue) -> Option<FunctionWire> {
        let source = function.source_text()?.to_string();
        let handle = self.next;
        self.next += 1;
        self.handles.insert(handle, function.clone());
        Some(FunctionWire { handle, source })
    }

    /// Resolve a handle back to its local callable (same-process clone path).
    pub fn resolve(&self, handle: u32) -> Option<FunctionValue> {
        self.handles.get(&handle).cloned()
    }

    /// True once every handle issued by this store has been resolved (restored) at least
    /// once; used by the cloner to assert the clone-round-trip invariant.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Resolve a [`FunctionWire`] by re-parsing its textual source directly, the path the
    /// remote worker binary uses since it has no access to the sender's in-memory store.
    pub fn resolve_wire(wire: &FunctionWire) -> Result<FunctionValue, EngineError> {
        FunctionValue::parse(&wire.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arrow_style_lambda() {
        let f = FunctionValue::parse("x: x + 1").unwrap();
        assert_eq!(f.call(&[Value::Int(4)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn parses_explicit_lambda_keyword() {
        let f = FunctionValue::parse("lambda x,y: x + y").unwrap();
        assert_eq!(f.call(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn bare_expression_has_no_params() {
        let f = FunctionValue::parse("1 + 2").unwrap();
        assert_eq!(f.call(&[]).unwrap(), Value::Int(3));
    }

    #[test]
    fn shorthand_plus_resolves() {
        let f = FunctionValue::parse("+").unwrap();
        assert_eq!(f.call(&[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn shorthand_max_resolves() {
        let f = FunctionValue::parse("max").unwrap();
        assert_eq!(f.call(&[Value::Int(2), Value::Int(9)]).unwrap(), Value::Int(9));
    }

    #[test]
    fn store_round_trips_textual_function() {
        let mut store = FunctionStore::new();
        let f = FunctionValue::parse("x: x * 2").unwrap();
        let wire = store.register(&f).expect("textual function registers");
        let resolved = store.resolve(wire.handle).unwrap();
        assert_eq!(resolved.call(&[Value::Int(3)]).unwrap(), Value::Int(6));
    }

    #[test]
    fn native_function_has_no_wire_form() {
        let mut store = FunctionStore::new();
        let f = FunctionValue::native(|args| args[0].clone());
        assert!(store.register(&f).is_none());
    }
}
