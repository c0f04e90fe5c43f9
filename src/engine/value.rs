//! The closed value domain that flows through pipelines, and the tuple type built from it.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::HostDescriptor;

/// One element of a [`Tuple`].
///
/// This is the full value domain the engine understands. It is deliberately closed (no
/// open-ended "any" variant) so that every value can cross the wire encoding described in
/// the on-wire section of the design: tuples of primitives, small integers, strings, host
/// descriptors, and nested tuples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value (the engine's unit/none).
    None,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// A host descriptor, carried as a value when it is used as a worker identity.
    Host(HostDescriptor),
    /// A nested tuple of values.
    Tuple(Vec<Value>),
}

impl Value {
    /// Best-effort ordering between two values, used by merge keys and the tournament
    /// tree. Returns `None` for values that are not meaningfully comparable (e.g. a
    /// string against a host descriptor); callers that need a total order fall back to
    /// treating incomparable values as equal.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (None, None) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.partial_cmp(b),
            (Tuple(a), Tuple(b)) => a.iter().zip(b.iter()).find_map(|(x, y)| {
                match x.partial_compare(y) {
                    Some(Ordering::Equal) => None,
                    other => Some(other),
                }
            }).unwrap_or_else(|| a.len().partial_cmp(&b.len())),
            _ => None,
        }
    }

    /// True if this value is the unit/none value.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Host(h) => write!(f, "{h}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// The unit of flow between operators: an ordered, fixed-arity sequence of [`Value`]s.
///
/// Scalars entering a pipeline are wrapped to arity 1 (see [`Tuple::from_scalar`]); this
/// wrapping is the engine's only implicit conversion and is required to be unobservable
/// downstream (emitting a scalar and emitting a 1-tuple of that scalar must look the same
/// to a receiver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple(pub Vec<Value>);

impl Tuple {
    /// Wrap a single value as a 1-tuple.
    pub fn from_scalar(v: impl Into<Value>) -> Tuple {
        Tuple(vec![v.into()])
    }

    /// Build a tuple from already-constructed values.
    pub fn new(values: Vec<Value>) -> Tuple {
        Tuple(values)
    }

    /// Borrow the tuple's elements, for spreading as positional arguments to a function.
    pub fn elements(&self) -> &[Value] {
        &self.0
    }

    /// Return a new tuple with `front` prepended, used by the fork operator's
    /// attach-identity step.
    pub fn with_prefix(&self, front: Value) -> Tuple {
        let mut values = Vec::with_capacity(self.0.len() + 1);
        values.push(front);
        values.extend(self.0.iter().cloned());
        Tuple(values)
    }

    /// Return a new tuple with the first element removed, used to strip a worker
    /// identity before applying a merge key.
    pub fn without_first(&self) -> Tuple {
        Tuple(self.0.iter().skip(1).cloned().collect())
    }

    /// Arity of the tuple.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the tuple has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_wraps_to_one_tuple() {
        let t = Tuple::from_scalar(5i64);
        assert_eq!(t.elements(), &[Value::Int(5)]);
    }

    #[test]
    fn prefix_and_strip_round_trip() {
        let t = Tuple::new(vec![Value::Int(1), Value::Int(2)]);
        let tagged = t.with_prefix(Value::Int(0));
        assert_eq!(tagged.elements(), &[Value::Int(0), Value::Int(1), Value::Int(2)]);
        assert_eq!(tagged.without_first(), t);
    }

    #[test]
    fn int_float_cross_compare() {
        assert_eq!(
            Value::Int(2).partial_compare(&Value::Float(2.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Int(1).partial_compare(&Value::Float(1.5)),
            Some(Ordering::Less)
        );
    }
}
