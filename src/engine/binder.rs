//! Argument binder: flag/positional parsing shared by operator constructors, in both a
//! "direct" mode (values already evaluated by a host program) and a "textual" mode
//! (tokens from the out-of-scope command-line grammar, evaluated lazily).

use std::collections::HashMap;

use super::error::EngineError;
use super::function::{FunctionStore, FunctionValue, FunctionWire};
use super::value::Value;

/// One bound argument value: either already-evaluated, or raw text awaiting evaluation.
#[derive(Debug, Clone)]
pub enum BoundArg {
    /// A value constructed directly by a host program (direct mode).
    Value(Value),
    /// A function value.
    Function(FunctionValue),
    /// Unevaluated text (textual mode's `next_raw`).
    Raw(String),
}

/// Specification of one flag: whether it takes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSpec {
    takes_value: bool,
}

/// Parses a flag-specification string (each letter a flag, a trailing colon marks
/// "takes a value") and binds flags plus positional arguments against an arity range.
///
/// The same struct serves both modes a binder supports: a caller populates `flags` and
/// `positionals` either from already-evaluated [`Value`]s (direct mode) or from raw
/// command-line tokens it evaluates lazily via [`FunctionValue::parse`]/literal parsing
/// (textual mode) before handing them to the binder; the binder's own job is purely
/// flag/arity bookkeeping, identical either way.
#[derive(Debug, Default)]
pub struct ArgBinder {
    spec: HashMap<char, FlagSpec>,
    min_positional: usize,
    max_positional: Option<usize>,
    flags: HashMap<char, BoundArg>,
    positionals: Vec<BoundArg>,
    cursor: usize,
}

impl ArgBinder {
    /// Build a binder from a flag-spec string and a positional arity range.
    pub fn new(flag_spec: &str, min_positional: usize, max_positional: Option<usize>) -> ArgBinder {
        let mut spec = HashMap::new();
        let chars: Vec<char> = flag_spec.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let takes_value = chars.get(i + 1) == Some(&':');
            spec.insert(c, FlagSpec { takes_value });
            i += if takes_value { 2 } else { 1 };
        }
        ArgBinder { spec, min_positional, max_positional, ..Default::default() }
    }

    /// Bind one `-x`/`-xyz`/`-xval` token plus however many following tokens it consumes.
    ///
    /// `-xyz` collapses to `-x -y -z` when all three are flag-only; the last letter of a
    /// collapsed group may instead be key-valued (`-xyval`) provided every earlier letter
    /// in the group is flag-only (a multi-flag group is only unambiguous when every flag
    /// but (at most) the last takes no value).
    pub fn bind_flag_token(&mut self, token: &str, mut value_source: impl FnMut() -> Option<String>) -> Result<(), EngineError> {
        let body = token.strip_prefix('-').ok_or_else(|| EngineError::Usage(format!("not a flag: {token}")))?;
        let letters: Vec<char> = body.chars().collect();
        if letters.is_empty() {
            return Err(EngineError::Usage("empty flag".to_string()));
        }
        for (idx, &letter) in letters.iter().enumerate() {
            let is_last = idx == letters.len() - 1;
            let flag = self.spec.get(&letter).copied().ok_or_else(|| EngineError::Usage(format!("unknown flag -{letter}")))?;
            if flag.takes_value {
                if !is_last {
                    return Err(EngineError::Usage(format!(
                        "ambiguous collapsed flags in -{body}: -{letter} takes a value but is not last"
                    )));
                }
                let value = value_source().ok_or_else(|| EngineError::Usage(format!("missing value for -{letter}")))?;
                if self.flags.contains_key(&letter) {
                    return Err(EngineError::Usage(format!("duplicate value for -{letter}")));
                }
                self.flags.insert(letter, BoundArg::Raw(value));
            } else {
                if self.flags.contains_key(&letter) {
                    return Err(EngineError::Usage(format!("duplicate flag -{letter}")));
                }
                self.flags.insert(letter, BoundArg::Value(Value::Bool(true)));
            }
        }
        Ok(())
    }

    /// Append one positional argument.
    pub fn push_positional(&mut self, arg: BoundArg) -> Result<(), EngineError> {
        if let Some(max) = self.max_positional {
            if self.positionals.len() >= max {
                return Err(EngineError::Usage(format!("too many positional arguments (max {max})")));
            }
        }
        self.positionals.push(arg);
        Ok(())
    }

    /// Validate arity once all tokens have been consumed.
    pub fn finish(&self) -> Result<(), EngineError> {
        if self.positionals.len() < self.min_positional {
            return Err(EngineError::Usage(format!(
                "too few positional arguments: got {}, need at least {}",
                self.positionals.len(),
                self.min_positional
            )));
        }
        Ok(())
    }

    /// True if a flag-only option was given.
    pub fn has_flag(&self, letter: char) -> bool {
        self.flags.contains_key(&letter)
    }

    /// Whether there are more positional arguments to consume.
    pub fn has_more(&self) -> bool {
        self.cursor < self.positionals.len()
    }

    /// Consume the next positional argument as an integer.
    pub fn next_integer(&mut self) -> Result<i64, EngineError> {
        match self.next_raw_value()? {
            BoundArg::Value(Value::Int(i)) => Ok(i),
            BoundArg::Raw(text) => text.trim().parse::<i64>().map_err(|_| EngineError::Usage(format!("not an integer: {text}"))),
            other => Err(EngineError::Usage(format!("expected integer, got {other:?}"))),
        }
    }

    /// Consume the next positional argument as a string.
    pub fn next_string(&mut self) -> Result<String, EngineError> {
        match self.next_raw_value()? {
            BoundArg::Value(Value::Str(s)) => Ok(s),
            BoundArg::Raw(text) => Ok(text),
            other => Err(EngineError::Usage(format!("expected string, got {other:?}"))),
        }
    }

    /// Consume the next positional argument as a function value, parsing textual specs
    /// lazily.
    pub fn next_function(&mut self) -> Result<FunctionValue, EngineError> {
        match self.next_raw_value()? {
            BoundArg::Function(f) => Ok(f),
            BoundArg::Raw(text) => FunctionValue::parse(&text),
            other => Err(EngineError::Usage(format!("expected function, got {other:?}"))),
        }
    }

    /// Consume the next positional argument without evaluating it.
    pub fn next_raw(&mut self) -> Result<String, EngineError> {
        match self.next_raw_value()? {
            BoundArg::Raw(text) => Ok(text),
            BoundArg::Value(v) => Ok(v.to_string()),
            BoundArg::Function(_) => Err(EngineError::Usage("cannot take function argument as raw text".to_string())),
        }
    }

    /// All remaining positional arguments as raw strings.
    pub fn remaining(&mut self) -> Vec<String> {
        let rest: Vec<String> = self.positionals[self.cursor..]
            .iter()
            .map(|a| match a {
                BoundArg::Raw(s) => s.clone(),
                BoundArg::Value(v) => v.to_string(),
                BoundArg::Function(_) => "<function>".to_string(),
            })
            .collect();
        self.cursor = self.positionals.len();
        rest
    }

    fn next_raw_value(&mut self) -> Result<BoundArg, EngineError> {
        let arg = self.positionals.get(self.cursor).cloned().ok_or_else(|| EngineError::Usage("not enough positional arguments".to_string()))?;
        self.cursor += 1;
        Ok(arg)
    }

    /// Walk flag and positional values, swapping any function value for an integer
    /// handle registered with `store`. Used by the pipeline cloner before a deep copy
    /// (callables are not otherwise copyable/serializable).
    pub fn substitute_callables_with_handles(&mut self, store: &mut FunctionStore) -> Vec<(ArgSlot, FunctionWire)> {
        let mut substituted = Vec::new();
        for (letter, arg) in self.flags.iter_mut() {
            if let BoundArg::Function(f) = arg {
                if let Some(wire) = store.register(f) {
                    substituted.push((ArgSlot::Flag(*letter), wire));
                }
            }
        }
        for (idx, arg) in self.positionals.iter_mut().enumerate() {
            if let BoundArg::Function(f) = arg {
                if let Some(wire) = store.register(f) {
                    substituted.push((ArgSlot::Positional(idx), wire));
                }
            }
        }
        substituted
    }

    /// Reverse of [`Self::substitute_callables_with_handles`]: re-resolve each recorded
    /// slot back into a function value, either from the same-process store (clone path)
    /// or by re-parsing the wire's textual source (remote path).
    pub fn restore_callables(&mut self, slots: &[(ArgSlot, FunctionWire)], store: &FunctionStore) -> Result<(), EngineError> {
        for (slot, wire) in slots {
            let resolved = match store.resolve(wire.handle) {
                Some(f) => f,
                None => FunctionStore::resolve_wire(wire)?,
            };
            match slot {
                ArgSlot::Flag(letter) => {
                    self.flags.insert(*letter, BoundArg::Function(resolved));
                }
                ArgSlot::Positional(idx) => {
                    self.positionals[*idx] = BoundArg::Function(resolved);
                }
            }
        }
        Ok(())
    }
}

impl Clone for ArgBinder {
    fn clone(&self) -> Self {
        ArgBinder {
            spec: self.spec.clone(),
            min_positional: self.min_positional,
            max_positional: self.max_positional,
            flags: self.flags.clone(),
            positionals: self.positionals.clone(),
            cursor: self.cursor,
        }
    }
}

/// Identifies which slot of an `ArgBinder` a substituted function handle came from, so it
/// can be restored to the same place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    /// A flag letter.
    Flag(char),
    /// A positional index.
    Positional(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_flag_only_group() {
        let mut binder = ArgBinder::new("xyz", 0, None);
        binder.bind_flag_token("-xyz", || None).unwrap();
        assert!(binder.has_flag('x') && binder.has_flag('y') && binder.has_flag('z'));
    }

    #[test]
    fn collapsed_group_allows_trailing_value_flag() {
        let mut binder = ArgBinder::new("xyv:", 0, None);
        let mut values = vec!["42".to_string()].into_iter();
        binder.bind_flag_token("-xyv", || values.next()).unwrap();
        assert!(binder.has_flag('x'));
        assert!(binder.has_flag('y'));
    }

    #[test]
    fn rejects_value_flag_not_last_in_group() {
        let mut binder = ArgBinder::new("xv:y", 0, None);
        let err = binder.bind_flag_token("-xvy", || Some("ignored".into())).unwrap_err();
        assert!(matches!(err, EngineError::Usage(_)));
    }

    #[test]
    fn rejects_unknown_flag() {
        let mut binder = ArgBinder::new("x", 0, None);
        assert!(binder.bind_flag_token("-q", || None).is_err());
    }

    #[test]
    fn enforces_min_positional_arity() {
        let binder = ArgBinder::new("", 2, Some(2));
        assert!(binder.finish().is_err());
    }

    #[test]
    fn handle_round_trip_through_store() {
        let mut binder = ArgBinder::new("", 0, None);
        binder.push_positional(BoundArg::Function(FunctionValue::parse("x: x").unwrap())).unwrap();
        let mut store = FunctionStore::new();
        let slots = binder.substitute_callables_with_handles(&mut store);
        assert_eq!(slots.len(), 1);
        binder.restore_callables(&slots, &store).unwrap();
        assert!(matches!(binder.positionals[0], BoundArg::Function(_)));
    }
}
