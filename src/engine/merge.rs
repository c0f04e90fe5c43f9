//! Recombining fork's worker substreams back into one.
//!
//! Every worker clone of the [`Merge`] operator at the tail of a forked sub-pipeline
//! writes into its own [`SourceBuffer`], identified by its position in the worker list
//! fork was given. Once all workers are running, fork drains the shared buffers on its
//! own thread — unordered draining interleaves whichever source is ready first; ordered
//! draining (a merge key was given) repeatedly picks the globally smallest current head
//! across every still-live source, which requires waiting for every source's next head
//! before any tuple can be emitted, exactly as the omitted-merge-key decision in the
//! design notes describes.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use super::error::EngineError;
use super::function::FunctionValue;
use super::identity::WorkerIdentity;
use super::operator::{Operator, OperatorContext, Receiver};
use super::value::{Tuple, Value};

const WRITE_BUFFER_CAPACITY: usize = 1000;
const LOCK_WAIT_TIME: Duration = Duration::from_secs(1);
const UNORDERED_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct BufferState {
    queue: VecDeque<Tuple>,
    done: bool,
    last_key: Option<Value>,
}

/// A bounded, single-producer/single-consumer queue from one fork worker into the merge
/// coordinator, with an optional monotonic-key ordering check on the producer side.
pub struct SourceBuffer {
    index: usize,
    state: Mutex<BufferState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl SourceBuffer {
    fn new(index: usize) -> SourceBuffer {
        SourceBuffer {
            index,
            state: Mutex::new(BufferState { queue: VecDeque::new(), done: false, last_key: None }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Push a tuple onto the buffer, blocking while it is at capacity. When `key` is
    /// `Some`, enforces that it is not smaller than the key of the previously pushed
    /// tuple.
    pub fn add(&self, tuple: Tuple, key: Option<&Value>) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(k) = key {
            if let Some(previous) = &state.last_key {
                if matches!(k.partial_compare(previous), Some(std::cmp::Ordering::Less)) {
                    return Err(EngineError::MergeOrdering {
                        source: self.index,
                        offending: tuple.to_string(),
                        previous: previous.to_string(),
                    });
                }
            }
            state.last_key = Some(k.clone());
        }
        while state.queue.len() >= WRITE_BUFFER_CAPACITY {
            let (next, _) = self.not_full.wait_timeout(state, LOCK_WAIT_TIME).unwrap();
            state = next;
        }
        state.queue.push_back(tuple);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Signal that no further tuples will arrive on this source.
    pub fn mark_done(&self) {
        let mut state = self.state.lock().unwrap();
        state.done = true;
        self.not_empty.notify_all();
    }

    /// Blocking peek at the head of the queue. Returns `None` only once the source is
    /// both done and drained.
    fn current(&self) -> Option<Tuple> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(t) = state.queue.front() {
                return Some(t.clone());
            }
            if state.done {
                return None;
            }
            let (next, _) = self.not_empty.wait_timeout(state, LOCK_WAIT_TIME).unwrap();
            state = next;
        }
    }

    /// Blocking pop of the head of the queue. Returns `None` only once the source is
    /// both done and drained.
    fn next(&self) -> Option<Tuple> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(t) = state.queue.pop_front() {
                self.not_full.notify_all();
                return Some(t);
            }
            if state.done {
                return None;
            }
            let (next, _) = self.not_empty.wait_timeout(state, LOCK_WAIT_TIME).unwrap();
            state = next;
        }
    }

    /// Non-blocking pop used by the unordered drain loop: `Some(Some(_))` is a tuple
    /// ready now, `Some(None)` means the source is done and drained, `None` means empty
    /// but still live.
    fn try_next(&self) -> Option<Option<Tuple>> {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.queue.pop_front() {
            self.not_full.notify_all();
            return Some(Some(t));
        }
        if state.done {
            return Some(None);
        }
        None
    }
}

/// The ordering of a source's current head, used to pick the global minimum in ordered
/// draining. `NegInf`/`PosInf` never arise from a real tuple; they only bound the
/// comparison so a drained source always loses a comparison against any live one.
#[derive(Debug, Clone)]
enum Content {
    Real(Tuple, Value),
    PosInf,
}

fn content_order(a: &Content, b: &Content) -> std::cmp::Ordering {
    use std::cmp::Ordering::*;
    match (a, b) {
        (Content::PosInf, Content::PosInf) => Equal,
        (Content::PosInf, _) => Greater,
        (_, Content::PosInf) => Less,
        (Content::Real(_, ka), Content::Real(_, kb)) => ka.partial_compare(kb).unwrap_or(Equal),
    }
}

/// State shared by every worker's [`Merge`] clone and by fork's draining loop: one
/// buffer per worker, installed position-wise via `create_shared_state`/`set_shared_state`
/// plus the optional merge key shared verbatim from the template.
pub struct MergeState {
    workers: Vec<WorkerIdentity>,
    buffers: Vec<Arc<SourceBuffer>>,
    key: Option<Arc<FunctionValue>>,
}

impl MergeState {
    fn new(workers: &[WorkerIdentity], key: Option<Arc<FunctionValue>>) -> MergeState {
        let buffers = (0..workers.len()).map(SourceBuffer::new).map(Arc::new).collect();
        MergeState { workers: workers.to_vec(), buffers, key }
    }

    /// Force a worker's source done, bypassing its `Merge` clone entirely. Used by fork to
    /// unblock draining when a worker thread exits - by error or by panic - before its own
    /// `receive_complete` ever reaches `Merge`, which otherwise never happens since an
    /// error anywhere in the worker's pipeline unwinds straight out of `execute` instead of
    /// flowing through `receive_complete`.
    pub fn mark_source_done(&self, index: usize) {
        self.buffers[index].mark_done();
    }
}

/// Recombines the tagged output of every fork worker into the single stream fork itself
/// emits downstream. Appended by fork as the last operator of every worker's cloned
/// sub-pipeline; never appears directly in a user-authored pipeline.
pub struct Merge {
    key: Option<Arc<FunctionValue>>,
    shared: Option<Arc<MergeState>>,
    my_index: Option<usize>,
}

impl Merge {
    /// Build a merge operator. `key` is `Some` when the fork clause named a merge key
    /// expression; absent, draining is unordered.
    pub fn new(key: Option<FunctionValue>) -> Merge {
        Merge { key: key.map(Arc::new), shared: None, my_index: None }
    }

    /// The shared draining state, available once `create_shared_state` has run. Used by
    /// fork to drain after installing this same state on every worker clone.
    pub fn shared_state(&self) -> Option<Arc<MergeState>> {
        self.shared.clone()
    }
}

impl Operator for Merge {
    fn name(&self) -> &str {
        "merge"
    }

    fn create_shared_state(&self, workers: &[WorkerIdentity]) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(Arc::new(MergeState::new(workers, self.key.clone())))
    }

    fn set_shared_state(&mut self, state: Arc<dyn Any + Send + Sync>) {
        self.shared = state.downcast::<MergeState>().ok();
    }

    fn setup(&mut self, ctx: &OperatorContext) -> Result<(), EngineError> {
        if let (Some(shared), Some(identity)) = (&self.shared, &ctx.identity) {
            self.my_index = shared.workers.iter().position(|w| w == identity);
        }
        Ok(())
    }

    fn receive(&mut self, tuple: Tuple, _out: &mut dyn Receiver) -> Result<(), EngineError> {
        let shared = self.shared.as_ref().expect("Merge.receive called before shared state was installed");
        let index = self.my_index.expect("Merge.receive called before setup resolved a worker index");
        let basis = tuple.without_first();
        let key_value = match &shared.key {
            Some(f) => Some(f.call_tuple(&basis)?),
            None => None,
        };
        shared.buffers[index].add(tuple, key_value.as_ref())
    }

    fn receive_complete(&mut self, _out: &mut dyn Receiver) -> Result<(), EngineError> {
        let shared = self.shared.as_ref().expect("Merge.receive_complete called before shared state was installed");
        let index = self.my_index.expect("Merge.receive_complete called before setup resolved a worker index");
        shared.buffers[index].mark_done();
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Operator> {
        Box::new(Merge { key: self.key.clone(), shared: self.shared.clone(), my_index: self.my_index })
    }
}

/// Drain every worker's buffer into `out`, ordered or unordered depending on whether a
/// merge key was configured. Called once, from fork's own thread, after every worker
/// thread has been started.
pub fn drain(shared: &MergeState, out: &mut dyn Receiver) -> Result<(), EngineError> {
    match &shared.key {
        Some(_) => drain_ordered(shared, out),
        None => drain_unordered(shared, out),
    }
}

fn drain_ordered(shared: &MergeState, out: &mut dyn Receiver) -> Result<(), EngineError> {
    let mut live: Vec<usize> = (0..shared.buffers.len()).collect();
    loop {
        let mut best: Option<(usize, Content)> = None;
        let mut exhausted = Vec::new();
        for &i in &live {
            let content = match shared.buffers[i].current() {
                Some(tuple) => {
                    let basis = tuple.without_first();
                    let key = shared.key.as_ref().expect("ordered drain requires a merge key").call_tuple(&basis)?;
                    Content::Real(tuple, key)
                }
                None => {
                    exhausted.push(i);
                    Content::PosInf
                }
            };
            let replace = match &best {
                None => true,
                Some((_, current_best)) => content_order(&content, current_best) == std::cmp::Ordering::Less,
            };
            if replace && !matches!(content, Content::PosInf) {
                best = Some((i, content));
            }
        }
        live.retain(|i| !exhausted.contains(i));
        match best {
            Some((i, Content::Real(tuple, _))) => {
                shared.buffers[i].next();
                out.receive(tuple)?;
            }
            _ => {
                if live.is_empty() {
                    break;
                }
            }
        }
    }
    out.receive_complete()
}

fn drain_unordered(shared: &MergeState, out: &mut dyn Receiver) -> Result<(), EngineError> {
    let mut active: Vec<usize> = (0..shared.buffers.len()).collect();
    while !active.is_empty() {
        let mut next_round = Vec::with_capacity(active.len());
        let mut made_progress = false;
        for i in active {
            match shared.buffers[i].try_next() {
                Some(Some(tuple)) => {
                    out.receive(tuple)?;
                    next_round.push(i);
                    made_progress = true;
                }
                Some(None) => {}
                None => next_round.push(i),
            }
        }
        active = next_round;
        if !made_progress && !active.is_empty() {
            thread::sleep(UNORDERED_POLL_INTERVAL);
        }
    }
    out.receive_complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::operator::CollectingReceiver;
    use crate::engine::value::Value;

    fn workers(n: usize) -> Vec<WorkerIdentity> {
        (0..n as u32).map(WorkerIdentity::Index).collect()
    }

    #[test]
    fn unordered_drain_forwards_every_tuple_regardless_of_interleaving() {
        let state = MergeState::new(&workers(2), None);
        state.buffers[0].add(Tuple::new(vec![Value::Int(0), Value::Int(10)]), None).unwrap();
        state.buffers[0].mark_done();
        state.buffers[1].add(Tuple::new(vec![Value::Int(1), Value::Int(20)]), None).unwrap();
        state.buffers[1].mark_done();

        let mut out = CollectingReceiver::default();
        drain_unordered(&state, &mut out).unwrap();
        assert_eq!(out.collected.len(), 2);
        assert!(out.completed);
    }

    #[test]
    fn ordered_drain_picks_global_minimum_key_each_step() {
        let key = FunctionValue::parse("t: t").unwrap();
        let state = MergeState::new(&workers(2), Some(Arc::new(key)));

        state.buffers[0].add(Tuple::new(vec![Value::Int(0), Value::Int(1)]), Some(&Value::Int(1))).unwrap();
        state.buffers[0].add(Tuple::new(vec![Value::Int(0), Value::Int(5)]), Some(&Value::Int(5))).unwrap();
        state.buffers[0].mark_done();

        state.buffers[1].add(Tuple::new(vec![Value::Int(1), Value::Int(2)]), Some(&Value::Int(2))).unwrap();
        state.buffers[1].add(Tuple::new(vec![Value::Int(1), Value::Int(9)]), Some(&Value::Int(9))).unwrap();
        state.buffers[1].mark_done();

        let mut out = CollectingReceiver::default();
        drain_ordered(&state, &mut out).unwrap();

        let keys: Vec<i64> = out
            .collected
            .iter()
            .map(|t| match &t.elements()[1] {
                Value::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![1, 2, 5, 9]);
    }

    #[test]
    fn ordering_violation_is_rejected() {
        let buffer = SourceBuffer::new(0);
        buffer.add(Tuple::from_scalar(3i64), Some(&Value::Int(3))).unwrap();
        let err = buffer.add(Tuple::from_scalar(1i64), Some(&Value::Int(1))).unwrap_err();
        assert!(matches!(err, EngineError::MergeOrdering { .. }));
    }
}
