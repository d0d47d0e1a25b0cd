use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Instant;

use super::history::{Operation, SequentialOp};

/// Outcome of a linearizability run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearizabilityResult {
    Success,
    Failure,
}

/// Per-worker recorder. Each call runs the real operation against the live
/// structure and stores its interval, observation and model step.
pub struct ThreadLog<'a, C, Seq, V> {
    concurrent: &'a C,
    operations: Vec<Operation<Seq, V>>,
}

impl<'a, C, Seq, V: Clone> ThreadLog<'a, C, Seq, V> {
    /// Record a value-carrying operation such as a push.
    pub fn log_val(
        &mut self,
        label: String,
        operation: fn(&C, V),
        argument: V,
        sequential: SequentialOp<Seq, V>,
    ) {
        let invoked = Instant::now();
        operation(self.concurrent, argument.clone());
        let returned = Instant::now();
        self.operations.push(Operation {
            invoked,
            returned,
            label,
            sequential,
            argument: Some(argument),
            result: None,
        });
    }

    /// Record a result-returning operation such as a pop.
    pub fn log(&mut self, label: &str, operation: fn(&C) -> Option<V>, sequential: SequentialOp<Seq, V>) {
        let invoked = Instant::now();
        let result = operation(self.concurrent);
        let returned = Instant::now();
        self.operations.push(Operation {
            invoked,
            returned,
            label: label.to_owned(),
            sequential,
            argument: None,
            result,
        });
    }
}

/// Drives `num_threads` workers against a shared concurrent structure, then
/// searches for a sequential order of the recorded operations that the
/// reference model accepts.
pub struct LinearizabilityTester<C, Seq, V> {
    num_threads: usize,
    concurrent: C,
    sequential: Seq,
    _result: std::marker::PhantomData<V>,
}

impl<C, Seq, V> LinearizabilityTester<C, Seq, V>
where
    C: Sync,
    Seq: Clone + Eq + Hash,
    V: Clone + Eq + Send,
{
    pub fn new(num_threads: usize, concurrent: C, sequential: Seq) -> Self {
        LinearizabilityTester {
            num_threads,
            concurrent,
            sequential,
            _result: std::marker::PhantomData,
        }
    }

    /// Run `worker` on every thread and check the merged history.
    pub fn run(&mut self, worker: fn(usize, &mut ThreadLog<C, Seq, V>)) -> LinearizabilityResult {
        let logs: Mutex<Vec<Vec<Operation<Seq, V>>>> = Mutex::new(Vec::new());
        let concurrent = &self.concurrent;
        let logs_ref = &logs;
        rayon::scope(|scope| {
            for id in 0..self.num_threads {
                scope.spawn(move |_| {
                    let mut log = ThreadLog {
                        concurrent,
                        operations: Vec::new(),
                    };
                    worker(id, &mut log);
                    logs_ref.lock().unwrap().push(log.operations);
                });
            }
        });

        let operations: Vec<Operation<Seq, V>> = logs
            .into_inner()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        if is_linearizable(&operations, self.sequential.clone()) {
            LinearizabilityResult::Success
        } else {
            LinearizabilityResult::Failure
        }
    }
}

/// Search for a witness order. An operation may be linearized next only if it
/// was invoked before every still-outstanding operation returned, and only if
/// the model reproduces its observed result. Visited (chosen-set, model-state)
/// configurations are memoized so equivalent interleavings are explored once.
pub fn is_linearizable<Seq, V>(operations: &[Operation<Seq, V>], initial: Seq) -> bool
where
    Seq: Clone + Eq + Hash,
    V: Clone + Eq,
{
    let mut done = vec![false; operations.len()];
    let mut visited = HashSet::new();
    search(operations, &mut done, &initial, &mut visited)
}

fn search<Seq, V>(
    operations: &[Operation<Seq, V>],
    done: &mut Vec<bool>,
    state: &Seq,
    visited: &mut HashSet<(Vec<bool>, Seq)>,
) -> bool
where
    Seq: Clone + Eq + Hash,
    V: Clone + Eq,
{
    if done.iter().all(|&linearized| linearized) {
        return true;
    }
    if !visited.insert((done.clone(), state.clone())) {
        return false;
    }

    let frontier = operations
        .iter()
        .zip(done.iter())
        .filter(|(_, &linearized)| !linearized)
        .map(|(operation, _)| operation.returned)
        .min()
        .expect("some operation remains");

    for index in 0..operations.len() {
        if done[index] {
            continue;
        }
        let operation = &operations[index];
        if operation.invoked > frontier {
            continue;
        }
        let (next_state, expected) = (operation.sequential)(state, operation.argument.clone());
        if expected == operation.result {
            done[index] = true;
            if search(operations, done, &next_state, visited) {
                return true;
            }
            done[index] = false;
        }
    }
    false
}
