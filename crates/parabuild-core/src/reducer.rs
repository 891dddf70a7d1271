//! Per-worker reduction of task outputs.
//!
//! Every worker creates its own reducer through a [`ReducerFactory`] when it
//! starts, folds each successful task output into it, and hands the finished
//! value back exactly once when it shuts down. Reducer state is never shared
//! between workers, so a reducer only ever sees the outputs of one worker in
//! that worker's pull order.

use std::ops::AddAssign;

/// Stateful fold over the outputs of one worker.
pub trait Reducer<T> {
    /// Terminal value delivered at worker shutdown.
    type Output: Send + 'static;

    /// Fold one task output into the accumulator.
    fn fold(&mut self, value: T);

    /// Consume the reducer and produce the terminal value.
    fn finish(self) -> Self::Output;
}

/// Creates a fresh reducer for each worker.
///
/// Implemented for every `Fn() -> R` closure, so `Collect::default` or
/// `|| fold(0, |acc, x| *acc += x)` can be passed directly.
pub trait ReducerFactory<T>: Send + Sync + 'static {
    type Reducer: Reducer<T>;

    fn create(&self) -> Self::Reducer;
}

impl<T, F, R> ReducerFactory<T> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Reducer<T>,
{
    type Reducer = R;

    fn create(&self) -> R {
        self()
    }
}

/// Appends every output to a `Vec`, preserving per-worker order.
#[derive(Debug)]
pub struct Collect<T> {
    items: Vec<T>,
}

impl<T> Default for Collect<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Send + 'static> Reducer<T> for Collect<T> {
    type Output = Vec<T>;

    fn fold(&mut self, value: T) {
        self.items.push(value);
    }

    fn finish(self) -> Vec<T> {
        self.items
    }
}

/// Running sum of the outputs; a worker with no tasks yields `T::default()`.
#[derive(Debug)]
pub struct Sum<T> {
    total: T,
}

impl<T: Default> Default for Sum<T> {
    fn default() -> Self {
        Self {
            total: T::default(),
        }
    }
}

impl<T> Reducer<T> for Sum<T>
where
    T: AddAssign + Send + 'static,
{
    type Output = T;

    fn fold(&mut self, value: T) {
        self.total += value;
    }

    fn finish(self) -> T {
        self.total
    }
}

/// Reducer built from an initial accumulator and a closure.
pub struct Fold<A, F> {
    acc: A,
    step: F,
}

/// Build a [`Fold`] reducer starting from `init`.
pub fn fold<A, F>(init: A, step: F) -> Fold<A, F> {
    Fold { acc: init, step }
}

impl<A, T, F> Reducer<T> for Fold<A, F>
where
    A: Send + 'static,
    F: FnMut(&mut A, T),
{
    type Output = A;

    fn fold(&mut self, value: T) {
        (self.step)(&mut self.acc, value);
    }

    fn finish(self) -> A {
        self.acc
    }
}
