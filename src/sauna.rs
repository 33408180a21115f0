//! Gustavson workspace ("sauna")
//!
//! The saxpy kernel accumulates one output column at a time into a dense
//! buffer of length `m`. Clearing that buffer per column would cost `O(m)`
//! per column and sink the algorithm; instead a parallel *mark* vector and a
//! monotone counter `hiwater` define presence: row `i` holds a live value
//! iff `mark[i] == hiwater`. Entering a new column bumps `hiwater`, which
//! retires every stale value at once. The mark vector is memset only when
//! `hiwater` would overflow, so per-column setup is `O(nnz of the produced
//! column)`.
//!
//! A [`SaunaPool`] hands thread-exclusive workspaces to the parallel
//! scheduler; it grows at most to the number of concurrently active
//! workers.

use std::sync::Mutex;

use crate::catalog::Scalar;

/// A thread-exclusive dense accumulator: values plus monotone marks.
#[derive(Debug)]
pub struct Sauna<T: Scalar> {
    work: Vec<T>,
    mark: Vec<i64>,
    hiwater: i64,
}

impl<T: Scalar> Sauna<T> {
    /// A workspace covering `len` rows. `fill` seeds the value buffer; it is
    /// never observable (values are read only while marked).
    pub fn new(len: usize, fill: T) -> Self {
        Sauna {
            work: vec![fill; len],
            mark: vec![0; len],
            hiwater: 0,
        }
    }

    /// Number of rows covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.work.len()
    }

    /// True when the workspace covers zero rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.work.is_empty()
    }

    /// Grow to cover at least `len` rows; existing marks stay valid.
    pub fn ensure(&mut self, len: usize, fill: T) {
        if self.work.len() < len {
            self.work.resize(len, fill);
            self.mark.resize(len, 0);
        }
    }

    /// Start a new output column: every previously marked row goes stale in
    /// O(1). Wraps with a full memset only when the counter would overflow.
    #[inline]
    pub fn next_column(&mut self) {
        if self.hiwater == i64::MAX {
            self.mark.fill(0);
            self.hiwater = 1;
        } else {
            self.hiwater += 1;
        }
    }

    /// Whether row `i` holds a live value for the current column.
    #[inline]
    pub fn is_marked(&self, i: usize) -> bool {
        self.mark[i] == self.hiwater
    }

    /// Read the live value at row `i`. Meaningful only when marked.
    #[inline]
    pub fn value(&self, i: usize) -> T {
        self.work[i]
    }

    /// Write row `i` and mark it live for the current column.
    #[inline]
    pub fn mark_set(&mut self, i: usize, v: T) {
        self.work[i] = v;
        self.mark[i] = self.hiwater;
    }

    /// Overwrite an already-marked row.
    #[inline]
    pub fn update(&mut self, i: usize, v: T) {
        debug_assert!(self.is_marked(i));
        self.work[i] = v;
    }

    #[cfg(test)]
    pub(crate) fn hiwater(&self) -> i64 {
        self.hiwater
    }

    #[cfg(test)]
    pub(crate) fn set_hiwater(&mut self, v: i64) {
        self.hiwater = v;
    }
}

/// A bounded pool of workspaces shared by the workers of one multiply.
/// Acquisition either reuses a returned workspace (growing it if the
/// request is larger) or creates a fresh one; concurrency bounds the pool
/// at the worker count.
#[derive(Debug)]
pub struct SaunaPool<T: Scalar> {
    slots: Mutex<Vec<Sauna<T>>>,
}

impl<T: Scalar> SaunaPool<T> {
    /// An empty pool.
    pub fn new() -> Self {
        SaunaPool {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Take a workspace covering at least `len` rows.
    pub fn acquire(&self, len: usize, fill: T) -> Sauna<T> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.pop() {
            Some(mut s) => {
                s.ensure(len, fill);
                s
            }
            None => Sauna::new(len, fill),
        }
    }

    /// Return a workspace for reuse.
    pub fn release(&self, sauna: Sauna<T>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.push(sauna);
    }
}

impl<T: Scalar> Default for SaunaPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
