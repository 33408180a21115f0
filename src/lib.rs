//! Crate root: public surface, status codes, and engine-wide invariants
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It centralizes the status enumeration, the per-call
//! configuration object, and re-exports the main submodules.
//!
//! `sparsering` multiplies sparse matrices over an arbitrary *semiring*
//! `(⊕, ⊗, 0̃)`: `⊕` a commutative monoid with identity `0̃`, `⊗` a binary
//! operator whose output lands in the monoid's domain. Three interchangeable
//! kernels realize `C⟨M⟩ = A ⊕.⊗ B`:
//!
//! - **Gustavson (saxpy)** — per-column dense accumulator with a monotone
//!   mark vector (the [`sauna::Sauna`] workspace), for dense-enough `B`;
//! - **dot-product** — per-output-cell two-pointer merge of a row of `A`
//!   against a column of `B`, for sparse masks and very sparse operands;
//! - **heap-merge** — K-way merge of the active columns of `A` through a
//!   stable min-heap, for `B` with small per-column fill.
//!
//! ## Invariants
//!
//! - **Canonical form.** Every structural read sees matrices satisfying the
//!   store invariants (strictly increasing row indices per column, no
//!   zombies, no pending tuples). Mutation may leave a matrix dirty; callers
//!   restore canonical form with [`Matrix::finalize`] before reading.
//!
//! - **No torn output.** Kernels assemble their result fully before the
//!   caller's `C` is touched; any failure (including allocation failure in a
//!   worker thread) aborts the multiply with `C` unchanged.
//!
//! - **Ordering.** Within one output column entries are emitted in strictly
//!   ascending row order. Across columns no order is assumed; a multiply is
//!   parallel along the column axis of the output. Floating-point monoids
//!   may reassociate, so `fp32`/`fp64` results can vary bitwise with the
//!   thread count.
//!
//! - **No unsafe.** The crate forbids `unsafe` throughout; runtime monomorph
//!   selection uses `Any`-based downcasts, never transmutes.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

use thiserror::Error as ThisError;

/// Type, operator, monoid, and semiring catalog.
pub mod catalog;
/// CSC/hypersparse matrix container, zombies, pending tuples, finalization.
pub mod matrix;
/// Thread-exclusive Gustavson workspace (dense values + monotone marks).
pub mod sauna;
/// Type-erased mask views and the mask/accumulator merge layer.
pub mod mask;
/// Stable binary min-heap primitive and the heap-merge multiply kernel.
pub mod heap;
/// Gustavson (saxpy) multiply kernel.
pub mod saxpy;
/// Dot-product multiply kernel.
pub mod dot;
/// Monomorphized kernel bank and the generic slow path.
pub mod bank;
/// Planner: descriptor normalization, kernel selection, the `mxm` front door.
pub mod planner;
/// Parallel-over-columns harness: partitioning, fan-out, chunk assembly.
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use bank::KernelBank;
pub use catalog::{Accum, BinOpCode, CustomOps, MonoidCode, Ring, Scalar, Semiring, TypeCode};
pub use heap::MinHeap;
pub use mask::{Mask, MaskView};
pub use matrix::{Format, Matrix};
pub use planner::{mxm, mxm_dot, mxm_gustavson, mxm_heap, Descriptor};
pub use sauna::{Sauna, SaunaPool};

/// Status codes surfaced by the engine. `Ok(_)` is the success case; every
/// other outcome of the status contract is a variant here.
#[derive(Debug, Clone, Copy, PartialEq, ThisError)]
pub enum Error {
    /// A lookup hit an implicit zero (no stored entry at the position).
    #[error("no entry at the requested position")]
    NoValue,
    /// An object was used before it was initialized.
    #[error("object has not been initialized")]
    UninitializedObject,
    /// A required argument was absent.
    #[error("required argument is missing")]
    NullPointer,
    /// An argument value violates the operation's contract.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    /// A row or column index is outside the matrix dimensions.
    #[error("index {index} out of range (bound {bound})")]
    InvalidIndex {
        /// The offending index.
        index: usize,
        /// The exclusive bound it violated.
        bound: usize,
    },
    /// Operator domains and operand types do not line up.
    #[error("domain mismatch: {0}")]
    DomainMismatch(&'static str),
    /// Operand shapes do not line up.
    #[error("dimension mismatch: {0}×{1} vs {2}×{3}")]
    DimensionMismatch(usize, usize, usize, usize),
    /// The output matrix must be empty for this entry point.
    #[error("output matrix is not empty")]
    OutputNotEmpty,
    /// An allocation failed; the operation was abandoned with no partial
    /// writes observable in the output.
    #[error("out of memory")]
    OutOfMemory,
    /// A caller-supplied scratch buffer is too small.
    #[error("insufficient scratch space: {required} slots required")]
    InsufficientSpace {
        /// The capacity the call needed.
        required: usize,
    },
    /// A tuple index is outside the target dimensions (build/import path).
    #[error("tuple index {index} out of bounds (bound {bound})")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// The exclusive bound it violated.
        bound: usize,
    },
    /// An internal invariant was violated. Fatal; not recoverable.
    #[error("internal invariant violated: {0}")]
    Panic(&'static str),
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Allocate a `Vec` with `cap` reserved slots, surfacing allocation failure
/// as [`Error::OutOfMemory`] instead of aborting the process.
pub(crate) fn try_vec<T>(cap: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(cap).map_err(|_| Error::OutOfMemory)?;
    Ok(v)
}

/// Per-call configuration, built once per outer call chain and threaded
/// through every kernel: the worker thread count plus the planner/store
/// tunables.
pub struct Context {
    nthreads: usize,
    pool: Option<rayon::ThreadPool>,
    /// Mask density below which the planner prefers the dot kernel.
    pub tau_mask: f64,
    /// Largest per-column fill of `B` for which the heap kernel is used.
    pub tau_heap: usize,
    /// Empty-column fraction beyond which finalize promotes to hypersparse.
    pub hyper_ratio: f64,
}

impl Context {
    /// Default mask-density threshold for the dot kernel.
    pub const DEFAULT_TAU_MASK: f64 = 0.02;
    /// Default `bjnz_max` bound for the heap kernel.
    pub const DEFAULT_TAU_HEAP: usize = 8;
    /// Default hypersparse promotion threshold.
    pub const DEFAULT_HYPER_RATIO: f64 = 1.0 / 16.0;

    /// A fully serial context: no thread pool is constructed.
    pub fn serial() -> Self {
        Context {
            nthreads: 1,
            pool: None,
            tau_mask: Self::DEFAULT_TAU_MASK,
            tau_heap: Self::DEFAULT_TAU_HEAP,
            hyper_ratio: Self::DEFAULT_HYPER_RATIO,
        }
    }

    /// A context running multiplies on `nthreads` workers.
    pub fn with_threads(nthreads: usize) -> Result<Self> {
        if nthreads == 0 {
            return Err(Error::InvalidValue("nthreads must be positive"));
        }
        let pool = if nthreads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(nthreads)
                    .build()
                    .map_err(|_| Error::InvalidValue("thread pool construction failed"))?,
            )
        } else {
            None
        };
        Ok(Context {
            nthreads,
            pool,
            tau_mask: Self::DEFAULT_TAU_MASK,
            tau_heap: Self::DEFAULT_TAU_HEAP,
            hyper_ratio: Self::DEFAULT_HYPER_RATIO,
        })
    }

    /// Worker thread count (1 means serial).
    #[inline]
    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    #[inline]
    pub(crate) fn pool(&self) -> Option<&rayon::ThreadPool> {
        self.pool.as_ref()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("nthreads", &self.nthreads)
            .field("tau_mask", &self.tau_mask)
            .field("tau_heap", &self.tau_heap)
            .field("hyper_ratio", &self.hyper_ratio)
            .finish()
    }
}
