//! Parallel-over-columns harness
//!
//! A multiply divides the vectors of `B` (or of the mask) into contiguous
//! chunks, runs one kernel invocation per chunk, and stitches the chunk
//! outputs into a single canonical matrix. Partitioning is balanced by
//! stored-entry count rather than column count, using the pointer array
//! that is already at hand.
//!
//! Error propagation: chunk results are collected as `Result`s, so the
//! first failing worker aborts the whole multiply before any output matrix
//! exists — no partial result is ever observable.

#![allow(missing_docs)]

use std::ops::Range;

use rayon::prelude::*;
use tracing::debug;

use crate::catalog::Scalar;
use crate::matrix::Matrix;
use crate::{try_vec, Context, Result};

/// Output columns produced by one kernel chunk: a local pointer vector over
/// `slots` plus the rows/values emitted, ascending within each column.
pub(crate) struct ChunkCols<Z> {
    pub slots: Range<usize>,
    pub p: Vec<usize>,
    pub i: Vec<i64>,
    pub x: Vec<Z>,
}

impl<Z> ChunkCols<Z> {
    pub(crate) fn with_capacity(slots: Range<usize>, est: usize) -> Result<Self> {
        let ncols = slots.len();
        let mut p = try_vec(ncols + 1)?;
        p.push(0);
        Ok(ChunkCols {
            slots,
            p,
            i: try_vec(est)?,
            x: try_vec(est)?,
        })
    }

    #[inline]
    pub(crate) fn push(&mut self, row: i64, v: Z) {
        self.i.push(row);
        self.x.push(v);
    }

    /// Close the current output column.
    #[inline]
    pub(crate) fn close_col(&mut self) {
        self.p.push(self.i.len());
    }
}

/// Split `[0, nvec)` into at most `nchunks` contiguous ranges with roughly
/// equal stored-entry counts, judged by the pointer array `p`.
pub(crate) fn partition_ptr(p: &[usize], nchunks: usize) -> Vec<Range<usize>> {
    let nvec = p.len() - 1;
    if nvec == 0 {
        return Vec::new();
    }
    let nnz = p[nvec];
    let nchunks = nchunks.clamp(1, nvec);
    if nchunks == 1 || nnz == 0 {
        return vec![0..nvec];
    }
    let mut cuts = vec![0usize];
    for k in 1..nchunks {
        let target = nnz * k / nchunks;
        let s = p.partition_point(|&e| e < target).min(nvec);
        let prev = *cuts.last().unwrap_or(&0);
        cuts.push(s.max(prev));
    }
    cuts.push(nvec);
    cuts.windows(2)
        .map(|w| w[0]..w[1])
        .filter(|r| !r.is_empty())
        .collect()
}

/// Run `f` over every range, in parallel when the context owns a pool.
/// The first `Err` aborts the collection.
pub(crate) fn run_chunks<R, F>(ctx: &Context, ranges: Vec<Range<usize>>, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Range<usize>) -> Result<R> + Sync + Send,
{
    debug!(chunks = ranges.len(), threads = ctx.nthreads(), "fan-out");
    match ctx.pool() {
        None => ranges.into_iter().map(f).collect(),
        Some(pool) => pool.install(|| ranges.into_par_iter().map(f).collect()),
    }
}

/// Stitch chunk outputs into one canonical non-hypersparse `ByCol` matrix.
/// `major_of` maps a global slot index to its output column; slots ascend
/// across the concatenated chunks, so data lands in column-major order by
/// plain concatenation.
pub(crate) fn assemble<Z: Scalar>(
    nrows: usize,
    ncols: usize,
    chunks: Vec<ChunkCols<Z>>,
    major_of: impl Fn(usize) -> usize,
) -> Result<Matrix<Z>> {
    let nnz: usize = chunks.iter().map(|c| c.i.len()).sum();
    let mut p: Vec<usize> = try_vec(ncols + 1)?;
    p.resize(ncols + 1, 0);
    for ch in &chunks {
        for (k, s) in ch.slots.clone().enumerate() {
            p[major_of(s) + 1] = ch.p[k + 1] - ch.p[k];
        }
    }
    for j in 0..ncols {
        p[j + 1] += p[j];
    }
    let mut i: Vec<i64> = try_vec(nnz)?;
    let mut x: Vec<Z> = try_vec(nnz)?;
    for ch in chunks {
        i.extend_from_slice(&ch.i);
        x.extend(ch.x);
    }
    Ok(Matrix::from_csc_parts(nrows, ncols, p, i, x))
}
