//! Heap primitive and the heap-merge multiply kernel
//!
//! For a column `j` of `B`, every stored `(k, b_kj)` whose `A(:,k)` is
//! non-empty contributes a cursor into that column of `A`. A binary
//! min-heap keyed on the cursor's current row K-way-merges the
//! contributions: popping all entries that share the minimum row yields the
//! complete `⊕`-reduction for that output row, in ascending row order by
//! construction. Each popped cursor advances and reinserts while rows
//! remain.
//!
//! Ties on the row key break by insertion order (a monotone sequence
//! number), so the fold order is deterministic.
//!
//! Preferred when `B`'s largest column fill (`bjnz_max`) is small: the heap
//! never exceeds `bjnz_max` entries and no dense workspace is needed. All
//! scratch is caller-owned on the serial entry point.

#![allow(missing_docs)]

use crate::catalog::{Scalar, SemiringOps};
use crate::mask::Mask;
use crate::matrix::Matrix;
use crate::scheduler::{assemble, partition_ptr, run_chunks, ChunkCols};
use crate::{Context, Error, Result};

// ============================================================================
// Min-heap primitive
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    row: i64,
    seq: u64,
    slot: usize,
}

impl Entry {
    #[inline]
    fn key(&self) -> (i64, u64) {
        (self.row, self.seq)
    }
}

/// Binary min-heap keyed on row index, ties stable by insertion order.
/// Size is bounded by the `bjnz_max` of the multiply that drives it.
#[derive(Debug, Default)]
pub struct MinHeap {
    items: Vec<Entry>,
    next_seq: u64,
}

impl MinHeap {
    /// An empty heap with room for `cap` entries.
    pub fn with_capacity(cap: usize) -> Self {
        MinHeap {
            items: Vec::with_capacity(cap),
            next_seq: 0,
        }
    }

    /// Remove all entries and reset the insertion counter.
    pub fn clear(&mut self) {
        self.items.clear();
        self.next_seq = 0;
    }

    /// Current entry count.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no entries are queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert a cursor identified by `slot` at key `row`.
    pub fn push(&mut self, row: i64, slot: usize) {
        let e = Entry {
            row,
            seq: self.next_seq,
            slot,
        };
        self.next_seq += 1;
        self.items.push(e);
        self.sift_up(self.items.len() - 1);
    }

    /// The minimum row currently queued.
    #[inline]
    pub fn peek_row(&self) -> Option<i64> {
        self.items.first().map(|e| e.row)
    }

    /// Pop the minimum entry as `(row, slot)`.
    pub fn pop(&mut self) -> Option<(i64, usize)> {
        let n = self.items.len();
        if n == 0 {
            return None;
        }
        self.items.swap(0, n - 1);
        let top = self.items.pop()?;
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        Some((top.row, top.slot))
    }

    fn sift_up(&mut self, mut at: usize) {
        while at > 0 {
            let parent = (at - 1) / 2;
            if self.items[at].key() < self.items[parent].key() {
                self.items.swap(at, parent);
                at = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut at: usize) {
        let n = self.items.len();
        loop {
            let (l, r) = (2 * at + 1, 2 * at + 2);
            let mut best = at;
            if l < n && self.items[l].key() < self.items[best].key() {
                best = l;
            }
            if r < n && self.items[r].key() < self.items[best].key() {
                best = r;
            }
            if best == at {
                break;
            }
            self.items.swap(at, best);
            at = best;
        }
    }
}

// ============================================================================
// Heap-merge kernel
// ============================================================================

/// Call convention of the heap kernel with engine-allocated scratch.
pub struct HeapArgs<'a, A: Scalar> {
    pub mask: Option<&'a Mask<'a>>,
    pub a: &'a Matrix<A>,
    pub b: &'a Matrix<A>,
    pub flipxy: bool,
    /// Largest column fill of `B`; bounds every scratch structure.
    pub bjnz_max: usize,
    pub ctx: &'a Context,
}

/// Run the kernel with internally allocated per-worker scratch, returning
/// the freshly allocated product.
pub(crate) fn apply<A, Z, S>(s: S, args: HeapArgs<'_, A>) -> Result<Matrix<Z>>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let HeapArgs {
        mask,
        a,
        b,
        flipxy,
        bjnz_max,
        ctx,
    } = args;
    let m = a.nrows();
    let n = b.ncols();
    let ranges = partition_ptr(b.ptrs(), ctx.nthreads());
    let chunks = run_chunks(ctx, ranges, |r| {
        let mut list: Vec<A> = Vec::with_capacity(bjnz_max);
        let mut pa_pair: Vec<(usize, usize)> = Vec::with_capacity(bjnz_max);
        let mut heap = MinHeap::with_capacity(bjnz_max);
        heap_chunk(
            &s, r, a, b, mask, flipxy, &mut list, &mut pa_pair, &mut heap, bjnz_max,
        )
    })?;
    assemble(m, n, chunks, |slot| b.slot_major(slot))
}

/// Arguments of the serial, caller-owned-scratch variant: `list` and
/// `pa_pair` hold the active `B`-column values and the `A`-column cursor
/// pairs, both bounded by `bjnz_max`.
pub struct HeapScratchArgs<'a, A: Scalar> {
    pub mask: Option<&'a Mask<'a>>,
    pub a: &'a Matrix<A>,
    pub b: &'a Matrix<A>,
    pub flipxy: bool,
    pub list: &'a mut Vec<A>,
    pub pa_pair: &'a mut Vec<(usize, usize)>,
    pub heap: &'a mut MinHeap,
    pub bjnz_max: usize,
}

/// Run the kernel serially over caller-owned scratch.
pub(crate) fn apply_scratch<A, Z, S>(s: S, args: HeapScratchArgs<'_, A>) -> Result<Matrix<Z>>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let HeapScratchArgs {
        mask,
        a,
        b,
        flipxy,
        list,
        pa_pair,
        heap,
        bjnz_max,
    } = args;
    let chunk = heap_chunk(
        &s,
        0..b.nvec(),
        a,
        b,
        mask,
        flipxy,
        list,
        pa_pair,
        heap,
        bjnz_max,
    )?;
    assemble(a.nrows(), b.ncols(), vec![chunk], |slot| b.slot_major(slot))
}

#[allow(clippy::too_many_arguments)]
fn heap_chunk<A, Z, S>(
    s: &S,
    slots: std::ops::Range<usize>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    mask: Option<&Mask<'_>>,
    flipxy: bool,
    list: &mut Vec<A>,
    pa_pair: &mut Vec<(usize, usize)>,
    heap: &mut MinHeap,
    bjnz_max: usize,
) -> Result<ChunkCols<Z>>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let est = b.ptrs()[slots.end] - b.ptrs()[slots.start];
    let mut out = ChunkCols::with_capacity(slots.clone(), est)?;
    for slot in slots {
        let j = b.slot_major(slot);
        let brange = b.slot_range(slot);
        let bjnz = brange.len();
        if bjnz > bjnz_max {
            return Err(Error::InsufficientSpace { required: bjnz });
        }
        heap.clear();
        list.clear();
        pa_pair.clear();
        for rb in brange {
            let k = b.rows()[rb] as usize;
            let Some(aslot) = a.find_slot(k) else { continue };
            let r = a.slot_range(aslot);
            if r.is_empty() {
                continue;
            }
            let cursor = list.len();
            list.push(b.vals()[rb]);
            pa_pair.push((r.start, r.end));
            heap.push(a.rows()[r.start], cursor);
        }
        let mut mcol = mask.map(|mk| mk.col(j));
        while let Some(i) = heap.peek_row() {
            let mut acc: Option<Z> = None;
            while heap.peek_row() == Some(i) {
                let Some((_, cursor)) = heap.pop() else { break };
                let (pa, pa_end) = pa_pair[cursor];
                let t = s.times(a.vals()[pa], list[cursor], flipxy);
                acc = Some(match acc {
                    None => t,
                    Some(prev) => s.fold(prev, t),
                });
                let next = pa + 1;
                pa_pair[cursor] = (next, pa_end);
                if next < pa_end {
                    heap.push(a.rows()[next], cursor);
                }
            }
            let allowed = match &mut mcol {
                None => true,
                Some(mc) => mc.allows(i),
            };
            if allowed {
                if let Some(v) = acc {
                    out.push(i, v);
                }
            }
        }
        out.close_col();
    }
    Ok(out)
}
