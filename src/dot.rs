//! Dot-product multiply kernel
//!
//! Computes each output cell independently: `c_ij = ⊕_k A(i,k) ⊗ B(k,j)`
//! by a two-pointer merge of row `i` of `A` against column `j` of `B`. Row
//! access comes from a materialized `A^T` (or from `A` itself when the
//! caller is multiplying a transposed `A`), so both sides of the merge are
//! sorted index vectors.
//!
//! Candidates are `(i, j) ∈ pattern(M)` when a mask is given — the kernel
//! requires a non-complemented mask — and the full cross product of
//! non-empty rows of `A` and columns of `B` otherwise. A cell whose merge
//! finds no common `k` is an implicit zero and is never stored. Monoids
//! with an absorbing element stop a merge early on reaching it.

#![allow(missing_docs)]

use crate::catalog::{Scalar, SemiringOps};
use crate::mask::Mask;
use crate::matrix::Matrix;
use crate::scheduler::{assemble, partition_ptr, run_chunks, ChunkCols};
use crate::{Context, Result};

/// Call convention of the dot kernel.
pub struct DotArgs<'a, A: Scalar> {
    /// Non-complemented mask; its pattern is the candidate set.
    pub mask: Option<&'a Mask<'a>>,
    /// `A^T` in by-column storage: vector `i` is row `i` of `A`.
    pub at: &'a Matrix<A>,
    pub b: &'a Matrix<A>,
    pub flipxy: bool,
    pub ctx: &'a Context,
}

/// Run the kernel, returning the freshly allocated product
/// (`at.ncols() × b.ncols()`).
pub(crate) fn apply<A, Z, S>(s: S, args: DotArgs<'_, A>) -> Result<Matrix<Z>>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let DotArgs {
        mask,
        at,
        b,
        flipxy,
        ctx,
    } = args;
    let m = at.ncols();
    let n = b.ncols();
    match mask {
        Some(mk) => {
            debug_assert!(!mk.is_complement());
            let view = mk.view();
            let ranges = partition_ptr(view.ptrs(), ctx.nthreads());
            let chunks = run_chunks(ctx, ranges, |r| {
                let est = view.ptrs()[r.end] - view.ptrs()[r.start];
                let mut out = ChunkCols::with_capacity(r.clone(), est)?;
                for slot in r {
                    let j = view.slot_major(slot);
                    emit_masked_col(&s, &mut out, mk, j, at, b, flipxy);
                    out.close_col();
                }
                Ok(out)
            })?;
            assemble(m, n, chunks, |slot| view.slot_major(slot))
        }
        None => {
            let ranges = partition_ptr(b.ptrs(), ctx.nthreads());
            let chunks = run_chunks(ctx, ranges, |r| {
                let est = at.nvec().min(16) * r.len();
                let mut out = ChunkCols::with_capacity(r.clone(), est)?;
                for slot in r {
                    let (brows, bvals) = slot_slices(b, slot);
                    if !brows.is_empty() {
                        for aslot in 0..at.nvec() {
                            let i = at.slot_major(aslot) as i64;
                            let (arows, avals) = slot_slices(at, aslot);
                            if let Some(v) = dot_cell(&s, arows, avals, brows, bvals, flipxy) {
                                out.push(i, v);
                            }
                        }
                    }
                    out.close_col();
                }
                Ok(out)
            })?;
            assemble(m, n, chunks, |slot| b.slot_major(slot))
        }
    }
}

fn emit_masked_col<A, Z, S>(
    s: &S,
    out: &mut ChunkCols<Z>,
    mk: &Mask<'_>,
    j: usize,
    at: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
) where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let Some(bslot) = b.find_slot(j) else { return };
    let (brows, bvals) = slot_slices(b, bslot);
    if brows.is_empty() {
        return;
    }
    let col = mk.col(j);
    for i in col.permitted() {
        let Some(aslot) = at.find_slot(i as usize) else {
            continue;
        };
        let (arows, avals) = slot_slices(at, aslot);
        if let Some(v) = dot_cell(s, arows, avals, brows, bvals, flipxy) {
            out.push(i, v);
        }
    }
}

#[inline]
fn slot_slices<A: Scalar>(m: &Matrix<A>, slot: usize) -> (&[i64], &[A]) {
    let r = m.slot_range(slot);
    (&m.rows()[r.clone()], &m.vals()[r])
}

/// Two-pointer merge over aligned sorted index vectors. Equal indices
/// multiply and fold; `None` means no common index was found (the cell is
/// the monoid's implicit zero).
fn dot_cell<A, Z, S>(
    s: &S,
    arows: &[i64],
    avals: &[A],
    brows: &[i64],
    bvals: &[A],
    flipxy: bool,
) -> Option<Z>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let mut pa = 0;
    let mut pb = 0;
    let mut acc: Option<Z> = None;
    let terminal = s.terminal();
    while pa < arows.len() && pb < brows.len() {
        match arows[pa].cmp(&brows[pb]) {
            std::cmp::Ordering::Less => pa += 1,
            std::cmp::Ordering::Greater => pb += 1,
            std::cmp::Ordering::Equal => {
                let t = s.times(avals[pa], bvals[pb], flipxy);
                let v = match acc {
                    None => t,
                    Some(prev) => s.fold(prev, t),
                };
                if terminal == Some(v) {
                    return Some(v);
                }
                acc = Some(v);
                pa += 1;
                pb += 1;
            }
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ops, Rig};
    use crate::mask::MaskView;

    #[test]
    fn masked_diagonal_int32() {
        // A = I_3, B = diag(1,2,3), M diagonal: C = diag(1,2,3)
        let a = Matrix::from_tuples(3, 3, &[(0, 0, 1), (1, 1, 1), (2, 2, 1)], None).unwrap();
        let b = Matrix::from_tuples(3, 3, &[(0, 0, 1), (1, 1, 2), (2, 2, 3)], None).unwrap();
        let mmat =
            Matrix::from_tuples(3, 3, &[(0, 0, true), (1, 1, true), (2, 2, true)], None).unwrap();
        let view = MaskView::new(&mmat).unwrap();
        let mask = Mask::new(&view);
        let at = a.transpose().unwrap();
        let ctx = Context::serial();
        let c: Matrix<i32> = apply(
            Rig::<ops::Plus, ops::Times>::default(),
            DotArgs {
                mask: Some(&mask),
                at: &at,
                b: &b,
                flipxy: false,
                ctx: &ctx,
            },
        )
        .unwrap();
        assert_eq!(
            c.extract_tuples().unwrap(),
            vec![(0, 0, 1), (1, 1, 2), (2, 2, 3)]
        );
    }

    #[test]
    fn unmasked_matches_direct_product() {
        let a = Matrix::from_tuples(2, 3, &[(0, 0, 2i64), (1, 1, 3), (0, 2, 4)], None).unwrap();
        let b = Matrix::from_tuples(3, 2, &[(0, 0, 1), (1, 0, 10), (2, 1, 100)], None).unwrap();
        let at = a.transpose().unwrap();
        let ctx = Context::serial();
        let c: Matrix<i64> = apply(
            Rig::<ops::Plus, ops::Times>::default(),
            DotArgs {
                mask: None,
                at: &at,
                b: &b,
                flipxy: false,
                ctx: &ctx,
            },
        )
        .unwrap();
        // C = [[2, 400], [30, 0]]
        assert_eq!(
            c.extract_tuples().unwrap(),
            vec![(0, 0, 2), (1, 0, 30), (0, 1, 400)]
        );
    }

    #[test]
    fn empty_intersection_stays_implicit() {
        let a = Matrix::from_tuples(1, 2, &[(0, 0, 1i32)], None).unwrap();
        let b = Matrix::from_tuples(2, 1, &[(1, 0, 1)], None).unwrap();
        let at = a.transpose().unwrap();
        let ctx = Context::serial();
        let c: Matrix<i32> = apply(
            Rig::<ops::Plus, ops::Times>::default(),
            DotArgs {
                mask: None,
                at: &at,
                b: &b,
                flipxy: false,
                ctx: &ctx,
            },
        )
        .unwrap();
        assert_eq!(c.nvals(), 0);
    }

    #[test]
    fn terminal_short_circuits_lor() {
        let a = Matrix::from_tuples(1, 3, &[(0, 0, true), (0, 1, true), (0, 2, true)], None)
            .unwrap();
        let b = Matrix::from_tuples(3, 1, &[(0, 0, true), (1, 0, true), (2, 0, true)], None)
            .unwrap();
        let at = a.transpose().unwrap();
        let ctx = Context::serial();
        let c: Matrix<bool> = apply(
            Rig::<ops::Lor, ops::Land>::default(),
            DotArgs {
                mask: None,
                at: &at,
                b: &b,
                flipxy: false,
                ctx: &ctx,
            },
        )
        .unwrap();
        assert_eq!(c.extract_tuples().unwrap(), vec![(0, 0, true)]);
    }
}
