//! Gustavson (saxpy) multiply kernel
//!
//! For each column `j` of `B`, accumulates `⊕_k A(:,k) ⊗ B(k,j)` into the
//! sauna's dense value buffer, using the monotone mark to tell first
//! touches (`⊗` result written, row recorded) from repeats (`⊕`-fold into
//! the live value). The gather phase then emits the live rows in strictly
//! ascending order, filtered by the mask:
//!
//! - no mask: sort the touched-row list and emit it;
//! - plain mask: walk the mask column and emit the permitted rows that are
//!   live — the mark makes each membership test O(1);
//! - complemented mask: sort the touched rows and drop the masked-out ones.
//!
//! Preferred when `B` is dense enough that a dense accumulator pays off and
//! a workspace of `A.nrows()` values is available.

#![allow(missing_docs)]

use crate::catalog::{Scalar, SemiringOps};
use crate::mask::Mask;
use crate::matrix::Matrix;
use crate::sauna::{Sauna, SaunaPool};
use crate::scheduler::{assemble, partition_ptr, run_chunks, ChunkCols};
use crate::{Context, Result};

/// Workspace source: a pool for the parallel path, a single caller-owned
/// sauna for the serial entry point.
pub enum SaunaSrc<'a, Z: Scalar> {
    Pool(&'a SaunaPool<Z>),
    Single(&'a mut Sauna<Z>),
}

/// Call convention of the Gustavson kernel; the kernel-bank tables take it
/// whole so every monomorphized row shares one shape.
pub struct SaxpyArgs<'a, A: Scalar, Z: Scalar> {
    pub c: &'a mut Matrix<Z>,
    pub mask: Option<&'a Mask<'a>>,
    pub a: &'a Matrix<A>,
    pub b: &'a Matrix<A>,
    pub flipxy: bool,
    pub sauna: SaunaSrc<'a, Z>,
    pub ctx: &'a Context,
}

/// Run the kernel, replacing `args.c`'s storage with the product. `c` must
/// be an empty `ByCol` matrix of dimension `a.nrows() × b.ncols()`; the
/// result is assembled fully before `c` is touched.
pub(crate) fn apply<A, Z, S>(s: S, args: SaxpyArgs<'_, A, Z>) -> Result<()>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let m = args.a.nrows();
    let n = args.b.ncols();
    let SaxpyArgs {
        c,
        mask,
        a,
        b,
        flipxy,
        sauna,
        ctx,
    } = args;
    let chunks = match sauna {
        SaunaSrc::Single(sauna) => {
            sauna.ensure(m, s.identity());
            vec![saxpy_chunk(&s, 0..b.nvec(), a, b, mask, flipxy, sauna)?]
        }
        SaunaSrc::Pool(pool) => {
            let ranges = partition_ptr(b.ptrs(), ctx.nthreads());
            run_chunks(ctx, ranges, |r| {
                let mut sauna = pool.acquire(m, s.identity());
                let out = saxpy_chunk(&s, r, a, b, mask, flipxy, &mut sauna);
                pool.release(sauna);
                out
            })?
        }
    };
    *c = assemble(m, n, chunks, |slot| b.slot_major(slot))?;
    Ok(())
}

fn saxpy_chunk<A, Z, S>(
    s: &S,
    slots: std::ops::Range<usize>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    mask: Option<&Mask<'_>>,
    flipxy: bool,
    sauna: &mut Sauna<Z>,
) -> Result<ChunkCols<Z>>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    let est = b.ptrs()[slots.end] - b.ptrs()[slots.start];
    let mut out = ChunkCols::with_capacity(slots.clone(), est)?;
    let mut touched: Vec<i64> = Vec::new();
    for slot in slots {
        let j = b.slot_major(slot);
        let mut mcol = mask.map(|mk| mk.col(j));
        if mcol.as_ref().is_some_and(|mc| mc.is_null()) {
            out.close_col();
            continue;
        }
        sauna.next_column();
        touched.clear();
        for rb in b.slot_range(slot) {
            let k = b.rows()[rb] as usize;
            let bkj = b.vals()[rb];
            let Some(aslot) = a.find_slot(k) else { continue };
            for ra in a.slot_range(aslot) {
                let i = a.rows()[ra] as usize;
                let t = s.times(a.vals()[ra], bkj, flipxy);
                if sauna.is_marked(i) {
                    let folded = s.fold(sauna.value(i), t);
                    sauna.update(i, folded);
                } else {
                    sauna.mark_set(i, t);
                    touched.push(i as i64);
                }
            }
        }
        match &mut mcol {
            None => {
                touched.sort_unstable();
                for &i in &touched {
                    out.push(i, sauna.value(i as usize));
                }
            }
            Some(mc) if !mc.complemented() => {
                for i in mc.permitted() {
                    let row = i as usize;
                    if row < sauna.len() && sauna.is_marked(row) {
                        out.push(i, sauna.value(row));
                    }
                }
            }
            Some(mc) => {
                touched.sort_unstable();
                for &i in &touched {
                    if mc.allows(i) {
                        out.push(i, sauna.value(i as usize));
                    }
                }
            }
        }
        out.close_col();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ops, Rig};
    use crate::mask::MaskView;

    fn run<A, Z, S>(
        s: S,
        a: &Matrix<A>,
        b: &Matrix<A>,
        mask: Option<&Mask<'_>>,
        flipxy: bool,
    ) -> Matrix<Z>
    where
        A: Scalar,
        Z: Scalar,
        S: SemiringOps<A, Out = Z>,
    {
        let ctx = Context::serial();
        let mut c = Matrix::new(a.nrows(), b.ncols());
        let mut sauna = Sauna::new(a.nrows(), s.identity());
        apply(
            s,
            SaxpyArgs {
                c: &mut c,
                mask,
                a,
                b,
                flipxy,
                sauna: SaunaSrc::Single(&mut sauna),
                ctx: &ctx,
            },
        )
        .unwrap();
        c
    }

    #[test]
    fn plus_times_fp64_dense_corner() {
        // A = [[1,2],[0,3]], B = [[4,0],[0,5]]  =>  C = [[4,10],[0,15]]
        let a =
            Matrix::from_tuples(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0)], None).unwrap();
        let b = Matrix::from_tuples(2, 2, &[(0, 0, 4.0), (1, 1, 5.0)], None).unwrap();
        let c: Matrix<f64> = run(Rig::<ops::Plus, ops::Times>::default(), &a, &b, None, false);
        assert_eq!(
            c.extract_tuples().unwrap(),
            vec![(0, 0, 4.0), (0, 1, 10.0), (1, 1, 15.0)]
        );
    }

    #[test]
    fn rows_emitted_in_ascending_order() {
        // contributions touch rows out of order; the gather must sort
        let a = Matrix::from_tuples(
            4,
            2,
            &[(3, 0, 1i64), (0, 0, 2), (2, 1, 3), (1, 1, 4)],
            None,
        )
        .unwrap();
        let b = Matrix::from_tuples(2, 1, &[(0, 0, 10), (1, 0, 100)], None).unwrap();
        let c: Matrix<i64> = run(Rig::<ops::Plus, ops::Times>::default(), &a, &b, None, false);
        let got = c.extract_tuples().unwrap();
        assert_eq!(
            got,
            vec![(0, 0, 20), (1, 0, 400), (2, 0, 300), (3, 0, 10)]
        );
    }

    #[test]
    fn valued_mask_filters_rows() {
        let a = Matrix::from_tuples(3, 3, &[(0, 0, 1), (1, 1, 1), (2, 2, 1)], None).unwrap();
        let b = a.dup();
        let mmat = Matrix::from_tuples(3, 3, &[(0, 0, 1u8), (1, 1, 0), (2, 2, 1)], None).unwrap();
        let view = MaskView::new(&mmat).unwrap();
        let mask = Mask::new(&view);
        let c: Matrix<i32> = run(
            Rig::<ops::Plus, ops::Times>::default(),
            &a,
            &b,
            Some(&mask),
            false,
        );
        // (1,1) is present in the mask but valued zero
        assert_eq!(c.extract_tuples().unwrap(), vec![(0, 0, 1), (2, 2, 1)]);
    }

    #[test]
    fn complemented_mask_inverts_the_filter() {
        let a = Matrix::from_tuples(2, 2, &[(0, 0, 1), (1, 0, 1), (0, 1, 1), (1, 1, 1)], None)
            .unwrap();
        let b = a.dup();
        let mmat = Matrix::from_tuples(2, 2, &[(0, 0, true), (1, 1, true)], None).unwrap();
        let view = MaskView::new(&mmat).unwrap();
        let mask = Mask::new(&view).complement();
        let c: Matrix<i32> = run(
            Rig::<ops::Plus, ops::Times>::default(),
            &a,
            &b,
            Some(&mask),
            false,
        );
        assert_eq!(c.extract_tuples().unwrap(), vec![(1, 0, 2), (0, 1, 2)]);
    }

    #[test]
    fn flipxy_swaps_operands_of_first() {
        // A(:,0) = {(0, 5.0)}, B(:,0) = {(0, 9.0)}:
        // first(a, b) = 5 unflipped, first(b, a) = 9 flipped.
        let a = Matrix::from_tuples(1, 1, &[(0, 0, 5.0f32)], None).unwrap();
        let b = Matrix::from_tuples(1, 1, &[(0, 0, 9.0f32)], None).unwrap();
        let rig = Rig::<ops::Min, ops::First>::default();
        let c: Matrix<f32> = run(rig, &a, &b, None, false);
        assert_eq!(c.extract_tuples().unwrap(), vec![(0, 0, 5.0)]);
        let c: Matrix<f32> = run(rig, &a, &b, None, true);
        assert_eq!(c.extract_tuples().unwrap(), vec![(0, 0, 9.0)]);
    }

    #[test]
    fn hypersparse_operands() {
        let a = Matrix::from_tuples(4, 100, &[(1, 40, 2i32), (3, 99, 5)], None).unwrap();
        let b = Matrix::from_tuples(100, 50, &[(40, 7, 10), (99, 7, 100)], None).unwrap();
        assert!(a.is_hyper() && b.is_hyper());
        let c: Matrix<i32> = run(Rig::<ops::Plus, ops::Times>::default(), &a, &b, None, false);
        assert_eq!(c.extract_tuples().unwrap(), vec![(1, 7, 20), (3, 7, 500)]);
    }
}
