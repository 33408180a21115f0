//! Planner / dispatcher
//!
//! The front door of a multiply. Given `(C, M, A, B, accum, semiring,
//! flipxy, descriptor)` the planner
//!
//! 1. validates the semiring against the operand types, the accumulator
//!    against the output type, and every shape;
//! 2. normalizes the descriptor — transpose flags and by-row operands
//!    materialize by-column views;
//! 3. selects a kernel: **dot** for a present, sparse, non-complemented
//!    mask; **heap** when `B`'s largest column fill stays under the heap
//!    threshold and no mask is given; **Gustavson** otherwise;
//! 4. dispatches through the kernel bank into a fresh intermediate `T`;
//! 5. merges `T` into `C` under the mask/accumulator/replace contract and
//!    finalizes `C`.
//!
//! Every check runs before `C` is touched; after the checks, the only
//! possible failure is allocation, which aborts with `C` unchanged.
//!
//! The per-kernel entry points (`mxm_gustavson`, `mxm_dot`, `mxm_heap`)
//! bypass steps 2–3 and 5: they run one kernel with caller-chosen
//! resources and apply the mask inside the kernel only.

use std::borrow::Cow;

use tracing::debug;

use crate::bank::{self, KernelBank};
use crate::catalog::{Accum, Scalar, Semiring};
use crate::heap::{HeapScratchArgs, MinHeap};
use crate::mask::{merge_into, Mask, MaskView};
use crate::matrix::{Format, Matrix};
use crate::sauna::{Sauna, SaunaPool};
use crate::saxpy::SaunaSrc;
use crate::{Context, Error, Result};

/// Descriptor flags of a multiply. All default to off.
#[derive(Debug, Clone, Copy, Default)]
pub struct Descriptor {
    /// Use `A^T` in place of `A`.
    pub transpose_a: bool,
    /// Use `B^T` in place of `B`.
    pub transpose_b: bool,
    /// Interpret the mask by pattern only.
    pub mask_structural: bool,
    /// Invert the mask.
    pub mask_complement: bool,
    /// Delete entries of `C` at masked-out positions.
    pub replace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Gustavson,
    Dot,
    Heap,
}

/// Masked matrix multiply with accumulator:
/// `C⟨M⟩ = C accum (A ⊕.⊗ B)`.
///
/// `A`, `B`, and the mask enter by shared reference and must be canonical
/// (finalize them first); `C` is finalized in place. With `flipxy` the
/// kernels evaluate `⊗(b, a)` instead of `⊗(a, b)` — meaningful for
/// non-commutative multiplies, a no-op hint otherwise.
#[allow(clippy::too_many_arguments)]
pub fn mxm<A: KernelBank, Z: Scalar>(
    c: &mut Matrix<Z>,
    mask: Option<&MaskView<'_>>,
    accum: Option<Accum<Z>>,
    semiring: &Semiring<A, Z>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    desc: &Descriptor,
    ctx: &Context,
) -> Result<()> {
    semiring.validate()?;
    let accum_fn = match accum {
        Some(acc) => Some(acc.resolve()?),
        None => None,
    };
    if !a.is_canonical() || !b.is_canonical() {
        return Err(Error::InvalidValue("finalize inputs before multiplying"));
    }
    c.finalize_with(ctx.hyper_ratio)?;

    // Normalize orientation; transposes materialize by-column views.
    let a_bycol = a.by_col()?;
    let b_bycol = b.by_col()?;
    let beff: Cow<'_, Matrix<A>> = if desc.transpose_b {
        Cow::Owned(b_bycol.transpose()?)
    } else {
        b_bycol
    };
    let (m, k1) = if desc.transpose_a {
        (a.ncols(), a.nrows())
    } else {
        (a.nrows(), a.ncols())
    };
    let (k2, n) = (beff.nrows(), beff.ncols());
    if k1 != k2 {
        return Err(Error::DimensionMismatch(m, k1, k2, n));
    }
    if c.nrows() != m || c.ncols() != n {
        return Err(Error::DimensionMismatch(c.nrows(), c.ncols(), m, n));
    }
    let mask_obj = mask.map(|view| {
        let mut mk = Mask::new(view);
        if desc.mask_structural {
            mk = mk.structural();
        }
        if desc.mask_complement {
            mk = mk.complement();
        }
        mk
    });
    if let Some(mk) = &mask_obj {
        let v = mk.view();
        if v.nrows() != m || v.ncols() != n {
            return Err(Error::DimensionMismatch(v.nrows(), v.ncols(), m, n));
        }
    }

    let bjnz_max = beff.max_vec_nnz();
    let method = match &mask_obj {
        Some(mk)
            if !mk.is_complement()
                && (mk.view().nvals() as f64) < ctx.tau_mask * (m as f64) * (n as f64) =>
        {
            Method::Dot
        }
        None if bjnz_max <= ctx.tau_heap => Method::Heap,
        _ => Method::Gustavson,
    };
    debug!(?method, bjnz_max, flipxy, m, n, "mxm: kernel selected");

    let t: Matrix<Z> = match method {
        Method::Dot => {
            // Row access to A: reuse A itself when the descriptor already
            // transposes it, otherwise materialize A^T.
            let at: Cow<'_, Matrix<A>> = if desc.transpose_a {
                a_bycol
            } else {
                Cow::Owned(a_bycol.transpose()?)
            };
            bank::dispatch_dot(semiring, mask_obj.as_ref(), &at, &beff, flipxy, ctx)?
        }
        Method::Heap => {
            let aeff: Cow<'_, Matrix<A>> = if desc.transpose_a {
                Cow::Owned(a_bycol.transpose()?)
            } else {
                a_bycol
            };
            bank::dispatch_heap(
                semiring,
                mask_obj.as_ref(),
                &aeff,
                &beff,
                flipxy,
                bjnz_max,
                ctx,
            )?
        }
        Method::Gustavson => {
            let aeff: Cow<'_, Matrix<A>> = if desc.transpose_a {
                Cow::Owned(a_bycol.transpose()?)
            } else {
                a_bycol
            };
            let pool = SaunaPool::new();
            let mut t = Matrix::new(m, n);
            bank::dispatch_saxpy(
                semiring,
                &mut t,
                mask_obj.as_ref(),
                &aeff,
                &beff,
                flipxy,
                SaunaSrc::Pool(&pool),
                ctx,
            )?;
            t
        }
    };

    if c.format() == Format::ByRow {
        let mut cw = c.by_col()?.into_owned();
        merge_into(&mut cw, &t, mask_obj.as_ref(), accum_fn, desc.replace)?;
        cw.finalize_with(ctx.hyper_ratio)?;
        *c = cw.into_by_row()?;
    } else {
        merge_into(c, &t, mask_obj.as_ref(), accum_fn, desc.replace)?;
        c.finalize_with(ctx.hyper_ratio)?;
    }
    Ok(())
}

fn check_kernel_operands<A: Scalar>(a: &Matrix<A>, b: &Matrix<A>) -> Result<(usize, usize)> {
    if !a.is_canonical() || !b.is_canonical() {
        return Err(Error::InvalidValue("finalize inputs before multiplying"));
    }
    if a.format() != Format::ByCol || b.format() != Format::ByCol {
        return Err(Error::InvalidValue("kernel operands must be by-column"));
    }
    if a.ncols() != b.nrows() {
        return Err(Error::DimensionMismatch(
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols(),
        ));
    }
    Ok((a.nrows(), b.ncols()))
}

fn check_kernel_mask(mask: Option<&Mask<'_>>, m: usize, n: usize) -> Result<()> {
    if let Some(mk) = mask {
        let v = mk.view();
        if v.nrows() != m || v.ncols() != n {
            return Err(Error::DimensionMismatch(v.nrows(), v.ncols(), m, n));
        }
    }
    Ok(())
}

/// Gustavson entry point: `C⟨M⟩ = A ⊕.⊗ B` written into the preallocated
/// empty `C`, serially, through the caller's workspace.
#[allow(clippy::too_many_arguments)]
pub fn mxm_gustavson<A: KernelBank, Z: Scalar>(
    c: &mut Matrix<Z>,
    mask: Option<&Mask<'_>>,
    semiring: &Semiring<A, Z>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    sauna: &mut Sauna<Z>,
    ctx: &Context,
) -> Result<()> {
    semiring.validate()?;
    let (m, n) = check_kernel_operands(a, b)?;
    check_kernel_mask(mask, m, n)?;
    if !c.is_canonical() {
        return Err(Error::InvalidValue("output must be canonical"));
    }
    if c.nvals() != 0 {
        return Err(Error::OutputNotEmpty);
    }
    if c.format() != Format::ByCol || c.nrows() != m || c.ncols() != n {
        return Err(Error::DimensionMismatch(c.nrows(), c.ncols(), m, n));
    }
    bank::dispatch_saxpy(
        semiring,
        c,
        mask,
        a,
        b,
        flipxy,
        SaunaSrc::Single(sauna),
        ctx,
    )
}

/// Dot-product entry point, returning the freshly allocated product. The
/// mask, when given, must not be complemented: its pattern is the
/// candidate set.
pub fn mxm_dot<A: KernelBank, Z: Scalar>(
    mask: Option<&Mask<'_>>,
    semiring: &Semiring<A, Z>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    ctx: &Context,
) -> Result<Matrix<Z>> {
    semiring.validate()?;
    let (m, n) = check_kernel_operands(a, b)?;
    check_kernel_mask(mask, m, n)?;
    if mask.is_some_and(|mk| mk.is_complement()) {
        return Err(Error::InvalidValue(
            "dot kernel requires a non-complemented mask",
        ));
    }
    let at = a.transpose()?;
    bank::dispatch_dot(semiring, mask, &at, b, flipxy, ctx)
}

/// Heap-merge entry point over caller-owned scratch (`list`, `pa_pair`,
/// and the heap itself, all bounded by `bjnz_max`), returning the freshly
/// allocated product. Serial.
#[allow(clippy::too_many_arguments)]
pub fn mxm_heap<A: KernelBank, Z: Scalar>(
    mask: Option<&Mask<'_>>,
    semiring: &Semiring<A, Z>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    list: &mut Vec<A>,
    pa_pair: &mut Vec<(usize, usize)>,
    heap: &mut MinHeap,
    bjnz_max: usize,
    _ctx: &Context,
) -> Result<Matrix<Z>> {
    semiring.validate()?;
    let (m, n) = check_kernel_operands(a, b)?;
    check_kernel_mask(mask, m, n)?;
    bank::dispatch_heap_scratch(
        semiring,
        HeapScratchArgs {
            mask,
            a,
            b,
            flipxy,
            list,
            pa_pair,
            heap,
            bjnz_max,
        },
    )
}
