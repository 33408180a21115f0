//! Masks and the mask/accumulator merge layer
//!
//! A mask `M` restricts which cells of the output may be updated. Kernels
//! and the merge layer consume masks through two types:
//!
//! - [`MaskView`] — a type-erased borrowed view of a canonical matrix:
//!   pattern slices plus per-entry truthiness. Erasing the element type here
//!   keeps the mask's type out of every kernel signature.
//! - [`Mask`] — a view plus its interpretation (structural vs. valued,
//!   complemented or not).
//!
//! The merge layer implements the masked-assignment contract
//! `C⟨M⟩ = C accum T`: a three-way sparse merge over the patterns of `C`,
//! the kernel result `T`, and the mask, column by column. The mask is never
//! densified.

use crate::catalog::Scalar;
use crate::matrix::Matrix;
use crate::{try_vec, Error, Result};

/// Type-erased borrowed view of a mask matrix: its pattern and the
/// truthiness of each stored value.
pub struct MaskView<'a> {
    nrows: usize,
    ncols: usize,
    h: Option<&'a [usize]>,
    p: &'a [usize],
    i: &'a [i64],
    truthy: Vec<bool>,
}

impl<'a> MaskView<'a> {
    /// Build a view over a canonical, by-column matrix of any element type.
    /// Valued-mask truthiness (non-zero, or `true` for `bool`) is captured
    /// per entry.
    pub fn new<M: Scalar>(mat: &'a Matrix<M>) -> Result<Self> {
        if !mat.is_canonical() {
            return Err(Error::InvalidValue("finalize the mask before use"));
        }
        if mat.format() != crate::matrix::Format::ByCol {
            return Err(Error::InvalidValue("mask must be stored by column"));
        }
        Ok(MaskView {
            nrows: mat.nrows(),
            ncols: mat.ncols(),
            h: mat.hyper_list(),
            p: mat.ptrs(),
            i: mat.rows(),
            truthy: mat.vals().iter().map(|v| v.truthy()).collect(),
        })
    }

    /// Number of rows of the mask.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns of the mask.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Stored entry count.
    #[inline]
    pub fn nvals(&self) -> usize {
        self.i.len()
    }

    #[inline]
    pub(crate) fn nvec(&self) -> usize {
        self.p.len() - 1
    }

    #[inline]
    pub(crate) fn slot_major(&self, slot: usize) -> usize {
        match self.h {
            None => slot,
            Some(h) => h[slot],
        }
    }

    #[inline]
    pub(crate) fn ptrs(&self) -> &[usize] {
        self.p
    }

    fn find_slot(&self, major: usize) -> Option<usize> {
        match self.h {
            None => (major < self.nvec()).then_some(major),
            Some(h) => h.binary_search(&major).ok(),
        }
    }

    fn col_slices(&self, j: usize) -> (&[i64], &[bool]) {
        match self.find_slot(j) {
            None => (&[], &[]),
            Some(s) => {
                let (lo, hi) = (self.p[s], self.p[s + 1]);
                (&self.i[lo..hi], &self.truthy[lo..hi])
            }
        }
    }
}

/// A mask view together with its interpretation.
#[derive(Clone, Copy)]
pub struct Mask<'a> {
    view: &'a MaskView<'a>,
    structural: bool,
    complement: bool,
}

impl<'a> Mask<'a> {
    /// Valued, non-complemented interpretation of a view.
    pub fn new(view: &'a MaskView<'a>) -> Self {
        Mask {
            view,
            structural: false,
            complement: false,
        }
    }

    /// Interpret by pattern only, ignoring stored values.
    pub fn structural(mut self) -> Self {
        self.structural = true;
        self
    }

    /// Invert the mask.
    pub fn complement(mut self) -> Self {
        self.complement = true;
        self
    }

    /// Whether the mask is complemented.
    #[inline]
    pub fn is_complement(&self) -> bool {
        self.complement
    }

    /// The underlying view.
    #[inline]
    pub fn view(&self) -> &MaskView<'a> {
        self.view
    }

    /// Cursor over column `j` for ascending-row membership queries.
    pub(crate) fn col(&self, j: usize) -> MaskCol<'_> {
        let (rows, truthy) = self.view.col_slices(j);
        MaskCol {
            rows,
            truthy,
            structural: self.structural,
            complement: self.complement,
            cur: 0,
        }
    }
}

/// Monotone membership cursor over one mask column. Queries must arrive in
/// ascending row order; each runs in amortized O(1).
pub(crate) struct MaskCol<'m> {
    rows: &'m [i64],
    truthy: &'m [bool],
    structural: bool,
    complement: bool,
    cur: usize,
}

impl MaskCol<'_> {
    /// Whether the mask permits an update at row `i`.
    #[inline]
    pub(crate) fn allows(&mut self, i: i64) -> bool {
        while self.cur < self.rows.len() && self.rows[self.cur] < i {
            self.cur += 1;
        }
        let hit = self.cur < self.rows.len()
            && self.rows[self.cur] == i
            && (self.structural || self.truthy[self.cur]);
        hit ^ self.complement
    }

    /// Whether this cursor applies complemented semantics.
    #[inline]
    pub(crate) fn complemented(&self) -> bool {
        self.complement
    }

    /// True when the column can permit no row at all (empty, not
    /// complemented); lets kernels skip the column outright.
    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.rows.is_empty() && !self.complement
    }

    /// The permitted rows of a non-complemented column, in ascending order.
    /// Gather loops iterate this instead of the accumulator when the mask
    /// column is the smaller side.
    pub(crate) fn permitted(&self) -> impl Iterator<Item = i64> + '_ {
        debug_assert!(!self.complement);
        let structural = self.structural;
        self.rows
            .iter()
            .zip(self.truthy.iter())
            .filter(move |&(_, &t)| structural || t)
            .map(|(&r, _)| r)
    }
}

// ============================================================================
// Mask & accumulator merge
// ============================================================================

/// Apply the masked-assignment contract, merging the kernel result `t` into
/// the user's `c`:
///
/// - without `accum`: `C⟨M⟩ = T` — masked-in positions take `T`'s value (or
///   are removed when `T` has none); masked-out positions are preserved;
/// - with `accum`: `C⟨M⟩ = C accum T` at masked-in positions where both are
///   present, the sole operand where only one is;
/// - with `replace`: masked-out entries of `C` are deleted.
///
/// `c` and `t` must be canonical, by-column, and of equal dimensions.
pub(crate) fn merge_into<Z: Scalar>(
    c: &mut Matrix<Z>,
    t: &Matrix<Z>,
    mask: Option<&Mask<'_>>,
    accum: Option<fn(Z, Z) -> Z>,
    replace: bool,
) -> Result<()> {
    debug_assert!(c.is_canonical() && t.is_canonical());
    debug_assert_eq!((c.nrows(), c.ncols()), (t.nrows(), t.ncols()));
    let n = c.ncols();
    let est = c.nvals() + t.nvals();
    let mut new_p: Vec<usize> = try_vec(n + 1)?;
    let mut new_i: Vec<i64> = try_vec(est)?;
    let mut new_x: Vec<Z> = try_vec(est)?;
    new_p.push(0);

    for j in 0..n {
        let (crows, cvals) = col_of(c, j);
        let (trows, tvals) = col_of(t, j);
        let mut mcol = mask.map(|m| m.col(j));
        let (mut pc, mut pt) = (0usize, 0usize);
        while pc < crows.len() || pt < trows.len() {
            let rc = crows.get(pc).copied();
            let rt = trows.get(pt).copied();
            let (row, has_c, has_t) = match (rc, rt) {
                (Some(a), Some(b)) if a == b => (a, true, true),
                (Some(a), None) => (a, true, false),
                (Some(a), Some(b)) if a < b => (a, true, false),
                (_, Some(b)) => (b, false, true),
                (None, None) => break,
            };
            let allowed = match &mut mcol {
                None => true,
                Some(m) => m.allows(row),
            };
            if allowed {
                match (has_c, has_t) {
                    (true, true) => {
                        let v = match accum {
                            Some(f) => f(cvals[pc], tvals[pt]),
                            None => tvals[pt],
                        };
                        new_i.push(row);
                        new_x.push(v);
                    }
                    (true, false) => {
                        // without an accumulator, absence in T deletes
                        if accum.is_some() {
                            new_i.push(row);
                            new_x.push(cvals[pc]);
                        }
                    }
                    (false, true) => {
                        new_i.push(row);
                        new_x.push(tvals[pt]);
                    }
                    (false, false) => {}
                }
            } else if has_c && !replace {
                new_i.push(row);
                new_x.push(cvals[pc]);
            }
            if has_c {
                pc += 1;
            }
            if has_t {
                pt += 1;
            }
        }
        new_p.push(new_i.len());
    }

    c.replace_csc(new_p, new_i, new_x);
    Ok(())
}

fn col_of<Z: Scalar>(m: &Matrix<Z>, j: usize) -> (&[i64], &[Z]) {
    match m.find_slot(j) {
        None => (&[], &[]),
        Some(s) => {
            let r = m.slot_range(s);
            (&m.rows()[r.clone()], &m.vals()[r])
        }
    }
}
