//! Sparse matrix store
//!
//! Compressed-sparse-column container with the hypersparse variant and the
//! two lazy-mutation sidecars:
//!
//! - **zombies** — entries marked for deletion by negating the stored row
//!   index (`row ↦ -row - 2`, so row 0 maps to -2 and the encoding stays
//!   distinguishable); they still occupy space until finalization;
//! - **pending tuples** — unsorted `(i, j, value)` triples staged by
//!   [`Matrix::set_element`] and merged on demand.
//!
//! ## Canonical form
//!
//! A matrix is *canonical* when row indices within each column are strictly
//! increasing, no row index is negative, the pending list is empty, a
//! hypersparse `h` is strictly increasing and lists only non-empty columns,
//! and `x.len() == i.len() == p[nvec]`.
//!
//! Mutating operations may leave the matrix non-canonical;
//! [`Matrix::finalize`] restores canonical form and is idempotent. Reads
//! that enumerate structure require canonical form and fail otherwise —
//! non-canonical state is never observable through the read surface.
//!
//! The store is orientation-tagged: a `ByRow` matrix holds the same arrays
//! with rows as the compressed vectors (the transpose isomorph). Kernels
//! operate on `ByCol`; the planner converts views as needed.

use std::borrow::Cow;

use tracing::trace;

use crate::catalog::Scalar;
use crate::{try_vec, Context, Error, Result};

/// Storage orientation of the compressed axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Compressed sparse column: vectors are columns.
    ByCol,
    /// Compressed sparse row: vectors are rows.
    ByRow,
}

/// Decode a stored row index, mapping zombies back to their row.
#[inline]
pub(crate) fn decode(enc: i64) -> i64 {
    if enc < 0 {
        -enc - 2
    } else {
        enc
    }
}

/// Zombie flip; an involution.
#[inline]
fn flip(enc: i64) -> i64 {
    -enc - 2
}

#[inline]
fn is_zombie(enc: i64) -> bool {
    enc < 0
}

#[derive(Debug, Clone)]
struct Pending<T> {
    major: usize,
    minor: usize,
    v: T,
}

/// A sparse matrix of dimension `nrows × ncols` over element type `T`.
#[derive(Debug, Clone)]
pub struct Matrix<T: Scalar> {
    nrows: usize,
    ncols: usize,
    format: Format,
    /// Hypersparse vector list; `None` means all majors are present.
    h: Option<Vec<usize>>,
    /// `nvec + 1` offsets into `i`/`x`.
    p: Vec<usize>,
    /// Minor indices per vector; strictly increasing when decoded.
    i: Vec<i64>,
    /// Values, parallel to `i`.
    x: Vec<T>,
    nzombies: usize,
    pending: Vec<Pending<T>>,
    pending_op: Option<fn(T, T) -> T>,
}

impl<T: Scalar> Matrix<T> {
    /// An empty `ByCol` matrix.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self::new_with_format(nrows, ncols, Format::ByCol)
    }

    /// An empty matrix with the given storage orientation.
    pub fn new_with_format(nrows: usize, ncols: usize, format: Format) -> Self {
        let vdim = match format {
            Format::ByCol => ncols,
            Format::ByRow => nrows,
        };
        debug_assert!(nrows < i64::MAX as usize && ncols < i64::MAX as usize);
        Matrix {
            nrows,
            ncols,
            format,
            h: None,
            p: vec![0; vdim + 1],
            i: Vec::new(),
            x: Vec::new(),
            nzombies: 0,
            pending: Vec::new(),
            pending_op: None,
        }
    }

    // ------------------------------------------------------------------
    // Shape and status
    // ------------------------------------------------------------------

    /// Number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Storage orientation.
    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Whether the matrix is in the hypersparse variant.
    #[inline]
    pub fn is_hyper(&self) -> bool {
        self.h.is_some()
    }

    /// Stored entry count, zombies excluded. Pending tuples are not counted;
    /// call [`Matrix::finalize`] first for the logical count.
    #[inline]
    pub fn nvals(&self) -> usize {
        self.i.len() - self.nzombies
    }

    /// Whether the canonical-form invariants currently hold.
    #[inline]
    pub fn is_canonical(&self) -> bool {
        self.nzombies == 0 && self.pending.is_empty()
    }

    /// Length of the compressed (minor) axis.
    #[inline]
    pub(crate) fn vlen(&self) -> usize {
        match self.format {
            Format::ByCol => self.nrows,
            Format::ByRow => self.ncols,
        }
    }

    /// Length of the major axis.
    #[inline]
    pub(crate) fn vdim(&self) -> usize {
        match self.format {
            Format::ByCol => self.ncols,
            Format::ByRow => self.nrows,
        }
    }

    /// Number of stored vectors.
    #[inline]
    pub(crate) fn nvec(&self) -> usize {
        self.p.len() - 1
    }

    #[inline]
    pub(crate) fn slot_major(&self, slot: usize) -> usize {
        match &self.h {
            None => slot,
            Some(h) => h[slot],
        }
    }

    #[inline]
    pub(crate) fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        self.p[slot]..self.p[slot + 1]
    }

    #[inline]
    pub(crate) fn find_slot(&self, major: usize) -> Option<usize> {
        match &self.h {
            None => (major < self.nvec()).then_some(major),
            Some(h) => h.binary_search(&major).ok(),
        }
    }

    #[inline]
    pub(crate) fn rows(&self) -> &[i64] {
        &self.i
    }

    #[inline]
    pub(crate) fn vals(&self) -> &[T] {
        &self.x
    }

    #[inline]
    pub(crate) fn ptrs(&self) -> &[usize] {
        &self.p
    }

    #[inline]
    pub(crate) fn hyper_list(&self) -> Option<&[usize]> {
        self.h.as_deref()
    }

    /// Swap in replacement CSC storage (non-hypersparse), keeping dims and
    /// orientation. The caller guarantees the arrays are canonical.
    pub(crate) fn replace_csc(&mut self, p: Vec<usize>, i: Vec<i64>, x: Vec<T>) {
        debug_assert_eq!(self.format, Format::ByCol);
        debug_assert_eq!(p.len(), self.ncols + 1);
        debug_assert_eq!(*p.last().unwrap_or(&0), i.len());
        self.h = None;
        self.p = p;
        self.i = i;
        self.x = x;
        self.nzombies = 0;
        self.pending.clear();
        self.pending_op = None;
    }

    /// Largest per-vector entry count (`bjnz_max` in planner terms).
    pub(crate) fn max_vec_nnz(&self) -> usize {
        (0..self.nvec())
            .map(|s| self.p[s + 1] - self.p[s])
            .max()
            .unwrap_or(0)
    }

    /// Assemble a canonical non-hypersparse `ByCol` matrix from raw parts.
    pub(crate) fn from_csc_parts(
        nrows: usize,
        ncols: usize,
        p: Vec<usize>,
        i: Vec<i64>,
        x: Vec<T>,
    ) -> Self {
        debug_assert_eq!(p.len(), ncols + 1);
        debug_assert_eq!(*p.last().unwrap_or(&0), i.len());
        debug_assert_eq!(i.len(), x.len());
        Matrix {
            nrows,
            ncols,
            format: Format::ByCol,
            h: None,
            p,
            i,
            x,
            nzombies: 0,
            pending: Vec::new(),
            pending_op: None,
        }
    }

    // ------------------------------------------------------------------
    // Element mutation (lazy)
    // ------------------------------------------------------------------

    #[inline]
    fn orient(&self, row: usize, col: usize) -> (usize, usize) {
        match self.format {
            Format::ByCol => (col, row),
            Format::ByRow => (row, col),
        }
    }

    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrows {
            return Err(Error::InvalidIndex {
                index: row,
                bound: self.nrows,
            });
        }
        if col >= self.ncols {
            return Err(Error::InvalidIndex {
                index: col,
                bound: self.ncols,
            });
        }
        Ok(())
    }

    /// Stage `A[row, col] = v` as a pending tuple. Never sorts immediately;
    /// the write becomes visible after [`Matrix::finalize`].
    ///
    /// Two staged tuples for the same position are combined by the operator
    /// installed with [`Matrix::set_pending_operator`]; without one they are
    /// reported as an error at finalization.
    pub fn set_element(&mut self, row: usize, col: usize, v: T) -> Result<()> {
        self.check_index(row, col)?;
        let (major, minor) = self.orient(row, col);
        self.pending.push(Pending { major, minor, v });
        Ok(())
    }

    /// Install (or clear) the combiner applied when pending tuples collide,
    /// with each other or with a stored entry. Cleared by finalization.
    pub fn set_pending_operator(&mut self, op: Option<fn(T, T) -> T>) {
        self.pending_op = op;
    }

    /// Delete `A[row, col]`: a stored entry becomes a zombie in place, and
    /// any pending tuples for the position are dropped. Deleting an absent
    /// entry is a no-op.
    pub fn remove_element(&mut self, row: usize, col: usize) -> Result<()> {
        self.check_index(row, col)?;
        let (major, minor) = self.orient(row, col);
        if let Some(slot) = self.find_slot(major) {
            if let Some(pos) = self.search_minor(slot, minor as i64) {
                if !is_zombie(self.i[pos]) {
                    self.i[pos] = flip(self.i[pos]);
                    self.nzombies += 1;
                }
            }
        }
        self.pending
            .retain(|t| !(t.major == major && t.minor == minor));
        Ok(())
    }

    /// Read `A[row, col]`. Requires canonical form; `Ok(None)` is the
    /// implicit zero.
    pub fn get(&self, row: usize, col: usize) -> Result<Option<T>> {
        self.check_index(row, col)?;
        if !self.is_canonical() {
            return Err(Error::InvalidValue(
                "matrix has pending work; finalize before reading",
            ));
        }
        let (major, minor) = self.orient(row, col);
        let found = self
            .find_slot(major)
            .and_then(|slot| self.search_minor(slot, minor as i64))
            .map(|pos| self.x[pos]);
        Ok(found)
    }

    /// Binary search a vector for a minor index, comparing decoded rows so
    /// zombies stay findable at their original position.
    fn search_minor(&self, slot: usize, minor: i64) -> Option<usize> {
        let r = self.slot_range(slot);
        let seg = &self.i[r.clone()];
        let pos = seg.partition_point(|&e| decode(e) < minor);
        (pos < seg.len() && decode(seg[pos]) == minor).then(|| r.start + pos)
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Restore canonical form with the default hypersparse threshold.
    pub fn finalize(&mut self) -> Result<()> {
        self.finalize_with(Context::DEFAULT_HYPER_RATIO)
    }

    /// Restore canonical form: drain pending tuples, remove zombies, and
    /// promote to hypersparse when the empty-column fraction exceeds
    /// `hyper_ratio`. Idempotent. On allocation failure the matrix is left
    /// unchanged (consistent, still non-canonical) and the call may be
    /// retried.
    pub fn finalize_with(&mut self, hyper_ratio: f64) -> Result<()> {
        if !self.pending.is_empty() {
            self.drain_pending()?;
        } else if self.nzombies > 0 {
            self.sweep_zombies();
        }
        self.promote_if(hyper_ratio)?;
        Ok(())
    }

    /// Sort-merge the pending list into the stored structure. Handles
    /// zombies along the way (a zombie is absent: a pending tuple at its
    /// position resurrects it with the new value).
    fn drain_pending(&mut self) -> Result<()> {
        // Stable by (major, minor): insertion order survives within a key.
        self.pending.sort_by_key(|t| (t.major, t.minor));
        if self.pending_op.is_none() {
            let dup = self
                .pending
                .windows(2)
                .any(|w| w[0].major == w[1].major && w[0].minor == w[1].minor);
            if dup {
                return Err(Error::InvalidValue(
                    "duplicate pending tuples without a combiner",
                ));
            }
        }
        let op = self.pending_op;

        // Collapse duplicate positions left to right.
        let mut merged: Vec<Pending<T>> = try_vec(self.pending.len())?;
        for t in &self.pending {
            match merged.last_mut() {
                Some(last) if last.major == t.major && last.minor == t.minor => {
                    // op must exist: checked above
                    if let Some(f) = op {
                        last.v = f(last.v, t.v);
                    }
                }
                _ => merged.push(t.clone()),
            }
        }

        let npending = merged.len();
        let est = self.nvals() + npending;
        let mut new_i: Vec<i64> = try_vec(est)?;
        let mut new_x: Vec<T> = try_vec(est)?;
        // (major, end offset) of every non-empty output vector.
        let mut cols: Vec<(usize, usize)> = try_vec(self.nvec() + npending)?;

        let nvec_old = self.nvec();
        let (mut s, mut q) = (0usize, 0usize);
        while s < nvec_old || q < merged.len() {
            let major_s = (s < nvec_old).then(|| self.slot_major(s));
            let major_q = (q < merged.len()).then(|| merged[q].major);
            let cur = match (major_s, major_q) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };
            let (mut lo, hi) = if major_s == Some(cur) {
                let r = self.slot_range(s);
                (r.start, r.end)
            } else {
                (0, 0)
            };
            let mut q_end = q;
            while q_end < merged.len() && merged[q_end].major == cur {
                q_end += 1;
            }
            while lo < hi || q < q_end {
                let row_s = (lo < hi).then(|| decode(self.i[lo]));
                let row_q = (q < q_end).then(|| merged[q].minor as i64);
                match (row_s, row_q) {
                    (Some(a), Some(b)) if a == b => {
                        if is_zombie(self.i[lo]) {
                            new_i.push(b);
                            new_x.push(merged[q].v);
                        } else {
                            let v = match op {
                                Some(f) => f(self.x[lo], merged[q].v),
                                None => merged[q].v,
                            };
                            new_i.push(b);
                            new_x.push(v);
                        }
                        lo += 1;
                        q += 1;
                    }
                    (Some(_), None) => {
                        if !is_zombie(self.i[lo]) {
                            new_i.push(self.i[lo]);
                            new_x.push(self.x[lo]);
                        }
                        lo += 1;
                    }
                    (Some(a), Some(b)) if a < b => {
                        if !is_zombie(self.i[lo]) {
                            new_i.push(self.i[lo]);
                            new_x.push(self.x[lo]);
                        }
                        lo += 1;
                    }
                    (_, Some(b)) => {
                        new_i.push(b);
                        new_x.push(merged[q].v);
                        q += 1;
                    }
                    (None, None) => break,
                }
            }
            let end = new_i.len();
            if cols.last().map(|&(_, e)| e).unwrap_or(0) < end {
                cols.push((cur, end));
            }
            if major_s == Some(cur) {
                s += 1;
            }
        }

        // Rebuild the pointer structure in the current variant.
        if self.h.is_some() {
            let mut new_h: Vec<usize> = try_vec(cols.len())?;
            let mut new_p: Vec<usize> = try_vec(cols.len() + 1)?;
            new_p.push(0);
            for &(major, end) in &cols {
                new_h.push(major);
                new_p.push(end);
            }
            self.h = Some(new_h);
            self.p = new_p;
        } else {
            let vdim = self.vdim();
            let mut new_p: Vec<usize> = try_vec(vdim + 1)?;
            new_p.push(0);
            let mut c = 0;
            for major in 0..vdim {
                let prev = *new_p.last().unwrap_or(&0);
                if c < cols.len() && cols[c].0 == major {
                    new_p.push(cols[c].1);
                    c += 1;
                } else {
                    new_p.push(prev);
                }
            }
            self.p = new_p;
        }

        trace!(
            drained = npending,
            zombies = self.nzombies,
            nnz = new_i.len(),
            "finalize: pending merged"
        );
        self.i = new_i;
        self.x = new_x;
        self.nzombies = 0;
        self.pending.clear();
        self.pending_op = None;
        Ok(())
    }

    /// Stable in-place compaction removing zombie entries, rebuilding `p`
    /// (and `h` for hypersparse matrices). Allocation-free.
    fn sweep_zombies(&mut self) {
        let nvec = self.nvec();
        let mut w = 0;
        let mut read_start = self.p[0];
        for s in 0..nvec {
            let read_end = self.p[s + 1];
            for r in read_start..read_end {
                if !is_zombie(self.i[r]) {
                    self.i[w] = self.i[r];
                    self.x[w] = self.x[r];
                    w += 1;
                }
            }
            read_start = read_end;
            self.p[s + 1] = w;
        }
        trace!(killed = self.nzombies, nnz = w, "finalize: zombies swept");
        self.i.truncate(w);
        self.x.truncate(w);
        self.nzombies = 0;
        if let Some(h) = &mut self.h {
            let mut ws = 0;
            for s in 0..nvec {
                if self.p[s + 1] > self.p[s] {
                    h[ws] = h[s];
                    self.p[ws + 1] = self.p[s + 1];
                    ws += 1;
                }
            }
            h.truncate(ws);
            self.p.truncate(ws + 1);
        }
    }

    /// Promote a non-hypersparse canonical matrix when its empty-column
    /// fraction exceeds `ratio`.
    fn promote_if(&mut self, ratio: f64) -> Result<()> {
        debug_assert!(self.is_canonical());
        if self.h.is_some() {
            return Ok(());
        }
        let vdim = self.vdim();
        if vdim == 0 {
            return Ok(());
        }
        let empty = (0..vdim).filter(|&j| self.p[j + 1] == self.p[j]).count();
        if (empty as f64) > ratio * (vdim as f64) {
            self.to_hyper()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Format conversions
    // ------------------------------------------------------------------

    /// Convert to the hypersparse variant. Lossless; requires canonical form.
    pub fn to_hyper(&mut self) -> Result<()> {
        if !self.is_canonical() {
            return Err(Error::InvalidValue("finalize before converting format"));
        }
        if self.h.is_some() {
            return Ok(());
        }
        let vdim = self.vdim();
        let nonempty = (0..vdim).filter(|&j| self.p[j + 1] > self.p[j]).count();
        let mut h: Vec<usize> = try_vec(nonempty)?;
        let mut p: Vec<usize> = try_vec(nonempty + 1)?;
        p.push(0);
        for j in 0..vdim {
            if self.p[j + 1] > self.p[j] {
                h.push(j);
                p.push(self.p[j + 1]);
            }
        }
        self.h = Some(h);
        self.p = p;
        Ok(())
    }

    /// Convert to the non-hypersparse variant. Lossless; requires canonical
    /// form.
    pub fn to_nonhyper(&mut self) -> Result<()> {
        if !self.is_canonical() {
            return Err(Error::InvalidValue("finalize before converting format"));
        }
        let Some(h) = self.h.take() else {
            return Ok(());
        };
        let vdim = self.vdim();
        let mut p: Vec<usize> = match try_vec(vdim + 1) {
            Ok(p) => p,
            Err(e) => {
                self.h = Some(h);
                return Err(e);
            }
        };
        p.push(0);
        let mut s = 0;
        for major in 0..vdim {
            let prev = *p.last().unwrap_or(&0);
            if s < h.len() && h[s] == major {
                p.push(self.p[s + 1]);
                s += 1;
            } else {
                p.push(prev);
            }
        }
        self.p = p;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structural operations
    // ------------------------------------------------------------------

    /// The logical transpose, returned in `ByCol` orientation. Requires
    /// canonical form.
    pub fn transpose(&self) -> Result<Matrix<T>> {
        if !self.is_canonical() {
            return Err(Error::InvalidValue("finalize before transposing"));
        }
        match self.format {
            Format::ByRow => {
                // The stored arrays already are the transpose in ByCol.
                let mut t = self.clone();
                t.format = Format::ByCol;
                std::mem::swap(&mut t.nrows, &mut t.ncols);
                Ok(t)
            }
            Format::ByCol => {
                let nnz = self.i.len();
                let vlen = self.vlen();
                let mut p: Vec<usize> = try_vec(vlen + 1)?;
                p.resize(vlen + 1, 0);
                for &e in &self.i {
                    p[e as usize + 1] += 1;
                }
                for r in 0..vlen {
                    p[r + 1] += p[r];
                }
                if nnz == 0 {
                    return Ok(Matrix::from_csc_parts(
                        self.ncols,
                        self.nrows,
                        p,
                        Vec::new(),
                        Vec::new(),
                    ));
                }
                let fill = self.x[0];
                let mut ti: Vec<i64> = try_vec(nnz)?;
                let mut tx: Vec<T> = try_vec(nnz)?;
                ti.resize(nnz, 0);
                tx.resize(nnz, fill);
                let mut cursor: Vec<usize> = try_vec(vlen)?;
                cursor.extend_from_slice(&p[..vlen]);
                for slot in 0..self.nvec() {
                    let major = self.slot_major(slot) as i64;
                    for r in self.slot_range(slot) {
                        let row = self.i[r] as usize;
                        let dst = cursor[row];
                        cursor[row] += 1;
                        ti[dst] = major;
                        tx[dst] = self.x[r];
                    }
                }
                Ok(Matrix::from_csc_parts(self.ncols, self.nrows, p, ti, tx))
            }
        }
    }

    /// This matrix in `ByCol` orientation, borrowing when it already is.
    pub(crate) fn by_col(&self) -> Result<Cow<'_, Matrix<T>>> {
        match self.format {
            Format::ByCol => Ok(Cow::Borrowed(self)),
            Format::ByRow => {
                let t = self.transpose()?; // cheap relabel
                Ok(Cow::Owned(t.transpose()?))
            }
        }
    }

    /// Re-store a `ByCol` matrix in `ByRow` orientation (same logical
    /// content). Requires canonical form.
    pub(crate) fn into_by_row(self) -> Result<Matrix<T>> {
        debug_assert_eq!(self.format, Format::ByCol);
        let mut t = self.transpose()?;
        t.format = Format::ByRow;
        std::mem::swap(&mut t.nrows, &mut t.ncols);
        Ok(t)
    }

    // ------------------------------------------------------------------
    // Build / export / lifecycle
    // ------------------------------------------------------------------

    /// Build a matrix from `(row, col, value)` tuples. Duplicates are
    /// combined by `dup`; without one they are an error. The result is
    /// canonical.
    pub fn from_tuples(
        nrows: usize,
        ncols: usize,
        tuples: &[(usize, usize, T)],
        dup: Option<fn(T, T) -> T>,
    ) -> Result<Self> {
        let mut a = Matrix::new(nrows, ncols);
        a.pending.reserve(tuples.len());
        for &(row, col, v) in tuples {
            if row >= nrows {
                return Err(Error::IndexOutOfBounds {
                    index: row,
                    bound: nrows,
                });
            }
            if col >= ncols {
                return Err(Error::IndexOutOfBounds {
                    index: col,
                    bound: ncols,
                });
            }
            let (major, minor) = a.orient(row, col);
            a.pending.push(Pending { major, minor, v });
        }
        a.pending_op = dup;
        a.finalize()?;
        Ok(a)
    }

    /// Export all entries as `(row, col, value)` tuples in column-major
    /// order. Requires canonical form.
    pub fn extract_tuples(&self) -> Result<Vec<(usize, usize, T)>> {
        if !self.is_canonical() {
            return Err(Error::InvalidValue("finalize before exporting"));
        }
        let mut out = try_vec(self.nvals())?;
        for slot in 0..self.nvec() {
            let major = self.slot_major(slot);
            for r in self.slot_range(slot) {
                let minor = self.i[r] as usize;
                let (row, col) = match self.format {
                    Format::ByCol => (minor, major),
                    Format::ByRow => (major, minor),
                };
                out.push((row, col, self.x[r]));
            }
        }
        Ok(out)
    }

    /// Drop all entries and lazy state; dimensions and orientation persist.
    pub fn clear(&mut self) {
        let vdim = self.vdim();
        self.h = None;
        self.p = vec![0; vdim + 1];
        self.i.clear();
        self.x.clear();
        self.nzombies = 0;
        self.pending.clear();
        self.pending_op = None;
    }

    /// Deep copy.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    #[cfg(test)]
    pub(crate) fn assert_canonical(&self) {
        assert!(self.pending.is_empty(), "pending list not drained");
        assert_eq!(self.nzombies, 0, "zombies present");
        assert_eq!(*self.p.last().unwrap(), self.i.len(), "p/i disagree");
        assert_eq!(self.i.len(), self.x.len(), "i/x disagree");
        for s in 0..self.nvec() {
            let r = self.slot_range(s);
            for w in self.i[r].windows(2) {
                assert!(w[0] < w[1], "rows not strictly increasing");
            }
        }
        if let Some(h) = &self.h {
            for w in h.windows(2) {
                assert!(w[0] < w[1], "h not strictly increasing");
            }
            for s in 0..self.nvec() {
                assert!(self.p[s + 1] > self.p[s], "hypersparse empty column");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense<T: Scalar>(a: &Matrix<T>) -> Vec<(usize, usize, T)> {
        a.extract_tuples().unwrap()
    }

    #[test]
    fn set_finalize_get_roundtrip() {
        let mut a = Matrix::<f64>::new(4, 3);
        a.set_element(2, 1, 0.5).unwrap();
        a.set_element(0, 0, 1.5).unwrap();
        a.set_element(3, 1, -2.0).unwrap();
        assert!(!a.is_canonical());
        a.finalize().unwrap();
        a.assert_canonical();
        assert_eq!(a.nvals(), 3);
        assert_eq!(a.get(0, 0).unwrap(), Some(1.5));
        assert_eq!(a.get(2, 1).unwrap(), Some(0.5));
        assert_eq!(a.get(3, 1).unwrap(), Some(-2.0));
        assert_eq!(a.get(1, 2).unwrap(), None);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut a = Matrix::<i32>::new(5, 5);
        a.set_element(4, 4, 7).unwrap();
        a.set_element(1, 0, 3).unwrap();
        a.finalize().unwrap();
        let before = dense(&a);
        let hyper = a.is_hyper();
        a.finalize().unwrap();
        a.assert_canonical();
        assert_eq!(dense(&a), before);
        assert_eq!(a.is_hyper(), hyper);
    }

    #[test]
    fn reads_require_canonical_form() {
        let mut a = Matrix::<i32>::new(2, 2);
        a.set_element(0, 0, 1).unwrap();
        assert!(matches!(a.get(0, 0), Err(Error::InvalidValue(_))));
        assert!(matches!(a.extract_tuples(), Err(Error::InvalidValue(_))));
        a.finalize().unwrap();
        assert_eq!(a.get(0, 0).unwrap(), Some(1));
    }

    #[test]
    fn zombie_then_insert_resurrects() {
        // insert, finalize, delete (zombie), insert again, finalize:
        // the final value must win despite the lazy state.
        let mut a = Matrix::<i64>::new(3, 3);
        a.set_element(0, 0, 1).unwrap();
        a.finalize().unwrap();
        a.remove_element(0, 0).unwrap();
        assert_eq!(a.nvals(), 0);
        assert!(!a.is_canonical());
        a.set_element(0, 0, 2).unwrap();
        a.finalize().unwrap();
        a.assert_canonical();
        assert_eq!(a.get(0, 0).unwrap(), Some(2));
        assert_eq!(a.nvals(), 1);
    }

    #[test]
    fn remove_pending_before_merge() {
        // insert, delete, insert without an intervening finalize
        let mut a = Matrix::<i64>::new(3, 3);
        a.set_element(0, 0, 1).unwrap();
        a.remove_element(0, 0).unwrap();
        a.set_element(0, 0, 2).unwrap();
        a.finalize().unwrap();
        assert_eq!(a.get(0, 0).unwrap(), Some(2));
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut a = Matrix::<i8>::new(2, 2);
        a.remove_element(1, 1).unwrap();
        a.finalize().unwrap();
        assert_eq!(a.nvals(), 0);
        assert!(matches!(
            a.remove_element(5, 0),
            Err(Error::InvalidIndex { .. })
        ));
    }

    #[test]
    fn duplicate_pending_without_combiner_is_an_error() {
        let mut a = Matrix::<i32>::new(2, 2);
        a.set_element(0, 0, 1).unwrap();
        a.set_element(0, 0, 2).unwrap();
        assert!(matches!(a.finalize(), Err(Error::InvalidValue(_))));
        // data preserved: install a combiner and retry
        a.set_pending_operator(Some(|x, y| x + y));
        a.finalize().unwrap();
        assert_eq!(a.get(0, 0).unwrap(), Some(3));
    }

    #[test]
    fn pending_combines_with_stored_entry() {
        let mut a = Matrix::<i32>::new(2, 2);
        a.set_element(0, 1, 10).unwrap();
        a.finalize().unwrap();
        a.set_element(0, 1, 5).unwrap();
        a.set_pending_operator(Some(|x, y| x + y));
        a.finalize().unwrap();
        assert_eq!(a.get(0, 1).unwrap(), Some(15));
        // without a combiner the staged value replaces
        a.set_element(0, 1, 42).unwrap();
        a.finalize().unwrap();
        assert_eq!(a.get(0, 1).unwrap(), Some(42));
    }

    #[test]
    fn finalize_promotes_to_hypersparse() {
        let mut a = Matrix::<f32>::new(8, 128);
        a.set_element(3, 17, 1.0).unwrap();
        a.finalize().unwrap();
        assert!(a.is_hyper());
        a.assert_canonical();
        assert_eq!(a.get(3, 17).unwrap(), Some(1.0));
        // mostly-full matrices stay in the plain variant
        let mut b = Matrix::<f32>::new(2, 4);
        for j in 0..4 {
            b.set_element(0, j, 1.0).unwrap();
        }
        b.finalize().unwrap();
        assert!(!b.is_hyper());
    }

    #[test]
    fn hyper_roundtrip_preserves_entries() {
        let tuples = vec![(0usize, 9usize, 1i32), (5, 9, 2), (2, 40, 3)];
        let mut a = Matrix::from_tuples(6, 64, &tuples, None).unwrap();
        assert!(a.is_hyper());
        a.to_nonhyper().unwrap();
        assert!(!a.is_hyper());
        assert_eq!(dense(&a), tuples);
        a.to_hyper().unwrap();
        a.assert_canonical();
        assert_eq!(dense(&a), tuples);
    }

    #[test]
    fn zombies_in_hypersparse_drop_empty_columns() {
        let mut a = Matrix::from_tuples(4, 64, &[(1, 8, 1.0f64), (2, 32, 2.0)], None).unwrap();
        assert!(a.is_hyper());
        a.remove_element(1, 8).unwrap();
        a.finalize().unwrap();
        a.assert_canonical();
        assert_eq!(dense(&a), vec![(2, 32, 2.0)]);
    }

    #[test]
    fn transpose_small() {
        let a = Matrix::from_tuples(2, 3, &[(0, 0, 1), (0, 2, 2), (1, 1, 3)], None).unwrap();
        let t = a.transpose().unwrap();
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.ncols(), 2);
        assert_eq!(dense(&t), vec![(0, 0, 1), (2, 0, 2), (1, 1, 3)]);
    }

    #[test]
    fn by_row_matrices_convert_losslessly() {
        let mut a = Matrix::<i32>::new_with_format(3, 2, Format::ByRow);
        a.set_element(0, 1, 4).unwrap();
        a.set_element(2, 0, 5).unwrap();
        a.finalize().unwrap();
        assert_eq!(a.get(0, 1).unwrap(), Some(4));
        let c = a.by_col().unwrap();
        assert_eq!(c.format(), Format::ByCol);
        assert_eq!(c.nrows(), 3);
        assert_eq!(c.ncols(), 2);
        let mut got = c.extract_tuples().unwrap();
        got.sort();
        assert_eq!(got, vec![(0, 1, 4), (2, 0, 5)]);
    }

    #[test]
    fn from_tuples_bounds_check() {
        let r = Matrix::from_tuples(2, 2, &[(2, 0, 1i8)], None);
        assert!(matches!(r, Err(Error::IndexOutOfBounds { .. })));
    }

    #[test]
    fn clear_resets_lazy_state() {
        let mut a = Matrix::<i32>::new(2, 2);
        a.set_element(0, 0, 1).unwrap();
        a.finalize().unwrap();
        a.remove_element(0, 0).unwrap();
        a.clear();
        assert!(a.is_canonical());
        assert_eq!(a.nvals(), 0);
        assert_eq!(a.nrows(), 2);
    }
}
