//! Test-only helpers: a dense reference model and random sparse inputs.

#![allow(missing_docs)]

use rand::Rng;

use crate::catalog::{ring_binop, BinOpCode, CustomOps, MonoidCode, Ring, Scalar, SemiringOps};
use crate::matrix::Matrix;

/// Dense reference multiply: `c_ij = ⊕_k a_ik ⊗ b_kj` over stored entries
/// only, emitted row-major. Cells with no contributing `k` stay implicit.
pub(crate) fn reference_tuples<A, Z, S>(
    s: &S,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
) -> Vec<(usize, usize, Z)>
where
    A: Scalar,
    Z: Scalar,
    S: SemiringOps<A, Out = Z>,
{
    assert_eq!(a.ncols(), b.nrows());
    let mut out = Vec::new();
    for i in 0..a.nrows() {
        for j in 0..b.ncols() {
            let mut acc: Option<Z> = None;
            for k in 0..a.ncols() {
                let (av, bv) = (a.get(i, k).unwrap(), b.get(k, j).unwrap());
                if let (Some(x), Some(y)) = (av, bv) {
                    let t = s.times(x, y, flipxy);
                    acc = Some(match acc {
                        None => t,
                        Some(p) => s.fold(p, t),
                    });
                }
            }
            if let Some(v) = acc {
                out.push((i, j, v));
            }
        }
    }
    out
}

/// A function-pointer semiring over a single [`Ring`] domain, resolved from
/// catalog codes. Independent of the monomorphized bank, so reference runs
/// cannot share a defect with the kernels under test.
pub(crate) fn rig_of<T: Ring>(add: MonoidCode, mul: BinOpCode) -> CustomOps<T, T> {
    let identity = match add {
        MonoidCode::Min => T::MAX_ALL,
        MonoidCode::Max => T::MIN_ALL,
        MonoidCode::Plus | MonoidCode::Lxor => T::ZERO,
        MonoidCode::Times | MonoidCode::Land | MonoidCode::Eq => T::ONE,
        MonoidCode::Lor => T::ZERO,
    };
    let fold_code = match add {
        MonoidCode::Min => BinOpCode::Min,
        MonoidCode::Max => BinOpCode::Max,
        MonoidCode::Plus => BinOpCode::Plus,
        MonoidCode::Times => BinOpCode::Times,
        MonoidCode::Lor => BinOpCode::Lor,
        MonoidCode::Land => BinOpCode::Land,
        MonoidCode::Lxor => BinOpCode::Lxor,
        MonoidCode::Eq => BinOpCode::IsEq,
    };
    let add_fn = ring_binop::<T>(fold_code).expect("monoid fold");
    let mul_fn = ring_binop::<T>(mul).expect("same-type multiply");
    CustomOps {
        identity,
        add: add_fn,
        mul: mul_fn,
        commutative: mul.is_commutative(),
        terminal: None,
    }
}

/// A random sparse matrix with independent per-cell fill probability.
pub(crate) fn random_matrix<T, F>(
    rng: &mut impl Rng,
    m: usize,
    n: usize,
    density: f64,
    mut gen: F,
) -> Matrix<T>
where
    T: Scalar,
    F: FnMut(&mut dyn rand::RngCore) -> T,
{
    let mut tuples = Vec::new();
    for i in 0..m {
        for j in 0..n {
            if rng.gen_bool(density) {
                tuples.push((i, j, gen(rng)));
            }
        }
    }
    Matrix::from_tuples(m, n, &tuples, None).expect("random build")
}

/// Absolute/relative tolerance comparison for floating-point reductions.
pub(crate) fn tol_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= 1e-10 * scale
}
