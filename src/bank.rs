//! Kernel bank
//!
//! The three-dimensional `(monoid, multiply, type)` lookup behind semiring
//! dispatch. Every catalogued triple resolves to a monomorphized kernel:
//! the tables below are macro-expanded `match`es whose arms instantiate the
//! generic kernel cores at a zero-sized [`Rig`], one per admissible
//! `(monoid, multiply)` pair, and the whole table is stamped once per
//! built-in element type — the full Cartesian product the engine was
//! specified to generate, times the three multiply methods.
//!
//! Triples outside the catalog return `None` from the table; the
//! dispatchers then either run the function-pointer slow path (when the
//! semiring carries [`CustomOps`]) or report a domain mismatch.
//!
//! Runtime type evidence (the output type of a same-domain semiring *is*
//! the input type; a comparison semiring's output *is* `bool`) is
//! established with `Any` downcasts of the concrete matrix and workspace
//! handles — the tagged-variant dispatch that replaces code generation.

#![allow(missing_docs)]

use std::any::Any;

use crate::catalog::{ops, BinOpCode, MonoidCode, Rig, Scalar, Semiring};
use crate::dot::DotArgs;
use crate::heap::{HeapArgs, HeapScratchArgs};
use crate::mask::Mask;
use crate::matrix::Matrix;
use crate::saxpy::{SaunaSrc, SaxpyArgs};
use crate::{Context, Error, Result};

const NOT_CATALOGUED: Error =
    Error::DomainMismatch("no monomorphized kernel for this semiring and type");

/// Monomorphized kernel-bank rows for one element type. Built-in types get
/// full tables; user-defined [`Scalar`]s implement this trait empty and run
/// through the slow path only.
pub trait KernelBank: Scalar {
    fn saxpy_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: SaxpyArgs<'_, Self, Self>,
    ) -> Option<Result<()>> {
        let _ = (add, mul, args);
        None
    }
    fn saxpy_cmp(
        add: MonoidCode,
        mul: BinOpCode,
        args: SaxpyArgs<'_, Self, bool>,
    ) -> Option<Result<()>> {
        let _ = (add, mul, args);
        None
    }
    fn dot_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: DotArgs<'_, Self>,
    ) -> Option<Result<Matrix<Self>>> {
        let _ = (add, mul, args);
        None
    }
    fn dot_cmp(
        add: MonoidCode,
        mul: BinOpCode,
        args: DotArgs<'_, Self>,
    ) -> Option<Result<Matrix<bool>>> {
        let _ = (add, mul, args);
        None
    }
    fn heap_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: HeapArgs<'_, Self>,
    ) -> Option<Result<Matrix<Self>>> {
        let _ = (add, mul, args);
        None
    }
    fn heap_cmp(
        add: MonoidCode,
        mul: BinOpCode,
        args: HeapArgs<'_, Self>,
    ) -> Option<Result<Matrix<bool>>> {
        let _ = (add, mul, args);
        None
    }
    fn heap_scratch_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: HeapScratchArgs<'_, Self>,
    ) -> Option<Result<Matrix<Self>>> {
        let _ = (add, mul, args);
        None
    }
    fn heap_scratch_cmp(
        add: MonoidCode,
        mul: BinOpCode,
        args: HeapScratchArgs<'_, Self>,
    ) -> Option<Result<Matrix<bool>>> {
        let _ = (add, mul, args);
        None
    }
}

/// Same-domain table: the four numeric monoids crossed with the fourteen
/// same-type multiplies.
macro_rules! same_table {
    ($kernel:path, $args:expr, $add:expr, $mul:expr, [$($mon:ident),*]) => {
        match ($add, $mul) {
            $(
                (MonoidCode::$mon, BinOpCode::First) => {
                    Some($kernel(Rig::<ops::$mon, ops::First>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Second) => {
                    Some($kernel(Rig::<ops::$mon, ops::Second>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Min) => {
                    Some($kernel(Rig::<ops::$mon, ops::Min>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Max) => {
                    Some($kernel(Rig::<ops::$mon, ops::Max>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Plus) => {
                    Some($kernel(Rig::<ops::$mon, ops::Plus>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Minus) => {
                    Some($kernel(Rig::<ops::$mon, ops::Minus>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Times) => {
                    Some($kernel(Rig::<ops::$mon, ops::Times>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Div) => {
                    Some($kernel(Rig::<ops::$mon, ops::Div>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::IsEq) => {
                    Some($kernel(Rig::<ops::$mon, ops::IsEq>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::IsNe) => {
                    Some($kernel(Rig::<ops::$mon, ops::IsNe>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::IsGt) => {
                    Some($kernel(Rig::<ops::$mon, ops::IsGt>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::IsLt) => {
                    Some($kernel(Rig::<ops::$mon, ops::IsLt>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::IsGe) => {
                    Some($kernel(Rig::<ops::$mon, ops::IsGe>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::IsLe) => {
                    Some($kernel(Rig::<ops::$mon, ops::IsLe>::default(), $args))
                }
            )*
            _ => None,
        }
    };
}

/// Comparison table: the four Boolean monoids crossed with the six
/// Boolean-valued comparisons over a numeric input type.
macro_rules! cmp_table {
    ($kernel:path, $args:expr, $add:expr, $mul:expr, [$($mon:ident),*]) => {
        match ($add, $mul) {
            $(
                (MonoidCode::$mon, BinOpCode::Eq) => {
                    Some($kernel(Rig::<ops::$mon, ops::Eq>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Ne) => {
                    Some($kernel(Rig::<ops::$mon, ops::Ne>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Gt) => {
                    Some($kernel(Rig::<ops::$mon, ops::Gt>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Lt) => {
                    Some($kernel(Rig::<ops::$mon, ops::Lt>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Ge) => {
                    Some($kernel(Rig::<ops::$mon, ops::Ge>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Le) => {
                    Some($kernel(Rig::<ops::$mon, ops::Le>::default(), $args))
                }
            )*
            _ => None,
        }
    };
}

/// Boolean table: the `lor/land/lxor/eq` square over `bool`.
macro_rules! bool_table {
    ($kernel:path, $args:expr, $add:expr, $mul:expr, [$($mon:ident),*]) => {
        match ($add, $mul) {
            $(
                (MonoidCode::$mon, BinOpCode::Lor) => {
                    Some($kernel(Rig::<ops::$mon, ops::Lor>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Land) => {
                    Some($kernel(Rig::<ops::$mon, ops::Land>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Lxor) => {
                    Some($kernel(Rig::<ops::$mon, ops::Lxor>::default(), $args))
                }
                (MonoidCode::$mon, BinOpCode::Eq) => {
                    Some($kernel(Rig::<ops::$mon, ops::Eq>::default(), $args))
                }
            )*
            _ => None,
        }
    };
}

macro_rules! impl_numeric_bank {
    ($($t:ty),* $(,)?) => {$(
        impl KernelBank for $t {
            fn saxpy_same(
                add: MonoidCode,
                mul: BinOpCode,
                args: SaxpyArgs<'_, Self, Self>,
            ) -> Option<Result<()>> {
                same_table!(crate::saxpy::apply, args, add, mul, [Min, Max, Plus, Times])
            }
            fn saxpy_cmp(
                add: MonoidCode,
                mul: BinOpCode,
                args: SaxpyArgs<'_, Self, bool>,
            ) -> Option<Result<()>> {
                cmp_table!(crate::saxpy::apply, args, add, mul, [Lor, Land, Lxor, Eq])
            }
            fn dot_same(
                add: MonoidCode,
                mul: BinOpCode,
                args: DotArgs<'_, Self>,
            ) -> Option<Result<Matrix<Self>>> {
                same_table!(crate::dot::apply, args, add, mul, [Min, Max, Plus, Times])
            }
            fn dot_cmp(
                add: MonoidCode,
                mul: BinOpCode,
                args: DotArgs<'_, Self>,
            ) -> Option<Result<Matrix<bool>>> {
                cmp_table!(crate::dot::apply, args, add, mul, [Lor, Land, Lxor, Eq])
            }
            fn heap_same(
                add: MonoidCode,
                mul: BinOpCode,
                args: HeapArgs<'_, Self>,
            ) -> Option<Result<Matrix<Self>>> {
                same_table!(crate::heap::apply, args, add, mul, [Min, Max, Plus, Times])
            }
            fn heap_cmp(
                add: MonoidCode,
                mul: BinOpCode,
                args: HeapArgs<'_, Self>,
            ) -> Option<Result<Matrix<bool>>> {
                cmp_table!(crate::heap::apply, args, add, mul, [Lor, Land, Lxor, Eq])
            }
            fn heap_scratch_same(
                add: MonoidCode,
                mul: BinOpCode,
                args: HeapScratchArgs<'_, Self>,
            ) -> Option<Result<Matrix<Self>>> {
                same_table!(crate::heap::apply_scratch, args, add, mul, [Min, Max, Plus, Times])
            }
            fn heap_scratch_cmp(
                add: MonoidCode,
                mul: BinOpCode,
                args: HeapScratchArgs<'_, Self>,
            ) -> Option<Result<Matrix<bool>>> {
                cmp_table!(crate::heap::apply_scratch, args, add, mul, [Lor, Land, Lxor, Eq])
            }
        }
    )*};
}

impl_numeric_bank!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl KernelBank for bool {
    fn saxpy_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: SaxpyArgs<'_, Self, Self>,
    ) -> Option<Result<()>> {
        bool_table!(crate::saxpy::apply, args, add, mul, [Lor, Land, Lxor, Eq])
    }
    fn dot_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: DotArgs<'_, Self>,
    ) -> Option<Result<Matrix<Self>>> {
        bool_table!(crate::dot::apply, args, add, mul, [Lor, Land, Lxor, Eq])
    }
    fn heap_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: HeapArgs<'_, Self>,
    ) -> Option<Result<Matrix<Self>>> {
        bool_table!(crate::heap::apply, args, add, mul, [Lor, Land, Lxor, Eq])
    }
    fn heap_scratch_same(
        add: MonoidCode,
        mul: BinOpCode,
        args: HeapScratchArgs<'_, Self>,
    ) -> Option<Result<Matrix<Self>>> {
        bool_table!(crate::heap::apply_scratch, args, add, mul, [Lor, Land, Lxor, Eq])
    }
}

// ============================================================================
// Runtime type evidence
// ============================================================================

fn cast_mut<S: 'static, T: 'static>(v: &mut S) -> Option<&mut T> {
    (v as &mut dyn Any).downcast_mut::<T>()
}

fn cast_ref<S: 'static, T: 'static>(v: &S) -> Option<&T> {
    (v as &dyn Any).downcast_ref::<T>()
}

fn cast_owned<S: 'static, T: 'static>(v: S) -> Option<T> {
    let boxed: Box<dyn Any> = Box::new(v);
    boxed.downcast::<T>().ok().map(|b| *b)
}

fn cast_sauna<Z: Scalar, W: Scalar>(src: SaunaSrc<'_, Z>) -> Option<SaunaSrc<'_, W>> {
    match src {
        SaunaSrc::Pool(p) => cast_ref(p).map(SaunaSrc::Pool),
        SaunaSrc::Single(s) => cast_mut(s).map(SaunaSrc::Single),
    }
}

// ============================================================================
// Dispatchers
// ============================================================================

/// Resolve and run the Gustavson kernel for a semiring descriptor.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dispatch_saxpy<A: KernelBank, Z: Scalar>(
    sr: &Semiring<A, Z>,
    c: &mut Matrix<Z>,
    mask: Option<&Mask<'_>>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    sauna: SaunaSrc<'_, Z>,
    ctx: &Context,
) -> Result<()> {
    match sr {
        Semiring::Custom(ops) => crate::saxpy::apply(
            *ops,
            SaxpyArgs {
                c,
                mask,
                a,
                b,
                flipxy,
                sauna,
                ctx,
            },
        ),
        Semiring::Builtin { add, mul } => {
            if mul.is_comparison() {
                let c = cast_mut::<_, Matrix<bool>>(c).ok_or(NOT_CATALOGUED)?;
                let sauna = cast_sauna::<Z, bool>(sauna).ok_or(NOT_CATALOGUED)?;
                let args = SaxpyArgs {
                    c,
                    mask,
                    a,
                    b,
                    flipxy,
                    sauna,
                    ctx,
                };
                A::saxpy_cmp(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))
            } else {
                let c = cast_mut::<_, Matrix<A>>(c).ok_or(NOT_CATALOGUED)?;
                let sauna = cast_sauna::<Z, A>(sauna).ok_or(NOT_CATALOGUED)?;
                let args = SaxpyArgs {
                    c,
                    mask,
                    a,
                    b,
                    flipxy,
                    sauna,
                    ctx,
                };
                A::saxpy_same(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))
            }
        }
    }
}

/// Resolve and run the dot kernel, returning the fresh product.
pub(crate) fn dispatch_dot<A: KernelBank, Z: Scalar>(
    sr: &Semiring<A, Z>,
    mask: Option<&Mask<'_>>,
    at: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    ctx: &Context,
) -> Result<Matrix<Z>> {
    let args = DotArgs {
        mask,
        at,
        b,
        flipxy,
        ctx,
    };
    match sr {
        Semiring::Custom(ops) => crate::dot::apply(*ops, args),
        Semiring::Builtin { add, mul } => {
            if mul.is_comparison() {
                let t = A::dot_cmp(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))?;
                cast_owned::<_, Matrix<Z>>(t).ok_or(NOT_CATALOGUED)
            } else {
                let t = A::dot_same(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))?;
                cast_owned::<_, Matrix<Z>>(t).ok_or(NOT_CATALOGUED)
            }
        }
    }
}

/// Resolve and run the heap kernel with engine-allocated scratch.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dispatch_heap<A: KernelBank, Z: Scalar>(
    sr: &Semiring<A, Z>,
    mask: Option<&Mask<'_>>,
    a: &Matrix<A>,
    b: &Matrix<A>,
    flipxy: bool,
    bjnz_max: usize,
    ctx: &Context,
) -> Result<Matrix<Z>> {
    let args = HeapArgs {
        mask,
        a,
        b,
        flipxy,
        bjnz_max,
        ctx,
    };
    match sr {
        Semiring::Custom(ops) => crate::heap::apply(*ops, args),
        Semiring::Builtin { add, mul } => {
            if mul.is_comparison() {
                let t = A::heap_cmp(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))?;
                cast_owned::<_, Matrix<Z>>(t).ok_or(NOT_CATALOGUED)
            } else {
                let t = A::heap_same(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))?;
                cast_owned::<_, Matrix<Z>>(t).ok_or(NOT_CATALOGUED)
            }
        }
    }
}

/// Resolve and run the heap kernel over caller-owned scratch (serial).
pub(crate) fn dispatch_heap_scratch<A: KernelBank, Z: Scalar>(
    sr: &Semiring<A, Z>,
    args: HeapScratchArgs<'_, A>,
) -> Result<Matrix<Z>> {
    match sr {
        Semiring::Custom(ops) => crate::heap::apply_scratch(*ops, args),
        Semiring::Builtin { add, mul } => {
            if mul.is_comparison() {
                let t = A::heap_scratch_cmp(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))?;
                cast_owned::<_, Matrix<Z>>(t).ok_or(NOT_CATALOGUED)
            } else {
                let t = A::heap_scratch_same(*add, *mul, args).unwrap_or(Err(NOT_CATALOGUED))?;
                cast_owned::<_, Matrix<Z>>(t).ok_or(NOT_CATALOGUED)
            }
        }
    }
}
