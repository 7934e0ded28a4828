//! Equality Strategies
//!
//! A strategy decides whether a freshly computed value counts as "changed"
//! relative to the cached one. When it reports equal, the cached value and
//! version are kept and downstream observers see no change.
//!
//! Four strategies are provided:
//!
//! - [`Equality::partial_eq`]: structural comparison via `PartialEq` (default).
//! - [`Equality::identity`]: conservative, only the very same allocation is
//!   equal. Use this when values are not safely or cheaply comparable.
//! - [`Equality::same_value`]: strict comparison via [`SameValue`], which gives
//!   floating point values a consistent identity (NaN equals NaN, `+0.0` and
//!   `-0.0` differ).
//! - [`Equality::custom`]: any user comparator.
//!
//! Values reach the strategy type-erased, so every constructor captures the
//! concrete type and downcasts before comparing. A failed downcast is treated
//! as "changed".

use std::any::Any;
use std::fmt;
use std::rc::Rc;

type CompareFn = dyn Fn(&Rc<dyn Any>, &Rc<dyn Any>) -> bool;

/// A value-comparison policy.
#[derive(Clone)]
pub struct Equality {
    kind: &'static str,
    compare: Rc<CompareFn>,
}

impl Equality {
    /// Structural equality using `PartialEq`.
    ///
    /// Two handles to the same allocation are always equal, even for types
    /// whose `PartialEq` is not reflexive.
    pub fn partial_eq<T: PartialEq + 'static>() -> Self {
        Self {
            kind: "partial_eq",
            compare: Rc::new(|old: &Rc<dyn Any>, new: &Rc<dyn Any>| {
                Rc::ptr_eq(old, new)
                    || match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
            }),
        }
    }

    /// Conservative equality: only referentially identical values are equal.
    ///
    /// Every recomputation that produces a new allocation counts as a change,
    /// even if the contents compare equal.
    pub fn identity() -> Self {
        Self {
            kind: "identity",
            compare: Rc::new(|old: &Rc<dyn Any>, new: &Rc<dyn Any>| Rc::ptr_eq(old, new)),
        }
    }

    /// Strict equality using [`SameValue`].
    pub fn same_value<T: SameValue + 'static>() -> Self {
        Self {
            kind: "same_value",
            compare: Rc::new(|old: &Rc<dyn Any>, new: &Rc<dyn Any>| {
                Rc::ptr_eq(old, new)
                    || match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                        (Some(a), Some(b)) => a.same_value(b),
                        _ => false,
                    }
            }),
        }
    }

    /// A user-supplied comparator. Returns `true` when `old` and `new` should
    /// be considered equal.
    pub fn custom<T, F>(eq: F) -> Self
    where
        T: 'static,
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            kind: "custom",
            compare: Rc::new(move |old: &Rc<dyn Any>, new: &Rc<dyn Any>| {
                match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                    (Some(a), Some(b)) => eq(a, b),
                    _ => false,
                }
            }),
        }
    }

    /// Compare a cached value against a freshly computed one.
    pub fn equals(&self, old: &Rc<dyn Any>, new: &Rc<dyn Any>) -> bool {
        (self.compare)(old, new)
    }

    /// Short name of the strategy, used in logs.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl fmt::Debug for Equality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Equality").field(&self.kind).finish()
    }
}

/// Strict value identity.
///
/// Unlike `PartialEq`, this relation is reflexive for every value: a float NaN
/// is the same value as any other NaN. Signed zeros are distinguished.
pub trait SameValue {
    /// Whether `self` and `other` are the same value.
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! same_value_via_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_via_eq!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String, &'static str, ()
);

macro_rules! same_value_float {
    ($($ty:ty),*) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    if self.is_nan() {
                        return other.is_nan();
                    }
                    self.to_bits() == other.to_bits()
                }
            }
        )*
    };
}

same_value_float!(f32, f64);

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ?Sized> SameValue for Rc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}
