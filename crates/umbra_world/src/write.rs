//! Single-scalar pokes. The only write surface the mirror exposes.

use bytemuck::Pod;

mod sealed {
    pub trait Sealed {}
}

/// A plain numeric value that may be written to the target.
pub trait ScalarValue: Pod + PartialEq + std::fmt::Debug + Send + sealed::Sealed {
    /// Widened for tolerance comparisons.
    fn to_f64(self) -> f64;
}

macro_rules! scalar {
    ($($ty:ty),*) => {$(
        impl sealed::Sealed for $ty {}

        impl ScalarValue for $ty {
            #[allow(clippy::cast_lossless, clippy::cast_precision_loss)]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// True if `current` is within `tolerance` of `desired`.
#[must_use]
pub fn within<T: ScalarValue>(current: T, desired: T, tolerance: f64) -> bool {
    current == desired || (current.to_f64() - desired.to_f64()).abs() <= tolerance
}
