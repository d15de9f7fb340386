//! Float math for no_std builds, backed by `libm`. With `std` enabled the
//! inherent methods on `f32`/`f64` are used instead.

pub(super) trait FExt {
    fn round(self) -> Self;
    fn abs(self) -> Self;
    fn signum(self) -> Self;
    fn ceil(self) -> Self;
    fn floor(self) -> Self;
    fn trunc(self) -> Self;
    fn sqrt(self) -> Self;
    fn copysign(self, other: Self) -> Self;
}

macro_rules! impl_fext {
    ($ty:ty { $round:ident, $abs:ident, $ceil:ident, $floor:ident, $trunc:ident, $sqrt:ident, $copysign:ident }) => {
        impl FExt for $ty {
            fn round(self) -> Self {
                libm::$round(self)
            }

            fn abs(self) -> Self {
                libm::$abs(self)
            }

            fn signum(self) -> Self {
                libm::$copysign(1.0, self)
            }

            fn ceil(self) -> Self {
                libm::$ceil(self)
            }

            fn floor(self) -> Self {
                libm::$floor(self)
            }

            fn trunc(self) -> Self {
                libm::$trunc(self)
            }

            fn sqrt(self) -> Self {
                libm::$sqrt(self)
            }

            fn copysign(self, other: Self) -> Self {
                libm::$copysign(self, other)
            }
        }
    };
}

impl_fext!(f64 { round, fabs, ceil, floor, trunc, sqrt, copysign });
impl_fext!(f32 { roundf, fabsf, ceilf, floorf, truncf, sqrtf, copysignf });
