//! Macros generating the instruction implementations over register operands.
//!
//! Each reads its sources from the current frame's registers and writes the
//! destination register; traps return early out of the dispatch loop.

/// Apply an arithmetic method or operator to two registers
macro_rules! arithmetic {
    ($op:ident, $ty:ty, $self:ident, $dst:ident, $lhs:ident, $rhs:ident) => {{
        let a: $ty = $self.stack.get($self.base, $lhs).into();
        let b: $ty = $self.stack.get($self.base, $rhs).into();
        $self.stack.set($self.base, $dst, (a.$op(b) as $ty).into());
    }};

    // also allow operators such as +, -
    ($op:tt, $ty:ty, $self:ident, $dst:ident, $lhs:ident, $rhs:ident) => {{
        let a: $ty = $self.stack.get($self.base, $lhs).into();
        let b: $ty = $self.stack.get($self.base, $rhs).into();
        $self.stack.set($self.base, $dst, (a $op b).into());
    }};
}

/// Apply an arithmetic method to a single register
macro_rules! arithmetic_single {
    ($op:ident, $ty:ty, $self:ident, $dst:ident, $src:ident) => {{
        arithmetic_single!($op, $ty, $ty, $self, $dst, $src)
    }};

    ($op:ident, $from:ty, $to:ty, $self:ident, $dst:ident, $src:ident) => {{
        let a: $from = $self.stack.get($self.base, $src).into();
        $self.stack.set($self.base, $dst, (a.$op() as $to).into());
    }};
}

/// Compare two registers
macro_rules! comp {
    ($op:tt, $ty:ty, $self:ident, $dst:ident, $lhs:ident, $rhs:ident) => {{
        let a: $ty = $self.stack.get($self.base, $lhs).into();
        let b: $ty = $self.stack.get($self.base, $rhs).into();
        $self.stack.set($self.base, $dst, ((a $op b) as i32).into());
    }};
}

/// Compare a register to zero
macro_rules! comp_zero {
    ($op:tt, $ty:ty, $self:ident, $dst:ident, $src:ident) => {{
        let a: $ty = $self.stack.get($self.base, $src).into();
        $self.stack.set($self.base, $dst, ((a $op 0) as i32).into());
    }};
}

/// Integer division with the wasm trap semantics
macro_rules! checked_int_div {
    ($op:ident, $ty:ty, $self:ident, $dst:ident, $lhs:ident, $rhs:ident) => {{
        let a: $ty = $self.stack.get($self.base, $lhs).into();
        let b: $ty = $self.stack.get($self.base, $rhs).into();
        if unlikely(b == 0) {
            return Err(Error::Trap(Trap::IntegerDivideByZero));
        }
        let result = a.$op(b).ok_or(Error::Trap(Trap::IntegerOverflow))?;
        $self.stack.set($self.base, $dst, result.into());
    }};
}

/// Integer remainder: traps on a zero divisor, `MIN rem -1` is zero
macro_rules! wrapping_int_rem {
    ($ty:ty, $self:ident, $dst:ident, $lhs:ident, $rhs:ident) => {{
        let a: $ty = $self.stack.get($self.base, $lhs).into();
        let b: $ty = $self.stack.get($self.base, $rhs).into();
        if unlikely(b == 0) {
            return Err(Error::Trap(Trap::IntegerDivideByZero));
        }
        $self.stack.set($self.base, $dst, a.wrapping_rem(b).into());
    }};
}

/// Convert a register value with `as` semantics (also the saturating
/// float-to-int conversions, which `as` implements exactly)
macro_rules! conv {
    ($from:ty, $to:ty, $self:ident, $dst:ident, $src:ident) => {{
        let a: $from = $self.stack.get($self.base, $src).into();
        $self.stack.set($self.base, $dst, (a as $to).into());
    }};

    // conversion through an intermediate type (sign extensions)
    ($from:ty, $mid:ty, $to:ty, $self:ident, $dst:ident, $src:ident) => {{
        let a: $from = $self.stack.get($self.base, $src).into();
        $self.stack.set($self.base, $dst, ((a as $mid) as $to).into());
    }};
}

/// The min/max bounds for a trapping float-to-int conversion. Rust sadly
/// doesn't have wrapping casts for floats, so the overflow check is explicit.
#[rustfmt::skip]
macro_rules! float_min_max {
    (f32, i32) => {(-2147483904.0_f32, 2147483648.0_f32)};
    (f64, i32) => {(-2147483649.0_f64, 2147483648.0_f64)};
    (f32, u32) => {(-1.0_f32, 4294967296.0_f32)}; // 2^32
    (f64, u32) => {(-1.0_f64, 4294967296.0_f64)}; // 2^32
    (f32, i64) => {(-9223373136366403584.0_f32, 9223372036854775808.0_f32)}; // 2^63 + 2^40 | 2^63
    (f64, i64) => {(-9223372036854777856.0_f64, 9223372036854775808.0_f64)}; // 2^63 + 2^40 | 2^63
    (f32, u64) => {(-1.0_f32, 18446744073709551616.0_f32)}; // 2^64
    (f64, u64) => {(-1.0_f64, 18446744073709551616.0_f64)}; // 2^64
    // other conversions are not allowed
    ($from:ty, $to:ty) => {compile_error!("invalid float conversion")};
}

/// Trapping float-to-int conversion
macro_rules! checked_conv_float {
    ($from:tt, $to:tt, $self:ident, $dst:ident, $src:ident) => {{
        checked_conv_float!($from, $to, $to, $self, $dst, $src)
    }};
    // conversion with an intermediate unsigned type
    ($from:tt, $intermediate:tt, $to:tt, $self:ident, $dst:ident, $src:ident) => {{
        let (min, max) = float_min_max!($from, $intermediate);
        let a: $from = $self.stack.get($self.base, $src).into();

        if unlikely(a.is_nan()) {
            return Err(Error::Trap(Trap::InvalidConversionToInteger));
        }
        if unlikely(a <= min || a >= max) {
            return Err(Error::Trap(Trap::IntegerOverflow));
        }

        $self.stack.set($self.base, $dst, (a as $intermediate as $to).into());
    }};
}

/// Load a value from the default memory
macro_rules! mem_load {
    ($ty:ty, $self:ident, $dst:ident, $addr:ident, $offset:ident) => {{
        mem_load!($ty, $ty, $self, $dst, $addr, $offset)
    }};

    ($load_ty:ty, $target_ty:ty, $self:ident, $dst:ident, $addr:ident, $offset:ident) => {{
        const LEN: usize = core::mem::size_of::<$load_ty>();
        let a: u32 = $self.stack.get($self.base, $addr).into();
        let val = {
            let mem = $self.default_memory()?.borrow();
            let addr = $offset.checked_add(a as u64).and_then(|addr| usize::try_from(addr).ok()).ok_or_else(|| {
                cold();
                Error::Trap(Trap::OutOfBoundsMemoryAccess { offset: $offset as usize, len: LEN, max: mem.data.len() })
            })?;
            <$load_ty>::from_le_bytes(mem.load_bytes::<LEN>(addr)?)
        };
        $self.stack.set($self.base, $dst, (val as $target_ty).into());
    }};
}

/// Store a value to the default memory
macro_rules! mem_store {
    ($ty:ty, $self:ident, $addr:ident, $src:ident, $offset:ident) => {{
        mem_store!($ty, $ty, $self, $addr, $src, $offset)
    }};

    ($val_ty:ty, $store_ty:ty, $self:ident, $addr:ident, $src:ident, $offset:ident) => {{
        const LEN: usize = core::mem::size_of::<$store_ty>();
        let val: $val_ty = $self.stack.get($self.base, $src).into();
        let a: u32 = $self.stack.get($self.base, $addr).into();
        let mut mem = $self.default_memory()?.borrow_mut();
        let addr = $offset.checked_add(a as u64).and_then(|addr| usize::try_from(addr).ok()).ok_or_else(|| {
            cold();
            Error::Trap(Trap::OutOfBoundsMemoryAccess { offset: $offset as usize, len: LEN, max: mem.data.len() })
        })?;
        mem.store(addr, &(val as $store_ty).to_le_bytes())?;
    }};
}

pub(super) use arithmetic;
pub(super) use arithmetic_single;
pub(super) use checked_conv_float;
pub(super) use checked_int_div;
pub(super) use comp;
pub(super) use comp_zero;
pub(super) use conv;
pub(super) use float_min_max;
pub(super) use mem_load;
pub(super) use mem_store;
pub(super) use wrapping_int_rem;
