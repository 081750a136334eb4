//! Request record model: opcodes, base types, and the untyped operand cell.
//!
//! A request is a fixed-size, cache-line-aligned value type. Every operation
//! a device thread can ask the host proxy to perform is described by one
//! `Request`: the `(op, base)` pair selects the proxy handler, the remaining
//! fields carry operands. Operand values travel through a 128-bit untyped
//! cell ([`OpValue`]); the [`RingValue`] trait maps each supported element
//! type to and from that cell.

use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize, Ordering,
};

use crate::team::TeamId;

/// Operation selector. The proxy dispatch table is indexed by
/// `(Op, BaseType)`; cells with no handler hold the unsupported sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    // Service operations
    Nop = 0,
    Timestamp,
    Print,
    Exit,
    // RMA
    Put,
    PutScalar,
    Get,
    GetScalar,
    PutNbi,
    GetNbi,
    Iput,
    Iget,
    Ibput,
    Ibget,
    PutSignal,
    PutSignalNbi,
    // Blocking AMOs
    AmoFetch,
    AmoSet,
    AmoCompareSwap,
    AmoSwap,
    AmoFetchInc,
    AmoInc,
    AmoFetchAdd,
    AmoAdd,
    AmoFetchAnd,
    AmoAnd,
    AmoFetchOr,
    AmoOr,
    AmoFetchXor,
    AmoXor,
    // Non-blocking fetching AMOs
    AmoFetchNbi,
    AmoCompareSwapNbi,
    AmoSwapNbi,
    AmoFetchIncNbi,
    AmoFetchAddNbi,
    AmoFetchAndNbi,
    AmoFetchOrNbi,
    AmoFetchXorNbi,
    // Point-to-point synchronization
    Test,
    TestAll,
    TestAny,
    TestSome,
    TestAllVector,
    TestAnyVector,
    TestSomeVector,
    Wait,
    WaitAll,
    WaitAny,
    WaitSome,
    SignalWaitUntil,
    // Collectives entry points
    Barrier,
    Sync,
    Bcast,
    Fcollect,
    SumReduce,
    // Ordering
    Fence,
    Quiet,
}

impl Op {
    /// Number of opcodes; sizes the dispatch table's first dimension.
    pub const COUNT: usize = Op::Quiet as usize + 1;
}

/// Base element type. Orthogonal to [`Op`]: together they select a handler.
///
/// `LongDouble` has no native carrier in this implementation; every
/// `(op, LongDouble)` dispatch cell resolves to the unsupported sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaseType {
    Void = 0,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    LongDouble,
    Size,
    Ptrdiff,
}

impl BaseType {
    /// Number of base types; sizes the dispatch table's second dimension.
    pub const COUNT: usize = BaseType::Ptrdiff as usize + 1;
}

/// Comparison operator for the wait-until/test families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Cmp {
    Eq = 1,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Evaluate `value <cmp> rhs`.
#[inline]
pub fn compare<T: PartialOrd>(value: T, rhs: T, cmp: Cmp) -> bool {
    match cmp {
        Cmp::Eq => value == rhs,
        Cmp::Ne => value != rhs,
        Cmp::Gt => value > rhs,
        Cmp::Ge => value >= rhs,
        Cmp::Lt => value < rhs,
        Cmp::Le => value <= rhs,
    }
}

/// Signal update applied after a signaled put's payload is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SignalOp {
    Set = 0,
    Add = 1,
}

/// Untyped 128-bit operand cell. Typed access goes through [`RingValue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct OpValue(pub [u64; 2]);

impl OpValue {
    pub const ZERO: OpValue = OpValue([0; 2]);
}

/// Element types that can ride the upcall ring.
///
/// Maps a Rust type to its [`BaseType`] tag and through the operand cell.
pub trait RingValue: Copy + Send + Sync + PartialOrd + 'static {
    const BASE: BaseType;

    fn to_bits(self) -> OpValue;
    fn from_bits(v: OpValue) -> Self;
}

macro_rules! impl_ring_value_int {
    ($($ty:ty => $base:ident),+ $(,)?) => {
        $(impl RingValue for $ty {
            const BASE: BaseType = BaseType::$base;

            #[inline]
            fn to_bits(self) -> OpValue {
                OpValue([self as u64, 0])
            }

            #[inline]
            fn from_bits(v: OpValue) -> Self {
                v.0[0] as $ty
            }
        })+
    };
}

impl_ring_value_int! {
    u8 => Uint8, u16 => Uint16, u32 => Uint32, u64 => Uint64,
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    usize => Size, isize => Ptrdiff,
}

impl RingValue for f32 {
    const BASE: BaseType = BaseType::Float;

    #[inline]
    fn to_bits(self) -> OpValue {
        OpValue([u64::from(self.to_bits()), 0])
    }

    #[inline]
    fn from_bits(v: OpValue) -> Self {
        f32::from_bits(v.0[0] as u32)
    }
}

impl RingValue for f64 {
    const BASE: BaseType = BaseType::Double;

    #[inline]
    fn to_bits(self) -> OpValue {
        OpValue([self.to_bits(), 0])
    }

    #[inline]
    fn from_bits(v: OpValue) -> Self {
        f64::from_bits(v.0[0])
    }
}

// =============================================================================
// ATOMIC ACCESS
// =============================================================================
//
// AMOs are sequentially consistent with system scope. Integer types map to
// the matching std atomic through `Atomic*::from_ptr`; `NATIVE` marks them
// eligible for the device fast path. Floats carry `NATIVE = false` — the
// device must route them through the ring, where the host performs the
// operation as a compare-exchange loop on the bit pattern.

/// Load/store/swap/compare-swap over a raw element pointer.
pub trait AtomicBits: RingValue {
    /// Whether the device fast path may operate on this type directly.
    const NATIVE: bool;

    /// # Safety
    /// `p` must be valid, properly aligned, and not concurrently accessed
    /// through non-atomic operations.
    unsafe fn atomic_load(p: *mut Self) -> Self;
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_store(p: *mut Self, v: Self);
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_swap(p: *mut Self, v: Self) -> Self;
    /// Compare-and-swap; returns the prior value whether or not the swap
    /// happened.
    ///
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_compare_swap(p: *mut Self, expected: Self, desired: Self) -> Self;
}

/// Arithmetic read-modify-write (fetch-add and friends).
pub trait AtomicArith: AtomicBits {
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_fetch_add(p: *mut Self, v: Self) -> Self;

    /// The additive identity's successor, for inc/fetch-inc.
    fn one() -> Self;
}

/// Bitwise read-modify-write. Integer types only.
pub trait AtomicBitwise: AtomicBits {
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_fetch_and(p: *mut Self, v: Self) -> Self;
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_fetch_or(p: *mut Self, v: Self) -> Self;
    /// # Safety
    /// Same contract as [`AtomicBits::atomic_load`].
    unsafe fn atomic_fetch_xor(p: *mut Self, v: Self) -> Self;
}

macro_rules! impl_atomic_int {
    ($($ty:ty => $atomic:ident),+ $(,)?) => {
        $(
            impl AtomicBits for $ty {
                const NATIVE: bool = true;

                #[inline]
                unsafe fn atomic_load(p: *mut Self) -> Self {
                    $atomic::from_ptr(p).load(Ordering::SeqCst)
                }

                #[inline]
                unsafe fn atomic_store(p: *mut Self, v: Self) {
                    $atomic::from_ptr(p).store(v, Ordering::SeqCst);
                }

                #[inline]
                unsafe fn atomic_swap(p: *mut Self, v: Self) -> Self {
                    $atomic::from_ptr(p).swap(v, Ordering::SeqCst)
                }

                #[inline]
                unsafe fn atomic_compare_swap(p: *mut Self, expected: Self, desired: Self) -> Self {
                    match $atomic::from_ptr(p).compare_exchange(
                        expected,
                        desired,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(prev) | Err(prev) => prev,
                    }
                }
            }

            impl AtomicArith for $ty {
                #[inline]
                unsafe fn atomic_fetch_add(p: *mut Self, v: Self) -> Self {
                    $atomic::from_ptr(p).fetch_add(v, Ordering::SeqCst)
                }

                #[inline]
                fn one() -> Self {
                    1
                }
            }

            impl AtomicBitwise for $ty {
                #[inline]
                unsafe fn atomic_fetch_and(p: *mut Self, v: Self) -> Self {
                    $atomic::from_ptr(p).fetch_and(v, Ordering::SeqCst)
                }

                #[inline]
                unsafe fn atomic_fetch_or(p: *mut Self, v: Self) -> Self {
                    $atomic::from_ptr(p).fetch_or(v, Ordering::SeqCst)
                }

                #[inline]
                unsafe fn atomic_fetch_xor(p: *mut Self, v: Self) -> Self {
                    $atomic::from_ptr(p).fetch_xor(v, Ordering::SeqCst)
                }
            }
        )+
    };
}

impl_atomic_int! {
    u8 => AtomicU8, u16 => AtomicU16, u32 => AtomicU32, u64 => AtomicU64,
    i8 => AtomicI8, i16 => AtomicI16, i32 => AtomicI32, i64 => AtomicI64,
    usize => AtomicUsize, isize => AtomicIsize,
}

macro_rules! impl_atomic_float {
    ($($ty:ty => ($bits:ty, $atomic:ident)),+ $(,)?) => {
        $(
            impl AtomicBits for $ty {
                const NATIVE: bool = false;

                #[inline]
                unsafe fn atomic_load(p: *mut Self) -> Self {
                    <$ty>::from_bits($atomic::from_ptr(p.cast::<$bits>()).load(Ordering::SeqCst))
                }

                #[inline]
                unsafe fn atomic_store(p: *mut Self, v: Self) {
                    $atomic::from_ptr(p.cast::<$bits>()).store(v.to_bits(), Ordering::SeqCst);
                }

                #[inline]
                unsafe fn atomic_swap(p: *mut Self, v: Self) -> Self {
                    <$ty>::from_bits(
                        $atomic::from_ptr(p.cast::<$bits>()).swap(v.to_bits(), Ordering::SeqCst),
                    )
                }

                #[inline]
                unsafe fn atomic_compare_swap(p: *mut Self, expected: Self, desired: Self) -> Self {
                    let a = $atomic::from_ptr(p.cast::<$bits>());
                    match a.compare_exchange(
                        expected.to_bits(),
                        desired.to_bits(),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(prev) | Err(prev) => <$ty>::from_bits(prev),
                    }
                }
            }

            impl AtomicArith for $ty {
                unsafe fn atomic_fetch_add(p: *mut Self, v: Self) -> Self {
                    // Emulated: compare-exchange loop on the bit pattern.
                    let a = $atomic::from_ptr(p.cast::<$bits>());
                    let mut current = a.load(Ordering::SeqCst);
                    loop {
                        let next = (<$ty>::from_bits(current) + v).to_bits();
                        match a.compare_exchange_weak(
                            current,
                            next,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        ) {
                            Ok(prev) => return <$ty>::from_bits(prev),
                            Err(observed) => current = observed,
                        }
                    }
                }

                #[inline]
                fn one() -> Self {
                    1.0
                }
            }
        )+
    };
}

impl_atomic_float! {
    f32 => (u32, AtomicU32),
    f64 => (u64, AtomicU64),
}

// =============================================================================
// REQUEST RECORD
// =============================================================================

/// One upcall request.
///
/// Addresses are carried as `usize` in the issuing PE's view of the
/// symmetric heap; the handler translates them for the target PE. On
/// hardware with a single wide-store transfer the whole record publishes
/// atomically; here publication uses the fallback protocol — payload fields
/// first, then a release store of the slot's sequence stamp — so field
/// order within the record does not matter, only the stamp does.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct Request {
    pub op: Op,
    pub base: BaseType,
    /// Low 16 bits of the producer ticket; ring-slot generation counter and
    /// completion correlator.
    pub sequence: u16,
    /// 0 when only the built-in completion is used, else the index of an
    /// allocated completion slot.
    pub completion: u16,
    pub dest_pe: i32,
    pub dst: usize,
    pub src: usize,
    pub fetch: usize,
    pub value: OpValue,
    pub cond: OpValue,
    pub cmp_value: OpValue,
    pub nelems: usize,
    pub bsize: usize,
    pub dst_stride: isize,
    pub src_stride: isize,
    pub sig_addr: usize,
    pub signal: u64,
    pub sig_op: SignalOp,
    pub cmp: Cmp,
    pub cmp_values: usize,
    pub status: usize,
    pub indices: usize,
    pub root: i32,
    pub team: TeamId,
}

impl Request {
    pub fn new(op: Op, base: BaseType) -> Self {
        Self {
            op,
            base,
            sequence: 0,
            completion: 0,
            dest_pe: -1,
            dst: 0,
            src: 0,
            fetch: 0,
            value: OpValue::ZERO,
            cond: OpValue::ZERO,
            cmp_value: OpValue::ZERO,
            nelems: 0,
            bsize: 0,
            dst_stride: 0,
            src_stride: 0,
            sig_addr: 0,
            signal: 0,
            sig_op: SignalOp::Set,
            cmp: Cmp::Eq,
            cmp_values: 0,
            status: 0,
            indices: 0,
            root: 0,
            team: crate::team::TEAM_WORLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opvalue_roundtrip_ints() {
        assert_eq!(u32::from_bits(0xDEAD_BEEFu32.to_bits()), 0xDEAD_BEEF);
        assert_eq!(i64::from_bits((-42i64).to_bits()), -42);
        assert_eq!(usize::from_bits(usize::MAX.to_bits()), usize::MAX);
        assert_eq!(u8::from_bits(0xA5u8.to_bits()), 0xA5);
    }

    #[test]
    fn test_opvalue_roundtrip_floats() {
        assert_eq!(
            <f32 as RingValue>::from_bits(RingValue::to_bits(3.5f32)),
            3.5
        );
        assert_eq!(
            <f64 as RingValue>::from_bits(RingValue::to_bits(-0.125f64)),
            -0.125
        );
    }

    #[test]
    fn test_compare_operators() {
        assert!(compare(3u64, 3, Cmp::Eq));
        assert!(compare(3u64, 4, Cmp::Ne));
        assert!(compare(5i32, 4, Cmp::Gt));
        assert!(compare(4i32, 4, Cmp::Ge));
        assert!(compare(-1i32, 0, Cmp::Lt));
        assert!(compare(0i32, 0, Cmp::Le));
        assert!(!compare(1u32, 2, Cmp::Eq));
    }

    #[test]
    fn test_native_atomic_ops() {
        let mut word = 10u64;
        let p = std::ptr::addr_of_mut!(word);
        unsafe {
            assert_eq!(u64::atomic_fetch_add(p, 5), 10);
            assert_eq!(u64::atomic_load(p), 15);
            assert_eq!(u64::atomic_swap(p, 99), 15);
            assert_eq!(u64::atomic_compare_swap(p, 99, 1), 99);
            assert_eq!(u64::atomic_compare_swap(p, 99, 7), 1);
            assert_eq!(u64::atomic_load(p), 1);
        }
    }

    #[test]
    fn test_float_atomic_emulation() {
        assert!(!f64::NATIVE);
        let mut x = 1.5f64;
        let p = std::ptr::addr_of_mut!(x);
        unsafe {
            assert_eq!(f64::atomic_fetch_add(p, 2.0), 1.5);
            assert_eq!(f64::atomic_load(p), 3.5);
            assert_eq!(f64::atomic_swap(p, -1.0), 3.5);
        }
        assert_eq!(x, -1.0);
    }

    #[test]
    fn test_enum_counts() {
        assert_eq!(BaseType::COUNT, 14);
        assert!(Op::COUNT > 50);
    }

    #[test]
    fn test_request_is_slot_sized() {
        // One slot per request; alignment keeps slots from sharing lines.
        assert_eq!(std::mem::align_of::<Request>() % 64, 0);
        assert!(std::mem::size_of::<Request>() <= 256);
    }
}
