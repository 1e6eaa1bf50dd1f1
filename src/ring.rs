//! Fixed-width ring elements: unsigned integers with all arithmetic modulo
//! 2^k.
//!
//! Every protocol routine is generic over [`Ring`] and monomorphized per
//! width; [`RingWidth`] is a closed tag used only to key per-width caches
//! (oblivious-transfer key material, Beaver triples), never to branch inside
//! the numeric kernels.

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

/// The supported ring widths, used as cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingWidth {
    /// Z_2^8
    K8,
    /// Z_2^16
    K16,
    /// Z_2^32
    K32,
    /// Z_2^64
    K64,
    /// Z_2^128
    K128,
}

/// An element of Z_2^k for a fixed k, with wraparound arithmetic.
pub trait Ring:
    Copy + Clone + Debug + Default + Eq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The bit width k of the ring.
    const BITS: u32;
    /// The cache tag for this width.
    const WIDTH: RingWidth;
    /// The additive identity.
    const ZERO: Self;
    /// The multiplicative identity.
    const ONE: Self;

    /// Addition modulo 2^k.
    fn add(self, rhs: Self) -> Self;
    /// Subtraction modulo 2^k.
    fn sub(self, rhs: Self) -> Self;
    /// Multiplication modulo 2^k.
    fn mul(self, rhs: Self) -> Self;
    /// Additive inverse modulo 2^k.
    fn neg(self) -> Self;
    /// Bitwise XOR.
    fn xor(self, rhs: Self) -> Self;
    /// Bitwise AND.
    fn and(self, rhs: Self) -> Self;
    /// Left shift; yields zero once `n >= BITS`.
    fn shl(self, n: u32) -> Self;
    /// Logical right shift; yields zero once `n >= BITS`.
    fn shr(self, n: u32) -> Self;

    /// Truncating conversion from u128.
    fn from_u128(v: u128) -> Self;
    /// Zero-extending conversion to u128.
    fn to_u128(self) -> u128;

    /// The bit at position `i` (zero for `i >= BITS`).
    fn bit(self, i: u32) -> bool {
        i < Self::BITS && self.shr(i).and(Self::ONE) == Self::ONE
    }
}

macro_rules! impl_ring {
    ($t:ty, $width:expr) => {
        impl Ring for $t {
            const BITS: u32 = <$t>::BITS;
            const WIDTH: RingWidth = $width;
            const ZERO: Self = 0;
            const ONE: Self = 1;

            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn neg(self) -> Self {
                self.wrapping_neg()
            }

            fn xor(self, rhs: Self) -> Self {
                self ^ rhs
            }

            fn and(self, rhs: Self) -> Self {
                self & rhs
            }

            fn shl(self, n: u32) -> Self {
                if n >= Self::BITS { 0 } else { self << n }
            }

            fn shr(self, n: u32) -> Self {
                if n >= Self::BITS { 0 } else { self >> n }
            }

            fn from_u128(v: u128) -> Self {
                v as $t
            }

            fn to_u128(self) -> u128 {
                self as u128
            }
        }
    };
}

impl_ring!(u8, RingWidth::K8);
impl_ring!(u16, RingWidth::K16);
impl_ring!(u32, RingWidth::K32);
impl_ring!(u64, RingWidth::K64);
impl_ring!(u128, RingWidth::K128);

/// The number of bytes needed to carry one element of `R` on the wire.
pub(crate) fn byte_width<R: Ring>() -> usize {
    (R::BITS as usize).div_ceil(8)
}

/// Encodes an element as `byte_width::<R>()` little-endian bytes.
pub(crate) fn to_le_bytes<R: Ring>(v: R) -> Vec<u8> {
    v.to_u128().to_le_bytes()[..byte_width::<R>()].to_vec()
}

/// Decodes an element from its little-endian byte encoding.
pub(crate) fn from_le_bytes<R: Ring>(bytes: &[u8]) -> R {
    let mut buf = [0u8; 16];
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    R::from_u128(u128::from_le_bytes(buf))
}
