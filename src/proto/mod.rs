//! The two-party protocol engines and the operation facade.
//!
//! The modules in here decide *how* each secure operation is executed:
//! [`compare`] implements the oblivious-transfer-based digit-decomposition
//! comparison engine, `equal` the digit equality engine, `ole` the
//! oblivious-linear-evaluation multiplication engine (also backing Beaver
//! triple generation), and [`kernels`] composes them into the operations
//! consumed by the outer runtime.

pub mod compare;
pub mod kernels;
pub mod shares;
pub mod truncate;

pub(crate) mod basic_ot;
pub(crate) mod dispatch;
pub(crate) mod equal;
pub(crate) mod ole;
pub(crate) mod ot;

use crate::channel;

/// Errors raised by the protocol engines.
///
/// Precondition violations (shapes, bit widths, ranks, operand kinds) are
/// detected synchronously before any network round and always signal a caller
/// bug. [`Error::BeaverExhausted`] signals correlated-randomness misuse and
/// is never recoverable: re-running a protocol step with the same randomness
/// would break the security reduction. Channel errors propagate unchanged
/// from the transport; no protocol step is ever retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error("channel: {0}")]
    Channel(#[from] channel::Error),
    /// The operand shapes do not match the operation's contract.
    #[error("shape mismatch: lhs={lhs:?}, rhs={rhs:?}")]
    ShapeMismatch {
        /// Shape of the left-hand operand.
        lhs: Vec<usize>,
        /// Shape of the right-hand operand.
        rhs: Vec<usize>,
    },
    /// A bit width exceeds the capacity of the ring.
    #[error("bit width {nbits} exceeds the {ring_bits}-bit ring")]
    BitwidthOutOfRange {
        /// The requested bit width.
        nbits: u32,
        /// The bit capacity of the ring.
        ring_bits: u32,
    },
    /// The comparison radix is outside `1..=4`.
    #[error("compare radix {0} is outside 1..=4")]
    InvalidRadix(u32),
    /// The party rank is not 0 or 1.
    #[error("invalid rank {0}, must be 0 or 1")]
    InvalidRank(usize),
    /// A privately-owned operand is missing its data on the owning party.
    #[error("party {rank} owns the private operand but holds no data")]
    MissingPrivateValue {
        /// The rank that should hold the data.
        rank: usize,
    },
    /// More Beaver-triple elements were requested than the cache could
    /// provide. Fatal: continuing would reuse correlated randomness.
    #[error("beaver cache exhausted: requested {requested}, cached {cached}")]
    BeaverExhausted {
        /// The number of triple elements requested.
        requested: usize,
        /// The number of triple elements available.
        cached: usize,
    },
    /// Both private operands of a product belong to the same party; the
    /// result would not be a genuine two-party sharing.
    #[error("both private operands are owned by rank {0}")]
    PrivateOperandsSameOwner(usize),
    /// A received group element could not be decoded.
    #[error("malformed curve point in OT transcript")]
    MalformedPoint,
    /// An OT payload had an unexpected size.
    #[error("OT payload length mismatch")]
    PayloadLength,
}
