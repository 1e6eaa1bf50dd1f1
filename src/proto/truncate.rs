//! Probabilistic truncation of additive shares.
//!
//! Shifting both shares right by `s` loses the carry out of the dropped low
//! bits and, worse, leaves the wrap of the modular addition scaled by
//! `2^(k-s)` in the result. The engine removes the wrap obliviously: the
//! wrap bit `1{x0 + x1 >= 2^k}` is computed as a comparison between rank 0's
//! complemented share and rank 1's share, converted to arithmetic shares,
//! and subtracted back in at the top. The dropped carry remains, so the
//! result may be smaller than the true quotient by one: a one-bit error in
//! the last place, which fixed-point callers absorb.
//!
//! Signed values are handled heuristically: when the sign is unknown,
//! rank 0 lifts its share by `2^(k-2)` so the shifted value is positive,
//! truncates, and removes the shifted offset. This is exact (up to the same
//! one-bit error) whenever `|x| < 2^(k-2)`.

use tracing::debug;

use crate::{
    channel::Channel,
    proto::{Error, basic_ot, compare},
    ring::Ring,
    session::Session,
    tensor::Tensor,
};

/// What the caller knows about the sign of the truncated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignHint {
    /// Nothing is known; the heuristic offset is applied.
    #[default]
    Unknown,
    /// All values are non-negative; truncation needs no offset.
    Positive,
    /// All values are negative. Currently handled like [`SignHint::Unknown`];
    /// the hint is kept so callers can record what they know.
    Negative,
}

/// Parameters of one truncation.
#[derive(Debug, Clone, Copy)]
pub struct TruncMeta {
    /// Whether the values are signed (two's complement). Unsigned values
    /// truncate like provably positive ones.
    pub signed: bool,
    /// The sign knowledge used to elide the heuristic offset.
    pub sign: SignHint,
    /// The number of bits to shift right, in `1..R::BITS`.
    pub shift: u32,
}

impl TruncMeta {
    /// Truncation by `shift` of signed values of unknown sign.
    pub fn new(shift: u32) -> Self {
        TruncMeta {
            signed: true,
            sign: SignHint::Unknown,
            shift,
        }
    }
}

/// Rejects shift amounts the ring (or the offset path) cannot represent.
/// Runs before any network round.
pub(crate) fn check_shift<R: Ring>(meta: &TruncMeta) -> Result<(), Error> {
    let use_offset = meta.signed && meta.sign != SignHint::Positive;
    // The offset path must keep 2^(k-2-shift) representable.
    let max_shift = if use_offset { R::BITS - 1 } else { R::BITS };
    if meta.shift != 0 && meta.shift >= max_shift {
        return Err(Error::BitwidthOutOfRange {
            nbits: meta.shift,
            ring_bits: R::BITS,
        });
    }
    Ok(())
}

pub(crate) async fn trunc_on<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    x: &Tensor<R>,
    meta: &TruncMeta,
) -> Result<Tensor<R>, Error> {
    check_shift::<R>(meta)?;
    if meta.shift == 0 {
        return Ok(x.clone());
    }
    if x.numel() == 0 {
        return Ok(Tensor::zeros(x.shape().to_vec()));
    }
    debug!(numel = x.numel(), shift = meta.shift, "truncate");
    let rank = sess.rank();
    let use_offset = meta.signed && meta.sign != SignHint::Positive;
    let offset_bits = R::BITS - 2;

    let lifted = if use_offset && rank == 0 {
        let offset = R::ONE.shl(offset_bits);
        x.map(|v| v.add(offset))
    } else {
        x.clone()
    };

    // Wrap of the modular addition: x0 + x1 >= 2^k iff x1 > (2^k - 1) - x0,
    // i.e. NOT(x0) < x1. Rank 0 compares with its complemented share.
    let cmp_in = if rank == 0 {
        lifted.map(|v| v.xor(R::ZERO.sub(R::ONE)))
    } else {
        lifted.clone()
    };
    let wrap_b = compare::compute_on(sess, channel, &cmp_in, false, 0).await?;
    let wrap_bits: Vec<bool> = wrap_b.data().iter().map(|v| v.bit(0)).collect();
    let wrap: Vec<R> = basic_ot::b2a(sess, channel, &wrap_bits).await?;

    // floor(x_i / 2^s) summed overshoots by wrap * 2^(k-s) and undershoots
    // by the dropped carry (0 or 1).
    let back = R::BITS - meta.shift;
    let mut out: Vec<R> = lifted
        .data()
        .iter()
        .zip(&wrap)
        .map(|(&v, &w)| v.shr(meta.shift).sub(w.shl(back)))
        .collect();
    if use_offset && rank == 0 {
        let shifted_offset = R::ONE.shl(offset_bits - meta.shift);
        for v in &mut out {
            *v = v.sub(shifted_offset);
        }
    }
    Ok(Tensor::new(x.shape().to_vec(), out))
}
