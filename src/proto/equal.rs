//! The digit equality engine.
//!
//! Tests `x = y` for rank 0's private value `x` and rank 1's private value
//! `y` without a full comparison: one OT per digit yields XOR shares of the
//! per-digit equality bit, and an AND tree combines them. Cheaper than
//! [`crate::proto::compare`] because no per-digit compare bit is carried
//! through the reduction.

use rand::Rng;
use tracing::debug;

use crate::{
    channel::Channel,
    proto::{Error, basic_ot, ot},
    ring::Ring,
    session::Session,
    tensor::Tensor,
    utils::{pack_bits, unpack_bits},
};

/// Resolves a bit-width restriction (0 means the full ring width),
/// rejecting widths the ring cannot hold. Runs before any network round.
pub(crate) fn check_bitwidth<R: Ring>(bitwidth: u32) -> Result<u32, Error> {
    let nbits = if bitwidth == 0 { R::BITS } else { bitwidth };
    if nbits > R::BITS {
        return Err(Error::BitwidthOutOfRange {
            nbits,
            ring_bits: R::BITS,
        });
    }
    Ok(nbits)
}

/// Computes a boolean share of `1{x = y}` per element, where rank 0 holds
/// `x` and rank 1 holds `y`. `bitwidth` restricts the tested bits (0 means
/// the full ring width).
pub(crate) async fn equality_on<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    inp: &Tensor<R>,
    bitwidth: u32,
) -> Result<Tensor<R>, Error> {
    let numel = inp.numel();
    if numel == 0 {
        return Ok(Tensor::zeros(inp.shape().to_vec()));
    }
    let nbits = check_bitwidth::<R>(bitwidth)?;
    let radix = sess.config().compare_radix;
    let digits = nbits.div_ceil(radix) as usize;
    debug!(numel, digits, radix, "secure equality");

    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let mut eq = if sess.rank() == 0 {
        let masks: Vec<bool> = (0..numel * digits).map(|_| rng.random()).collect();
        let mut tables = Vec::with_capacity(numel * digits);
        for (e, &x) in inp.data().iter().enumerate() {
            for t in 0..digits {
                let xd = digit(x, t as u32, radix, nbits);
                let table = (0..1u32 << radix)
                    .map(|c| pack_bits(&[(xd == c) ^ masks[e * digits + t]]))
                    .collect();
                tables.push(table);
            }
        }
        ot::send_batch(channel, &keys, &tables).await?;
        masks
    } else {
        let choices: Vec<u32> = inp
            .data()
            .iter()
            .flat_map(|&y| (0..digits).map(move |t| digit(y, t as u32, radix, nbits)))
            .collect();
        let rows = ot::recv_batch(&mut rng, channel, &keys, &choices, 1).await?;
        rows.iter().map(|row| unpack_bits(row, 1)[0]).collect()
    };

    // AND-reduce the digit shares pairwise, carrying an odd leftover.
    let mut width = digits;
    while width > 1 {
        let pairs = width / 2;
        let rem = width % 2;
        let mut lhs = Vec::with_capacity(numel * pairs);
        let mut rhs = Vec::with_capacity(numel * pairs);
        for e in 0..numel {
            for p in 0..pairs {
                lhs.push(eq[e * width + 2 * p]);
                rhs.push(eq[e * width + 2 * p + 1]);
            }
        }
        let anded = basic_ot::and_batch::<R, C>(sess, channel, &lhs, &rhs).await?;
        let next = pairs + rem;
        let mut reduced = vec![false; numel * next];
        for e in 0..numel {
            reduced[e * next..e * next + pairs]
                .copy_from_slice(&anded[e * pairs..(e + 1) * pairs]);
            if rem == 1 {
                reduced[e * next + pairs] = eq[e * width + width - 1];
            }
        }
        eq = reduced;
        width = next;
    }

    Ok(Tensor::new(
        inp.shape().to_vec(),
        eq.iter()
            .map(|&b| if b { R::ONE } else { R::ZERO })
            .collect(),
    ))
}

fn digit<R: Ring>(v: R, t: u32, radix: u32, nbits: u32) -> u32 {
    let mask = if nbits >= 128 {
        u128::MAX
    } else {
        (1u128 << nbits) - 1
    };
    ((v.to_u128() & mask) >> (t * radix) & ((1 << radix) - 1)) as u32
}
