//! The millionaire-style comparison engine (cf. CrypTFlow2: practical
//! 2-party secure inference).
//!
//! Computes a secret-shared bit `1{x > y}` (or `1{x < y}`) for rank 0's
//! private value `x` and rank 1's private value `y`:
//!
//! 1. break both values into digits of `compare_radix` bits,
//! 2. one 1-of-2^radix OT per digit yields XOR shares of the per-digit
//!    "compare" and "equal" bits without revealing the digits,
//! 3. combine digits with `1{x < y} = 1{x_top < y_top} XOR (1{x_top = y_top}
//!    AND 1{x_rest < y_rest})` through a tree of secure ANDs.
//!
//! The digit results are reduced by a balanced full binary tree when the
//! digit count is a power of two and by a general tree otherwise; both
//! produce identical results. The round count is logarithmic in the digit
//! count; a larger radix means fewer OTs per value but an exponentially
//! larger table per digit.

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

/// The rank that provides the OT choice bits in [`batch_compute`].
pub const BATCHED_CHOICE_PROVIDER: usize = 1;

/// Computes a boolean share of `1{x > y}` (`greater_than`) or `1{x < y}`
/// per element, where rank 0 holds `x` and rank 1 holds `y`.
///
/// `bitwidth` restricts the compared bits (0 means the full ring width).
pub async fn compute<R: Ring, C: Channel>(
    sess: &Session<C>,
    inp: &Tensor<R>,
    greater_than: bool,
    bitwidth: u32,
) -> Result<Tensor<R>, Error> {
    compute_on(sess, sess.primary(), inp, greater_than, bitwidth).await
}

/// Like [`compute`], but additionally returns a boolean share of
/// `1{x = y}` per element.
pub async fn compute_with_eq<R: Ring, C: Channel>(
    sess: &Session<C>,
    inp: &Tensor<R>,
    greater_than: bool,
    bitwidth: u32,
) -> Result<(Tensor<R>, Tensor<R>), Error> {
    compute_with_eq_on(sess, sess.primary(), inp, greater_than, bitwidth).await
}

pub(crate) async fn compute_on<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    inp: &Tensor<R>,
    greater_than: bool,
    bitwidth: u32,
) -> Result<Tensor<R>, Error> {
    let numel = inp.numel();
    if numel == 0 {
        return Ok(Tensor::zeros(inp.shape().to_vec()));
    }
    let (cmp, _) = do_compute(sess, channel, inp.data(), greater_than, bitwidth, 1, false).await?;
    Ok(bits_to_tensor(inp.shape().to_vec(), &cmp))
}

pub(crate) async fn compute_with_eq_on<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    inp: &Tensor<R>,
    greater_than: bool,
    bitwidth: u32,
) -> Result<(Tensor<R>, Tensor<R>), Error> {
    let numel = inp.numel();
    if numel == 0 {
        let empty = Tensor::zeros(inp.shape().to_vec());
        return Ok((empty.clone(), empty));
    }
    let (cmp, eq) = do_compute(sess, channel, inp.data(), greater_than, bitwidth, 1, true).await?;
    Ok((
        bits_to_tensor(inp.shape().to_vec(), &cmp),
        bits_to_tensor(inp.shape().to_vec(), &eq),
    ))
}

/// Batched comparison: rank 0 passes a `(numel, batch_size)` tensor of
/// right-hand values, rank 1 its single `numel`-element tensor, and the
/// output is a `(numel, batch_size)` boolean share with
/// `out[i][j] = CMP(x[i][j], y[i])`. Rank 1
/// ([`BATCHED_CHOICE_PROVIDER`]) provides the OT choices once per element,
/// amortizing the transfers over the whole batch.
pub async fn batch_compute<R: Ring, C: Channel>(
    sess: &Session<C>,
    inp: &Tensor<R>,
    greater_than: bool,
    numel: usize,
    bitwidth: u32,
    batch_size: usize,
) -> Result<Tensor<R>, Error> {
    let expected = if sess.rank() == BATCHED_CHOICE_PROVIDER {
        numel
    } else {
        numel * batch_size
    };
    if inp.numel() != expected {
        return Err(Error::ShapeMismatch {
            lhs: inp.shape().to_vec(),
            rhs: vec![numel, batch_size],
        });
    }
    if numel == 0 || batch_size == 0 {
        return Ok(Tensor::zeros(vec![numel, batch_size]));
    }
    let (cmp, _) = do_compute(
        sess,
        sess.primary(),
        inp.data(),
        greater_than,
        bitwidth,
        batch_size,
        false,
    )
    .await?;
    Ok(bits_to_tensor(vec![numel, batch_size], &cmp))
}

/// Digit OT + tree reduction shared by all entry points. Rank 0 holds
/// `rows = numel * batch` left-hand values, rank 1 holds `numel` right-hand
/// values whose digits drive the OT choices.
async fn do_compute<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    values: &[R],
    greater_than: bool,
    bitwidth: u32,
    batch: usize,
    want_eq: bool,
) -> Result<(Vec<bool>, Vec<bool>), Error> {
    let nbits = if bitwidth == 0 { R::BITS } else { bitwidth };
    if nbits > R::BITS {
        return Err(Error::BitwidthOutOfRange {
            nbits,
            ring_bits: R::BITS,
        });
    }
    let radix = sess.config().compare_radix;
    let digits = nbits.div_ceil(radix) as usize;
    let rank = sess.rank();
    let rows = if rank == 0 {
        values.len()
    } else {
        values.len() * batch
    };
    debug!(rows, digits, radix, greater_than, "secure compare");

    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let (cmp, eq) = if rank == 0 {
        // Sender: the masks are our digit shares; the tables carry the
        // masked compare/equal bits for every possible peer digit.
        let cmp_masks: Vec<bool> = (0..rows * digits).map(|_| rng.random()).collect();
        let eq_masks: Vec<bool> = (0..rows * digits).map(|_| rng.random()).collect();
        let numel = values.len() / batch;
        let mut tables = Vec::with_capacity(numel * digits);
        for e in 0..numel {
            for t in 0..digits {
                let table = (0..1u32 << radix)
                    .map(|c| {
                        let mut bits = Vec::with_capacity(2 * batch);
                        for b in 0..batch {
                            let row = e * batch + b;
                            let xd = digit(values[row], t as u32, radix, nbits);
                            let lt = if greater_than { xd > c } else { xd < c };
                            bits.push(lt ^ cmp_masks[row * digits + t]);
                        }
                        for b in 0..batch {
                            let row = e * batch + b;
                            let xd = digit(values[row], t as u32, radix, nbits);
                            bits.push((xd == c) ^ eq_masks[row * digits + t]);
                        }
                        pack_bits(&bits)
                    })
                    .collect();
                tables.push(table);
            }
        }
        ot::send_batch(channel, &keys, &tables).await?;
        (cmp_masks, eq_masks)
    } else {
        // Receiver: our digits select; the received bits are our shares.
        let choices: Vec<u32> = values
            .iter()
            .flat_map(|&y| (0..digits).map(move |t| digit(y, t as u32, radix, nbits)))
            .collect();
        let payload_len = (2 * batch).div_ceil(8);
        let received = ot::recv_batch(&mut rng, channel, &keys, &choices, payload_len).await?;
        let mut cmp = vec![false; rows * digits];
        let mut eq = vec![false; rows * digits];
        for e in 0..values.len() {
            for t in 0..digits {
                let bits = unpack_bits(&received[e * digits + t], 2 * batch);
                for b in 0..batch {
                    let row = e * batch + b;
                    cmp[row * digits + t] = bits[b];
                    eq[row * digits + t] = bits[batch + b];
                }
            }
        }
        (cmp, eq)
    };

    if digits.is_power_of_two() {
        traversal_and_full_binary_tree::<R, C>(sess, channel, cmp, eq, rows, digits, want_eq).await
    } else {
        traversal_and::<R, C>(sess, channel, cmp, eq, rows, digits, want_eq).await
    }
}

/// Extracts digit `t` of the low `nbits` bits of `v`.
fn digit<R: Ring>(v: R, t: u32, radix: u32, nbits: u32) -> u32 {
    let mask = if nbits >= 128 {
        u128::MAX
    } else {
        (1u128 << nbits) - 1
    };
    ((v.to_u128() & mask) >> (t * radix) & ((1 << radix) - 1)) as u32
}

/// Tree reduction of per-digit (compare, equal) share pairs for an
/// arbitrary digit count: pairs of adjacent digits are combined per level,
/// an odd top digit is carried to the next level unchanged. When `want_eq`
/// is false the equality ANDs of the last level are skipped and the returned
/// equality shares are meaningless.
async fn traversal_and<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    mut cmp: Vec<bool>,
    mut eq: Vec<bool>,
    rows: usize,
    mut digits: usize,
    want_eq: bool,
) -> Result<(Vec<bool>, Vec<bool>), Error> {
    while digits > 1 {
        let pairs = digits / 2;
        let rem = digits % 2;
        let next = pairs + rem;
        let need_eq = want_eq || next > 1;
        (cmp, eq) = reduce_level::<R, C>(sess, channel, &cmp, &eq, rows, digits, need_eq).await?;
        digits = next;
    }
    Ok((cmp, eq))
}

/// Tree reduction for a power-of-two digit count: every level halves the
/// digit count, giving a uniform binary tree of secure ANDs. Must produce
/// the same result as [`traversal_and`].
async fn traversal_and_full_binary_tree<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    mut cmp: Vec<bool>,
    mut eq: Vec<bool>,
    rows: usize,
    mut digits: usize,
    want_eq: bool,
) -> Result<(Vec<bool>, Vec<bool>), Error> {
    debug_assert!(digits.is_power_of_two());
    while digits > 1 {
        let need_eq = want_eq || digits > 2;
        (cmp, eq) = reduce_level::<R, C>(sess, channel, &cmp, &eq, rows, digits, need_eq).await?;
        digits /= 2;
    }
    Ok((cmp, eq))
}

/// Combines adjacent digit pairs (lo, hi) of one level:
/// `cmp' = cmp_hi ^ (eq_hi & cmp_lo)` and `eq' = eq_hi & eq_lo`, with both
/// ANDs batched into a single secure AND call.
async fn reduce_level<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    cmp: &[bool],
    eq: &[bool],
    rows: usize,
    digits: usize,
    need_eq: bool,
) -> Result<(Vec<bool>, Vec<bool>), Error> {
    let pairs = digits / 2;
    let rem = digits % 2;
    let next = pairs + rem;
    let n = rows * pairs;
    let mut lhs = Vec::with_capacity(if need_eq { 2 * n } else { n });
    let mut rhs = Vec::with_capacity(lhs.capacity());
    for r in 0..rows {
        for p in 0..pairs {
            lhs.push(eq[r * digits + 2 * p + 1]);
            rhs.push(cmp[r * digits + 2 * p]);
        }
    }
    if need_eq {
        for r in 0..rows {
            for p in 0..pairs {
                lhs.push(eq[r * digits + 2 * p + 1]);
                rhs.push(eq[r * digits + 2 * p]);
            }
        }
    }
    let anded = basic_ot::and_batch::<R, C>(sess, channel, &lhs, &rhs).await?;
    let mut new_cmp = vec![false; rows * next];
    let mut new_eq = vec![false; rows * next];
    for r in 0..rows {
        for p in 0..pairs {
            new_cmp[r * next + p] = cmp[r * digits + 2 * p + 1] ^ anded[r * pairs + p];
            if need_eq {
                new_eq[r * next + p] = anded[n + r * pairs + p];
            }
        }
        if rem == 1 {
            new_cmp[r * next + pairs] = cmp[r * digits + digits - 1];
            new_eq[r * next + pairs] = eq[r * digits + digits - 1];
        }
    }
    Ok((new_cmp, new_eq))
}

fn bits_to_tensor<R: Ring>(shape: Vec<usize>, bits: &[bool]) -> Tensor<R> {
    Tensor::new(
        shape,
        bits.iter()
            .map(|&b| if b { R::ONE } else { R::ZERO })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::digit;

    #[test]
    fn digit_extraction_respects_bitwidth() {
        let v: u32 = 0b1011_0110;
        assert_eq!(digit(v, 0, 4, 8), 0b0110);
        assert_eq!(digit(v, 1, 4, 8), 0b1011);
        // Restricting to 6 bits drops the top two.
        assert_eq!(digit(v, 1, 4, 6), 0b0011);
        assert_eq!(digit(v, 0, 3, 8), 0b110);
    }

    #[test]
    fn digits_recompose() {
        let v: u64 = 0xdead_beef_0123;
        let mut acc = 0u64;
        for t in 0..16 {
            acc |= (digit(v, t, 4, 64) as u64) << (4 * t);
        }
        assert_eq!(acc, v);
    }
}
