//! OT-backed bit protocols: secure AND of XOR-shared bit vectors,
//! boolean-to-arithmetic conversion, and the oblivious multiplexers used for
//! arithmetic-times-boolean products.
//!
//! Every routine here follows the same two-message pattern: the payload side
//! masks a small table with fresh randomness (the mask becomes its share)
//! and the choice side selects one entry through a 1-of-2 transfer (the
//! entry becomes its share).

use rand::Rng;

use crate::{
    channel::Channel,
    proto::{Error, ot},
    ring::{self, Ring, byte_width},
    session::Session,
};

/// One cross term of a bitwise AND: shares of `choice_bits AND table_bits`,
/// where the receiver holds the choices and the sender the table bits.
async fn and_cross<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    receiver: bool,
    bits: &[bool],
) -> Result<Vec<bool>, Error> {
    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    if receiver {
        let choices: Vec<u32> = bits.iter().map(|&b| b as u32).collect();
        let rows = ot::recv_batch(&mut rng, channel, &keys, &choices, 1).await?;
        Ok(rows.into_iter().map(|row| row[0] & 1 == 1).collect())
    } else {
        let masks: Vec<bool> = (0..bits.len()).map(|_| rng.random()).collect();
        let tables: Vec<Vec<Vec<u8>>> = bits
            .iter()
            .zip(&masks)
            .map(|(&b, &m)| vec![vec![m as u8], vec![(b ^ m) as u8]])
            .collect();
        ot::send_batch(channel, &keys, &tables).await?;
        Ok(masks)
    }
}

/// Secure AND over XOR-shared bit vectors: both parties pass their shares of
/// `a` and `b` and obtain an XOR share of `a AND b`. Two OT passes, one per
/// cross term.
pub(crate) async fn and_batch<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    a: &[bool],
    b: &[bool],
) -> Result<Vec<bool>, Error> {
    debug_assert_eq!(a.len(), b.len());
    let rank = sess.rank();
    // Cross term a0 & b1: rank 0 chooses, rank 1 supplies its b share.
    let cross1 = if rank == 0 {
        and_cross::<R, C>(sess, channel, true, a).await?
    } else {
        and_cross::<R, C>(sess, channel, false, b).await?
    };
    // Cross term a1 & b0 with the roles reversed.
    let cross2 = if rank == 0 {
        and_cross::<R, C>(sess, channel, false, b).await?
    } else {
        and_cross::<R, C>(sess, channel, true, a).await?
    };
    Ok(a.iter()
        .zip(b)
        .zip(cross1.iter().zip(&cross2))
        .map(|((&a, &b), (&c1, &c2))| (a & b) ^ c1 ^ c2)
        .collect())
}

/// One arithmetic cross term of the multiplexer: shares of
/// `(b0 XOR b1) * a_s` where the sender holds `a_s` and its boolean share
/// `b_s`, and the receiver chooses with its boolean share.
async fn mux_cross<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    receiver: bool,
    choice_bits: &[bool],
    sender_bits: &[bool],
    sender_vals: &[R],
) -> Result<Vec<R>, Error> {
    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let width = byte_width::<R>();
    if receiver {
        let choices: Vec<u32> = choice_bits.iter().map(|&b| b as u32).collect();
        let rows = ot::recv_batch(&mut rng, channel, &keys, &choices, width).await?;
        Ok(rows.iter().map(|row| ring::from_le_bytes(row)).collect())
    } else {
        let masks: Vec<R> = (0..sender_vals.len())
            .map(|_| R::from_u128(rng.random()))
            .collect();
        let tables: Vec<Vec<Vec<u8>>> = sender_vals
            .iter()
            .zip(sender_bits)
            .zip(&masks)
            .map(|((&a, &bs), &m)| {
                (0..2u32)
                    .map(|j| {
                        let v = if (j == 1) ^ bs { a } else { R::ZERO };
                        ring::to_le_bytes(v.add(m))
                    })
                    .collect()
            })
            .collect();
        ot::send_batch(channel, &keys, &tables).await?;
        Ok(masks.into_iter().map(R::neg).collect())
    }
}

/// Oblivious multiplexer: given an arithmetic share of `x` and an XOR share
/// of a bit `b`, returns an arithmetic share of `b * x`.
pub(crate) async fn multiplexer<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    x: &[R],
    b: &[bool],
) -> Result<Vec<R>, Error> {
    debug_assert_eq!(x.len(), b.len());
    let rank = sess.rank();
    // Shares of (b0 ^ b1) * x1, then of (b0 ^ b1) * x0.
    let cross1 = if rank == 0 {
        mux_cross::<R, C>(sess, channel, true, b, &[], &[]).await?
    } else {
        mux_cross::<R, C>(sess, channel, false, &[], b, x).await?
    };
    let cross2 = if rank == 0 {
        mux_cross::<R, C>(sess, channel, false, &[], b, x).await?
    } else {
        mux_cross::<R, C>(sess, channel, true, b, &[], &[]).await?
    };
    Ok(cross1
        .iter()
        .zip(&cross2)
        .map(|(&c1, &c2)| c1.add(c2))
        .collect())
}

/// The sender (non-owner) half of the private multiplexer: contributes its
/// share of `x` through OT so the owner of the private bits can select.
pub(crate) async fn private_mulx_send<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    x: &[R],
) -> Result<Vec<R>, Error> {
    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let masks: Vec<R> = (0..x.len()).map(|_| R::from_u128(rng.random())).collect();
    let tables: Vec<Vec<Vec<u8>>> = x
        .iter()
        .zip(&masks)
        .map(|(&a, &m)| {
            vec![
                ring::to_le_bytes(m),
                ring::to_le_bytes(a.add(m)),
            ]
        })
        .collect();
    ot::send_batch(channel, &keys, &tables).await?;
    Ok(masks.into_iter().map(R::neg).collect())
}

/// The receiver (owner) half of the private multiplexer: selects with its
/// private bits and adds the product with its own share locally.
pub(crate) async fn private_mulx_recv<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    x: &[R],
    bits: &[bool],
) -> Result<Vec<R>, Error> {
    debug_assert_eq!(x.len(), bits.len());
    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let width = byte_width::<R>();
    let choices: Vec<u32> = bits.iter().map(|&b| b as u32).collect();
    let rows = ot::recv_batch(&mut rng, channel, &keys, &choices, width).await?;
    Ok(rows
        .iter()
        .zip(x.iter().zip(bits))
        .map(|(row, (&xi, &b))| {
            let recv: R = ring::from_le_bytes(row);
            recv.add(if b { xi } else { R::ZERO })
        })
        .collect())
}

/// Boolean-to-arithmetic conversion: turns an XOR share of a bit vector into
/// an additive share of the same 0/1 values, via one OT for the cross
/// product `b0 * b1`.
pub(crate) async fn b2a<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    bits: &[bool],
) -> Result<Vec<R>, Error> {
    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let width = byte_width::<R>();
    // b0 + b1 - 2*b0*b1; the cross product comes from a single transfer.
    let cross: Vec<R> = if sess.rank() == 0 {
        let choices: Vec<u32> = bits.iter().map(|&b| b as u32).collect();
        let rows = ot::recv_batch(&mut rng, channel, &keys, &choices, width).await?;
        rows.iter().map(|row| ring::from_le_bytes(row)).collect()
    } else {
        let masks: Vec<R> = (0..bits.len())
            .map(|_| R::from_u128(rng.random()))
            .collect();
        let tables: Vec<Vec<Vec<u8>>> = bits
            .iter()
            .zip(&masks)
            .map(|(&b, &m)| {
                (0..2u32)
                    .map(|j| {
                        let v = if j == 1 && b { R::ONE } else { R::ZERO };
                        ring::to_le_bytes(v.add(m))
                    })
                    .collect()
            })
            .collect();
        ot::send_batch(channel, &keys, &tables).await?;
        masks.into_iter().map(R::neg).collect()
    };
    Ok(bits
        .iter()
        .zip(&cross)
        .map(|(&b, &p)| {
            let b = if b { R::ONE } else { R::ZERO };
            b.sub(p.shl(1))
        })
        .collect())
}
