//! The oblivious-linear-evaluation (OLE) multiplication engine.
//!
//! Computes additive shares of products and dot products of values held by
//! different parties, via digit-based OT (Gilboa): the payload side splits
//! each contribution into 4-bit digits and the choice side selects with its
//! own digits, so one elementwise product costs `ceil(k/4)` 1-of-16
//! transfers. The engine also generates the Beaver triples consumed by the
//! small-batch multiplication path.

use rand::Rng;
use tracing::debug;

use crate::{
    channel::Channel,
    proto::{Error, ot},
    ring::{self, Ring, byte_width},
    session::Session,
    tensor::Tensor,
};

/// Digit width of the OLE transfers.
const OLE_RADIX: u32 = 4;

fn num_digits<R: Ring>() -> u32 {
    R::BITS.div_ceil(OLE_RADIX)
}

fn digit<R: Ring>(v: R, t: u32) -> u32 {
    (v.to_u128() >> (t * OLE_RADIX) & 0xf) as u32
}

/// One OLE pass: computes additive shares of the elementwise product of the
/// evaluator's vector and the peer's vector.
///
/// The evaluator provides the OT choice digits; the other party supplies the
/// masked multiplication tables. Both parties pass their own vector.
pub(crate) async fn mul_ole<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    v: &[R],
    evaluator: bool,
) -> Result<Vec<R>, Error> {
    let (keys, mut rng) = ot::setup::<R, C>(sess).await?;
    let d = num_digits::<R>();
    let width = byte_width::<R>();
    if evaluator {
        let choices: Vec<u32> = v
            .iter()
            .flat_map(|&e| (0..d).map(move |t| digit(e, t)))
            .collect();
        let rows = ot::recv_batch(&mut rng, channel, &keys, &choices, width).await?;
        let out = v
            .iter()
            .enumerate()
            .map(|(i, _)| {
                (0..d as usize).fold(R::ZERO, |acc, t| {
                    acc.add(ring::from_le_bytes(&rows[i * d as usize + t]))
                })
            })
            .collect();
        Ok(out)
    } else {
        let masks: Vec<R> = (0..v.len() * d as usize)
            .map(|_| R::from_u128(rng.random()))
            .collect();
        let mut tables = Vec::with_capacity(masks.len());
        for (i, &a) in v.iter().enumerate() {
            for t in 0..d {
                let mask = masks[i * d as usize + t as usize];
                let table = (0..16u128)
                    .map(|j| {
                        let entry = a.mul(R::from_u128(j)).shl(t * OLE_RADIX).add(mask);
                        ring::to_le_bytes(entry)
                    })
                    .collect();
                tables.push(table);
            }
        }
        ot::send_batch(channel, &keys, &tables).await?;
        let out = v
            .iter()
            .enumerate()
            .map(|(i, _)| {
                (0..d as usize)
                    .fold(R::ZERO, |acc, t| acc.add(masks[i * d as usize + t]))
                    .neg()
            })
            .collect();
        Ok(out)
    }
}

/// Computes additive shares of `(x0 + x1) * (y0 + y1)` for one slice, over
/// the given channel: two OLE passes for the cross terms plus the local
/// product. `evaluator` fixes which party provides the choices of the first
/// pass; both parties must pass opposite values.
pub(crate) async fn mul_share<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    x: &[R],
    y: &[R],
    evaluator: bool,
) -> Result<Vec<R>, Error> {
    let cross1 = if evaluator {
        mul_ole(sess, channel, x, true).await?
    } else {
        mul_ole(sess, channel, y, false).await?
    };
    let cross2 = if evaluator {
        mul_ole(sess, channel, y, false).await?
    } else {
        mul_ole(sess, channel, x, true).await?
    };
    Ok(x.iter()
        .zip(y)
        .zip(cross1.iter().zip(&cross2))
        .map(|((&x, &y), (&c1, &c2))| x.mul(y).add(c1).add(c2))
        .collect())
}

/// Computes additive shares of the matrix product `X @ Y` where the lhs
/// party holds `X: (M, K)` and the rhs party holds `Y: (K, N)`.
///
/// Realized as one elementwise OLE over the expanded `(M, K, N)` cross
/// products, contracted locally over K by both parties.
pub(crate) async fn dot_ole<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    t: &Tensor<R>,
    dim3: [usize; 3],
    is_lhs: bool,
) -> Result<Tensor<R>, Error> {
    let [m, k, n] = dim3;
    debug!(m, k, n, is_lhs, "dot OLE");
    let expanded = expand(t.data(), 1, dim3, is_lhs);
    // The lhs supplies the tables, the rhs the choices.
    let prod = mul_ole(sess, channel, &expanded, !is_lhs).await?;
    Ok(Tensor::new(vec![m, n], contract(&prod, 1, dim3)))
}

/// The batched form of [`dot_ole`]: shares of `X[b] @ Y[b]` for every slice
/// of `X: (B, M, K)` and `Y: (B, K, N)`, with a single OLE batch across the
/// whole 4-D problem.
pub(crate) async fn batch_dot_ole<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    t: &Tensor<R>,
    dim4: [usize; 4],
    is_lhs: bool,
) -> Result<Tensor<R>, Error> {
    let [b, m, k, n] = dim4;
    debug!(b, m, k, n, is_lhs, "batch dot OLE");
    let expanded = expand(t.data(), b, [m, k, n], is_lhs);
    let prod = mul_ole(sess, channel, &expanded, !is_lhs).await?;
    Ok(Tensor::new(vec![b, m, n], contract(&prod, b, [m, k, n])))
}

/// Expands a factor to the `(B, M, K, N)` cross-product layout.
fn expand<R: Ring>(data: &[R], batch: usize, dim3: [usize; 3], is_lhs: bool) -> Vec<R> {
    let [m, k, n] = dim3;
    let mut out = Vec::with_capacity(batch * m * k * n);
    for b in 0..batch {
        for mi in 0..m {
            for ki in 0..k {
                for ni in 0..n {
                    out.push(if is_lhs {
                        data[b * m * k + mi * k + ki]
                    } else {
                        data[b * k * n + ki * n + ni]
                    });
                }
            }
        }
    }
    out
}

/// Contracts `(B, M, K, N)` product shares over K into `(B, M, N)`.
fn contract<R: Ring>(prod: &[R], batch: usize, dim3: [usize; 3]) -> Vec<R> {
    let [m, k, n] = dim3;
    let mut out = vec![R::ZERO; batch * m * n];
    for b in 0..batch {
        for mi in 0..m {
            for ki in 0..k {
                for ni in 0..n {
                    let cell = &mut out[b * m * n + mi * n + ni];
                    *cell = cell.add(prod[((b * m + mi) * k + ki) * n + ni]);
                }
            }
        }
    }
    out
}

/// Generates `n` fresh Beaver triple elements: random local `a`, `b` and a
/// share of `(a0 + a1) * (b0 + b1)` via the two OLE cross passes.
pub(crate) async fn gen_beaver<R: Ring, C: Channel>(
    sess: &Session<C>,
    channel: &C,
    n: usize,
) -> Result<(Tensor<R>, Tensor<R>, Tensor<R>), Error> {
    let mut rng = sess.fork_rng();
    let a: Vec<R> = (0..n).map(|_| R::from_u128(rng.random())).collect();
    let b: Vec<R> = (0..n).map(|_| R::from_u128(rng.random())).collect();
    let c = mul_share(sess, channel, &a, &b, sess.rank() == 0).await?;
    Ok((
        Tensor::from_vec(a),
        Tensor::from_vec(b),
        Tensor::from_vec(c),
    ))
}
