//! 1-of-N oblivious transfer, Chou-Orlandi style (cf.
//! <https://eprint.iacr.org/2015/267>) over the Ristretto prime order group,
//! generalized from 1-of-2 to N = 2^radix choices and to arbitrary
//! equal-length byte payloads.
//!
//! The sender's base point is exchanged once per session and ring width (see
//! [`Session::lazy_init_keys`]); each batch then costs one round: the
//! receiver sends a blinded point per transfer, the sender answers with all
//! N encrypted table entries. Payloads are XOR encrypted with a BLAKE3 XOF
//! keyed by the derived group element; hashing in the transfer index keeps
//! the derived keys distinct across a batch.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{
    channel::{Channel, recv_vec_from, send_to},
    proto::Error,
    session::Session,
    utils::{RngCompat, xor_inplace},
};

/// Memoized base key material for one ring width.
#[derive(Clone, Copy)]
pub(crate) struct OtKeys {
    /// Our base secret y; our public base point is y*G.
    pub(crate) secret: Scalar,
    /// The peer's public base point.
    pub(crate) peer: RistrettoPoint,
}

fn key_stream(point: &RistrettoPoint, i: u64, j: u32, len: usize) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"duoring-ot");
    hasher.update(point.compress().as_bytes());
    hasher.update(&i.to_le_bytes());
    hasher.update(&j.to_le_bytes());
    let mut stream = vec![0u8; len];
    hasher.finalize_xof().fill(&mut stream);
    stream
}

/// Runs the sender side of a batch of transfers; `tables[i]` holds the N
/// equal-length payloads of transfer `i`.
pub(crate) async fn send_batch<C: Channel>(
    channel: &C,
    keys: &OtKeys,
    tables: &[Vec<Vec<u8>>],
) -> Result<(), Error> {
    // y * S = y^2 * G, the correction term stepping through the N choices.
    let ys = keys.secret * (&keys.secret * RISTRETTO_BASEPOINT_TABLE);
    let points: Vec<Vec<u8>> = recv_vec_from(channel, "ot choice points", tables.len()).await?;
    let mut cts = Vec::with_capacity(tables.len());
    for (i, (table, b_bytes)) in tables.iter().zip(points).enumerate() {
        let b = CompressedRistretto::from_slice(&b_bytes)
            .map_err(|_| Error::MalformedPoint)?
            .decompress()
            .ok_or(Error::MalformedPoint)?;
        // For choice j the receiver can derive y*B - j*yS; encrypt entry j
        // under exactly that point.
        let mut point = keys.secret * b;
        let mut row = Vec::with_capacity(table.len());
        for (j, payload) in table.iter().enumerate() {
            let mut ct = payload.clone();
            let stream = key_stream(&point, i as u64, j as u32, ct.len());
            xor_inplace(&mut ct, &stream);
            row.push(ct);
            point -= ys;
        }
        cts.push(row);
    }
    send_to(channel, "ot ciphertexts", &cts).await?;
    Ok(())
}

/// Runs the receiver side of a batch of transfers, returning the payload of
/// entry `choices[i]` for each transfer.
pub(crate) async fn recv_batch<C: Channel>(
    sess_rng: &mut ChaCha20Rng,
    channel: &C,
    keys: &OtKeys,
    choices: &[u32],
    payload_len: usize,
) -> Result<Vec<Vec<u8>>, Error> {
    let mut rng = RngCompat(ChaCha20Rng::from_seed(sess_rng.random()));
    let mut blinds = Vec::with_capacity(choices.len());
    let mut points = Vec::with_capacity(choices.len());
    for &c in choices {
        let x = Scalar::random(&mut rng);
        let b = &x * RISTRETTO_BASEPOINT_TABLE + Scalar::from(c) * keys.peer;
        blinds.push(x);
        points.push(b.compress().as_bytes().to_vec());
    }
    send_to(channel, "ot choice points", &points).await?;
    let cts: Vec<Vec<Vec<u8>>> =
        recv_vec_from(channel, "ot ciphertexts", choices.len()).await?;
    let mut out = Vec::with_capacity(choices.len());
    for (i, (&c, row)) in choices.iter().zip(cts).enumerate() {
        let mut ct = row
            .into_iter()
            .nth(c as usize)
            .ok_or(Error::PayloadLength)?;
        if ct.len() != payload_len {
            return Err(Error::PayloadLength);
        }
        let point = blinds[i] * keys.peer;
        xor_inplace(&mut ct, &key_stream(&point, i as u64, c, payload_len));
        out.push(ct);
    }
    Ok(out)
}

/// Convenience: fetches the memoized keys and a forked RNG for one batch.
pub(crate) async fn setup<R, C>(sess: &Session<C>) -> Result<(OtKeys, ChaCha20Rng), Error>
where
    R: crate::ring::Ring,
    C: Channel,
{
    let keys = sess.lazy_init_keys::<R>().await?;
    Ok((keys, sess.fork_rng()))
}
