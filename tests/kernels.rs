//! End-to-end tests of the secure operations, running both parties over
//! in-memory channels inside a single task.

use duoring::{
    channel::Channel,
    proto::{
        Error,
        shares::{AShr, BShr, Priv},
        truncate::{SignHint, TruncMeta},
    },
    ring::Ring,
    session::{Config, Session},
    tensor::Tensor,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn rng() -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(7)
}

/// Splits a plaintext into two random additive shares.
fn share<R: Ring>(rng: &mut ChaCha20Rng, plain: &[R]) -> (Tensor<R>, Tensor<R>) {
    let r: Vec<R> = plain.iter().map(|_| R::from_u128(rng.random())).collect();
    let other: Vec<R> = plain.iter().zip(&r).map(|(&p, &r)| p.sub(r)).collect();
    (Tensor::from_vec(r), Tensor::from_vec(other))
}

/// Splits a plaintext bit vector into two random XOR shares.
fn share_bits<R: Ring>(rng: &mut ChaCha20Rng, bits: &[bool]) -> (Tensor<R>, Tensor<R>) {
    let r: Vec<R> = bits
        .iter()
        .map(|_| if rng.random() { R::ONE } else { R::ZERO })
        .collect();
    let other: Vec<R> = bits
        .iter()
        .zip(&r)
        .map(|(&b, &r)| if b { R::ONE.xor(r) } else { r })
        .collect();
    (Tensor::from_vec(r), Tensor::from_vec(other))
}

fn open<R: Ring>(a: &AShr<R>, b: &AShr<R>) -> Vec<R> {
    a.tensor()
        .data()
        .iter()
        .zip(b.tensor().data())
        .map(|(&a, &b)| a.add(b))
        .collect()
}

fn open_bits<R: Ring>(a: &BShr<R>, b: &BShr<R>) -> Vec<R> {
    a.tensor()
        .data()
        .iter()
        .zip(b.tensor().data())
        .map(|(&a, &b)| a.xor(b))
        .collect()
}

#[tokio::test]
async fn mul_small_batch_consumes_beaver_triples() -> Result<(), Error> {
    // A small refill granularity keeps triple generation cheap in tests.
    let cfg = Config {
        ole_batch_size: 16,
        ..Config::default()
    };
    let mut rng = rng();
    let x = vec![15u32, u32::MAX, 123_456, 1];
    let y = vec![7u32, 2, 654_321, 0];
    let (x0, x1) = share(&mut rng, &x);
    let (y0, y1) = share(&mut rng, &y);
    let (s0, s1) = Session::pair(cfg)?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (ay0, ay1) = (AShr::new(y0), AShr::new(y1));
    let (z0, z1) = tokio::try_join!(s0.mul_aa(&ax0, &ay0), s1.mul_aa(&ax1, &ay1))?;
    let opened = open(&z0, &z1);
    assert_eq!(opened[0], 105);
    assert_eq!(opened[1], u32::MAX.wrapping_mul(2));
    assert_eq!(opened[2], 123_456u32.wrapping_mul(654_321));
    assert_eq!(opened[3], 0);
    Ok(())
}

#[tokio::test]
async fn mul_large_batch_runs_direct_ole() -> Result<(), Error> {
    let cfg = Config {
        ole_batch_size: 4,
        tile_size: 4,
        ..Config::default()
    };
    let mut rng = rng();
    let x: Vec<u32> = (0..16).map(|_| rng.random()).collect();
    let y: Vec<u32> = (0..16).map(|_| rng.random()).collect();
    let (x0, x1) = share(&mut rng, &x);
    let (y0, y1) = share(&mut rng, &y);
    let (s0, s1) = Session::pair(cfg)?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (ay0, ay1) = (AShr::new(y0), AShr::new(y1));
    let (z0, z1) = tokio::try_join!(s0.mul_aa(&ax0, &ay0), s1.mul_aa(&ax1, &ay1))?;
    let expected: Vec<u32> = x.iter().zip(&y).map(|(&x, &y)| x.wrapping_mul(y)).collect();
    assert_eq!(open(&z0, &z1), expected);
    Ok(())
}

#[tokio::test]
async fn fifteen_times_seven_under_both_strategies() -> Result<(), Error> {
    // x = 5 + 10 = 15, y = 3 + 4 = 7, product 105 mod 2^32. Two elements so
    // that a batch size of 1 forces the direct path.
    let x0 = AShr::new(Tensor::from_vec(vec![5u32, 5]));
    let x1 = AShr::new(Tensor::from_vec(vec![10u32, 10]));
    let y0 = AShr::new(Tensor::from_vec(vec![3u32, 3]));
    let y1 = AShr::new(Tensor::from_vec(vec![4u32, 4]));
    for ole_batch_size in [16, 1] {
        let cfg = Config {
            ole_batch_size,
            ..Config::default()
        };
        let (s0, s1) = Session::pair(cfg)?;
        let (z0, z1) = tokio::try_join!(s0.mul_aa(&x0, &y0), s1.mul_aa(&x1, &y1))?;
        assert_eq!(open(&z0, &z1), vec![105, 105], "batch size {ole_batch_size}");
    }
    Ok(())
}

#[tokio::test]
async fn square_matches_plain_squares() -> Result<(), Error> {
    let mut rng = rng();
    let x = vec![3u64, 0, u64::MAX, 1 << 40];
    let (x0, x1) = share(&mut rng, &x);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (z0, z1) = tokio::try_join!(s0.square_a(&ax0), s1.square_a(&ax1))?;
    let expected: Vec<u64> = x.iter().map(|&x| x.wrapping_mul(x)).collect();
    assert_eq!(open(&z0, &z1), expected);
    Ok(())
}

#[tokio::test]
async fn mul_by_private_value() -> Result<(), Error> {
    let mut rng = rng();
    let x = vec![10u32, 20, 30];
    let y = vec![5u32, 0, u32::MAX];
    let (x0, x1) = share(&mut rng, &x);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let y_owner = Priv::owned(1, Tensor::from_vec(y.clone()))?;
    let y_peer = Priv::<u32>::remote(1, vec![3])?;
    let (z0, z1) = tokio::try_join!(s0.mul_av(&ax0, &y_peer), s1.mul_av(&ax1, &y_owner))?;
    let expected: Vec<u32> = x.iter().zip(&y).map(|(&x, &y)| x.wrapping_mul(y)).collect();
    assert_eq!(open(&z0, &z1), expected);
    Ok(())
}

#[tokio::test]
async fn mul_by_shared_bit_selects() -> Result<(), Error> {
    let mut rng = rng();
    let x = vec![11u64, 22, 33, 44];
    let bits = vec![true, false, true, false];
    let (x0, x1) = share(&mut rng, &x);
    let (b0, b1) = share_bits(&mut rng, &bits);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (bb0, bb1) = (BShr::new(b0, 1), BShr::new(b1, 1));
    let (z0, z1) = tokio::try_join!(s0.mul_a1b(&ax0, &bb0), s1.mul_a1b(&ax1, &bb1))?;
    assert_eq!(open(&z0, &z1), vec![11, 0, 33, 0]);
    Ok(())
}

#[tokio::test]
async fn mul_by_private_bits_selects() -> Result<(), Error> {
    let mut rng = rng();
    let x = vec![7u32, 8, 9];
    let bits = vec![0u32, 1, 1];
    let (x0, x1) = share(&mut rng, &x);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let b_owner = Priv::owned(0, Tensor::from_vec(bits))?;
    let b_peer = Priv::<u32>::remote(0, vec![3])?;
    let (z0, z1) = tokio::try_join!(s0.mul_a1bv(&ax0, &b_owner), s1.mul_a1bv(&ax1, &b_peer))?;
    assert_eq!(open(&z0, &z1), vec![0, 8, 9]);
    Ok(())
}

#[tokio::test]
async fn matmul_of_shared_matrices() -> Result<(), Error> {
    let mut rng = rng();
    let x = Tensor::new(vec![2, 3], vec![1u64, 2, 3, 4, 5, 6]);
    let y = Tensor::new(vec![3, 2], vec![7u64, 8, 9, 10, 11, 12]);
    let expected = x.matmul(&y);
    let (x0, x1) = share(&mut rng, x.data());
    let (y0, y1) = share(&mut rng, y.data());
    let (s0, s1) = Session::pair(Config::default())?;
    let ax0 = AShr::new(x0.reshape(vec![2, 3]));
    let ax1 = AShr::new(x1.reshape(vec![2, 3]));
    let ay0 = AShr::new(y0.reshape(vec![3, 2]));
    let ay1 = AShr::new(y1.reshape(vec![3, 2]));
    let (z0, z1) = tokio::try_join!(s0.matmul_aa(&ax0, &ay0), s1.matmul_aa(&ax1, &ay1))?;
    assert_eq!(z0.shape(), &[2, 2]);
    assert_eq!(open(&z0, &z1), expected.data());
    Ok(())
}

#[tokio::test]
async fn matmul_with_private_rhs() -> Result<(), Error> {
    let mut rng = rng();
    let x = Tensor::new(vec![2, 2], vec![1u32, 2, 3, 4]);
    let y = Tensor::new(vec![2, 2], vec![5u32, 6, 7, 8]);
    let expected = x.matmul(&y);
    let (x0, x1) = share(&mut rng, x.data());
    let (s0, s1) = Session::pair(Config::default())?;
    let ax0 = AShr::new(x0.reshape(vec![2, 2]));
    let ax1 = AShr::new(x1.reshape(vec![2, 2]));
    let y_owner = Priv::owned(1, y)?;
    let y_peer = Priv::<u32>::remote(1, vec![2, 2])?;
    let (z0, z1) = tokio::try_join!(s0.matmul_av(&ax0, &y_peer), s1.matmul_av(&ax1, &y_owner))?;
    assert_eq!(open(&z0, &z1), expected.data());
    Ok(())
}

#[tokio::test]
async fn matmul_of_two_private_matrices() -> Result<(), Error> {
    let x = Tensor::new(vec![2, 2], vec![1u64, 0, 0, 1]);
    let y = Tensor::new(vec![2, 2], vec![9u64, 8, 7, 6]);
    let expected = x.matmul(&y);
    let (s0, s1) = Session::pair(Config::default())?;
    let x_owner = Priv::owned(0, x)?;
    let x_peer = Priv::<u64>::remote(0, vec![2, 2])?;
    let y_owner = Priv::owned(1, y)?;
    let y_peer = Priv::<u64>::remote(1, vec![2, 2])?;
    let (z0, z1) = tokio::try_join!(
        s0.matmul_vvs(&x_owner, &y_peer),
        s1.matmul_vvs(&x_peer, &y_owner)
    )?;
    assert_eq!(open(&z0, &z1), expected.data());
    Ok(())
}

#[tokio::test]
async fn matmul_of_private_matrices_rejects_same_owner() -> Result<(), Error> {
    let (s0, _s1) = Session::pair(Config::default())?;
    let x = Priv::owned(0, Tensor::new(vec![1, 1], vec![1u32]))?;
    let y = Priv::owned(0, Tensor::new(vec![1, 1], vec![2u32]))?;
    let res = s0.matmul_vvs(&x, &y).await;
    assert!(matches!(res, Err(Error::PrivateOperandsSameOwner(0))));
    Ok(())
}

#[tokio::test]
async fn batch_matmul_of_shared_tensors() -> Result<(), Error> {
    let mut rng = rng();
    let x = Tensor::new(vec![2, 2, 2], (1u32..=8).collect());
    let y = Tensor::new(vec![2, 2, 2], (9u32..=16).collect());
    let mut expected = Vec::new();
    for b in 0..2 {
        expected.extend_from_slice(x.batch_slice(b).matmul(&y.batch_slice(b)).data());
    }
    let (x0, x1) = share(&mut rng, x.data());
    let (y0, y1) = share(&mut rng, y.data());
    let (s0, s1) = Session::pair(Config::default())?;
    let ax0 = AShr::new(x0.reshape(vec![2, 2, 2]));
    let ax1 = AShr::new(x1.reshape(vec![2, 2, 2]));
    let ay0 = AShr::new(y0.reshape(vec![2, 2, 2]));
    let ay1 = AShr::new(y1.reshape(vec![2, 2, 2]));
    let (z0, z1) = tokio::try_join!(
        s0.batch_matmul_aa(&ax0, &ay0),
        s1.batch_matmul_aa(&ax1, &ay1)
    )?;
    assert_eq!(z0.shape(), &[2, 2, 2]);
    assert_eq!(open(&z0, &z1), expected);
    Ok(())
}

#[tokio::test]
async fn batch_matmul_with_private_rhs() -> Result<(), Error> {
    let mut rng = rng();
    let x = Tensor::new(vec![2, 1, 2], vec![1u64, 2, 3, 4]);
    let y = Tensor::new(vec![2, 2, 1], vec![5u64, 6, 7, 8]);
    let mut expected = Vec::new();
    for b in 0..2 {
        expected.extend_from_slice(x.batch_slice(b).matmul(&y.batch_slice(b)).data());
    }
    let (x0, x1) = share(&mut rng, x.data());
    let (s0, s1) = Session::pair(Config::default())?;
    let ax0 = AShr::new(x0.reshape(vec![2, 1, 2]));
    let ax1 = AShr::new(x1.reshape(vec![2, 1, 2]));
    let y_owner = Priv::owned(1, y)?;
    let y_peer = Priv::<u64>::remote(1, vec![2, 2, 1])?;
    let (z0, z1) = tokio::try_join!(
        s0.batch_matmul_av(&ax0, &y_peer),
        s1.batch_matmul_av(&ax1, &y_owner)
    )?;
    assert_eq!(open(&z0, &z1), expected);
    Ok(())
}

#[tokio::test]
async fn truncation_of_positive_values_is_off_by_at_most_one() -> Result<(), Error> {
    let mut rng = rng();
    let plain = vec![105u32 << 10, 1 << 20, 3, 0];
    let shift = 10;
    let (x0, x1) = share(&mut rng, &plain);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let meta = TruncMeta {
        signed: true,
        sign: SignHint::Positive,
        shift,
    };
    let (z0, z1) = tokio::try_join!(s0.trunc_a(&ax0, &meta), s1.trunc_a(&ax1, &meta))?;
    for (&z, &x) in open(&z0, &z1).iter().zip(&plain) {
        let exact = x >> shift;
        assert!(
            z == exact || z == exact.wrapping_sub(1),
            "truncated {x} to {z}, expected about {exact}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn truncation_of_signed_values_uses_the_offset() -> Result<(), Error> {
    let mut rng = rng();
    let plain: Vec<u32> = vec![
        105 << 10,
        (200u32 << 10).wrapping_neg(),
        (1u32 << 20).wrapping_neg(),
        0,
    ];
    let shift = 10;
    let (x0, x1) = share(&mut rng, &plain);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let meta = TruncMeta::new(shift);
    let (z0, z1) = tokio::try_join!(s0.trunc_a(&ax0, &meta), s1.trunc_a(&ax1, &meta))?;
    for (&z, &x) in open(&z0, &z1).iter().zip(&plain) {
        let exact = (x as i32 as i64) >> shift;
        let diff = (z as i32 as i64) - exact;
        assert!(
            (-1..=1).contains(&diff),
            "truncated {} to {}, expected about {exact}",
            x as i32,
            z as i32
        );
    }
    Ok(())
}

#[tokio::test]
async fn truncation_honors_a_negative_sign_hint() -> Result<(), Error> {
    let mut rng = rng();
    let plain: Vec<u32> = vec![
        (200u32 << 10).wrapping_neg(),
        (1u32 << 20).wrapping_neg(),
        1u32.wrapping_neg(),
    ];
    let shift = 10;
    let (x0, x1) = share(&mut rng, &plain);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let meta = TruncMeta {
        signed: true,
        sign: SignHint::Negative,
        shift,
    };
    let (z0, z1) = tokio::try_join!(s0.trunc_a(&ax0, &meta), s1.trunc_a(&ax1, &meta))?;
    for (&z, &x) in open(&z0, &z1).iter().zip(&plain) {
        let exact = (x as i32 as i64) >> shift;
        let diff = (z as i32 as i64) - exact;
        assert!(
            (-1..=1).contains(&diff),
            "truncated {} to {}, expected about {exact}",
            x as i32,
            z as i32
        );
    }
    Ok(())
}

#[tokio::test]
async fn msb_extracts_the_sign_bit() -> Result<(), Error> {
    let mut rng = rng();
    let plain = vec![200u8, 5, 127, 128, 0, 255];
    let (x0, x1) = share(&mut rng, &plain);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (z0, z1) = tokio::try_join!(s0.msb_a2b(&ax0), s1.msb_a2b(&ax1))?;
    assert_eq!(z0.nbits(), 1);
    let expected: Vec<u8> = plain.iter().map(|&x| x >> 7).collect();
    assert_eq!(open_bits(&z0, &z1), expected);
    Ok(())
}

#[tokio::test]
async fn msb_of_200_shared_as_120_plus_80() -> Result<(), Error> {
    let (s0, s1) = Session::pair(Config::default())?;
    let a0 = AShr::new(Tensor::from_vec(vec![120u8]));
    let a1 = AShr::new(Tensor::from_vec(vec![80u8]));
    let (z0, z1) = tokio::try_join!(s0.msb_a2b(&a0), s1.msb_a2b(&a1))?;
    assert_eq!(open_bits(&z0, &z1), vec![1]);
    Ok(())
}

#[tokio::test]
async fn equality_of_shared_tensors() -> Result<(), Error> {
    let mut rng = rng();
    let x = vec![42u64, 0, u64::MAX, 7];
    let y = vec![42u64, 1, u64::MAX, u64::MAX];
    let (x0, x1) = share(&mut rng, &x);
    let (y0, y1) = share(&mut rng, &y);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (ay0, ay1) = (AShr::new(y0), AShr::new(y1));
    let (z0, z1) = tokio::try_join!(s0.equal_aa(&ax0, &ay0), s1.equal_aa(&ax1, &ay1))?;
    assert_eq!(open_bits(&z0, &z1), vec![1, 0, 1, 0]);
    Ok(())
}

#[tokio::test]
async fn equality_against_private_tensor() -> Result<(), Error> {
    let mut rng = rng();
    let x = vec![10u32, 20, 30];
    let y = vec![10u32, 21, 30];
    let (x0, x1) = share(&mut rng, &x);
    let (s0, s1) = Session::pair(Config::default())?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let y_owner = Priv::owned(0, Tensor::from_vec(y))?;
    let y_peer = Priv::<u32>::remote(0, vec![3])?;
    let (z0, z1) = tokio::try_join!(s0.equal_ap(&ax0, &y_owner), s1.equal_ap(&ax1, &y_peer))?;
    assert_eq!(open_bits(&z0, &z1), vec![1, 0, 1]);
    Ok(())
}

#[tokio::test]
async fn restricted_equality_ignores_high_bits() -> Result<(), Error> {
    let cfg = Config {
        equal_bits: Some(4),
        ..Config::default()
    };
    let mut rng = rng();
    // Differ only above bit 4: equal under the restriction.
    let x = vec![0x103u32, 0x5];
    let y = vec![0x203u32, 0x6];
    let (x0, x1) = share(&mut rng, &x);
    let (y0, y1) = share(&mut rng, &y);
    let (s0, s1) = Session::pair(cfg)?;
    let (ax0, ax1) = (AShr::new(x0), AShr::new(x1));
    let (ay0, ay1) = (AShr::new(y0), AShr::new(y1));
    let (z0, z1) = tokio::try_join!(s0.equal_aa(&ax0, &ay0), s1.equal_aa(&ax1, &ay1))?;
    assert_eq!(open_bits(&z0, &z1), vec![1, 0]);
    Ok(())
}

#[tokio::test]
async fn shape_mismatch_fails_before_any_round() -> Result<(), Error> {
    let (s0, s1) = Session::pair(Config::default())?;
    let x = AShr::new(Tensor::from_vec(vec![1u32, 2]));
    let y = AShr::new(Tensor::from_vec(vec![1u32, 2, 3]));
    let (r0, r1) = tokio::join!(s0.mul_aa(&x, &y), s1.mul_aa(&x, &y));
    assert!(matches!(r0, Err(Error::ShapeMismatch { .. })));
    assert!(matches!(r1, Err(Error::ShapeMismatch { .. })));
    Ok(())
}

/// A channel that fails the test if any traffic passes through it.
struct PanicChannel;

impl Channel for PanicChannel {
    type SendError = ();
    type RecvError = ();

    async fn send_bytes(&self, _msg: Vec<u8>) -> Result<(), ()> {
        panic!("unexpected send on zero-element operation");
    }

    async fn recv_bytes(&self) -> Result<Vec<u8>, ()> {
        panic!("unexpected recv on zero-element operation");
    }
}

#[tokio::test]
async fn oversized_parameters_fail_before_any_round() -> Result<(), Error> {
    // Small tiles would normally trigger the dual-channel split (and with it
    // the key handshake); invalid parameters must be rejected first.
    let cfg = Config {
        tile_size: 2,
        equal_bits: Some(40),
        ..Config::default()
    };
    let sess = Session::new(0, PanicChannel, PanicChannel, cfg)?;
    let x = AShr::new(Tensor::from_vec(vec![1u32, 2, 3, 4]));
    let y = AShr::new(Tensor::from_vec(vec![5u32, 6, 7, 8]));
    let meta = TruncMeta::new(40);
    assert!(matches!(
        sess.trunc_a(&x, &meta).await,
        Err(Error::BitwidthOutOfRange { .. })
    ));
    assert!(matches!(
        sess.equal_aa(&x, &y).await,
        Err(Error::BitwidthOutOfRange { .. })
    ));
    let p = Priv::owned(0, Tensor::from_vec(vec![5u32, 6, 7, 8]))?;
    assert!(matches!(
        sess.equal_ap(&x, &p).await,
        Err(Error::BitwidthOutOfRange { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn zero_element_operations_touch_no_channel() -> Result<(), Error> {
    let sess = Session::new(0, PanicChannel, PanicChannel, Config::default())?;
    let x = AShr::new(Tensor::<u32>::zeros(vec![0]));
    let y = AShr::new(Tensor::<u32>::zeros(vec![0]));
    let b = BShr::new(Tensor::<u32>::zeros(vec![0]), 1);
    assert_eq!(sess.mul_aa(&x, &y).await?.numel(), 0);
    assert_eq!(sess.square_a(&x).await?.numel(), 0);
    assert_eq!(sess.equal_aa(&x, &y).await?.tensor().numel(), 0);
    assert_eq!(sess.msb_a2b(&x).await?.tensor().numel(), 0);
    assert_eq!(sess.mul_a1b(&x, &b).await?.numel(), 0);
    let meta = TruncMeta::new(3);
    assert_eq!(sess.trunc_a(&x, &meta).await?.numel(), 0);
    let mx = AShr::new(Tensor::<u32>::zeros(vec![0, 4]));
    let my = AShr::new(Tensor::<u32>::zeros(vec![4, 2]));
    assert_eq!(sess.matmul_aa(&mx, &my).await?.shape(), &[0, 2]);
    Ok(())
}
