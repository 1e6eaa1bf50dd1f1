//! The session-scoped protocol context of one party.
//!
//! A [`Session`] owns everything one party needs across protocol calls: its
//! rank, the primary communication channel, a scratch (duplex) channel used
//! to overlap the two halves of OLE-based operations, the configuration, and
//! the lazily-initialized per-ring-width caches of oblivious-transfer key
//! material and Beaver triples. There is no process-global state: creating a
//! session initializes nothing, the first protocol call for a given ring
//! width performs the key handshake, and dropping the session tears
//! everything down.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE, ristretto::CompressedRistretto, scalar::Scalar,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use crate::{
    channel::{Channel, SimpleChannel, exchange, recv_vec_from, send_to},
    proto::{Error, ole, ot::OtKeys},
    ring::{Ring, RingWidth},
    tensor::Tensor,
    utils::RngCompat,
};

/// Tunable parameters of a session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Digit width (in bits) of the comparison protocol, in `1..=4`. A larger
    /// radix means fewer OTs per value but an exponentially larger OT table
    /// per digit: a latency/bandwidth trade-off.
    pub compare_radix: u32,
    /// Batch size of the OLE engine. Multiplications with
    /// `numel >= 2 * ole_batch_size` take the direct-OLE path instead of
    /// consuming Beaver triples; it is also the refill granularity of the
    /// triple cache.
    pub ole_batch_size: usize,
    /// Minimum elements per tile before an elementwise protocol call
    /// (comparison-backed or OLE/OT-backed) is split across the primary and
    /// scratch channels.
    pub tile_size: usize,
    /// Restricts equality tests to the given number of low bits.
    ///
    /// This trades precision for cost: values that differ only above
    /// `equal_bits` compare as equal. Useful for index/one-hot workloads
    /// where inputs are known to be small; never enabled by default.
    pub equal_bits: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compare_radix: 4,
            ole_batch_size: 8192,
            tile_size: 8192,
            equal_bits: None,
        }
    }
}

struct TripleCache {
    a: VecDeque<u128>,
    b: VecDeque<u128>,
    c: VecDeque<u128>,
}

/// The protocol context of one of the two parties.
pub struct Session<C: Channel> {
    rank: usize,
    primary: C,
    scratch: C,
    cfg: Config,
    rng: Mutex<ChaCha20Rng>,
    keys: Mutex<HashMap<RingWidth, OtKeys>>,
    beaver: Mutex<HashMap<RingWidth, TripleCache>>,
}

impl<C: Channel> Session<C> {
    /// Creates a session for the party with the given rank.
    ///
    /// `primary` and `scratch` must be two independent channels to the peer;
    /// the scratch channel carries the concurrently dispatched half of
    /// OLE-based operations so the two halves cannot interleave messages.
    pub fn new(rank: usize, primary: C, scratch: C, cfg: Config) -> Result<Self, Error> {
        if rank > 1 {
            return Err(Error::InvalidRank(rank));
        }
        if cfg.compare_radix == 0 || cfg.compare_radix > 4 {
            return Err(Error::InvalidRadix(cfg.compare_radix));
        }
        Ok(Session {
            rank,
            primary,
            scratch,
            cfg,
            rng: Mutex::new(ChaCha20Rng::from_os_rng()),
            keys: Mutex::new(HashMap::new()),
            beaver: Mutex::new(HashMap::new()),
        })
    }

    /// The rank of this party, 0 or 1.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The session configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The batch size of the OLE engine.
    pub fn ole_batch_size(&self) -> usize {
        self.cfg.ole_batch_size
    }

    /// The primary channel to the peer.
    pub(crate) fn primary(&self) -> &C {
        &self.primary
    }

    /// The scratch channel carrying concurrently dispatched protocol halves.
    pub(crate) fn duplex(&self) -> &C {
        &self.scratch
    }

    /// Forks a fresh RNG off the session RNG.
    ///
    /// Protocol steps draw all their randomness from a fork so that no lock
    /// is held across an await point.
    pub(crate) fn fork_rng(&self) -> ChaCha20Rng {
        let seed = {
            let mut rng = self.rng.lock().expect("session rng poisoned");
            rng.random()
        };
        ChaCha20Rng::from_seed(seed)
    }

    /// Returns the OT key material for ring width `R`, running the one-time
    /// base handshake on the primary channel if this is the first use.
    ///
    /// The first caller for a given width performs the initialization;
    /// subsequent callers reuse the memoized keys. Kernels call this before
    /// splitting work across channels, so the handshake itself is never
    /// concurrent.
    pub(crate) async fn lazy_init_keys<R: Ring>(&self) -> Result<OtKeys, Error> {
        if let Some(keys) = self.keys.lock().expect("key cache poisoned").get(&R::WIDTH) {
            return Ok(*keys);
        }
        let secret = {
            let mut rng = RngCompat(self.fork_rng());
            Scalar::random(&mut rng)
        };
        let point = (&secret * RISTRETTO_BASEPOINT_TABLE).compress();
        let peer_bytes: Vec<u8> =
            exchange(&self.primary, "ot base point", &point.as_bytes().to_vec()).await?;
        let peer = CompressedRistretto::from_slice(&peer_bytes)
            .map_err(|_| Error::MalformedPoint)?
            .decompress()
            .ok_or(Error::MalformedPoint)?;
        debug!(width = ?R::WIDTH, "initialized OT base keys");
        let keys = OtKeys { secret, peer };
        self.keys
            .lock()
            .expect("key cache poisoned")
            .insert(R::WIDTH, keys);
        Ok(keys)
    }

    /// Opens the sum of a masked tensor: both parties send their half and
    /// add the peer's, the two-party form of an all-reduce.
    pub(crate) async fn open_add<R: Ring>(&self, t: &Tensor<R>) -> Result<Tensor<R>, Error> {
        send_to(&self.primary, "open masked share", &t.data().to_vec()).await?;
        let peer: Vec<R> = recv_vec_from(&self.primary, "open masked share", t.numel()).await?;
        Ok(t.add(&Tensor::new(t.shape().to_vec(), peer)))
    }

    /// Takes `n` Beaver triple elements for ring width `R`, refilling the
    /// cache through the OLE engine if it runs short.
    ///
    /// Every element is consumed exactly once. A shortfall after refilling
    /// is a programming error, not a recoverable condition.
    pub(crate) async fn take_cached_beaver<R: Ring>(
        &self,
        n: usize,
    ) -> Result<(Tensor<R>, Tensor<R>, Tensor<R>), Error> {
        let cached = {
            let cache = self.beaver.lock().expect("beaver cache poisoned");
            cache.get(&R::WIDTH).map(|t| t.a.len()).unwrap_or(0)
        };
        if cached < n {
            // Both parties observe the same shortfall (consumption is
            // symmetric), so they agree on the refill size without
            // negotiation.
            let refill = (n - cached).max(self.cfg.ole_batch_size);
            debug!(refill, width = ?R::WIDTH, "generating beaver triples");
            let (a, b, c) = ole::gen_beaver::<R, C>(self, &self.primary, refill).await?;
            let mut cache = self.beaver.lock().expect("beaver cache poisoned");
            let entry = cache.entry(R::WIDTH).or_insert_with(|| TripleCache {
                a: VecDeque::new(),
                b: VecDeque::new(),
                c: VecDeque::new(),
            });
            entry.a.extend(a.data().iter().map(|v| v.to_u128()));
            entry.b.extend(b.data().iter().map(|v| v.to_u128()));
            entry.c.extend(c.data().iter().map(|v| v.to_u128()));
        }
        let mut cache = self.beaver.lock().expect("beaver cache poisoned");
        let entry = cache.get_mut(&R::WIDTH).ok_or(Error::BeaverExhausted {
            requested: n,
            cached: 0,
        })?;
        if entry.a.len() < n {
            return Err(Error::BeaverExhausted {
                requested: n,
                cached: entry.a.len(),
            });
        }
        let take = |q: &mut VecDeque<u128>| -> Vec<R> {
            q.drain(..n).map(R::from_u128).collect()
        };
        Ok((
            Tensor::from_vec(take(&mut entry.a)),
            Tensor::from_vec(take(&mut entry.b)),
            Tensor::from_vec(take(&mut entry.c)),
        ))
    }
}

impl Session<SimpleChannel> {
    /// Wires up the two parties with in-memory channels, for tests and local
    /// simulation.
    pub fn pair(cfg: Config) -> Result<(Self, Self), Error> {
        let (p0, p1) = SimpleChannel::pair();
        let (s0, s1) = SimpleChannel::pair();
        Ok((
            Session::new(0, p0, s0, cfg.clone())?,
            Session::new(1, p1, s1, cfg)?,
        ))
    }
}
