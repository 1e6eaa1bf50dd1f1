//! The secure operations exposed by a [`Session`].
//!
//! Each operation validates shapes and operand kinds synchronously, picks an
//! execution strategy from the element count and configuration, and drives
//! the protocol engines. Elementwise operations above two tiles are split
//! across the primary and scratch channels (see
//! [`crate::proto::dispatch`]); matrix products overlap their two
//! cross-term transfers the same way.

use tracing::{Level, instrument};

use crate::{
    channel::Channel,
    proto::{
        Error, basic_ot, compare, dispatch, equal, ole,
        shares::{AShr, BShr, Priv},
        truncate::{self, TruncMeta},
    },
    ring::Ring,
    session::Session,
    tensor::Tensor,
};

impl<C: Channel> Session<C> {
    /// Truncates an additively shared tensor: shares of roughly
    /// `x / 2^shift`, with a possible off-by-one in the last place.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn trunc_a<R: Ring>(
        &self,
        x: &AShr<R>,
        meta: &TruncMeta,
    ) -> Result<AShr<R>, Error> {
        truncate::check_shift::<R>(meta)?;
        if x.numel() == 0 {
            return Ok(AShr::new(Tensor::zeros(x.shape().to_vec())));
        }
        let out = dispatch::dispatch_unary(self, x.tensor(), async |sess, ch, t| {
            truncate::trunc_on(sess, ch, &t, meta).await
        })
        .await?;
        Ok(AShr::new(out))
    }

    /// Extracts the most significant bit of each shared element as a boolean
    /// share: the sign bit under two's complement.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn msb_a2b<R: Ring>(&self, x: &AShr<R>) -> Result<BShr<R>, Error> {
        if x.numel() == 0 {
            return Ok(BShr::new(Tensor::zeros(x.shape().to_vec()), 1));
        }
        let rank = self.rank();
        let out = dispatch::dispatch_unary(self, x.tensor(), async |sess, ch, t| {
            // msb(x0 + x1) = msb(x0) ^ msb(x1) ^ carry, with the carry of
            // the low k-1 bits from one comparison: the low parts overflow
            // iff low(x0) > (2^(k-1) - 1) - low(x1).
            let low_mask = R::ONE.shl(R::BITS - 1).sub(R::ONE);
            let cmp_in = t.map(|v| {
                let low = v.and(low_mask);
                if rank == 0 { low } else { low.xor(low_mask) }
            });
            let carry = compare::compute_on(sess, ch, &cmp_in, true, R::BITS - 1).await?;
            Ok(t.zip_map(&carry, |v, c| {
                if v.bit(R::BITS - 1) { c.xor(R::ONE) } else { c }
            }))
        })
        .await?;
        Ok(BShr::new(out, 1))
    }

    /// Tests elementwise equality of two additively shared tensors,
    /// returning a boolean share of the 0/1 outcomes.
    ///
    /// With [`Config::equal_bits`](crate::session::Config::equal_bits) set,
    /// only the low bits take part in the test.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn equal_aa<R: Ring>(&self, x: &AShr<R>, y: &AShr<R>) -> Result<BShr<R>, Error> {
        check_same_shape(x.shape(), y.shape())?;
        let nbits = equal::check_bitwidth::<R>(self.config().equal_bits.unwrap_or(0))?;
        if x.numel() == 0 {
            return Ok(BShr::new(Tensor::zeros(x.shape().to_vec()), 1));
        }
        // x = y iff x0 - y0 = y1 - x1; each side tests its adjusted value.
        let adjusted = if self.rank() == 0 {
            x.tensor().sub(y.tensor())
        } else {
            y.tensor().sub(x.tensor())
        };
        let out = dispatch::dispatch_unary(self, &adjusted, async |sess, ch, t| {
            equal::equality_on(sess, ch, &t, nbits).await
        })
        .await?;
        Ok(BShr::new(out, 1))
    }

    /// Tests elementwise equality of a shared tensor against a private one.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn equal_ap<R: Ring>(&self, x: &AShr<R>, y: &Priv<R>) -> Result<BShr<R>, Error> {
        check_same_shape(x.shape(), y.shape())?;
        let nbits = equal::check_bitwidth::<R>(self.config().equal_bits.unwrap_or(0))?;
        if x.numel() == 0 {
            return Ok(BShr::new(Tensor::zeros(x.shape().to_vec()), 1));
        }
        // The owner folds the whole plaintext into its adjusted value; the
        // peer contributes only its share of x.
        let rank = self.rank();
        let adjusted = if rank == y.owner() {
            let y = y.data_on_owner()?;
            if rank == 0 {
                x.tensor().sub(y)
            } else {
                y.sub(x.tensor())
            }
        } else if rank == 0 {
            x.tensor().clone()
        } else {
            x.tensor().map(R::neg)
        };
        let out = dispatch::dispatch_unary(self, &adjusted, async |sess, ch, t| {
            equal::equality_on(sess, ch, &t, nbits).await
        })
        .await?;
        Ok(BShr::new(out, 1))
    }

    /// Multiplies two additively shared tensors elementwise.
    ///
    /// Large batches run the oblivious-linear-evaluation engine directly;
    /// small ones consume cached Beaver triples so the online cost is two
    /// openings.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn mul_aa<R: Ring>(&self, x: &AShr<R>, y: &AShr<R>) -> Result<AShr<R>, Error> {
        check_same_shape(x.shape(), y.shape())?;
        let n = x.numel();
        if n == 0 {
            return Ok(AShr::new(Tensor::zeros(x.shape().to_vec())));
        }
        if n >= 2 * self.ole_batch_size() {
            let evaluator = self.rank() == 0;
            let out = dispatch::dispatch_binary(
                self,
                x.tensor(),
                y.tensor(),
                async |sess, ch, xt, yt| {
                    let z = ole::mul_share(sess, ch, xt.data(), yt.data(), evaluator).await?;
                    Ok(Tensor::new(xt.shape().to_vec(), z))
                },
            )
            .await?;
            return Ok(AShr::new(out));
        }
        self.mul_with_beaver(x, y).await
    }

    async fn mul_with_beaver<R: Ring>(
        &self,
        x: &AShr<R>,
        y: &AShr<R>,
    ) -> Result<AShr<R>, Error> {
        let n = x.numel();
        let (a, b, c) = self.take_cached_beaver::<R>(n).await?;
        // Open x - a and y - b in a single round.
        let mut masked = Vec::with_capacity(2 * n);
        masked.extend(x.tensor().data().iter().zip(a.data()).map(|(&x, &a)| x.sub(a)));
        masked.extend(y.tensor().data().iter().zip(b.data()).map(|(&y, &b)| y.sub(b)));
        let opened = self.open_add(&Tensor::from_vec(masked)).await?;
        let (e, d) = opened.split_flat(n);
        let rank0 = self.rank() == 0;
        let z: Vec<R> = (0..n)
            .map(|i| {
                let mut z = c.data()[i]
                    .add(e[i].mul(b.data()[i]))
                    .add(d[i].mul(a.data()[i]));
                // The public cross product enters exactly once.
                if rank0 {
                    z = z.add(e[i].mul(d[i]));
                }
                z
            })
            .collect();
        Ok(AShr::new(Tensor::new(x.shape().to_vec(), z)))
    }

    /// Squares an additively shared tensor elementwise: one OLE pass instead
    /// of two, since the cross term `x0 * x1` appears twice.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn square_a<R: Ring>(&self, x: &AShr<R>) -> Result<AShr<R>, Error> {
        if x.numel() == 0 {
            return Ok(AShr::new(Tensor::zeros(x.shape().to_vec())));
        }
        let evaluator = self.rank() == 0;
        let out = dispatch::dispatch_unary(self, x.tensor(), async |sess, ch, t| {
            let cross = ole::mul_ole(sess, ch, t.data(), evaluator).await?;
            // (x0 + x1)^2 = x0^2 + x1^2 + 2 * x0 * x1.
            let z = t
                .data()
                .iter()
                .zip(&cross)
                .map(|(&v, &h)| v.mul(v).add(h.shl(1)))
                .collect();
            Ok(Tensor::new(t.shape().to_vec(), z))
        })
        .await?;
        Ok(AShr::new(out))
    }

    /// Multiplies a shared tensor elementwise by a private one.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn mul_av<R: Ring>(&self, x: &AShr<R>, y: &Priv<R>) -> Result<AShr<R>, Error> {
        check_same_shape(x.shape(), y.shape())?;
        if x.numel() == 0 {
            return Ok(AShr::new(Tensor::zeros(x.shape().to_vec())));
        }
        let is_owner = self.rank() == y.owner();
        // One OLE pass for x_peer * y; the owner's x share multiplies y
        // locally.
        let ole_in = if is_owner {
            y.data_on_owner()?.clone()
        } else {
            x.tensor().clone()
        };
        let mut out = dispatch::dispatch_unary(self, &ole_in, async |sess, ch, t| {
            let z = ole::mul_ole(sess, ch, t.data(), !is_owner).await?;
            Ok(Tensor::new(t.shape().to_vec(), z))
        })
        .await?;
        if is_owner {
            out.add_assign(&x.tensor().mul(y.data_on_owner()?));
        }
        Ok(AShr::new(out.reshape(x.shape().to_vec())))
    }

    /// Multiplies a shared tensor elementwise by a boolean-shared bit
    /// tensor: shares of `b ? x : 0`.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn mul_a1b<R: Ring>(&self, x: &AShr<R>, b: &BShr<R>) -> Result<AShr<R>, Error> {
        check_same_shape(x.shape(), b.shape())?;
        if x.numel() == 0 {
            return Ok(AShr::new(Tensor::zeros(x.shape().to_vec())));
        }
        let out = dispatch::dispatch_binary(
            self,
            x.tensor(),
            b.tensor(),
            async |sess, ch, xt, bt| {
                let bits: Vec<bool> = bt.data().iter().map(|v| v.bit(0)).collect();
                let z = basic_ot::multiplexer(sess, ch, xt.data(), &bits).await?;
                Ok(Tensor::new(xt.shape().to_vec(), z))
            },
        )
        .await?;
        Ok(AShr::new(out))
    }

    /// Multiplies a shared tensor elementwise by bits held privately by one
    /// party: shares of `b ? x : 0`.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn mul_a1bv<R: Ring>(&self, x: &AShr<R>, b: &Priv<R>) -> Result<AShr<R>, Error> {
        check_same_shape(x.shape(), b.shape())?;
        if x.numel() == 0 {
            return Ok(AShr::new(Tensor::zeros(x.shape().to_vec())));
        }
        let is_owner = self.rank() == b.owner();
        let bits = if is_owner {
            b.data_on_owner()?.clone()
        } else {
            Tensor::zeros(b.shape().to_vec())
        };
        let out = dispatch::dispatch_binary(
            self,
            x.tensor(),
            &bits,
            async |sess, ch, xt, bt| {
                let z = if is_owner {
                    let bits: Vec<bool> = bt.data().iter().map(|v| v.bit(0)).collect();
                    basic_ot::private_mulx_recv(sess, ch, xt.data(), &bits).await?
                } else {
                    basic_ot::private_mulx_send(sess, ch, xt.data()).await?
                };
                Ok(Tensor::new(xt.shape().to_vec(), z))
            },
        )
        .await?;
        Ok(AShr::new(out))
    }

    /// Matrix product of two shared 2-D tensors: `(M, K) x (K, N)`.
    ///
    /// The local products need no communication; the two cross terms run as
    /// one OLE each, overlapped on the primary and scratch channels with
    /// mirrored roles.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn matmul_aa<R: Ring>(&self, x: &AShr<R>, y: &AShr<R>) -> Result<AShr<R>, Error> {
        let [m, k, n] = check_matmul_dims(x.shape(), y.shape())?;
        if m * k * n == 0 {
            return Ok(AShr::new(Tensor::zeros(vec![m, n])));
        }
        self.lazy_init_keys::<R>().await?;
        let dim3 = [m, k, n];
        let (c1, c2) = if self.rank() == 0 {
            futures::try_join!(
                ole::dot_ole(self, self.primary(), x.tensor(), dim3, true),
                ole::dot_ole(self, self.duplex(), y.tensor(), dim3, false),
            )?
        } else {
            futures::try_join!(
                ole::dot_ole(self, self.primary(), y.tensor(), dim3, false),
                ole::dot_ole(self, self.duplex(), x.tensor(), dim3, true),
            )?
        };
        let mut out = x.tensor().matmul(y.tensor());
        out.add_assign(&c1);
        out.add_assign(&c2);
        Ok(AShr::new(out))
    }

    /// Matrix product of a shared tensor with a private right-hand side.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn matmul_av<R: Ring>(&self, x: &AShr<R>, y: &Priv<R>) -> Result<AShr<R>, Error> {
        let [m, k, n] = check_matmul_dims(x.shape(), y.shape())?;
        if m * k * n == 0 {
            return Ok(AShr::new(Tensor::zeros(vec![m, n])));
        }
        let dim3 = [m, k, n];
        if self.rank() == y.owner() {
            let y = y.data_on_owner()?;
            let mut out = ole::dot_ole(self, self.primary(), y, dim3, false).await?;
            out.add_assign(&x.tensor().matmul(y));
            Ok(AShr::new(out))
        } else {
            let out = ole::dot_ole(self, self.primary(), x.tensor(), dim3, true).await?;
            Ok(AShr::new(out))
        }
    }

    /// Matrix product of two private tensors with different owners; the
    /// result is secret shared between both.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn matmul_vvs<R: Ring>(&self, x: &Priv<R>, y: &Priv<R>) -> Result<AShr<R>, Error> {
        let [m, k, n] = check_matmul_dims(x.shape(), y.shape())?;
        if x.owner() == y.owner() {
            return Err(Error::PrivateOperandsSameOwner(x.owner()));
        }
        if m * k * n == 0 {
            return Ok(AShr::new(Tensor::zeros(vec![m, n])));
        }
        let dim3 = [m, k, n];
        let out = if self.rank() == x.owner() {
            ole::dot_ole(self, self.primary(), x.data_on_owner()?, dim3, true).await?
        } else {
            ole::dot_ole(self, self.primary(), y.data_on_owner()?, dim3, false).await?
        };
        Ok(AShr::new(out))
    }

    /// Batched matrix product of two shared 3-D tensors:
    /// `(B, M, K) x (B, K, N)`.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn batch_matmul_aa<R: Ring>(
        &self,
        x: &AShr<R>,
        y: &AShr<R>,
    ) -> Result<AShr<R>, Error> {
        let [b, m, k, n] = check_batch_matmul_dims(x.shape(), y.shape())?;
        if b * m * k * n == 0 {
            return Ok(AShr::new(Tensor::zeros(vec![b, m, n])));
        }
        self.lazy_init_keys::<R>().await?;
        let dim4 = [b, m, k, n];
        let (c1, c2) = if self.rank() == 0 {
            futures::try_join!(
                ole::batch_dot_ole(self, self.primary(), x.tensor(), dim4, true),
                ole::batch_dot_ole(self, self.duplex(), y.tensor(), dim4, false),
            )?
        } else {
            futures::try_join!(
                ole::batch_dot_ole(self, self.primary(), y.tensor(), dim4, false),
                ole::batch_dot_ole(self, self.duplex(), x.tensor(), dim4, true),
            )?
        };
        let mut out = local_batch_matmul(x.tensor(), y.tensor(), dim4);
        out.add_assign(&c1);
        out.add_assign(&c2);
        Ok(AShr::new(out))
    }

    /// Batched matrix product of a shared tensor with a private right-hand
    /// side.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub async fn batch_matmul_av<R: Ring>(
        &self,
        x: &AShr<R>,
        y: &Priv<R>,
    ) -> Result<AShr<R>, Error> {
        let [b, m, k, n] = check_batch_matmul_dims(x.shape(), y.shape())?;
        if b * m * k * n == 0 {
            return Ok(AShr::new(Tensor::zeros(vec![b, m, n])));
        }
        let dim4 = [b, m, k, n];
        if self.rank() == y.owner() {
            let y = y.data_on_owner()?;
            let mut out = ole::batch_dot_ole(self, self.primary(), y, dim4, false).await?;
            out.add_assign(&local_batch_matmul(x.tensor(), y, dim4));
            Ok(AShr::new(out))
        } else {
            let out =
                ole::batch_dot_ole(self, self.primary(), x.tensor(), dim4, true).await?;
            Ok(AShr::new(out))
        }
    }
}

fn check_same_shape(lhs: &[usize], rhs: &[usize]) -> Result<(), Error> {
    if lhs != rhs {
        return Err(Error::ShapeMismatch {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        });
    }
    Ok(())
}

fn check_matmul_dims(lhs: &[usize], rhs: &[usize]) -> Result<[usize; 3], Error> {
    if let ([m, k], [k2, n]) = (lhs, rhs)
        && k == k2
    {
        return Ok([*m, *k, *n]);
    }
    Err(Error::ShapeMismatch {
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    })
}

fn check_batch_matmul_dims(lhs: &[usize], rhs: &[usize]) -> Result<[usize; 4], Error> {
    if let ([b, m, k], [b2, k2, n]) = (lhs, rhs)
        && b == b2
        && k == k2
    {
        return Ok([*b, *m, *k, *n]);
    }
    Err(Error::ShapeMismatch {
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    })
}

fn local_batch_matmul<R: Ring>(x: &Tensor<R>, y: &Tensor<R>, dim4: [usize; 4]) -> Tensor<R> {
    let [b, m, _, n] = dim4;
    let mut out = Tensor::zeros(vec![b, m, n]);
    for i in 0..b {
        let slice = x.batch_slice(i).matmul(&y.batch_slice(i));
        out.batch_slice_add_assign(i, &slice);
    }
    out
}
