//! Splits large elementwise protocol calls across the two session channels.
//!
//! Both parties split at the same point (the split depends only on element
//! count and configuration), run the lower half on the primary channel and
//! the upper half on the scratch channel concurrently, and reassemble by
//! offset. Everything runs inside the calling task; no work is spawned, so
//! the futures need not be `Send`.

use crate::{
    channel::Channel,
    proto::Error,
    ring::Ring,
    session::Session,
    tensor::{Tensor, concat_flat},
};

/// Runs `f` over the elements of `x`, split across both channels when the
/// input is at least two tiles.
pub(crate) async fn dispatch_unary<R, C, F>(
    sess: &Session<C>,
    x: &Tensor<R>,
    f: F,
) -> Result<Tensor<R>, Error>
where
    R: Ring,
    C: Channel,
    F: AsyncFn(&Session<C>, &C, Tensor<R>) -> Result<Tensor<R>, Error>,
{
    let n = x.numel();
    if n < 2 * sess.config().tile_size {
        return f(sess, sess.primary(), x.clone()).await;
    }
    // The key handshake must not race between the two halves.
    sess.lazy_init_keys::<R>().await?;
    let (lo, hi) = x.split_flat(n / 2);
    let (a, b) = futures::try_join!(
        f(sess, sess.primary(), Tensor::from_vec(lo)),
        f(sess, sess.duplex(), Tensor::from_vec(hi)),
    )?;
    Ok(concat_flat(
        x.shape().to_vec(),
        vec![a.into_data(), b.into_data()],
    ))
}

/// The two-operand form of [`dispatch_unary`]; both tensors are split at the
/// same offset.
pub(crate) async fn dispatch_binary<R, C, F>(
    sess: &Session<C>,
    x: &Tensor<R>,
    y: &Tensor<R>,
    f: F,
) -> Result<Tensor<R>, Error>
where
    R: Ring,
    C: Channel,
    F: AsyncFn(&Session<C>, &C, Tensor<R>, Tensor<R>) -> Result<Tensor<R>, Error>,
{
    debug_assert_eq!(x.numel(), y.numel());
    let n = x.numel();
    if n < 2 * sess.config().tile_size {
        return f(sess, sess.primary(), x.clone(), y.clone()).await;
    }
    sess.lazy_init_keys::<R>().await?;
    let (xlo, xhi) = x.split_flat(n / 2);
    let (ylo, yhi) = y.split_flat(n / 2);
    let (a, b) = futures::try_join!(
        f(
            sess,
            sess.primary(),
            Tensor::from_vec(xlo),
            Tensor::from_vec(ylo)
        ),
        f(
            sess,
            sess.duplex(),
            Tensor::from_vec(xhi),
            Tensor::from_vec(yhi)
        ),
    )?;
    Ok(concat_flat(
        x.shape().to_vec(),
        vec![a.into_data(), b.into_data()],
    ))
}
