//! The value kinds flowing through the protocol operations.
//!
//! Three kinds exist: arithmetic shares (each party holds an additive share
//! modulo 2^k), boolean shares (each party holds an XOR share, with a known
//! number of meaningful bits), and private values (one party holds the
//! plaintext, the other only the shape). The types carry no networking; they
//! exist so the operations in [`crate::proto::kernels`] can state in their
//! signatures which kind each operand must be.

use crate::{proto::Error, ring::Ring, tensor::Tensor};

/// An additively shared tensor: the value is the sum of both parties'
/// tensors modulo 2^k.
#[derive(Debug, Clone)]
pub struct AShr<R: Ring>(Tensor<R>);

impl<R: Ring> AShr<R> {
    /// Wraps this party's additive share.
    pub fn new(share: Tensor<R>) -> Self {
        AShr(share)
    }

    /// This party's share.
    pub fn tensor(&self) -> &Tensor<R> {
        &self.0
    }

    /// Consumes the share.
    pub fn into_tensor(self) -> Tensor<R> {
        self.0
    }

    /// The shape of the shared tensor.
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// The number of shared elements.
    pub fn numel(&self) -> usize {
        self.0.numel()
    }
}

/// An XOR-shared tensor; only the low `nbits` bits of each element are
/// meaningful.
#[derive(Debug, Clone)]
pub struct BShr<R: Ring> {
    shares: Tensor<R>,
    nbits: u32,
}

impl<R: Ring> BShr<R> {
    /// Wraps this party's XOR share with the given number of meaningful bits.
    pub fn new(shares: Tensor<R>, nbits: u32) -> Self {
        BShr { shares, nbits }
    }

    /// This party's share.
    pub fn tensor(&self) -> &Tensor<R> {
        &self.shares
    }

    /// The number of meaningful low bits per element.
    pub fn nbits(&self) -> u32 {
        self.nbits
    }

    /// The shape of the shared tensor.
    pub fn shape(&self) -> &[usize] {
        self.shares.shape()
    }
}

/// A tensor owned in plaintext by exactly one of the two parties.
///
/// Both parties construct the same `Priv` for an operation: the owner with
/// the data, the peer with only the shape.
#[derive(Debug, Clone)]
pub struct Priv<R: Ring> {
    owner: usize,
    shape: Vec<usize>,
    data: Option<Tensor<R>>,
}

impl<R: Ring> Priv<R> {
    /// The owner's constructor.
    pub fn owned(owner: usize, data: Tensor<R>) -> Result<Self, Error> {
        if owner > 1 {
            return Err(Error::InvalidRank(owner));
        }
        Ok(Priv {
            owner,
            shape: data.shape().to_vec(),
            data: Some(data),
        })
    }

    /// The peer's constructor: shape only, no data.
    pub fn remote(owner: usize, shape: Vec<usize>) -> Result<Self, Error> {
        if owner > 1 {
            return Err(Error::InvalidRank(owner));
        }
        Ok(Priv {
            owner,
            shape,
            data: None,
        })
    }

    /// The rank holding the plaintext.
    pub fn owner(&self) -> usize {
        self.owner
    }

    /// The shape of the value.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// The plaintext, which must be present when this party is the owner.
    pub(crate) fn data_on_owner(&self) -> Result<&Tensor<R>, Error> {
        self.data.as_ref().ok_or(Error::MissingPrivateValue {
            rank: self.owner,
        })
    }
}
