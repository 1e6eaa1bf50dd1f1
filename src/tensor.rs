//! A minimal dense tensor of ring elements.
//!
//! Only what the protocol layer needs: row-major storage, elementwise
//! wraparound arithmetic, 2-D matrix multiplication and 3-D batch slicing.
//! Shape compatibility of user-facing operands is validated by the kernels
//! before any of these routines run; the methods here treat mismatches as
//! internal bugs.

use crate::ring::Ring;

/// A dense row-major tensor of ring elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor<R> {
    shape: Vec<usize>,
    data: Vec<R>,
}

impl<R: Ring> Tensor<R> {
    /// Creates a tensor from row-major data; the shape must match the number
    /// of elements.
    pub fn new(shape: Vec<usize>, data: Vec<R>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), data.len());
        Tensor { shape, data }
    }

    /// Creates a 1-D tensor.
    pub fn from_vec(data: Vec<R>) -> Self {
        Tensor {
            shape: vec![data.len()],
            data,
        }
    }

    /// Creates an all-zero tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let numel = shape.iter().product();
        Tensor {
            shape,
            data: vec![R::ZERO; numel],
        }
    }

    /// The number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// The row-major elements.
    pub fn data(&self) -> &[R] {
        &self.data
    }

    /// Mutable access to the row-major elements.
    pub fn data_mut(&mut self) -> &mut [R] {
        &mut self.data
    }

    /// Consumes the tensor, returning its row-major elements.
    pub fn into_data(self) -> Vec<R> {
        self.data
    }

    /// Returns the same data under a new shape.
    pub fn reshape(mut self, shape: Vec<usize>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), self.data.len());
        self.shape = shape;
        self
    }

    /// Applies `f` to every element.
    pub fn map(&self, f: impl Fn(R) -> R) -> Self {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combines two tensors of identical shape elementwise.
    pub fn zip_map(&self, rhs: &Self, f: impl Fn(R, R) -> R) -> Self {
        assert_eq!(self.shape, rhs.shape);
        Tensor {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&rhs.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }

    /// Elementwise addition modulo 2^k.
    pub fn add(&self, rhs: &Self) -> Self {
        self.zip_map(rhs, R::add)
    }

    /// Elementwise subtraction modulo 2^k.
    pub fn sub(&self, rhs: &Self) -> Self {
        self.zip_map(rhs, R::sub)
    }

    /// Elementwise multiplication modulo 2^k.
    pub fn mul(&self, rhs: &Self) -> Self {
        self.zip_map(rhs, R::mul)
    }

    /// Elementwise XOR.
    pub fn xor(&self, rhs: &Self) -> Self {
        self.zip_map(rhs, R::xor)
    }

    /// In-place elementwise addition modulo 2^k.
    pub fn add_assign(&mut self, rhs: &Self) {
        assert_eq!(self.shape, rhs.shape);
        for (a, &b) in self.data.iter_mut().zip(&rhs.data) {
            *a = a.add(b);
        }
    }

    /// 2-D matrix multiplication: `(M, K) x (K, N) -> (M, N)` modulo 2^k.
    pub fn matmul(&self, rhs: &Self) -> Self {
        assert_eq!(self.ndim(), 2);
        assert_eq!(rhs.ndim(), 2);
        assert_eq!(self.shape[1], rhs.shape[0]);
        let (m, k, n) = (self.shape[0], self.shape[1], rhs.shape[1]);
        let mut out = vec![R::ZERO; m * n];
        for i in 0..m {
            for l in 0..k {
                let a = self.data[i * k + l];
                for j in 0..n {
                    let cell = &mut out[i * n + j];
                    *cell = cell.add(a.mul(rhs.data[l * n + j]));
                }
            }
        }
        Tensor {
            shape: vec![m, n],
            data: out,
        }
    }

    /// Copies out the 2-D slice `b` of a 3-D tensor `(B, M, N)`.
    pub fn batch_slice(&self, b: usize) -> Self {
        assert_eq!(self.ndim(), 3);
        let (m, n) = (self.shape[1], self.shape[2]);
        let start = b * m * n;
        Tensor {
            shape: vec![m, n],
            data: self.data[start..start + m * n].to_vec(),
        }
    }

    /// Adds a 2-D tensor into the slice `b` of a 3-D tensor `(B, M, N)`.
    pub fn batch_slice_add_assign(&mut self, b: usize, slice: &Self) {
        assert_eq!(self.ndim(), 3);
        assert_eq!(&self.shape[1..], slice.shape());
        let (m, n) = (self.shape[1], self.shape[2]);
        let start = b * m * n;
        for (a, &s) in self.data[start..start + m * n].iter_mut().zip(&slice.data) {
            *a = a.add(s);
        }
    }

    /// Splits the flattened elements at `mid`, preserving order.
    pub fn split_flat(&self, mid: usize) -> (Vec<R>, Vec<R>) {
        let (lo, hi) = self.data.split_at(mid);
        (lo.to_vec(), hi.to_vec())
    }
}

/// Reassembles slices (in offset order) into a tensor of the given shape.
pub fn concat_flat<R: Ring>(shape: Vec<usize>, slices: Vec<Vec<R>>) -> Tensor<R> {
    let data: Vec<R> = slices.into_iter().flatten().collect();
    Tensor::new(shape, data)
}
