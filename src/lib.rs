//! A Rust implementation of the two-party arithmetic layer of a
//! secret-sharing-based secure-computation runtime.
//!
//! Two parties (rank 0 and rank 1) each hold an additive share of tensors of
//! ring elements (unsigned integers modulo 2^k). This crate evaluates
//! arithmetic and tensor operations on those shares without either party ever
//! observing a plaintext value: multiplication and matrix multiplication via
//! Beaver triples or direct oblivious linear evaluation (OLE), truncation,
//! most-significant-bit extraction, and equality/comparison via an
//! oblivious-transfer-based digit-decomposition protocol.
//!
//! ## Main Components
//!
//! * [`session`]: The [`session::Session`] context owning the communication
//!   channels, configuration and correlated-randomness caches of one party.
//! * [`proto`]: The protocol engines and the operation facade
//!   ([`proto::kernels`]), e.g. [`proto::compare`] for the comparison engine.
//! * [`channel`]: Communication abstractions for exchanging protocol
//!   messages between the two parties.
//! * [`ring`] and [`tensor`]: The modular-integer substrate the protocols
//!   operate on.
//!
//! ## Basic Usage
//!
//! Each party sets up a [`session::Session`] from its rank and a pair of
//! channels connected to the peer, then calls the kernel methods with its
//! share of each operand:
//!
//! ```ignore
//! use duoring::{proto::shares::AShr, session::{Config, Session}};
//!
//! # async fn example() -> Result<(), duoring::proto::Error> {
//! let session = Session::new(rank, primary, scratch, Config::default())?;
//!
//! // Both parties call the same kernel with their local shares; the result
//! // is a fresh share of the product.
//! let z: AShr<u64> = session.mul_aa(&x, &y).await?;
//! # Ok(())
//! # }
//! ```
//!
//! For tests and local experiments, [`session::Session::pair`] wires two
//! in-memory sessions together.
//!
//! ## Security Properties
//!
//! The protocols are secure against semi-honest adversaries: neither party
//! learns anything about a reconstructed value beyond what the protocol
//! output reveals. Malicious security and party counts other than two are
//! out of scope.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod proto;
pub mod ring;
pub mod session;
pub mod tensor;

mod utils;
