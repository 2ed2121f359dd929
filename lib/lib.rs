//! Symmetry-resolved, matrix-free diagonalization of superblock Hamiltonians
//! arising in block-renormalization sweeps over one-dimensional lattices.
//!
//! The superblock Hamiltonian is never stored. Within each symmetry sector it
//! is applied as a sum of Kronecker products of small left- and right-block
//! operators:
//! - [`qn`] labels block states and partitions bases into sectors;
//! - [`block`] holds the two blocks and the partition of their product basis;
//! - [`connection`] caches the inter-block couplings supplied by a
//!   [`model::Geometry`] and a [`model::LinkProduct`];
//! - [`kron`] assembles and applies the per-sector operator;
//! - [`solver`] finds eigenpairs from products alone;
//! - [`diag`] drives all of the above for one sweep step.

#![allow(non_snake_case)]

pub mod error;
pub mod config;
pub mod qn;
pub mod sparse;
pub mod block;
pub mod model;
pub mod connection;
pub mod kron;
pub mod solver;
pub mod reflection;
pub mod diag;
pub mod checkpoint;

pub use error::{ DiagError, DiagResult };
