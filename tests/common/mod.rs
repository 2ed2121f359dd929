//! Spin-1/2 Heisenberg chain fixtures shared by the integration tests.
//!
//! Single-site basis: index 0 = up, index 1 = down. A block of `k` sites has
//! natural index `s = Σ_l b_l 2^l` with `b_l` the single-site index of local
//! site `l`. State labels count up spins.

#![allow(dead_code, non_snake_case)]

use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use superblock_diag::{
    block::{ Block, LeftRightSuper, Modifier },
    model::{ AdditionalData, Geometry, LinkData, LinkProduct },
    qn::{ ModalStructure, QuantumLabel },
    sparse::CsrMatrix,
};

pub const SZ: usize = 0;
pub const SP: usize = 1;

pub fn c(x: f64) -> C64 { C64::from(x) }

pub fn sz() -> nd::Array2<C64> {
    nd::array![[c(0.5), c(0.0)], [c(0.0), c(-0.5)]]
}

pub fn sp() -> nd::Array2<C64> {
    nd::array![[c(0.0), c(1.0)], [c(0.0), c(0.0)]]
}

fn bit(s: usize, l: usize) -> usize { (s >> l) & 1 }

/// Single-site operator `op` acting on site `l` of `k` sites.
pub fn site_op(op: &nd::Array2<C64>, l: usize, k: usize) -> nd::Array2<C64> {
    let n = 1 << k;
    let mut O: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for s in 0..n {
        for t in 0..n {
            let others_equal = (0..k).all(|q| q == l || bit(s, q) == bit(t, q));
            if others_equal { O[[s, t]] = op[[bit(s, l), bit(t, l)]]; }
        }
    }
    O
}

/// Heisenberg bond `J (Sz_i Sz_j + (S+_i S-_j + S-_i S+_j) / 2)` on `k`
/// sites.
pub fn bond(i: usize, j: usize, k: usize, J: f64) -> nd::Array2<C64> {
    let (zi, zj) = (site_op(&sz(), i, k), site_op(&sz(), j, k));
    let (pi, pj) = (site_op(&sp(), i, k), site_op(&sp(), j, k));
    let mi = pi.t().mapv(|a| a.conj());
    let mj = pj.t().mapv(|a| a.conj());
    (zi.dot(&zj) + (pi.dot(&mj) + mi.dot(&pj)) * c(0.5)) * c(J)
}

/// Open Heisenberg chain on `k` sites with uniform coupling `J`.
pub fn chain_hamiltonian(k: usize, J: f64) -> nd::Array2<C64> {
    let n = 1 << k;
    let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for i in 0..k.saturating_sub(1) {
        H += &bond(i, i + 1, k, J);
    }
    H
}

/// Lowest eigenvalue of a dense hermitian matrix.
pub fn lowest(H: nd::Array2<C64>) -> f64 {
    let (E, _) = H.eigh_into(UPLO::Lower).unwrap();
    E[0]
}

/// Labels of a `k`-site block: number of up spins.
pub fn labels(k: usize) -> Vec<QuantumLabel> {
    (0..1usize << k)
        .map(|s| QuantumLabel::new((0..k).filter(|l| bit(s, *l) == 0).count() as u32, vec![]))
        .collect()
}

/// A `k`-site chain block over `sites`, with local site `l` mapped to
/// `sites[l]` and an internal open chain of coupling `J` plus a uniform
/// field `h` on Sz.
pub fn chain_block(sites: Vec<usize>, J: f64, h: f64, modal: &ModalStructure) -> Block {
    let k = sites.len();
    let mut H = chain_hamiltonian(k, J);
    for l in 0..k {
        H += &(site_op(&sz(), l, k) * c(h));
    }
    let mut block
        = Block::new(sites, &labels(k), &CsrMatrix::from_dense(&H), modal).unwrap();
    for l in 0..k {
        block.insert_operator(l, SZ, &CsrMatrix::from_dense(&site_op(&sz(), l, k)))
            .unwrap();
        block.insert_operator(l, SP, &CsrMatrix::from_dense(&site_op(&sp(), l, k)))
            .unwrap();
    }
    block
}

/// Superblock of two `k`-site blocks of a `2k`-site chain. With `mirror`,
/// the right block lists its sites in reverse so that both blocks carry
/// identical bases.
pub fn chain_superblock(k: usize, J: f64, mirror: bool) -> LeftRightSuper {
    let modal = ModalStructure::default();
    let left = chain_block((0..k).collect(), J, 0.0, &modal);
    let right_sites: Vec<usize>
        = if mirror { (k..2 * k).rev().collect() } else { (k..2 * k).collect() };
    let right = chain_block(right_sites, J, 0.0, &modal);
    LeftRightSuper::new(left, right, &modal).unwrap()
}

/// Nearest-neighbor Heisenberg chain geometry: term 0 is `Sz Sz`, term 1 is
/// the spin flip.
#[derive(Clone, Debug)]
pub struct Chain {
    pub sites: usize,
    pub J: f64,
}

impl Geometry for Chain {
    fn num_sites(&self) -> usize { self.sites }

    fn terms(&self) -> usize { 2 }

    fn connected(&self, term: usize, i: usize, j: usize) -> bool {
        let neighbors = i.abs_diff(j) == 1;
        match term {
            0 => neighbors && i < j,
            _ => neighbors,
        }
    }

    fn coupling(&self, term: usize, _item: &[usize], _edofs: &[usize]) -> C64 {
        match term {
            0 => c(self.J),
            _ => c(0.5 * self.J),
        }
    }
}

/// Link products of [`Chain`].
#[derive(Clone, Debug)]
pub struct Heisenberg;

impl LinkProduct for Heisenberg {
    fn dofs(&self, _term: usize, _data: &AdditionalData) -> usize { 1 }

    fn link_data(&self, term: usize, _dof: usize, _su2: bool, _data: &AdditionalData)
        -> LinkData
    {
        match term {
            0 => LinkData::boson((SZ, SZ)).with_mods((Modifier::N, Modifier::N)),
            _ => LinkData::boson((SP, SP)),
        }
    }
}
