//! Matrix-free superblock Hamiltonian of one sector.
//!
//! A sector vector is laid out as a sequence of patches, one per pair of
//! (left group, right group) whose combined label is the sector label. Each
//! patch is a row-major `|R| × |L|` block indexed by (right state, left
//! state). The Hamiltonian acts as
//!
//! ```text
//! Y = Σ_k R_k · X · L_kᵀ
//! ```
//!
//! where `k` runs over the block Hamiltonians and every cached connection.

use std::ops::Range;
use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use rayon::prelude::*;
use crate::{
    block::LeftRightSuper,
    connection::HamiltonianConnection,
    error::{ DiagError, DiagResult },
    model::LinkProduct,
    qn::ModalStructure,
    solver::LinearOperator,
    sparse::CsrMatrix,
};

/// Leading dimensions of the batched operator arrays are padded to a
/// multiple of this.
pub const ALIGN: usize = 32;

fn pad(n: usize) -> usize { ALIGN * n.div_ceil(ALIGN) }

/* Patches ********************************************************************/

/// A contiguous run of sector states sharing one left and one right group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub left_group: usize,
    pub right_group: usize,
    /// Grouped positions of the left states.
    pub left: Range<usize>,
    /// Grouped positions of the right states.
    pub right: Range<usize>,
    /// Position of the patch within the sector vector.
    pub offset: usize,
}

impl Patch {
    pub fn size(&self) -> usize { self.left.len() * self.right.len() }

    /// Sector-vector range of the patch.
    pub fn range(&self) -> Range<usize> { self.offset..self.offset + self.size() }
}

/// Patch decomposition of one sector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patches {
    patches: Vec<Patch>,
    size: usize,
}

impl Patches {
    /// Decompose sector `m` of `lrs`.
    pub fn new(lrs: &LeftRightSuper, m: usize, modal: &ModalStructure)
        -> DiagResult<Self>
    {
        let target = lrs.sector_label(m);
        let lp = lrs.left().partition();
        let rp = lrs.right().partition();
        let mut patches: Vec<Patch> = Vec::new();
        let mut offset: usize = 0;
        for j in 0..rp.num_groups() {
            for i in 0..lp.num_groups() {
                let q = modal.combine(lp.label(i), rp.label(j));
                if !modal.equal(&q, target) { continue; }
                let patch = Patch {
                    left_group: i,
                    right_group: j,
                    left: lp.range(i),
                    right: rp.range(j),
                    offset,
                };
                offset += patch.size();
                patches.push(patch);
            }
        }
        if offset != lrs.sector_size(m) {
            return Err(DiagError::Shape(format!(
                "patches of sector {} cover {} states, expected {}",
                m, offset, lrs.sector_size(m),
            )));
        }
        Ok(Self { patches, size: offset })
    }

    /// Number of patches.
    pub fn len(&self) -> usize { self.patches.len() }

    pub fn is_empty(&self) -> bool { self.patches.is_empty() }

    /// Number of sector states covered.
    pub fn size(&self) -> usize { self.size }

    pub fn iter(&self) -> std::slice::Iter<'_, Patch> { self.patches.iter() }

    pub fn as_slice(&self) -> &[Patch] { &self.patches }
}

/* InitKron *******************************************************************/

/// Dense (left, right) operator pairs of a sector Hamiltonian.
///
/// The first two pairs are `H_L ⊗ 1` and `1 ⊗ H_R`; coupling values and
/// fermionic signs are folded into the left operator of every connection.
#[derive(Clone, Debug)]
pub struct InitKron {
    sector: usize,
    n_left: usize,
    n_right: usize,
    patches: Patches,
    ops: Vec<(nd::Array2<C64>, nd::Array2<C64>)>,
}

impl InitKron {
    pub fn new<L>(hc: &HamiltonianConnection<'_, L>, modal: &ModalStructure)
        -> DiagResult<Self>
    where L: LinkProduct
    {
        let lrs = hc.lrs();
        let sector = hc.sector();
        let patches = Patches::new(lrs, sector, modal)?;
        let n_left = lrs.left().size();
        let n_right = lrs.right().size();
        let mut ops: Vec<(nd::Array2<C64>, nd::Array2<C64>)>
            = Vec::with_capacity(hc.tasks() + 2);
        ops.push((lrs.left().hamiltonian().to_dense(), nd::Array2::eye(n_right)));
        ops.push((nd::Array2::eye(n_left), lrs.right().hamiltonian().to_dense()));
        for term in hc.kron_terms()?.into_iter() {
            let mut L = term.left.to_dense();
            for (x, mut col) in L.columns_mut().into_iter().enumerate() {
                let sign = lrs.left().fermionic_sign(x, term.fermionic);
                col.mapv_inplace(|a| a * term.value * sign);
            }
            ops.push((L, term.right.to_dense()));
        }
        Ok(Self { sector, n_left, n_right, patches, ops })
    }

    pub fn sector(&self) -> usize { self.sector }

    /// Number of operator pairs, block Hamiltonians included.
    pub fn num_ops(&self) -> usize { self.ops.len() }

    pub fn patches(&self) -> &Patches { &self.patches }

    pub fn ops(&self) -> &[(nd::Array2<C64>, nd::Array2<C64>)] { &self.ops }
}

/* BatchedGemm ****************************************************************/

/// All operator pairs of a sector stacked side by side for a two-phase
/// batched product.
///
/// `a_batch[x', k·n_left + x] = L_k[x', x]` and
/// `b_batch[y', k·n_right + y] = R_k[y', y]`, with leading dimensions padded
/// to a multiple of [`ALIGN`].
#[derive(Clone, Debug)]
pub struct BatchedGemm {
    enabled: bool,
    n_left: usize,
    n_right: usize,
    n_ops: usize,
    a_batch: nd::Array2<C64>,
    b_batch: nd::Array2<C64>,
    patches: Patches,
}

impl BatchedGemm {
    /// Assemble the batched arrays; when `enabled` is `false` nothing is
    /// allocated and every product fails.
    pub fn new(init: &InitKron, enabled: bool) -> Self {
        let n_left = init.n_left;
        let n_right = init.n_right;
        let n_ops = if enabled { init.num_ops() } else { 0 };
        let mut a_batch: nd::Array2<C64>
            = nd::Array2::zeros((pad(n_left), n_left * n_ops));
        let mut b_batch: nd::Array2<C64>
            = nd::Array2::zeros((pad(n_right), n_right * n_ops));
        for (k, (L, R)) in init.ops.iter().enumerate().take(n_ops) {
            a_batch.slice_mut(s![..n_left, k * n_left..(k + 1) * n_left])
                .assign(L);
            b_batch.slice_mut(s![..n_right, k * n_right..(k + 1) * n_right])
                .assign(R);
        }
        Self {
            enabled,
            n_left,
            n_right,
            n_ops,
            a_batch,
            b_batch,
            patches: init.patches.clone(),
        }
    }

    pub fn enabled(&self) -> bool { self.enabled }

    /// Sector dimension.
    pub fn size(&self) -> usize { self.patches.size() }

    /// Accumulate `y += H x`.
    pub fn matrix_vector(&self, y: &mut nd::Array1<C64>, x: &nd::Array1<C64>)
        -> DiagResult<()>
    {
        if !self.enabled { return Err(DiagError::BatchedDisabled); }
        let n = self.size();
        if x.len() != n || y.len() != n {
            return Err(DiagError::Shape(format!(
                "batched product of size {} with vectors of length {} and {}",
                n, x.len(), y.len(),
            )));
        }
        let x_std = x.as_standard_layout();
        let xs: &[C64]
            = x_std.as_slice()
            .ok_or_else(|| DiagError::Shape("non-contiguous input vector".into()))?;
        let (nl, nr) = (self.n_left, self.n_right);

        // phase 1: BX[:, k nL + L] += Bbatch[:, k nR + R] · X_p
        let bx_blocks: Vec<nd::Array2<C64>>
            = (0..self.n_ops).into_par_iter()
            .map(|k| -> DiagResult<nd::Array2<C64>> {
                let mut bx: nd::Array2<C64> = nd::Array2::zeros((nr, nl));
                for p in self.patches.iter() {
                    let X_p
                        = nd::ArrayView2::from_shape(
                            (p.right.len(), p.left.len()), &xs[p.range()])
                        .map_err(|e| DiagError::Shape(e.to_string()))?;
                    let B_k
                        = self.b_batch.slice(
                            s![..nr, k * nr + p.right.start..k * nr + p.right.end]);
                    let mut target = bx.slice_mut(s![.., p.left.clone()]);
                    target += &B_k.dot(&X_p);
                }
                Ok(bx)
            })
            .collect::<DiagResult<Vec<_>>>()?;
        let views: Vec<nd::ArrayView2<C64>>
            = bx_blocks.iter().map(|b| b.view()).collect();
        let bx: nd::Array2<C64>
            = nd::concatenate(nd::Axis(1), &views)
            .map_err(|e| DiagError::Shape(e.to_string()))?;

        // phase 2: Y_p += BX[R_p, :] · Abatch[L_p, :]ᵀ
        let a_batch = self.a_batch.slice(s![..nl, ..]);
        let y_patches: Vec<nd::Array2<C64>>
            = self.patches.as_slice().par_iter()
            .map(|p| {
                bx.slice(s![p.right.clone(), ..])
                    .dot(&a_batch.slice(s![p.left.clone(), ..]).t())
            })
            .collect();
        for (p, y_p) in self.patches.iter().zip(y_patches.iter()) {
            y.slice_mut(s![p.range()]).iter_mut()
                .zip(y_p.iter())
                .for_each(|(a, b)| { *a += b; });
        }
        Ok(())
    }

    /// Diagonal of the sector Hamiltonian.
    pub fn diagonal(&self) -> DiagResult<nd::Array1<f64>> {
        if !self.enabled { return Err(DiagError::BatchedDisabled); }
        let (nl, nr) = (self.n_left, self.n_right);
        let mut diag: nd::Array1<f64> = nd::Array1::zeros(self.size());
        for p in self.patches.iter() {
            for (r, y) in p.right.clone().enumerate() {
                for (l, x) in p.left.clone().enumerate() {
                    let d: C64
                        = (0..self.n_ops)
                        .map(|k| {
                            self.a_batch[[x, k * nl + x]]
                                * self.b_batch[[y, k * nr + y]]
                        })
                        .sum();
                    diag[p.offset + r * p.left.len() + l] = d.re;
                }
            }
        }
        Ok(diag)
    }
}

/* Sector operator ************************************************************/

#[derive(Clone, Debug)]
enum Kernel {
    Batched(BatchedGemm),
    Sparse(CsrMatrix),
}

/// The Hamiltonian of one sector, applied either through [`BatchedGemm`] or
/// through an assembled sparse matrix.
#[derive(Clone, Debug)]
pub struct SectorHamiltonian {
    sector: usize,
    size: usize,
    kernel: Kernel,
}

impl SectorHamiltonian {
    pub fn new<L>(
        hc: &HamiltonianConnection<'_, L>,
        modal: &ModalStructure,
        batched: bool,
    ) -> DiagResult<Self>
    where L: LinkProduct
    {
        let sector = hc.sector();
        let size = hc.lrs().sector_size(sector);
        let kernel
            = if batched {
                let init = InitKron::new(hc, modal)?;
                Kernel::Batched(BatchedGemm::new(&init, true))
            } else {
                Kernel::Sparse(hc.sector_matrix()?)
            };
        Ok(Self { sector, size, kernel })
    }

    pub fn sector(&self) -> usize { self.sector }

    pub fn is_batched(&self) -> bool { matches!(self.kernel, Kernel::Batched(_)) }

    /// `⟨v|H|v⟩` for a single vector.
    pub fn expectation(&self, v: &nd::Array1<C64>) -> DiagResult<C64> {
        let mut hv: nd::Array1<C64> = nd::Array1::zeros(self.size);
        self.matrix_vector_product(&mut hv, v)?;
        Ok(v.iter().zip(hv.iter()).map(|(a, b)| a.conj() * b).sum())
    }
}

impl LinearOperator for SectorHamiltonian {
    fn rows(&self) -> usize { self.size }

    fn matrix_vector_product(&self, out: &mut nd::Array1<C64>, x: &nd::Array1<C64>)
        -> DiagResult<()>
    {
        match &self.kernel {
            Kernel::Batched(gemm) => gemm.matrix_vector(out, x),
            Kernel::Sparse(H) => {
                if x.len() != self.size || out.len() != self.size {
                    return Err(DiagError::Shape(format!(
                        "sector matrix of size {} with vectors of length {} and {}",
                        self.size, x.len(), out.len(),
                    )));
                }
                H.matvec_into(out, x);
                Ok(())
            },
        }
    }

    fn full_matrix(&self) -> DiagResult<nd::Array2<C64>> {
        match &self.kernel {
            Kernel::Sparse(H) => Ok(H.to_dense()),
            Kernel::Batched(gemm) => {
                let n = self.size;
                let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
                let mut e: nd::Array1<C64> = nd::Array1::zeros(n);
                let mut col: nd::Array1<C64> = nd::Array1::zeros(n);
                for j in 0..n {
                    e[j] = C64::one();
                    col.fill(C64::zero());
                    gemm.matrix_vector(&mut col, &e)?;
                    H.column_mut(j).assign(&col);
                    e[j] = C64::zero();
                }
                Ok(H)
            },
        }
    }

    fn diagonal(&self) -> Option<nd::Array1<f64>> {
        match &self.kernel {
            Kernel::Batched(gemm) => gemm.diagonal().ok(),
            Kernel::Sparse(H) => {
                let d: nd::Array1<f64>
                    = (0..self.size)
                    .map(|i| {
                        H.row(i).find(|(j, _)| *j == i)
                            .map(|(_, a)| a.re)
                            .unwrap_or(0.0)
                    })
                    .collect();
                Some(d)
            },
        }
    }
}
