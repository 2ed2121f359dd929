//! Left and right blocks of a superblock, with their symmetry partitions,
//! block Hamiltonians and reduced site operators.
//!
//! All matrices held by a [`Block`] are stored in the block's grouped
//! (sector-sorted) order; constructors take them in natural order and
//! permute them once.

use indexmap::IndexMap;
use itertools::Itertools;
use crate::{
    error::{ DiagError, DiagResult },
    qn::{ ModalStructure, Partition, QuantumLabel },
    sparse::CsrMatrix,
};

/// Which side of the superblock an operator lives on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    Environ,
}

impl Role {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::System => Self::Environ,
            Self::Environ => Self::System,
        }
    }
}

/// How a stored operator is to be applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// As stored.
    N,
    /// Conjugate transpose.
    C,
}

/// Anything that can hand out reduced site operators.
///
/// The returned reference lives as long as the source itself.
pub trait OperatorSource {
    fn reduced_operator(
        &self,
        modifier: Modifier,
        site: usize,
        op: usize,
        role: Role,
    ) -> Option<&CsrMatrix>;
}

/* Block **********************************************************************/

/// A renormalized block of lattice sites.
#[derive(Clone, Debug)]
pub struct Block {
    sites: Vec<usize>,
    partition: Partition,
    odd: Vec<bool>,
    hamiltonian: CsrMatrix,
    operators: IndexMap<(usize, usize), [CsrMatrix; 2]>,
}

impl Block {
    /// Create a new block from per-state labels and the block Hamiltonian,
    /// both in natural order.
    pub fn new(
        sites: Vec<usize>,
        labels: &[QuantumLabel],
        hamiltonian: &CsrMatrix,
        modal: &ModalStructure,
    ) -> DiagResult<Self>
    {
        if sites.is_empty() {
            return Err(DiagError::Config("a block must hold at least one site".into()));
        }
        labels.iter().try_for_each(|q| modal.check(q))?;
        if hamiltonian.shape() != (labels.len(), labels.len()) {
            return Err(DiagError::Shape(format!(
                "block Hamiltonian of shape {:?} for {} states",
                hamiltonian.shape(), labels.len(),
            )));
        }
        let partition = modal.partition(labels)?;
        let odd: Vec<bool>
            = partition.permutation().iter()
            .map(|i| labels[*i].is_odd())
            .collect();
        let hamiltonian = hamiltonian.permuted(partition.permutation())?;
        Ok(Self { sites, partition, odd, hamiltonian, operators: IndexMap::new() })
    }

    /// Attach operator `op` of block-local site `site`, given in natural
    /// order.
    pub fn insert_operator(&mut self, site: usize, op: usize, matrix: &CsrMatrix)
        -> DiagResult<()>
    {
        if site >= self.sites.len() {
            return Err(DiagError::UnresolvedSite(site));
        }
        if matrix.shape() != (self.size(), self.size()) {
            return Err(DiagError::Shape(format!(
                "operator of shape {:?} for a block of {} states",
                matrix.shape(), self.size(),
            )));
        }
        let grouped = matrix.permuted(self.partition.permutation())?;
        let dagger = grouped.dagger();
        self.operators.insert((site, op), [grouped, dagger]);
        Ok(())
    }

    /// Builder-style [`Self::insert_operator`].
    pub fn with_operator(mut self, site: usize, op: usize, matrix: &CsrMatrix)
        -> DiagResult<Self>
    {
        self.insert_operator(site, op, matrix)?;
        Ok(self)
    }

    /// Lattice sites covered by the block.
    pub fn sites(&self) -> &[usize] { &self.sites }

    /// Number of block states.
    pub fn size(&self) -> usize { self.odd.len() }

    pub fn partition(&self) -> &Partition { &self.partition }

    /// Label of the state at grouped position `x`.
    pub fn label(&self, x: usize) -> &QuantumLabel {
        self.partition.label(self.partition.group_of(x))
    }

    /// `-1` if `fermionic` and state `x` holds an odd number of particles,
    /// `+1` otherwise.
    pub fn fermionic_sign(&self, x: usize, fermionic: bool) -> f64 {
        if fermionic && self.odd[x] { -1.0 } else { 1.0 }
    }

    /// Block Hamiltonian in grouped order.
    pub fn hamiltonian(&self) -> &CsrMatrix { &self.hamiltonian }

    /// Operator `op` of block-local site `site` in grouped order.
    pub fn operator(&self, modifier: Modifier, site: usize, op: usize)
        -> Option<&CsrMatrix>
    {
        self.operators.get(&(site, op))
            .map(|[o, d]| match modifier { Modifier::N => o, Modifier::C => d })
    }
}

/* Superblock *****************************************************************/

/// A left (system) and right (environ) block together with the symmetry
/// partition of their product basis.
///
/// The product state of left state `x` and right state `y` (both in grouped
/// order) has natural index `x + y * left.size()`; the superblock partition
/// is taken over these natural indices.
#[derive(Clone, Debug)]
pub struct LeftRightSuper {
    left: Block,
    right: Block,
    super_block: Vec<usize>,
    partition: Partition,
}

impl LeftRightSuper {
    pub fn new(left: Block, right: Block, modal: &ModalStructure)
        -> DiagResult<Self>
    {
        if let Some(s) = left.sites().iter().find(|s| right.sites().contains(s)) {
            return Err(DiagError::Config(
                format!("site {} belongs to both blocks", s)));
        }
        let nl = left.size();
        let labels: Vec<QuantumLabel>
            = (0..right.size()).cartesian_product(0..nl)
            .map(|(y, x)| modal.combine(left.label(x), right.label(y)))
            .collect();
        let partition = modal.partition(&labels)?;
        let super_block: Vec<usize>
            = left.sites().iter().chain(right.sites()).copied().collect();
        Ok(Self { left, right, super_block, partition })
    }

    pub fn left(&self) -> &Block { &self.left }

    pub fn right(&self) -> &Block { &self.right }

    /// Lattice sites of the superblock: left sites followed by right sites.
    pub fn super_block(&self) -> &[usize] { &self.super_block }

    /// Partition of the product basis into sectors.
    pub fn partition(&self) -> &Partition { &self.partition }

    /// Dimension of the product basis.
    pub fn size(&self) -> usize { self.partition.len() }

    pub fn num_sectors(&self) -> usize { self.partition.num_groups() }

    /// Number of states in sector `m`.
    pub fn sector_size(&self, m: usize) -> usize { self.partition.size(m) }

    pub fn sector_label(&self, m: usize) -> &QuantumLabel { self.partition.label(m) }

    /// Natural index of the product state `(x, y)`.
    pub fn pack(&self, x: usize, y: usize) -> usize { x + y * self.left.size() }

    /// Left and right grouped positions of natural index `i`.
    pub fn unpack(&self, i: usize) -> (usize, usize) {
        (i % self.left.size(), i / self.left.size())
    }

    /// Natural index of the `k`-th state of sector `m`.
    pub fn sector_state(&self, m: usize, k: usize) -> usize {
        self.partition.permutation()[self.partition.offsets()[m] + k]
    }
}

impl OperatorSource for LeftRightSuper {
    fn reduced_operator(
        &self,
        modifier: Modifier,
        site: usize,
        op: usize,
        role: Role,
    ) -> Option<&CsrMatrix>
    {
        match role {
            Role::System => self.left.operator(modifier, site, op),
            Role::Environ => self.right.operator(modifier, site, op),
        }
    }
}
