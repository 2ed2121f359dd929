//! Interfaces to the lattice geometry and the model's term catalog.

use num_complex::Complex64 as C64;
use crate::block::Modifier;

/// Whether the two operators of a link anticommute across blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Particle {
    Fermion,
    Boson,
}

/// Orientation of a two-site connection relative to the blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// First site in the system (left) block, second in the environ block.
    SystemEnviron,
    /// First site in the environ block, second in the system block.
    EnvironSystem,
}

/// Extra per-connection data passed from the geometry to the link product,
/// e.g. orbital or sublattice indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdditionalData {
    pub kind: usize,
    pub values: Vec<usize>,
}

/// Lattice geometry: which sites couple and how strongly.
pub trait Geometry {
    /// Number of lattice sites.
    fn num_sites(&self) -> usize;

    /// Number of Hamiltonian terms (hopping, interaction, ...).
    fn terms(&self) -> usize;

    /// `true` if term `term` couples `i` to `j`, in that order.
    fn connected(&self, term: usize, i: usize, j: usize) -> bool;

    /// Site tuples on which `term` acts across the two blocks.
    ///
    /// Defaults to every ordered pair with one site in each block for which
    /// [`Self::connected`] holds.
    fn items(&self, term: usize, system: &[usize], environ: &[usize])
        -> Vec<Vec<usize>>
    {
        let mut items: Vec<Vec<usize>> = Vec::new();
        for &i in system.iter() {
            for &j in environ.iter() {
                if self.connected(term, i, j) { items.push(vec![i, j]); }
                if self.connected(term, j, i) { items.push(vec![j, i]); }
            }
        }
        items
    }

    /// Coupling value of `term` on the ordered site pair `item`, with
    /// connector degrees of freedom `edofs`.
    fn coupling(&self, term: usize, item: &[usize], edofs: &[usize]) -> C64;

    /// Time dependence applied to a coupling.
    fn time_modifier(&self, _term: usize, value: C64, _time: f64) -> C64 { value }

    /// Extra data for `term` on `item`.
    fn additional_data(&self, _term: usize, _item: &[usize]) -> AdditionalData {
        AdditionalData::default()
    }
}

/// Operator data for one degree of freedom of one term.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkData {
    pub particle: Particle,
    /// Operator indices on the first and second site.
    pub ops: (usize, usize),
    pub mods: (Modifier, Modifier),
    pub angular_momentum: u32,
    pub angular_factor: f64,
    pub category: usize,
}

impl LinkData {
    /// Bosonic link between `ops`, with the default `('N', 'C')` modifiers.
    pub fn boson(ops: (usize, usize)) -> Self {
        Self {
            particle: Particle::Boson,
            ops,
            mods: (Modifier::N, Modifier::C),
            angular_momentum: 0,
            angular_factor: 1.0,
            category: 0,
        }
    }

    /// Fermionic link between `ops`, with the default `('N', 'C')`
    /// modifiers.
    pub fn fermion(ops: (usize, usize)) -> Self {
        Self { particle: Particle::Fermion, ..Self::boson(ops) }
    }

    /// Replace the modifiers.
    pub fn with_mods(mut self, mods: (Modifier, Modifier)) -> Self {
        self.mods = mods;
        self
    }
}

/// Catalog of the operator products making up each term.
pub trait LinkProduct {
    /// Number of degrees of freedom of `term`.
    fn dofs(&self, term: usize, data: &AdditionalData) -> usize;

    /// Connector degrees of freedom passed to [`Geometry::coupling`].
    fn connector_dofs(&self, _term: usize, dof: usize, _data: &AdditionalData)
        -> Vec<usize>
    {
        vec![dof, dof]
    }

    /// Operators and modifiers of `dof` of `term`.
    fn link_data(&self, term: usize, dof: usize, su2: bool, data: &AdditionalData)
        -> LinkData;

    /// Final adjustment of a coupling value.
    fn value_modifier(
        &self,
        _value: &mut C64,
        _term: usize,
        _dof: usize,
        _su2: bool,
        _data: &AdditionalData,
    ) { }
}
