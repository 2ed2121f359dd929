//! Symmetry labels of block states and the routine that groups a basis into
//! symmetry sectors.
//!
//! A [`QuantumLabel`] carries a particle count, a list of auxiliary
//! conserved quantities, an angular momentum pair and a flavor tag. How the
//! auxiliary components combine and compare is decided by a
//! [`ModalStructure`], which is built once per run and passed by reference to
//! every label operation.

use std::{ fmt, ops::Range };
use serde::{ Deserialize, Serialize };
use crate::{
    diag::Direction,
    error::{ DiagError, DiagResult },
};

/* Labels *********************************************************************/

/// Combination policy of a single auxiliary label component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modal {
    /// Components add as ordinary integers.
    Sum,
    /// Components add modulo `K`; a modulus of zero behaves like `Sum`.
    Modulo(u32),
}

impl Modal {
    fn reduce(self, x: u32) -> u32 {
        match self {
            Self::Modulo(k) if k > 0 => x % k,
            _ => x,
        }
    }

    fn equal(self, a: u32, b: u32) -> bool {
        match self {
            Self::Modulo(k) if k > 0 => a.abs_diff(b) % k == 0,
            _ => a == b,
        }
    }
}

/// Symmetry label of a block or superblock state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuantumLabel {
    pub particles: u32,
    pub aux: Vec<u32>,
    /// Twice the total angular momentum and the projection index.
    pub jm: (u32, u32),
    pub flavor: u32,
}

impl QuantumLabel {
    /// Create a label with zero angular momentum and flavor.
    pub fn new(particles: u32, aux: Vec<u32>) -> Self {
        Self { particles, aux, jm: (0, 0), flavor: 0 }
    }

    /// Set the angular momentum pair.
    pub fn with_jm(mut self, jm: (u32, u32)) -> Self {
        self.jm = jm;
        self
    }

    /// Set the flavor tag.
    pub fn with_flavor(mut self, flavor: u32) -> Self {
        self.flavor = flavor;
        self
    }

    /// `true` if the particle count is odd.
    pub fn is_odd(&self) -> bool { self.particles % 2 == 1 }

    /// Scale a target label to a lattice of `sites` out of `total_sites`
    /// sites, as needed while the lattice is still growing.
    ///
    /// Only [`Direction::Infinite`] scales; quantities are truncated by
    /// integer division. SU(2) labels carry exactly one auxiliary component,
    /// and in every direction `2j` is bumped by one when its parity differs
    /// from the parity of the unscaled particle count. The bump is an error
    /// once the lattice is complete.
    pub fn scaled(
        &self,
        sites: usize,
        total_sites: usize,
        direction: Direction,
        su2: bool,
    ) -> DiagResult<Self>
    {
        if su2 && self.aux.len() != 1 {
            return Err(DiagError::AuxWidth { found: self.aux.len(), expected: 1 });
        }
        let mut scaled = self.clone();
        if direction == Direction::Infinite {
            if total_sites == 0 || sites > total_sites {
                return Err(DiagError::Config(
                    format!("cannot scale a label to {} of {} sites", sites, total_sites)
                ));
            }
            let scale = |x: u32| -> u32 {
                ((x as u64 * sites as u64) / total_sites as u64) as u32
            };
            scaled.particles = scale(self.particles);
            scaled.aux.iter_mut().for_each(|x| { *x = scale(*x); });
            scaled.jm.0 = scale(self.jm.0);
        }
        if !su2 || self.particles % 2 == scaled.jm.0 % 2 {
            return Ok(scaled);
        }
        if sites == total_sites {
            return Err(DiagError::Config(
                "particle number and 2j have different parities on the full lattice".into()
            ));
        }
        scaled.jm.0 += 1;
        Ok(scaled)
    }
}

impl fmt::Display for QuantumLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={} aux=[", self.particles)?;
        let n = self.aux.len();
        for (k, x) in self.aux.iter().enumerate() {
            write!(f, "{}{}", x, if k + 1 < n { "," } else { "" })?;
        }
        write!(f, "] jm=({},{}) flavor={}", self.jm.0, self.jm.1, self.flavor)
    }
}

/* Modal structure ************************************************************/

/// Per-component combination policy for the auxiliary part of labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModalStructure(Vec<Modal>);

impl From<Vec<Modal>> for ModalStructure {
    fn from(modal: Vec<Modal>) -> Self { Self(modal) }
}

impl ModalStructure {
    pub fn new(modal: Vec<Modal>) -> Self { Self(modal) }

    /// Number of auxiliary components.
    pub fn width(&self) -> usize { self.0.len() }

    /// Policy of the `k`-th auxiliary component; components past the
    /// configured width are summed.
    pub fn get(&self, k: usize) -> Modal {
        self.0.get(k).copied().unwrap_or(Modal::Sum)
    }

    /// Check that a label has the configured auxiliary width.
    pub fn check(&self, label: &QuantumLabel) -> DiagResult<()> {
        (label.aux.len() == self.width()).then_some(())
            .ok_or(DiagError::AuxWidth {
                found: label.aux.len(),
                expected: self.width(),
            })
    }

    /// Combine the labels of two states into the label of their product
    /// state.
    ///
    /// The flavor is taken from `a`.
    pub fn combine(&self, a: &QuantumLabel, b: &QuantumLabel) -> QuantumLabel {
        let aux: Vec<u32>
            = a.aux.iter().zip(&b.aux).enumerate()
            .map(|(k, (x, y))| self.get(k).reduce(x + y))
            .collect();
        QuantumLabel {
            particles: a.particles + b.particles,
            aux,
            jm: (a.jm.0 + b.jm.0, a.jm.1 + b.jm.1),
            flavor: a.flavor,
        }
    }

    /// Equality under the configured policy.
    pub fn equal(&self, a: &QuantumLabel, b: &QuantumLabel) -> bool {
        a.particles == b.particles
            && a.flavor == b.flavor
            && a.jm == b.jm
            && a.aux.len() == b.aux.len()
            && a.aux.iter().zip(&b.aux).enumerate()
                .all(|(k, (x, y))| self.get(k).equal(*x, *y))
    }

    /// Decode labels from a flattened integer record list.
    ///
    /// Each record holds `width + 1` integers. With no auxiliary components a
    /// record is just the particle count; otherwise the layout is
    /// `[aux[0], particles, aux[1], aux[2], ...]`.
    pub fn decode(&self, ints: &[u32]) -> DiagResult<Vec<QuantumLabel>> {
        let width = self.width();
        let rec = width + 1;
        if ints.is_empty() || ints.len() % rec != 0 {
            return Err(DiagError::LabelWidth { len: ints.len(), width: rec });
        }
        let labels: Vec<QuantumLabel>
            = ints.chunks_exact(rec)
            .map(|r| {
                if width == 0 { return QuantumLabel::new(r[0], Vec::new()); }
                let aux: Vec<u32>
                    = (0..width)
                    .map(|j| r[if j == 0 { 0 } else { j + 1 }])
                    .collect();
                QuantumLabel::new(r[1], aux)
            })
            .collect();
        Ok(labels)
    }

    /// Group `labels` into sectors of mutually equal labels.
    ///
    /// Groups appear in order of first occurrence and the order of states
    /// within each group is the order of `labels`.
    pub fn partition(&self, labels: &[QuantumLabel]) -> DiagResult<Partition> {
        if labels.is_empty() { return Err(DiagError::EmptyPartition); }
        let n = labels.len();

        // first pass: distinct representatives and group sizes
        let mut reps: Vec<QuantumLabel> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut group_of: Vec<usize> = Vec::with_capacity(n);
        for q in labels.iter() {
            match reps.iter().position(|r| self.equal(r, q)) {
                Some(g) => {
                    counts[g] += 1;
                    group_of.push(g);
                },
                None => {
                    reps.push(q.clone());
                    counts.push(1);
                    group_of.push(reps.len() - 1);
                },
            }
        }

        // second pass: prefix sums and stable scatter
        let mut offsets: Vec<usize> = Vec::with_capacity(reps.len() + 1);
        offsets.push(0);
        let mut acc: usize = 0;
        for c in counts.iter() {
            acc += c;
            offsets.push(acc);
        }
        let mut cursor: Vec<usize> = offsets[..reps.len()].to_vec();
        let mut permutation: Vec<usize> = vec![0; n];
        let mut inverse: Vec<usize> = vec![0; n];
        for (i, g) in group_of.into_iter().enumerate() {
            let pos = cursor[g];
            cursor[g] += 1;
            permutation[pos] = i;
            inverse[i] = pos;
        }
        Ok(Partition { offsets, labels: reps, permutation, inverse })
    }
}

/* Partition ******************************************************************/

/// Grouping of a basis into symmetry sectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    offsets: Vec<usize>,
    labels: Vec<QuantumLabel>,
    permutation: Vec<usize>,
    inverse: Vec<usize>,
}

impl Partition {
    /// Total number of states.
    pub fn len(&self) -> usize { self.permutation.len() }

    pub fn is_empty(&self) -> bool { self.permutation.is_empty() }

    /// Number of groups.
    pub fn num_groups(&self) -> usize { self.labels.len() }

    /// Group boundaries; `offsets()[g]..offsets()[g + 1]` is group `g`.
    pub fn offsets(&self) -> &[usize] { &self.offsets }

    /// Representative labels, one per group.
    pub fn labels(&self) -> &[QuantumLabel] { &self.labels }

    pub fn label(&self, g: usize) -> &QuantumLabel { &self.labels[g] }

    /// Grouped positions belonging to group `g`.
    pub fn range(&self, g: usize) -> Range<usize> {
        self.offsets[g]..self.offsets[g + 1]
    }

    /// Size of group `g`.
    pub fn size(&self, g: usize) -> usize {
        self.offsets[g + 1] - self.offsets[g]
    }

    /// Grouped position -> original index.
    pub fn permutation(&self) -> &[usize] { &self.permutation }

    /// Original index -> grouped position.
    pub fn inverse(&self) -> &[usize] { &self.inverse }

    /// Group containing grouped position `pos`.
    pub fn group_of(&self, pos: usize) -> usize {
        self.offsets.partition_point(|off| *off <= pos) - 1
    }

    /// Label of every state, in grouped order.
    pub fn grouped_labels(&self) -> Vec<QuantumLabel> {
        (0..self.num_groups())
            .flat_map(|g| std::iter::repeat(&self.labels[g]).take(self.size(g)))
            .cloned()
            .collect()
    }

    /// Reorder a payload given in original order into grouped order.
    pub fn scatter<T>(&self, payload: &[T]) -> DiagResult<Vec<T>>
    where T: Clone
    {
        if payload.len() != self.len() {
            return Err(DiagError::Shape(format!(
                "payload of length {} for a partition of {} states",
                payload.len(), self.len(),
            )));
        }
        Ok(self.permutation.iter().map(|i| payload[*i].clone()).collect())
    }
}
