//! Cached inter-block connections and their Kronecker operator pairs.
//!
//! A [`ConnectionCache`] enumerates, once per pair of blocks, every
//! (site tuple, term, degree of freedom) whose coupling survives pruning.
//! [`HamiltonianConnection`] turns cached records into [`Link`]s and fetches
//! the reduced operators each one needs.

use log::debug;
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    block::{ LeftRightSuper, Modifier, OperatorSource, Role },
    error::{ DiagError, DiagResult },
    model::{ AdditionalData, ConnectionKind, Geometry, LinkProduct, Particle },
    sparse::CsrMatrix,
};

/* Cache **********************************************************************/

/// A surviving term of the inter-block Hamiltonian.
#[derive(Clone, Debug, PartialEq)]
pub struct Connection {
    /// Index into [`ConnectionCache::items`].
    pub item: usize,
    pub kind: ConnectionKind,
    pub term: usize,
    pub dof: usize,
    /// Coupling value after the time modifier.
    pub value: C64,
    pub data: AdditionalData,
}

/// Every connection between a given pair of blocks.
#[derive(Clone, Debug)]
pub struct ConnectionCache {
    left: Vec<usize>,
    right: Vec<usize>,
    time: f64,
    items: Vec<Vec<usize>>,
    connections: Vec<Connection>,
    index: HashMap<(usize, usize, usize), usize>,
}

impl ConnectionCache {
    /// Enumerate the connections between the two blocks of `lrs`.
    ///
    /// Couplings with modulus at or below `prune_tolerance` are skipped.
    pub fn build<G, L>(
        lrs: &LeftRightSuper,
        geometry: &G,
        link_product: &L,
        time: f64,
        prune_tolerance: f64,
    ) -> Self
    where
        G: Geometry,
        L: LinkProduct,
    {
        let system = lrs.left().sites();
        let environ = lrs.right().sites();
        let mut items: Vec<Vec<usize>> = Vec::new();
        let mut item_index: HashMap<Vec<usize>, usize> = HashMap::default();
        let mut connections: Vec<Connection> = Vec::new();
        let mut index: HashMap<(usize, usize, usize), usize> = HashMap::default();
        let mut pruned: usize = 0;
        for term in 0..geometry.terms() {
            for item in geometry.items(term, system, environ).into_iter() {
                let data = geometry.additional_data(term, &item);
                let kind
                    = if item.first().is_some_and(|s| system.contains(s)) {
                        ConnectionKind::SystemEnviron
                    } else {
                        ConnectionKind::EnvironSystem
                    };
                let n_items = items.len();
                let item_ix
                    = *item_index.entry(item.clone()).or_insert(n_items);
                if item_ix == n_items { items.push(item.clone()); }
                for dof in 0..link_product.dofs(term, &data) {
                    let edofs = link_product.connector_dofs(term, dof, &data);
                    let value = geometry.coupling(term, &item, &edofs);
                    if value.norm() <= prune_tolerance {
                        pruned += 1;
                        continue;
                    }
                    let value = geometry.time_modifier(term, value, time);
                    if index.contains_key(&(item_ix, term, dof)) { continue; }
                    index.insert((item_ix, term, dof), connections.len());
                    connections.push(
                        Connection { item: item_ix, kind, term, dof, value, data: data.clone() }
                    );
                }
            }
        }
        debug!(
            "cached {} connections on {} items ({} pruned)",
            connections.len(), items.len(), pruned,
        );
        Self {
            left: system.to_vec(),
            right: environ.to_vec(),
            time,
            items,
            connections,
            index,
        }
    }

    /// `true` if the cache was built for the same blocks at the same time.
    pub fn is_valid_for(&self, lrs: &LeftRightSuper, time: f64) -> bool {
        self.matches_blocks(lrs) && self.time == time
    }

    fn matches_blocks(&self, lrs: &LeftRightSuper) -> bool {
        self.left == lrs.left().sites() && self.right == lrs.right().sites()
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize { self.connections.len() }

    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    pub fn get(&self, ix: usize) -> Option<&Connection> { self.connections.get(ix) }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection> { self.connections.iter() }

    /// Distinct site tuples with at least one connection attempt.
    pub fn items(&self) -> &[Vec<usize>] { &self.items }

    /// Index of the connection for `(item, term, dof)`, if it survived
    /// pruning.
    pub fn find(&self, item: usize, term: usize, dof: usize) -> Option<usize> {
        self.index.get(&(item, term, dof)).copied()
    }
}

/* Links **********************************************************************/

/// Everything needed to apply one connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    /// Superblock position of the first site.
    pub site1: usize,
    /// Superblock position of the second site.
    pub site2: usize,
    pub kind: ConnectionKind,
    pub value: C64,
    pub dof: usize,
    pub particle: Particle,
    pub ops: (usize, usize),
    pub mods: (Modifier, Modifier),
    pub angular_momentum: u32,
    pub angular_factor: f64,
    pub category: usize,
}

/// A connection oriented as `value · L ⊗ R` on (left, right) states.
#[derive(Copy, Clone, Debug)]
pub struct KronTerm<'a> {
    pub value: C64,
    /// Apply the left-state fermionic sign.
    pub fermionic: bool,
    pub left: &'a CsrMatrix,
    pub right: &'a CsrMatrix,
}

/// Builder of the Kronecker operator pairs for one sector.
pub struct HamiltonianConnection<'a, L> {
    sector: usize,
    lrs: &'a LeftRightSuper,
    link_product: &'a L,
    cache: &'a ConnectionCache,
    su2: bool,
}

impl<'a, L> HamiltonianConnection<'a, L>
where L: LinkProduct
{
    /// Create a new builder; `cache` must have been built for the blocks of
    /// `lrs`.
    pub fn new(
        sector: usize,
        lrs: &'a LeftRightSuper,
        link_product: &'a L,
        cache: &'a ConnectionCache,
        su2: bool,
    ) -> DiagResult<Self>
    {
        if sector >= lrs.num_sectors() {
            return Err(DiagError::Config(format!(
                "sector {} out of range for {} sectors", sector, lrs.num_sectors(),
            )));
        }
        if !cache.matches_blocks(lrs) {
            return Err(DiagError::Config(
                "connection cache was built for a different pair of blocks".into()));
        }
        debug!(
            "sector {}: {} connections, parallelism limit {}",
            sector, cache.len(), cache.len() + 2,
        );
        Ok(Self { sector, lrs, link_product, cache, su2 })
    }

    pub fn sector(&self) -> usize { self.sector }

    pub fn lrs(&self) -> &'a LeftRightSuper { self.lrs }

    /// Number of connections.
    pub fn tasks(&self) -> usize { self.cache.len() }

    fn resolve(&self, site: usize) -> DiagResult<usize> {
        self.lrs.super_block().iter().position(|s| *s == site)
            .ok_or(DiagError::UnresolvedSite(site))
    }

    fn fetch(&self, modifier: Modifier, site: usize, op: usize, role: Role)
        -> DiagResult<&'a CsrMatrix>
    {
        let matrix
            = self.lrs.reduced_operator(modifier, site, op, role)
            .ok_or(DiagError::MissingOperator { site, op })?;
        if matrix.nrows == 0 || matrix.ncols == 0 || !matrix.is_valid() {
            return Err(DiagError::DegenerateOperator { site, op });
        }
        Ok(matrix)
    }

    /// Link descriptor and the two reduced operators of connection `ix`.
    ///
    /// `A` acts on the block holding the first site of the item, `B` on the
    /// other block.
    pub fn get_kron(&self, ix: usize)
        -> DiagResult<(Link, &'a CsrMatrix, &'a CsrMatrix)>
    {
        let conn
            = self.cache.get(ix)
            .ok_or_else(|| DiagError::Config(
                format!("connection {} out of range", ix)))?;
        let item = &self.cache.items()[conn.item];
        if item.len() != 2 {
            return Err(DiagError::MultiSiteConnection(item.len()));
        }
        let i = self.resolve(item[0])?;
        let j = self.resolve(item[1])?;
        let data
            = self.link_product.link_data(conn.term, conn.dof, self.su2, &conn.data);
        let mut value = conn.value;
        self.link_product.value_modifier(
            &mut value, conn.term, conn.dof, self.su2, &conn.data);

        let offset = self.lrs.left().sites().len();
        let (site1, role1, site2, role2)
            = match conn.kind {
                ConnectionKind::SystemEnviron => {
                    if i >= offset || j < offset {
                        return Err(DiagError::UnresolvedSite(item[0]));
                    }
                    (i, Role::System, j - offset, Role::Environ)
                },
                ConnectionKind::EnvironSystem => {
                    if i < offset || j >= offset {
                        return Err(DiagError::UnresolvedSite(item[0]));
                    }
                    (i - offset, Role::Environ, j, Role::System)
                },
            };
        let A = self.fetch(data.mods.0, site1, data.ops.0, role1)?;
        let B = self.fetch(data.mods.1, site2, data.ops.1, role2)?;
        let link = Link {
            site1: i,
            site2: j,
            kind: conn.kind,
            value,
            dof: conn.dof,
            particle: data.particle,
            ops: data.ops,
            mods: data.mods,
            angular_momentum: data.angular_momentum,
            angular_factor: data.angular_factor,
            category: data.category,
        };
        Ok((link, A, B))
    }

    /// Connection `ix` oriented onto (left, right) block states.
    ///
    /// Swapping two fermionic operators for an environ-system link
    /// contributes a factor of `-1`.
    pub fn kron_term(&self, ix: usize) -> DiagResult<KronTerm<'a>> {
        let (link, A, B) = self.get_kron(ix)?;
        let fermionic = link.particle == Particle::Fermion;
        let term
            = match link.kind {
                ConnectionKind::SystemEnviron => KronTerm {
                    value: link.value,
                    fermionic,
                    left: A,
                    right: B,
                },
                ConnectionKind::EnvironSystem => KronTerm {
                    value: if fermionic { -link.value } else { link.value },
                    fermionic,
                    left: B,
                    right: A,
                },
            };
        Ok(term)
    }

    /// All connections as [`KronTerm`]s.
    pub fn kron_terms(&self) -> DiagResult<Vec<KronTerm<'a>>> {
        (0..self.tasks()).map(|ix| self.kron_term(ix)).collect()
    }

    /// The full sector Hamiltonian, `H_L ⊗ 1 + 1 ⊗ H_R + Σ_k v_k L_k ⊗ R_k`,
    /// as a sparse matrix in sector-local indices.
    pub fn sector_matrix(&self) -> DiagResult<CsrMatrix> {
        let lrs = self.lrs;
        let m = self.sector;
        let n = lrs.sector_size(m);
        let range = lrs.partition().range(m);
        let inverse = lrs.partition().inverse();
        let local = |x: usize, y: usize| -> Option<usize> {
            let pos = inverse[lrs.pack(x, y)];
            range.contains(&pos).then(|| pos - range.start)
        };
        let terms = self.kron_terms()?;
        let H_L = lrs.left().hamiltonian();
        let H_R = lrs.right().hamiltonian();
        let mut triplets: Vec<(usize, usize, C64)> = Vec::new();
        let mut dropped: usize = 0;
        for k in 0..n {
            let (xp, yp) = lrs.unpack(lrs.sector_state(m, k));
            for (x, a) in H_L.row(xp) {
                match local(x, yp) {
                    Some(col) => { triplets.push((k, col, a)); },
                    None => { dropped += 1; },
                }
            }
            for (y, b) in H_R.row(yp) {
                match local(xp, y) {
                    Some(col) => { triplets.push((k, col, b)); },
                    None => { dropped += 1; },
                }
            }
            for term in terms.iter() {
                for (x, a) in term.left.row(xp) {
                    let sign = lrs.left().fermionic_sign(x, term.fermionic);
                    for (y, b) in term.right.row(yp) {
                        match local(x, y) {
                            Some(col) => {
                                triplets.push((k, col, term.value * a * b * sign));
                            },
                            None => { dropped += 1; },
                        }
                    }
                }
            }
        }
        if dropped > 0 {
            debug!("sector {}: dropped {} elements leaving the sector", m, dropped);
        }
        CsrMatrix::from_triplets(n, n, triplets)
    }
}
