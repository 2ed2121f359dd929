//! Per-sector diagonalization of the superblock Hamiltonian.
//!
//! [`Diagonalization`] picks the sectors to solve, builds the matrix-free
//! Hamiltonian of each one, runs the configured eigensolver (falling back to
//! dense diagonalization when it does not converge) and reports the global
//! ground energy. Two fast paths skip the solve entirely and only reuse the
//! wavefunction-transformed guess.

use itertools::Itertools;
use log::{ debug, info, warn };
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    block::LeftRightSuper,
    checkpoint::Checkpoint,
    config::DiagConfig,
    connection::{ ConnectionCache, HamiltonianConnection },
    error::{ DiagError, DiagResult },
    kron::SectorHamiltonian,
    model::{ Geometry, LinkProduct },
    qn::{ ModalStructure, QuantumLabel },
    reflection::{ Half, ReflectionOperator },
    solver::{
        Eigensolver,
        LinearOperator,
        SolveOutcome,
        SolverStrategy,
        exact_state,
        norm,
    },
};

/* Modes **********************************************************************/

/// Direction of the sweep step being diagonalized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The lattice is still growing.
    Infinite,
    /// Finite sweep over a lattice of fixed size.
    Finite,
}

/// Bit flags controlling what a finite-sweep call may skip.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveOption(pub u32);

impl SaveOption {
    /// Reuse the transformed guess and the previous energy.
    pub const WFT_ONLY_FAST: u32 = 2;
    /// Reuse the transformed guess and compute its energy.
    pub const WFT_ONLY_SLOW: u32 = 4;
    /// Ignore the transformed guess.
    pub const NO_GUESS: u32 = 8;

    pub fn has(self, bit: u32) -> bool { self.0 & bit != 0 }

    /// Resolve the flags into a mode; the two wavefunction-transform-only
    /// flags are mutually exclusive.
    pub fn mode(self, direction: Direction, exact: bool) -> DiagResult<DiagMode> {
        let fast = self.has(Self::WFT_ONLY_FAST);
        let slow = self.has(Self::WFT_ONLY_SLOW);
        if fast && slow {
            return Err(DiagError::Config(
                "fast and slow wavefunction-transform-only options both set".into()));
        }
        if fast && direction == Direction::Finite { return Ok(DiagMode::WftOnlyFast); }
        if slow { return Ok(DiagMode::WftOnlySlow); }
        Ok(if exact { DiagMode::Exact } else { DiagMode::Full })
    }
}

/// What a diagonalization call does with each sector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagMode {
    /// Iterative solve.
    Full,
    /// Keep the guess and the previous energy.
    WftOnlyFast,
    /// Keep the guess and compute its expectation value.
    WftOnlySlow,
    /// Dense diagonalization.
    Exact,
}

/* Collaborators **************************************************************/

/// Supplies starting vectors, typically by transforming the previous step's
/// ground state into the current basis.
pub trait WaveFunctionTransform {
    fn trigger_on(&mut self, _lrs: &LeftRightSuper) { }

    fn trigger_off(&mut self, _lrs: &LeftRightSuper) { }

    /// Starting vector for sector `sector`; `None` (and any vector when
    /// `no_guess` is set) leaves the choice to the eigensolver.
    fn initial_guess(
        &self,
        lrs: &LeftRightSuper,
        sector: usize,
        block: &[usize],
        no_guess: bool,
    ) -> Option<nd::Array1<C64>>;
}

/// Never supplies a guess.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoGuess;

impl WaveFunctionTransform for NoGuess {
    fn initial_guess(&self, _: &LeftRightSuper, _: usize, _: &[usize], _: bool)
        -> Option<nd::Array1<C64>>
    {
        None
    }
}

/* Output *********************************************************************/

/// How a sector's eigenpair was obtained.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Iterative { steps: usize },
    Exact,
    /// Fallback after the iterative solver did not converge.
    Fallback,
    /// Guess kept with the previous energy.
    Reused,
    /// Guess kept with its expectation value.
    Expectation,
    /// Reported for a reflection half that holds no states.
    Empty,
}

/// Eigenpair of one sector.
#[derive(Clone, Debug)]
pub struct SectorState {
    pub sector: usize,
    pub label: QuantumLabel,
    pub energy: f64,
    pub vector: nd::Array1<C64>,
    pub method: Method,
}

/// Result of a diagonalization call.
#[derive(Clone, Debug)]
pub struct DiagOutput {
    /// Lowest energy over all solved sectors.
    pub energy: f64,
    pub states: Vec<SectorState>,
    /// Number of sectors within the degeneracy window of `energy`.
    pub found: usize,
}

impl DiagOutput {
    /// The state attaining the global energy.
    pub fn ground_state(&self) -> Option<&SectorState> {
        self.states.iter()
            .min_by(|a, b| a.energy.total_cmp(&b.energy))
    }
}

/* Driver *********************************************************************/

/// Sector diagonalizer for one sweep.
pub struct Diagonalization<'a, G, L, E = SolverStrategy> {
    config: &'a DiagConfig,
    modal: ModalStructure,
    geometry: &'a G,
    link_product: &'a L,
    solver: E,
    target: QuantumLabel,
    old_energy: f64,
    cache: Option<ConnectionCache>,
    checkpoint: Option<Box<dyn Checkpoint + 'a>>,
}

impl<'a, G, L> Diagonalization<'a, G, L, SolverStrategy>
where
    G: Geometry,
    L: LinkProduct,
{
    /// Create a new driver using the eigensolver named in `config`.
    pub fn new(
        config: &'a DiagConfig,
        geometry: &'a G,
        link_product: &'a L,
        target: QuantumLabel,
    ) -> DiagResult<Self>
    {
        let solver = SolverStrategy::new(config.solver, config.solver_params.clone());
        Self::with_solver(config, geometry, link_product, target, solver)
    }
}

impl<'a, G, L, E> Diagonalization<'a, G, L, E>
where
    G: Geometry,
    L: LinkProduct,
    E: Eigensolver,
{
    /// Create a new driver with an explicit eigensolver.
    pub fn with_solver(
        config: &'a DiagConfig,
        geometry: &'a G,
        link_product: &'a L,
        target: QuantumLabel,
        solver: E,
    ) -> DiagResult<Self>
    {
        config.validate()?;
        let modal = config.modal_structure();
        modal.check(&target)?;
        Ok(Self {
            config,
            modal,
            geometry,
            link_product,
            solver,
            target,
            old_energy: 0.0,
            cache: None,
            checkpoint: None,
        })
    }

    /// Hand every result to `checkpoint`.
    pub fn with_checkpoint<C>(mut self, checkpoint: C) -> Self
    where C: Checkpoint + 'a
    {
        self.checkpoint = Some(Box::new(checkpoint));
        self
    }

    /// Energy of the previous call.
    pub fn old_energy(&self) -> f64 { self.old_energy }

    pub fn set_old_energy(&mut self, energy: f64) { self.old_energy = energy; }

    pub fn target(&self) -> &QuantumLabel { &self.target }

    pub fn modal(&self) -> &ModalStructure { &self.modal }

    /// Diagonalize during infinite growth, with the target scaled to the
    /// current number of sites.
    pub fn infinite<W>(
        &mut self,
        lrs: &LeftRightSuper,
        wft: &mut W,
        time: f64,
    ) -> DiagResult<DiagOutput>
    where W: WaveFunctionTransform
    {
        let target
            = self.target.scaled(
                lrs.super_block().len(),
                self.geometry.num_sites(),
                Direction::Infinite,
                self.config.su2,
            )?;
        let block = lrs.right().sites().to_vec();
        self.run(lrs, wft, Direction::Infinite, &block, SaveOption::default(), time, &target)
    }

    /// Diagonalize during a finite sweep. The target keeps its particle
    /// numbers; SU(2) targets still have their `2j` parity fixed.
    pub fn finite<W>(
        &mut self,
        lrs: &LeftRightSuper,
        wft: &mut W,
        block: &[usize],
        save: SaveOption,
        time: f64,
    ) -> DiagResult<DiagOutput>
    where W: WaveFunctionTransform
    {
        let target
            = self.target.scaled(
                lrs.super_block().len(),
                self.geometry.num_sites(),
                Direction::Finite,
                self.config.su2,
            )?;
        self.run(lrs, wft, Direction::Finite, block, save, time, &target)
    }

    #[allow(clippy::too_many_arguments)]
    fn run<W>(
        &mut self,
        lrs: &LeftRightSuper,
        wft: &mut W,
        direction: Direction,
        block: &[usize],
        save: SaveOption,
        time: f64,
        target: &QuantumLabel,
    ) -> DiagResult<DiagOutput>
    where W: WaveFunctionTransform
    {
        let mode = save.mode(direction, self.config.exact_diag)?;
        let no_guess = save.has(SaveOption::NO_GUESS);

        let candidates: Vec<usize>
            = (0..lrs.num_sectors())
            .filter(|m| {
                self.config.find_symmetry_sector
                    || self.modal.equal(lrs.sector_label(*m), target)
            })
            .collect();
        let weights: usize = candidates.iter().map(|m| lrs.sector_size(*m)).sum();
        if weights == 0 { return Err(DiagError::EmptySector); }
        info!(
            "diagonalizing {} of {} sectors ({} states) in {:?} mode, target {}",
            candidates.len(), lrs.num_sectors(), weights, mode, target,
        );
        debug!("sectors: {}", candidates.iter().join(","));

        if !self.cache.as_ref().is_some_and(|c| c.is_valid_for(lrs, time)) {
            self.cache = Some(ConnectionCache::build(
                lrs,
                self.geometry,
                self.link_product,
                time,
                self.config.prune_tolerance,
            ));
        }

        wft.trigger_on(lrs);
        let states: Vec<SectorState>
            = candidates.iter()
            .map(|m| self.diagonalise_one(lrs, &*wft, *m, block, mode, no_guess))
            .collect::<DiagResult<_>>()?;
        wft.trigger_off(lrs);

        let energy
            = states.iter()
            .map(|s| s.energy)
            .fold(f64::INFINITY, f64::min);
        let (states, found)
            = if self.config.find_symmetry_sector {
                let kept: Vec<SectorState>
                    = states.into_iter()
                    .filter(|s| s.energy - energy <= self.config.degeneracy_max)
                    .collect();
                let found = kept.len();
                (kept, found)
            } else {
                let found = states.len();
                (states, found)
            };
        info!("ground energy {:.15e} ({} sector(s) found)", energy, found);
        self.old_energy = energy;

        let output = DiagOutput { energy, states, found };
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            checkpoint.save(&output)?;
        }
        Ok(output)
    }

    fn diagonalise_one<W>(
        &self,
        lrs: &LeftRightSuper,
        wft: &W,
        m: usize,
        block: &[usize],
        mode: DiagMode,
        no_guess: bool,
    ) -> DiagResult<SectorState>
    where W: WaveFunctionTransform
    {
        let n = lrs.sector_size(m);
        let label = lrs.sector_label(m).clone();

        let guess = wft.initial_guess(lrs, m, block, no_guess);
        if let Some(v) = guess.as_ref() {
            if v.len() != n {
                return Err(DiagError::Shape(format!(
                    "guess of length {} for sector {} of size {}", v.len(), m, n)));
            }
        }
        let supplied = guess.is_some() && !no_guess;
        let guess_norm = guess.as_ref().map(norm).unwrap_or(0.0);
        let guess: Option<nd::Array1<C64>>
            = (!no_guess && guess_norm >= self.config.norm_tolerance)
            .then(|| guess.map(|v| v / C64::from(guess_norm)))
            .flatten();

        let wft_only = matches!(mode, DiagMode::WftOnlyFast | DiagMode::WftOnlySlow);
        if guess.is_none() && wft_only {
            return Err(DiagError::ZeroNormGuess(m));
        }
        if guess.is_none() && supplied {
            warn!("sector {}: initial vector has zero norm; using the solver's default start", m);
        }

        if let (DiagMode::WftOnlyFast, Some(vector)) = (mode, guess.as_ref()) {
            debug!("sector {}: reusing transformed guess and previous energy", m);
            return Ok(SectorState {
                sector: m,
                label,
                energy: self.old_energy,
                vector: vector.clone(),
                method: Method::Reused,
            });
        }

        let cache
            = self.cache.as_ref()
            .ok_or_else(|| DiagError::Config("connection cache missing".into()))?;
        let hc = HamiltonianConnection::new(
            m, lrs, self.link_product, cache, self.config.su2)?;
        let H = SectorHamiltonian::new(&hc, &self.modal, self.config.batched_gemm)?;

        if self.config.debug_matrix {
            let full = H.full_matrix()?;
            let tol = self.config.symmetry_tolerance;
            let hermitian
                = full.indexed_iter()
                .all(|((i, j), a)| (a - full[[j, i]].conj()).norm() <= tol);
            if !hermitian { return Err(DiagError::NotHermitian(m)); }
        }

        if let (DiagMode::WftOnlySlow, Some(vector)) = (mode, guess.as_ref()) {
            if self.config.excited > 0 {
                return Err(DiagError::Config(
                    "the slow wavefunction-transform-only mode needs excited = 0".into()));
            }
            let energy = H.expectation(vector)?.re;
            debug!("sector {}: expectation value of transformed guess {:.15e}", m, energy);
            return Ok(SectorState {
                sector: m,
                label,
                energy,
                vector: vector.clone(),
                method: Method::Expectation,
            });
        }

        let exact = mode == DiagMode::Exact || n <= self.config.exact_threshold;
        let (energy, vector, method)
            = if self.config.reflection {
                self.solve_reflected(&H, lrs, m, guess.as_ref(), exact)?
            } else {
                self.solve(&H, m, guess.as_ref(), exact)?
            };
        debug!("sector {} ({}): energy {:.15e} via {:?}", m, label, energy, method);
        Ok(SectorState { sector: m, label, energy, vector, method })
    }

    fn solve(
        &self,
        op: &dyn LinearOperator,
        m: usize,
        guess: Option<&nd::Array1<C64>>,
        exact: bool,
    ) -> DiagResult<(f64, nd::Array1<C64>, Method)>
    {
        let excited = self.config.excited;
        if exact {
            let (e, v) = exact_state(op, excited)?;
            return Ok((e, v, Method::Exact));
        }
        match self.solver.compute_excited_state(op, guess, excited)? {
            SolveOutcome::Converged { energy, vector, steps } => {
                Ok((energy, vector, Method::Iterative { steps }))
            },
            SolveOutcome::NotConverged { steps, reason } => {
                warn!(
                    "sector {}: eigensolver stopped after {} steps ({}); \
                    falling back to dense diagonalization",
                    m, steps, reason,
                );
                let (e, v) = exact_state(op, excited)?;
                Ok((e, v, Method::Fallback))
            },
            SolveOutcome::FatalConfig(msg) => Err(DiagError::Config(msg)),
        }
    }

    fn solve_reflected(
        &self,
        op: &dyn LinearOperator,
        lrs: &LeftRightSuper,
        m: usize,
        guess: Option<&nd::Array1<C64>>,
        exact: bool,
    ) -> DiagResult<(f64, nd::Array1<C64>, Method)>
    {
        let reflection = ReflectionOperator::new(lrs, m)?;
        reflection.check(op, self.config.symmetry_tolerance)?;
        debug!(
            "sector {}: reflection split {} + {}",
            m, reflection.plus_sector(), reflection.minus_sector(),
        );
        let (g1, g2) = match guess {
            Some(v) => {
                let (g1, g2) = reflection.set_init_state(v);
                (Some(g1), Some(g2))
            },
            None => (None, None),
        };
        let solve_half = |half: Half, g: Option<nd::Array1<C64>>|
            -> DiagResult<(f64, nd::Array1<C64>, Method)>
        {
            let restricted = reflection.half(op, half);
            if restricted.rows() == 0 {
                warn!(
                    "sector {}: {:?} half of the reflection split is empty; \
                    reporting a placeholder energy",
                    m, half,
                );
                return Ok(
                    (self.config.placeholder_energy, nd::Array1::zeros(0), Method::Empty));
            }
            let g = g.filter(|g| norm(g) >= self.config.norm_tolerance);
            self.solve(&restricted, m, g.as_ref(), exact)
        };
        let (e1, v1, method1) = solve_half(Half::Plus, g1)?;
        let (e2, v2, method2) = solve_half(Half::Minus, g2)?;
        match (method1, method2) {
            (method1, Method::Empty) => {
                Ok((e1, reflection.embed(&v1, Half::Plus), method1))
            },
            (Method::Empty, method2) => {
                Ok((e2, reflection.embed(&v2, Half::Minus), method2))
            },
            (method1, method2) => {
                let (energy, vector) = reflection.set_ground_state(e1, &v1, e2, &v2);
                Ok((energy, vector, if e1 <= e2 { method1 } else { method2 }))
            },
        }
    }
}
