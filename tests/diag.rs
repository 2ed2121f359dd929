#![allow(non_snake_case)]

mod common;

use ndarray as nd;
use ndarray_npy::read_npy;
use num_complex::Complex64 as C64;
use superblock_diag::{
    block::{ Block, LeftRightSuper },
    checkpoint::NpyCheckpoint,
    config::{ DiagConfig, SolverKind },
    diag::{
        DiagMode,
        DiagOutput,
        Diagonalization,
        Direction,
        Method,
        NoGuess,
        SaveOption,
        WaveFunctionTransform,
    },
    error::{ DiagError, DiagResult },
    model::{ AdditionalData, Geometry, LinkData, LinkProduct },
    qn::{ ModalStructure, QuantumLabel },
    reflection::ReflectionOperator,
    solver::{ Eigensolver, LinearOperator, SolveOutcome, norm },
    sparse::CsrMatrix,
};
use common::*;

fn half_filled() -> QuantumLabel { QuantumLabel::new(2, vec![]) }

fn reference_energy() -> f64 { lowest(chain_hamiltonian(4, 1.0)) }

fn run_finite(config: &DiagConfig, lrs: &LeftRightSuper) -> DiagResult<DiagOutput> {
    let geometry = Chain { sites: 4, J: 1.0 };
    let mut diag = Diagonalization::new(config, &geometry, &Heisenberg, half_filled())?;
    diag.finite(lrs, &mut NoGuess, lrs.right().sites(), SaveOption::default(), 0.0)
}

/// Supplies a fixed vector, or a constant one, for every sector.
struct Supplied {
    vector: Option<nd::Array1<C64>>,
    fill: C64,
}

impl Supplied {
    fn constant(fill: f64) -> Self { Self { vector: None, fill: c(fill) } }

    fn vector(v: nd::Array1<C64>) -> Self { Self { vector: Some(v), fill: c(0.0) } }
}

impl WaveFunctionTransform for Supplied {
    fn initial_guess(&self, lrs: &LeftRightSuper, sector: usize, _: &[usize], _: bool)
        -> Option<nd::Array1<C64>>
    {
        match self.vector.as_ref() {
            Some(v) => Some(v.clone()),
            None => Some(nd::Array1::from_elem(lrs.sector_size(sector), self.fill)),
        }
    }
}

struct Stalling;

impl Eigensolver for Stalling {
    fn compute_excited_state(
        &self,
        _op: &dyn LinearOperator,
        _initial: Option<&nd::Array1<C64>>,
        _excited: usize,
    ) -> DiagResult<SolveOutcome>
    {
        Ok(SolveOutcome::NotConverged { steps: 0, reason: "stalled".into() })
    }
}

struct Refusing;

impl Eigensolver for Refusing {
    fn compute_excited_state(
        &self,
        _op: &dyn LinearOperator,
        _initial: Option<&nd::Array1<C64>>,
        _excited: usize,
    ) -> DiagResult<SolveOutcome>
    {
        Ok(SolveOutcome::FatalConfig("refused".into()))
    }
}

/// [`Chain`] with an imaginary spin-flip coupling that is not paired with
/// its conjugate.
struct Twisted(Chain);

impl Geometry for Twisted {
    fn num_sites(&self) -> usize { self.0.num_sites() }

    fn terms(&self) -> usize { self.0.terms() }

    fn connected(&self, term: usize, i: usize, j: usize) -> bool {
        self.0.connected(term, i, j)
    }

    fn coupling(&self, term: usize, item: &[usize], edofs: &[usize]) -> C64 {
        match term {
            0 => self.0.coupling(term, item, edofs),
            _ => C64::new(0.0, 0.5),
        }
    }
}

#[test]
fn ground_energy_matches_dense_chain() {
    let lrs = chain_superblock(2, 1.0, false);
    let e0 = reference_energy();
    for solver in [SolverKind::Lanczos, SolverKind::Davidson] {
        for batched_gemm in [true, false] {
            let config = DiagConfig { solver, batched_gemm, ..DiagConfig::default() };
            let out = run_finite(&config, &lrs).unwrap();
            assert!((out.energy - e0).abs() < 1e-8, "{:?}: {} vs {}", solver, out.energy, e0);
            assert_eq!(out.found, 1);
            assert_eq!(out.states.len(), 1);
            let gs = out.ground_state().unwrap();
            assert_eq!(gs.label.particles, 2);
            assert_eq!(gs.vector.len(), 6);
            assert!((norm(&gs.vector) - 1.0).abs() < 1e-8);
        }
    }
}

#[test]
fn exact_modes_agree() {
    let lrs = chain_superblock(2, 1.0, false);
    let e0 = reference_energy();

    let config = DiagConfig { exact_diag: true, ..DiagConfig::default() };
    let out = run_finite(&config, &lrs).unwrap();
    assert_eq!(out.states[0].method, Method::Exact);
    assert!((out.energy - e0).abs() < 1e-10);

    let config = DiagConfig { exact_threshold: 6, ..DiagConfig::default() };
    let out = run_finite(&config, &lrs).unwrap();
    assert_eq!(out.states[0].method, Method::Exact);
    assert!((out.energy - e0).abs() < 1e-10);
}

#[test]
fn infinite_growth_scales_the_target() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig::default();
    let geometry = Chain { sites: 8, J: 1.0 };
    let mut diag
        = Diagonalization::new(&config, &geometry, &Heisenberg, QuantumLabel::new(4, vec![]))
        .unwrap();
    let out = diag.infinite(&lrs, &mut NoGuess, 0.0).unwrap();
    assert_eq!(out.states[0].label.particles, 2);
    assert!((out.energy - reference_energy()).abs() < 1e-8);
    assert_eq!(diag.old_energy(), out.energy);
    assert_eq!(diag.target().particles, 4);
}

#[test]
fn symmetry_sector_search_keeps_degenerate_minimum() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig { find_symmetry_sector: true, ..DiagConfig::default() };
    let out = run_finite(&config, &lrs).unwrap();
    // the open four-site chain has a unique singlet ground state
    assert_eq!(out.found, 1);
    assert_eq!(out.states[0].label.particles, 2);
    assert!((out.energy - reference_energy()).abs() < 1e-8);

    let config = DiagConfig {
        find_symmetry_sector: true,
        degeneracy_max: 100.0,
        ..DiagConfig::default()
    };
    let out = run_finite(&config, &lrs).unwrap();
    assert_eq!(out.found, 5);
    assert!(out.states.iter().all(|s| s.energy >= out.energy));
}

#[test]
fn reflection_halves_reproduce_the_sector() {
    let lrs = chain_superblock(2, 1.0, true);
    let modal = ModalStructure::default();
    let m
        = (0..lrs.num_sectors())
        .find(|m| modal.equal(lrs.sector_label(*m), &half_filled()))
        .unwrap();
    let reflection = ReflectionOperator::new(&lrs, m).unwrap();
    assert_eq!(reflection.plus_sector() + reflection.minus_sector(), lrs.sector_size(m));
    assert!(reflection.minus_sector() > 0);

    let e0 = reference_energy();
    for batched_gemm in [true, false] {
        let config = DiagConfig { reflection: true, batched_gemm, ..DiagConfig::default() };
        let out = run_finite(&config, &lrs).unwrap();
        assert!((out.energy - e0).abs() < 1e-8);
        assert!((norm(&out.states[0].vector) - 1.0).abs() < 1e-8);
    }
}

#[test]
fn empty_reflection_half_never_wins() {
    // the fully polarized sectors hold one fixed point and no antisymmetric
    // states; a placeholder below every energy must still be passed over
    let lrs = chain_superblock(2, 1.0, true);
    let config = DiagConfig {
        reflection: true,
        find_symmetry_sector: true,
        degeneracy_max: 100.0,
        placeholder_energy: -1e4,
        ..DiagConfig::default()
    };
    let out = run_finite(&config, &lrs).unwrap();
    assert_eq!(out.found, 5);
    assert!((out.energy - reference_energy()).abs() < 1e-8);
    let polarized
        = out.states.iter()
        .find(|s| s.label.particles == 0)
        .unwrap();
    assert_eq!(polarized.vector.len(), 1);
    assert!((norm(&polarized.vector) - 1.0).abs() < 1e-12);
    assert!((polarized.energy - 0.75).abs() < 1e-10);
    assert_ne!(polarized.method, Method::Empty);
}

#[test]
fn broken_reflection_symmetry_is_detected() {
    let modal = ModalStructure::default();
    let left = chain_block(vec![0, 1], 1.0, 0.3, &modal);
    let right = chain_block(vec![3, 2], 1.0, 0.0, &modal);
    let lrs = LeftRightSuper::new(left, right, &modal).unwrap();
    let config = DiagConfig { reflection: true, ..DiagConfig::default() };
    assert!(matches!(run_finite(&config, &lrs), Err(DiagError::SymmetryViolation(_))));
}

#[test]
fn stalled_solver_falls_back_to_dense() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig::default();
    let geometry = Chain { sites: 4, J: 1.0 };
    let mut diag
        = Diagonalization::with_solver(&config, &geometry, &Heisenberg, half_filled(), Stalling)
        .unwrap();
    let out = diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0).unwrap();
    assert_eq!(out.states[0].method, Method::Fallback);
    assert!((out.energy - reference_energy()).abs() < 1e-10);

    let mut diag
        = Diagonalization::with_solver(&config, &geometry, &Heisenberg, half_filled(), Refusing)
        .unwrap();
    let res = diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0);
    assert!(matches!(res, Err(DiagError::Config(_))));
}

#[test]
fn invalid_requests_are_rejected() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig::default();
    let geometry = Chain { sites: 4, J: 1.0 };

    let mut diag = Diagonalization::new(&config, &geometry, &Heisenberg, half_filled()).unwrap();
    let both = SaveOption(SaveOption::WFT_ONLY_FAST | SaveOption::WFT_ONLY_SLOW);
    let res = diag.finite(&lrs, &mut NoGuess, &[2, 3], both, 0.0);
    assert!(matches!(res, Err(DiagError::Config(_))));

    let mut diag
        = Diagonalization::new(&config, &geometry, &Heisenberg, QuantumLabel::new(10, vec![]))
        .unwrap();
    let res = diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0);
    assert!(matches!(res, Err(DiagError::EmptySector)));

    let bad = DiagConfig { reflection: true, excited: 1, ..DiagConfig::default() };
    assert!(Diagonalization::new(&bad, &geometry, &Heisenberg, half_filled()).is_err());
}

#[test]
fn save_options_resolve_by_direction() {
    let fast = SaveOption(SaveOption::WFT_ONLY_FAST);
    assert_eq!(fast.mode(Direction::Finite, false).unwrap(), DiagMode::WftOnlyFast);
    assert_eq!(fast.mode(Direction::Infinite, false).unwrap(), DiagMode::Full);
    let slow = SaveOption(SaveOption::WFT_ONLY_SLOW | SaveOption::NO_GUESS);
    assert_eq!(slow.mode(Direction::Infinite, true).unwrap(), DiagMode::WftOnlySlow);
    assert!(slow.has(SaveOption::NO_GUESS));
    assert_eq!(SaveOption::default().mode(Direction::Finite, true).unwrap(), DiagMode::Exact);
}

#[test]
fn fast_transform_reuses_previous_energy() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig::default();
    let geometry = Chain { sites: 4, J: 1.0 };
    let mut diag = Diagonalization::new(&config, &geometry, &Heisenberg, half_filled()).unwrap();
    diag.set_old_energy(-1.25);
    let mut wft = Supplied::constant(2.0);
    let fast = SaveOption(SaveOption::WFT_ONLY_FAST);
    let out = diag.finite(&lrs, &mut wft, &[2, 3], fast, 0.0).unwrap();
    assert_eq!(out.energy, -1.25);
    assert_eq!(out.states[0].method, Method::Reused);
    assert!((norm(&out.states[0].vector) - 1.0).abs() < 1e-12);

    let mut zero = Supplied::constant(0.0);
    let res = diag.finite(&lrs, &mut zero, &[2, 3], fast, 0.0);
    assert!(matches!(res, Err(DiagError::ZeroNormGuess(_))));

    // a zero guess is only a warning when the solver runs
    let out = diag.finite(&lrs, &mut zero, &[2, 3], SaveOption::default(), 0.0).unwrap();
    assert!((out.energy - reference_energy()).abs() < 1e-8);
}

#[test]
fn slow_transform_reports_expectation_value() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig::default();
    let geometry = Chain { sites: 4, J: 1.0 };
    let mut diag = Diagonalization::new(&config, &geometry, &Heisenberg, half_filled()).unwrap();
    let ground = diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0).unwrap();
    let v = ground.states[0].vector.mapv(|a| a * c(3.0));

    let slow = SaveOption(SaveOption::WFT_ONLY_SLOW);
    let mut wft = Supplied::vector(v.clone());
    let out = diag.finite(&lrs, &mut wft, &[2, 3], slow, 0.0).unwrap();
    assert_eq!(out.states[0].method, Method::Expectation);
    assert!((out.energy - ground.energy).abs() < 1e-8);

    let no_guess = SaveOption(SaveOption::WFT_ONLY_SLOW | SaveOption::NO_GUESS);
    let res = diag.finite(&lrs, &mut wft, &[2, 3], no_guess, 0.0);
    assert!(matches!(res, Err(DiagError::ZeroNormGuess(_))));

    let excited = DiagConfig { excited: 1, ..DiagConfig::default() };
    let mut diag
        = Diagonalization::new(&excited, &geometry, &Heisenberg, half_filled()).unwrap();
    let res = diag.finite(&lrs, &mut wft, &[2, 3], slow, 0.0);
    assert!(matches!(res, Err(DiagError::Config(_))));
}

#[test]
fn excited_state_is_above_ground_state() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig { excited: 1, ..DiagConfig::default() };
    let out = run_finite(&config, &lrs).unwrap();
    assert!(out.energy > reference_energy() + 1e-6);
}

#[test]
fn debug_matrix_checks_hermiticity() {
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig { debug_matrix: true, ..DiagConfig::default() };
    let out = run_finite(&config, &lrs).unwrap();
    assert!((out.energy - reference_energy()).abs() < 1e-8);

    let geometry = Twisted(Chain { sites: 4, J: 1.0 });
    let mut diag = Diagonalization::new(&config, &geometry, &Heisenberg, half_filled()).unwrap();
    let res = diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0);
    assert!(matches!(res, Err(DiagError::NotHermitian(_))));
}

#[test]
fn fermionic_environ_system_links_flip_sign() {
    // a single hopping pair between one-site blocks; with bosonic statistics
    // both orientations contribute +t, with fermionic ones the swapped
    // orientation picks up a sign from moving the operators past each other
    struct Hop;
    impl Geometry for Hop {
        fn num_sites(&self) -> usize { 2 }
        fn terms(&self) -> usize { 1 }
        fn connected(&self, _: usize, i: usize, j: usize) -> bool { i != j }
        fn coupling(&self, _: usize, _: &[usize], _: &[usize]) -> C64 { c(-1.0) }
    }
    struct Hopping(bool);
    impl LinkProduct for Hopping {
        fn dofs(&self, _: usize, _: &AdditionalData) -> usize { 1 }
        fn link_data(&self, _: usize, _: usize, _: bool, _: &AdditionalData) -> LinkData {
            if self.0 { LinkData::fermion((SP, SP)) } else { LinkData::boson((SP, SP)) }
        }
    }

    // occupied = index 0 (one particle), empty = index 1
    let modal = ModalStructure::default();
    let site = |s: usize| {
        let labels = [QuantumLabel::new(1, vec![]), QuantumLabel::new(0, vec![])];
        Block::new(vec![s], &labels, &CsrMatrix::zeros(2, 2), &modal).unwrap()
            .with_operator(0, SP, &CsrMatrix::from_dense(&sp())).unwrap()
    };
    let lrs = LeftRightSuper::new(site(0), site(1), &modal).unwrap();
    let target = QuantumLabel::new(1, vec![]);
    let config = DiagConfig { exact_diag: true, ..DiagConfig::default() };

    // bosons: -(b0† b1 + b1† b0) has lowest eigenvalue -1
    let links = Hopping(false);
    let mut diag = Diagonalization::new(&config, &Hop, &links, target.clone()).unwrap();
    let out = diag.finite(&lrs, &mut NoGuess, &[1], SaveOption::default(), 0.0).unwrap();
    assert!((out.energy + 1.0).abs() < 1e-12);

    // fermions: the hopping stays hermitian with eigenvalues ±1
    let links = Hopping(true);
    let config = DiagConfig { exact_diag: true, debug_matrix: true, ..DiagConfig::default() };
    let mut diag = Diagonalization::new(&config, &Hop, &links, target).unwrap();
    let out = diag.finite(&lrs, &mut NoGuess, &[1], SaveOption::default(), 0.0).unwrap();
    assert!((out.energy + 1.0).abs() < 1e-12);
}

#[test]
fn npy_checkpoint_writes_every_call() {
    let dir = std::env::temp_dir().join(format!("superblock-diag-{}", std::process::id()));
    let mut sink = NpyCheckpoint::new(&dir).unwrap();
    let lrs = chain_superblock(2, 1.0, false);
    let config = DiagConfig::default();
    let geometry = Chain { sites: 4, J: 1.0 };
    let (out, sector) = {
        let mut diag
            = Diagonalization::new(&config, &geometry, &Heisenberg, half_filled()).unwrap()
            .with_checkpoint(&mut sink);
        let out = diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0)
            .unwrap();
        diag.finite(&lrs, &mut NoGuess, &[2, 3], SaveOption::default(), 0.0).unwrap();
        let sector = out.states[0].sector;
        (out, sector)
    };
    assert_eq!(sink.calls(), 2);
    let energy: nd::Array1<f64> = read_npy(dir.join("gs-0-energy.npy")).unwrap();
    assert_eq!(energy.len(), 1);
    assert!((energy[0] - out.energy).abs() < 1e-15);
    assert!(dir.join(format!("gs-0-sector-{}.npy", sector)).exists());
    assert!(dir.join("gs-1-energy.npy").exists());
    std::fs::remove_dir_all(&dir).ok();
}
