//! Run parameters for the sector diagonalizer, loadable from TOML.
//!
//! Every field has a default, so a partial file (or an empty string) is a
//! valid configuration:
//!
//! ```toml
//! solver = "davidson"
//! excited = 0
//! find_symmetry_sector = true
//! modal = [ "sum", { modulo = 2 } ]
//!
//! [solver_params]
//! max_steps = 200
//! tolerance = 1e-12
//! ```

use std::path::Path;
use serde::{ Deserialize, Serialize };
use crate::{
    error::{ DiagError, DiagResult },
    qn::{ Modal, ModalStructure },
};

/// Choice of iterative eigensolver.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    #[default]
    Lanczos,
    Davidson,
}

/// Parameters common to both iterative eigensolvers.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverParams {
    /// Maximum number of Krylov/Davidson steps.
    pub max_steps: usize,
    /// Minimum number of steps before convergence is tested.
    pub min_steps: usize,
    /// Convergence threshold on the change of the targeted Ritz value.
    pub tolerance: f64,
    /// Norm below which a new Krylov vector counts as a breakdown.
    pub breakdown: f64,
    /// Seed for the random default start vector.
    pub seed: u64,
    /// Davidson divides residual components by `e - diag` only where the
    /// denominator exceeds this in magnitude.
    pub preconditioner_floor: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_steps: 200,
            min_steps: 4,
            tolerance: 1e-12,
            breakdown: 1e-14,
            seed: 10_101,
            preconditioner_floor: 1e-8,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagConfig {
    pub solver: SolverKind,
    pub solver_params: SolverParams,
    /// Index of the eigenpair to compute in each sector (0 = ground).
    pub excited: usize,
    /// Diagonalize every sector instead of only those matching the target.
    pub find_symmetry_sector: bool,
    /// Energy window above the global minimum within which sectors are kept
    /// when searching over all sectors.
    pub degeneracy_max: f64,
    /// Couplings with modulus at or below this are discarded.
    pub prune_tolerance: f64,
    /// Norm below which a guess vector counts as zero.
    pub norm_tolerance: f64,
    /// Tolerance for the hermiticity and reflection-residue checks.
    pub symmetry_tolerance: f64,
    /// Sectors at or below this size are diagonalized densely.
    pub exact_threshold: usize,
    /// Force dense diagonalization of every sector.
    pub exact_diag: bool,
    /// Materialize each sector matrix and check it is hermitian.
    pub debug_matrix: bool,
    /// Use the batched Kronecker product instead of the sparse sector matrix.
    pub batched_gemm: bool,
    /// Reduce each sector by left/right reflection symmetry.
    pub reflection: bool,
    /// Energy reported for a reflection half with no states.
    pub placeholder_energy: f64,
    /// Treat angular momentum labels as SU(2) multiplets.
    pub su2: bool,
    /// Combination policy of each auxiliary label component.
    pub modal: Vec<Modal>,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::default(),
            solver_params: SolverParams::default(),
            excited: 0,
            find_symmetry_sector: false,
            degeneracy_max: 1e-12,
            prune_tolerance: 0.0,
            norm_tolerance: 1e-12,
            symmetry_tolerance: 1e-8,
            exact_threshold: 0,
            exact_diag: false,
            debug_matrix: false,
            batched_gemm: true,
            reflection: false,
            placeholder_energy: 1e4,
            su2: false,
            modal: Vec::new(),
        }
    }
}

impl DiagConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> DiagResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file<P>(path: P) -> DiagResult<Self>
    where P: AsRef<Path>
    {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> DiagResult<()> {
        if self.solver_params.max_steps == 0 {
            return Err(DiagError::Config(
                "solver_params.max_steps must be positive".into()));
        }
        if self.prune_tolerance < 0.0
            || self.norm_tolerance < 0.0
            || self.symmetry_tolerance < 0.0
            || self.degeneracy_max < 0.0
            || self.solver_params.preconditioner_floor < 0.0
        {
            return Err(DiagError::Config("tolerances must be non-negative".into()));
        }
        if self.modal.iter().any(|m| matches!(m, Modal::Modulo(0))) {
            return Err(DiagError::Config("modulus must be non-zero".into()));
        }
        if self.reflection && self.excited > 0 {
            return Err(DiagError::Config(
                "reflection symmetry only supports the lowest state (excited = 0)".into()));
        }
        if self.su2 && self.reflection {
            return Err(DiagError::Config(
                "reflection symmetry is not supported together with SU(2)".into()));
        }
        Ok(())
    }

    /// The label combination policy described by `self.modal`.
    pub fn modal_structure(&self) -> ModalStructure {
        ModalStructure::new(self.modal.clone())
    }
}
