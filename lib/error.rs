//! Error type shared by every stage of a superblock diagonalization.
//!
//! Recoverable conditions (singular sectors, non-converged solves, zero-norm
//! guesses outside of the wavefunction-transform-only modes) are reported
//! through [`log`] and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagError {
    /// Invalid or mutually exclusive run parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// A flattened label record list did not divide into whole records.
    #[error("label decoding: {len} integers do not divide into records of width {width}")]
    LabelWidth { len: usize, width: usize },

    /// A label's auxiliary width disagrees with the configured modal
    /// structure.
    #[error("label has {found} auxiliary components; modal structure expects {expected}")]
    AuxWidth { found: usize, expected: usize },

    /// Partitioning was requested for an empty label list.
    #[error("cannot partition an empty label list")]
    EmptyPartition,

    /// A site named by a connection does not belong to the superblock.
    #[error("site {0} could not be found in the superblock")]
    UnresolvedSite(usize),

    /// Only two-site couplings are supported.
    #[error("connection item touches {0} sites; only two-site couplings are supported")]
    MultiSiteConnection(usize),

    /// The block providing a coupling operator has no such operator.
    #[error("no operator {op} on block-local site {site}")]
    MissingOperator { site: usize, op: usize },

    /// A coupling operator has no rows or columns, or broken CSR structure.
    #[error("operator {op} on block-local site {site} is degenerate or malformed")]
    DegenerateOperator { site: usize, op: usize },

    /// No sector matched the target label.
    #[error("no symmetry sectors found; perhaps there are too many particles?")]
    EmptySector,

    /// A zero-norm guess in a mode that has no solve step to fall back on.
    #[error("initial vector for sector {0} has zero norm and no solve step is allowed")]
    ZeroNormGuess(usize),

    /// Splitting by reflection left off-block-diagonal residue.
    #[error("Hamiltonian has no reflection symmetry (off-block residue {0:e})")]
    SymmetryViolation(f64),

    /// A batched product was requested without the batched representation.
    #[error("batched matrix-vector product requested but batched mode is disabled")]
    BatchedDisabled,

    /// A materialized sector matrix failed the hermiticity check.
    #[error("sector {0} matrix is not hermitian")]
    NotHermitian(usize),

    /// Array dimensions that should agree did not.
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("dense diagonalization error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("npy write error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),
}

pub type DiagResult<T> = Result<T, DiagError>;
