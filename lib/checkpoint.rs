//! Persistence of diagonalization results.

use std::path::{ Path, PathBuf };
use ndarray as nd;
use ndarray_npy::write_npy;
use crate::{
    diag::DiagOutput,
    error::DiagResult,
};

/// Receives the result of every diagonalization call.
pub trait Checkpoint {
    fn save(&mut self, output: &DiagOutput) -> DiagResult<()>;
}

impl<C> Checkpoint for &mut C
where C: Checkpoint + ?Sized
{
    fn save(&mut self, output: &DiagOutput) -> DiagResult<()> { (**self).save(output) }
}

/// Writes each call's result as `.npy` files in a directory.
///
/// Call `n` produces `gs-{n}-energy.npy`, holding the global energy, and one
/// `gs-{n}-sector-{m}.npy` per returned sector vector.
#[derive(Clone, Debug)]
pub struct NpyCheckpoint {
    dir: PathBuf,
    calls: usize,
}

impl NpyCheckpoint {
    /// Create a new sink, creating `dir` if needed.
    pub fn new<P>(dir: P) -> DiagResult<Self>
    where P: AsRef<Path>
    {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf(), calls: 0 })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    /// Number of results saved so far.
    pub fn calls(&self) -> usize { self.calls }
}

impl Checkpoint for NpyCheckpoint {
    fn save(&mut self, output: &DiagOutput) -> DiagResult<()> {
        let n = self.calls;
        let energy: nd::Array1<f64> = nd::array![output.energy];
        write_npy(self.dir.join(format!("gs-{}-energy.npy", n)), &energy)?;
        for state in output.states.iter() {
            write_npy(
                self.dir.join(format!("gs-{}-sector-{}.npy", n, state.sector)),
                &state.vector,
            )?;
        }
        self.calls += 1;
        Ok(())
    }
}
