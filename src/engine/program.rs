//! BSP programs.

use crate::runtime::BspCore;

/// What a process does after the local computation of a superstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Superstep {
    /// Synchronize and run another superstep.
    Sync,
    /// Leave the program.
    Finish,
}

/// The body of one BSP process, cut at its syncs.
///
/// `superstep` runs the local computation of superstep `step` (0-based) and
/// returns instead of calling `sync`. Every process must return the same
/// variant in the same superstep.
pub trait BspProgram {
    fn superstep(&mut self, core: &mut BspCore, step: u64) -> Superstep;
}

impl<F> BspProgram for F
where
    F: FnMut(&mut BspCore, u64) -> Superstep,
{
    fn superstep(&mut self, core: &mut BspCore, step: u64) -> Superstep {
        self(core, step)
    }
}

/// Run `program` to completion on the calling thread, syncing with
/// blocking barriers between supersteps.
///
/// Returns the number of supersteps executed.
pub fn drive<P: BspProgram + ?Sized>(core: &mut BspCore, program: &mut P) -> u64 {
    let mut step = 0;
    loop {
        let next = program.superstep(core, step);
        step += 1;
        match next {
            Superstep::Sync => core.sync(),
            Superstep::Finish => return step,
        }
    }
}
