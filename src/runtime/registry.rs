//! Registered variables and remote address resolution.
//!
//! The k-th variable any process registers lands in slot k of the shared
//! table, in that process's column. Since every process registers in the
//! same supersteps, slot k names "the same variable" everywhere. To find
//! the remote address of a variable, a process looks up the slot holding
//! its *own* address for it and reads the target's column in that slot.
//!
//! ```text
//!            pid 0     pid 1     pid 2
//! slot 0     0x0100    0x0100    0x0180    <- registered in superstep 1
//! slot 1     0x0200    0x0240    0x0200    <- registered in superstep 3
//! slot 2     -         -         -
//! ```
//!
//! The slot counter advances once per superstep in which anybody
//! registered, during the sync that ends it.

use super::BspCore;
use crate::device::{AddrSpace, GlobalAddr, LocalAddr, Pid, VarBinding};
use crate::error::{BspError, BspResult};

impl BspCore {
    /// Register `size` bytes at `addr` as this process's entry of the next slot.
    ///
    /// The binding becomes usable by other processes after the next sync.
    pub fn register(&mut self, addr: LocalAddr, size: u32) -> BspResult<()> {
        if self.var_pushed {
            return self.fail(BspError::DuplicateRegistration);
        }

        let capacity = self.region.capacities().max_vars;
        let slot = self.region.var_counter();
        if slot >= capacity {
            return self.fail(BspError::TableOverflow { capacity });
        }

        if let Err(err) = self.local().range(addr.0, size as usize) {
            return self.fail(err);
        }

        self.region.var_column(self.pid)[slot] = Some(VarBinding { addr, size });
        self.var_pushed = true;
        self.region.mark_push_pending();

        log::debug!("pid {} registered {} ({} bytes) in slot {}", self.pid, addr, size, slot);
        Ok(())
    }

    /// Slot holding this process's binding of `addr`, if any.
    pub fn find_slot(&self, addr: LocalAddr) -> Option<usize> {
        self.region
            .var_column(self.pid)
            .iter()
            .position(|binding| binding.map(|b| b.addr) == Some(addr))
    }

    /// Translate a registered local address into the address of the same
    /// variable on `pid`, plus `offset` bytes.
    pub fn resolve(&self, pid: Pid, addr: LocalAddr, offset: u32) -> BspResult<GlobalAddr> {
        if let Err(err) = self.region.check_pid(pid) {
            return self.fail(err);
        }

        let remote = self
            .find_slot(addr)
            .and_then(|slot| self.region.var_column(pid)[slot]);

        let Some(binding) = remote else {
            return self.fail(BspError::UnknownVariable { pid, addr });
        };
        match binding.addr.0.checked_add(offset) {
            Some(target) => Ok(GlobalAddr::core(pid, target)),
            None => self.fail(BspError::AddressOutOfRange {
                space: AddrSpace::Core(pid),
                offset: binding.addr.0,
                len: offset as usize,
            }),
        }
    }
}
