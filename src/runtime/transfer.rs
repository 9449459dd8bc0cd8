//! Deferred and immediate data transfers.
//!
//! `put` and `get` queue a [`DataRequest`] that the next sync applies. A put
//! snapshots its source into the payload arena at call time, so the local
//! buffer may be reused immediately. `hp_put` and `hp_get` copy right away
//! and carry no ordering guarantee relative to other processes.

use super::BspCore;
use crate::device::{DataRequest, GlobalAddr, LocalAddr, Pid};
use crate::error::{BspError, BspResult, RequestKind};

impl BspCore {
    /// Copy `nbytes` from local `src` to the registered variable `dst` on
    /// process `pid`, `offset` bytes in. Applied at the next sync.
    pub fn put(
        &mut self,
        pid: Pid,
        src: LocalAddr,
        dst: LocalAddr,
        offset: u32,
        nbytes: usize,
    ) -> BspResult<()> {
        self.admit_request(RequestKind::Put)?;
        let target = self.resolve(pid, dst, offset)?;
        self.check_ranges(src.on(self.pid), target, nbytes)?;

        let capacity = self.region.capacities().payload_size;
        let mut ledger = self.region.ledger();
        let available = capacity - ledger.buffer_size;
        if nbytes > available {
            drop(ledger);
            return self.fail(BspError::PayloadOverflow {
                requested: nbytes,
                available,
            });
        }
        let slot = GlobalAddr::payload(ledger.buffer_size as u32);
        ledger.buffer_size += nbytes;
        drop(ledger);

        self.region.copy(src.on(self.pid), slot, nbytes)?;
        // nbytes fits the arena, whose size is bounded below the put bit
        self.push_request(DataRequest::put(slot, target, nbytes as u32));
        Ok(())
    }

    /// Copy `nbytes` from the registered variable `src` on process `pid`,
    /// `offset` bytes in, to local `dst`. Applied at the next sync.
    pub fn get(
        &mut self,
        pid: Pid,
        src: LocalAddr,
        offset: u32,
        dst: LocalAddr,
        nbytes: usize,
    ) -> BspResult<()> {
        self.admit_request(RequestKind::Get)?;
        let source = self.resolve(pid, src, offset)?;
        let dest = dst.on(self.pid);
        self.check_ranges(source, dest, nbytes)?;

        // Both ranges fit a core memory, whose size is bounded below the put bit
        self.push_request(DataRequest::get(source, dest, nbytes as u32));
        Ok(())
    }

    /// Immediate put: write into `pid`'s copy of `dst` now.
    pub fn hp_put(
        &mut self,
        pid: Pid,
        src: LocalAddr,
        dst: LocalAddr,
        offset: u32,
        nbytes: usize,
    ) -> BspResult<()> {
        let target = self.resolve(pid, dst, offset)?;
        match self.region.copy(src.on(self.pid), target, nbytes) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(err),
        }
    }

    /// Immediate get: read `pid`'s copy of `src` now.
    pub fn hp_get(
        &mut self,
        pid: Pid,
        src: LocalAddr,
        offset: u32,
        dst: LocalAddr,
        nbytes: usize,
    ) -> BspResult<()> {
        let source = self.resolve(pid, src, offset)?;
        match self.region.copy(source, dst.on(self.pid), nbytes) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(err),
        }
    }

    fn admit_request(&self, kind: RequestKind) -> BspResult<()> {
        let capacity = self.region.capacities().max_requests;
        if self.request_counter >= capacity {
            return self.fail(BspError::RequestOverflow { kind, capacity });
        }
        Ok(())
    }

    fn check_ranges(&self, src: GlobalAddr, dst: GlobalAddr, nbytes: usize) -> BspResult<()> {
        let checked = self
            .region
            .memory(src.space)
            .and_then(|m| m.range(src.offset, nbytes))
            .and_then(|_| self.region.memory(dst.space))
            .and_then(|m| m.range(dst.offset, nbytes));
        match checked {
            Ok(_) => Ok(()),
            Err(err) => self.fail(err),
        }
    }

    fn push_request(&mut self, req: DataRequest) {
        log::debug!(
            "pid {} queued {} {} -> {} ({} bytes)",
            self.pid,
            if req.is_put() { "put" } else { "get" },
            req.src,
            req.dst,
            req.len()
        );
        self.region.requests(self.pid).push(req);
        self.request_counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Capacities;
    use crate::device::{AckMode, CommBuffer};
    use crate::runtime::sync::sync_all;

    const X: LocalAddr = LocalAddr(0x40);
    const BUF: LocalAddr = LocalAddr(0x100);

    fn registered(n: usize, caps: Capacities) -> (Arc<CommBuffer>, Vec<BspCore>) {
        let region = CommBuffer::shared(caps, AckMode::Inline).unwrap();
        let mut cores: Vec<_> = (0..n)
            .map(|pid| BspCore::new(Arc::clone(&region), pid).unwrap())
            .collect();
        for core in cores.iter_mut() {
            core.register(X, 16).unwrap();
        }
        sync_all(&mut cores);
        (region, cores)
    }

    fn caps(n: usize) -> Capacities {
        Capacities {
            core_memory_size: 512,
            ..Capacities::with_nprocs(n)
        }
    }

    #[test]
    fn test_put_visible_after_sync() {
        let (_region, mut cores) = registered(2, caps(2));

        cores[0].write_local(BUF, b"abcd").unwrap();
        cores[0].put(1, BUF, X, 4, 4).unwrap();

        // Source may be reused: the arena holds the snapshot
        cores[0].write_local(BUF, b"zzzz").unwrap();

        let mut out = [0u8; 4];
        cores[1].read_local(X.add(4), &mut out).unwrap();
        assert_eq!(out, [0; 4]);

        sync_all(&mut cores);
        cores[1].read_local(X.add(4), &mut out).unwrap();
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn test_get_visible_after_sync() {
        let (_region, mut cores) = registered(2, caps(2));

        cores[1].write_local_u32(X, 0xdead_beef).unwrap();
        cores[0].get(1, X, 0, BUF, 4).unwrap();
        assert_eq!(cores[0].read_local_u32(BUF).unwrap(), 0);

        sync_all(&mut cores);
        assert_eq!(cores[0].read_local_u32(BUF).unwrap(), 0xdead_beef);
    }

    #[test]
    fn test_request_overflow_leaves_no_trace() {
        let caps = Capacities {
            max_requests: 2,
            ..caps(2)
        };
        let (region, mut cores) = registered(2, caps);

        cores[0].put(1, BUF, X, 0, 4).unwrap();
        cores[0].get(1, X, 0, BUF, 4).unwrap();
        assert_eq!(
            cores[0].put(1, BUF, X, 0, 4),
            Err(BspError::RequestOverflow {
                kind: RequestKind::Put,
                capacity: 2
            })
        );
        assert_eq!(
            cores[0].get(1, X, 0, BUF, 4),
            Err(BspError::RequestOverflow {
                kind: RequestKind::Get,
                capacity: 2
            })
        );

        assert_eq!(cores[0].request_count(), 2);
        assert_eq!(region.ledger().buffer_size, 4);
        assert_eq!(region.mailbox().report_count(), 2);
    }

    #[test]
    fn test_payload_admission_exact() {
        let caps = Capacities {
            payload_size: 12,
            ..caps(2)
        };
        let (region, mut cores) = registered(2, caps);

        cores[0].put(1, BUF, X, 0, 8).unwrap();
        cores[1].put(0, BUF, X, 0, 4).unwrap();
        assert_eq!(region.ledger().buffer_size, 12);

        assert_eq!(
            cores[1].put(0, BUF, X, 4, 1),
            Err(BspError::PayloadOverflow {
                requested: 1,
                available: 0
            })
        );
        assert_eq!(region.ledger().buffer_size, 12);
        assert_eq!(cores[1].request_count(), 1);

        // Arena is free again next superstep
        sync_all(&mut cores);
        cores[1].put(0, BUF, X, 0, 12).unwrap();
    }

    #[test]
    fn test_put_out_of_range() {
        let (region, mut cores) = registered(2, caps(2));

        // Variable sits at 0x40, memory ends at 0x200
        let err = cores[0].put(1, BUF, X, 0x1c0, 8).unwrap_err();
        assert!(matches!(err, BspError::AddressOutOfRange { .. }));
        assert_eq!(region.ledger().buffer_size, 0);
        assert_eq!(cores[0].request_count(), 0);
    }

    #[test]
    fn test_wrapping_offset_is_rejected() {
        let (region, mut cores) = registered(2, caps(2));

        cores[0].write_local_u32(BUF, 0xabcd).unwrap();
        let err = cores[0].put(1, BUF, X, 0xFFFF_FFC0, 4).unwrap_err();
        assert!(matches!(err, BspError::AddressOutOfRange { .. }));
        assert_eq!(cores[0].request_count(), 0);
        assert_eq!(region.ledger().buffer_size, 0);

        sync_all(&mut cores);
        assert_eq!(cores[1].read_local_u32(LocalAddr(0)).unwrap(), 0);
    }

    #[test]
    fn test_unresolved_put_is_skipped() {
        let (region, mut cores) = registered(2, caps(2));

        assert!(matches!(
            cores[0].put(1, BUF, BUF, 0, 4),
            Err(BspError::UnknownVariable { .. })
        ));
        assert_eq!(cores[0].request_count(), 0);
        assert_eq!(region.ledger().buffer_size, 0);
    }

    #[test]
    fn test_hp_transfers_are_immediate() {
        let (_region, mut cores) = registered(3, caps(3));

        cores[0].write_local_u32(BUF, 42).unwrap();
        cores[0].hp_put(2, BUF, X, 8, 4).unwrap();
        assert_eq!(cores[2].read_local_u32(X.add(8)).unwrap(), 42);

        cores[1].hp_get(2, X, 8, BUF, 4).unwrap();
        assert_eq!(cores[1].read_local_u32(BUF).unwrap(), 42);
        assert_eq!(cores[1].request_count(), 0);
    }
}
