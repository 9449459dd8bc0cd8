//! Buffered message passing.
//!
//! Two queues alternate roles every superstep: processes read the one at
//! `queue_index` and send into the other. Each queue owns an arena for tags
//! and payloads which is reset by the sync that turns it back into the send
//! queue, so everything read in a superstep stays valid until its end.
//!
//! The receive queue is frozen while it is read. Its length is captured by
//! the sync that made it the receive queue; the cursor only moves forward.

use super::BspCore;
use crate::device::{GlobalAddr, Message, Pid};
use crate::error::{BspError, BspResult};

/// Tag and payload of a consumed message, in place in the queue arena.
///
/// Valid until the end of the current superstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageView {
    pub tag: GlobalAddr,
    pub tag_len: usize,
    pub payload: GlobalAddr,
    pub nbytes: usize,
}

/// Unconsumed messages addressed to this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub packets: usize,
    pub bytes: usize,
}

impl BspCore {
    /// Propose the tag size for the next superstep.
    ///
    /// Returns the tag size in effect now.
    pub fn set_tag_size(&mut self, size: usize) -> usize {
        self.tag_size_next = size;
        self.tag_size
    }

    /// Tag size of the current superstep.
    pub fn tag_size(&self) -> usize {
        self.tag_size
    }

    /// Send `payload` with `tag` to process `pid`.
    ///
    /// The tag is zero padded or truncated to the current tag size. The
    /// message can be read by `pid` after the next sync.
    pub fn send(&mut self, pid: Pid, tag: &[u8], payload: &[u8]) -> BspResult<()> {
        if let Err(err) = self.region.check_pid(pid) {
            return self.fail(err);
        }

        let index = self.queue_index ^ 1;
        let queue = self.region.queue(index);
        let mut ledger = self.region.ledger();
        let entry = &mut ledger.queues[index as usize];
        let slot = entry.count;
        if slot >= queue.capacity() {
            drop(ledger);
            return self.fail(BspError::MessageOverflow {
                capacity: queue.capacity(),
            });
        }
        let available = queue.arena().len() - entry.arena_size;
        let footprint = match self.tag_size.checked_add(payload.len()) {
            Some(n) if n <= available => n,
            requested => {
                drop(ledger);
                return self.fail(BspError::PayloadOverflow {
                    requested: requested.unwrap_or(usize::MAX),
                    available,
                });
            }
        };
        // Arena sizes are bounded below u32::MAX
        let offset = entry.arena_size as u32;
        entry.count += 1;
        entry.arena_size += footprint;
        drop(ledger);

        let tag_len = self.tag_size as u32;
        let mut tag_bytes = vec![0u8; self.tag_size];
        let n = tag.len().min(self.tag_size);
        tag_bytes[..n].copy_from_slice(&tag[..n]);

        queue.arena().write_bytes(offset, &tag_bytes)?;
        queue.arena().write_bytes(offset + tag_len, payload)?;
        queue.store(
            slot,
            Message {
                pid,
                tag: GlobalAddr::queue(index, offset),
                tag_len,
                payload: GlobalAddr::queue(index, offset + tag_len),
                nbytes: payload.len() as u32,
            },
        );

        log::debug!(
            "pid {} sent {} bytes to pid {} (queue {} slot {})",
            self.pid,
            payload.len(),
            pid,
            index,
            slot
        );
        Ok(())
    }

    /// Next message for this process at or after the cursor.
    ///
    /// Moves the cursor past messages addressed to other processes.
    fn next_message(&mut self) -> Option<(usize, Message)> {
        let queue = self.region.queue(self.queue_index);
        let found = (self.message_index..self.queue_len)
            .filter_map(|slot| queue.load(slot).map(|m| (slot, m)))
            .find(|(_, m)| m.pid == self.pid);
        self.message_index = found.map_or(self.queue_len, |(slot, _)| slot);
        found
    }

    /// Length of the next message and a copy of its tag, without consuming it.
    ///
    /// Copies as much of the tag as fits in `tag`. Returns `None` when no
    /// message is left.
    pub fn peek(&mut self, tag: &mut [u8]) -> BspResult<Option<usize>> {
        let Some((_, msg)) = self.next_message() else {
            return Ok(None);
        };
        let n = tag.len().min(msg.tag_len as usize);
        self.region.read(msg.tag, &mut tag[..n])?;
        Ok(Some(msg.nbytes as usize))
    }

    /// Consume the next message, copying as much payload as fits in `buf`.
    ///
    /// Returns the number of bytes copied, or `None` when no message is left.
    /// A message longer than `buf` is truncated; the rest is dropped.
    pub fn consume(&mut self, buf: &mut [u8]) -> BspResult<Option<usize>> {
        let Some((slot, msg)) = self.next_message() else {
            return Ok(None);
        };
        self.message_index = slot + 1;

        let n = buf.len().min(msg.nbytes as usize);
        self.region.read(msg.payload, &mut buf[..n])?;
        Ok(Some(n))
    }

    /// Consume the next message without copying it.
    pub fn consume_zero_copy(&mut self) -> Option<MessageView> {
        let (slot, msg) = self.next_message()?;
        self.message_index = slot + 1;
        Some(MessageView {
            tag: msg.tag,
            tag_len: msg.tag_len as usize,
            payload: msg.payload,
            nbytes: msg.nbytes as usize,
        })
    }

    /// Count and total payload bytes of the messages still to be consumed.
    pub fn queue_stats(&self) -> QueueStats {
        let queue = self.region.queue(self.queue_index);
        (self.message_index..self.queue_len)
            .filter_map(|slot| queue.load(slot))
            .filter(|m| m.pid == self.pid)
            .fold(QueueStats::default(), |stats, m| QueueStats {
                packets: stats.packets + 1,
                bytes: stats.bytes + m.nbytes as usize,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Capacities;
    use crate::device::{AckMode, CommBuffer};
    use crate::runtime::sync::sync_all;

    fn cores(n: usize, caps: Capacities) -> (Arc<CommBuffer>, Vec<BspCore>) {
        let region = CommBuffer::shared(caps, AckMode::Inline).unwrap();
        let cores = (0..n)
            .map(|pid| BspCore::new(Arc::clone(&region), pid).unwrap())
            .collect();
        (region, cores)
    }

    fn caps(n: usize) -> Capacities {
        Capacities {
            core_memory_size: 256,
            ..Capacities::with_nprocs(n)
        }
    }

    #[test]
    fn test_visible_next_superstep() {
        let (_region, mut cores) = cores(2, caps(2));

        cores[0].send(1, &[], b"hello").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(cores[1].consume(&mut buf).unwrap(), None);

        sync_all(&mut cores);
        assert_eq!(cores[1].peek(&mut []).unwrap(), Some(5));
        assert_eq!(cores[1].consume(&mut buf).unwrap(), Some(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(cores[1].consume(&mut buf).unwrap(), None);

        // Gone after one superstep
        sync_all(&mut cores);
        assert_eq!(cores[1].queue_stats(), QueueStats::default());
    }

    #[test]
    fn test_only_own_messages() {
        let (_region, mut cores) = cores(3, caps(3));

        cores[0].send(2, &[], b"a").unwrap();
        cores[0].send(1, &[], b"bb").unwrap();
        cores[1].send(2, &[], b"ccc").unwrap();
        sync_all(&mut cores);

        assert_eq!(
            cores[2].queue_stats(),
            QueueStats {
                packets: 2,
                bytes: 4
            }
        );
        assert_eq!(
            cores[1].queue_stats(),
            QueueStats {
                packets: 1,
                bytes: 2
            }
        );
        assert_eq!(cores[0].queue_stats(), QueueStats::default());

        let mut buf = [0u8; 4];
        assert_eq!(cores[2].consume(&mut buf).unwrap(), Some(1));
        assert_eq!(buf[0], b'a');
        assert_eq!(
            cores[2].queue_stats(),
            QueueStats {
                packets: 1,
                bytes: 3
            }
        );
    }

    #[test]
    fn test_queue_stats_does_not_consume() {
        let (_region, mut cores) = cores(2, caps(2));
        cores[0].send(1, &[], b"xy").unwrap();
        sync_all(&mut cores);

        let first = cores[1].queue_stats();
        assert_eq!(cores[1].queue_stats(), first);
        assert_eq!(cores[1].consume(&mut [0; 2]).unwrap(), Some(2));
    }

    #[test]
    fn test_truncating_consume() {
        let (_region, mut cores) = cores(2, caps(2));
        cores[0].send(1, &[], b"0123456789").unwrap();
        cores[0].send(1, &[], b"abcdefghij").unwrap();
        sync_all(&mut cores);

        let mut buf = [0u8; 4];
        assert_eq!(cores[1].consume(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf, b"0123");

        // Empty buffer still consumes
        assert_eq!(cores[1].consume(&mut []).unwrap(), Some(0));
        assert_eq!(cores[1].queue_stats(), QueueStats::default());
    }

    #[test]
    fn test_tag_size_handshake() {
        let (_region, mut cores) = cores(2, caps(2));

        assert_eq!(cores[0].set_tag_size(4), 0);
        cores[0].send(1, b"tag!", b"p").unwrap();
        sync_all(&mut cores);

        // Sent with the old tag size: no tag bytes
        let mut tag = [0xffu8; 4];
        assert_eq!(cores[1].peek(&mut tag).unwrap(), Some(1));
        assert_eq!(tag, [0xff; 4]);

        assert_eq!(cores[0].tag_size(), 4);
        assert_eq!(cores[0].set_tag_size(4), 4);
        cores[0].send(1, b"ab", b"q").unwrap();
        sync_all(&mut cores);

        let view = cores[1].consume_zero_copy().unwrap();
        assert_eq!(view.tag_len, 4);
        let mut tag = [0xffu8; 4];
        cores[1].read_global(view.tag, &mut tag).unwrap();
        assert_eq!(tag, [b'a', b'b', 0, 0]);
        let mut payload = [0u8; 1];
        cores[1].read_global(view.payload, &mut payload).unwrap();
        assert_eq!(&payload, b"q");
    }

    #[test]
    fn test_message_overflow_exact() {
        let caps = Capacities {
            max_messages: 2,
            ..caps(2)
        };
        let (region, mut cores) = cores(2, caps);

        cores[0].send(1, &[], b"1").unwrap();
        cores[1].send(0, &[], b"2").unwrap();
        assert_eq!(
            cores[0].send(1, &[], b"3"),
            Err(BspError::MessageOverflow { capacity: 2 })
        );
        assert_eq!(region.ledger().queues[1].count, 2);
        assert_eq!(region.ledger().queues[1].arena_size, 2);
    }

    #[test]
    fn test_send_counts_tag_bytes() {
        let caps = Capacities {
            queue_payload_size: 16,
            initial_tag_size: 4,
            ..caps(2)
        };
        let (region, mut cores) = cores(2, caps);

        cores[0].send(1, b"t", &[1; 8]).unwrap();
        assert_eq!(region.ledger().queues[1].arena_size, 12);
        assert_eq!(
            cores[0].send(1, b"t", &[1; 1]),
            Err(BspError::PayloadOverflow {
                requested: 5,
                available: 4
            })
        );
        assert_eq!(region.ledger().queues[1].count, 1);
    }

    #[test]
    fn test_views_survive_sends() {
        let caps = Capacities {
            queue_payload_size: 8,
            ..caps(2)
        };
        let (_region, mut cores) = cores(2, caps);

        cores[0].send(1, &[], b"keep").unwrap();
        sync_all(&mut cores);

        let view = cores[1].consume_zero_copy().unwrap();
        // Sends this superstep land in the other queue's arena
        cores[0].send(1, &[], b"XXXXXXXX").unwrap();

        let mut out = [0u8; 4];
        cores[1].read_global(view.payload, &mut out).unwrap();
        assert_eq!(&out, b"keep");
    }

    #[test]
    fn test_huge_tag_size_overflows() {
        let (region, mut cores) = cores(2, caps(2));

        cores[0].set_tag_size(usize::MAX);
        sync_all(&mut cores);
        assert_eq!(
            cores[0].send(1, &[], b"x"),
            Err(BspError::PayloadOverflow {
                requested: usize::MAX,
                available: 8 * 1024,
            })
        );
        assert_eq!(region.ledger().queues[0].count, 0);
        assert_eq!(region.mailbox().report_count(), 1);
    }

    #[test]
    fn test_cursor_skips_foreign_messages() {
        let (_region, mut cores) = cores(3, caps(3));

        cores[0].send(1, &[], b"a").unwrap();
        cores[0].send(1, &[], b"b").unwrap();
        cores[0].send(2, &[], b"c").unwrap();
        sync_all(&mut cores);

        assert_eq!(cores[2].peek(&mut []).unwrap(), Some(1));
        assert_eq!(cores[2].message_index, 2);
        assert_eq!(cores[2].consume(&mut [0; 1]).unwrap(), Some(1));
        assert_eq!(cores[2].message_index, 3);

        // Nothing left: the cursor parks at the end
        assert_eq!(cores[2].peek(&mut []).unwrap(), None);
        assert_eq!(cores[1].consume(&mut [0; 1]).unwrap(), Some(1));
        assert_eq!(cores[1].queue_stats().packets, 1);
    }

    #[test]
    fn test_invalid_destination() {
        let (region, mut cores) = cores(2, caps(2));
        assert_eq!(
            cores[0].send(7, &[], b"x"),
            Err(BspError::InvalidProcess { pid: 7, nprocs: 2 })
        );
        assert_eq!(region.ledger().queues[1].count, 0);
    }
}
