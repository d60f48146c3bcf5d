use super::{RcvBuffer, RcvBufferError, Slot};
use crate::unit_queue::{Unit, UnitArena};
use log::*;
use std::sync::Arc;

impl RcvBuffer {
    /// Stores a received packet at the slot matching its sequence number.
    ///
    /// On failure the unit is returned to the unit queue, except for a unit of
    /// another queue, which is handed back in `ForeignUnit`.
    pub fn insert(&mut self, unit: Unit) -> Result<(), RcvBufferError> {
        let units = Arc::clone(&self.units);
        let mut arena = units.lock();

        if !arena.owns(&unit) {
            error!("refusing unit of another unit queue");
            return Err(RcvBufferError::ForeignUnit(unit));
        }

        let (seq_no, len, timestamp) = {
            let packet = arena.packet(&unit);
            (packet.seq_no(), packet.len(), packet.timestamp())
        };

        let offset = self.start_seq.offset_to(seq_no);

        let result = if offset < 0 {
            Err(RcvBufferError::BeforeWindow(seq_no, self.start_seq))
        } else if offset as usize >= self.capacity() {
            Err(RcvBufferError::BeyondCapacity(
                seq_no,
                self.capacity(),
                self.start_seq,
            ))
        } else {
            let pos = self.pos_of(offset as usize);

            match self.entries[pos] {
                Slot::Empty => Ok(pos),
                _ => Err(RcvBufferError::Duplicate(seq_no)),
            }
        };

        let pos = match result {
            Ok(pos) => pos,
            Err(err) => {
                debug!("discarding packet: {}", err);
                Self::release_unit(&mut arena, unit);
                return Err(err);
            }
        };

        let offset = offset as usize;
        if offset >= self.max_pos_off {
            self.max_pos_off = offset + 1;
        }

        let out_of_order = self.counts_out_of_order(arena.packet(&unit));

        arena.make_good(&unit);
        self.entries[pos] = Slot::Available(unit);
        self.count_bytes_in(len);

        trace!(
            "inserted packet {} at {} ({} bytes, ts {})",
            seq_no,
            pos,
            len,
            timestamp
        );

        self.update_nonread_pos(&arena);

        if out_of_order {
            self.num_out_of_order += 1;
            self.on_insert_not_in_order_packet(&arena, pos);
        }

        Ok(())
    }

    /// Extends the readable run from the current first non-read position over
    /// every complete message (or packet, in stream mode) that follows it.
    pub(super) fn update_nonread_pos(&mut self, arena: &UnitArena) {
        while self.nonread_off < self.max_pos_off {
            let end = match self.readable_unit_end(arena, self.nonread_off) {
                Some(end) => end,
                None => break,
            };

            self.nonread_off = end + 1;
        }
    }

    /// Offset of the last packet of the message starting at `off`, if the
    /// message is completely received.
    fn readable_unit_end(&self, arena: &UnitArena, off: usize) -> Option<usize> {
        let first = self.packet_at(arena, self.pos_of(off))?;

        if !self.message_api {
            return Some(off);
        }

        if !first.boundary().is_first() {
            return None;
        }

        for end in off..self.max_pos_off {
            let packet = self.packet_at(arena, self.pos_of(end))?;

            if packet.boundary().is_last() {
                return Some(end);
            }
        }

        None
    }
}
