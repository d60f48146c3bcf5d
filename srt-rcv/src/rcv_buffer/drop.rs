use super::{DropAction, RcvBuffer, Slot};
use crate::unit_queue::UnitArena;
use log::*;
use srt_shared::{MsgNo, PacketBoundary, SeqNo};
use std::sync::Arc;

impl RcvBuffer {
    /// Releases the unit stored at `pos`, leaving the slot `Empty`.
    /// Returns false if the slot did not hold a packet.
    fn drop_unit_in_pos(&mut self, arena: &mut UnitArena, pos: usize) -> bool {
        let unit = match std::mem::replace(&mut self.entries[pos], Slot::Empty) {
            Slot::Available(unit) => unit,
            other => {
                self.entries[pos] = other;
                return false;
            }
        };

        let (len, timestamp, out_of_order) = {
            let packet = arena.packet(&unit);
            (
                packet.len(),
                packet.timestamp(),
                self.message_api && !packet.in_order(),
            )
        };

        if self.tsbpd.is_enabled() {
            self.tsbpd.update_wraparound_base(timestamp);
        } else if out_of_order && self.num_out_of_order > 0 {
            self.num_out_of_order -= 1;

            if self.first_readable_out_of_order == Some(pos) {
                self.first_readable_out_of_order = None;
            }
        }

        let notch = if pos == self.start_pos { self.notch } else { 0 };
        self.count_bytes_out(1, len.saturating_sub(notch));

        Self::release_unit(arena, unit);

        true
    }

    /// Discards every packet before `seq_no` and moves the window start to it.
    /// Returns the number of slots the window advanced.
    pub fn drop_up_to(&mut self, seq_no: SeqNo) -> usize {
        let len = self.start_seq.offset_to(seq_no);

        if len <= 0 {
            debug!(
                "nothing to drop up to {}, window starts at {}",
                seq_no, self.start_seq
            );
            return 0;
        }

        let len = len as usize;
        let units = Arc::clone(&self.units);
        let mut arena = units.lock();

        let steps = len.min(self.capacity());
        for _ in 0..steps {
            let pos = self.start_pos;

            if self.drop_unit_in_pos(&mut arena, pos) {
                trace!("dropped packet at {} ({})", pos, self.start_seq);
            }

            self.entries[pos] = Slot::Empty;
            self.start_pos = self.inc_pos(pos, 1);
            self.notch = 0;
        }

        if len > steps {
            self.start_pos = self.inc_pos(self.start_pos, len - steps);
        }

        self.start_seq = seq_no;
        self.max_pos_off = self.max_pos_off.saturating_sub(len);
        self.nonread_off = 0;

        self.release_next_filler_entries();
        self.update_nonread_pos(&arena);
        self.refresh_first_readable_out_of_order(&arena);

        debug!("dropped {} slots, window starts at {}", len, self.start_seq);

        len
    }

    /// Discards the packets of a message, given by its sequence range and/or
    /// message number. Every slot of the range becomes a `Dropped` placeholder,
    /// received or not, until the window passes it.
    /// Returns the number of packets released.
    pub fn drop_message(
        &mut self,
        seq_lo: SeqNo,
        seq_hi: SeqNo,
        msg_no: Option<MsgNo>,
        action: DropAction,
    ) -> usize {
        let units = Arc::clone(&self.units);
        let mut arena = units.lock();

        let keep_existing = action == DropAction::KeepExisting;
        let off_lo = self.start_seq.offset_to(seq_lo);
        let off_hi = self.start_seq.offset_to(seq_hi);

        let mut dropped = 0;
        let mut min_dropped_off: Option<usize> = None;

        if off_hi >= 0 {
            let start_off = off_lo.max(0) as usize;
            let end_off = (off_hi as usize + 1).min(self.capacity());

            for off in start_off..end_off {
                let pos = self.pos_of(off);

                if let Slot::Dropped = self.entries[pos] {
                    continue;
                }

                if let Some(packet) = self.packet_at(&arena, pos) {
                    if keep_existing && packet.boundary() == PacketBoundary::Solo {
                        trace!("keeping solo packet {} while dropping", packet.seq_no());
                        continue;
                    }

                    if let Some(msg_no) = msg_no {
                        let packet_msg_no = packet.msg_no(self.peer_rexmit_flag);

                        if packet_msg_no != msg_no {
                            warn!(
                                "dropping packet {} of message {} while dropping message {}",
                                packet.seq_no(),
                                packet_msg_no,
                                msg_no
                            );
                        }
                    }
                }

                if self.drop_unit_in_pos(&mut arena, pos) {
                    dropped += 1;
                }

                self.entries[pos] = Slot::Dropped;
                min_dropped_off = Some(min_dropped_off.map_or(off, |min| min.min(off)));
            }

            if end_off > self.max_pos_off {
                self.max_pos_off = end_off;
            }
        }

        if let Some(msg_no) = msg_no {
            for off in 0..self.max_pos_off {
                let pos = self.pos_of(off);

                let matches = match self.packet_at(&arena, pos) {
                    Some(packet) => {
                        packet.msg_no(self.peer_rexmit_flag) == msg_no
                            && !(keep_existing && packet.boundary() == PacketBoundary::Solo)
                    }
                    None => false,
                };

                if !matches {
                    continue;
                }

                if self.drop_unit_in_pos(&mut arena, pos) {
                    dropped += 1;
                }

                self.entries[pos] = Slot::Dropped;
                min_dropped_off = Some(min_dropped_off.map_or(off, |min| min.min(off)));
            }
        }

        debug!(
            "dropped {} packets of message {:?} ({} - {})",
            dropped, msg_no, seq_lo, seq_hi
        );

        let broke_readable_run = min_dropped_off.map_or(false, |off| off <= self.nonread_off);

        self.release_next_filler_entries();

        if broke_readable_run {
            self.nonread_off = 0;
            self.update_nonread_pos(&arena);
        }

        self.refresh_first_readable_out_of_order(&arena);

        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;

    #[test]
    fn test_drop_up_to_empty_buffer() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        assert_eq!(buffer.drop_up_to(seq(5)), 5);
        assert_eq!(buffer.start_seq(), seq(5));
        assert_eq!(buffer.start_pos(), 5);
        assert_eq!(buffer.occupied_span(), 0);

        insert(&units, &mut buffer, solo(seq(5), 1, &[1])).unwrap();
        assert_eq!(buffer.has_available_packets(), true);

        match insert(&units, &mut buffer, solo(seq(2), 1, &[1])) {
            Err(super::super::RcvBufferError::BeforeWindow(_, _)) => {}
            res => panic!("expected before window error: {:?}", res),
        }
    }

    #[test]
    fn test_drop_up_to_releases_units() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        for i in 0..4 {
            insert(&units, &mut buffer, solo(seq(i), i, &[1, 2])).unwrap();
        }

        assert_eq!(buffer.drop_up_to(seq(3)), 3);
        assert_eq!(units.in_use(), 1);
        assert_eq!(buffer.data_size(), 1);
        assert_eq!(buffer.occupied_span(), 1);
        assert_eq!(buffer.first_nonread_pos(), 4);
    }

    #[test]
    fn test_drop_up_to_behind_window_is_noop() {
        let (_units, mut buffer) = new_buffer(8, true, seq(10));

        assert_eq!(buffer.drop_up_to(seq(10)), 0);
        assert_eq!(buffer.drop_up_to(seq(5)), 0);
        assert_eq!(buffer.start_seq(), seq(10));
    }

    #[test]
    fn test_drop_up_to_beyond_capacity() {
        let (units, mut buffer) = new_buffer(4, true, seq(0));

        insert(&units, &mut buffer, solo(seq(1), 1, &[1])).unwrap();

        assert_eq!(buffer.drop_up_to(seq(10)), 10);
        assert_eq!(buffer.start_seq(), seq(10));
        assert_eq!(buffer.start_pos(), 2);
        assert_eq!(buffer.occupied_span(), 0);
        assert_eq!(units.in_use(), 0);
    }

    #[test]
    fn test_drop_up_to_makes_following_packets_readable() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, solo(seq(2), 1, &[1])).unwrap();
        insert(&units, &mut buffer, solo(seq(3), 2, &[1])).unwrap();
        assert_eq!(buffer.has_available_packets(), false);

        buffer.drop_up_to(seq(2));
        assert_eq!(buffer.has_available_packets(), true);
        assert_eq!(buffer.count_readable(), 2);
    }

    #[test]
    fn test_drop_message_by_range() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, fragment(seq(0), 1, PacketBoundary::First, &[1])).unwrap();
        insert(&units, &mut buffer, fragment(seq(2), 1, PacketBoundary::Last, &[1])).unwrap();
        insert(&units, &mut buffer, solo(seq(3), 2, &[1])).unwrap();

        // Slot 1 was never received, it is skipped but not counted
        assert_eq!(buffer.drop_message(seq(0), seq(2), None, DropAction::DropExisting), 2);

        assert_eq!(buffer.start_seq(), seq(3));
        assert_eq!(buffer.count_readable(), 1);
        assert_eq!(units.in_use(), 1);
    }

    #[test]
    fn test_drop_message_keeps_hole_placeholders() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, solo(seq(0), 1, &[1])).unwrap();
        insert(&units, &mut buffer, solo(seq(5), 3, &[1])).unwrap();

        assert_eq!(buffer.drop_message(seq(2), seq(3), None, DropAction::DropExisting), 0);

        // Dropped slots end the readable run until the window passes them
        insert(&units, &mut buffer, solo(seq(1), 1, &[1])).unwrap();
        insert(&units, &mut buffer, solo(seq(4), 2, &[1])).unwrap();

        match insert(&units, &mut buffer, solo(seq(2), 2, &[1])) {
            Err(super::super::RcvBufferError::Duplicate(_)) => {}
            res => panic!("expected duplicate error: {:?}", res),
        }

        assert_eq!(buffer.count_readable(), 2);
    }

    #[test]
    fn test_drop_message_by_msg_no() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, fragment(seq(1), 7, PacketBoundary::First, &[1])).unwrap();
        insert(&units, &mut buffer, fragment(seq(2), 7, PacketBoundary::Middle, &[1])).unwrap();
        insert(&units, &mut buffer, solo(seq(4), 8, &[1])).unwrap();

        let dropped = buffer.drop_message(seq(1), seq(1), Some(MsgNo(7)), DropAction::DropExisting);

        assert_eq!(dropped, 2);
        assert_eq!(units.in_use(), 1);
    }

    #[test]
    fn test_drop_message_keep_existing_solo() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, solo(seq(1), 1, &[1])).unwrap();

        assert_eq!(buffer.drop_message(seq(0), seq(2), None, DropAction::KeepExisting), 0);
        assert_eq!(units.in_use(), 1);

        // The dropped slot 0 was released, the solo packet is readable
        assert_eq!(buffer.start_seq(), seq(1));
        assert_eq!(buffer.count_readable(), 1);
    }

    #[test]
    fn test_drop_message_counts_only_received_packets() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, solo(seq(5), 1, &[1])).unwrap();

        assert_eq!(buffer.drop_message(seq(0), seq(3), None, DropAction::DropExisting), 0);
        assert_eq!(units.in_use(), 1);

        // The empty slots were skipped, the window moved past them
        assert_eq!(buffer.start_seq(), seq(4));
        assert_eq!(buffer.data_size(), 1);

        insert(&units, &mut buffer, solo(seq(4), 2, &[1])).unwrap();
        assert_eq!(buffer.drop_message(seq(4), seq(5), None, DropAction::DropExisting), 2);
        assert_eq!(units.in_use(), 0);
    }

    #[test]
    fn test_drop_message_before_window() {
        let (_units, mut buffer) = new_buffer(8, true, seq(10));

        assert_eq!(buffer.drop_message(seq(2), seq(5), None, DropAction::DropExisting), 0);
        assert_eq!(buffer.start_seq(), seq(10));
    }

    #[test]
    fn test_drop_message_clears_out_of_order_cache() {
        let (units, mut buffer) = new_buffer(8, true, seq(0));

        insert(&units, &mut buffer, solo(seq(3), 1, &[1]).with_in_order(false)).unwrap();
        assert_eq!(buffer.first_readable_out_of_order(), Some(3));

        buffer.drop_message(seq(3), seq(3), Some(MsgNo(1)), DropAction::DropExisting);

        assert_eq!(buffer.first_readable_out_of_order(), None);
        assert_eq!(buffer.has_available_packets(), false);
        assert_eq!(units.in_use(), 0);
    }
}
