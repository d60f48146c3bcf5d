use super::RcvBuffer;
use crate::unit_queue::UnitArena;
use log::*;
use srt_shared::MsgNo;

impl RcvBuffer {
    /// Caches the position of the message the packet at `insert_pos` belongs
    /// to, when that message is now complete.
    pub(super) fn on_insert_not_in_order_packet(&mut self, arena: &UnitArena, insert_pos: usize) {
        if self.num_out_of_order == 0 || self.first_readable_out_of_order.is_some() {
            return;
        }

        let (boundary, msg_no) = match self.packet_at(arena, insert_pos) {
            Some(packet) => (packet.boundary(), packet.msg_no(self.peer_rexmit_flag)),
            None => return,
        };

        let has_last = boundary.is_last()
            || self
                .scan_not_in_order_message_right(arena, insert_pos, msg_no)
                .is_some();

        if !has_last {
            return;
        }

        let first_pos = if boundary.is_first() {
            Some(insert_pos)
        } else {
            self.scan_not_in_order_message_left(arena, insert_pos, msg_no)
        };

        if let Some(first_pos) = first_pos {
            trace!(
                "message {} readable out of order at {}",
                msg_no,
                first_pos
            );
            self.first_readable_out_of_order = Some(first_pos);
        }
    }

    /// Position of the last packet of message `msg_no` at or after `start_pos`.
    fn scan_not_in_order_message_right(
        &self,
        arena: &UnitArena,
        start_pos: usize,
        msg_no: MsgNo,
    ) -> Option<usize> {
        for off in self.off_pos(start_pos) + 1..self.max_pos_off {
            let pos = self.pos_of(off);
            let packet = self.packet_at(arena, pos)?;

            if packet.msg_no(self.peer_rexmit_flag) != msg_no {
                warn!(
                    "message {} interrupted by message {} at {}",
                    msg_no,
                    packet.msg_no(self.peer_rexmit_flag),
                    packet.seq_no()
                );
                return None;
            }

            if packet.boundary().is_last() {
                return Some(pos);
            }
        }

        None
    }

    /// Position of the first packet of message `msg_no` before `start_pos`.
    fn scan_not_in_order_message_left(
        &self,
        arena: &UnitArena,
        start_pos: usize,
        msg_no: MsgNo,
    ) -> Option<usize> {
        let mut pos = start_pos;

        while pos != self.start_pos {
            pos = self.dec_pos(pos);
            let packet = self.packet_at(arena, pos)?;

            if packet.msg_no(self.peer_rexmit_flag) != msg_no {
                warn!(
                    "message {} interrupted by message {} at {}",
                    msg_no,
                    packet.msg_no(self.peer_rexmit_flag),
                    packet.seq_no()
                );
                return None;
            }

            if packet.boundary().is_first() {
                return Some(pos);
            }
        }

        None
    }

    /// Verifies the cached out of order message is still complete and unread.
    pub(super) fn check_first_readable_out_of_order(&self, arena: &UnitArena) -> bool {
        let first_pos = match self.first_readable_out_of_order {
            Some(pos) if self.num_out_of_order > 0 && self.max_pos_off > 0 => pos,
            _ => return false,
        };

        let first_off = self.off_pos(first_pos);
        let mut msg_no = None;

        for off in first_off..self.max_pos_off {
            let packet = match self.packet_at(arena, self.pos_of(off)) {
                Some(packet) => packet,
                None => return false,
            };

            if packet.in_order() {
                return false;
            }

            let packet_msg_no = packet.msg_no(self.peer_rexmit_flag);

            match msg_no {
                None if !packet.boundary().is_first() => return false,
                None => msg_no = Some(packet_msg_no),
                Some(msg_no) if msg_no != packet_msg_no => return false,
                Some(_) => {}
            }

            if packet.boundary().is_last() {
                return true;
            }
        }

        false
    }

    /// Finds the first complete out of order message, when nothing is
    /// readable in order and no message is cached.
    pub(super) fn update_first_readable_out_of_order(&mut self, arena: &UnitArena) {
        if self.nonread_off > 0
            || self.num_out_of_order == 0
            || self.first_readable_out_of_order.is_some()
            || self.max_pos_off == 0
        {
            return;
        }

        let mut remaining = self.num_out_of_order;
        let mut first_pos = None;
        let mut msg_no = None;

        for off in 0..self.max_pos_off {
            if remaining == 0 {
                break;
            }

            let pos = self.pos_of(off);
            let packet = match self.packet_at(arena, pos) {
                Some(packet) if !packet.in_order() => packet,
                _ => {
                    first_pos = None;
                    msg_no = None;
                    continue;
                }
            };

            remaining -= 1;

            let boundary = packet.boundary();
            let packet_msg_no = packet.msg_no(self.peer_rexmit_flag);

            if boundary.is_first() {
                first_pos = Some(pos);
                msg_no = Some(packet_msg_no);
            }

            if msg_no != Some(packet_msg_no) {
                first_pos = None;
                msg_no = None;
                continue;
            }

            if boundary.is_last() {
                if let Some(first_pos) = first_pos {
                    self.first_readable_out_of_order = Some(first_pos);
                    return;
                }
            }
        }
    }

    /// Drops a stale cache entry and searches for the next readable message.
    pub(super) fn refresh_first_readable_out_of_order(&mut self, arena: &UnitArena) {
        if self.tsbpd.is_enabled() || !self.message_api {
            return;
        }

        if !self.check_first_readable_out_of_order(arena) {
            self.first_readable_out_of_order = None;
        }

        self.update_first_readable_out_of_order(arena);
    }
}
