use super::{MsgCtrl, RcvBuffer, RcvBufferError, Slot};
use crate::unit_queue::UnitArena;
use log::*;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

impl RcvBuffer {
    /// Copies the next readable message into `dst` and releases its packets.
    ///
    /// Messages complete in order are read first, otherwise the first
    /// complete out of order message is read. Nothing is consumed when the
    /// message does not fit into `dst`.
    pub fn read_message(
        &mut self,
        dst: &mut [u8],
        mut ctrl: Option<&mut MsgCtrl>,
    ) -> Result<usize, RcvBufferError> {
        let units = Arc::clone(&self.units);
        let mut arena = units.lock();

        let read_pos = if self.nonread_off > 0 {
            self.start_pos
        } else if let Some(pos) = self.first_readable_out_of_order {
            pos
        } else {
            error!("read_message called without a readable message");
            return Err(RcvBufferError::NothingToRead);
        };

        let message_len = self.message_len(&arena, read_pos);
        if message_len > dst.len() {
            return Err(RcvBufferError::MessageTooLarge(message_len, dst.len()));
        }

        let update_start = read_pos == self.start_pos;
        let tsbpd_enabled = self.tsbpd.is_enabled();

        if let Some(ctrl) = ctrl.as_mut() {
            **ctrl = MsgCtrl::default();
        }

        let mut pos = read_pos;
        let mut copied = 0;

        for _ in 0..self.capacity() {
            let unit = match std::mem::replace(&mut self.entries[pos], Slot::Empty) {
                Slot::Available(unit) => unit,
                other => {
                    self.entries[pos] = other;
                    error!("message at {} ends with a missing packet at {}", read_pos, pos);
                    break;
                }
            };

            let (boundary, seq_no, timestamp) = {
                let packet = arena.packet(&unit);
                let notch = if pos == self.start_pos { self.notch } else { 0 };
                let payload = &packet.payload()[notch.min(packet.len())..];

                dst[copied..copied + payload.len()].copy_from_slice(payload);
                copied += payload.len();
                self.count_bytes_out(1, payload.len());

                if self.num_out_of_order > 0 && !packet.in_order() && !tsbpd_enabled {
                    self.num_out_of_order -= 1;
                }

                if let Some(ctrl) = ctrl.as_mut() {
                    if packet.boundary().is_first() {
                        ctrl.msg_no = Some(packet.msg_no(self.peer_rexmit_flag));
                    }
                }

                (packet.boundary(), packet.seq_no(), packet.timestamp())
            };

            if tsbpd_enabled {
                self.tsbpd.update_wraparound_base(timestamp);
            }

            if self.first_readable_out_of_order == Some(pos) {
                self.first_readable_out_of_order = None;
            }

            Self::release_unit(&mut arena, unit);

            if update_start {
                self.start_seq = seq_no;
                self.advance_start();
            } else {
                self.entries[pos] = Slot::Read;
            }

            if !self.message_api || boundary.is_last() {
                if let Some(ctrl) = ctrl.as_mut() {
                    ctrl.pkt_seq = Some(seq_no);
                    if tsbpd_enabled {
                        ctrl.src_time = Some(self.tsbpd.delivery_time(timestamp));
                    }
                }

                break;
            }

            pos = self.inc_pos(pos, 1);
        }

        trace!("read message of {} bytes from {}", copied, read_pos);

        self.finish_read(&arena);

        Ok(copied)
    }

    /// Bytes of the message starting at `read_pos`, up to its last packet or
    /// the first missing one.
    fn message_len(&self, arena: &UnitArena, read_pos: usize) -> usize {
        let mut len = 0;
        let mut pos = read_pos;

        for _ in 0..self.capacity() {
            let packet = match self.packet_at(arena, pos) {
                Some(packet) => packet,
                None => break,
            };

            let notch = if pos == self.start_pos { self.notch } else { 0 };
            len += packet.len().saturating_sub(notch);

            if !self.message_api || packet.boundary().is_last() {
                break;
            }

            pos = self.inc_pos(pos, 1);
        }

        len
    }

    /// Reads up to `dst.len()` bytes of the in order stream, as of now.
    pub fn read_buffer(&mut self, dst: &mut [u8]) -> Result<usize, RcvBufferError> {
        self.read_buffer_at(dst, Instant::now())
    }

    /// Reads up to `dst.len()` bytes of the in order stream.
    ///
    /// With timestamp based delivery, reading stops at the first packet whose
    /// delivery time is after `now`.
    pub fn read_buffer_at(&mut self, dst: &mut [u8], now: Instant) -> Result<usize, RcvBufferError> {
        let mut written = 0;

        self.read_buffer_with(dst.len(), now, |chunk| {
            dst[written..written + chunk.len()].copy_from_slice(chunk);
            written += chunk.len();
            Ok(())
        })
    }

    /// Writes up to `len` bytes of the in order stream into `writer`.
    pub fn read_buffer_to_writer<W: Write>(
        &mut self,
        writer: &mut W,
        len: usize,
    ) -> Result<usize, RcvBufferError> {
        self.read_buffer_to_writer_at(writer, len, Instant::now())
    }

    pub fn read_buffer_to_writer_at<W: Write>(
        &mut self,
        writer: &mut W,
        len: usize,
        now: Instant,
    ) -> Result<usize, RcvBufferError> {
        self.read_buffer_with(len, now, |chunk| writer.write_all(chunk))
    }

    fn read_buffer_with<F>(
        &mut self,
        len: usize,
        now: Instant,
        mut copy: F,
    ) -> Result<usize, RcvBufferError>
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        let units = Arc::clone(&self.units);
        let mut arena = units.lock();

        let tsbpd_enabled = self.tsbpd.is_enabled();
        let mut remaining = len;

        while self.nonread_off > 0 && remaining > 0 {
            let pos = self.start_pos;

            let (consumed, packet_done, timestamp) = match self.packet_at(&arena, pos) {
                Some(packet) => {
                    if tsbpd_enabled && self.tsbpd.delivery_time(packet.timestamp()) > now {
                        break;
                    }

                    let payload = &packet.payload()[self.notch.min(packet.len())..];
                    let consumed = payload.len().min(remaining);

                    if let Err(err) = copy(&payload[..consumed]) {
                        let read = len - remaining;
                        self.finish_read(&arena);

                        if read == 0 {
                            return Err(RcvBufferError::Io(err));
                        }

                        warn!("stopped reading after {} bytes: {}", read, err);
                        return Ok(read);
                    }

                    (consumed, consumed == payload.len(), packet.timestamp())
                }
                None => {
                    error!("missing packet at {} inside of the readable run", pos);
                    break;
                }
            };

            remaining -= consumed;
            self.count_bytes_out(0, consumed);

            if !packet_done {
                self.notch += consumed;
                break;
            }

            if let Slot::Available(unit) = std::mem::replace(&mut self.entries[pos], Slot::Empty) {
                Self::release_unit(&mut arena, unit);
            }

            if tsbpd_enabled {
                self.tsbpd.update_wraparound_base(timestamp);
            }

            self.count_bytes_out(1, 0);
            self.advance_start();
        }

        self.finish_read(&arena);

        Ok(len - remaining)
    }

    /// Restores the read positions after packets left the buffer.
    fn finish_read(&mut self, arena: &UnitArena) {
        self.release_next_filler_entries();

        if self.nonread_off > self.max_pos_off {
            self.nonread_off = 0;
        }

        self.update_nonread_pos(arena);
        self.refresh_first_readable_out_of_order(arena);
    }
}
