use super::{PacketInfo, RcvBuffer, Slot};
use srt_shared::SeqNo;
use std::fmt::Write;
use std::time::{Duration, Instant};

/// Minimum time between two samples of the average buffer size (40 per second)
const AVG_SAMPLING_PERIOD: Duration = Duration::from_millis(25);

/// Without a sample for this long the average restarts from the next sample
const AVG_RESET_PERIOD: u64 = 1000; // ms

/// Moving average of the buffer fill level, weighted by the time between samples.
#[derive(Debug, Clone, Default)]
pub struct AvgBufSize {
    last_sampling: Option<Instant>,
    pkts: f64,
    bytes: f64,
    timespan_ms: f64,
}

impl AvgBufSize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_time_to_update(&self, now: Instant) -> bool {
        match self.last_sampling {
            Some(last) => now.saturating_duration_since(last) >= AVG_SAMPLING_PERIOD,
            None => true,
        }
    }

    pub fn update(&mut self, now: Instant, pkts: usize, bytes: usize, timespan_ms: u64) {
        let elapsed_ms = self
            .last_sampling
            .map(|last| now.saturating_duration_since(last).as_millis() as u64);
        self.last_sampling = Some(now);

        let elapsed_ms = match elapsed_ms {
            Some(elapsed_ms) if elapsed_ms <= AVG_RESET_PERIOD => elapsed_ms as f64,
            _ => {
                self.pkts = pkts as f64;
                self.bytes = bytes as f64;
                self.timespan_ms = timespan_ms as f64;
                return;
            }
        };

        let avg = |old: f64, new: f64| {
            (old * (AVG_RESET_PERIOD as f64 - elapsed_ms) + new * elapsed_ms)
                / AVG_RESET_PERIOD as f64
        };

        self.pkts = avg(self.pkts, pkts as f64);
        self.bytes = avg(self.bytes, bytes as f64);
        self.timespan_ms = avg(self.timespan_ms, timespan_ms as f64);
    }

    pub fn pkts(&self) -> f64 {
        self.pkts
    }

    pub fn bytes(&self) -> f64 {
        self.bytes
    }

    pub fn timespan_ms(&self) -> f64 {
        self.timespan_ms
    }
}

impl RcvBuffer {
    /// Whether a message (or packet, in stream mode) can be read, ignoring delivery time.
    pub fn has_available_packets(&self) -> bool {
        self.nonread_off > 0
            || (self.num_out_of_order > 0 && self.first_readable_out_of_order.is_some())
    }

    /// Whether data can be read at `now`, honouring the delivery time of the
    /// next in order packet when timestamp based delivery is enabled.
    pub fn is_ready(&self, now: Instant) -> bool {
        if !self.tsbpd.is_enabled() {
            return self.has_available_packets();
        }

        if self.nonread_off == 0 {
            return false;
        }

        match self.first_valid_packet_info() {
            Some(PacketInfo {
                tsbpd_time: Some(time),
                ..
            }) => time <= now,
            _ => false,
        }
    }

    /// The first packet present in the buffer, which may follow missing packets.
    pub fn first_valid_packet_info(&self) -> Option<PacketInfo> {
        let arena = self.units.lock();
        let tsbpd_enabled = self.tsbpd.is_enabled();

        (0..self.max_pos_off).find_map(|off| {
            let pos = self.pos_of(off);
            let packet = self.packet_at(&arena, pos)?;

            Some(PacketInfo {
                seq_no: packet.seq_no(),
                seq_gap: pos != self.start_pos,
                tsbpd_time: if tsbpd_enabled {
                    Some(self.tsbpd.delivery_time(packet.timestamp()))
                } else {
                    None
                },
            })
        })
    }

    /// The packet `read_message` would return next, if it is readable at `now`.
    ///
    /// Without timestamp based delivery, `seq_gap` is set when the packet
    /// belongs to an out of order message.
    pub fn first_readable_packet_info(&self, now: Instant) -> Option<PacketInfo> {
        if !self.tsbpd.is_enabled() {
            let (pos, seq_gap) = if self.nonread_off > 0 {
                (self.start_pos, false)
            } else {
                (self.first_readable_out_of_order?, true)
            };

            let arena = self.units.lock();
            let packet = self.packet_at(&arena, pos)?;

            return Some(PacketInfo {
                seq_no: packet.seq_no(),
                seq_gap,
                tsbpd_time: None,
            });
        }

        if self.nonread_off == 0 {
            return None;
        }

        self.first_valid_packet_info()
            .filter(|info| info.tsbpd_time.map_or(false, |time| time <= now))
    }

    /// Number of packets in the contiguous readable run from the window start
    pub fn count_readable(&self) -> usize {
        self.nonread_off
    }

    /// Number of packets held in the buffer
    pub fn data_size(&self) -> usize {
        self.pkts_count
    }

    /// Packets and bytes held in the buffer and the time span they cover
    pub fn data_size_stats(&self) -> (usize, usize, u64) {
        (self.pkts_count, self.bytes_count, self.timespan_ms())
    }

    /// Milliseconds between the delivery times of the first and the last
    /// buffered packet, plus one for the duration of a packet.
    /// Zero without timestamp based delivery.
    pub fn timespan_ms(&self) -> u64 {
        if !self.tsbpd.is_enabled() || self.max_pos_off == 0 {
            return 0;
        }

        let arena = self.units.lock();

        let first = (0..self.max_pos_off).find_map(|off| self.packet_at(&arena, self.pos_of(off)));
        let last = (0..self.max_pos_off)
            .rev()
            .find_map(|off| self.packet_at(&arena, self.pos_of(off)));

        let (first, last) = match (first, last) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0,
        };

        let start = self.tsbpd.delivery_time(first.timestamp());
        let end = self.tsbpd.delivery_time(last.timestamp());

        if end < start {
            return 0;
        }

        (end - start).as_millis() as u64 + 1
    }

    /// Inclusive range of sequence numbers the buffer can accept
    pub fn available_range(&self) -> (SeqNo, SeqNo) {
        (self.start_seq, self.start_seq + (self.capacity() as u32 - 1))
    }

    /// Free space in packets, not counting packets acknowledged up to
    /// `first_unack` which are still waiting to be read.
    pub fn avail_size(&self, first_unack: SeqNo) -> usize {
        let acked = self.start_seq.offset_to(first_unack);

        if acked <= 0 {
            return self.capacity();
        }

        self.capacity().saturating_sub(acked as usize)
    }

    /// First run of missing packets at or after `from`, as an inclusive range.
    pub fn first_loss_range(&self, from: SeqNo) -> Option<(SeqNo, SeqNo)> {
        let from_off = self.start_seq.offset_to(from);

        if from_off < 0 || from_off as usize >= self.max_pos_off {
            return None;
        }

        let is_empty = |off: usize| match self.entries[self.pos_of(off)] {
            Slot::Empty => true,
            _ => false,
        };

        let first = (from_off as usize..self.max_pos_off).find(|off| is_empty(*off))?;
        let last = (first..self.max_pos_off)
            .take_while(|off| is_empty(*off))
            .last()
            .unwrap_or(first);

        Some((
            self.start_seq + first as u32,
            self.start_seq + last as u32,
        ))
    }

    pub fn avg_payload_size(&self) -> usize {
        self.avg_payload_size
    }

    /// Samples the buffer fill level into the moving average, at most every 25ms.
    pub fn update_avg_data_size(&mut self, now: Instant) {
        if !self.avg_data_size.is_time_to_update(now) {
            return;
        }

        let (pkts, bytes, timespan_ms) = self.data_size_stats();
        self.avg_data_size.update(now, pkts, bytes, timespan_ms);
    }

    pub fn avg_data_size(&self) -> &AvgBufSize {
        &self.avg_data_size
    }

    /// One line summary of the buffer state for diagnostics.
    pub fn fullness_state(&self, first_unack: SeqNo, now: Instant) -> String {
        let mut state = format!(
            "first unack {} start {} at {} span {}. Space avail {}/{} pkts. ",
            first_unack,
            self.start_seq,
            self.start_pos,
            self.max_pos_off,
            self.avail_size(first_unack),
            self.capacity()
        );

        if self.tsbpd.is_enabled() && self.max_pos_off > 0 {
            state.push_str("(TSBPD ready in ");

            match self.first_valid_packet_info().and_then(|info| info.tsbpd_time) {
                Some(time) => {
                    let _ = write!(state, "{}ms", signed_millis(time, now));

                    let arena = self.units.lock();
                    if let Some(last) = self.packet_at(&arena, self.pos_of(self.max_pos_off - 1)) {
                        let end = self.tsbpd.delivery_time(last.timestamp());
                        let _ = write!(state, ", timespan {}ms", signed_millis(end, time));
                    }
                }
                None => state.push_str("n/a"),
            }

            state.push_str("). ");
        }

        let _ = write!(state, "drift {}ms.", self.tsbpd.drift() / 1000);

        state
    }
}

fn signed_millis(later: Instant, earlier: Instant) -> i64 {
    crate::tsbpd::signed_micros(later, earlier) / 1000
}
