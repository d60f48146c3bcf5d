mod drop;
mod insert;
mod out_of_order;
mod read;
mod stats;
#[cfg(test)]
mod test_utils;

pub use stats::*;

use super::tsbpd::TsbpdTime;
use super::unit_queue::{Unit, UnitArena, UnitQueue};
use super::RcvConfig;
use log::*;
use srt_shared::{DataPacket, MsgNo, SeqNo};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Payload size assumed before any packet was received (live mode default)
const DEFAULT_AVG_PAYLOAD_SIZE: usize = 1316;

#[derive(Error, Debug)]
pub enum RcvBufferError {
    #[error("packet {0} is before the buffer window starting at {1}")]
    BeforeWindow(SeqNo, SeqNo),
    #[error("packet {0} is beyond the buffer capacity of {1} packets starting at {2}")]
    BeyondCapacity(SeqNo, usize, SeqNo),
    #[error("packet {0} has already been received")]
    Duplicate(SeqNo),
    #[error("no packets are ready to be read")]
    NothingToRead,
    #[error("message of {0} bytes does not fit into a buffer of {1} bytes")]
    MessageTooLarge(usize, usize),
    #[error("failed to write received bytes: {0}")]
    Io(#[from] std::io::Error),
    /// The unit belongs to another unit queue and is handed back untouched
    #[error("unit was not taken from the unit queue of this buffer")]
    ForeignUnit(Unit),
}

/// A cell of the receive buffer.
///
/// Only `Available` slots own a unit. `Read` and `Dropped` slots keep their
/// position occupied until the window start sweeps past them.
#[derive(Debug)]
enum Slot {
    Empty,
    Available(Unit),
    Read,
    Dropped,
}

/// What `drop_message` does with solo packets which are already in the buffer
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum DropAction {
    DropExisting,
    KeepExisting,
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub struct PacketInfo {
    pub seq_no: SeqNo,

    /// Whether missing packets precede this one
    pub seq_gap: bool,

    /// Delivery time, when timestamp based delivery is enabled
    pub tsbpd_time: Option<Instant>,
}

/// Details of the last message returned by `read_message`
#[derive(Debug, PartialEq, Clone, Default)]
pub struct MsgCtrl {
    pub msg_no: Option<MsgNo>,
    pub pkt_seq: Option<SeqNo>,
    pub src_time: Option<Instant>,
}

/// Circular receive buffer reassembling data packets by sequence number.
///
/// The buffer does not lock internally. Insertion (network path) and the
/// read/drop family (application path) must be serialised by the owner,
/// e.g. by a single `Mutex` around the buffer.
#[derive(Debug)]
pub struct RcvBuffer {
    entries: Vec<Slot>,
    units: Arc<UnitQueue>,

    /// Sequence number of the packet at `start_pos`
    start_seq: SeqNo,
    start_pos: usize,

    /// One past the furthest offset from `start_pos` which may hold a packet
    max_pos_off: usize,

    /// Offset from `start_pos` of the first slot outside of the contiguous run of
    /// complete, readable packets
    nonread_off: usize,

    /// Bytes of the packet at `start_pos` already consumed by stream reads
    notch: usize,

    num_out_of_order: usize,
    first_readable_out_of_order: Option<usize>,

    peer_rexmit_flag: bool,
    message_api: bool,

    bytes_count: usize,
    pkts_count: usize,
    avg_payload_size: usize,
    avg_data_size: AvgBufSize,

    tsbpd: Arc<TsbpdTime>,
}

impl RcvBuffer {
    pub fn new(init_seq: SeqNo, config: &RcvConfig, units: Arc<UnitQueue>) -> Self {
        let tsbpd = TsbpdTime::new(config.drift_max_samples(), config.drift_max_value_us());

        Self::with_tsbpd_time(init_seq, config, units, tsbpd)
    }

    /// Creates a buffer using a preconfigured clock/drift tracker (e.g. with a drift sink).
    pub fn with_tsbpd_time(
        init_seq: SeqNo,
        config: &RcvConfig,
        units: Arc<UnitQueue>,
        tsbpd: TsbpdTime,
    ) -> Self {
        let capacity = config.capacity().max(1);

        debug!(
            "receive buffer of {} packets starting at {}",
            capacity, init_seq
        );

        Self {
            entries: (0..capacity).map(|_| Slot::Empty).collect(),
            units,
            start_seq: init_seq,
            start_pos: 0,
            max_pos_off: 0,
            nonread_off: 0,
            notch: 0,
            num_out_of_order: 0,
            first_readable_out_of_order: None,
            peer_rexmit_flag: config.peer_rexmit_flag(),
            message_api: config.message_api(),
            bytes_count: 0,
            pkts_count: 0,
            avg_payload_size: DEFAULT_AVG_PAYLOAD_SIZE,
            avg_data_size: AvgBufSize::new(),
            tsbpd: Arc::new(tsbpd),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn start_seq(&self) -> SeqNo {
        self.start_seq
    }

    pub fn start_pos(&self) -> usize {
        self.start_pos
    }

    pub fn first_nonread_pos(&self) -> usize {
        self.inc_pos(self.start_pos, self.nonread_off)
    }

    /// Number of slots from the window start which may contain a packet
    pub fn occupied_span(&self) -> usize {
        self.max_pos_off
    }

    pub fn first_readable_out_of_order(&self) -> Option<usize> {
        self.first_readable_out_of_order
    }

    pub fn set_peer_rexmit_flag(&mut self, value: bool) {
        self.peer_rexmit_flag = value;
    }

    pub fn tsbpd(&self) -> &Arc<TsbpdTime> {
        &self.tsbpd
    }

    pub fn set_tsbpd_mode(&self, time_base: Instant, wrap_check: bool, delay: Duration) {
        self.tsbpd.set_mode(time_base, wrap_check, delay);
    }

    pub fn apply_group_time(
        &self,
        time_base: Instant,
        wrap_check: bool,
        delay: Duration,
        drift_us: i64,
    ) {
        self.tsbpd
            .apply_external_time(time_base, wrap_check, delay, drift_us);
    }

    pub fn apply_group_drift(&self, time_base: Instant, wrap_check: bool, drift_us: i64) {
        self.tsbpd
            .apply_external_drift(time_base, wrap_check, drift_us);
    }

    pub fn add_drift_sample(&self, timestamp: u32, arrival: Instant, rtt_us: i64) -> bool {
        self.tsbpd.add_drift_sample(timestamp, arrival, rtt_us)
    }

    pub fn pkt_delivery_time(&self, timestamp: u32) -> Instant {
        self.tsbpd.delivery_time(timestamp)
    }

    fn inc_pos(&self, pos: usize, inc: usize) -> usize {
        (pos + inc) % self.capacity()
    }

    fn dec_pos(&self, pos: usize) -> usize {
        if pos == 0 {
            self.capacity() - 1
        } else {
            pos - 1
        }
    }

    /// Offset of `pos` from the window start
    fn off_pos(&self, pos: usize) -> usize {
        (pos + self.capacity() - self.start_pos) % self.capacity()
    }

    fn pos_of(&self, off: usize) -> usize {
        self.inc_pos(self.start_pos, off)
    }

    fn packet_at<'a>(&self, arena: &'a UnitArena, pos: usize) -> Option<&'a DataPacket> {
        match &self.entries[pos] {
            Slot::Available(unit) => Some(arena.packet(unit)),
            _ => None,
        }
    }

    /// Whether a packet is accounted as deliverable out of order.
    fn counts_out_of_order(&self, packet: &DataPacket) -> bool {
        self.message_api && !packet.in_order() && !self.tsbpd.is_enabled()
    }

    fn release_unit(arena: &mut UnitArena, unit: Unit) {
        if let Err(err) = arena.release(unit) {
            error!("failed to return unit to the unit queue: {}", err);
        }
    }

    /// Removes the packet from the window accounting, counting bytes and packets out.
    fn count_bytes_out(&mut self, pkts: usize, bytes: usize) {
        self.pkts_count = self.pkts_count.saturating_sub(pkts);
        self.bytes_count = self.bytes_count.saturating_sub(bytes);
    }

    fn count_bytes_in(&mut self, bytes: usize) {
        self.pkts_count += 1;
        self.bytes_count += bytes;
        // IIR filter over 100 packets
        self.avg_payload_size = (self.avg_payload_size * 99 + bytes) / 100;
    }

    /// Advances the window start by one slot, which must already be empty.
    fn advance_start(&mut self) {
        self.start_pos = self.inc_pos(self.start_pos, 1);
        self.start_seq = self.start_seq.inc();
        self.max_pos_off = self.max_pos_off.saturating_sub(1);
        self.nonread_off = self.nonread_off.saturating_sub(1);
        self.notch = 0;
    }

    /// Releases the contiguous `Read`/`Dropped` slots at the window start,
    /// returns the number of slots the window advanced.
    pub(crate) fn release_next_filler_entries(&mut self) -> usize {
        let mut released = 0;

        while let Slot::Read | Slot::Dropped = self.entries[self.start_pos] {
            self.entries[self.start_pos] = Slot::Empty;
            self.advance_start();
            released += 1;

            if released == self.capacity() {
                break;
            }
        }

        if released > 0 {
            trace!(
                "released {} filler slots, window starts at {}",
                released,
                self.start_seq
            );
        }

        released
    }
}

impl Drop for RcvBuffer {
    fn drop(&mut self) {
        let units = Arc::clone(&self.units);
        let mut arena = units.lock();

        for slot in self.entries.iter_mut() {
            if let Slot::Available(unit) = std::mem::replace(slot, Slot::Empty) {
                Self::release_unit(&mut arena, unit);
            }
        }
    }
}
