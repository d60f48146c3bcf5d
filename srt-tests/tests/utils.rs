use rand::Rng;
use srt_rcv::{RcvBuffer, RcvBufferError, RcvConfig, Unit, UnitQueue};
use srt_shared::{DataPacket, MsgNo, PacketBoundary, SeqNo};
use std::sync::Arc;

pub fn seq(value: u32) -> SeqNo {
    SeqNo::from_masked(value)
}

pub fn new_buffer(config: &RcvConfig, init_seq: SeqNo) -> (Arc<UnitQueue>, RcvBuffer) {
    let units = Arc::new(UnitQueue::new(config.units(), config.payload_size()));
    let buffer = RcvBuffer::new(init_seq, config, Arc::clone(&units));

    (units, buffer)
}

/// Moves a packet into a unit, going through the wire format like the network path.
pub fn make_unit(units: &UnitQueue, packet: &DataPacket) -> Unit {
    let unit = units.take_unit().expect("unit queue exhausted");
    units.lock().fill(&unit, &packet.to_vec()).unwrap();

    unit
}

pub fn insert(
    units: &UnitQueue,
    buffer: &mut RcvBuffer,
    packet: &DataPacket,
) -> Result<(), RcvBufferError> {
    buffer.insert(make_unit(units, packet))
}

pub fn message_content(msg_no: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (msg_no as u8).wrapping_mul(31).wrapping_add(i as u8)).collect()
}

/// Splits a message into data packets carrying at most `payload_size` bytes each.
pub fn message_packets(
    first_seq: SeqNo,
    msg_no: u32,
    content: &[u8],
    payload_size: usize,
    timestamp: u32,
) -> Vec<DataPacket> {
    let chunks = content.chunks(payload_size).collect::<Vec<_>>();

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let boundary = match (i == 0, i == chunks.len() - 1) {
                (true, true) => PacketBoundary::Solo,
                (true, false) => PacketBoundary::First,
                (false, true) => PacketBoundary::Last,
                (false, false) => PacketBoundary::Middle,
            };

            DataPacket::create(
                first_seq + i as u32,
                MsgNo(msg_no),
                boundary,
                timestamp,
                chunk,
            )
        })
        .collect()
}

/// Generates `count` messages of 1 to `max_packets` packets starting at `first_seq`.
pub fn random_messages(
    first_seq: SeqNo,
    count: u32,
    max_packets: usize,
    payload_size: usize,
) -> Vec<(u32, Vec<u8>, Vec<DataPacket>)> {
    let mut rng = rand::thread_rng();
    let mut seq_no = first_seq;

    (1..=count)
        .map(|msg_no| {
            let len = rng.gen_range(1, payload_size * max_packets + 1);
            let content = message_content(msg_no, len);
            let packets = message_packets(seq_no, msg_no, &content, payload_size, 0);
            seq_no = seq_no + packets.len() as u32;

            (msg_no, content, packets)
        })
        .collect()
}
