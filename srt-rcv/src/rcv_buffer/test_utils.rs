use super::*;
use srt_shared::PacketBoundary;

pub(super) fn seq(value: u32) -> SeqNo {
    SeqNo::from_masked(value)
}

pub(super) fn new_buffer(
    capacity: usize,
    message_api: bool,
    init_seq: SeqNo,
) -> (Arc<UnitQueue>, RcvBuffer) {
    let config = RcvConfig::default()
        .with_capacity(capacity)
        .with_message_api(message_api);
    let units = Arc::new(UnitQueue::new(capacity * 2, 64));
    let buffer = RcvBuffer::new(init_seq, &config, Arc::clone(&units));

    (units, buffer)
}

pub(super) fn solo(seq_no: SeqNo, msg_no: u32, payload: &[u8]) -> DataPacket {
    DataPacket::create(seq_no, MsgNo(msg_no), PacketBoundary::Solo, 0, payload)
}

pub(super) fn fragment(
    seq_no: SeqNo,
    msg_no: u32,
    boundary: PacketBoundary,
    payload: &[u8],
) -> DataPacket {
    DataPacket::create(seq_no, MsgNo(msg_no), boundary, 0, payload)
}

pub(super) fn insert(
    units: &UnitQueue,
    buffer: &mut RcvBuffer,
    packet: DataPacket,
) -> Result<(), RcvBufferError> {
    let unit = {
        let mut arena = units.lock();
        let unit = arena.take().expect("unit queue exhausted");
        arena.put(&unit, packet);
        unit
    };

    buffer.insert(unit)
}
