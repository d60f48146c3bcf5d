use super::{MsgNo, PacketBoundary, SeqNo, MSGNO_SEQ_MASK, MSGNO_SEQ_OLD_MASK};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::*;
use std::io::Cursor;
use thiserror::Error;

/// Total packed size of the data packet header in bytes
pub const DATA_PACKET_HEADER_SIZE: usize = 4 + 4 + 4 + 4;

/// Largest value of the 32-bit microsecond timestamp before it wraps to 0
pub const MAX_TIMESTAMP: u32 = u32::MAX;

const CONTROL_BIT: u32 = 0x8000_0000;
const BOUNDARY_SHIFT: u32 = 30;
const IN_ORDER_BIT: u32 = 1 << 29;
const KEY_SHIFT: u32 = 27;
const REXMIT_BIT: u32 = 1 << 26;

#[derive(Debug, PartialEq, Clone, Default)]
pub struct DataPacket {
    /// Index of the packet relative to the initial sequence number of the connection
    seq_no: u32,

    /// Boundary, in-order, key, retransmitted flags and the message number
    msg_word: u32,

    /// Microseconds since the sender's connection start, wraps at u32::MAX
    timestamp: u32,

    dest_socket_id: u32,

    payload: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum PacketParseError {
    #[error("received packet is too small: {0}")]
    BufferTooSmall(usize),
    #[error("received packet is a control packet")]
    NotDataPacket,
}

impl DataPacket {
    /// An empty packet whose payload can hold `payload_size` bytes without reallocating.
    pub fn with_payload_capacity(payload_size: usize) -> DataPacket {
        DataPacket {
            payload: Vec::with_capacity(payload_size),
            ..DataPacket::default()
        }
    }

    pub fn parse(data: &[u8]) -> Result<DataPacket, PacketParseError> {
        let mut packet = DataPacket::default();
        packet.parse_into(data)?;

        Ok(packet)
    }

    /// Decodes a datagram into this packet, reusing the payload allocation.
    pub fn parse_into(&mut self, data: &[u8]) -> Result<(), PacketParseError> {
        if data.len() < DATA_PACKET_HEADER_SIZE {
            trace!("rejecting datagram of {} bytes", data.len());
            return Err(PacketParseError::BufferTooSmall(data.len()));
        }

        let mut cursor = Cursor::new(data);
        let read_word = |cursor: &mut Cursor<&[u8]>| {
            cursor
                .read_u32::<BigEndian>()
                .map_err(|_| PacketParseError::BufferTooSmall(data.len()))
        };

        let seq_word = read_word(&mut cursor)?;

        if seq_word & CONTROL_BIT != 0 {
            trace!("rejecting control packet {:#010x}", seq_word);
            return Err(PacketParseError::NotDataPacket);
        }

        self.seq_no = seq_word;
        self.msg_word = read_word(&mut cursor)?;
        self.timestamp = read_word(&mut cursor)?;
        self.dest_socket_id = read_word(&mut cursor)?;

        self.payload.clear();
        self.payload
            .extend_from_slice(&data[DATA_PACKET_HEADER_SIZE..]);

        Ok(())
    }

    pub fn create(
        seq_no: SeqNo,
        msg_no: MsgNo,
        boundary: PacketBoundary,
        timestamp: u32,
        buff: &[u8],
    ) -> DataPacket {
        DataPacket {
            seq_no: seq_no.value(),
            msg_word: (boundary.bits() << BOUNDARY_SHIFT)
                | IN_ORDER_BIT
                | (msg_no.0 & MSGNO_SEQ_MASK),
            timestamp,
            dest_socket_id: 0,
            payload: buff.to_vec(),
        }
    }

    pub fn with_in_order(mut self, value: bool) -> Self {
        if value {
            self.msg_word |= IN_ORDER_BIT;
        } else {
            self.msg_word &= !IN_ORDER_BIT;
        }

        self
    }

    pub fn with_retransmitted(mut self, value: bool) -> Self {
        if value {
            self.msg_word |= REXMIT_BIT;
        } else {
            self.msg_word &= !REXMIT_BIT;
        }

        self
    }

    pub fn with_dest_socket_id(mut self, value: u32) -> Self {
        self.dest_socket_id = value;

        self
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buff = Vec::with_capacity(DATA_PACKET_HEADER_SIZE + self.payload.len());

        for word in &[
            self.seq_no & !CONTROL_BIT,
            self.msg_word,
            self.timestamp,
            self.dest_socket_id,
        ] {
            // Writing into a Vec cannot fail
            let _ = buff.write_u32::<BigEndian>(*word);
        }

        buff.extend_from_slice(self.payload.as_slice());
        buff
    }

    pub fn seq_no(&self) -> SeqNo {
        SeqNo::from_masked(self.seq_no)
    }

    pub fn boundary(&self) -> PacketBoundary {
        PacketBoundary::from_bits(self.msg_word >> BOUNDARY_SHIFT)
    }

    /// Whether the sender requires the message to be delivered in order.
    pub fn in_order(&self) -> bool {
        self.msg_word & IN_ORDER_BIT != 0
    }

    pub fn key_flags(&self) -> u8 {
        ((self.msg_word >> KEY_SHIFT) & 0b11) as u8
    }

    pub fn is_retransmitted(&self) -> bool {
        self.msg_word & REXMIT_BIT != 0
    }

    /// When the peer does not use the retransmitted flag, bit 26 belongs to the message number.
    pub fn msg_no(&self, peer_rexmit_flag: bool) -> MsgNo {
        if peer_rexmit_flag {
            MsgNo(self.msg_word & MSGNO_SEQ_MASK)
        } else {
            MsgNo(self.msg_word & MSGNO_SEQ_OLD_MASK)
        }
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn dest_socket_id(&self) -> u32 {
        self.dest_socket_id
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
