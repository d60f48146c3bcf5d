use super::utils::*;
use rand::seq::SliceRandom;
use rand::Rng;
use srt_rcv::{DropAction, MsgCtrl, RcvConfig};
use srt_shared::{DataPacket, MsgNo, SeqNo};

const PAYLOAD_SIZE: usize = 16;

fn config(capacity: usize, message_api: bool) -> RcvConfig {
    RcvConfig::default()
        .with_capacity(capacity)
        .with_message_api(message_api)
        .with_payload_size(PAYLOAD_SIZE)
        .with_tsbpd_delay(None)
}

fn total_packets(messages: &[(u32, Vec<u8>, Vec<DataPacket>)]) -> u32 {
    messages.iter().map(|(_, _, packets)| packets.len() as u32).sum()
}

#[test]
fn test_any_arrival_order_delivers_every_message_in_order() {
    crate::setup();

    for init_seq in [0, 0x7FFF_FFF0].iter() {
        let init_seq = seq(*init_seq);
        let config = config(512, true);
        let (units, mut buffer) = new_buffer(&config, init_seq);

        let messages = random_messages(init_seq, 100, 4, PAYLOAD_SIZE);
        let mut packets = messages
            .iter()
            .flat_map(|(_, _, packets)| packets.iter().cloned())
            .collect::<Vec<_>>();
        packets.shuffle(&mut rand::thread_rng());

        for packet in packets.iter() {
            insert(&units, &mut buffer, packet).unwrap();
        }

        assert_eq!(buffer.count_readable(), packets.len());

        let mut dst = vec![0u8; PAYLOAD_SIZE * 4];
        for (msg_no, content, _) in messages.iter() {
            let mut ctrl = MsgCtrl::default();
            let read = buffer.read_message(&mut dst, Some(&mut ctrl)).unwrap();

            assert_eq!(&dst[..read], content.as_slice());
            assert_eq!(ctrl.msg_no, Some(MsgNo(*msg_no)));
        }

        assert_eq!(buffer.has_available_packets(), false);
        assert_eq!(buffer.start_seq(), init_seq + total_packets(&messages));
        assert_eq!(units.in_use(), 0);
    }
}

#[test]
fn test_duplicates_are_rejected_and_released() {
    crate::setup();

    let config = config(64, true);
    let (units, mut buffer) = new_buffer(&config, seq(0));
    let messages = random_messages(seq(0), 10, 3, PAYLOAD_SIZE);

    let mut rng = rand::thread_rng();
    let mut duplicates = 0;

    for (_, _, packets) in messages.iter() {
        for packet in packets.iter() {
            insert(&units, &mut buffer, packet).unwrap();

            if rng.gen_bool(0.5) {
                assert!(insert(&units, &mut buffer, packet).is_err());
                duplicates += 1;
            }
        }
    }

    assert_eq!(buffer.data_size() as u32, total_packets(&messages));
    assert_eq!(units.in_use() as u32, total_packets(&messages));
    assert!(duplicates <= total_packets(&messages));
}

#[test]
fn test_lost_packets_are_skipped_with_drop_up_to() {
    crate::setup();

    let config = config(256, true);
    let (units, mut buffer) = new_buffer(&config, seq(100));
    let messages = random_messages(seq(100), 51, 3, PAYLOAD_SIZE);

    // Every fifth message loses its first packet, the last message is complete
    let mut delivered = vec![];
    for (msg_no, content, packets) in messages.iter() {
        for (i, packet) in packets.iter().enumerate() {
            if msg_no % 5 == 0 && i == 0 {
                continue;
            }

            insert(&units, &mut buffer, packet).unwrap();
        }

        if msg_no % 5 != 0 {
            delivered.push(content.clone());
        }
    }

    let mut received = vec![];
    let mut dst = vec![0u8; PAYLOAD_SIZE * 3];

    while buffer.data_size() > 0 {
        if buffer.has_available_packets() {
            let read = buffer.read_message(&mut dst, None).unwrap();
            received.push(dst[..read].to_vec());
            continue;
        }

        let info = buffer.first_valid_packet_info().unwrap();
        let skip_to: SeqNo = if info.seq_gap {
            info.seq_no
        } else {
            info.seq_no + 1
        };

        assert!(buffer.drop_up_to(skip_to) > 0);
    }

    assert_eq!(received, delivered);
    assert_eq!(buffer.start_seq(), seq(100) + total_packets(&messages));
    assert_eq!(units.in_use(), 0);
}

#[test]
fn test_out_of_order_messages_are_read_early() {
    crate::setup();

    let config = config(128, true);
    let (units, mut buffer) = new_buffer(&config, seq(0));
    let messages = random_messages(seq(0), 8, 3, PAYLOAD_SIZE);

    // The first message is lost entirely, the rest is delivered as soon as complete
    for (_, _, packets) in messages.iter().skip(1) {
        for packet in packets.iter() {
            insert(&units, &mut buffer, &packet.clone().with_in_order(false)).unwrap();
        }
    }

    let mut dst = vec![0u8; PAYLOAD_SIZE * 3];
    for (msg_no, content, _) in messages.iter().skip(1) {
        assert_eq!(buffer.has_available_packets(), true);

        let mut ctrl = MsgCtrl::default();
        let read = buffer.read_message(&mut dst, Some(&mut ctrl)).unwrap();

        assert_eq!(ctrl.msg_no, Some(MsgNo(*msg_no)));
        assert_eq!(&dst[..read], content.as_slice());
    }

    assert_eq!(buffer.has_available_packets(), false);
    assert_eq!(buffer.start_seq(), seq(0));
    assert_eq!(units.in_use(), 0);

    // Dropping the lost message releases the slots which were read out of order
    let (_, _, lost) = &messages[0];
    let lo = lost[0].seq_no();
    let hi = lost[lost.len() - 1].seq_no();

    buffer.drop_message(lo, hi, Some(MsgNo(1)), DropAction::DropExisting);

    assert_eq!(buffer.start_seq(), seq(0) + total_packets(&messages));
    assert_eq!(buffer.occupied_span(), 0);
}

#[test]
fn test_stream_mode_reads_byte_stream() {
    crate::setup();

    let config = config(128, false);
    let (units, mut buffer) = new_buffer(&config, seq(0));
    let messages = random_messages(seq(0), 20, 2, PAYLOAD_SIZE);

    let mut expected = vec![];
    let mut packets = vec![];
    for (_, content, message) in messages.iter() {
        expected.extend_from_slice(content);
        packets.extend(message.iter().cloned());
    }

    packets.reverse();
    for packet in packets.iter() {
        insert(&units, &mut buffer, packet).unwrap();
    }

    let mut received = vec![];
    let mut dst = [0u8; 7];
    loop {
        let read = buffer.read_buffer(&mut dst).unwrap();
        if read == 0 {
            break;
        }

        received.extend_from_slice(&dst[..read]);
    }

    assert_eq!(received, expected);
    assert_eq!(buffer.data_size_stats(), (0, 0, 0));
    assert_eq!(units.in_use(), 0);
}

#[test]
fn test_window_bounds() {
    crate::setup();

    let config = config(16, true);
    let (units, mut buffer) = new_buffer(&config, seq(0x7FFF_FFFA));

    let (lo, hi) = buffer.available_range();
    assert_eq!(lo, seq(0x7FFF_FFFA));
    assert_eq!(hi, seq(9));

    let packet = |seq_no: SeqNo| message_packets(seq_no, 1, &[1], PAYLOAD_SIZE, 0).remove(0);

    assert!(insert(&units, &mut buffer, &packet(hi)).is_ok());
    assert!(insert(&units, &mut buffer, &packet(hi + 1)).is_err());
    assert!(insert(&units, &mut buffer, &packet(lo - 1)).is_err());
    assert_eq!(units.in_use(), 1);

    assert_eq!(buffer.first_loss_range(lo), Some((lo, hi - 1)));
    assert_eq!(buffer.avail_size(lo + 4), 12);
}
