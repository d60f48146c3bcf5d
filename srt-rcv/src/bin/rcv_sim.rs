use anyhow::{Error, Result};
use env_logger;
use log::*;
use rand::seq::SliceRandom;
use rand::Rng;
use srt_rcv::{MsgCtrl, RcvBuffer, RcvConfig, UnitQueue};
use srt_shared::{DataPacket, MsgNo, PacketBoundary, SeqNo};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::delay_for;

const MESSAGES: u32 = 2000;
const MAX_MESSAGE_PACKETS: usize = 4;
const LOSS_RATE: f64 = 0.01;
const REORDER_WINDOW: usize = 8;
const SEND_BATCH: usize = 64;
const DRIFT_SAMPLE_INTERVAL: usize = 16;
const INITIAL_SEQ: u32 = 0x7FFF_FF00;

enum BufferCommand {
    Insert(Vec<u8>),
    Read {
        skip_gaps: bool,
        reply: oneshot::Sender<ReadResult>,
    },
    Close,
}

enum ReadResult {
    Message(Vec<u8>, MsgCtrl),
    Skipped(usize),
    Pending,
    Drained,
}

#[derive(Debug, Default)]
struct SimStats {
    sent: usize,
    lost: usize,
    inserted: usize,
    rejected: usize,
    messages: usize,
    corrupt_messages: usize,
    bytes: usize,
    skipped: usize,
}

#[tokio::main]
async fn main() -> () {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => RcvConfig::from_json_file(path),
        None => Ok(RcvConfig::default()),
    };

    let result = match config {
        Ok(config) => run(config).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(stats) => {
            println!("{:#?}", stats);
            exit(if stats.corrupt_messages == 0 { 0 } else { 2 })
        }
        Err(err) => {
            error!("Error occurred: {:?}", err);
            exit(1)
        }
    }
}

async fn run(config: RcvConfig) -> Result<SimStats> {
    config.validate()?;

    let units = Arc::new(UnitQueue::new(config.units(), config.payload_size()));
    let init_seq = SeqNo::new(INITIAL_SEQ)?;
    let buffer = RcvBuffer::new(init_seq, &config, Arc::clone(&units));
    let start = Instant::now();

    if let Some(delay) = config.tsbpd_delay() {
        buffer.set_tsbpd_mode(start, false, delay);
    }

    let (sender, receiver) = unbounded_channel();
    let producer_done = Arc::new(AtomicBool::new(false));

    let owner = tokio::spawn(run_buffer(buffer, Arc::clone(&units), receiver));

    let producer = tokio::spawn(produce(
        init_seq,
        config.clone(),
        start,
        sender.clone(),
        Arc::clone(&producer_done),
    ));

    let mut stats = consume(config, sender.clone(), Arc::clone(&producer_done)).await?;

    let (sent, lost) = producer
        .await
        .map_err(|_| Error::msg("failed to join producer"))??;
    stats.sent = sent;
    stats.lost = lost;

    sender
        .send(BufferCommand::Close)
        .map_err(|_| Error::msg("buffer task stopped"))?;
    let (inserted, rejected) = owner
        .await
        .map_err(|_| Error::msg("failed to join buffer task"))?;
    stats.inserted = inserted;
    stats.rejected = rejected;

    if units.in_use() != 0 {
        warn!("{} units were not returned to the unit queue", units.in_use());
    }

    Ok(stats)
}

/// Owns the receive buffer, serialising the network and application paths.
async fn run_buffer(
    mut buffer: RcvBuffer,
    units: Arc<UnitQueue>,
    mut commands: UnboundedReceiver<BufferCommand>,
) -> (usize, usize) {
    let mut inserted = 0;
    let mut rejected = 0;
    let mut dst = vec![0u8; buffer.avg_payload_size() * MAX_MESSAGE_PACKETS];

    while let Some(command) = commands.recv().await {
        let now = Instant::now();
        buffer.update_avg_data_size(now);

        match command {
            BufferCommand::Insert(datagram) => {
                if !insert_datagram(&mut buffer, &units, &datagram, now, &mut inserted) {
                    rejected += 1;
                }
            }
            BufferCommand::Read { skip_gaps, reply } => {
                let result = read_from_buffer(&mut buffer, &mut dst, skip_gaps, now);

                if reply.send(result).is_err() {
                    warn!("reader went away");
                }
            }
            BufferCommand::Close => {
                info!(
                    "closing buffer: {}",
                    buffer.fullness_state(buffer.start_seq(), Instant::now())
                );
                break;
            }
        }
    }

    (inserted, rejected)
}

/// Parses a datagram into a unit and inserts it into the buffer, taking a
/// drift sample every `DRIFT_SAMPLE_INTERVAL` accepted packets.
/// Returns false when the datagram was rejected.
fn insert_datagram(
    buffer: &mut RcvBuffer,
    units: &UnitQueue,
    datagram: &[u8],
    now: Instant,
    inserted: &mut usize,
) -> bool {
    let unit = match units.take_unit() {
        Some(unit) => unit,
        None => return false,
    };

    let parsed = {
        let mut arena = units.lock();
        arena
            .fill(&unit, datagram)
            .map(|_| arena.packet(&unit).timestamp())
    };

    let timestamp = match parsed {
        Ok(timestamp) => timestamp,
        Err(err) => {
            warn!("failed to parse datagram: {}", err);
            if let Err(err) = units.release(unit) {
                error!("failed to release unit: {}", err);
            }
            return false;
        }
    };

    match buffer.insert(unit) {
        Ok(_) => {
            *inserted += 1;

            if *inserted % DRIFT_SAMPLE_INTERVAL == 0 {
                buffer.add_drift_sample(timestamp, now, -1);
            }

            true
        }
        Err(err) => {
            debug!("packet rejected: {}", err);
            false
        }
    }
}

fn read_from_buffer(
    buffer: &mut RcvBuffer,
    dst: &mut Vec<u8>,
    skip_gaps: bool,
    now: Instant,
) -> ReadResult {
    if buffer.is_ready(now) {
        let mut ctrl = MsgCtrl::default();

        loop {
            match buffer.read_message(dst, Some(&mut ctrl)) {
                Ok(read) => return ReadResult::Message(dst[..read].to_vec(), ctrl),
                Err(srt_rcv::RcvBufferError::MessageTooLarge(required, _)) => {
                    dst.resize(required, 0);
                }
                Err(err) => {
                    error!("failed to read message: {}", err);
                    return ReadResult::Pending;
                }
            }
        }
    }

    if buffer.data_size() == 0 {
        return if skip_gaps {
            ReadResult::Drained
        } else {
            ReadResult::Pending
        };
    }

    if !skip_gaps || buffer.has_available_packets() {
        return ReadResult::Pending;
    }

    match buffer.first_valid_packet_info() {
        Some(info) => {
            // An incomplete message at the window start is skipped packet by packet
            let target = if info.seq_gap {
                info.seq_no
            } else {
                info.seq_no + 1
            };

            ReadResult::Skipped(buffer.drop_up_to(target))
        }
        None => ReadResult::Drained,
    }
}

fn message_content(msg_no: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (msg_no as u8).wrapping_add(i as u8)).collect()
}

/// Generates the messages, splits them into data packets and sends the
/// serialised packets to the buffer with reordering and loss.
async fn produce(
    init_seq: SeqNo,
    config: RcvConfig,
    start: Instant,
    sender: UnboundedSender<BufferCommand>,
    done: Arc<AtomicBool>,
) -> Result<(usize, usize)> {
    let payload_size = config.payload_size().max(1);
    let mut seq_no = init_seq;
    let mut datagrams = vec![];

    {
        let mut rng = rand::thread_rng();

        for msg_no in 1..=MESSAGES {
            let len = rng.gen_range(1, payload_size * MAX_MESSAGE_PACKETS + 1);
            let content = message_content(msg_no, len);
            let chunks = content.chunks(payload_size).collect::<Vec<_>>();
            let timestamp = start.elapsed().as_micros() as u32;

            for (i, chunk) in chunks.iter().enumerate() {
                let boundary = match (i == 0, i == chunks.len() - 1) {
                    (true, true) => PacketBoundary::Solo,
                    (true, false) => PacketBoundary::First,
                    (false, true) => PacketBoundary::Last,
                    (false, false) => PacketBoundary::Middle,
                };

                let packet = DataPacket::create(seq_no, MsgNo(msg_no), boundary, timestamp, chunk);
                datagrams.push(packet.to_vec());
                seq_no = seq_no.inc();
            }
        }

        for window in datagrams.chunks_mut(REORDER_WINDOW) {
            window.shuffle(&mut rng);
        }
    }

    let total = datagrams.len();
    let mut lost = 0;

    for (i, datagram) in datagrams.into_iter().enumerate() {
        if rand::thread_rng().gen_bool(LOSS_RATE) {
            lost += 1;
            continue;
        }

        sender
            .send(BufferCommand::Insert(datagram))
            .map_err(|_| Error::msg("buffer task stopped"))?;

        if i % SEND_BATCH == 0 {
            delay_for(Duration::from_millis(1)).await;
        }
    }

    info!("sent {} packets, {} lost", total - lost, lost);
    done.store(true, Ordering::SeqCst);

    Ok((total, lost))
}

/// Drains messages from the buffer until the producer finished and the buffer is empty.
async fn consume(
    config: RcvConfig,
    sender: UnboundedSender<BufferCommand>,
    producer_done: Arc<AtomicBool>,
) -> Result<SimStats> {
    let mut stats = SimStats::default();

    loop {
        let skip_gaps = producer_done.load(Ordering::SeqCst);
        let (reply, response) = oneshot::channel();

        sender
            .send(BufferCommand::Read { skip_gaps, reply })
            .map_err(|_| Error::msg("buffer task stopped"))?;

        match response.await? {
            ReadResult::Message(data, ctrl) => {
                stats.messages += 1;
                stats.bytes += data.len();

                if config.message_api() {
                    let expected = ctrl
                        .msg_no
                        .map(|MsgNo(msg_no)| message_content(msg_no, data.len()));

                    if expected.as_ref() != Some(&data) {
                        error!("message {:?} has unexpected content", ctrl.msg_no);
                        stats.corrupt_messages += 1;
                    }
                }
            }
            ReadResult::Skipped(skipped) => {
                debug!("skipped {} packets", skipped);
                stats.skipped += skipped;
            }
            ReadResult::Pending => delay_for(Duration::from_millis(1)).await,
            ReadResult::Drained => break,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(seq_no: u32, timestamp: u32) -> Vec<u8> {
        DataPacket::create(
            SeqNo::from_masked(seq_no),
            MsgNo(seq_no + 1),
            PacketBoundary::Solo,
            timestamp,
            &[1],
        )
        .to_vec()
    }

    #[test]
    fn test_insert_datagram_samples_drift_on_accepted_packets_only() {
        let config = RcvConfig::default()
            .with_capacity(64)
            .with_payload_size(16)
            .with_drift_max_samples(1);
        let units = Arc::new(UnitQueue::new(config.units(), config.payload_size()));
        let mut buffer = RcvBuffer::new(SeqNo::from_masked(100), &config, Arc::clone(&units));

        let time_base = Instant::now();
        buffer.set_tsbpd_mode(time_base, false, Duration::from_millis(120));
        let late = time_base + Duration::from_micros(3000);

        let mut inserted = 0;

        // Rejected before the window while nothing was accepted yet
        for _ in 0..4 {
            assert_eq!(
                insert_datagram(&mut buffer, &units, &datagram(10, 0), late, &mut inserted),
                false
            );
        }
        assert_eq!(inserted, 0);
        assert_eq!(buffer.tsbpd().drift(), 0);

        for i in 0..DRIFT_SAMPLE_INTERVAL as u32 - 1 {
            assert!(insert_datagram(&mut buffer, &units, &datagram(100 + i, 0), late, &mut inserted));
        }
        assert_eq!(buffer.tsbpd().drift(), 0);

        // Duplicates leave the sample counter on its value
        assert_eq!(
            insert_datagram(&mut buffer, &units, &datagram(100, 0), late, &mut inserted),
            false
        );
        assert_eq!(buffer.tsbpd().drift(), 0);

        let last = 100 + DRIFT_SAMPLE_INTERVAL as u32 - 1;
        assert!(insert_datagram(&mut buffer, &units, &datagram(last, 0), late, &mut inserted));
        assert_eq!(inserted, DRIFT_SAMPLE_INTERVAL);
        assert_eq!(buffer.tsbpd().drift(), 3000);

        // Garbage is rejected and its unit returned
        assert_eq!(
            insert_datagram(&mut buffer, &units, &[1, 2, 3], late, &mut inserted),
            false
        );
        assert_eq!(units.in_use(), DRIFT_SAMPLE_INTERVAL);
    }
}
