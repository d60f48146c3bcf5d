use log::*;
use srt_shared::{DataPacket, PacketParseError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum UnitState {
    /// Available to be handed out by `take`
    Free,
    /// Handed out, being filled by the network receive path
    Taken,
    /// Owned by a receive buffer
    Good,
}

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(0);

/// Handle to a unit of packet storage inside of a `UnitQueue`.
///
/// Handles are neither `Clone` nor `Copy`: releasing consumes the handle,
/// so a unit cannot be returned to the pool twice.
#[must_use = "units must be released back to the unit queue"]
#[derive(Debug, PartialEq)]
pub struct Unit {
    queue_id: usize,
    index: usize,
}

#[derive(Error, Debug, PartialEq)]
pub enum UnitQueueError {
    #[error("unit {0} is not taken from this queue")]
    NotTaken(usize),
    #[error("unit {0} of unit queue {1} released to unit queue {2}")]
    ForeignUnit(usize, usize, usize),
}

#[derive(Debug)]
struct UnitEntry {
    state: UnitState,
    packet: DataPacket,
}

/// The storage behind a `UnitQueue`, accessible while the queue is locked.
#[derive(Debug)]
pub struct UnitArena {
    id: usize,
    units: Vec<UnitEntry>,
    free: Vec<usize>,
}

/// Pool of preallocated packet storage shared by the receive buffers of
/// several connections.
#[derive(Debug)]
pub struct UnitQueue {
    arena: Mutex<UnitArena>,
}

impl UnitArena {
    fn new(units: usize, payload_size: usize) -> Self {
        Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            units: (0..units)
                .map(|_| UnitEntry {
                    state: UnitState::Free,
                    packet: DataPacket::with_payload_capacity(payload_size),
                })
                .collect(),
            // Reversed so that units are handed out from index 0 upwards
            free: (0..units).rev().collect(),
        }
    }

    pub fn take(&mut self) -> Option<Unit> {
        let index = self.free.pop()?;
        self.units[index].state = UnitState::Taken;

        Some(Unit {
            queue_id: self.id,
            index,
        })
    }

    /// Whether the unit was handed out by this queue.
    ///
    /// The other accessors index the storage directly and expect an owned unit.
    pub fn owns(&self, unit: &Unit) -> bool {
        unit.queue_id == self.id
    }

    /// Decodes a received datagram into the unit's packet storage.
    pub fn fill(&mut self, unit: &Unit, datagram: &[u8]) -> Result<(), PacketParseError> {
        self.units[unit.index].packet.parse_into(datagram)
    }

    pub fn put(&mut self, unit: &Unit, packet: DataPacket) {
        self.units[unit.index].packet = packet;
    }

    pub fn packet(&self, unit: &Unit) -> &DataPacket {
        &self.units[unit.index].packet
    }

    pub fn state(&self, unit: &Unit) -> UnitState {
        self.units[unit.index].state
    }

    /// Marks the unit as owned by a receive buffer.
    pub fn make_good(&mut self, unit: &Unit) {
        self.units[unit.index].state = UnitState::Good;
    }

    pub fn release(&mut self, unit: Unit) -> Result<(), UnitQueueError> {
        if !self.owns(&unit) {
            return Err(UnitQueueError::ForeignUnit(
                unit.index,
                unit.queue_id,
                self.id,
            ));
        }

        let entry = &mut self.units[unit.index];

        if entry.state == UnitState::Free {
            return Err(UnitQueueError::NotTaken(unit.index));
        }

        entry.state = UnitState::Free;
        self.free.push(unit.index);

        Ok(())
    }

    pub fn free_units(&self) -> usize {
        self.free.len()
    }
}

impl UnitQueue {
    pub fn new(units: usize, payload_size: usize) -> Self {
        debug!(
            "allocating unit queue of {} units, {} bytes each",
            units, payload_size
        );

        Self {
            arena: Mutex::new(UnitArena::new(units, payload_size)),
        }
    }

    /// Locks the pool for the duration of a receive buffer operation.
    pub fn lock(&self) -> MutexGuard<'_, UnitArena> {
        // The arena stays consistent between calls, a panic elsewhere cannot corrupt it
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take_unit(&self) -> Option<Unit> {
        let unit = self.lock().take();

        if unit.is_none() {
            warn!("unit queue exhausted");
        }

        unit
    }

    pub fn release(&self, unit: Unit) -> Result<(), UnitQueueError> {
        self.lock().release(unit)
    }

    pub fn capacity(&self) -> usize {
        self.lock().units.len()
    }

    pub fn free_units(&self) -> usize {
        self.lock().free_units()
    }

    pub fn in_use(&self) -> usize {
        let arena = self.lock();
        arena.units.len() - arena.free.len()
    }
}
