//! The fixed collection of capacity-limited meadows.
//!
//! Ownership of a slot is conferred by the protocol, not enforced here:
//! only the node currently leading a slot may call [`ResourcePool::occupy`]
//! or [`ResourcePool::release`] on it, and the state machine's single
//! thread of control serializes those calls.

use rand::Rng;

use crate::error::{Error, Result};
use crate::types::SlotIndex;

/// One meadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSlot {
    /// Whether some leader has announced occupancy.
    pub occupied: bool,
    /// Capacity units still free.
    pub remaining_capacity: u32,
    capacity: u32,
}

impl ResourceSlot {
    /// An empty slot with the given capacity.
    pub const fn new(capacity: u32) -> Self {
        Self {
            occupied: false,
            remaining_capacity: capacity,
            capacity,
        }
    }

    /// Full capacity of the slot.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// A slot takes a request iff it is free, or has strictly more
    /// capacity left than the request needs.
    pub const fn is_eligible(&self, demand: u32) -> bool {
        !self.occupied || self.remaining_capacity > demand
    }
}

/// The meadows every node knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePool {
    slots: Vec<ResourceSlot>,
}

impl ResourcePool {
    /// Create `count` empty slots of equal capacity.
    pub fn new(count: usize, capacity: u32) -> Self {
        Self {
            slots: vec![ResourceSlot::new(capacity); count],
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get a slot.
    pub fn get(&self, slot: SlotIndex) -> Option<&ResourceSlot> {
        self.slots.get(slot)
    }

    fn slot_mut(&mut self, slot: SlotIndex) -> Result<&mut ResourceSlot> {
        let slots = self.slots.len();
        self.slots
            .get_mut(slot)
            .ok_or(Error::SlotOutOfRange { slot, slots })
    }

    /// Whether `slot` can take a request of `demand` units.
    /// Out-of-range slots are never eligible.
    pub fn is_eligible(&self, slot: SlotIndex, demand: u32) -> bool {
        self.get(slot).is_some_and(|s| s.is_eligible(demand))
    }

    /// Iterate the indices of eligible slots.
    pub fn eligible(&self, demand: u32) -> impl Iterator<Item = SlotIndex> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.is_eligible(demand))
            .map(|(i, _)| i)
    }

    /// Pick a uniformly random eligible slot.
    ///
    /// Equivalent to drawing indices until an eligible one turns up, but
    /// cannot spin when nothing is eligible.
    pub fn choose<R: Rng + ?Sized>(&self, demand: u32, rng: &mut R) -> Result<SlotIndex> {
        let eligible: Vec<SlotIndex> = self.eligible(demand).collect();
        if eligible.is_empty() {
            return Err(Error::NoEligibleSlot {
                demand,
                slots: self.slots.len(),
            });
        }
        Ok(eligible[rng.gen_range(0..eligible.len())])
    }

    /// Take `demand` units from `slot` and mark it occupied.
    pub fn occupy(&mut self, slot: SlotIndex, demand: u32) -> Result<()> {
        let s = self.slot_mut(slot)?;
        let remaining = s
            .remaining_capacity
            .checked_sub(demand)
            .ok_or(Error::InsufficientCapacity {
                slot,
                demand,
                remaining: s.remaining_capacity,
            })?;
        s.remaining_capacity = remaining;
        s.occupied = true;
        Ok(())
    }

    /// Return `demand` units to `slot`. The slot is free again once its
    /// full capacity is back.
    pub fn release(&mut self, slot: SlotIndex, demand: u32) -> Result<()> {
        let s = self.slot_mut(slot)?;
        s.remaining_capacity = s.remaining_capacity.saturating_add(demand).min(s.capacity);
        if s.remaining_capacity == s.capacity {
            s.occupied = false;
        }
        Ok(())
    }
}
