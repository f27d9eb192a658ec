//! Protocol configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::WaitOrder;
use crate::error::{Error, Result};
use crate::types::NodeClass;

/// Capacity units each class takes from a meadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demands {
    pub hare: u32,
    pub bear: u32,
}

impl Default for Demands {
    fn default() -> Self {
        Self { hare: 1, bear: 4 }
    }
}

impl Demands {
    /// Demand of a class.
    pub const fn of(&self, class: NodeClass) -> u32 {
        match class {
            NodeClass::Hare => self.hare,
            NodeClass::Bear => self.bear,
        }
    }
}

/// Bounds, in units, of an IDLE listening window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleUnits {
    pub min: u32,
    pub max: u32,
}

impl Default for IdleUnits {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

/// Configuration shared by every node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Number of meadows.
    pub slots: usize,

    /// Initial capacity of each meadow.
    pub slot_capacity: u32,

    /// Capacity units per class.
    pub demands: Demands,

    /// IDLE window bounds, inclusive.
    pub idle_units: IdleUnits,

    /// Length of one IDLE unit in milliseconds.
    pub idle_unit_ms: u64,

    /// Admission order of the wait queue.
    pub wait_order: WaitOrder,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            slots: 10,
            slot_capacity: 5,
            demands: Demands::default(),
            idle_units: IdleUnits::default(),
            idle_unit_ms: 1_000,
            wait_order: WaitOrder::Oldest,
        }
    }
}

impl ProtocolConfig {
    /// Length of one IDLE unit.
    pub fn idle_unit(&self) -> Duration {
        Duration::from_millis(self.idle_unit_ms)
    }

    /// Set the number of meadows and their capacity.
    #[must_use]
    pub fn with_slots(mut self, slots: usize, capacity: u32) -> Self {
        self.slots = slots;
        self.slot_capacity = capacity;
        self
    }

    /// Set per-class demands.
    #[must_use]
    pub fn with_demands(mut self, demands: Demands) -> Self {
        self.demands = demands;
        self
    }

    /// Set the IDLE window bounds in units.
    #[must_use]
    pub fn with_idle_units(mut self, min: u32, max: u32) -> Self {
        self.idle_units = IdleUnits { min, max };
        self
    }

    /// Set the length of one IDLE unit.
    #[must_use]
    pub fn with_idle_unit(mut self, unit: Duration) -> Self {
        self.idle_unit_ms = u64::try_from(unit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the wait queue order.
    #[must_use]
    pub fn with_wait_order(mut self, order: WaitOrder) -> Self {
        self.wait_order = order;
        self
    }

    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 {
            return Err(Error::InvalidConfig("at least one meadow is required".into()));
        }
        if self.slot_capacity == 0 {
            return Err(Error::InvalidConfig("meadow capacity must be positive".into()));
        }
        for class in [NodeClass::Hare, NodeClass::Bear] {
            let demand = self.demands.of(class);
            if demand == 0 || demand > self.slot_capacity {
                return Err(Error::InvalidConfig(format!(
                    "{class} demand {demand} does not fit a meadow of capacity {}",
                    self.slot_capacity
                )));
            }
        }
        if self.idle_units.min == 0 || self.idle_units.min > self.idle_units.max {
            return Err(Error::InvalidConfig(format!(
                "idle window {}..={} is empty or starts at zero",
                self.idle_units.min, self.idle_units.max
            )));
        }
        if self.idle_unit_ms == 0 {
            return Err(Error::InvalidConfig("idle unit must be positive".into()));
        }
        Ok(())
    }
}
