//! Host-side registry of running machines.
//!
//! Each machine sits behind its own mutex; holding the lock is the only way
//! to touch it. The registry hands out handles and remembers which machine
//! the host considers active. It never runs anything itself.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::spectrum::Spectrum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MachineId(u32);

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "machine {}", self.0)
    }
}

pub type SharedMachine = Arc<Mutex<Spectrum>>;

#[derive(Default)]
pub struct MachineRegistry {
    machines: BTreeMap<MachineId, SharedMachine>,
    next_id: u32,
    active: Option<MachineId>,
}

impl MachineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a machine. The first one becomes active.
    pub fn add(&mut self, machine: Spectrum) -> MachineId {
        let id = MachineId(self.next_id);
        self.next_id += 1;
        self.machines.insert(id, Arc::new(Mutex::new(machine)));
        if self.active.is_none() {
            self.active = Some(id);
        }
        log::info!("registry: added {id}");
        id
    }

    /// Drop the registry's handle. Clones held elsewhere keep the machine
    /// alive.
    pub fn remove(&mut self, id: MachineId) -> Option<SharedMachine> {
        let machine = self.machines.remove(&id)?;
        if self.active == Some(id) {
            self.active = None;
        }
        log::info!("registry: removed {id}");
        Some(machine)
    }

    #[must_use]
    pub fn get(&self, id: MachineId) -> Option<SharedMachine> {
        self.machines.get(&id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.machines.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Returns false, leaving the active machine alone, for unknown ids.
    pub fn set_active(&mut self, id: MachineId) -> bool {
        if !self.machines.contains_key(&id) {
            return false;
        }
        self.active = Some(id);
        true
    }

    #[must_use]
    pub fn active_id(&self) -> Option<MachineId> {
        self.active
    }

    #[must_use]
    pub fn active(&self) -> Option<SharedMachine> {
        self.active.and_then(|id| self.get(id))
    }
}
