//! Shared bus exclusion
//!
//! The radio, the storage card and the network adapter of a node share one
//! SPI bus and must never be active at the same time. Every device activation
//! goes through [`SharedBus::activate`], which hands out a [`BusLease`];
//! while a lease is alive no other device can be activated.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use log::log;

/// Devices attached to the shared bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusDevice {
    Radio,
    Storage,
    Network,
}

/// Exclusion token source for the shared bus
pub struct SharedBus {
    active: Mutex<CriticalSectionRawMutex, Option<BusDevice>>,
}

impl Default for SharedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBus {
    pub const fn new() -> Self {
        SharedBus { active: Mutex::new(None) }
    }

    /// Waits until the bus is free and activates `device`
    pub async fn activate(&self, device: BusDevice) -> BusLease<'_> {
        let mut guard = self.active.lock().await;
        *guard = Some(device);
        log!(log::Level::Trace, "Bus activated for {:?}", device);
        BusLease { guard, device }
    }

    /// Activates `device` only if no other lease is alive
    pub fn try_activate(&self, device: BusDevice) -> Option<BusLease<'_>> {
        let mut guard = self.active.try_lock().ok()?;
        *guard = Some(device);
        Some(BusLease { guard, device })
    }

    /// Returns true while a lease is alive
    pub fn is_busy(&self) -> bool {
        self.active.try_lock().is_err()
    }
}

/// Exclusive activation of one bus device, released on drop
pub struct BusLease<'a> {
    guard: MutexGuard<'a, CriticalSectionRawMutex, Option<BusDevice>>,
    device: BusDevice,
}

impl BusLease<'_> {
    pub fn device(&self) -> BusDevice {
        self.device
    }
}

impl Drop for BusLease<'_> {
    fn drop(&mut self) {
        *self.guard = None;
        log!(log::Level::Trace, "Bus released by {:?}", self.device);
    }
}
