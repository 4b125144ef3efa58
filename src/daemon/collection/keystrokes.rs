use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::Result;

use super::KeystrokeSampler;

/// Keystroke counter shared between OS hooks and the coordinator. Hooks call
/// [KeystrokeHandle::record] from whatever thread they run on; the coordinator drains the total
/// once per tick.
#[derive(Debug, Default)]
pub struct KeystrokeCounter {
    pressed: Arc<AtomicU64>,
}

/// Cloneable writer side of [KeystrokeCounter].
#[derive(Debug, Clone)]
pub struct KeystrokeHandle {
    pressed: Arc<AtomicU64>,
}

impl KeystrokeHandle {
    pub fn record(&self, count: u64) {
        self.pressed.fetch_add(count, Ordering::AcqRel);
    }

    pub fn increment(&self) {
        self.record(1);
    }
}

impl KeystrokeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> KeystrokeHandle {
        KeystrokeHandle {
            pressed: self.pressed.clone(),
        }
    }
}

impl KeystrokeSampler for KeystrokeCounter {
    fn poll(&mut self) -> Result<u64> {
        Ok(self.pressed.swap(0, Ordering::AcqRel))
    }

    fn restore(&mut self, count: u64) {
        self.pressed.fetch_add(count, Ordering::AcqRel);
    }
}
