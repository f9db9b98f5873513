//! Reentrant interrupt-disable gate.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

/// Models the CPU interrupt-enable state shared by everything that owns a
/// piece of the audio hardware.
///
/// Disabling nests: each [`CriticalSection`] increments a depth counter and
/// only dropping the outermost one re-enables delivery. Interrupt handlers
/// run with the gate closed and may themselves open nested sections.
#[derive(Debug, Default)]
pub struct InterruptGate {
    depth: AtomicU32,
}

impl InterruptGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Disable interrupt delivery until the returned guard is dropped.
    pub fn disable(self: &Arc<Self>) -> CriticalSection {
        self.depth.fetch_add(1, Ordering::AcqRel);
        CriticalSection { gate: Arc::clone(self) }
    }

    /// True when no critical section is open and handlers may run.
    pub fn is_enabled(&self) -> bool {
        self.depth.load(Ordering::Acquire) == 0
    }

    /// Current nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }
}

/// RAII guard returned by [`InterruptGate::disable`].
#[derive(Debug)]
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct CriticalSection {
    gate: Arc<InterruptGate>,
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        let prev = self.gate.depth.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "interrupt gate: unbalanced enable");
    }
}
