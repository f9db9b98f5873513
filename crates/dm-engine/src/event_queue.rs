//! Sample-accurate event scheduling.

use alloc::boxed::Box;

use log::warn;

use crate::backend::MixBackend;
use crate::engine::Engine;

/// Maximum number of pending events.
pub const MAX_EVENTS: usize = 32;

/// Handle identifying a registered event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId(u32);

/// Event callback. Runs between two mix runs with the engine at exactly
/// the scheduled tick; returns the delay until it should run again, or 0
/// to be removed.
pub type EventCallback<B> = Box<dyn FnMut(&mut Engine<B>) -> u32 + Send>;

struct Event<B: MixBackend> {
    id: EventId,
    tick: i64,
    callback: EventCallback<B>,
}

/// Pending events, in registration order.
///
/// The list is small and bounded, so lookups are linear scans. Among
/// events due on the same tick, the one registered first runs first.
pub struct EventQueue<B: MixBackend> {
    events: heapless::Vec<Event<B>, MAX_EVENTS>,
    next_id: u32,
}

impl<B: MixBackend> EventQueue<B> {
    pub fn new() -> Self {
        Self { events: heapless::Vec::new(), next_id: 0 }
    }

    /// Schedule `callback` to run at absolute tick `tick`.
    pub fn add(&mut self, tick: i64, callback: EventCallback<B>) -> EventId {
        let id = EventId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        if self.events.push(Event { id, tick, callback }).is_err() {
            panic!("event queue: more than {MAX_EVENTS} events");
        }
        id
    }

    /// Unregister an event. Returns false if it is not pending (it may
    /// already have run and removed itself).
    pub fn remove(&mut self, id: EventId) -> bool {
        match self.events.iter().position(|e| e.id == id) {
            Some(index) => {
                self.events.remove(index);
                true
            }
            None => {
                warn!("event queue: no pending event {:?}", id);
                false
            }
        }
    }

    /// Index and tick of the earliest pending event.
    pub fn next(&self) -> Option<(usize, i64)> {
        let mut best: Option<(usize, i64)> = None;
        for (i, e) in self.events.iter().enumerate() {
            if best.map_or(true, |(_, tick)| e.tick < tick) {
                best = Some((i, e.tick));
            }
        }
        best
    }

    /// Run the event at `index` and reschedule or drop it.
    pub fn fire(&mut self, index: usize, engine: &mut Engine<B>) {
        let event = &mut self.events[index];
        let repeat = (event.callback)(engine);
        if repeat > 0 {
            event.tick += repeat as i64;
        } else {
            self.events.remove(index);
        }
    }

    pub fn tick_of(&self, id: EventId) -> Option<i64> {
        self.events.iter().find(|e| e.id == id).map(|e| e.tick)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl<B: MixBackend> Default for EventQueue<B> {
    fn default() -> Self {
        Self::new()
    }
}
