//! Fixed-capacity event ring shared by the Nutrient Tank Coordinator and
//! its host loop.
//!
//! Unlike the source firmware's ISR-driven SPSC queue, both the producer
//! (the coordinator's `process()`) and the consumer (the host loop) run on
//! the same thread, in the same cooperative scheduling model (§5) — there
//! is no concurrent access to guard against, so the ring is a plain
//! host-owned struct rather than a crate-global with atomics. The
//! single-producer/single-consumer *discipline* is kept: the coordinator
//! only ever pushes, the host only ever pops.

use crate::error::{BlockReason, Error};

/// What changed, carried alongside the tank volumes known at the time
/// (§4.5 "Event ring").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NutrientTankEventKind {
    MainLevelOk,
    MainLevelLow,
    MainLevelCritical,
    MainLevelHigh,
    ReturnLevelOk,
    ReturnLevelHigh,
    RequestReturn,
    RequestRefill,
    OperationBlocked(BlockReason),
    CommandCompleted,
    EmergencyStopped,
    Error(Error),
}

/// One ring entry: the event plus the main/return volumes known when it
/// was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NutrientTankEvent {
    pub kind: NutrientTankEventKind,
    pub main_volume_ul: u32,
    pub return_volume_ul: u32,
}

/// Fixed-capacity circular buffer. On overflow the oldest entry is
/// dropped and the read cursor advances to keep the buffer consistent
/// (§4.5 "on overflow the oldest event is dropped").
pub struct EventRing<const N: usize> {
    buf: [Option<NutrientTankEvent>; N],
    head: usize,
    tail: usize,
    len: usize,
}

impl<const N: usize> EventRing<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [None; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, event: NutrientTankEvent) {
        self.buf[self.head] = Some(event);
        self.head = (self.head + 1) % N;
        if self.len == N {
            // Full: overwrite the oldest entry, advance the read cursor.
            self.tail = (self.tail + 1) % N;
        } else {
            self.len += 1;
        }
    }

    pub fn pop(&mut self) -> Option<NutrientTankEvent> {
        if self.len == 0 {
            return None;
        }
        let event = self.buf[self.tail].take();
        self.tail = (self.tail + 1) % N;
        self.len -= 1;
        event
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn drain(&mut self, mut handler: impl FnMut(NutrientTankEvent)) {
        while let Some(event) = self.pop() {
            handler(event);
        }
    }
}

impl<const N: usize> Default for EventRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: NutrientTankEventKind) -> NutrientTankEvent {
        NutrientTankEvent {
            kind,
            main_volume_ul: 1,
            return_volume_ul: 2,
        }
    }

    #[test]
    fn fifo_ordering() {
        let mut ring: EventRing<4> = EventRing::new();
        ring.push(ev(NutrientTankEventKind::MainLevelOk));
        ring.push(ev(NutrientTankEventKind::MainLevelLow));
        assert_eq!(ring.pop().unwrap().kind, NutrientTankEventKind::MainLevelOk);
        assert_eq!(ring.pop().unwrap().kind, NutrientTankEventKind::MainLevelLow);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn overflow_drops_oldest_and_keeps_len_at_capacity() {
        let mut ring: EventRing<2> = EventRing::new();
        ring.push(ev(NutrientTankEventKind::MainLevelOk));
        ring.push(ev(NutrientTankEventKind::MainLevelLow));
        ring.push(ev(NutrientTankEventKind::MainLevelCritical)); // drops MainLevelOk
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop().unwrap().kind, NutrientTankEventKind::MainLevelLow);
        assert_eq!(
            ring.pop().unwrap().kind,
            NutrientTankEventKind::MainLevelCritical
        );
    }

    #[test]
    fn drain_collects_all_in_order() {
        let mut ring: EventRing<4> = EventRing::new();
        ring.push(ev(NutrientTankEventKind::RequestReturn));
        ring.push(ev(NutrientTankEventKind::RequestRefill));
        let mut seen = Vec::new();
        ring.drain(|e| seen.push(e.kind));
        assert_eq!(
            seen,
            vec![
                NutrientTankEventKind::RequestReturn,
                NutrientTankEventKind::RequestRefill
            ]
        );
        assert!(ring.is_empty());
    }
}
