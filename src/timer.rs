//! C1 — Timer Queue: bounded, cancellable, per-worker deadline registry.
//!
//! Grounded on `crow::detail::dumb_timer_queue` (referenced from
//! `examples/original_source/crow/include/crow/http_server.h`, which ticks
//! it once a second from a worker-local `deadline_timer`) and on the
//! cancellation behavior used in `Connection::startDeadline`/
//! `cancelDeadlineTimer` in `examples/original_source/http/http_connection.h`:
//! a ticket is the only handle that can cancel a pending expiry, firing
//! invalidates it, and `cancel()` on an already-fired ticket is a no-op.
//!
//! Not thread-safe by design (§4.1) — one queue per worker, `process()` is
//! driven by that worker's own interval tick.

use std::time::{Duration, Instant};

/// Opaque cancellation handle returned by [`TimerQueue::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct Entry {
    id: u64,
    deadline: Instant,
    callback: Option<Box<dyn FnOnce() + 'static>>,
}

/// Default timer quantum: spec requires >= 1s and <= a few seconds.
pub const QUANTUM: Duration = Duration::from_secs(1);

pub struct TimerQueue {
    entries: Vec<Entry>,
    next_id: u64,
    quantum: Duration,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::with_quantum(QUANTUM)
    }

    pub fn with_quantum(quantum: Duration) -> Self {
        Self { entries: Vec::new(), next_id: 1, quantum }
    }

    /// Schedules `expiry_callback` to run after one quantum. Returns a
    /// ticket that can be used to cancel it before it fires.
    pub fn add(&mut self, expiry_callback: impl FnOnce() + 'static) -> Ticket {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            deadline: Instant::now() + self.quantum,
            callback: Some(Box::new(expiry_callback)),
        });
        Ticket(id)
    }

    /// Removes a still-pending callback. No effect if already fired (the
    /// entry is gone from `entries` by then, so this is naturally a no-op).
    pub fn cancel(&mut self, ticket: Ticket) {
        if let Some(pos) = self.entries.iter().position(|e| e.id == ticket.0) {
            self.entries.remove(pos);
        }
    }

    /// Drains and returns every still-pending callback whose deadline has
    /// elapsed, in insertion order, without invoking them. Split from
    /// invocation so a worker's tick loop can run the callbacks after
    /// releasing any lock/borrow it holds on the queue itself — a callback
    /// that re-arms another ticket needs to reach the queue again, and a
    /// `RefCell` would panic on that kind of reentrant borrow otherwise.
    pub fn process(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let now = Instant::now();
        let mut fired: Vec<Box<dyn FnOnce()>> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].deadline <= now {
                let mut entry = self.entries.remove(i);
                if let Some(cb) = entry.callback.take() {
                    fired.push(cb);
                }
            } else {
                i += 1;
            }
        }
        fired
    }

    /// Convenience for callers that don't need to worry about reentrant
    /// callbacks (tests, or a queue not shared behind a `RefCell`): drains
    /// and immediately invokes.
    pub fn tick(&mut self) {
        for cb in self.process() {
            cb();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn cancel_before_fire_prevents_callback() {
        let fired = Rc::new(Cell::new(false));
        let fired_clone = fired.clone();
        let mut queue = TimerQueue::new();
        let ticket = queue.add(move || fired_clone.set(true));
        queue.cancel(ticket);
        std::thread::sleep(QUANTUM + Duration::from_millis(50));
        queue.tick();
        assert!(!fired.get());
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let mut queue = TimerQueue::new();
        let ticket = queue.add(|| {});
        std::thread::sleep(QUANTUM + Duration::from_millis(50));
        queue.tick();
        // entry already gone; must not panic
        queue.cancel(ticket);
    }

    #[test]
    fn fires_in_insertion_order() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut queue = TimerQueue::new();
        for i in 0..5 {
            let order = order.clone();
            queue.add(move || order.borrow_mut().push(i));
        }
        std::thread::sleep(QUANTUM + Duration::from_millis(50));
        queue.tick();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn callback_can_rearm_without_reentrant_panic() {
        use std::cell::RefCell;
        let queue = Rc::new(RefCell::new(TimerQueue::with_quantum(Duration::from_millis(10))));
        let rearmed = Rc::new(Cell::new(false));

        let queue_clone = queue.clone();
        let rearmed_clone = rearmed.clone();
        queue.borrow_mut().add(move || {
            rearmed_clone.set(true);
            queue_clone.borrow_mut().add(|| {});
        });

        std::thread::sleep(Duration::from_millis(30));
        let fired = queue.borrow_mut().process();
        for cb in fired {
            cb();
        }
        assert!(rearmed.get());
        assert!(!queue.borrow().is_empty());
    }
}
