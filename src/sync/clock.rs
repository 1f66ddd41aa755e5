//! Logical-clock translation between a node's local time and the shared time.

use std::cell::Cell;
use std::rc::Rc;

/// Maps local time to the time all nodes agree on.
pub trait ClockSync {
    fn local_time(&self) -> f64;
    fn shared_time(&self) -> f64;
    fn to_local_time(&self, shared_time: f64) -> f64;
    fn to_shared_time(&self, local_time: f64) -> f64;
}

/// Externally driven clock, offset from the shared timeline by a fixed skew.
///
/// Clones share the same "now", so the driver and the engines see the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
    offset: f64,
}

impl ManualClock {
    /// `offset` is how far the shared clock is ahead of this node's local clock.
    pub fn new(offset: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(0.0)),
            offset,
        }
    }

    pub fn set(&self, local_time: f64) {
        self.now.set(local_time);
    }

    pub fn advance(&self, delta: f64) -> f64 {
        let t = self.now.get() + delta;
        self.now.set(t);
        t
    }
}

impl ClockSync for ManualClock {
    fn local_time(&self) -> f64 {
        self.now.get()
    }

    fn shared_time(&self) -> f64 {
        self.to_shared_time(self.now.get())
    }

    fn to_local_time(&self, shared_time: f64) -> f64 {
        shared_time - self.offset
    }

    fn to_shared_time(&self, local_time: f64) -> f64 {
        local_time + self.offset
    }
}

/// Next integer multiple of `loop_length` at or after `shared_now`.
pub fn next_loop_boundary(shared_now: f64, loop_length: f64) -> f64 {
    if !(loop_length > 0.0) {
        return shared_now;
    }
    (shared_now / loop_length).ceil() * loop_length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_round_trips() {
        let clock = ManualClock::new(12.5);
        clock.set(3.0);
        assert_eq!(clock.shared_time(), 15.5);
        assert_eq!(clock.to_local_time(15.5), 3.0);
        assert_eq!(clock.to_local_time(clock.to_shared_time(7.25)), 7.25);
    }

    #[test]
    fn clones_share_time() {
        let a = ManualClock::new(0.0);
        let b = a.clone();
        a.advance(0.5);
        assert_eq!(b.local_time(), 0.5);
    }

    #[test]
    fn skewed_nodes_agree_on_the_boundary() {
        let a = ManualClock::new(100.0);
        let b = ManualClock::new(103.7);
        a.set(1.0);
        b.set(-2.7);
        let boundary_a = next_loop_boundary(a.shared_time(), 4.0);
        let boundary_b = next_loop_boundary(b.shared_time(), 4.0);
        assert_eq!(boundary_a, 104.0);
        assert_eq!(boundary_a, boundary_b);
        assert_eq!(a.to_local_time(boundary_a), 4.0);
        assert!((b.to_local_time(boundary_b) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn boundary_edge_cases() {
        assert_eq!(next_loop_boundary(8.0, 4.0), 8.0);
        assert_eq!(next_loop_boundary(3.0, 0.0), 3.0);
    }
}
