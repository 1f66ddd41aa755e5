//! Cooperative, time-ordered task runner.
//!
//! Everything runs on the caller's thread: [`Scheduler::advance_to`] pops
//! due entries in time order and runs each one to completion before looking
//! at the next.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// Something the scheduler calls back periodically.
pub trait Tickable {
    /// Run at `time` and return when to run next. `None`, an error, or a
    /// non-finite time ends the registration.
    fn tick(&mut self, time: f64) -> anyhow::Result<Option<f64>>;
}

pub type TickableRef = Rc<RefCell<dyn Tickable>>;

type Deferred = Box<dyn FnOnce(f64)>;

enum Task {
    Tick(TickableRef),
    Defer(Deferred),
}

struct Entry {
    time: f64,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap and we want the earliest entry on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then(other.seq.cmp(&self.seq))
    }
}

fn same_tickable(a: &TickableRef, b: &TickableRef) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

#[derive(Default)]
pub struct Scheduler {
    entries: BinaryHeap<Entry>,
    seq: u64,
    current_time: f64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_time(&self) -> Option<f64> {
        self.entries.peek().map(|e| e.time)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `tickable` to first run at `start_time`. Re-adding reschedules it.
    pub fn add(&mut self, tickable: TickableRef, start_time: f64) {
        self.remove(&tickable);
        let time = if start_time.is_finite() {
            start_time.max(self.current_time)
        } else {
            self.current_time
        };
        self.push(time, Task::Tick(tickable));
    }

    pub fn remove(&mut self, tickable: &TickableRef) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| match &e.task {
            Task::Tick(t) => !same_tickable(t, tickable),
            Task::Defer(_) => true,
        });
        self.entries.len() != before
    }

    pub fn has(&self, tickable: &TickableRef) -> bool {
        self.entries.iter().any(|e| match &e.task {
            Task::Tick(t) => same_tickable(t, tickable),
            Task::Defer(_) => false,
        })
    }

    /// Run `callback` once at `time`.
    pub fn defer(&mut self, callback: impl FnOnce(f64) + 'static, time: f64) {
        let time = if time.is_finite() { time } else { self.current_time };
        self.push(time.max(self.current_time), Task::Defer(Box::new(callback)));
    }

    /// Execute every entry due at or before `now`, in time order.
    /// Returns how many entries ran.
    pub fn advance_to(&mut self, now: f64) -> usize {
        let mut executed = 0;
        while self.entries.peek().is_some_and(|e| e.time <= now) {
            let Some(entry) = self.entries.pop() else {
                break;
            };
            self.current_time = self.current_time.max(entry.time);
            let time = self.current_time;
            executed += 1;

            match entry.task {
                Task::Defer(callback) => callback(time),
                Task::Tick(tickable) => {
                    let outcome = match tickable.try_borrow_mut() {
                        Ok(mut t) => t.tick(time),
                        Err(_) => Err(anyhow::anyhow!("tickable re-entered while ticking")),
                    };
                    match outcome {
                        Ok(Some(next)) if next.is_finite() => {
                            self.push(next.max(time), Task::Tick(tickable));
                        }
                        Ok(Some(next)) => {
                            log::warn!("Dropping tickable: non-finite next time {} at {:.3}s", next, time);
                        }
                        Ok(None) => {
                            log::debug!("Tickable finished at {:.3}s", time);
                        }
                        Err(e) => {
                            log::warn!("Dropping tickable after error at {:.3}s: {:#}", time, e);
                        }
                    }
                }
            }
        }
        self.current_time = self.current_time.max(now);
        executed
    }

    fn push(&mut self, time: f64, task: Task) {
        self.seq += 1;
        self.entries.push(Entry {
            time,
            seq: self.seq,
            task,
        });
    }
}
