use std::cell::RefCell;
use std::rc::Rc;

/// Single-slot mailbox: writing overwrites, reading takes.
///
/// Clones share the same slot, so a producer and a consumer each hold one.
/// Unread values are dropped when a newer one arrives; there is no queue and
/// no backpressure.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the unread value it replaced.
    pub fn put(&self, value: T) -> Option<T> {
        self.slot.borrow_mut().replace(value)
    }

    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }
}
