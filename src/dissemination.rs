use crate::event::Event;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// A bounded queue of membership events awaiting piggybacked transmission.
///
/// The queue is lossy by design: once full, the oldest event is evicted to
/// make room. A newly pushed event also supersedes any queued event for the
/// same node, so a stale transition never outlives a fresher one. Handles
/// are cheap clones sharing one queue; the membership table pushes and the
/// wire codec drains.
#[derive(Debug, Clone)]
pub struct DisseminationQueue {
    inner: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
}

impl DisseminationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, event: Event) {
        let mut queue = self.inner.lock().unwrap();

        queue.retain(|queued| queued.node != event.node);
        queue.push_back(event);

        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    pub(crate) fn pop(&self) -> Option<Event> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Put back an event the codec popped but could not fit.
    pub(crate) fn push_front(&self, event: Event) {
        self.inner.lock().unwrap().push_front(event);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
