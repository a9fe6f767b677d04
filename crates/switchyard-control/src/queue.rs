//! Service-keyed work queue
//!
//! A key is held at most once in the ready list and handed to at most one
//! worker at a time. A key added while a worker holds it is marked dirty
//! and becomes ready again when that worker calls [`WorkQueue::done`].
//! Delayed adds sit in a deadline heap until due.

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use switchyard_types::ServiceKey;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Point-in-time queue pressure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<ServiceKey>,
    queued: HashSet<ServiceKey>,
    in_flight: HashSet<ServiceKey>,
    dirty: HashSet<ServiceKey>,
    delayed: BinaryHeap<Reverse<(Instant, u64, ServiceKey)>>,
    sequence: u64,
    shutdown: bool,
}

impl QueueState {
    fn enqueue(&mut self, key: ServiceKey) -> bool {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
            return true;
        }
        false
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((due, _, _))) = self.delayed.peek() {
            if *due > now {
                break;
            }
            if let Some(Reverse((_, _, key))) = self.delayed.pop() {
                self.enqueue(key);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((due, _, _))| *due)
    }
}

/// Work queue shared by admission, the observer, operators and workers
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `key` ready now
    pub fn add(&self, key: ServiceKey) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        if state.enqueue(key) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Make `key` ready once `delay` has elapsed
    pub fn add_after(&self, key: ServiceKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        state.sequence += 1;
        let entry = (Instant::now() + delay, state.sequence, key);
        state.delayed.push(Reverse(entry));
        drop(state);
        // A waiting worker may be sleeping toward a later deadline
        self.notify.notify_one();
    }

    /// Wait for the next ready key. Returns `None` after shutdown.
    pub async fn next(&self) -> Option<ServiceKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                state.promote_due(Instant::now());

                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                state.next_deadline()
            };

            match deadline {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release `key` after a worker finished with it
    pub fn done(&self, key: &ServiceKey) {
        let mut state = self.lock();
        state.in_flight.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.enqueue(key.clone()) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
        }
    }
}
