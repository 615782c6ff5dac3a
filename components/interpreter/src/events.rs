//! Event queue of an interpreter
//!
//! Other threads post closures; the owning thread runs them between units
//! of script execution through [`Vm::service_events`].

use crate::error::{ExecResult, Exception};
use crate::vm::Vm;
use memory_manager::Generation;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work queued for an interpreter
pub type Event = Box<dyn FnOnce(&mut Vm) -> ExecResult<()> + Send>;

#[derive(Default)]
struct Shared {
    queue: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

/// Cloneable handle to an interpreter's event queue
#[derive(Clone, Default)]
pub struct EventQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue").field("pending", &self.len()).finish()
    }
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an event and wakes a waiting thread.
    pub fn post(&self, event: Event) {
        self.shared.queue.lock().push_back(event);
        self.shared.ready.notify_one();
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Returns true when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every queued event in posting order
    pub fn drain(&self) -> Vec<Event> {
        self.shared.queue.lock().drain(..).collect()
    }

    /// Blocks until an event is queued or `timeout` passes.
    ///
    /// # Returns
    ///
    /// True if events are pending.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.is_empty() {
            self.shared.ready.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }
}

impl Vm {
    /// Runs every queued event in posting order.
    ///
    /// An event that raises is logged and dropped. When nothing was queued
    /// and the interpreter has been idle long enough, the young generation
    /// is collected.
    ///
    /// # Returns
    ///
    /// The number of events run.
    pub fn service_events(&mut self) -> usize {
        let events = self.events.drain();
        let count = events.len();
        for event in events {
            if self.is_exiting() {
                break;
            }
            self.last_activity = Instant::now();
            match event(self) {
                Ok(()) => {}
                Err(Exception::Exit) => break,
                Err(exception) => {
                    let error = self.host_error(exception);
                    log::error!("event failed: {}", error);
                }
            }
        }
        if count == 0 && self.frames.is_empty() {
            let idle = self.last_activity.elapsed().as_millis() as u64;
            if self.heap.is_time_for_gc(idle) {
                self.collect(Generation::New);
            }
        }
        count
    }
}
