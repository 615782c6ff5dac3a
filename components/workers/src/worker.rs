//! Worker interpreters
//!
//! Each worker runs its own [`Vm`] on its own thread. Interpreters never
//! share values: a message is cloned into bytes by the sender, carried
//! over a channel and rebuilt by the receiver while it services its event
//! queue, where it is handed to the global `onmessage` function.

use crate::structured_clone::{decode, encode, StructuredValue};
use core_types::{Value, VmError, VmResult};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use interpreter::{EventQueue, Service, Vm, VmConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Global function receiving delivered messages
pub const ON_MESSAGE: &str = "onmessage";

/// Longest a waiting loop goes without servicing events
const SLICE: Duration = Duration::from_millis(10);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Message inbox of one interpreter.
///
/// Sending queues the bytes and posts an event that drains them, so
/// delivery happens on the owning thread between units of script.
#[derive(Clone)]
pub struct Mailbox {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    events: EventQueue,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").field("queued", &self.receiver.len()).finish()
    }
}

impl Mailbox {
    /// Create an inbox delivering into the interpreter owning `events`
    pub fn new(events: EventQueue) -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver, events }
    }

    /// Queues an encoded message.
    pub fn send(&self, message: Vec<u8>) -> VmResult<()> {
        self.sender
            .send(message)
            .map_err(|_| VmError::io("Mailbox is closed"))?;
        let receiver = self.receiver.clone();
        self.events.post(Box::new(move |vm: &mut Vm| {
            for message in receiver.try_iter() {
                deliver(vm, &message)?;
            }
            Ok(())
        }));
        Ok(())
    }

    /// Messages not yet delivered
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

/// Rebuilds a message and hands it to `onmessage`.
fn deliver(vm: &mut Vm, message: &[u8]) -> VmResult<()> {
    let data = decode(vm, message)?;
    let Some(handler) = vm.get_global(ON_MESSAGE) else {
        log::warn!("message dropped: no {} handler", ON_MESSAGE);
        return Ok(());
    };
    let global = vm.global();
    vm.call_function(&handler, &global, &[data])?;
    Ok(())
}

/// Releases a pool slot when the worker thread ends, panics included.
struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded source of worker threads.
///
/// # Examples
///
/// ```
/// use interpreter::{Service, Vm, VmConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use workers::WorkerPool;
///
/// let service = Arc::new(Service::new());
/// let mut host = Vm::with_service(VmConfig::default(), service.clone()).unwrap();
/// let pool = WorkerPool::new(2, service, VmConfig::default());
///
/// let mut worker = pool.spawn(&host, "idle", |_vm| Ok(())).unwrap();
/// worker.terminate();
/// assert!(worker.join(&mut host, Duration::from_secs(5)).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    capacity: usize,
    live: Arc<AtomicUsize>,
    service: Arc<Service>,
    config: VmConfig,
}

impl WorkerPool {
    /// Create a pool running at most `capacity` workers at once
    pub fn new(capacity: usize, service: Arc<Service>, config: VmConfig) -> Self {
        Self {
            capacity,
            live: Arc::new(AtomicUsize::new(0)),
            service,
            config,
        }
    }

    /// Most workers alive at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers whose thread is still running
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn reserve(&self) -> VmResult<SlotGuard> {
        let mut live = self.live.load(Ordering::SeqCst);
        loop {
            if live >= self.capacity {
                return Err(VmError::memory("Worker pool exhausted"));
            }
            match self
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Ok(SlotGuard(self.live.clone())),
                Err(current) => live = current,
            }
        }
    }

    /// Starts a worker whose messages go to `parent`.
    ///
    /// The worker's interpreter is built on the new thread, gets the
    /// `postMessage` and `close` globals, then runs `setup`. Afterwards it
    /// services its event queue until it is closed or terminated.
    ///
    /// # Errors
    ///
    /// `MemoryError` when the pool is full, or the error raised while
    /// building the worker's interpreter.
    pub fn spawn<F>(&self, parent: &Vm, name: &str, setup: F) -> VmResult<Worker>
    where
        F: FnOnce(&mut Vm) -> VmResult<()> + Send + 'static,
    {
        let slot = self.reserve()?;
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{}", name, id);
        let exit = Arc::new(AtomicBool::new(false));
        let outbox = Mailbox::new(parent.events());
        let (ready_tx, ready_rx) = bounded::<VmResult<Mailbox>>(1);
        let (done_tx, done_rx) = bounded::<VmResult<()>>(1);

        let config = self.config.clone();
        let service = self.service.clone();
        let flag = exit.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let outcome = run_worker(&thread_name, config, service, flag, outbox, ready_tx, setup);
                drop(slot);
                let _ = done_tx.send(outcome);
            })
            .map_err(|e| VmError::internal(format!("Can't start worker thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(inbox)) => {
                log::debug!("worker {} started", name);
                Ok(Worker {
                    name,
                    inbox,
                    exit,
                    done: done_rx,
                    outcome: None,
                    handle: Some(handle),
                })
            }
            Ok(Err(error)) => {
                let _ = handle.join();
                Err(error)
            }
            Err(_) => {
                let _ = handle.join();
                Err(VmError::internal(format!("Worker {} failed to start", name)))
            }
        }
    }
}

fn run_worker<F>(
    name: &str,
    config: VmConfig,
    service: Arc<Service>,
    exit: Arc<AtomicBool>,
    outbox: Mailbox,
    ready: Sender<VmResult<Mailbox>>,
    setup: F,
) -> VmResult<()>
where
    F: FnOnce(&mut Vm) -> VmResult<()>,
{
    let mut vm = match build_interpreter(config, service, exit, outbox) {
        Ok(vm) => vm,
        Err(error) => {
            let _ = ready.send(Err(error.clone()));
            return Err(error);
        }
    };
    let events = vm.events();
    let _ = ready.send(Ok(Mailbox::new(events.clone())));

    if let Err(error) = setup(&mut vm) {
        if !vm.is_exiting() {
            log::error!("worker {} failed: {}", name, error);
            return Err(error);
        }
    }
    while !vm.is_exiting() {
        events.wait(SLICE);
        vm.service_events();
    }
    log::debug!("worker {} exited", name);
    Ok(())
}

fn build_interpreter(
    config: VmConfig,
    service: Arc<Service>,
    exit: Arc<AtomicBool>,
    outbox: Mailbox,
) -> VmResult<Vm> {
    let mut vm = Vm::with_service(config, service)?;
    vm.set_exit_flag(exit);
    vm.define_native("postMessage", 1, move |vm, _this, args| {
        let data = args.first().cloned().unwrap_or_default();
        outbox.send(encode(vm, &data)?)?;
        Ok(Value::Undefined)
    })?;
    vm.define_native("close", 0, |vm, _this, _args| {
        vm.request_exit();
        Ok(Value::Undefined)
    })?;
    Ok(vm)
}

/// Handle to a running worker
pub struct Worker {
    name: String,
    inbox: Mailbox,
    exit: Arc<AtomicBool>,
    done: Receiver<VmResult<()>>,
    outcome: Option<VmResult<()>>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("exiting", &self.exit.load(Ordering::SeqCst))
            .field("finished", &self.outcome.is_some())
            .finish()
    }
}

impl Worker {
    /// Thread name of the worker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clones `value` out of `vm` and queues it for the worker.
    pub fn post_message(&self, vm: &Vm, value: &Value) -> VmResult<()> {
        self.post_bytes(encode(vm, value)?)
    }

    /// Queues an already detached value for the worker.
    pub fn post_structured(&self, value: &StructuredValue) -> VmResult<()> {
        self.post_bytes(value.to_bytes()?)
    }

    fn post_bytes(&self, message: Vec<u8>) -> VmResult<()> {
        if self.exit.load(Ordering::SeqCst) {
            return Err(VmError::internal(format!("Worker {} is exiting", self.name)));
        }
        self.inbox.send(message)
    }

    /// Asks the worker to stop at its next safe point.
    pub fn terminate(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    /// True once the worker's thread has finished
    pub fn is_finished(&mut self) -> bool {
        if self.outcome.is_none() {
            if let Ok(outcome) = self.done.try_recv() {
                self.outcome = Some(outcome);
            }
        }
        self.outcome.is_some()
    }

    /// Waits up to `timeout` for the worker to finish.
    ///
    /// The wait is cut into short slices and `vm`'s event queue is serviced
    /// between them, so messages from the worker keep arriving.
    ///
    /// # Returns
    ///
    /// True if the worker finished, false on timeout.
    ///
    /// # Errors
    ///
    /// The error the worker ended with.
    pub fn join(&mut self, vm: &mut Vm, timeout: Duration) -> VmResult<bool> {
        let deadline = Instant::now() + timeout;
        while self.outcome.is_none() {
            let now = Instant::now();
            if now >= deadline {
                vm.service_events();
                return Ok(false);
            }
            match self.done.recv_timeout(SLICE.min(deadline - now)) {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(RecvTimeoutError::Timeout) => {
                    vm.service_events();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.outcome = Some(Err(VmError::internal(format!(
                        "Worker {} ended abnormally",
                        self.name
                    ))));
                }
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        vm.service_events();
        match &self.outcome {
            Some(Err(error)) => Err(error.clone()),
            _ => Ok(true),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
