use crate::event::map::{DecodedEvent, EventMap};
use crate::event::types::Event;
use crate::net::shared::{ConnectionId, Destination, MessageListener, NetworkError, RouterMessage};
use crossbeam_queue::SegQueue;
use orbit::logging;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std_semaphore::Semaphore;

/// Failure inside an event handler. Logged by the worker loop; never fatal to
/// the reactor.
#[derive(Debug)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new<M: Into<String>>(message: M) -> HandlerError {
        HandlerError {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<NetworkError> for HandlerError {
    fn from(error: NetworkError) -> HandlerError {
        HandlerError::new(format!("network error: {:?}", error))
    }
}

/// Handles deserialized events. Implementations are shared across workers and
/// must be safe under concurrent invocation.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event, message: &RouterMessage) -> Result<(), HandlerError>;
}

/// Unbounded concurrent FIFO feeding framed payloads from the transport to
/// the workers. Take order is FIFO; with more than one worker the relative
/// completion order of two events is unspecified.
pub struct EventQueue {
    queue: SegQueue<RouterMessage>,
    available: Semaphore,
    closed: AtomicBool,
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue {
            queue: SegQueue::new(),
            available: Semaphore::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, message: RouterMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        self.queue.push(message);
        self.available.release();
    }

    /// Blocks until a payload is available. Returns `None` once the queue has
    /// been closed and drained.
    pub fn take(&self) -> Option<RouterMessage> {
        self.available.acquire();

        match self.queue.pop() {
            Some(message) => Some(message),
            None => {
                // Closed: hand the permit on so the next waiter wakes too
                self.available.release();
                None
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Releases all blocked and future takers with `None`. Already queued
    /// payloads are still handed out first.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.available.release();
        }
    }
}

impl MessageListener for EventQueue {
    /// Trivial handoff from the transport reactor thread.
    fn on_message(&self, message: RouterMessage) {
        self.push(message);
    }

    fn on_disconnect(&self, _origin: ConnectionId, _peer: SocketAddr, _dest: Option<&Destination>) {}
}

/// Deserializes queued payloads and dispatches them to the handler object.
/// Single-threaded mode: the caller owns the thread and drives
/// `process_next_event` itself.
pub struct EventReactor<H: EventHandler> {
    queue: Arc<EventQueue>,
    map: EventMap,
    handler: Arc<H>,
    log: logging::Logger,
}

impl<H: EventHandler> EventReactor<H> {
    pub fn new(
        handler: Arc<H>,
        map: EventMap,
        queue: Arc<EventQueue>,
        log: &logging::Logger,
    ) -> EventReactor<H> {
        EventReactor {
            queue,
            map,
            handler,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Takes one framed payload (blocking), deserializes it and runs the
    /// handler registered for its tag exactly once. Deserialization failures,
    /// unknown tags and handler errors are logged and swallowed. Returns
    /// false once the queue has been closed.
    pub fn process_next_event(&self) -> bool {
        let message = match self.queue.take() {
            Some(message) => message,
            None => return false,
        };

        match self.map.decode(&message.payload) {
            Ok(DecodedEvent::Known(event)) => {
                if let Err(err) = self.handler.handle(event, &message) {
                    logging::warn!(self.log, "event handler failed";
                                   "origin" => %message.origin,
                                   "error" => %err);
                }
            }
            Ok(DecodedEvent::Unknown(tag)) => {
                logging::warn!(self.log, "unknown event tag dropped";
                               "tag" => tag,
                               "origin" => %message.origin);
            }
            Err(err) => {
                logging::warn!(self.log, "event deserialization failed";
                               "origin" => %message.origin,
                               "error" => ?err);
            }
        }

        true
    }
}

/// A fixed pool of workers looping on `process_next_event`. Handlers for
/// different events may run in parallel.
pub struct ConcurrentReactor<H: EventHandler + 'static> {
    reactor: Arc<EventReactor<H>>,
    pool_size: usize,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    log: logging::Logger,
}

impl<H: EventHandler + 'static> ConcurrentReactor<H> {
    pub fn new(reactor: EventReactor<H>, pool_size: usize, log: &logging::Logger) -> ConcurrentReactor<H> {
        if pool_size == 0 {
            panic!("Worker pool must have at least one thread");
        }

        ConcurrentReactor {
            reactor: Arc::new(reactor),
            pool_size,
            workers: Mutex::new(Vec::new()),
            log: log.new(logging::o!()),
        }
    }

    /// Spawns and starts the worker threads.
    pub fn start(&self) {
        let mut workers = self.workers.lock().expect("Lock poisoned");

        if !workers.is_empty() {
            panic!("Reactor workers already started");
        }

        for index in 0..self.pool_size {
            let reactor = Arc::clone(&self.reactor);

            let handle = thread::Builder::new()
                .name(format!("galileo-worker-{}", index))
                .spawn(move || while reactor.process_next_event() {})
                .expect("Error spawning worker thread");

            workers.push(handle);
        }

        logging::debug!(self.log, "worker pool started"; "pool_size" => self.pool_size);
    }

    /// Closes the queue and joins the workers. An in-flight handler finishes
    /// its current event.
    pub fn shutdown(&self) {
        self.reactor.queue().close();

        let mut workers = self.workers.lock().expect("Lock poisoned");
        for handle in workers.drain(..) {
            drop(handle.join());
        }

        logging::debug!(self.log, "worker pool stopped");
    }
}
