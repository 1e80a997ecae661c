use crate::net::channel::{Channel, ChannelState, WriteQueue};
use crate::net::frame;
use crate::net::shared::{
    ConnectionId, Destination, ErrorType, ErrorUtils, MessageListener, NetworkError, NetworkResult,
    RouterMessage, Side,
};
use crossbeam_queue::SegQueue;
use hashbrown::HashMap;
use mio::net::{TcpListener, TcpStream};
use orbit::logging;
use std::cmp::min;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

const SERVER_TOKEN: mio::Token = mio::Token(0);
const WAKE_TOKEN: mio::Token = mio::Token(1);
const FIRST_CHANNEL_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 1024;
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

const DRAIN_WAIT_STEP: Duration = Duration::from_secs(1);
const DRAIN_WAIT_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of frames pending on a single connection before
    /// senders block.
    pub max_write_queue_size: usize,
}

impl Default for RouterConfig {
    fn default() -> RouterConfig {
        RouterConfig {
            max_write_queue_size: 64,
        }
    }
}

/// Lazy-connect request handed from a sender to the reactor.
struct ConnectRequest {
    dest: Destination,
    queue: Arc<WriteQueue>,
}

/// Readiness mask adjustment requested by a sender after an enqueue.
enum InterestChange {
    Dest(Destination),
    Token(usize),
}

/// State shared between the reactor thread and the sender-facing API.
struct Shared {
    side: Side,
    wake: mio::SetReadiness,
    connects: SegQueue<ConnectRequest>,
    interest: SegQueue<InterestChange>,
    dest_queues: Mutex<HashMap<Destination, Arc<WriteQueue>>>,
    token_queues: Mutex<HashMap<usize, Arc<WriteQueue>>>,
    listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
    stop: AtomicBool,
    discard: AtomicBool,
    queue_capacity: usize,
}

impl Shared {
    fn notify_message(&self, message: &RouterMessage) {
        let listeners = self.listeners.read().expect("Lock poisoned");
        for listener in listeners.iter() {
            listener.on_message(message.clone());
        }
    }

    fn notify_disconnect(&self, origin: ConnectionId, peer: SocketAddr, dest: Option<&Destination>) {
        let listeners = self.listeners.read().expect("Lock poisoned");
        for listener in listeners.iter() {
            listener.on_disconnect(origin, peer, dest);
        }
    }
}

/// A non-blocking byte-stream transport. The server shape accepts inbound
/// connections, the client shape initiates outbound ones lazily on first
/// send; both share the same reactor engine running on a dedicated thread.
///
/// Every payload submitted through `send` either arrives at the peer's
/// listener exactly once, is reported as undeliverable through the disconnect
/// callback, or is discarded under `force_shutdown`.
pub struct Router {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    local_addr: Option<SocketAddr>,
}

impl Router {
    /// Starts a server-shape router accepting connections on the supplied
    /// address. Failure to bind is returned to the caller.
    pub fn listen(
        bind: &SocketAddr,
        config: &RouterConfig,
        log: &logging::Logger,
    ) -> NetworkResult<Router> {
        let listener = TcpListener::bind(bind)?;
        let local_addr = listener.local_addr()?;

        Self::start(Some(listener), Some(local_addr), Side::Server, config, log)
    }

    /// Starts a client-shape router. Connections are established lazily on
    /// the first send to a destination.
    pub fn client(config: &RouterConfig, log: &logging::Logger) -> NetworkResult<Router> {
        Self::start(None, None, Side::Client, config, log)
    }

    fn start(
        listener: Option<TcpListener>,
        local_addr: Option<SocketAddr>,
        side: Side,
        config: &RouterConfig,
        log: &logging::Logger,
    ) -> NetworkResult<Router> {
        let poll = mio::Poll::new()?;
        let (registration, wake) = mio::Registration::new2();

        poll.register(
            &registration,
            WAKE_TOKEN,
            mio::Ready::readable(),
            mio::PollOpt::edge(),
        )?;

        if let Some(listener) = &listener {
            poll.register(
                listener,
                SERVER_TOKEN,
                mio::Ready::readable(),
                mio::PollOpt::level(),
            )?;
        }

        let shared = Arc::new(Shared {
            side,
            wake,
            connects: SegQueue::new(),
            interest: SegQueue::new(),
            dest_queues: Mutex::new(HashMap::new()),
            token_queues: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            stop: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            queue_capacity: config.max_write_queue_size,
        });

        let name = match side {
            Side::Server => "galileo-router-server",
            Side::Client => "galileo-router-client",
        };

        let reactor_shared = Arc::clone(&shared);
        let reactor_log = log.new(logging::o!("thread" => name));

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let reactor = Reactor {
                    poll,
                    events: mio::Events::with_capacity(EVENTS_CAPACITY),
                    listener,
                    _wake_registration: registration,
                    channels: HashMap::new(),
                    dest_index: HashMap::new(),
                    next_token: FIRST_CHANNEL_TOKEN,
                    shared: reactor_shared,
                    log: reactor_log,
                };

                reactor.run();
            })?;

        Ok(Router {
            shared,
            thread: Mutex::new(Some(handle)),
            local_addr,
        })
    }

    /// The address the server shape is accepting on.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Registers a listener for assembled frames and connectivity changes.
    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) {
        self.shared
            .listeners
            .write()
            .expect("Lock poisoned")
            .push(listener);
    }

    /// Queues a frame for the destination, lazily establishing the
    /// connection. At most one connection per destination is ever held; the
    /// call blocks while the connection's write queue is at capacity.
    pub fn send(&self, dest: &Destination, payload: &[u8]) -> NetworkResult<()> {
        let frame = frame::encode(payload)?;

        if self.shared.stop.load(Ordering::Acquire) {
            return Err(NetworkError::Fatal(ErrorType::QueueClosed));
        }

        let queue = {
            let mut queues = self.shared.dest_queues.lock().expect("Lock poisoned");

            match queues.get(dest) {
                Some(queue) => Arc::clone(queue),
                None => {
                    let queue = Arc::new(WriteQueue::new(self.shared.queue_capacity));
                    queues.insert(dest.clone(), Arc::clone(&queue));
                    self.shared.connects.push(ConnectRequest {
                        dest: dest.clone(),
                        queue: Arc::clone(&queue),
                    });
                    queue
                }
            }
        };

        queue.push(frame)?;
        self.shared.interest.push(InterestChange::Dest(dest.clone()));
        self.wake();

        Ok(())
    }

    /// Queues a frame on the live connection identified by `conn`, allowing a
    /// reply over the exact socket a request arrived on.
    pub fn send_to(&self, conn: ConnectionId, payload: &[u8]) -> NetworkResult<()> {
        let frame = frame::encode(payload)?;

        let queue = self
            .shared
            .token_queues
            .lock()
            .expect("Lock poisoned")
            .get(&conn.token)
            .cloned()
            .ok_or(NetworkError::Fatal(ErrorType::NotConnected))?;

        queue.push(frame)?;
        self.shared.interest.push(InterestChange::Token(conn.token));
        self.wake();

        Ok(())
    }

    /// Sends the payload to every destination, reporting the first failure
    /// after all destinations have been attempted.
    pub fn broadcast(&self, dests: &[Destination], payload: &[u8]) -> NetworkResult<()> {
        let mut result = Ok(());

        for dest in dests {
            let sent = self.send(dest, payload);
            if sent.is_err() && result.is_ok() {
                result = sent;
            }
        }

        result
    }

    /// Total frames pending across all write queues.
    pub fn pending_writes(&self) -> usize {
        let mut queues: Vec<Arc<WriteQueue>> = Vec::new();

        for queue in self.shared.token_queues.lock().expect("Lock poisoned").values() {
            queues.push(Arc::clone(queue));
        }

        // Destination queues not yet handed to the reactor
        for queue in self.shared.dest_queues.lock().expect("Lock poisoned").values() {
            if !queues.iter().any(|known| Arc::ptr_eq(known, queue)) {
                queues.push(Arc::clone(queue));
            }
        }

        queues.iter().map(|queue| queue.len()).sum()
    }

    /// Graceful shutdown: polls the write queues with escalating waits until
    /// they drain or their connections drop, then stops the reactor.
    pub fn shutdown(&self) {
        let mut wait = DRAIN_WAIT_STEP;

        while self.pending_writes() > 0 {
            thread::sleep(wait);
            wait = min(wait + DRAIN_WAIT_STEP, DRAIN_WAIT_MAX);
        }

        self.stop_reactor();
    }

    /// Immediate shutdown: pending frames are discarded and blocked senders
    /// released with an error.
    pub fn force_shutdown(&self) {
        self.shared.discard.store(true, Ordering::Release);

        for queue in self.shared.token_queues.lock().expect("Lock poisoned").values() {
            queue.close();
        }
        for queue in self.shared.dest_queues.lock().expect("Lock poisoned").values() {
            queue.close();
        }

        self.stop_reactor();
    }

    fn stop_reactor(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.wake();

        if let Some(handle) = self.thread.lock().expect("Lock poisoned").take() {
            drop(handle.join());
        }
    }

    #[inline]
    fn wake(&self) {
        drop(self.shared.wake.set_readiness(mio::Ready::readable()));
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.force_shutdown();
    }
}

/// A server and a client router composed into one duplex node endpoint with
/// independent reactor threads.
pub struct DualRouter {
    server: Router,
    client: Router,
}

impl DualRouter {
    pub fn new(
        bind: &SocketAddr,
        config: &RouterConfig,
        log: &logging::Logger,
    ) -> NetworkResult<DualRouter> {
        Ok(DualRouter {
            server: Router::listen(bind, config, log)?,
            client: Router::client(config, log)?,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) {
        self.server.add_listener(Arc::clone(&listener));
        self.client.add_listener(listener);
    }

    /// Outbound send through the client side.
    #[inline]
    pub fn send(&self, dest: &Destination, payload: &[u8]) -> NetworkResult<()> {
        self.client.send(dest, payload)
    }

    /// Reply over the connection a frame arrived on, whichever side holds it.
    #[inline]
    pub fn send_to(&self, conn: ConnectionId, payload: &[u8]) -> NetworkResult<()> {
        match conn.side {
            Side::Server => self.server.send_to(conn, payload),
            Side::Client => self.client.send_to(conn, payload),
        }
    }

    #[inline]
    pub fn broadcast(&self, dests: &[Destination], payload: &[u8]) -> NetworkResult<()> {
        self.client.broadcast(dests, payload)
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
        self.server.shutdown();
    }

    pub fn force_shutdown(&self) {
        self.client.force_shutdown();
        self.server.force_shutdown();
    }
}

/// The reactor owns the selector, the live channels and the token space.
/// Only this thread touches them.
struct Reactor {
    poll: mio::Poll,
    events: mio::Events,
    listener: Option<TcpListener>,
    _wake_registration: mio::Registration,
    channels: HashMap<usize, Channel>,
    dest_index: HashMap<Destination, usize>,
    next_token: usize,
    shared: Arc<Shared>,
    log: logging::Logger,
}

impl Reactor {
    fn run(mut self) {
        logging::debug!(self.log, "reactor started");

        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                self.teardown();
                return;
            }

            self.drain_connects();
            self.drain_interest();

            self.poll
                .poll(&mut self.events, Some(POLL_TIMEOUT))
                .expect("Selector poll failed");

            let ready: Vec<(mio::Token, mio::Ready)> = self
                .events
                .iter()
                .map(|event| (event.token(), event.readiness()))
                .collect();

            for (token, readiness) in ready {
                match token {
                    SERVER_TOKEN => self.accept_all(),
                    WAKE_TOKEN => drop(self.shared.wake.set_readiness(mio::Ready::empty())),
                    mio::Token(token) => self.service(token, readiness),
                }
            }
        }
    }

    #[inline]
    fn alloc_token(&mut self) -> usize {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Establishes the connections senders have requested since the last
    /// iteration.
    fn drain_connects(&mut self) {
        while let Some(ConnectRequest { dest, queue }) = self.shared.connects.pop() {
            let addr = match dest.resolve() {
                Ok(addr) => addr,
                Err(err) => {
                    logging::warn!(self.log, "destination did not resolve";
                                   "dest" => %dest,
                                   "error" => ?err);
                    self.fail_connect(&dest, &queue, None);
                    continue;
                }
            };

            match TcpStream::connect(&addr) {
                Ok(stream) => {
                    let token = self.alloc_token();
                    let channel =
                        Channel::outbound(token, stream, addr, dest.clone(), Arc::clone(&queue), &self.log);

                    if channel.register(&self.poll).has_failed() {
                        logging::warn!(self.log, "channel registration failed";
                                       "dest" => %dest,
                                       "token" => token);
                        self.fail_connect(&dest, &queue, Some(addr));
                        continue;
                    }

                    logging::debug!(self.log, "connecting";
                                    "dest" => %dest,
                                    "peer" => %addr,
                                    "token" => token);

                    self.dest_index.insert(dest, token);
                    self.shared
                        .token_queues
                        .lock()
                        .expect("Lock poisoned")
                        .insert(token, queue);
                    self.channels.insert(token, channel);
                }
                Err(err) => {
                    logging::warn!(self.log, "connect failed";
                                   "dest" => %dest,
                                   "error" => ?err);
                    self.fail_connect(&dest, &queue, Some(addr));
                }
            }
        }
    }

    /// Reports a connection that never came up: pending frames are
    /// undeliverable and the destination mapping is dropped so the next send
    /// retries from scratch.
    fn fail_connect(&mut self, dest: &Destination, queue: &Arc<WriteQueue>, addr: Option<SocketAddr>) {
        queue.close();
        self.shared
            .dest_queues
            .lock()
            .expect("Lock poisoned")
            .remove(dest);

        let peer = addr.unwrap_or_else(|| {
            "0.0.0.0:0".parse().expect("Static address must parse")
        });
        let origin = ConnectionId {
            side: self.shared.side,
            token: self.alloc_token(),
        };

        self.shared.notify_disconnect(origin, peer, Some(dest));
    }

    /// Applies the readiness masks senders have requested.
    fn drain_interest(&mut self) {
        while let Some(change) = self.shared.interest.pop() {
            let token = match change {
                InterestChange::Dest(dest) => match self.dest_index.get(&dest) {
                    Some(token) => *token,
                    None => continue,
                },
                InterestChange::Token(token) => token,
            };

            if let Some(channel) = self.channels.get(&token) {
                if channel.reregister(&self.poll).has_failed() {
                    self.disconnect(token);
                }
            }
        }
    }

    fn accept_all(&mut self) {
        loop {
            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let token = self.alloc_token();
                    let queue = Arc::new(WriteQueue::new(self.shared.queue_capacity));
                    let channel = Channel::inbound(token, stream, peer, Arc::clone(&queue), &self.log);

                    if channel.register(&self.poll).has_failed() {
                        logging::warn!(self.log, "accepted channel registration failed";
                                       "peer" => %peer);
                        continue;
                    }

                    logging::debug!(self.log, "accepted connection";
                                    "peer" => %peer,
                                    "token" => token);

                    self.shared
                        .token_queues
                        .lock()
                        .expect("Lock poisoned")
                        .insert(token, queue);
                    self.channels.insert(token, channel);
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    logging::warn!(self.log, "accept failed"; "error" => ?err);
                    return;
                }
            }
        }
    }

    /// Services one ready connection, in connect -> read -> write order.
    fn service(&mut self, token: usize, readiness: mio::Ready) {
        let state = match self.channels.get(&token) {
            Some(channel) => channel.state(),
            None => return,
        };

        if state == ChannelState::Connecting {
            if !readiness.is_writable() {
                return;
            }

            let finalized = self
                .channels
                .get_mut(&token)
                .expect("Channel must exist")
                .finalize_connect();

            match finalized {
                Ok(()) => {
                    let channel = &self.channels[&token];
                    if channel.reregister(&self.poll).has_failed() {
                        self.disconnect(token);
                        return;
                    }
                }
                Err(err) => {
                    logging::debug!(self.log, "connect finalization failed";
                                    "token" => token,
                                    "error" => ?err);
                    self.disconnect(token);
                    return;
                }
            }
        }

        if readiness.is_readable() && self.read_ready(token).has_failed() {
            self.disconnect(token);
            return;
        }

        if readiness.is_writable() && self.write_ready(token).has_failed() {
            self.disconnect(token);
        }
    }

    /// Reads everything the socket has, delivering each completed frame to
    /// every registered listener.
    fn read_ready(&mut self, token: usize) -> NetworkResult<()> {
        let channel = self.channels.get_mut(&token).expect("Channel must exist");

        channel.receive()?;

        while let Some(payload) = channel.next_frame()? {
            let message = RouterMessage {
                payload,
                origin: ConnectionId {
                    side: self.shared.side,
                    token,
                },
                peer: channel.peer(),
                dest: channel.dest().cloned(),
            };

            self.shared.notify_message(&message);
        }

        Ok(())
    }

    /// Drains the write queue into the socket; once empty the write interest
    /// is dropped until the next enqueue re-arms it.
    fn write_ready(&mut self, token: usize) -> NetworkResult<()> {
        let channel = self.channels.get_mut(&token).expect("Channel must exist");

        if channel.state() != ChannelState::Connected {
            return Ok(());
        }

        match channel.flush() {
            Ok(()) => channel.reregister(&self.poll),
            Err(NetworkError::Wait) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn disconnect(&mut self, token: usize) {
        let mut channel = match self.channels.remove(&token) {
            Some(channel) => channel,
            None => return,
        };

        drop(channel.deregister(&self.poll));
        channel.close();

        self.shared
            .token_queues
            .lock()
            .expect("Lock poisoned")
            .remove(&token);

        if let Some(dest) = channel.dest() {
            self.dest_index.remove(dest);
            self.shared
                .dest_queues
                .lock()
                .expect("Lock poisoned")
                .remove(dest);
        }

        logging::info!(self.log, "disconnected";
                       "token" => token,
                       "peer" => %channel.peer());

        let origin = ConnectionId {
            side: self.shared.side,
            token,
        };
        self.shared.notify_disconnect(origin, channel.peer(), channel.dest());
    }

    fn teardown(&mut self) {
        let discard = self.shared.discard.load(Ordering::Acquire);

        for channel in self.channels.values_mut() {
            if !discard {
                drop(channel.flush());
            }
            channel.close();
        }

        self.channels.clear();
        self.dest_index.clear();
        self.shared.token_queues.lock().expect("Lock poisoned").clear();
        self.shared.dest_queues.lock().expect("Lock poisoned").clear();

        logging::debug!(self.log, "reactor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit::logging;
    use std::net::TcpStream as StdStream;
    use std::io::Write;
    use std::time::Instant;

    struct Recorder {
        messages: Mutex<Vec<RouterMessage>>,
        disconnects: Mutex<Vec<Option<Destination>>>,
    }

    impl Recorder {
        fn new() -> Arc<Recorder> {
            Arc::new(Recorder {
                messages: Mutex::new(Vec::new()),
                disconnects: Mutex::new(Vec::new()),
            })
        }

        fn wait_for_messages(&self, count: usize) -> Vec<RouterMessage> {
            let deadline = Instant::now() + Duration::from_secs(5);

            loop {
                {
                    let messages = self.messages.lock().unwrap();
                    if messages.len() >= count {
                        return messages.clone();
                    }
                }

                if Instant::now() > deadline {
                    panic!("Timed out waiting for {} messages", count);
                }

                thread::sleep(Duration::from_millis(10));
            }
        }

        fn wait_for_disconnect(&self) {
            let deadline = Instant::now() + Duration::from_secs(5);

            while self.disconnects.lock().unwrap().is_empty() {
                if Instant::now() > deadline {
                    panic!("Timed out waiting for a disconnect");
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    impl MessageListener for Recorder {
        fn on_message(&self, message: RouterMessage) {
            self.messages.lock().unwrap().push(message);
        }

        fn on_disconnect(&self, _origin: ConnectionId, _peer: SocketAddr, dest: Option<&Destination>) {
            self.disconnects.lock().unwrap().push(dest.cloned());
        }
    }

    fn server_with_recorder(config: &RouterConfig) -> (Router, Arc<Recorder>, Destination) {
        let bind = "127.0.0.1:0".parse().unwrap();
        let router = Router::listen(&bind, config, &logging::discard()).unwrap();
        let recorder = Recorder::new();
        router.add_listener(Arc::clone(&recorder) as Arc<dyn MessageListener>);

        let addr = router.local_addr().unwrap();
        let dest = Destination::new("127.0.0.1", addr.port());

        (router, recorder, dest)
    }

    #[test]
    fn test_server_assembles_inbound_frames() {
        let (_router, recorder, dest) = server_with_recorder(&RouterConfig::default());

        let mut stream = StdStream::connect((dest.host.as_str(), dest.port)).unwrap();
        stream.write_all(&frame::encode(b"first").unwrap()).unwrap();
        stream.write_all(&frame::encode(b"second").unwrap()).unwrap();

        let messages = recorder.wait_for_messages(2);

        assert_eq!(messages[0].payload, b"first".to_vec());
        assert_eq!(messages[1].payload, b"second".to_vec());
        assert_eq!(messages[0].origin, messages[1].origin);
        assert_eq!(messages[0].origin.side, Side::Server);
    }

    #[test]
    fn test_client_send_and_reply_roundtrip() {
        let config = RouterConfig::default();
        let (server, server_recorder, dest) = server_with_recorder(&config);

        let client = Router::client(&config, &logging::discard()).unwrap();
        let client_recorder = Recorder::new();
        client.add_listener(Arc::clone(&client_recorder) as Arc<dyn MessageListener>);

        client.send(&dest, b"request").unwrap();

        let inbound = server_recorder.wait_for_messages(1);
        assert_eq!(inbound[0].payload, b"request".to_vec());

        // Reply over the exact connection the request arrived on
        server.send_to(inbound[0].origin, b"reply").unwrap();

        let replies = client_recorder.wait_for_messages(1);
        assert_eq!(replies[0].payload, b"reply".to_vec());
        assert_eq!(replies[0].origin.side, Side::Client);
        assert_eq!(replies[0].dest.as_ref(), Some(&dest));
    }

    #[test]
    fn test_fifo_order_per_connection() {
        let config = RouterConfig::default();
        let (_server, recorder, dest) = server_with_recorder(&config);
        let client = Router::client(&config, &logging::discard()).unwrap();

        for index in 0..20u8 {
            client.send(&dest, &[index + 1]).unwrap();
        }

        let messages = recorder.wait_for_messages(20);

        for (index, message) in messages.iter().enumerate() {
            assert_eq!(message.payload, vec![index as u8 + 1]);
        }
    }

    #[test]
    fn test_single_connection_per_destination() {
        let config = RouterConfig::default();
        let (_server, recorder, dest) = server_with_recorder(&config);
        let client = Router::client(&config, &logging::discard()).unwrap();

        for _ in 0..10 {
            client.send(&dest, b"ping").unwrap();
        }

        let messages = recorder.wait_for_messages(10);
        let first_origin = messages[0].origin;

        assert!(messages.iter().all(|message| message.origin == first_origin));
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let config = RouterConfig::default();
        let client = Router::client(&config, &logging::discard()).unwrap();

        let result = client.send_to(
            ConnectionId {
                side: Side::Client,
                token: 9999,
            },
            b"nobody home",
        );

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::NotConnected)
        );
    }

    #[test]
    fn test_backpressure_blocks_then_force_shutdown_releases() {
        let config = RouterConfig {
            max_write_queue_size: 2,
        };

        // A listener that never accepts: frames pile up in the write queue
        let sink = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dest = Destination::new("127.0.0.1", sink.local_addr().unwrap().port());

        let client = Arc::new(Router::client(&config, &logging::discard()).unwrap());

        let payload = vec![0u8; 1024 * 1024];
        let sender = Arc::clone(&client);
        let producer = thread::spawn(move || {
            let mut completed = 0;
            for _ in 0..32 {
                if sender.send(&dest, &payload).is_err() {
                    break;
                }
                completed += 1;
            }
            completed
        });

        thread::sleep(Duration::from_millis(500));
        assert!(!producer.is_finished());

        client.force_shutdown();

        let completed = producer.join().unwrap();
        assert!(completed < 32);
    }

    #[test]
    fn test_disconnect_then_lazy_reconnect() {
        let config = RouterConfig::default();
        let (server_one, recorder_one, dest) = server_with_recorder(&config);
        let port = dest.port;

        let client = Router::client(&config, &logging::discard()).unwrap();
        let client_recorder = Recorder::new();
        client.add_listener(Arc::clone(&client_recorder) as Arc<dyn MessageListener>);

        client.send(&dest, b"m1").unwrap();
        recorder_one.wait_for_messages(1);

        // Kill the first server; the client observes the disconnect
        server_one.force_shutdown();
        client_recorder.wait_for_disconnect();

        // Restart on the same port and send again: a fresh connection comes up
        let bind = format!("127.0.0.1:{}", port).parse().unwrap();
        let server_two = Router::listen(&bind, &config, &logging::discard()).unwrap();
        let recorder_two = Recorder::new();
        server_two.add_listener(Arc::clone(&recorder_two) as Arc<dyn MessageListener>);

        client.send(&dest, b"m2").unwrap();

        let messages = recorder_two.wait_for_messages(1);
        assert_eq!(messages[0].payload, b"m2".to_vec());
    }

    #[test]
    fn test_send_after_force_shutdown() {
        let config = RouterConfig::default();
        let client = Router::client(&config, &logging::discard()).unwrap();

        client.force_shutdown();

        let dest = Destination::new("127.0.0.1", 1);
        let result = client.send(&dest, b"late");

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::QueueClosed)
        );
    }

    #[test]
    fn test_graceful_shutdown_drains() {
        let config = RouterConfig::default();
        let (_server, recorder, dest) = server_with_recorder(&config);
        let client = Router::client(&config, &logging::discard()).unwrap();

        for index in 0..5u8 {
            client.send(&dest, &[index]).unwrap();
        }

        client.shutdown();

        let messages = recorder.wait_for_messages(5);
        assert_eq!(messages.len(), 5);
    }
}
