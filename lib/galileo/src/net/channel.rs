use crate::net::buffer::Buffer;
use crate::net::frame;
use crate::net::shared::{Destination, ErrorType, NetworkError, NetworkResult, Side};
use crossbeam_queue::ArrayQueue;
use mio::net::TcpStream;
use orbit::logging;
use std::io::Write;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std_semaphore::Semaphore;

/// Bounded FIFO of outbound framed payloads. Enqueueing beyond the capacity
/// blocks the caller until the reactor drains a slot or the queue is closed.
pub struct WriteQueue {
    frames: ArrayQueue<Vec<u8>>,
    slots: Semaphore,
    closed: AtomicBool,
    capacity: usize,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> WriteQueue {
        if capacity == 0 {
            panic!("Write queue capacity must be at least 1");
        }

        WriteQueue {
            frames: ArrayQueue::new(capacity),
            slots: Semaphore::new(capacity as isize),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Appends a frame, blocking while the queue is at capacity.
    pub fn push(&self, frame: Vec<u8>) -> NetworkResult<()> {
        self.slots.acquire();

        if self.closed.load(Ordering::Acquire) {
            // Hand the permit on so any other blocked producer wakes too
            self.slots.release();
            return Err(NetworkError::Fatal(ErrorType::QueueClosed));
        }

        // A held permit guarantees a free slot outside of shutdown races
        let _ = self.frames.push(frame);
        Ok(())
    }

    /// Removes the frame at the front of the queue. Reactor side only.
    #[inline]
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.frames.pop().map(|frame| {
            self.slots.release();
            frame
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Discards all pending frames and releases every blocked producer with
    /// an error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        while self.frames.pop().is_some() {}

        for _ in 0..self.capacity {
            self.slots.release();
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    /// Outbound connection not yet finalized.
    Connecting,
    Connected,
}

/// A frame being written out, with the number of bytes the socket has
/// accepted so far.
struct InFlight {
    frame: Vec<u8>,
    offset: usize,
}

/// Per-connection transmission state. Owned exclusively by the reactor thread
/// while the connection is live; the write queue is the only cross-thread
/// surface.
pub struct Channel {
    token: usize,
    side: Side,
    stream: TcpStream,
    peer: SocketAddr,
    dest: Option<Destination>,
    state: ChannelState,
    read_buffer: Buffer,
    outbound: Arc<WriteQueue>,
    in_flight: Option<InFlight>,
    log: logging::Logger,
}

impl Channel {
    /// Creates the tracker for a connection this node initiated. The stream
    /// is mid-connect; the reactor finalizes it on the first writable event.
    pub fn outbound(
        token: usize,
        stream: TcpStream,
        peer: SocketAddr,
        dest: Destination,
        queue: Arc<WriteQueue>,
        log: &logging::Logger,
    ) -> Channel {
        Channel {
            token,
            side: Side::Client,
            stream,
            peer,
            dest: Some(dest),
            state: ChannelState::Connecting,
            read_buffer: Buffer::new(),
            outbound: queue,
            in_flight: None,
            log: log.new(logging::o!()),
        }
    }

    /// Creates the tracker for an accepted connection.
    pub fn inbound(
        token: usize,
        stream: TcpStream,
        peer: SocketAddr,
        queue: Arc<WriteQueue>,
        log: &logging::Logger,
    ) -> Channel {
        Channel {
            token,
            side: Side::Server,
            stream,
            peer,
            dest: None,
            state: ChannelState::Connected,
            read_buffer: Buffer::new(),
            outbound: queue,
            in_flight: None,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn token(&self) -> usize {
        self.token
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn dest(&self) -> Option<&Destination> {
        self.dest.as_ref()
    }

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[inline]
    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.outbound
    }

    /// Returns true if there is outgoing data on the channel.
    #[inline]
    pub fn has_egress(&self) -> bool {
        self.in_flight.is_some() || !self.outbound.is_empty()
    }

    /// The readiness mask the channel currently needs.
    #[inline]
    pub fn interest(&self) -> mio::Ready {
        match self.state {
            ChannelState::Connecting => mio::Ready::writable(),
            ChannelState::Connected => {
                if self.has_egress() {
                    mio::Ready::readable() | mio::Ready::writable()
                } else {
                    mio::Ready::readable()
                }
            }
        }
    }

    /// Registers this channel on the supplied poll.
    #[inline]
    pub fn register(&self, poll: &mio::Poll) -> NetworkResult<()> {
        poll.register(
            &self.stream,
            mio::Token(self.token),
            self.interest(),
            mio::PollOpt::level(),
        )
        .map_err(Into::into)
    }

    /// Applies the current interest mask to an existing registration.
    #[inline]
    pub fn reregister(&self, poll: &mio::Poll) -> NetworkResult<()> {
        poll.reregister(
            &self.stream,
            mio::Token(self.token),
            self.interest(),
            mio::PollOpt::level(),
        )
        .map_err(Into::into)
    }

    #[inline]
    pub fn deregister(&self, poll: &mio::Poll) -> NetworkResult<()> {
        poll.deregister(&self.stream).map_err(Into::into)
    }

    /// Finalizes an in-progress outbound connection.
    pub fn finalize_connect(&mut self) -> NetworkResult<()> {
        if let Some(error) = self.stream.take_error()? {
            return Err(error.into());
        }

        self.state = ChannelState::Connected;

        logging::debug!(self.log, "connection established";
                        "token" => self.token,
                        "peer" => %self.peer);

        Ok(())
    }

    /// Reads all available data off the socket into the assembly buffer.
    #[inline]
    pub fn receive(&mut self) -> NetworkResult<usize> {
        let received = self.read_buffer.ingress(&self.stream)?;

        logging::trace!(self.log, "received data";
                        "token" => self.token,
                        "bytes" => received);

        Ok(received)
    }

    /// Extracts the next complete payload from the assembly buffer.
    #[inline]
    pub fn next_frame(&mut self) -> NetworkResult<Option<Vec<u8>>> {
        frame::extract(&mut self.read_buffer)
    }

    /// Writes queued frames to the socket for as long as it accepts data.
    /// Returns `Wait` when the socket would block with data still pending; a
    /// partial write keeps the front-of-queue frame in flight.
    pub fn flush(&mut self) -> NetworkResult<()> {
        loop {
            if self.in_flight.is_none() {
                match self.outbound.pop() {
                    Some(frame) => self.in_flight = Some(InFlight { frame, offset: 0 }),
                    None => return Ok(()),
                }
            }

            let current = self.in_flight.as_mut().expect("In-flight frame must be set");

            match (&self.stream).write(&current.frame[current.offset..]) {
                Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                Ok(count) => {
                    current.offset += count;

                    if current.offset == current.frame.len() {
                        self.in_flight = None;
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(NetworkError::Wait);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Closes the channel: pending writers are released with an error and the
    /// underlying stream is shut down.
    pub fn close(&mut self) {
        logging::debug!(self.log, "closing channel";
                        "token" => self.token,
                        "peer" => %self.peer,
                        "pending_writes" => self.outbound.len(),
                        "read_size" => self.read_buffer.len());

        self.outbound.close();
        self.read_buffer.clear();

        // The peer may already be gone
        drop(self.stream.shutdown(Shutdown::Both));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::shared::ErrorUtils;
    use orbit::logging;
    use std::io::Read;
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};
    use std::thread;
    use std::time::Duration;

    fn connected_pair() -> (TcpStream, StdStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let local = StdStream::connect(addr).unwrap();
        let (remote, _) = listener.accept().unwrap();

        local.set_nonblocking(true).unwrap();
        let local = TcpStream::from_stream(local).unwrap();

        (local, remote)
    }

    fn test_channel(stream: TcpStream, queue: Arc<WriteQueue>) -> Channel {
        let peer = stream.peer_addr().unwrap();
        Channel::inbound(7, stream, peer, queue, &logging::discard())
    }

    #[test]
    fn test_queue_capacity_respected() {
        let queue = WriteQueue::new(2);

        queue.push(vec![1]).unwrap();
        queue.push(vec![2]).unwrap();

        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_fifo_order() {
        let queue = WriteQueue::new(4);

        queue.push(vec![1]).unwrap();
        queue.push(vec![2]).unwrap();
        queue.push(vec![3]).unwrap();

        assert_eq!(queue.pop().unwrap(), vec![1]);
        assert_eq!(queue.pop().unwrap(), vec![2]);
        assert_eq!(queue.pop().unwrap(), vec![3]);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_blocked_push_released_by_close() {
        let queue = Arc::new(WriteQueue::new(1));
        queue.push(vec![0]).unwrap();

        let blocked = Arc::clone(&queue);
        let producer = thread::spawn(move || blocked.push(vec![1]));

        // Give the producer time to block on the full queue
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        queue.close();

        let result = producer.join().unwrap();
        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::QueueClosed)
        );
    }

    #[test]
    fn test_queue_blocked_push_released_by_pop() {
        let queue = Arc::new(WriteQueue::new(1));
        queue.push(vec![0]).unwrap();

        let blocked = Arc::clone(&queue);
        let producer = thread::spawn(move || blocked.push(vec![1]));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.pop().unwrap(), vec![0]);

        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop().unwrap(), vec![1]);
    }

    #[test]
    fn test_queue_push_after_close() {
        let queue = WriteQueue::new(2);
        queue.close();

        let result = queue.push(vec![1]);

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::QueueClosed)
        );
    }

    #[test]
    #[should_panic(expected = "Write queue capacity must be at least 1")]
    fn test_queue_zero_capacity() {
        let _ = WriteQueue::new(0);
    }

    #[test]
    fn test_flush_writes_queued_frames() {
        let (local, mut remote) = connected_pair();
        let queue = Arc::new(WriteQueue::new(8));
        let mut channel = test_channel(local, Arc::clone(&queue));

        queue.push(frame::encode(b"hello").unwrap()).unwrap();
        queue.push(frame::encode(b"world").unwrap()).unwrap();

        channel.flush().unwrap();
        assert!(!channel.has_egress());

        let mut received = vec![0u8; 18];
        remote.read_exact(&mut received).unwrap();

        let mut expected = frame::encode(b"hello").unwrap();
        expected.extend(frame::encode(b"world").unwrap());
        assert_eq!(received, expected);
    }

    #[test]
    fn test_receive_assembles_frames() {
        let (local, mut remote) = connected_pair();
        let queue = Arc::new(WriteQueue::new(8));
        let mut channel = test_channel(local, queue);

        let frame_bytes = frame::encode(b"payload").unwrap();
        remote.write_all(&frame_bytes).unwrap();

        // Wait for the bytes to land in the local socket buffer
        let mut payload = None;
        for _ in 0..100 {
            match channel.receive() {
                Ok(_) | Err(NetworkError::Wait) => (),
                Err(err) => panic!("Unexpected receive error {:?}", err),
            }

            if let Some(found) = channel.next_frame().unwrap() {
                payload = Some(found);
                break;
            }

            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(payload.unwrap(), b"payload".to_vec());
    }

    #[test]
    fn test_receive_peer_close_is_fatal() {
        let (local, remote) = connected_pair();
        let queue = Arc::new(WriteQueue::new(8));
        let mut channel = test_channel(local, queue);

        drop(remote);

        let mut result = Ok(0);
        for _ in 0..100 {
            result = channel.receive();
            if result.has_failed() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert!(result.has_failed());
    }

    #[test]
    fn test_interest_tracks_egress() {
        let (local, _remote) = connected_pair();
        let queue = Arc::new(WriteQueue::new(8));
        let channel = test_channel(local, Arc::clone(&queue));

        assert_eq!(channel.interest(), mio::Ready::readable());

        queue.push(vec![1, 2, 3]).unwrap();

        assert_eq!(
            channel.interest(),
            mio::Ready::readable() | mio::Ready::writable()
        );
    }

    #[test]
    fn test_close_releases_queue() {
        let (local, _remote) = connected_pair();
        let queue = Arc::new(WriteQueue::new(8));
        let mut channel = test_channel(local, Arc::clone(&queue));

        queue.push(vec![1]).unwrap();
        channel.close();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
    }
}
