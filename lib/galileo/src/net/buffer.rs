use slice_deque::SliceDeque;
use std::io;

type ByteDeque = SliceDeque<u8>;

// Buffers grow in page-aligned steps
const BUF_SIZE_INCREMENT: usize = 65536;

/// A dynamically sized, double ended, buffered FIFO byte queue. Data is
/// appended at the tail and consumed from the head. Used for per-connection
/// read assembly.
pub struct Buffer {
    data: ByteDeque,
}

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        let mut data = ByteDeque::new();
        data.reserve(BUF_SIZE_INCREMENT);
        Buffer { data }
    }

    /// The number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining free capacity in the buffer.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    /// Consume `count` bytes from the front.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        unsafe { self.data.move_head(count as isize) }
    }

    /// Slice containing the buffered data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    #[inline]
    pub fn clear(&mut self) {
        let len = self.len();
        unsafe { self.data.move_head(len as isize) };
    }

    /// Read data from the supplied non-blocking reader until it would block.
    /// The buffer grows as needed. Returns the number of bytes read; a reader
    /// returning zero bytes is reported as an unexpected end of file so the
    /// caller can tear the connection down.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let mut total = 0;

        loop {
            if self.free_capacity() == 0 {
                self.data.reserve(BUF_SIZE_INCREMENT);
            }

            let result = unsafe { reader.read(self.data.tail_head_slice()) };

            match result {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(count) => {
                    unsafe { self.data.move_tail(count as isize) };
                    total += count;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(err) => return Err(err),
            }
        }
    }

    /// Append raw bytes. Test and client-side helper; the hot path goes
    /// through `ingress`.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().cloned());
    }
}
