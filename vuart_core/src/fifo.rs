// fifo.rs
//!
//! Fixed 16 byte queue backing the RX and TX paths. Not synchronized: the
//! owning device guard must be held.

/// Hardware-defined FIFO depth of a 16550A.
pub const FIFO_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fifo {
    buf: [u8; FIFO_SIZE],
    head: usize,
    len: usize,
}

impl Fifo {
    pub const fn new() -> Self {
        Self {
            buf: [0; FIFO_SIZE],
            head: 0,
            len: 0,
        }
    }

    /// Returns `false` and leaves the queue untouched when full. Callers
    /// turn that into an overrun.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = (self.head + self.len) % FIFO_SIZE;
        self.buf[tail] = byte;
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % FIFO_SIZE;
        self.len -= 1;
        Some(byte)
    }

    /// Moves up to `out.len()` bytes out of the queue, oldest first.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.pop() {
                Some(byte) => {
                    out[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == FIFO_SIZE
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}
