//! Receive buffer for byte-stream ports.

use super::{proto, RecvError};
use std::io;

/// One maximum-size frame. A full buffer with no terminator in it holds
/// an oversized frame.
const IOBUF_SIZE: usize = proto::MAX_FRAME_SIZE;

/// Bytes read from the socket that have not yet been split into frames.
pub struct IOBuf {
    buf: Box<[u8]>,
    /// Pending bytes are `buf[start..end]`.
    start: usize,
    end: usize,
}

impl IOBuf {
    pub fn new() -> IOBuf {
        IOBuf {
            buf: vec![0; IOBUF_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Drops `len` bytes from the front, at most everything pending.
    pub fn consume(&mut self, len: usize) {
        self.start += len.min(self.len());
        if self.is_empty() {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn shift_to_front(&mut self) {
        if self.start > 0 {
            let len = self.len();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Performs one read from `reader` into the free space.
    ///
    /// `NotReady` means nothing was available, `Disconnected` that the
    /// peer closed the stream. Callers clear a full buffer before refilling
    /// it; if they do not, nothing is read and `FrameTooLong` is returned.
    pub fn refill<R: io::Read>(&mut self, reader: &mut R) -> Result<(), RecvError> {
        self.shift_to_front();
        if self.end == self.buf.len() {
            return Err(RecvError::Protocol(proto::Error::FrameTooLong));
        }
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Err(RecvError::Disconnected),
            Ok(n) => {
                self.end += n;
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Err(RecvError::NotReady)
            }
            Err(e) => Err(RecvError::IO(e)),
        }
    }
}
