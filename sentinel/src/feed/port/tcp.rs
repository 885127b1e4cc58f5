//! TCP Port
//!
//! `RawPort` and mio event source over a non-blocking TCP stream.
//! Frames are newline terminated, so the incoming byte stream is split
//! back into frames at the receiving end. Oversized frames are dropped
//! up to the next terminator and reported once as a protocol error.

use super::{iobuf::IOBuf, proto, Message, RawPort, RecvError};
use mio::net::TcpStream;
use std::io;

pub struct Port {
    stream: TcpStream,
    /// Incoming buffer, used to buffer partial frames.
    rxbuf: IOBuf,
    /// Set after an oversized frame, until its terminator is seen.
    resync: bool,
}

impl Port {
    pub fn from_stream(stream: TcpStream) -> Port {
        Port {
            stream,
            rxbuf: IOBuf::new(),
            resync: false,
        }
    }

    /// Decodes the next frame already sitting in `rxbuf`, if any.
    fn recv_buffered(&mut self) -> Result<Message, RecvError> {
        let (res, size) = match proto::split_frame(self.rxbuf.pending()) {
            Ok((frame, size)) => {
                if self.resync {
                    self.resync = false;
                    (Err(RecvError::NotReady), size)
                } else {
                    (proto::parse_frame(frame).map_err(RecvError::Protocol), size)
                }
            }
            Err(proto::Error::NeedMore) => return Err(RecvError::NotReady),
            Err(perr) => {
                // Oversized frame: drop what we have and skip the remainder.
                self.rxbuf.clear();
                let report = !self.resync;
                self.resync = true;
                return if report {
                    Err(RecvError::Protocol(perr))
                } else {
                    Err(RecvError::NotReady)
                };
            }
        };
        self.rxbuf.consume(size);
        match res {
            // Tail of a dropped frame, try the next one.
            Err(RecvError::NotReady) => self.recv_buffered(),
            res => res,
        }
    }
}

impl RawPort for Port {
    /// Reads until a frame is complete or the socket runs dry. mio is
    /// edge triggered, so `NotReady` must only come from the socket.
    fn recv(&mut self) -> Result<Message, RecvError> {
        loop {
            match self.recv_buffered() {
                Err(RecvError::NotReady) => self.rxbuf.refill(&mut self.stream)?,
                res => return res,
            }
        }
    }
}

impl mio::event::Source for Port {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
