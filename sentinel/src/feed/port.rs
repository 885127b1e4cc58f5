//! Engine transport
//!
//! A `Port` wraps one TCP connection to the engine and runs its own poller
//! thread. The thread decodes frames as they arrive and hands each result to
//! an owned callback; `rx_to_channel` builds the usual callback, turning the
//! `mio` readiness loop into a crossbeam channel.
//!
//! Dropping a `Port` wakes its thread, which exits and releases the callback
//! without delivering anything else. Ports are receive-only: the engine
//! pushes, this side never writes.

mod iobuf;
mod tcp;

use super::proto::{self, Message};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

/// Outcome of a failed receive on a `Port`.
#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    /// No messages available at this time.
    #[error("not ready")]
    NotReady,
    /// The engine closed the connection.
    #[error("disconnected")]
    Disconnected,
    /// Error in the data. The port stays usable.
    #[error("protocol error: {0}")]
    Protocol(proto::Error),
    /// Low level IO error.
    #[error("i/o error: {0}")]
    IO(#[from] io::Error),
}

/// Non-blocking frame source polled by the port thread.
trait RawPort {
    /// Returns a message without blocking, or RecvError::NotReady if one is not available.
    /// `Protocol` errors are recoverable; for all the other error values the port
    /// should be torn down, and possibly recreated.
    fn recv(&mut self) -> Result<Message, RecvError>;
}

/// Which address family name resolution may return. `tcp4://` and
/// `tcp6://` pin it when the resolver's first pick is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrFamilyRestrict {
    V4,
    V6,
    Either,
}

/// Default TCP port the engine publishes alerts on.
pub static ENGINE_DEFAULT_PORT: u16 = 5000;

/// Resolves `addr` to the socket addresses of the allowed family, in
/// resolver order, falling back to `ENGINE_DEFAULT_PORT` when no port is
/// given.
fn find_addrs(addr: &str, family: AddrFamilyRestrict) -> Result<Vec<SocketAddr>, io::Error> {
    // Try as given first, then with the default port appended.
    let iter = match addr.to_socket_addrs() {
        Ok(iter) => iter,
        Err(err) => {
            let addr_port = format!("{}:{}", addr, ENGINE_DEFAULT_PORT);
            match addr_port.to_socket_addrs() {
                Ok(iter) => iter,
                Err(_) => {
                    // Bare IPv6 literal.
                    let addr_port = format!("[{}]:{}", addr, ENGINE_DEFAULT_PORT);
                    match addr_port.to_socket_addrs() {
                        Ok(iter) => iter,
                        _ => {
                            return Err(err);
                        }
                    }
                }
            }
        }
    };
    let addrs: Vec<SocketAddr> = iter
        .filter(|sa| match (sa, family) {
            (SocketAddr::V4(_), AddrFamilyRestrict::V6) => false,
            (SocketAddr::V6(_), AddrFamilyRestrict::V4) => false,
            _ => true,
        })
        .collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "address resolution failed",
        ));
    }
    Ok(addrs)
}

/// Connects to the first of `addrs` that accepts, each attempt bounded by
/// `timeout`. `localhost` commonly resolves to `::1` before `127.0.0.1`.
fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<std::net::TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::Other, "no address to connect to");
    for addr in addrs {
        match std::net::TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                trace!(%addr, error = %err, "connect attempt failed");
                last_err = err;
            }
        }
    }
    Err(last_err)
}

/// Splits an endpoint url into its address part and family restriction.
///
/// A valid `url` has one of the following formats:
/// - `tcp://address[:port]`, with `tcp4` or `tcp6` to force a specific
///   version of the IP protocol should the default resolution fail.
/// - `address[:port]`, equivalent to `tcp://address[:port]`.
///
/// The port defaults to `ENGINE_DEFAULT_PORT`.
fn split_url(url: &str) -> io::Result<(&str, AddrFamilyRestrict)> {
    let split_url: Vec<&str> = url.splitn(2, "://").collect();
    let (addr, family) = match split_url[..] {
        ["tcp", addr] => (addr, AddrFamilyRestrict::Either),
        ["tcp4", addr] => (addr, AddrFamilyRestrict::V4),
        ["tcp6", addr] => (addr, AddrFamilyRestrict::V6),
        [addr] => (addr, AddrFamilyRestrict::Either),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid url scheme",
            ))
        }
    };
    let addr = addr.trim_end_matches('/');
    if addr.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "missing address"));
    }
    Ok((addr, family))
}

/// Checks that `url` is syntactically valid, without resolving it.
pub fn check_url(url: &str) -> io::Result<()> {
    split_url(url).map(|_| ())
}

/// Handle to a connected engine transport and its poller thread.
pub struct Port {
    /// Dropped to request shutdown of the port thread.
    ctl: Option<crossbeam::channel::Sender<()>>,
    waker: mio::Waker,
    peer: SocketAddr,
}

/// Capacity of the channel returned by `rx_channel`.
pub static DEFAULT_RX_CHANNEL_SIZE: usize = 64;

impl Port {
    /// Port thread: waits for readability and drains complete frames into
    /// `rx` until the connection drops, `rx` refuses, or the owner leaves.
    fn poller_thread<
        RawPortT: RawPort + mio::event::Source,
        RxCallbackT: Fn(Result<Message, RecvError>) -> io::Result<()>,
    >(
        mut raw_port: RawPortT,
        mut poll: mio::Poll,
        rx: RxCallbackT,
        ctl: crossbeam::channel::Receiver<()>,
    ) {
        use crossbeam::channel::TryRecvError;

        let mut events = mio::Events::with_capacity(2);

        if let Err(e) =
            poll.registry()
                .register(&mut raw_port, mio::Token(1), mio::Interest::READABLE)
        {
            let _ = rx(Err(RecvError::IO(e)));
            return;
        }

        'ioloop: loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                let _ = rx(Err(RecvError::IO(e)));
                break 'ioloop;
            }

            for event in events.iter() {
                match event.token() {
                    mio::Token(0) => {
                        // Woken up: the owning `Port` was dropped.
                        if let Err(TryRecvError::Disconnected) = ctl.try_recv() {
                            break 'ioloop;
                        }
                    }
                    mio::Token(1) => loop {
                        match raw_port.recv() {
                            Ok(msg) => {
                                if let Err(_) = rx(Ok(msg)) {
                                    // Receiver gone.
                                    break 'ioloop;
                                }
                            }
                            Err(RecvError::NotReady) => {
                                break;
                            }
                            Err(e) => {
                                // Only bad data leaves the connection usable.
                                let fatal = !matches!(e, RecvError::Protocol(_));
                                if rx(Err(e)).is_err() || fatal {
                                    break 'ioloop;
                                }
                            }
                        }
                    },
                    mio::Token(x) => {
                        debug!(token = x, "ignoring unexpected poll token");
                    }
                }
            }
        }
        trace!("port thread exiting");
    }

    /// Starts the port thread for `raw_port`.
    fn from_raw<
        RawPortT: RawPort + mio::event::Source + Send + 'static,
        RxCallbackT: Fn(Result<Message, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        raw_port: RawPortT,
        peer: SocketAddr,
        rx: RxCallbackT,
    ) -> io::Result<Port> {
        let (ctl, cctl) = crossbeam::channel::bounded::<()>(1);
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), mio::Token(0))?;
        thread::Builder::new()
            .name("sentinel-port".to_string())
            .spawn(move || {
                Port::poller_thread(raw_port, poll, rx, cctl);
            })?;
        Ok(Port {
            ctl: Some(ctl),
            waker,
            peer,
        })
    }

    /// Connects to the engine at `url`, sending the received messages or
    /// errors to `rx`. See `split_url` for the accepted formats.
    ///
    /// Every resolved address is tried in turn, each for at most
    /// `connect_timeout`. Once it returns `Ok`, the handshake is done.
    ///
    /// The RX callback is called from the port thread with the result of a
    /// `recv` operation on the underlying raw port. If it returns an `Err()`,
    /// the port is closed.
    pub fn new<RXT: Fn(Result<Message, RecvError>) -> io::Result<()> + Send + 'static>(
        url: &str,
        connect_timeout: Duration,
        rx: RXT,
    ) -> io::Result<Port> {
        let (addr, family) = split_url(url)?;
        let addrs = find_addrs(addr, family)?;
        let stream = connect_any(&addrs, connect_timeout)?;
        Port::from_tcp_stream(stream, rx)
    }

    /// Wraps an already connected stream. See `new()`.
    pub fn from_tcp_stream<
        RXT: Fn(Result<Message, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        stream: std::net::TcpStream,
        rx: RXT,
    ) -> io::Result<Port> {
        let peer = stream.peer_addr()?;
        stream.set_nonblocking(true)?;
        let stream = mio::net::TcpStream::from_std(stream);
        Port::from_raw(tcp::Port::from_stream(stream), peer, rx)
    }

    /// Address of the engine this port is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Channel pair for `rx_to_channel`:
    /// ```ignore
    /// let (port_rx_send, port_rx) = Port::rx_channel();
    /// let port = Port::new(url, timeout, Port::rx_to_channel(port_rx_send))?;
    /// ```
    /// In the example, `port_rx.recv()` can now be used to receive. The
    /// channel disconnects once the port thread is gone.
    pub fn rx_channel() -> (
        crossbeam::channel::Sender<Result<Message, RecvError>>,
        crossbeam::channel::Receiver<Result<Message, RecvError>>,
    ) {
        crossbeam::channel::bounded::<Result<Message, RecvError>>(DEFAULT_RX_CHANNEL_SIZE)
    }

    /// Returns a RX callback which forwards the received results to a
    /// channel (see `rx_channel`). The port thread blocks while the
    /// channel is full, so nothing is ever dropped.
    pub fn rx_to_channel(
        rx_send: crossbeam::channel::Sender<Result<Message, RecvError>>,
    ) -> impl Fn(Result<Message, RecvError>) -> io::Result<()> {
        move |rxdata| -> io::Result<()> {
            let disconnected = matches!(rxdata, Err(RecvError::Disconnected));
            if rx_send.send(rxdata).is_err() || disconnected {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            } else {
                Ok(())
            }
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        drop(self.ctl.take());
        // If the thread already exited there is nobody to wake.
        let _ = self.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn url_formats() {
        assert_eq!(
            split_url("tcp://localhost:5000").unwrap(),
            ("localhost:5000", AddrFamilyRestrict::Either)
        );
        assert_eq!(
            split_url("tcp6://::1").unwrap(),
            ("::1", AddrFamilyRestrict::V6)
        );
        assert_eq!(
            split_url("127.0.0.1").unwrap(),
            ("127.0.0.1", AddrFamilyRestrict::Either)
        );
        assert!(split_url("ws://localhost").is_err());
        assert!(split_url("tcp://").is_err());
        assert!(check_url("serial:///dev/ttyUSB0").is_err());
    }

    #[test]
    fn default_port_is_appended() {
        let addrs = find_addrs("127.0.0.1", AddrFamilyRestrict::V4).unwrap();
        assert_eq!(addrs[0].port(), ENGINE_DEFAULT_PORT);
        let addrs = find_addrs("127.0.0.1:7000", AddrFamilyRestrict::Either).unwrap();
        assert_eq!(addrs[0].port(), 7000);
        assert!(find_addrs("127.0.0.1", AddrFamilyRestrict::V6).is_err());
        let addrs = find_addrs("localhost", AddrFamilyRestrict::V4).unwrap();
        assert!(addrs.iter().all(|a| a.is_ipv4()));
    }

    #[test]
    fn connect_falls_through_refused_addresses() {
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let live = listener.local_addr().unwrap();

        let stream = connect_any(&[dead, live], Duration::from_secs(2)).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live);
        assert!(connect_any(&[dead], Duration::from_secs(2)).is_err());
        assert!(connect_any(&[], Duration::from_secs(2)).is_err());
    }

    #[test]
    fn delivers_frames_then_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let (tx, rx) = Port::rx_channel();
        let port = Port::new(&url, Duration::from_secs(2), Port::rx_to_channel(tx)).unwrap();
        let (mut engine, _) = listener.accept().unwrap();
        assert_eq!(port.peer_addr(), listener.local_addr().unwrap());

        engine
            .write_all(b"{\"event\":\"server_hello\"}\n\ngarbage\n")
            .unwrap();
        drop(engine);

        let timeout = Duration::from_secs(5);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap().unwrap(),
            Message::Other("server_hello".into())
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap().unwrap(), Message::Keepalive);
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            Err(RecvError::Protocol(proto::Error::Envelope(_)))
        ));
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            Err(RecvError::Disconnected)
        ));
        // Port thread is gone, so is the sender.
        assert!(rx.recv_timeout(timeout).is_err());
    }

    #[test]
    fn oversized_frame_is_skipped_and_port_survives() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let (tx, rx) = Port::rx_channel();
        let port = Port::new(&url, Duration::from_secs(2), Port::rx_to_channel(tx)).unwrap();
        let (mut engine, _) = listener.accept().unwrap();

        let alert = proto::AlertEvent {
            kind: "AI Anomaly".into(),
            description: "AI Behavioral Deviation Detected (91% Risk)".into(),
            transaction_id: "TX-AFTER".into(),
            score: proto::Score::Number(91.0),
            status: Some("FLAGGED_FOR_REVIEW".into()),
        };
        let mut data = vec![b'x'; 4 * proto::MAX_FRAME_SIZE + 17];
        data.push(b'\n');
        data.extend_from_slice(
            proto::encode_alert(proto::DEFAULT_ALERT_EVENT, &alert)
                .unwrap()
                .as_bytes(),
        );
        // The engine keeps the connection open, nothing else arrives.
        engine.write_all(&data).unwrap();

        let timeout = Duration::from_secs(5);
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            Err(RecvError::Protocol(proto::Error::FrameTooLong))
        ));
        match rx.recv_timeout(timeout).unwrap() {
            Ok(Message::Alert(received)) => assert_eq!(received, alert),
            other => panic!("expected the alert, got {:?}", other),
        }
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(crossbeam::channel::RecvTimeoutError::Timeout)
        ));
        drop(port);
        drop(engine);
    }

    #[test]
    fn drop_stops_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let (tx, rx) = Port::rx_channel();
        let port = Port::new(&url, Duration::from_secs(2), Port::rx_to_channel(tx)).unwrap();
        let (_engine, _) = listener.accept().unwrap();
        drop(port);
        // The channel closes without any further message.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected)
        ));
    }
}
