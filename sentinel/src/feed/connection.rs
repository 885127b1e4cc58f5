//! Connection manager
//!
//! A `ConnectionManager` owns one logical subscription to the engine's
//! alert stream. The transport runs on a dedicated connection core thread,
//! which (re)connects according to a `ReconnectPolicy` and reports status
//! changes and validated alerts over a channel. The owner drains that
//! channel with `dispatch()` on its own thread; that is the only place
//! where the alert buffer gets written.
//!
//! `close()` cancels the subscription: the liveness flag is cleared, the
//! core is told to exit and the event receiver is dropped, so nothing can
//! be dispatched once it returns.

use super::port::{self, Port, RecvError};
use super::proto::{self, AlertEvent, Message};
use super::util;
use crate::alerts::AlertBuffer;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use tracing::{debug, info, warn};

/// Events sent by the connection core to the owning `ConnectionManager`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Handshake completed.
    Connected,
    /// An established connection was lost.
    Disconnected,
    /// A connection attempt failed. Never connected, or still not reconnected.
    FailedToConnect(String),
    /// Waiting `delay` before reconnection attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The give-up deadline passed, the core has exited.
    GaveUp,
    Alert(AlertEvent),
    /// A frame failed validation and was dropped.
    Rejected(proto::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Shortest delay between connection attempts, whatever the policy says.
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

/// Capped exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Stop retrying once this long has passed without a connection.
    /// `None` retries forever.
    pub give_up_after: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            give_up_after: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn first_delay(&self) -> Duration {
        self.initial_delay
            .max(MIN_RECONNECT_DELAY)
            .min(self.max_delay.max(MIN_RECONNECT_DELAY))
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        let cap = self.max_delay.max(MIN_RECONNECT_DELAY);
        let next = current.saturating_mul(2).max(MIN_RECONNECT_DELAY);
        if next > cap {
            cap
        } else {
            next
        }
    }
}

/// Default size of the channel between the connection core and its owner.
pub static DEFAULT_EVENT_QUEUE_SIZE: usize = 256;

/// Environment variable to enlarge `DEFAULT_EVENT_QUEUE_SIZE`.
pub static EVENT_QUEUE_SIZE_ENV: &str = "SENTINEL_EVENT_QUEUE_SIZE";

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for a single connection handshake.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub queue_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            connect_timeout: Duration::from_secs(3),
            reconnect: ReconnectPolicy::default(),
            queue_size: util::env_size(EVENT_QUEUE_SIZE_ENV, DEFAULT_EVENT_QUEUE_SIZE),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("invalid engine endpoint `{url}`: {source}")]
    InvalidEndpoint { url: String, source: io::Error },
    #[error("failed to start connection thread: {0}")]
    Spawn(io::Error),
}

/// Totals over the lifetime of a `ConnectionManager`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub alerts: u64,
    pub rejected: u64,
    pub connects: u64,
    pub failed_attempts: u64,
}

/// What a single `dispatch` call processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: usize,
    pub alerts: usize,
    pub rejected: usize,
    pub status_changed: bool,
}

impl DispatchStats {
    /// True if anything visible changed.
    pub fn changed(&self) -> bool {
        self.alerts > 0 || self.rejected > 0 || self.status_changed
    }
}

struct ConnectionCore {
    url: String,
    options: ConnectOptions,
    events: channel::Sender<Event>,
    control: channel::Receiver<()>,
    alive: Arc<AtomicBool>,
}

impl ConnectionCore {
    /// Delivers an event to the owner. Returns false once the owner is gone.
    fn emit(&self, event: Event) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        self.events.send(event).is_ok()
    }

    /// Sleeps for `delay`. Returns false if the subscription got cancelled.
    fn wait(&self, delay: Duration) -> bool {
        matches!(
            self.control.recv_timeout(delay),
            Err(channel::RecvTimeoutError::Timeout)
        )
    }

    /// Forwards messages from an established connection until the
    /// transport is lost (true) or the subscription is cancelled (false).
    fn pump(&self, port_rx: &channel::Receiver<Result<Message, RecvError>>) -> bool {
        loop {
            crossbeam::select! {
                recv(port_rx) -> res => match res {
                    Ok(Ok(Message::Alert(alert))) => {
                        if !self.emit(Event::Alert(alert)) {
                            return false;
                        }
                    }
                    Ok(Ok(Message::Other(name))) => {
                        debug!(event = %name, "ignoring engine event");
                    }
                    Ok(Ok(Message::Keepalive)) | Ok(Err(RecvError::NotReady)) => {}
                    Ok(Err(RecvError::Protocol(err))) => {
                        warn!(error = %err, "dropping malformed frame");
                        if !self.emit(Event::Rejected(err)) {
                            return false;
                        }
                    }
                    Ok(Err(err)) => {
                        debug!(error = %err, "transport error");
                        return true;
                    }
                    // Port thread exited.
                    Err(_) => return true,
                },
                recv(self.control) -> _ => return false,
            }
        }
    }

    fn run(&self) {
        let policy = &self.options.reconnect;
        let mut delay = policy.first_delay();
        let mut attempt: u32 = 0;
        let mut retrying_since: Option<Instant> = None;

        while self.alive.load(Ordering::Acquire) {
            let (port_tx, port_rx) = Port::rx_channel();
            match Port::new(
                &self.url,
                self.options.connect_timeout,
                Port::rx_to_channel(port_tx),
            ) {
                Ok(port) => {
                    info!(url = %self.url, peer = %port.peer_addr(), "connected to engine");
                    attempt = 0;
                    delay = policy.first_delay();
                    retrying_since = None;
                    if !self.emit(Event::Connected) {
                        break;
                    }
                    let lost = self.pump(&port_rx);
                    drop(port);
                    if !lost {
                        break;
                    }
                    warn!(url = %self.url, "engine connection lost");
                    if !self.emit(Event::Disconnected) {
                        break;
                    }
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(url = %self.url, error = %err, "cannot connect to engine");
                    } else {
                        debug!(url = %self.url, error = %err, attempt, "reconnect failed");
                    }
                    if !self.emit(Event::FailedToConnect(err.to_string())) {
                        break;
                    }
                }
            }

            let since = *retrying_since.get_or_insert_with(Instant::now);
            if let Some(limit) = policy.give_up_after {
                if since.elapsed() >= limit {
                    warn!(url = %self.url, "giving up on engine connection");
                    self.emit(Event::GaveUp);
                    break;
                }
            }
            attempt = attempt.saturating_add(1);
            if !self.emit(Event::Reconnecting { attempt, delay }) {
                break;
            }
            if !self.wait(delay) {
                break;
            }
            delay = policy.next_delay(delay);
        }
        debug!(url = %self.url, "connection core exiting");
    }
}

/// Handle to the running connection core.
struct Subscription {
    events: channel::Receiver<Event>,
    /// Never sent on, dropping it wakes the core up.
    control: channel::Sender<()>,
    alive: Arc<AtomicBool>,
}

impl Subscription {
    fn cancel(self) {
        self.alive.store(false, Ordering::Release);
        drop(self.control);
        drop(self.events);
    }
}

/// Owns one subscription to the engine and the connection status derived
/// from it.
pub struct ConnectionManager {
    endpoint: String,
    state: ConnectionState,
    subscription: Option<Subscription>,
    finished: bool,
    batch_limit: usize,
    stats: ConnectionStats,
}

impl ConnectionManager {
    /// Starts connecting to `endpoint` in the background and returns
    /// immediately. Connection success or failure is reported through
    /// `status()` once events are dispatched.
    pub fn open(endpoint: &str, options: ConnectOptions) -> Result<ConnectionManager, OpenError> {
        port::check_url(endpoint).map_err(|source| OpenError::InvalidEndpoint {
            url: endpoint.to_string(),
            source,
        })?;
        let queue_size = options.queue_size.max(1);
        let (event_sender, event_receiver) = channel::bounded::<Event>(queue_size);
        let (control_sender, control_receiver) = channel::bounded::<()>(1);
        let alive = Arc::new(AtomicBool::new(true));
        let core = ConnectionCore {
            url: endpoint.to_string(),
            options,
            events: event_sender,
            control: control_receiver,
            alive: alive.clone(),
        };
        thread::Builder::new()
            .name("sentinel-connection".to_string())
            .spawn(move || core.run())
            .map_err(OpenError::Spawn)?;
        info!(url = endpoint, "opened engine subscription");
        Ok(ConnectionManager::with_subscription(
            endpoint,
            Subscription {
                events: event_receiver,
                control: control_sender,
                alive,
            },
            queue_size,
        ))
    }

    fn with_subscription(
        endpoint: &str,
        subscription: Subscription,
        batch_limit: usize,
    ) -> ConnectionManager {
        ConnectionManager {
            endpoint: endpoint.to_string(),
            state: ConnectionState::Disconnected,
            subscription: Some(subscription),
            finished: false,
            batch_limit,
            stats: ConnectionStats::default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> ConnectionState {
        self.state
    }

    /// False after `close()`, or once the core gave up reconnecting.
    pub fn is_active(&self) -> bool {
        self.subscription.is_some() && !self.finished
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Applies all pending events: status changes update `status()`, alerts
    /// are inserted into `buffer`. Never blocks.
    pub fn dispatch(&mut self, buffer: &mut AlertBuffer) -> DispatchStats {
        self.dispatch_with(buffer, None, |_| {})
    }

    /// Like `dispatch`, but waits up to `wait` for the first event and
    /// shows every event to `on_event` before applying it.
    pub fn dispatch_with<F: FnMut(&Event)>(
        &mut self,
        buffer: &mut AlertBuffer,
        wait: Option<Duration>,
        mut on_event: F,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();
        if let Some(timeout) = wait {
            let first = match &self.subscription {
                Some(sub) if !self.finished => sub.events.recv_timeout(timeout).ok(),
                _ => None,
            };
            if let Some(event) = first {
                on_event(&event);
                self.apply(event, buffer, &mut stats);
            }
        }
        while stats.events < self.batch_limit {
            let event = match &self.subscription {
                Some(sub) => match sub.events.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
                None => break,
            };
            on_event(&event);
            self.apply(event, buffer, &mut stats);
        }
        stats
    }

    fn set_state(&mut self, state: ConnectionState, stats: &mut DispatchStats) {
        if self.state != state {
            self.state = state;
            stats.status_changed = true;
        }
    }

    fn apply(&mut self, event: Event, buffer: &mut AlertBuffer, stats: &mut DispatchStats) {
        stats.events += 1;
        match event {
            Event::Connected => {
                self.stats.connects += 1;
                self.set_state(ConnectionState::Connected, stats);
            }
            Event::Disconnected => self.set_state(ConnectionState::Disconnected, stats),
            Event::FailedToConnect(_) => {
                self.stats.failed_attempts += 1;
                self.set_state(ConnectionState::Disconnected, stats);
            }
            Event::GaveUp => {
                self.finished = true;
                self.set_state(ConnectionState::Disconnected, stats);
            }
            Event::Reconnecting { .. } => {}
            Event::Alert(alert) => {
                buffer.insert(alert);
                self.stats.alerts += 1;
                stats.alerts += 1;
            }
            Event::Rejected(_) => {
                self.stats.rejected += 1;
                stats.rejected += 1;
            }
        }
    }

    /// Cancels the subscription. Safe to call at any point, any number of
    /// times, including before the first handshake completed.
    pub fn close(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
            self.state = ConnectionState::Disconnected;
            info!(url = %self.endpoint, "closed engine subscription");
        }
    }

    /// A manager fed from a channel instead of a connection core.
    #[cfg(test)]
    pub(crate) fn simulated(endpoint: &str) -> (ConnectionManager, channel::Sender<Event>, Arc<AtomicBool>) {
        let (event_sender, event_receiver) = channel::unbounded();
        let (control_sender, _) = channel::bounded(1);
        let alive = Arc::new(AtomicBool::new(true));
        let manager = ConnectionManager::with_subscription(
            endpoint,
            Subscription {
                events: event_receiver,
                control: control_sender,
                alive: alive.clone(),
            },
            DEFAULT_EVENT_QUEUE_SIZE,
        );
        (manager, event_sender, alive)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feed::proto::Score;

    pub(crate) fn alert(tx: &str) -> AlertEvent {
        AlertEvent {
            kind: "Reactive Rule".into(),
            description: format!("Repeated Small Transaction for {}", tx),
            transaction_id: tx.into(),
            score: Score::Number(85.0),
            status: Some("BLOCKED".into()),
        }
    }

    fn ids(buffer: &AlertBuffer) -> Vec<String> {
        buffer
            .snapshot()
            .iter()
            .map(|r| r.alert.transaction_id.clone())
            .collect()
    }

    #[test]
    fn status_follows_transport_signals() {
        let (mut manager, tx, _) = ConnectionManager::simulated("tcp://engine");
        let mut buffer = AlertBuffer::default();
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        tx.send(Event::FailedToConnect("refused".into())).unwrap();
        tx.send(Event::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(500),
        })
        .unwrap();
        let stats = manager.dispatch(&mut buffer);
        assert_eq!(stats.events, 2);
        assert!(!stats.status_changed);
        assert_eq!(manager.status(), ConnectionState::Disconnected);

        tx.send(Event::Connected).unwrap();
        assert!(manager.dispatch(&mut buffer).status_changed);
        assert_eq!(manager.status(), ConnectionState::Connected);

        tx.send(Event::Alert(alert("TX-1"))).unwrap();
        tx.send(Event::Disconnected).unwrap();
        manager.dispatch(&mut buffer);
        assert_eq!(manager.status(), ConnectionState::Disconnected);
        assert_eq!(ids(&buffer), vec!["TX-1"]);
        assert_eq!(manager.stats().connects, 1);
        assert_eq!(manager.stats().failed_attempts, 1);
    }

    #[test]
    fn alerts_are_buffered_newest_first() {
        let (mut manager, tx, _) = ConnectionManager::simulated("tcp://engine");
        let mut buffer = AlertBuffer::default();
        tx.send(Event::Connected).unwrap();
        for id in ["A", "B", "C"] {
            tx.send(Event::Alert(alert(id))).unwrap();
        }
        let stats = manager.dispatch(&mut buffer);
        assert_eq!(stats.alerts, 3);
        assert_eq!(ids(&buffer), vec!["C", "B", "A"]);
    }

    #[test]
    fn rejected_payloads_are_counted_not_buffered() {
        let (mut manager, tx, _) = ConnectionManager::simulated("tcp://engine");
        let mut buffer = AlertBuffer::default();
        tx.send(Event::Rejected(proto::Error::MissingField("tx_id")))
            .unwrap();
        let stats = manager.dispatch(&mut buffer);
        assert_eq!(stats.rejected, 1);
        assert!(stats.changed());
        assert!(buffer.is_empty());
        assert_eq!(manager.stats().rejected, 1);
    }

    #[test]
    fn nothing_is_dispatched_after_close() {
        let (mut manager, tx, alive) = ConnectionManager::simulated("tcp://engine");
        let mut buffer = AlertBuffer::default();
        tx.send(Event::Connected).unwrap();
        tx.send(Event::Alert(alert("A"))).unwrap();
        manager.dispatch(&mut buffer);

        manager.close();
        assert!(!alive.load(Ordering::Acquire));
        assert!(!manager.is_active());
        assert_eq!(manager.status(), ConnectionState::Disconnected);
        // The receiving end is gone: late messages cannot even be queued.
        assert!(tx.send(Event::Alert(alert("late"))).is_err());
        assert_eq!(manager.dispatch(&mut buffer), DispatchStats::default());
        assert_eq!(ids(&buffer), vec!["A"]);

        manager.close();
    }

    #[test]
    fn close_before_handshake() {
        let (mut manager, _tx, _) = ConnectionManager::simulated("tcp://engine");
        manager.close();
        assert_eq!(manager.status(), ConnectionState::Disconnected);
    }

    #[test]
    fn gave_up_stops_waiting() {
        let (mut manager, tx, _) = ConnectionManager::simulated("tcp://engine");
        let mut buffer = AlertBuffer::default();
        tx.send(Event::GaveUp).unwrap();
        manager.dispatch(&mut buffer);
        assert!(!manager.is_active());
        let stats = manager.dispatch_with(&mut buffer, Some(Duration::from_secs(30)), |_| {});
        assert_eq!(stats.events, 0);
    }

    #[test]
    fn dispatch_with_sees_every_event() {
        let (mut manager, tx, _) = ConnectionManager::simulated("tcp://engine");
        let mut buffer = AlertBuffer::default();
        tx.send(Event::Connected).unwrap();
        tx.send(Event::Alert(alert("A"))).unwrap();
        let mut seen = vec![];
        manager.dispatch_with(&mut buffer, Some(Duration::from_secs(1)), |e| {
            seen.push(e.clone())
        });
        assert_eq!(seen, vec![Event::Connected, Event::Alert(alert("A"))]);
    }

    #[test]
    fn backoff_is_capped_exponential() {
        let policy = ReconnectPolicy::default();
        let mut delay = policy.first_delay();
        let mut seen = vec![delay];
        for _ in 0..6 {
            delay = policy.next_delay(delay);
            seen.push(delay);
        }
        let ms: Vec<u128> = seen.iter().map(|d| d.as_millis()).collect();
        assert_eq!(ms, vec![500, 1000, 2000, 4000, 8000, 10000, 10000]);

        let zero = ReconnectPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            give_up_after: None,
        };
        assert_eq!(zero.first_delay(), MIN_RECONNECT_DELAY);
        assert_eq!(zero.next_delay(zero.first_delay()), MIN_RECONNECT_DELAY);
    }

    #[test]
    fn invalid_endpoint_is_rejected_upfront() {
        assert!(matches!(
            ConnectionManager::open("ws://localhost:5000", ConnectOptions::default()),
            Err(OpenError::InvalidEndpoint { .. })
        ));
    }
}
