//! Dashboard view state
//!
//! A `Dashboard` is the hosting view of the live feed: it owns exactly one
//! `ConnectionManager` and one `AlertBuffer` for as long as it is open.
//! Rendering code only ever sees a `DashboardView`, which is derived on
//! demand and holds no state of its own.

use crate::alerts::{AlertBuffer, Baseline, RuleBreach, Snapshot, Summary, DEFAULT_CAPACITY};
use crate::feed::connection::{ConnectOptions, DispatchStats, OpenError};
use crate::feed::{ConnectionManager, ConnectionState, Event};

use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub connect: ConnectOptions,
    /// Alerts kept in the live feed.
    pub capacity: usize,
    pub baseline: Baseline,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        DashboardOptions {
            connect: ConnectOptions::default(),
            capacity: DEFAULT_CAPACITY,
            baseline: Baseline::default(),
        }
    }
}

/// Everything the presentation layer needs for one frame.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub endpoint: String,
    pub status: ConnectionState,
    pub summary: Summary,
    pub alerts: Snapshot,
    pub rule_breaches: Vec<RuleBreach>,
    /// Malformed payloads dropped this session.
    pub rejected: u64,
}

pub struct Dashboard {
    connection: ConnectionManager,
    buffer: AlertBuffer,
    baseline: Baseline,
}

impl Dashboard {
    /// Mounts the view and starts the engine subscription.
    pub fn open(endpoint: &str, options: DashboardOptions) -> Result<Dashboard, OpenError> {
        let connection = ConnectionManager::open(endpoint, options.connect)?;
        Ok(Dashboard::with_connection(
            connection,
            options.capacity,
            options.baseline,
        ))
    }

    fn with_connection(connection: ConnectionManager, capacity: usize, baseline: Baseline) -> Dashboard {
        Dashboard {
            connection,
            buffer: AlertBuffer::new(capacity),
            baseline,
        }
    }

    /// Applies pending connection events. Does nothing once closed.
    pub fn poll(&mut self) -> DispatchStats {
        self.connection.dispatch(&mut self.buffer)
    }

    /// Like `poll`, waiting up to `wait` for something to happen.
    pub fn poll_with<F: FnMut(&Event)>(&mut self, wait: Duration, on_event: F) -> DispatchStats {
        self.connection
            .dispatch_with(&mut self.buffer, Some(wait), on_event)
    }

    pub fn status(&self) -> ConnectionState {
        self.connection.status()
    }

    pub fn is_active(&self) -> bool {
        self.connection.is_active()
    }

    pub fn view(&self) -> DashboardView {
        let alerts = self.buffer.snapshot();
        DashboardView {
            endpoint: self.connection.endpoint().to_string(),
            status: self.connection.status(),
            summary: Summary::derive(&self.baseline, alerts.len()),
            alerts,
            rule_breaches: self.baseline.rule_breaches.clone(),
            rejected: self.connection.stats().rejected,
        }
    }

    /// Tears the view down: the subscription is cancelled before the
    /// buffer is emptied. Idempotent.
    pub fn close(&mut self) {
        if self.connection.is_active() || !self.buffer.is_empty() {
            debug!(endpoint = self.connection.endpoint(), "closing dashboard");
        }
        self.connection.close();
        self.buffer.clear();
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.close();
    }
}
