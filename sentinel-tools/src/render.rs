//! Text layout for the alert monitor.
//!
//! Everything here is pure: a `DashboardView` goes in, styled lines come
//! out. The terminal code in `alert-monitor` only moves the cursor and
//! prints them.

use chrono::{DateTime, Local};
use crossterm::style::Color;
use sentinel::alerts::AlertRecord;
use sentinel::feed::Event;
use sentinel::{ConnectionState, DashboardView};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

pub static EMPTY_FEED_TEXT: &str = "Waiting for incoming anomalies...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub color: Option<Color>,
    pub bold: bool,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Span {
        Span {
            text: text.into(),
            color: None,
            bold: false,
        }
    }

    pub fn colored(text: impl Into<String>, color: Color) -> Span {
        Span {
            text: text.into(),
            color: Some(color),
            bold: false,
        }
    }

    pub fn bold(mut self) -> Span {
        self.bold = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub spans: Vec<Span>,
}

impl Line {
    pub fn blank() -> Line {
        Line::default()
    }

    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn new(spans: Vec<Span>) -> Line {
        Line { spans }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Lines reserved for the live feed, so the layout does not jump
    /// while the feed fills up.
    pub feed_rows: usize,
    /// Hide the key hint.
    pub quiet: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            feed_rows: 2 * sentinel::alerts::DEFAULT_CAPACITY,
            quiet: false,
        }
    }
}

/// Redraw rates above this are not useful on a terminal.
pub const MAX_FPS: u64 = 100;

/// Time between redraws for `fps` frames per second, clamped to
/// `1..=MAX_FPS`.
pub fn frame_period(fps: u64) -> Duration {
    Duration::from_millis(1000 / fps.clamp(1, MAX_FPS))
}

pub fn status_badge(status: ConnectionState) -> Span {
    match status {
        ConnectionState::Connected => Span::colored("Engine Connected", Color::Green).bold(),
        ConnectionState::Disconnected => Span::colored("Connecting...", Color::Red).bold(),
    }
}

/// Cuts `text` to at most `width` characters, marking the cut.
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut out: String = text.chars().take(width - 3).collect();
    out.push_str("...");
    out
}

fn disposition_color(status: Option<&str>) -> Color {
    match status {
        Some("BLOCKED") => Color::Red,
        Some("FLAGGED_FOR_REVIEW") => Color::Yellow,
        _ => Color::White,
    }
}

fn alert_lines(record: &AlertRecord, width: usize) -> [Line; 2] {
    let alert = &record.alert;
    let received: DateTime<Local> = record.received_at.into();
    let color = disposition_color(alert.status.as_deref());

    let mut head = vec![
        Span::plain(format!("{} ", received.format("%H:%M:%S"))),
        Span::colored(alert.kind.clone(), color).bold(),
        Span::plain(format!("  {}  Score: {}", alert.transaction_id, alert.score)),
    ];
    if let Some(status) = &alert.status {
        head.push(Span::colored(format!("  {}", status), color));
    }
    let desc = truncate(&alert.description, width.saturating_sub(4));
    [
        Line::new(head),
        Line::new(vec![Span::colored(format!("    {}", desc), Color::Grey)]),
    ]
}

/// Lays out one frame of the dashboard.
pub fn dashboard_lines(view: &DashboardView, width: usize, options: &RenderOptions) -> Vec<Line> {
    let mut lines = Vec::new();

    lines.push(Line::new(vec![
        Span::plain("Fraud Alert Monitor  ").bold(),
        status_badge(view.status),
        Span::colored(format!("  {}", view.endpoint), Color::DarkGrey),
    ]));
    lines.push(Line::blank());

    let summary = &view.summary;
    for (label, value) in [
        ("Total Alerts", summary.total_alerts.to_string()),
        ("Alerted Entities", summary.alerted_entities.to_string()),
        ("Alerted Transactions", summary.alerted_transactions.to_string()),
        ("Alerted Amount", summary.alerted_amount.clone()),
    ] {
        lines.push(Line::new(vec![
            Span::plain(format!("{:<22}", label)),
            Span::plain(value).bold(),
        ]));
    }
    lines.push(Line::blank());

    lines.push(Line::new(vec![
        Span::plain(format!("Live Rule Breaches ({})", view.alerts.len())).bold()
    ]));
    let feed_start = lines.len();
    if view.alerts.is_empty() {
        lines.push(Line::new(vec![Span::colored(
            EMPTY_FEED_TEXT,
            Color::DarkGrey,
        )]));
    } else {
        for record in view.alerts.iter() {
            lines.extend(alert_lines(record, width));
        }
    }
    while lines.len() - feed_start < options.feed_rows {
        lines.push(Line::blank());
    }
    lines.push(Line::blank());

    if !view.rule_breaches.is_empty() {
        lines.push(Line::new(vec![Span::plain("Rule Breaches").bold()]));
        for breach in &view.rule_breaches {
            lines.push(Line::new(vec![
                Span::plain(format!("{:>6}  ", breach.count)).bold(),
                Span::plain(truncate(&breach.name, width.saturating_sub(8))),
            ]));
        }
        lines.push(Line::blank());
    }

    if view.rejected > 0 {
        lines.push(Line::new(vec![Span::colored(
            format!("{} malformed payload(s) dropped", view.rejected),
            Color::Yellow,
        )]));
    }
    if !options.quiet {
        lines.push(Line::new(vec![Span::plain("q/Esc to quit")]));
    }
    lines
}

/// A connection event as kept in the monitor's event log.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub timestamp: SystemTime,
    pub event: String,
    pub color: Color,
}

/// One-line description of a connection event. Alerts and rejects are
/// shown elsewhere and yield `None`.
pub fn describe_event(event: &Event) -> Option<(String, Color)> {
    match event {
        Event::Connected => Some(("CONNECTED".to_string(), Color::Green)),
        Event::Disconnected => Some(("DISCONNECTED".to_string(), Color::Red)),
        Event::FailedToConnect(reason) => {
            Some((format!("CONNECT FAILED: {}", reason), Color::Red))
        }
        Event::Reconnecting { attempt, delay } => Some((
            format!("RETRY #{} in {} ms", attempt, delay.as_millis()),
            Color::Yellow,
        )),
        Event::GaveUp => Some(("GAVE UP RECONNECTING".to_string(), Color::Red)),
        Event::Alert(_) | Event::Rejected(_) => None,
    }
}

/// Keeps the newest `size` entries, newest first.
pub fn log_event(log: &mut VecDeque<LoggedEvent>, size: usize, event: &Event) {
    if let Some((text, color)) = describe_event(event) {
        log.push_front(LoggedEvent {
            timestamp: SystemTime::now(),
            event: text,
            color,
        });
        while log.len() > size {
            log.pop_back();
        }
    }
}

pub fn event_log_lines(log: &VecDeque<LoggedEvent>, width: usize) -> Vec<Line> {
    if log.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![Line::new(vec![Span::plain("Connection Events").bold()])];
    for logged in log {
        let datetime: DateTime<Local> = logged.timestamp.into();
        let text = format!("[{}] {}", datetime.format("%H:%M:%S%.3f"), logged.event);
        lines.push(Line::new(vec![Span::colored(
            truncate(&text, width),
            logged.color,
        )]));
    }
    lines
}
