//! Wire protocol
//!
//! The engine pushes one JSON frame per line over the stream transport.
//! Every frame is an envelope `{"event": <name>, "data": <payload>}`.
//! Alert notifications use the event names in `ALERT_EVENT_NAMES`; any
//! other event is surfaced as `Message::Other` and ignored upstream.
//!
//! Alert payloads are never trusted as-is: `validate_alert` checks every
//! field and produces either an `AlertEvent` or a typed `Error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Largest frame accepted, terminator included.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Largest text field accepted in an alert payload, in characters.
pub const MAX_FIELD_LEN: usize = 512;

/// Event names carrying an alert payload. The engine publishes
/// `new_fraud_alert`, older dashboards listened on `new_alert`.
pub static ALERT_EVENT_NAMES: &[&str] = &["new_alert", "new_fraud_alert"];

/// Event name used when encoding alerts.
pub static DEFAULT_ALERT_EVENT: &str = "new_fraud_alert";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No complete frame available yet. Only used while splitting frames.
    #[error("need more data")]
    NeedMore,
    #[error("frame exceeds {} bytes", MAX_FRAME_SIZE)]
    FrameTooLong,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed envelope: {0}")]
    Envelope(String),
    #[error("alert payload is not an object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("field `{0}` is longer than {} characters", MAX_FIELD_LEN)]
    FieldTooLong(&'static str),
    #[error("score is not a finite number")]
    NonFiniteScore,
}

/// Risk score as emitted by the engine: rule agents send integers, some
/// model outputs arrive as preformatted text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Score {
    Number(f64),
    Text(String),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Number(x) if x.fract() == 0.0 && x.abs() < 1e15 => write!(f, "{:.0}", x),
            Score::Number(x) => write!(f, "{:.2}", x),
            Score::Text(s) => f.write_str(s),
        }
    }
}

/// A validated alert notification. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    /// Category label, e.g. "Reactive Rule" or "AI Anomaly".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "desc")]
    pub description: String,
    #[serde(rename = "tx_id")]
    pub transaction_id: String,
    pub score: Score,
    /// Disposition decided by the engine, e.g. `BLOCKED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Alert(AlertEvent),
    /// Envelope with an event name this client does not consume.
    Other(String),
    /// Empty line, used by engines as a keepalive.
    Keepalive,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct OutEnvelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Finds the first complete frame in `buf`. Returns the frame contents
/// (without the line terminator) and the number of bytes it occupies.
pub fn split_frame(buf: &[u8]) -> Result<(&[u8], usize), Error> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let frame = &buf[..pos];
            let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
            Ok((frame, pos + 1))
        }
        None if buf.len() >= MAX_FRAME_SIZE => Err(Error::FrameTooLong),
        None => Err(Error::NeedMore),
    }
}

/// Decodes a single frame, as returned by `split_frame`.
pub fn parse_frame(frame: &[u8]) -> Result<Message, Error> {
    let text = std::str::from_utf8(frame).map_err(|_| Error::InvalidUtf8)?;
    parse_message(text)
}

/// Decodes a single line of text.
pub fn parse_message(line: &str) -> Result<Message, Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Message::Keepalive);
    }
    let envelope: Envelope =
        serde_json::from_str(line).map_err(|e| Error::Envelope(e.to_string()))?;
    if ALERT_EVENT_NAMES.contains(&envelope.event.as_str()) {
        Ok(Message::Alert(validate_alert(&envelope.data)?))
    } else {
        Ok(Message::Other(envelope.event))
    }
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name))
}

fn text_field(
    obj: &Map<String, Value>,
    name: &'static str,
    aliases: &[&str],
    allow_empty: bool,
) -> Result<String, Error> {
    let value = field(obj, aliases).ok_or(Error::MissingField(name))?;
    let s = value.as_str().ok_or(Error::WrongType(name))?;
    let s = s.trim();
    if !allow_empty && s.is_empty() {
        return Err(Error::EmptyField(name));
    }
    if s.chars().count() > MAX_FIELD_LEN {
        return Err(Error::FieldTooLong(name));
    }
    Ok(s.to_string())
}

fn score_field(obj: &Map<String, Value>) -> Result<Score, Error> {
    match obj.get("score") {
        None | Some(Value::Null) => Err(Error::MissingField("score")),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(x) if x.is_finite() => Ok(Score::Number(x)),
            _ => Err(Error::NonFiniteScore),
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Err(Error::EmptyField("score"))
            } else if s.chars().count() > MAX_FIELD_LEN {
                Err(Error::FieldTooLong("score"))
            } else {
                Ok(Score::Text(s.to_string()))
            }
        }
        Some(_) => Err(Error::WrongType("score")),
    }
}

/// Checks an alert payload against the expected schema.
///
/// Wire names are `type`, `desc`, `tx_id`, `score` and the optional
/// `status`; `description`, `transactionId` and `transaction_id` are
/// accepted as aliases. Unknown fields are ignored.
pub fn validate_alert(data: &Value) -> Result<AlertEvent, Error> {
    let obj = data.as_object().ok_or(Error::NotAnObject)?;
    let kind = text_field(obj, "type", &["type"], false)?;
    let description = text_field(obj, "desc", &["desc", "description"], true)?;
    let transaction_id = text_field(
        obj,
        "tx_id",
        &["tx_id", "transactionId", "transaction_id"],
        false,
    )?;
    let score = score_field(obj)?;
    let status = match obj.get("status") {
        None | Some(Value::Null) => None,
        Some(_) => Some(text_field(obj, "status", &["status"], false)?),
    };
    Ok(AlertEvent {
        kind,
        description,
        transaction_id,
        score,
        status,
    })
}

/// Encodes an alert as a complete frame, terminator included.
pub fn encode_alert(event: &str, alert: &AlertEvent) -> Result<String, Error> {
    let mut line = serde_json::to_string(&OutEnvelope { event, data: alert })
        .map_err(|e| Error::Envelope(e.to_string()))?;
    line.push('\n');
    Ok(line)
}
