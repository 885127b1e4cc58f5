//! Synthetic alerts for `alert-sim`.
//!
//! Mirrors the two detection layers of the engine: hard rules block the
//! transaction outright, behavioral models flag it for review.

use rand::seq::SliceRandom;
use rand::Rng;
use sentinel::feed::{AlertEvent, Score};

pub static ACCOUNTS: [&str; 6] = [
    "ACC-101", "ACC-202", "ACC-303", "ACC-999", "ACC-404", "ACC-505",
];

pub static REACTIVE_RULE: &str = "Reactive Rule";
pub static AI_ANOMALY: &str = "AI Anomaly";

/// Share of batches that are a velocity burst of several transactions.
pub const BURST_PROBABILITY: f64 = 0.2;

fn reactive_reason<R: Rng>(rng: &mut R) -> (String, u32) {
    match rng.gen_range(0..7) {
        0 => (
            format!("Recency Anomaly (Velocity): >5 trx in {}s", rng.gen_range(30..120)),
            95,
        ),
        1 => (
            format!(
                "Time Anomaly: Transaction at 0{}:{:02}:{:02} (Off-hours)",
                rng.gen_range(1..5),
                rng.gen_range(0..60),
                rng.gen_range(0..60)
            ),
            85,
        ),
        2 => (
            format!("Repeated Small Transaction: {}x in 1h", rng.gen_range(5..20)),
            85,
        ),
        3 => (
            format!("IP Blacklist Match: 10.0.{}.{}", rng.gen_range(0..255), rng.gen_range(1..255)),
            95,
        ),
        4 => {
            let word = ["JUDI", "SLOT", "TOGEL"].choose(rng).copied().unwrap_or("JUDI");
            (format!("Sensitive Keyword Detected: {}", word), 88)
        }
        5 => ("Account in Dynamic Watchlist".to_string(), 99),
        _ => (
            format!(
                "Time & Value Anomaly: Night accumulation {} > 50jt",
                rng.gen_range(50_000_000u64..90_000_000)
            ),
            92,
        ),
    }
}

fn learning_reason<R: Rng>(rng: &mut R) -> (Score, String) {
    match rng.gen_range(0..3) {
        0 => (
            Score::Number(90.0),
            format!(
                "Monetary Anomaly (Behavioral): Z-Score {:.2} > 5",
                rng.gen_range(5.1..12.0)
            ),
        ),
        1 => {
            let risk = rng.gen_range(81..100);
            (
                Score::Number(risk as f64),
                format!("AI Behavioral Deviation Detected ({}% Risk)", risk),
            )
        }
        _ => (
            Score::Number(90.0),
            format!(
                "Merchant Behavior Change: Z-Score {:.2} (Amount spike)",
                rng.gen_range(5.1..9.0)
            ),
        ),
    }
}

pub fn transaction_id<R: Rng>(rng: &mut R) -> String {
    format!("TX-{:08X}", rng.gen::<u32>())
}

pub fn synthetic_alert<R: Rng>(rng: &mut R) -> AlertEvent {
    let transaction_id = transaction_id(rng);
    if rng.gen_bool(0.6) {
        let (description, score) = reactive_reason(rng);
        AlertEvent {
            kind: REACTIVE_RULE.to_string(),
            description,
            transaction_id,
            score: Score::Number(score as f64),
            status: Some("BLOCKED".to_string()),
        }
    } else {
        let (score, description) = learning_reason(rng);
        AlertEvent {
            kind: AI_ANOMALY.to_string(),
            description,
            transaction_id,
            score,
            status: Some("FLAGGED_FOR_REVIEW".to_string()),
        }
    }
}

/// Alerts in the next batch: a burst of 3 to 5, or a single one.
pub fn batch_size<R: Rng>(rng: &mut R) -> usize {
    if rng.gen_bool(BURST_PROBABILITY) {
        rng.gen_range(3..=5)
    } else {
        1
    }
}

/// A frame the dashboard has to reject: an alert missing its transaction id.
pub fn malformed_frame(event: &str) -> String {
    format!(
        "{{\"event\":\"{}\",\"data\":{{\"type\":\"{}\",\"desc\":\"truncated\",\"score\":50}}}}\n",
        event, REACTIVE_RULE
    )
}
