use serde::{Deserialize, Serialize};

/// Historical tally for one rule, shown next to the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBreach {
    pub name: String,
    pub count: u64,
}

/// Static counters covering alerts outside the live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Baseline {
    pub alerts: u64,
    pub entities: u64,
    pub transactions: u64,
    /// Preformatted, currency included.
    pub amount: String,
    pub rule_breaches: Vec<RuleBreach>,
}

impl Default for Baseline {
    fn default() -> Self {
        let breach = |name: &str, count| RuleBreach {
            name: name.to_string(),
            count,
        };
        Baseline {
            alerts: 75,
            entities: 84,
            transactions: 85,
            amount: "Rp 1.25 Bn".to_string(),
            rule_breaches: vec![
                breach("Repeated Small Transactions to One Account", 39),
                breach("Time and Value Anomaly", 12),
                breach("Merchant Cashback Abuse", 8),
            ],
        }
    }
}

/// The "Total Alerts" figure.
pub fn total_alerts(baseline_count: u64, live_len: usize) -> u64 {
    baseline_count.saturating_add(live_len as u64)
}

/// Counters as displayed. Only the alert total moves with the live feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total_alerts: u64,
    pub alerted_entities: u64,
    pub alerted_transactions: u64,
    pub alerted_amount: String,
}

impl Summary {
    pub fn derive(baseline: &Baseline, live_len: usize) -> Summary {
        Summary {
            total_alerts: total_alerts(baseline.alerts, live_len),
            alerted_entities: baseline.entities,
            alerted_transactions: baseline.transactions,
            alerted_amount: baseline.amount.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tracks_live_length() {
        let baseline = Baseline::default();
        for live in 0..=10 {
            let summary = Summary::derive(&baseline, live);
            assert_eq!(summary.total_alerts, 75 + live as u64);
            assert_eq!(summary.alerted_entities, 84);
            assert_eq!(summary.alerted_transactions, 85);
            assert_eq!(summary.alerted_amount, "Rp 1.25 Bn");
        }
        assert_eq!(total_alerts(u64::MAX, 3), u64::MAX);
    }

    #[test]
    fn partial_baseline_keeps_defaults() {
        let baseline: Baseline = serde_json::from_str(r#"{"alerts": 3}"#).unwrap();
        assert_eq!(baseline.alerts, 3);
        assert_eq!(baseline.entities, 84);
        assert_eq!(baseline.rule_breaches.len(), 3);
        assert!(serde_json::from_str::<Baseline>(r#"{"alert": 3}"#).is_err());
    }
}
