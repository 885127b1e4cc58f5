use sentinel::feed::connection::{ConnectOptions, ReconnectPolicy};
use sentinel::feed::proto::{self, AlertEvent, Score};
use sentinel::{ConnectionState, Dashboard, DashboardOptions};

use std::io::Write;
use std::net::TcpListener;
use std::time::{Duration, Instant};

fn fast_options(give_up_after: Option<Duration>) -> DashboardOptions {
    DashboardOptions {
        connect: ConnectOptions {
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(100),
                give_up_after,
            },
            queue_size: 64,
        },
        ..Default::default()
    }
}

fn frame(tx_id: &str) -> String {
    let alert = AlertEvent {
        kind: "Reactive Rule".into(),
        description: "Sensitive Keyword Detected: JUDI".into(),
        transaction_id: tx_id.into(),
        score: Score::Number(88.0),
        status: Some("BLOCKED".into()),
    };
    proto::encode_alert(proto::DEFAULT_ALERT_EVENT, &alert).unwrap()
}

fn wait_until<F: FnMut(&Dashboard) -> bool>(dashboard: &mut Dashboard, mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        dashboard.poll_with(Duration::from_millis(50), |_| {});
        if cond(&*dashboard) {
            return true;
        }
    }
    false
}

fn engine() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("tcp://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn tx_ids(dashboard: &Dashboard) -> Vec<String> {
    dashboard
        .view()
        .alerts
        .alerts()
        .map(|a| a.transaction_id.clone())
        .collect()
}

#[test]
fn receives_alerts_in_order_and_survives_disconnect() {
    let (listener, url) = engine();
    let mut dashboard = Dashboard::open(&url, fast_options(None)).unwrap();
    assert_eq!(dashboard.status(), ConnectionState::Disconnected);

    let (mut stream, _) = listener.accept().unwrap();
    assert!(wait_until(&mut dashboard, |d| d.status() == ConnectionState::Connected));

    for id in ["A", "B", "C"] {
        stream.write_all(frame(id).as_bytes()).unwrap();
    }
    stream
        .write_all(b"{\"event\":\"new_fraud_alert\",\"data\":{\"type\":\"x\"}}\n")
        .unwrap();
    stream
        .write_all(b"{\"event\":\"server_hello\",\"data\":{}}\n")
        .unwrap();

    assert!(wait_until(&mut dashboard, |d| d.view().rejected == 1));
    assert_eq!(tx_ids(&dashboard), vec!["C", "B", "A"]);
    assert_eq!(dashboard.view().summary.total_alerts, 78);

    drop(stream);
    assert!(wait_until(&mut dashboard, |d| d.status()
        == ConnectionState::Disconnected));
    assert_eq!(tx_ids(&dashboard), vec!["C", "B", "A"]);

    // The listener is still there, so the core reconnects.
    let (_stream, _) = listener.accept().unwrap();
    assert!(wait_until(&mut dashboard, |d| d.status() == ConnectionState::Connected));
    dashboard.close();
}

#[test]
fn feed_is_bounded() {
    let (listener, url) = engine();
    let mut dashboard = Dashboard::open(&url, fast_options(None)).unwrap();
    let (mut stream, _) = listener.accept().unwrap();
    for i in 0..11 {
        stream.write_all(frame(&format!("TX-{}", i)).as_bytes()).unwrap();
    }
    assert!(wait_until(&mut dashboard, |d| tx_ids(d).first()
        == Some(&"TX-10".to_string())));
    let ids = tx_ids(&dashboard);
    assert_eq!(ids.len(), 10);
    assert!(!ids.contains(&"TX-0".to_string()));
    assert_eq!(ids.last().unwrap(), "TX-1");
}

#[test]
fn nothing_arrives_after_close() {
    let (listener, url) = engine();
    let mut dashboard = Dashboard::open(&url, fast_options(None)).unwrap();
    let (mut stream, _) = listener.accept().unwrap();
    stream.write_all(frame("before").as_bytes()).unwrap();
    assert!(wait_until(&mut dashboard, |d| d.view().alerts.len() == 1));

    dashboard.close();
    // The engine may or may not notice the close before writing.
    let _ = stream.write_all(frame("after").as_bytes());
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(dashboard.poll().events, 0);
    assert!(dashboard.view().alerts.is_empty());
    assert_eq!(dashboard.status(), ConnectionState::Disconnected);
}

#[test]
fn unreachable_engine_stays_disconnected_until_giving_up() {
    // Grab a free port, then close it so nothing listens there.
    let url = {
        let (listener, url) = engine();
        drop(listener);
        url
    };
    let mut dashboard =
        Dashboard::open(&url, fast_options(Some(Duration::from_millis(300)))).unwrap();
    let mut seen_connected = false;
    let deadline = Instant::now() + Duration::from_secs(10);
    while dashboard.is_active() && Instant::now() < deadline {
        dashboard.poll_with(Duration::from_millis(50), |_| {});
        seen_connected |= dashboard.status() == ConnectionState::Connected;
    }
    assert!(!dashboard.is_active());
    assert!(!seen_connected);
    assert_eq!(dashboard.status(), ConnectionState::Disconnected);
}

#[test]
fn close_before_connecting_is_safe() {
    let (_listener, url) = engine();
    let mut dashboard = Dashboard::open(&url, fast_options(None)).unwrap();
    dashboard.close();
    dashboard.close();
    assert_eq!(dashboard.status(), ConnectionState::Disconnected);
    assert!(!dashboard.is_active());
}

#[test]
fn oversized_frame_is_rejected_and_feed_continues() {
    let (listener, url) = engine();
    let mut dashboard = Dashboard::open(&url, fast_options(None)).unwrap();
    let (mut stream, _) = listener.accept().unwrap();

    let mut data = vec![b'x'; 2 * proto::MAX_FRAME_SIZE + 1];
    data.push(b'\n');
    data.extend_from_slice(frame("TX-AFTER").as_bytes());
    stream.write_all(&data).unwrap();

    assert!(wait_until(&mut dashboard, |d| d.view().alerts.len() == 1));
    let view = dashboard.view();
    assert_eq!(view.rejected, 1);
    assert_eq!(tx_ids(&dashboard), vec!["TX-AFTER"]);
    assert_eq!(dashboard.status(), ConnectionState::Connected);
    drop(stream);
}
