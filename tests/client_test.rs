use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use hookstream::client::{ClientConfig, ConnectionState, Connector, Link, ReconnectingClient};
use hookstream::events::ClientEvent;
use hookstream::hook::HookEvent;
use hookstream::protocol::{ClientMessage, ServerMessage};

const WAIT: Duration = Duration::from_secs(2);

/// A scripted link: frames pushed by the test come out of `next_frame`;
/// dropping the test's sender looks like the server closing.
struct FakeLink {
    sent: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Link for FakeLink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The test's end of one scripted link.
struct Remote {
    sent: Arc<Mutex<Vec<String>>>,
    tx: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

impl Remote {
    fn push(&self, message: ServerMessage) {
        self.push_raw(&message.encode().unwrap());
    }

    fn push_raw(&self, text: &str) {
        self.tx.as_ref().unwrap().send(text.to_string()).unwrap();
    }

    fn hang_up(&mut self) {
        self.tx = None;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribes(&self) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| ClientMessage::parse(text).unwrap())
            .collect()
    }
}

/// Hands out scripted links in order, then refuses.
#[derive(Default)]
struct FakeConnector {
    attempts: AtomicUsize,
    links: Mutex<VecDeque<FakeLink>>,
}

impl FakeConnector {
    fn with_links(n: usize) -> (Arc<Self>, Vec<Remote>) {
        let connector = Arc::new(Self::default());
        let mut remotes = Vec::new();
        for _ in 0..n {
            let (tx, inbound) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            connector.links.lock().unwrap().push_back(FakeLink {
                sent: Arc::clone(&sent),
                inbound,
                closed: Arc::clone(&closed),
            });
            remotes.push(Remote {
                sent,
                tx: Some(tx),
                closed,
            });
        }
        (connector, remotes)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Link>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.links.lock().unwrap().pop_front() {
            Some(link) => Ok(Box::new(link)),
            None => Err(anyhow!("connection refused")),
        }
    }
}

fn config(delay_ms: u64) -> ClientConfig {
    ClientConfig {
        reconnect_delay: Duration::from_millis(delay_ms),
    }
}

fn event(n: i64) -> HookEvent {
    let mut event = HookEvent::new("app", "s", "Test", json!({}));
    event.id = Some(n);
    event
}

fn events(range: std::ops::RangeInclusive<i64>) -> Vec<HookEvent> {
    range.map(event).collect()
}

fn ids(events: &[HookEvent]) -> Vec<i64> {
    events.iter().filter_map(|e| e.id).collect()
}

async fn wait_for_state(client: &ReconnectingClient, want: ConnectionState) {
    let mut state = client.watch_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("client never reached {want:?}"))
        .unwrap();
}

async fn wait_for_subscribe(remote: &Remote) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while remote.sent.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "no subscribe sent");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_ids(client: &ReconnectingClient, want: &[i64]) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let have = ids(&client.events().await);
        if have == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("window is {have:?}, expected {want:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn subscribes_with_window_size_on_connect() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector.clone(), 3, config(50));

    wait_for_subscribe(&remotes[0]).await;

    assert_eq!(
        remotes[0].subscribes(),
        vec![ClientMessage::subscribe(3)]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn baseline_then_live_event_keeps_window() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector, 3, config(50));
    wait_for_state(&client, ConnectionState::Connected).await;

    remotes[0].push(ServerMessage::Initial {
        data: events(3..=5),
    });
    remotes[0].push(ServerMessage::Subscribed);
    wait_for_ids(&client, &[3, 4, 5]).await;

    remotes[0].push(ServerMessage::Event { data: event(6) });
    wait_for_ids(&client, &[4, 5, 6]).await;

    client.shutdown().await;
}

#[tokio::test]
async fn oversized_initial_batch_is_trimmed() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector, 2, config(50));
    wait_for_state(&client, ConnectionState::Connected).await;

    remotes[0].push(ServerMessage::Initial {
        data: events(1..=10),
    });
    wait_for_ids(&client, &[9, 10]).await;

    client.shutdown().await;
}

#[tokio::test]
async fn events_before_baseline_are_superseded() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector, 5, config(50));
    wait_for_state(&client, ConnectionState::Connected).await;

    remotes[0].push(ServerMessage::Event { data: event(99) });
    wait_for_ids(&client, &[99]).await;
    remotes[0].push(ServerMessage::Initial {
        data: events(1..=2),
    });
    wait_for_ids(&client, &[1, 2]).await;

    client.shutdown().await;
}

#[tokio::test]
async fn shrinking_window_trims_locally_without_resubscribing() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector.clone(), 5, config(50));
    wait_for_state(&client, ConnectionState::Connected).await;

    remotes[0].push(ServerMessage::Initial {
        data: events(1..=5),
    });
    wait_for_ids(&client, &[1, 2, 3, 4, 5]).await;

    assert_eq!(client.set_max_events(2).await, 2);
    assert_eq!(ids(&client.events().await), vec![4, 5]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(remotes[0].subscribes().len(), 1);
    assert_eq!(connector.attempts(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn reconnects_once_after_fixed_delay_with_current_window() {
    let (connector, mut remotes) = FakeConnector::with_links(2);
    let client = ReconnectingClient::spawn(connector.clone(), 3, config(300));
    wait_for_subscribe(&remotes[0]).await;

    client.set_max_events(7).await;

    // Server drops the first connection.
    let mut first = remotes.remove(0);
    first.hang_up();
    wait_for_state(&client, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 1, "reconnected before the delay elapsed");

    wait_for_subscribe(&remotes[0]).await;
    assert_eq!(connector.attempts(), 2);

    assert_eq!(
        first.subscribes(),
        vec![ClientMessage::subscribe(3)]
    );
    assert_eq!(
        remotes[0].subscribes(),
        vec![ClientMessage::subscribe(7)]
    );

    client.shutdown().await;
    assert!(remotes[0].is_closed());
}

#[tokio::test]
async fn refused_connections_retry_indefinitely() {
    let (connector, _remotes) = FakeConnector::with_links(0);
    let client = ReconnectingClient::spawn(connector.clone(), 10, config(20));

    let deadline = tokio::time::Instant::now() + WAIT;
    while connector.attempts() < 4 {
        assert!(tokio::time::Instant::now() < deadline, "retries stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.shutdown().await;
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let (connector, _remotes) = FakeConnector::with_links(0);
    let client = ReconnectingClient::spawn(connector.clone(), 10, config(10_000));

    // First attempt fails, then the client sits in its 10s backoff.
    wait_for_state(&client, ConnectionState::Disconnected).await;
    while connector.attempts() < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    client.disconnect();
    client.disconnect();
    tokio::time::timeout(WAIT, client.shutdown())
        .await
        .expect("shutdown waited on the backoff timer");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn disconnect_closes_live_link_and_never_reconnects() {
    let (connector, remotes) = FakeConnector::with_links(2);
    let client = ReconnectingClient::spawn(connector.clone(), 10, config(10));
    wait_for_state(&client, ConnectionState::Connected).await;

    let state = client.watch_state();
    client.shutdown().await;

    assert!(remotes[0].is_closed());
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn dropping_the_client_stops_the_driver() {
    let (connector, _remotes) = FakeConnector::with_links(0);
    let client = ReconnectingClient::spawn(connector.clone(), 10, config(10));
    tokio::time::sleep(Duration::from_millis(30)).await;
    drop(client);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let settled = connector.attempts();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(connector.attempts(), settled);
}

#[tokio::test]
async fn notifications_follow_the_stream() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector, 4, config(50));
    let mut updates = client.subscribe();
    wait_for_state(&client, ConnectionState::Connected).await;

    remotes[0].push(ServerMessage::Initial {
        data: events(1..=2),
    });
    remotes[0].push(ServerMessage::error("Invalid JSON"));
    remotes[0].push(ServerMessage::Event { data: event(3) });

    let mut baseline = None;
    let mut error = None;
    let mut received = None;
    while received.is_none() {
        match tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap() {
            ClientEvent::Baseline { count } => baseline = Some(count),
            ClientEvent::ServerError(message) => error = Some(message),
            ClientEvent::Received(event) => received = event.id,
            ClientEvent::StateChanged(_) => {}
        }
    }

    assert_eq!(baseline, Some(2));
    assert_eq!(error.as_deref(), Some("Invalid JSON"));
    assert_eq!(received, Some(3));
    client.shutdown().await;
}

#[tokio::test]
async fn unreadable_frames_are_skipped() {
    let (connector, remotes) = FakeConnector::with_links(1);
    let client = ReconnectingClient::spawn(connector.clone(), 4, config(50));
    wait_for_state(&client, ConnectionState::Connected).await;

    remotes[0].push_raw("garbage");
    remotes[0].push_raw(r#"{"type":"mystery"}"#);
    remotes[0].push(ServerMessage::Event { data: event(1) });

    wait_for_ids(&client, &[1]).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(connector.attempts(), 1);
    client.shutdown().await;
}
