//! End-to-end collection tests
//!
//! A loopback console server stands in for the game: it authenticates,
//! accepts the injected script and answers collector calls with canned JSON.

use ferrum::*;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

const PASSWORD: &str = "factory";

/// Serve one session, answering collector calls with one reading per tick
/// in `ticks`, then hang up. Returns the command bodies received.
fn serve(mut stream: TcpStream, ticks: &[u64]) -> Vec<String> {
    let mut commands = Vec::new();
    let mut readings = ticks.iter();

    while let Ok(request) = Packet::decode(&mut stream, false) {
        let reply = match request.packet_type {
            PacketType::Auth if request.body == PASSWORD => {
                Packet::new(request.id, PacketType::AuthResponse, "")
            }
            PacketType::Auth => Packet::new(-1, PacketType::AuthResponse, ""),
            _ if request.body.starts_with("/sc rcon.print(") => match readings.next() {
                Some(tick) => Packet::new(request.id, PacketType::ResponseValue, reading(*tick)),
                None => break,
            },
            _ => Packet::new(request.id, PacketType::ResponseValue, ""),
        };
        commands.push(request.body);
        if reply.write_to(&mut stream).is_err() {
            break;
        }
    }
    commands
}

fn reading(tick: u64) -> String {
    format!(
        r#"{{"paused":false,"gameTick":{},"itemsConsumed":{{"coal":{}}},"itemsProduced":{{"iron-plate":{}}}}}"#,
        tick,
        tick / 10,
        tick / 20
    )
}

fn spawn_server(sessions: Vec<Vec<u64>>) -> (u16, thread::JoinHandle<Vec<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        sessions
            .iter()
            .map(|ticks| {
                let (stream, _) = listener.accept().unwrap();
                serve(stream, ticks)
            })
            .collect()
    });
    (port, handle)
}

fn client(port: u16) -> ReconnectingClient {
    ReconnectingClient::new(
        ConsoleConfig::new("127.0.0.1")
            .with_port(port)
            .with_password(PASSWORD),
    )
    .unwrap()
}

fn seconds() -> Resolution {
    Resolution::new(60, "seconds").unwrap()
}

fn store(feed: Arc<RecordingFeed>) -> SeriesStore {
    let store = SeriesStore::new(
        "resources",
        &[seconds(), Resolution::new(600, "ten_seconds").unwrap()],
        Box::new(MemoryStorage::new()),
        feed,
    )
    .unwrap();
    store.initialize().unwrap();
    store
}

// ============================================================================
// Collection
// ============================================================================

#[test]
fn test_collect_and_store() {
    let (port, server) = spawn_server(vec![vec![30, 90, 150, 210]]);
    let bridge = MetricsBridge::new(client(port));
    let feed = Arc::new(RecordingFeed::new());
    let store = store(feed.clone());

    for _ in 0..4 {
        let snapshot = bridge.collect().unwrap();
        store.store(snapshot.into_sample()).unwrap();
    }
    bridge.console().close();

    let buckets = store.retrieve(&seconds(), 0, 10).unwrap();
    let ticks: Vec<u64> = buckets.iter().map(|b| b.tick).collect();
    assert_eq!(ticks, vec![180, 120, 60]);
    assert_eq!(buckets[0].get("in_coal"), Some(15));
    assert_eq!(buckets[0].get("out_iron-plate"), Some(7));
    assert_eq!(feed.drain().len(), 3);

    let sessions = server.join().unwrap();
    assert_eq!(sessions.len(), 1);
    // auth, script, four calls
    assert_eq!(sessions[0].len(), 6);
    assert!(sessions[0][1].starts_with("/sc function collect_metrics_"));
}

#[test]
fn test_outage_then_reconnect() {
    // The server drops the link after the second reading.
    let (port, server) = spawn_server(vec![vec![30, 90], vec![400]]);
    let bridge = MetricsBridge::new(client(port));
    let feed = Arc::new(RecordingFeed::new());
    let store = store(feed.clone());

    for _ in 0..2 {
        store.store(bridge.collect().unwrap().into_sample()).unwrap();
    }

    let err = bridge.collect().unwrap_err();
    assert!(err.invalidates_connection());
    assert!(!bridge.console().is_connected());

    // Next cycle reconnects; the script is already on the server.
    store.store(bridge.collect().unwrap().into_sample()).unwrap();
    bridge.console().close();

    let ticks: Vec<u64> = store
        .retrieve(&seconds(), 0, 10)
        .unwrap()
        .iter()
        .map(|b| b.tick)
        .collect();
    assert_eq!(ticks, vec![120, 60]);
    assert_eq!(store.watermark(&seconds()).unwrap(), 360);

    let sessions = server.join().unwrap();
    assert_eq!(sessions[1][0], PASSWORD);
    assert!(sessions[1][1].starts_with("/sc rcon.print("));
    assert_eq!(bridge.console().metrics().connects, 2);
}

#[test]
fn test_wrong_password() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve(stream, &[])
    });

    let client = ReconnectingClient::new(
        ConsoleConfig::new("127.0.0.1")
            .with_port(port)
            .with_password("wrong"),
    )
    .unwrap();
    let bridge = MetricsBridge::new(client);

    match bridge.collect() {
        Err(FerrumError::Transport(TransportError::Authentication { actual, .. })) => {
            assert_eq!(actual, -1)
        }
        other => panic!("expected authentication failure, got {:?}", other),
    }
    assert!(!bridge.is_loaded());
    assert!(!bridge.console().is_connected());
    server.join().unwrap();
}

// ============================================================================
// Restart
// ============================================================================

#[test]
fn test_store_survives_restart() {
    #[derive(Clone, Default)]
    struct Shared(Arc<std::sync::Mutex<MemoryStorage>>);

    impl BucketStorage for Shared {
        fn ensure_storage(&mut self, r: &Resolution) -> std::result::Result<(), StorageError> {
            self.0.lock().unwrap().ensure_storage(r)
        }
        fn persist_bucket(
            &mut self,
            r: &Resolution,
            b: &Sample,
        ) -> std::result::Result<(), StorageError> {
            self.0.lock().unwrap().persist_bucket(r, b)
        }
        fn query_latest(
            &mut self,
            r: &Resolution,
            after: u64,
            max: usize,
        ) -> std::result::Result<Vec<Sample>, StorageError> {
            self.0.lock().unwrap().query_latest(r, after, max)
        }
        fn last_persisted_tick(
            &mut self,
            r: &Resolution,
        ) -> std::result::Result<Option<u64>, StorageError> {
            self.0.lock().unwrap().last_persisted_tick(r)
        }
    }

    let shared = Shared::default();
    let resolutions = [seconds(), Resolution::new(600, "ten_seconds").unwrap()];

    let first = SeriesStore::new(
        "resources",
        &resolutions,
        Box::new(shared.clone()),
        Arc::new(NullFeed),
    )
    .unwrap();
    first.initialize().unwrap();
    for tick in (30..=570).step_by(60) {
        first
            .store(Sample::empty(tick).with("in_coal", tick as i64))
            .unwrap();
    }
    drop(first);

    let second = SeriesStore::new("resources", &resolutions, Box::new(shared), Arc::new(NullFeed))
        .unwrap();
    second.initialize().unwrap();
    assert_eq!(second.watermark(&seconds()).unwrap(), 540);

    // Ticks keep going; the coarse bucket folds the durable fine history.
    second.store(Sample::empty(1300).with("in_coal", 1300)).unwrap();
    let coarse = second
        .retrieve(&resolutions[1], 0, 10)
        .unwrap();
    assert_eq!(coarse.len(), 1);
    assert_eq!(coarse[0].tick, 600);
    assert_eq!(coarse[0].get("in_coal"), Some(510));
}
