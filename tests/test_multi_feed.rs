/// Multi-feed fan-in tests over localhost TCP

use feed_ingest::{
    create_encoder, Dispatcher, EncodingConfig, EncodingType, FeedConfig, FeedStatus,
    MultiFeedConfig, MultiFeedIngestor, Record,
};
use std::collections::HashMap;
use std::io::Write;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

/// Serve `count` sequential binary records to the first client, then hold
/// the connection open until the test ends.
fn spawn_feed_server(count: u64) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let Ok((mut sock, _)) = listener.accept() else {
            return;
        };
        let records: Vec<Record> = (1..=count)
            .map(|seq| Record::new(seq, 100.0, 1 + (seq % 10) as i32))
            .collect();
        let mut encoder = create_encoder(EncodingType::Binary, EncodingConfig::default());
        let mut bytes = Vec::new();
        encoder.encode_into(&records, &mut bytes);
        if sock.write_all(&bytes).is_err() {
            return;
        }
        let _ = sock.flush();
        thread::sleep(Duration::from_secs(2));
    });
    (port, handle)
}

fn two_feed_config(port_a: u16, port_b: u16) -> MultiFeedConfig {
    MultiFeedConfig {
        feeds: vec![
            FeedConfig {
                name: "alpha".to_string(),
                port: port_a,
                origin_id: 0,
                is_primary: true,
                buffer_capacity: 4096,
                ..Default::default()
            },
            FeedConfig {
                name: "beta".to_string(),
                port: port_b,
                origin_id: 1,
                is_primary: false,
                buffer_capacity: 4096,
                ..Default::default()
            },
        ],
        global_buffer_capacity: 8192,
        health_check_interval_ms: 50,
        ..Default::default()
    }
}

#[test]
fn test_fanin_preserves_per_feed_order() {
    const PER_FEED: u64 = 500;
    let (port_a, server_a) = spawn_feed_server(PER_FEED);
    let (port_b, server_b) = spawn_feed_server(PER_FEED);

    let mut dispatcher = Dispatcher::new(two_feed_config(port_a, port_b)).unwrap();
    dispatcher.start();

    // Wait until both workers have parsed everything, then let the drain
    // threads finish re-publishing before consuming single-threaded.
    let deadline = Instant::now() + Duration::from_secs(5);
    while dispatcher.total_records_received() < 2 * PER_FEED && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(dispatcher.total_records_received(), 2 * PER_FEED);
    thread::sleep(Duration::from_millis(300));

    let mut next_expected: HashMap<u32, u64> = HashMap::new();
    let mut consumed = 0u64;
    while let Some(feed_slot) = dispatcher.try_consume() {
        let expected = next_expected.entry(feed_slot.origin_id).or_insert(1);
        assert_eq!(
            feed_slot.slot.record.seq(), *expected,
            "per-feed order broken for origin {}",
            feed_slot.origin_id
        );
        *expected += 1;
        consumed += 1;
    }
    assert_eq!(consumed, 2 * PER_FEED);
    assert_eq!(next_expected[&0], PER_FEED + 1);
    assert_eq!(next_expected[&1], PER_FEED + 1);

    // Both feeds delivered and are healthy; no gaps, no drops
    for health in dispatcher.health_snapshot() {
        assert_eq!(health.status, FeedStatus::Healthy);
        assert_eq!(health.records, PER_FEED);
        assert_eq!(health.gaps, 0);
        assert_eq!(health.drops, 0);
        assert_eq!(health.last_sequence, PER_FEED);
    }

    dispatcher.stop();
    server_a.join().unwrap();
    server_b.join().unwrap();
}

#[test]
fn test_run_exits_when_every_feed_fails() {
    // Nothing listens on port 1; both workers fail their initial connect.
    let mut config = two_feed_config(1, 1);
    config.max_seconds = 30;

    let mut ingestor = MultiFeedIngestor::new(config).unwrap();
    let started = Instant::now();
    ingestor.run();

    // The run must end on the all-feeds-failed check, not the time limit
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(ingestor.stats().counters().processed(), 0);
}

#[test]
fn test_multi_feed_run_stops_at_message_limit() {
    const PER_FEED: u64 = 600;
    let (port_a, server_a) = spawn_feed_server(PER_FEED);
    let (port_b, server_b) = spawn_feed_server(PER_FEED);

    let mut config = two_feed_config(port_a, port_b);
    config.max_messages = 1000;
    config.max_seconds = 10;

    let mut ingestor = MultiFeedIngestor::new(config).unwrap();
    ingestor.run();

    assert_eq!(ingestor.stats().counters().processed(), 1000);
    server_a.join().unwrap();
    server_b.join().unwrap();
}
