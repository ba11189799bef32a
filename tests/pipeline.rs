//! End-to-end tests: bus → engine worker → ring/hub, and the observer
//! hydration protocol over a real WebSocket connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use orderflow_engine::model::{decode_count_header, decode_snapshot};
use orderflow_engine::{
    Book, Broadcaster, CsvSink, Engine, OiEngine, PriceLevel, Snapshot, SnapshotRing, Trade,
    TradeBus,
};

fn trade(id: i64, price: f64, qty: f64, time_ms: i64, is_maker_buyer: bool) -> Trade {
    Trade {
        id,
        price,
        quantity: qty,
        time_ms,
        is_maker_buyer,
    }
}

async fn recv_binary(
    ws: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Vec<u8> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Binary(data) = msg {
            return data;
        }
    }
}

#[tokio::test]
async fn hydration_then_live_over_websocket() {
    let ring = Arc::new(SnapshotRing::new(5));
    for t in 1..=3i64 {
        ring.push(Snapshot {
            time_ms: t,
            price: 30_000.0 + t as f64,
            ..Default::default()
        });
    }

    let (snapshot_tx, snapshot_rx) = mpsc::channel::<Snapshot>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = Broadcaster::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = tokio::spawn(Broadcaster::new(Arc::clone(&ring), snapshot_rx).run(listener, shutdown_rx));

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    // 1. Count header: bare MessagePack uint32.
    let header = recv_binary(&mut ws).await;
    assert_eq!(header, vec![0xce, 0x00, 0x00, 0x00, 0x03]);
    assert_eq!(decode_count_header(&header).unwrap(), 3);

    // 2. History frames, oldest first, each a standalone snapshot frame.
    for expected in 1..=3i64 {
        let frame = recv_binary(&mut ws).await;
        let snapshot = decode_snapshot(&frame).unwrap();
        assert_eq!(snapshot.time_ms, expected);
    }

    // 3. Registration is complete once history has flowed; a live snapshot
    // arrives as the next frame, exactly once.
    snapshot_tx
        .send(Snapshot {
            time_ms: 99,
            ..Default::default()
        })
        .await
        .unwrap();
    let frame = recv_binary(&mut ws).await;
    assert_eq!(decode_snapshot(&frame).unwrap().time_ms, 99);

    shutdown_tx.send(true).unwrap();
    hub.await.unwrap();
}

#[tokio::test]
async fn empty_ring_hydration_sends_a_zero_header() {
    let ring = Arc::new(SnapshotRing::new(5));
    let (snapshot_tx, snapshot_rx) = mpsc::channel::<Snapshot>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = Broadcaster::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = tokio::spawn(Broadcaster::new(ring, snapshot_rx).run(listener, shutdown_rx));

    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    let header = recv_binary(&mut ws).await;
    assert_eq!(header, vec![0xce, 0x00, 0x00, 0x00, 0x00]);

    // Live flow still works with no history.
    snapshot_tx
        .send(Snapshot {
            time_ms: 7,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(decode_snapshot(&recv_binary(&mut ws).await).unwrap().time_ms, 7);

    shutdown_tx.send(true).unwrap();
    hub.await.unwrap();
}

#[tokio::test]
async fn engine_worker_keeps_one_snapshot_per_second_in_the_ring() {
    let bus = Arc::new(TradeBus::new());
    let book = Book::new();
    let oi = OiEngine::new();
    let engine = Engine::new(book.handle(), oi.handle());

    let ring = Arc::new(SnapshotRing::new(16));
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel::<Snapshot>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dir = tempfile::tempdir().unwrap();
    let (csv_sink, csv_task) = CsvSink::spawn(dir.path().to_path_buf(), shutdown_rx.clone());

    let trade_rx = bus.subscribe(64);
    let worker = tokio::spawn(orderflow_engine::engine::run_worker(
        engine,
        trade_rx,
        Arc::clone(&ring),
        snapshot_tx,
        csv_sink,
        shutdown_rx,
    ));

    // Three trades in second S, two in S+1.
    let t0 = 1_700_000_000_000i64;
    bus.publish(trade(1, 30_000.0, 0.5, t0, false));
    bus.publish(trade(2, 30_010.0, 0.2, t0 + 200, false));
    bus.publish(trade(3, 30_005.0, 0.1, t0 + 900, true));
    bus.publish(trade(4, 30_020.0, 1.0, t0 + 1_000, false));
    bus.publish(trade(5, 30_025.0, 1.0, t0 + 1_500, false));

    // Every trade produced a live snapshot.
    for expected_id in 0..5 {
        let snap = tokio::time::timeout(Duration::from_secs(5), snapshot_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.time_ms, [t0, t0 + 200, t0 + 900, t0 + 1_000, t0 + 1_500][expected_id]);
    }

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
    csv_task.await.unwrap();

    // The ring holds one snapshot per second: the freshest of the first
    // second (pushed on rollover) and the freshest of the open second
    // (pushed on shutdown).
    let history = ring.snapshot_all();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].time_ms, t0 + 900);
    assert_eq!(history[0].candle_1s.time, t0 / 1000);
    assert_eq!(history[1].time_ms, t0 + 1_500);
    assert_eq!(history[1].candle_1s.time, t0 / 1000 + 1);

    // One CSV row per 1 s candle.
    let day_file = std::fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let content = std::fs::read_to_string(day_file).unwrap();
    assert_eq!(content.lines().count(), 3, "header plus one row per second");
}

#[tokio::test]
async fn full_pipeline_is_deterministic_and_codec_clean() {
    // Two identical pipelines fed the same seed stream produce snapshots
    // whose encodings are byte-identical.
    let run = |seed_offset: i64| async move {
        let mut book = Book::new();
        let mut oi = OiEngine::new();
        let mut engine = Engine::new(book.handle(), oi.handle());

        let t0 = 1_700_000_000_000i64 + seed_offset;
        let mut frames = Vec::new();
        for i in 0..200i64 {
            if i % 5 == 0 {
                book.update(
                    &[
                        PriceLevel::new(30_000.0 - (i % 3) as f64, 2.0),
                        PriceLevel::new(29_999.0, 1.0),
                    ],
                    &[PriceLevel::new(30_001.0, 1.5 + (i % 4) as f64)],
                );
            }
            if i % 20 == 0 {
                oi.update(500_000.0 + i as f64 * 7.0, 30_000.0 + i as f64 * 2.0);
            }
            let snap = engine.process_trade(&trade(
                i,
                30_000.0 + (i % 13) as f64,
                0.1 * ((i % 7) + 1) as f64,
                t0 + i * 311,
                i % 2 == 0,
            ));
            let encoded = snap.encode();
            assert_eq!(decode_snapshot(&encoded).unwrap(), snap);
            frames.push(encoded);
        }
        frames
    };

    let a = run(0).await;
    let b = run(0).await;
    assert_eq!(a, b);
}
