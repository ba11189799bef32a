//! Observer hub: WebSocket fan-out of live snapshots with streaming
//! hydration of history.
//!
//! History is streamed as individual small frames instead of one giant
//! array so an observer can decode incrementally:
//!
//! 1. a bare MessagePack uint32 count header (`0xCE` + 4 BE bytes, always
//!    sent, zero included);
//! 2. `count` snapshot frames, oldest first;
//! 3. live snapshot frames as the engine emits them.
//!
//! Every frame is encoded once and shared across observers. Sends are
//! non-blocking offers against a bounded per-observer budget — 4096 frames
//! while the hydration stream is in flight, 256 afterwards; overflow drops
//! the frame for that observer only. Observers whose read side errors are
//! unregistered and their connection closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::history::SnapshotRing;
use crate::model::{count_header, Snapshot};
use crate::prelude::Result;

/// Per-observer frame budget once live.
const LIVE_QUEUE: usize = 256;

/// Per-observer frame budget while hydrating; also bounds how much
/// history one observer can be sent.
const HYDRATION_QUEUE: usize = 4096;

type Frame = Arc<Vec<u8>>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Assemble the hydration sequence for an observer: the count header
/// followed by each snapshot frame, oldest first.
pub fn hydration_frames(history: &[Snapshot]) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(history.len() + 1);
    frames.push(count_header(history.len() as u32).to_vec());
    for snapshot in history {
        frames.push(snapshot.encode());
    }
    frames
}

/// Fans engine snapshots out to connected WebSocket observers.
pub struct Broadcaster {
    ring: Arc<SnapshotRing>,
    snapshot_rx: mpsc::Receiver<Snapshot>,
}

impl Broadcaster {
    pub fn new(ring: Arc<SnapshotRing>, snapshot_rx: mpsc::Receiver<Snapshot>) -> Self {
        Self { ring, snapshot_rx }
    }

    /// Bind the observer transport. This is the only fatal startup error
    /// in the system.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|e| Error::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        })
    }

    /// Run the hub until shutdown. Owns the observer set.
    pub async fn run(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let Broadcaster {
            ring,
            mut snapshot_rx,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(target: "orderflow::broadcast", %addr, "observer transport listening");
        }

        let (register_tx, mut register_rx) = mpsc::channel::<WebSocketStream<TcpStream>>(64);
        let (unregister_tx, mut unregister_rx) = mpsc::channel::<u64>(64);

        let accept_shutdown = shutdown.clone();
        let accept_task = tokio::spawn(accept_loop(listener, register_tx, accept_shutdown));

        let mut observers: HashMap<u64, Observer> = HashMap::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                conn = register_rx.recv() => {
                    let Some(stream) = conn else { break };
                    next_id += 1;
                    let observer = admit(&ring, next_id, stream, unregister_tx.clone());
                    observers.insert(next_id, observer);
                    info!(target: "orderflow::broadcast", observers = observers.len(), "observer connected");
                }
                id = unregister_rx.recv() => {
                    let Some(id) = id else { break };
                    if observers.remove(&id).is_some() {
                        info!(target: "orderflow::broadcast", observers = observers.len(), "observer disconnected");
                    }
                }
                snapshot = snapshot_rx.recv() => {
                    let Some(snapshot) = snapshot else { break };
                    if observers.is_empty() {
                        continue;
                    }
                    let frame: Frame = Arc::new(snapshot.encode());
                    for observer in observers.values() {
                        if !observer.offer(Arc::clone(&frame)) {
                            debug!(target: "orderflow::broadcast", "live frame dropped for slow observer");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        accept_task.abort();
    }
}

/// Hydrate a fresh observer and register it for live frames. The
/// hydration frames are queued before the observer joins the live set,
/// so no live frame can interleave with history.
fn admit(
    ring: &SnapshotRing,
    id: u64,
    stream: WebSocketStream<TcpStream>,
    unregister_tx: mpsc::Sender<u64>,
) -> Observer {
    let mut history = ring.snapshot_all();
    if history.len() + 1 > HYDRATION_QUEUE {
        // Keep the newest snapshots the queue can hold; the header must
        // match the frames actually sent.
        history.drain(..history.len() + 1 - HYDRATION_QUEUE);
    }
    let frames = hydration_frames(&history);
    let total = frames.len();

    let (tx, rx) = mpsc::channel::<Frame>(HYDRATION_QUEUE);
    let observer = Observer {
        tx,
        pending: Arc::new(AtomicUsize::new(0)),
        hydrating: Arc::new(AtomicBool::new(true)),
    };

    for frame in frames {
        if !observer.offer(Arc::new(frame)) {
            warn!(target: "orderflow::broadcast", "hydration frame dropped, queue exhausted");
            break;
        }
    }

    let (sink, source) = stream.split();
    tokio::spawn(write_loop(
        rx,
        sink,
        Arc::clone(&observer.pending),
        Arc::clone(&observer.hydrating),
        total,
        unregister_tx.clone(),
        id,
    ));
    tokio::spawn(read_loop(source, unregister_tx, id));

    observer
}

/// Hub-side observer state.
struct Observer {
    tx: mpsc::Sender<Frame>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
    hydrating: Arc<AtomicBool>,
}

impl Observer {
    /// Non-blocking offer against the current queue budget.
    fn offer(&self, frame: Frame) -> bool {
        let budget = if self.hydrating.load(Ordering::Acquire) {
            HYDRATION_QUEUE
        } else {
            LIVE_QUEUE
        };
        if self.pending.load(Ordering::Acquire) >= budget {
            return false;
        }
        // Count the frame before it becomes visible to the writer, so the
        // writer's decrement can never undershoot.
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    register_tx: mpsc::Sender<WebSocketStream<TcpStream>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { continue };
                let register_tx = register_tx.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => {
                            let _ = register_tx.send(ws).await;
                        }
                        Err(e) => {
                            debug!(target: "orderflow::broadcast", %peer, error = %e, "WebSocket handshake failed");
                        }
                    }
                });
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Drains the observer's frame queue into its socket. Exits on write
/// error or when the hub drops the observer.
async fn write_loop(
    mut rx: mpsc::Receiver<Frame>,
    mut sink: WsSink,
    pending: Arc<AtomicUsize>,
    hydrating: Arc<AtomicBool>,
    hydration_total: usize,
    unregister_tx: mpsc::Sender<u64>,
    id: u64,
) {
    let mut hydration_remaining = hydration_total;
    while let Some(frame) = rx.recv().await {
        pending.fetch_sub(1, Ordering::AcqRel);
        if sink.send(Message::Binary(frame.as_ref().clone())).await.is_err() {
            break;
        }
        if hydration_remaining > 0 {
            hydration_remaining -= 1;
            if hydration_remaining == 0 {
                hydrating.store(false, Ordering::Release);
            }
        }
    }
    let _ = sink.close().await;
    let _ = unregister_tx.send(id).await;
}

/// Consumes (and discards) inbound frames to detect a dead peer.
async fn read_loop(mut source: WsSource, unregister_tx: mpsc::Sender<u64>, id: u64) {
    while let Some(msg) = source.next().await {
        if msg.is_err() {
            break;
        }
    }
    let _ = unregister_tx.send(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(time_ms: i64) -> Snapshot {
        Snapshot {
            time_ms,
            price: 30_000.0,
            ..Default::default()
        }
    }

    #[test]
    fn hydration_starts_with_the_count_header() {
        let history = [snap(1), snap(2), snap(3)];
        let frames = hydration_frames(&history);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], vec![0xce, 0x00, 0x00, 0x00, 0x03]);
        for (frame, s) in frames[1..].iter().zip(&history) {
            assert_eq!(frame, &s.encode());
        }
    }

    #[test]
    fn empty_history_still_sends_a_header() {
        let frames = hydration_frames(&[]);
        assert_eq!(frames, vec![vec![0xce, 0x00, 0x00, 0x00, 0x00]]);
    }

    #[tokio::test]
    async fn offer_enforces_the_live_budget() {
        let (tx, mut rx) = mpsc::channel::<Frame>(HYDRATION_QUEUE);
        let observer = Observer {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            hydrating: Arc::new(AtomicBool::new(false)),
        };

        let frame: Frame = Arc::new(vec![0u8]);
        for _ in 0..LIVE_QUEUE {
            assert!(observer.offer(Arc::clone(&frame)));
        }
        assert!(
            !observer.offer(Arc::clone(&frame)),
            "budget exhausted, frame dropped"
        );

        // Draining restores capacity for new offers.
        rx.recv().await.unwrap();
        observer.pending.fetch_sub(1, Ordering::AcqRel);
        assert!(observer.offer(frame));
    }

    #[tokio::test]
    async fn offer_allows_the_larger_hydration_budget() {
        let (tx, _rx) = mpsc::channel::<Frame>(HYDRATION_QUEUE);
        let observer = Observer {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            hydrating: Arc::new(AtomicBool::new(true)),
        };
        let frame: Frame = Arc::new(vec![0u8]);
        for _ in 0..HYDRATION_QUEUE {
            assert!(observer.offer(Arc::clone(&frame)));
        }
        assert!(!observer.offer(frame));
    }
}
